//! In-process mock of the remote serving platform, used by the integration
//! tests. Runs on its own system thread and lives for the whole test run.

#![allow(dead_code)]

use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub struct MockEndpoint {
    /// Body returned by the sync invocations path.
    pub response: Value,
    /// Raw SSE body returned when the caller asks for an event stream.
    /// `None` makes the streaming path fail with a 500.
    pub sse_body: Option<String>,
    /// Endpoint metadata; `Value::Null` turns the lookup into a 404.
    pub metadata: Value,
    pub invocation_hits: AtomicUsize,
    pub feedback_hits: AtomicUsize,
    pub last_payload: Mutex<Option<Value>>,
    pub last_feedback: Mutex<Option<Value>>,
}

impl MockEndpoint {
    pub fn new(response: Value) -> Self {
        MockEndpoint {
            response,
            sse_body: None,
            metadata: Value::Null,
            invocation_hits: AtomicUsize::new(0),
            feedback_hits: AtomicUsize::new(0),
            last_payload: Mutex::new(None),
            last_feedback: Mutex::new(None),
        }
    }
}

async fn invocations(
    req: HttpRequest,
    body: web::Json<Value>,
    state: web::Data<MockEndpoint>,
) -> HttpResponse {
    state.invocation_hits.fetch_add(1, Ordering::SeqCst);
    *state.last_payload.lock().unwrap() = Some(body.into_inner());
    let wants_stream = req
        .headers()
        .get(actix_web::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false);
    if wants_stream {
        match &state.sse_body {
            Some(body) => HttpResponse::Ok()
                .content_type("text/event-stream")
                .body(body.clone()),
            None => HttpResponse::InternalServerError().body("streaming unavailable"),
        }
    } else {
        HttpResponse::Ok().json(state.response.clone())
    }
}

async fn metadata(state: web::Data<MockEndpoint>) -> HttpResponse {
    if state.metadata.is_null() {
        HttpResponse::NotFound().json(json!({"error_code": "RESOURCE_DOES_NOT_EXIST"}))
    } else {
        HttpResponse::Ok().json(state.metadata.clone())
    }
}

async fn feedback(body: web::Json<Value>, state: web::Data<MockEndpoint>) -> HttpResponse {
    state.feedback_hits.fetch_add(1, Ordering::SeqCst);
    *state.last_feedback.lock().unwrap() = Some(body.into_inner());
    HttpResponse::Ok().json(json!({"ok": true}))
}

/// Binds the mock to an ephemeral port and returns its base url.
pub fn start_mock(state: Arc<MockEndpoint>) -> String {
    let (tx, rx) = std::sync::mpsc::channel();
    let app_state = web::Data::from(state);
    std::thread::spawn(move || {
        actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(app_state.clone())
                    .route(
                        "/serving-endpoints/{name}/invocations",
                        web::post().to(invocations),
                    )
                    .route(
                        "/serving-endpoints/{name}/served-models/feedback/invocations",
                        web::post().to(feedback),
                    )
                    .route(
                        "/api/2.0/serving-endpoints/{name}",
                        web::get().to(metadata),
                    )
            })
            .workers(1)
            .bind(("127.0.0.1", 0))
            .expect("bind mock endpoint");
            let addr = server.addrs()[0];
            let server = server.run();
            tx.send(addr).expect("report mock addr");
            server.await.expect("mock endpoint crashed");
        });
    });
    let addr = rx.recv().expect("mock endpoint failed to start");
    format!("http://{addr}")
}
