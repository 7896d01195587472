use crate::gateway::EndpointClient;
use crate::history::ChatHistory;
use crate::io_struct::{
    ChatHistoryEntry, ChatReply, ChatRequest, FeedbackRequest, HealthResponse, Message,
};
use actix_web::{HttpResponse, HttpServer, delete, error, get, post, web};
use bytes::Bytes;
use serde_json::json;
use std::io::Write;
use std::sync::Mutex;

/// Replies longer than this are sent as a streamed single-chunk body instead
/// of a plain JSON body. Transport choice only, the payload is identical.
pub const LARGE_RESPONSE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    pub endpoint_name: String,
    pub max_tokens: u32,
    pub history_capacity: usize,
}

pub struct AppState {
    pub gateway: EndpointClient,
    pub endpoint_name: String,
    pub max_tokens: u32,
    pub supports_feedback: bool,
    pub history: Mutex<ChatHistory>,
}

fn lock_history(state: &AppState) -> Result<std::sync::MutexGuard<'_, ChatHistory>, actix_web::Error> {
    state
        .history
        .lock()
        .map_err(|_| error::ErrorInternalServerError("chat history lock poisoned"))
}

#[get("/api/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        serving_endpoint: state.endpoint_name.clone(),
        endpoint_supports_feedback: state.supports_feedback,
    })
}

#[post("/api/chat")]
pub async fn chat(
    req: web::Json<ChatRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    log::info!("Received chat message ({} chars)", req.message.chars().count());

    let messages = vec![Message::user(req.message.clone())];
    let (result, _raw) = state
        .gateway
        .query(
            &state.endpoint_name,
            &messages,
            state.max_tokens,
            state.supports_feedback,
        )
        .await;
    log::info!(
        "Endpoint replied, request_id: {:?}, {} chars",
        result.request_id,
        result.text.chars().count()
    );

    let reply = ChatReply {
        message: result.text,
        timestamp: chrono::Utc::now().to_rfc3339(),
        request_id: result.request_id,
    };

    lock_history(&state)?.push(ChatHistoryEntry {
        user_message: req.into_inner().message,
        assistant_message: reply.message.clone(),
        timestamp: reply.timestamp.clone(),
        request_id: reply.request_id.clone(),
    });

    if reply.message.chars().count() > LARGE_RESPONSE_THRESHOLD {
        log::info!("Response exceeds {LARGE_RESPONSE_THRESHOLD} chars, streaming body");
        let body = serde_json::to_vec(&reply).map_err(error::ErrorInternalServerError)?;
        return Ok(HttpResponse::Ok()
            .content_type("application/json")
            .streaming(futures::stream::once(async move {
                Ok::<Bytes, actix_web::Error>(Bytes::from(body))
            })));
    }
    Ok(HttpResponse::Ok().json(reply))
}

#[get("/api/chat/history")]
pub async fn get_chat_history(
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let entries = lock_history(&state)?.entries();
    Ok(HttpResponse::Ok().json(json!({ "history": entries })))
}

#[delete("/api/chat/history")]
pub async fn clear_chat_history(
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    lock_history(&state)?.clear();
    log::info!("Chat history cleared");
    Ok(HttpResponse::Ok().json(json!({ "message": "Chat history cleared" })))
}

#[post("/api/feedback")]
pub async fn submit_chat_feedback(
    req: web::Json<FeedbackRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    // Rejected before any outbound call when the endpoint lacks the
    // feedback entity.
    if !state.supports_feedback {
        return Err(error::ErrorBadRequest(
            "Feedback not supported by this endpoint",
        ));
    }
    state
        .gateway
        .submit_feedback(
            &state.endpoint_name,
            &req.request_id,
            req.rating,
            req.comment.as_deref(),
        )
        .await
        .map_err(error::ErrorBadGateway)?;
    log::info!(
        "Feedback submitted for request {}: {}",
        req.request_id,
        req.rating.as_str()
    );
    Ok(HttpResponse::Ok().json(json!({ "message": "Feedback submitted successfully" })))
}

pub async fn startup(config: BridgeConfig, gateway: EndpointClient) -> std::io::Result<()> {
    // default level is info
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .init();

    let supports_feedback = gateway.supports_feedback(&config.endpoint_name).await;
    log::info!("Serving endpoint: {}", config.endpoint_name);
    log::info!("Endpoint feedback support: {supports_feedback}");

    let state = web::Data::new(AppState {
        gateway,
        endpoint_name: config.endpoint_name.clone(),
        max_tokens: config.max_tokens,
        supports_feedback,
        history: Mutex::new(ChatHistory::new(config.history_capacity)),
    });

    println!("Starting server at {}:{}", config.host, config.port);

    HttpServer::new(move || {
        actix_web::App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(state.clone())
            .service(health)
            .service(chat)
            .service(get_chat_history)
            .service(clear_chat_history)
            .service(submit_chat_feedback)
    })
    .bind((config.host, config.port))?
    .run()
    .await
}
