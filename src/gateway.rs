//! Client for the remote model-serving endpoint: one-shot queries, streaming
//! queries, feedback submission and capability detection.

use crate::io_struct::{
    AgentRequest, CanonicalResult, DatabricksOptions, Message, MessageContent, Rating, Role,
    StreamDelta,
};
use crate::normalizer;
use anyhow::{Context, anyhow, bail};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use uuid::Uuid;

/// Served-entity name that marks an endpoint as accepting feedback.
const FEEDBACK_ENTITY: &str = "feedback";

type BodyStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;
pub type DeltaStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamDelta>> + Send>>;

#[derive(Debug, Clone)]
pub struct EndpointClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl EndpointClient {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(EndpointClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn invocations_url(&self, endpoint: &str) -> String {
        format!("{}/serving-endpoints/{}/invocations", self.base_url, endpoint)
    }

    fn feedback_url(&self, endpoint: &str) -> String {
        format!(
            "{}/serving-endpoints/{}/served-models/feedback/invocations",
            self.base_url, endpoint
        )
    }

    fn metadata_url(&self, endpoint: &str) -> String {
        format!("{}/api/2.0/serving-endpoints/{}", self.base_url, endpoint)
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Builds the outbound payload from the most recent user message only.
    /// Multi-turn context is deliberately not preserved by the transport.
    fn build_payload(messages: &[Message], max_tokens: u32, want_trace: bool) -> AgentRequest {
        let content = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_else(|| MessageContent::Text(String::new()));
        AgentRequest {
            input: vec![Message {
                role: Role::User,
                content,
            }],
            max_output_tokens: max_tokens,
            databricks_options: if want_trace {
                Some(DatabricksOptions { return_trace: true })
            } else {
                None
            },
        }
    }

    /// One synchronous round trip. Transport failures are absorbed into an
    /// apologetic canonical message with no request id; single attempt.
    pub async fn query(
        &self,
        endpoint: &str,
        messages: &[Message],
        max_tokens: u32,
        want_trace: bool,
    ) -> (CanonicalResult, Value) {
        let payload = Self::build_payload(messages, max_tokens, want_trace);
        self.query_payload(endpoint, &payload).await
    }

    async fn query_payload(&self, endpoint: &str, payload: &AgentRequest) -> (CanonicalResult, Value) {
        match self.try_query(endpoint, payload).await {
            Ok(raw) => {
                let result = normalizer::extract(&raw);
                (result, raw)
            }
            Err(e) => {
                log::error!("Error calling endpoint {endpoint}: {e:#}");
                let result = CanonicalResult {
                    text: format!(
                        "I encountered an issue while processing your request: {e}. \
                         Please try again in a moment."
                    ),
                    request_id: None,
                };
                (result, Value::Null)
            }
        }
    }

    async fn try_query(&self, endpoint: &str, payload: &AgentRequest) -> anyhow::Result<Value> {
        let response = self
            .authed(self.client.post(self.invocations_url(endpoint)))
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        response.json().await.context("decoding endpoint response")
    }

    /// Requests a streaming reply and yields it as a lazy sequence of
    /// deltas. Chat-completions chunks are converted into agent deltas
    /// tagged with one stream-scoped id; agent chunks pass through as-is;
    /// anything else is a protocol violation. Any failure mid-stream
    /// degrades once to a synchronous query emitted as a single terminal
    /// delta. Dropping the stream cancels it; nothing is signaled upstream.
    pub fn query_stream(
        &self,
        endpoint: &str,
        messages: &[Message],
        max_tokens: u32,
        want_trace: bool,
    ) -> DeltaStream {
        let ctx = StreamCtx {
            client: self.clone(),
            endpoint: endpoint.to_string(),
            payload: Self::build_payload(messages, max_tokens, want_trace),
            stream_id: Uuid::new_v4().to_string(),
        };
        Box::pin(futures::stream::unfold(
            StreamState::Connect(ctx),
            |mut state| async move {
                loop {
                    state = match state {
                        StreamState::Connect(ctx) => {
                            match ctx.client.open_stream(&ctx.endpoint, &ctx.payload).await {
                                Ok(body) => StreamState::Streaming {
                                    ctx,
                                    body,
                                    buf: String::new(),
                                    pending: VecDeque::new(),
                                    finished: false,
                                },
                                Err(e) => StreamState::Fallback(ctx, e),
                            }
                        }
                        StreamState::Streaming {
                            ctx,
                            mut body,
                            mut buf,
                            mut pending,
                            finished,
                        } => {
                            if let Some(delta) = pending.pop_front() {
                                return emit(
                                    delta,
                                    StreamState::Streaming {
                                        ctx,
                                        body,
                                        buf,
                                        pending,
                                        finished,
                                    },
                                );
                            }
                            if finished {
                                return None;
                            }
                            match body.next().await {
                                Some(Ok(bytes)) => {
                                    buf.push_str(&String::from_utf8_lossy(&bytes));
                                    match drain_lines(&mut buf, &ctx.stream_id, &mut pending) {
                                        Ok(done) => StreamState::Streaming {
                                            ctx,
                                            body,
                                            buf,
                                            pending,
                                            finished: done,
                                        },
                                        Err(e) => StreamState::Fallback(ctx, e),
                                    }
                                }
                                Some(Err(e)) => StreamState::Fallback(ctx, anyhow::Error::from(e)),
                                None => {
                                    // Upstream closed; a trailing line may
                                    // still sit in the buffer.
                                    let line = std::mem::take(&mut buf);
                                    let line = line.trim();
                                    if line.is_empty() {
                                        return None;
                                    }
                                    match parse_stream_line(line, &ctx.stream_id) {
                                        Ok(event) => {
                                            if let LineEvent::Delta(delta) = event {
                                                pending.push_back(delta);
                                            }
                                            StreamState::Streaming {
                                                ctx,
                                                body,
                                                buf: String::new(),
                                                pending,
                                                finished: true,
                                            }
                                        }
                                        Err(e) => StreamState::Fallback(ctx, e),
                                    }
                                }
                            }
                        }
                        StreamState::Fallback(ctx, err) => {
                            log::warn!("Streaming failed, falling back to non-streaming: {err:#}");
                            let (result, _raw) =
                                ctx.client.query_payload(&ctx.endpoint, &ctx.payload).await;
                            if result.text.is_empty() {
                                return None;
                            }
                            let delta = StreamDelta::assistant(result.text, &ctx.stream_id);
                            return emit(delta, StreamState::Done);
                        }
                        StreamState::Done => return None,
                    };
                }
            },
        ))
    }

    async fn open_stream(&self, endpoint: &str, payload: &AgentRequest) -> anyhow::Result<BodyStream> {
        let response = self
            .authed(self.client.post(self.invocations_url(endpoint)))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(Box::pin(response.bytes_stream()))
    }

    /// True iff the endpoint serves a registered feedback entity. Transport
    /// and parse errors count as unsupported, never as failures.
    pub async fn supports_feedback(&self, endpoint: &str) -> bool {
        let metadata: anyhow::Result<Value> = async {
            let response = self
                .authed(self.client.get(self.metadata_url(endpoint)))
                .send()
                .await?
                .error_for_status()?;
            response.json().await.context("decoding endpoint metadata")
        }
        .await;
        match metadata {
            Ok(metadata) => metadata
                .pointer("/config/served_entities")
                .and_then(Value::as_array)
                .map(|entities| {
                    entities.iter().any(|entity| {
                        entity.get("entity_name").and_then(Value::as_str) == Some(FEEDBACK_ENTITY)
                    })
                })
                .unwrap_or(false),
            Err(e) => {
                log::warn!("Error checking feedback support for {endpoint}: {e:#}");
                false
            }
        }
    }

    /// Submits a feedback record for an earlier request. Failures surface to
    /// the caller: this is a discrete user action with no silent substitute.
    pub async fn submit_feedback(
        &self,
        endpoint: &str,
        request_id: &str,
        rating: Rating,
        comment: Option<&str>,
    ) -> anyhow::Result<Value> {
        let source = json!({"id": "agent-bridge", "type": "human"});
        let text_assessments = json!([{
            "ratings": {
                "answer_correct": {"value": rating.as_str()},
            },
            "free_text_comment": comment,
        }]);
        let payload = json!({
            "dataframe_records": [{
                "source": serde_json::to_string(&source)?,
                "request_id": request_id,
                "text_assessments": serde_json::to_string(&text_assessments)?,
                "retrieval_assessments": "[]",
            }],
        });
        let response = self
            .authed(self.client.post(self.feedback_url(endpoint)))
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await.unwrap_or(Value::Null))
    }
}

struct StreamCtx {
    client: EndpointClient,
    endpoint: String,
    payload: AgentRequest,
    stream_id: String,
}

enum StreamState {
    Connect(StreamCtx),
    Streaming {
        ctx: StreamCtx,
        body: BodyStream,
        buf: String,
        pending: VecDeque<StreamDelta>,
        finished: bool,
    },
    Fallback(StreamCtx, anyhow::Error),
    Done,
}

enum LineEvent {
    Delta(StreamDelta),
    Skip,
    Done,
}

fn emit(
    delta: StreamDelta,
    next: StreamState,
) -> Option<(anyhow::Result<StreamDelta>, StreamState)> {
    Some((Ok(delta), next))
}

/// Consumes complete lines from the buffer, queueing any deltas they carry.
/// Returns true once the terminator line was seen.
fn drain_lines(
    buf: &mut String,
    stream_id: &str,
    pending: &mut VecDeque<StreamDelta>,
) -> anyhow::Result<bool> {
    while let Some(pos) = buf.find('\n') {
        let line: String = buf.drain(..=pos).collect();
        match parse_stream_line(line.trim(), stream_id)? {
            LineEvent::Delta(delta) => pending.push_back(delta),
            LineEvent::Skip => {}
            LineEvent::Done => return Ok(true),
        }
    }
    Ok(false)
}

/// One SSE line. Comment and event lines are skipped; bare JSON lines are
/// tolerated alongside `data:`-prefixed ones.
fn parse_stream_line(line: &str, stream_id: &str) -> anyhow::Result<LineEvent> {
    if line.is_empty() || line.starts_with(':') || line.starts_with("event:") {
        return Ok(LineEvent::Skip);
    }
    let data = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
    if data == "[DONE]" {
        return Ok(LineEvent::Done);
    }
    let chunk: Value =
        serde_json::from_str(data).map_err(|e| anyhow!("invalid JSON in stream chunk: {e}"))?;
    convert_chunk(&chunk, stream_id)
}

fn convert_chunk(chunk: &Value, stream_id: &str) -> anyhow::Result<LineEvent> {
    if let Some(choices) = chunk.get("choices").and_then(Value::as_array) {
        let content = choices
            .first()
            .and_then(|choice| choice.pointer("/delta/content"))
            .and_then(Value::as_str)
            .unwrap_or("");
        if content.is_empty() {
            return Ok(LineEvent::Skip);
        }
        return Ok(LineEvent::Delta(StreamDelta::assistant(content, stream_id)));
    }
    if chunk.get("delta").is_some() {
        let delta: StreamDelta = serde_json::from_value(chunk.clone())
            .map_err(|e| anyhow!("malformed delta chunk: {e}"))?;
        return Ok(LineEvent::Delta(delta));
    }
    bail!("unexpected chunk shape from serving endpoint: {chunk}")
}
