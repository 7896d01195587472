//! Response-shape normalization for heterogeneous serving-endpoint replies.
//!
//! The remote endpoint may answer in chat-completions format, a multi-agent
//! supervisor format carrying the conversation history, a bare `output`
//! field, or several other ad hoc shapes. `extract` turns any of them into a
//! single canonical `(text, request_id)` pair. It is total: on an
//! unrecognized shape it degrades to a generic notice instead of failing,
//! because the caller has nothing better to do than display something.

use crate::io_struct::{CanonicalResult, MessageContent};
use serde_json::Value;

/// Marker emitted by the supervisor when a request was delegated to a
/// sub-agent. Matched as a case-sensitive substring anywhere in the text.
pub const HANDOFF_MARKER: &str = "Handed off to:";

/// Shown instead of an intermediate handoff message.
pub const HANDOFF_PLACEHOLDER: &str =
    "I am processing your request. Please wait for the complete response.";

/// Shown when no text at all could be recovered from the response.
pub const EXTRACTION_FAILED: &str =
    "I received your request but couldn't process the response properly. Please try again.";

/// Scalar fields some endpoints use instead of a structured answer.
const ALT_ANSWER_FIELDS: [&str; 4] = ["response", "result", "answer", "content"];

/// The closed set of recognized response shapes, in match order. The order
/// is part of the contract since shapes can overlap: a supervisor response
/// may carry both a conversation history and a chat-completions block.
#[derive(Debug)]
enum ResponseShape<'a> {
    Handoff,
    ConversationHistory(&'a [Value]),
    ScalarAnswer(&'a Value),
    Output(&'a Value),
    ChatCompletions(&'a Value),
    Unrecognized(&'a Value),
}

impl ResponseShape<'_> {
    /// All shapes present in the response, in contract order. A shape that
    /// matches structurally but yields no text falls through to the next.
    fn candidates(raw: &Value) -> Vec<ResponseShape<'_>> {
        let mut shapes = Vec::new();
        if signals_handoff(raw) {
            shapes.push(ResponseShape::Handoff);
        }
        if let Some(turns) = raw.get("input").and_then(Value::as_array) {
            shapes.push(ResponseShape::ConversationHistory(turns));
        }
        for field in ALT_ANSWER_FIELDS {
            if let Some(value) = raw.get(field) {
                shapes.push(ResponseShape::ScalarAnswer(value));
            }
        }
        if let Some(output) = raw.get("output") {
            shapes.push(ResponseShape::Output(output));
        }
        if raw.get("messages").is_some() || raw.get("choices").is_some() {
            shapes.push(ResponseShape::ChatCompletions(raw));
        }
        shapes.push(ResponseShape::Unrecognized(raw));
        shapes
    }

    fn into_text(self) -> Option<String> {
        match self {
            ResponseShape::Handoff => Some(HANDOFF_PLACEHOLDER.to_string()),
            ResponseShape::ConversationHistory(turns) => last_assistant_text(turns),
            ResponseShape::ScalarAnswer(value) => scalar_text(value),
            ResponseShape::Output(output) => output_text(output),
            ResponseShape::ChatCompletions(raw) => chat_completions_text(raw),
            ResponseShape::Unrecognized(raw) => {
                if contains_text(raw) {
                    serde_json::to_string(raw).ok()
                } else {
                    None
                }
            }
        }
    }
}

/// Normalizes a raw endpoint response into a canonical result. Total
/// function: always returns text, even if only the generic failure notice.
pub fn extract(raw: &Value) -> CanonicalResult {
    let request_id = request_id(raw);
    let text = ResponseShape::candidates(raw)
        .into_iter()
        .find_map(ResponseShape::into_text)
        .unwrap_or_else(|| EXTRACTION_FAILED.to_string());
    CanonicalResult { text, request_id }
}

/// The request id lives in nested response metadata and is extracted
/// independently of the main text, so feedback can still reference the call
/// when extraction falls all the way through.
pub fn request_id(raw: &Value) -> Option<String> {
    raw.pointer("/databricks_output/databricks_request_id")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// A response signals a handoff when any string anywhere carries the marker,
/// or when a function-call output item is still pending (no output yet).
fn signals_handoff(value: &Value) -> bool {
    match value {
        Value::String(s) => s.contains(HANDOFF_MARKER),
        Value::Array(items) => items.iter().any(signals_handoff),
        Value::Object(map) => {
            if map.get("type").and_then(Value::as_str) == Some("function_call_output") {
                match map.get("output") {
                    None => return true,
                    Some(Value::String(s)) if s.trim().is_empty() => return true,
                    _ => {}
                }
            }
            map.values().any(signals_handoff)
        }
        _ => false,
    }
}

/// Scans the turns backward for the last assistant turn with non-empty
/// content and flattens it. Turns without readable content are skipped.
fn last_assistant_text(turns: &[Value]) -> Option<String> {
    turns.iter().rev().find_map(assistant_turn_text)
}

fn assistant_turn_text(turn: &Value) -> Option<String> {
    let obj = turn.as_object()?;
    if obj.get("role").and_then(Value::as_str) != Some("assistant") {
        return None;
    }
    let content: MessageContent = serde_json::from_value(obj.get("content")?.clone()).ok()?;
    content.flatten()
}

fn output_text(output: &Value) -> Option<String> {
    match output {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(items) => {
            // Prefer a proper assistant turn if the list is role-tagged.
            if let Some(text) = last_assistant_text(items) {
                return Some(text);
            }
            let fragments: Vec<String> = items.iter().filter_map(item_fragment).collect();
            if fragments.is_empty() {
                None
            } else {
                Some(fragments.join(" "))
            }
        }
        Value::Object(_) => item_fragment(output),
        _ => None,
    }
}

/// Pulls a readable text fragment out of one output item, skipping handoff
/// fragments. Completed tool outputs contribute their text like any other
/// item; pending ones have no text to contribute and fall out naturally.
fn item_fragment(item: &Value) -> Option<String> {
    match item {
        Value::String(s) if !s.trim().is_empty() && !s.contains(HANDOFF_MARKER) => {
            Some(s.clone())
        }
        Value::Object(map) => {
            for key in ["content", "text", "output"] {
                if let Some(s) = map.get(key).and_then(Value::as_str) {
                    if !s.trim().is_empty() && !s.contains(HANDOFF_MARKER) {
                        return Some(s.to_string());
                    }
                }
            }
            None
        }
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Standard chat-completions shapes, assumed already flat: first assistant
/// entry of `messages`, else `choices[0].message.content`.
fn chat_completions_text(raw: &Value) -> Option<String> {
    if let Some(messages) = raw.get("messages").and_then(Value::as_array) {
        for msg in messages {
            if msg.get("role").and_then(Value::as_str) != Some("assistant") {
                continue;
            }
            if let Some(content) = msg.get("content").and_then(Value::as_str) {
                if !content.trim().is_empty() {
                    return Some(content.to_string());
                }
            }
        }
    }
    raw.get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.pointer("/message/content"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn contains_text(value: &Value) -> bool {
    match value {
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => items.iter().any(contains_text),
        Value::Object(map) => map.values().any(contains_text),
        _ => false,
    }
}
