use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One part of a structured assistant message. Agent endpoints mix typed
/// output items, bare text items and nested content items in the same list,
/// so this stays untagged and keeps a catch-all for parts we cannot read.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ContentPart {
    OutputText {
        #[serde(rename = "type")]
        kind: String,
        text: String,
    },
    Text {
        text: String,
    },
    Nested {
        content: String,
    },
    Other(Value),
}

impl ContentPart {
    pub fn text(&self) -> Option<&str> {
        match self {
            ContentPart::OutputText { text, .. } => Some(text),
            ContentPart::Text { text } => Some(text),
            ContentPart::Nested { content } => Some(content),
            ContentPart::Other(Value::String(s)) => Some(s),
            ContentPart::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Joins the non-empty part texts with a single space. Empty string
    /// content and part lists with no readable text count as absent.
    pub fn flatten(&self) -> Option<String> {
        match self {
            MessageContent::Text(s) => {
                if s.trim().is_empty() {
                    None
                } else {
                    Some(s.clone())
                }
            }
            MessageContent::Parts(parts) => {
                let texts: Vec<&str> = parts
                    .iter()
                    .filter_map(ContentPart::text)
                    .filter(|t| !t.trim().is_empty())
                    .collect();
                if texts.is_empty() {
                    None
                } else {
                    Some(texts.join(" "))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }
}

/// Payload sent to the serving endpoint's invocations path.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRequest {
    pub input: Vec<Message>,
    pub max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub databricks_options: Option<DatabricksOptions>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabricksOptions {
    pub return_trace: bool,
}

/// The normalized (text, request id) pair the core guarantees to produce
/// for any response shape. Lives for one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalResult {
    pub text: String,
    pub request_id: Option<String>,
}

/// One streaming delta in agent chunk format.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StreamDelta {
    pub delta: DeltaPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeltaPayload {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl StreamDelta {
    pub fn assistant(content: impl Into<String>, id: &str) -> Self {
        StreamDelta {
            delta: DeltaPayload {
                role: "assistant".to_string(),
                content: content.into(),
                id: Some(id.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Positive,
    Negative,
}

impl Rating {
    pub fn as_str(self) -> &'static str {
        match self {
            Rating::Positive => "positive",
            Rating::Negative => "negative",
        }
    }
}

// ---- inbound API types ----

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub message: String,
    pub timestamp: String,
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub serving_endpoint: String,
    pub endpoint_supports_feedback: bool,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub request_id: String,
    pub rating: Rating,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatHistoryEntry {
    pub user_message: String,
    pub assistant_message: String,
    pub timestamp: String,
    pub request_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_deserializes_from_plain_string() {
        let content: MessageContent = serde_json::from_value(json!("hello")).unwrap();
        assert_eq!(content.flatten().as_deref(), Some("hello"));
    }

    #[test]
    fn content_deserializes_from_part_list() {
        let content: MessageContent = serde_json::from_value(json!([
            {"type": "output_text", "text": "A"},
            {"text": "B"},
            {"content": "C"},
        ]))
        .unwrap();
        assert_eq!(content.flatten().as_deref(), Some("A B C"));
    }

    #[test]
    fn unreadable_parts_are_skipped_not_fatal() {
        let content: MessageContent = serde_json::from_value(json!([
            {"type": "function_call", "name": "lookup", "arguments": "{}"},
            {"text": "answer"},
        ]))
        .unwrap();
        assert_eq!(content.flatten().as_deref(), Some("answer"));
    }

    #[test]
    fn empty_content_flattens_to_none() {
        let content: MessageContent = serde_json::from_value(json!("   ")).unwrap();
        assert!(content.flatten().is_none());
        let content: MessageContent =
            serde_json::from_value(json!([{"text": ""}, {"text": "  "}])).unwrap();
        assert!(content.flatten().is_none());
    }

    #[test]
    fn rating_uses_lowercase_wire_names() {
        assert_eq!(serde_json::to_value(Rating::Positive).unwrap(), json!("positive"));
        let rating: Rating = serde_json::from_value(json!("negative")).unwrap();
        assert_eq!(rating, Rating::Negative);
    }

    #[test]
    fn agent_request_omits_options_when_absent() {
        let req = AgentRequest {
            input: vec![Message::user("hi")],
            max_output_tokens: 100,
            databricks_options: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("databricks_options").is_none());
        assert_eq!(value["input"][0]["role"], json!("user"));
    }
}
