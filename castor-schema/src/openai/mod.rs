//! OpenAI chat-completions wire protocol, request and response sides.

mod model_list;

pub use model_list::{OpenaiModel, OpenaiModelList};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// `POST /v1/chat/completions` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,

    pub messages: Vec<ChatMessage>,

    #[serde(default)]
    pub stream: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,

    /// Tool-call assistant messages legitimately carry `content: null`.
    #[serde(default, deserialize_with = "nullable_content")]
    pub content: MessageContent,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn nullable_content<'de, D>(deserializer: D) -> Result<MessageContent, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<MessageContent>::deserialize(deserializer)?.unwrap_or_default())
}

/// OpenAI message content: a bare string or a list of typed items.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<MessagePart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl MessageContent {
    /// Concatenated text of all text items; used for system prompts.
    pub fn joined_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

/// One item of an array-form message content.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessagePart {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<ImageUrl>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImageUrl {
    pub url: String,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Non-streaming chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: ChatUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AssistantMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

/// One SSE frame of a streaming chat completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChunkChoice>,
}

impl ChatChunk {
    pub fn new(id: impl Into<String>, model: impl Into<String>, delta: ChatDelta) -> Self {
        Self {
            id: id.into(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: model.into(),
            choices: vec![ChatChunkChoice {
                index: 0,
                delta,
                finish_reason: None,
            }],
        }
    }

    pub fn finish(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: model.into(),
            choices: vec![ChatChunkChoice {
                index: 0,
                delta: ChatDelta::default(),
                finish_reason: Some("stop".to_string()),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunkChoice {
    pub index: u32,
    pub delta: ChatDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

impl ChatDelta {
    pub fn role_only() -> Self {
        Self {
            role: Some("assistant".to_string()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.role.is_none() && self.content.is_none() && self.reasoning_content.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_and_array_content_both_parse() {
        let req: ChatRequest = serde_json::from_value(json!({
            "model": "gcli-gemini-2.5-flash",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": [
                    {"type": "text", "text": "what is this?"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,abc"}}
                ]}
            ]
        }))
        .unwrap();

        assert!(!req.stream);
        assert_eq!(req.messages[0].content.joined_text(), "be terse");
        match &req.messages[1].content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(parts[1].image_url.is_some());
            }
            MessageContent::Text(_) => panic!("expected array content"),
        }
    }

    #[test]
    fn null_content_parses_as_empty() {
        let req: ChatRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [
                {"role": "assistant", "content": null, "tool_calls": []},
                {"role": "user", "content": "hi"}
            ]
        }))
        .unwrap();
        assert_eq!(req.messages[0].content.joined_text(), "");
    }

    #[test]
    fn chunk_serializes_without_absent_delta_fields() {
        let chunk = ChatChunk::new("chatcmpl-1", "m", ChatDelta::role_only());
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["choices"][0]["delta"], json!({"role": "assistant"}));
        assert_eq!(value["choices"][0]["finish_reason"], Value::Null);
    }

    #[test]
    fn finish_chunk_has_stop_reason_and_empty_delta() {
        let chunk = ChatChunk::finish("chatcmpl-1", "m");
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["choices"][0]["finish_reason"], json!("stop"));
        assert_eq!(value["choices"][0]["delta"], json!({}));
    }
}
