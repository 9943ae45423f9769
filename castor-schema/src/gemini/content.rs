use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single conversation turn or system instruction.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Content {
    /// Usually `"user"` or `"model"`. Absent for `systemInstruction`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Ordered parts that constitute a single message.
    #[serde(default)]
    pub parts: Vec<Part>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Content {
    /// True when any part carries a function call (tool-use turns).
    pub fn has_function_call(&self) -> bool {
        self.parts.iter().any(|p| p.function_call.is_some())
    }
}

/// One atomic piece of content inside a `Content` turn.
///
/// `text` is the common case; media and tool parts are modeled where the
/// rewriter needs to look inside them, everything else rides in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Model-thought marker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,

    /// Opaque thought signature accepted by the upstream validator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,

    /// Inline text data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Inline media bytes (base64) with a mime type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,

    /// URI-based file reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,

    /// Function call produced by the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<Value>,

    /// Function response used as context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_response: Option<Value>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// A part is empty when it carries no data field beyond the bare
    /// `thought` marker.
    pub fn is_empty(&self) -> bool {
        self.text.as_deref().is_none_or(str::is_empty)
            && self.thought_signature.is_none()
            && self.inline_data.is_none()
            && self.file_data.is_none()
            && self.function_call.is_none()
            && self.function_response.is_none()
            && self.extra.is_empty()
    }
}

/// `inlineData` media payload.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

/// `fileData` URI reference.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub mime_type: String,
    pub file_uri: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_part_roundtrips() {
        let input = json!({
            "role": "user",
            "parts": [{"text": "hello"}]
        });
        let content: Content = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(content.role.as_deref(), Some("user"));
        assert_eq!(serde_json::to_value(&content).unwrap(), input);
    }

    #[test]
    fn inline_data_is_typed() {
        let content: Content = serde_json::from_value(json!({
            "role": "user",
            "parts": [{"inlineData": {"mimeType": "image/png", "data": "abc123"}}]
        }))
        .unwrap();

        let inline = content.parts[0].inline_data.as_ref().unwrap();
        assert_eq!(inline.mime_type, "image/png");
        assert_eq!(inline.data, "abc123");
    }

    #[test]
    fn function_call_detection() {
        let content: Content = serde_json::from_value(json!({
            "role": "model",
            "parts": [{"functionCall": {"name": "get_weather", "args": {}}}]
        }))
        .unwrap();
        assert!(content.has_function_call());
    }

    #[test]
    fn thought_signature_roundtrips_camel_case() {
        let input = json!({
            "parts": [{"text": "...", "thoughtSignature": "sig"}]
        });
        let content: Content = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(content.parts[0].thought_signature.as_deref(), Some("sig"));
        assert_eq!(serde_json::to_value(&content).unwrap(), input);
    }

    #[test]
    fn unknown_part_fields_preserved() {
        let input = json!({
            "parts": [{"executableCode": {"language": "PYTHON", "code": "1"}}]
        });
        let content: Content = serde_json::from_value(input.clone()).unwrap();
        assert!(!content.parts[0].is_empty());
        assert_eq!(serde_json::to_value(&content).unwrap(), input);
    }
}
