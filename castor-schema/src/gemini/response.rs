use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::content::Content;

/// Gemini v1beta response body, used both for full responses and for the
/// per-frame payloads of `streamGenerateContent`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponseBody {
    #[serde(default)]
    pub candidates: Vec<Candidate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_feedback: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_roundtrips() {
        let input = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "pong"}]},
                "finishReason": "STOP",
                "index": 0
            }],
            "usageMetadata": {"promptTokenCount": 3},
            "modelVersion": "gemini-2.5-flash"
        });
        let body: GeminiResponseBody = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(body.candidates.len(), 1);
        assert_eq!(body.candidates[0].finish_reason.as_deref(), Some("STOP"));
        assert_eq!(serde_json::to_value(&body).unwrap(), input);
    }
}
