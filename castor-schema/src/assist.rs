use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::gemini::{Candidate, GeminiResponseBody, GenerateContentRequest};

#[derive(Debug, Clone)]
pub struct AssistEnvelopeMeta {
    pub model: String,
    pub project: String,
}

impl AssistEnvelopeMeta {
    /// Wrap a typed generate-content body in the code-assist envelope.
    pub fn into_envelope(self, request: GenerateContentRequest) -> AssistEnvelope {
        AssistEnvelope {
            model: self.model,
            project: self.project,
            request,
        }
    }
}

/// Code-assist upstream request envelope. Both upstream variants accept the
/// same `{model, project, request}` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistEnvelope {
    pub model: String,
    pub project: String,
    pub request: GenerateContentRequest,
}

/// Code-assist response wrapper. The upstream nests the v1beta body under
/// `response`; some error frames omit it, hence the default.
#[derive(Debug, Clone, Deserialize)]
pub struct AssistResponseBody {
    #[serde(default)]
    pub response: AssistResponseObject,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AssistResponseObject {
    #[serde(default)]
    pub candidates: Vec<Candidate>,

    pub prompt_feedback: Option<Value>,

    pub usage_metadata: Option<Value>,

    pub model_version: Option<String>,

    pub response_id: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl From<AssistResponseBody> for GeminiResponseBody {
    fn from(body: AssistResponseBody) -> Self {
        let inner = body.response;
        GeminiResponseBody {
            candidates: inner.candidates,
            prompt_feedback: inner.prompt_feedback,
            usage_metadata: inner.usage_metadata,
            model_version: inner.model_version,
            response_id: inner.response_id,
            extra: inner.extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_roundtrips() {
        let input = json!({
            "model": "gemini-2.5-pro",
            "project": "project-1",
            "request": {
                "contents": [{"role": "user", "parts": [{"text": "ping"}]}]
            }
        });
        let envelope: AssistEnvelope = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(serde_json::to_value(&envelope).unwrap(), input);
    }

    #[test]
    fn response_unwraps_to_v1beta_body() {
        let body: AssistResponseBody = serde_json::from_value(json!({
            "response": {
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "pong"}]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"totalTokenCount": 5}
            }
        }))
        .unwrap();

        let v1beta: GeminiResponseBody = body.into();
        assert_eq!(v1beta.candidates.len(), 1);
        assert!(v1beta.usage_metadata.is_some());
    }

    #[test]
    fn missing_response_defaults_to_empty() {
        let body: AssistResponseBody = serde_json::from_value(json!({})).unwrap();
        let v1beta: GeminiResponseBody = body.into();
        assert!(v1beta.candidates.is_empty());
    }
}
