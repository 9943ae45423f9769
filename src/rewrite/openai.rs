//! OpenAI chat protocol ⇄ native contents translation.

use crate::service::ImageStorage;
use castor_schema::gemini::{
    Content, FileData, GeminiResponseBody, GenerateContentRequest, GenerationConfig, InlineData,
    Part,
};
use castor_schema::openai::{
    AssistantMessage, ChatChoice, ChatDelta, ChatMessage, ChatRequest, ChatResponse, ChatUsage,
    MessageContent, MessagePart,
};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Response id used on the OpenAI surface; the upstream does not give us one.
pub const CHAT_COMPLETION_ID: &str = "chatcmpl-castor";

/// Convert an OpenAI chat request into a native generate-content body.
/// System messages merge into `systemInstruction`; user/assistant turns
/// become `user`/`model` contents.
pub fn chat_to_native(req: &ChatRequest) -> GenerateContentRequest {
    let mut system_texts: Vec<String> = Vec::new();
    let mut contents: Vec<Content> = Vec::new();

    for message in &req.messages {
        if message.role == "system" {
            let text = message.content.joined_text();
            if !text.is_empty() {
                system_texts.push(text);
            }
            continue;
        }

        let role = if message.role == "user" { "user" } else { "model" };
        let parts = message_parts(message);
        contents.push(Content {
            role: Some(role.to_string()),
            parts,
            extra: BTreeMap::new(),
        });
    }

    let system_instruction = (!system_texts.is_empty()).then(|| Content {
        role: None,
        parts: vec![Part::text(system_texts.join("\n\n"))],
        extra: BTreeMap::new(),
    });

    let generation_config = generation_config(req);

    GenerateContentRequest {
        contents,
        system_instruction,
        generation_config,
        tools: None,
        tool_config: None,
        safety_settings: None,
        extra: BTreeMap::new(),
    }
}

fn message_parts(message: &ChatMessage) -> Vec<Part> {
    let mut parts = match &message.content {
        MessageContent::Text(text) => vec![Part::text(text.clone())],
        MessageContent::Parts(items) => items.iter().filter_map(item_to_part).collect(),
    };
    if parts.is_empty() {
        parts.push(Part::text(""));
    }
    parts
}

fn item_to_part(item: &MessagePart) -> Option<Part> {
    match item.kind.as_deref() {
        Some("image_url") => {
            let url = item.image_url.as_ref().map(|i| i.url.as_str())?;
            Some(image_url_to_part(url))
        }
        _ => item.text.as_ref().map(|text| Part::text(text.clone())),
    }
}

/// `data:` URLs decompose into inline bytes; anything else becomes a file
/// reference the upstream fetches itself.
fn image_url_to_part(url: &str) -> Part {
    if let Some(rest) = url.strip_prefix("data:")
        && let Some((header, payload)) = rest.split_once(',')
    {
        let mime_type = header.split(';').next().unwrap_or("image/png").to_string();
        return Part {
            inline_data: Some(InlineData {
                mime_type,
                data: payload.to_string(),
            }),
            ..Default::default()
        };
    }

    Part {
        file_data: Some(FileData {
            mime_type: "image/jpeg".to_string(),
            file_uri: url.to_string(),
        }),
        ..Default::default()
    }
}

fn generation_config(req: &ChatRequest) -> Option<GenerationConfig> {
    if req.temperature.is_none()
        && req.top_p.is_none()
        && req.top_k.is_none()
        && req.max_tokens.is_none()
    {
        return None;
    }
    Some(GenerationConfig {
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        max_output_tokens: req.max_tokens,
        ..Default::default()
    })
}

/// Text and reasoning extracted from one native body, with inline images
/// persisted and replaced by markdown links.
#[derive(Debug, Default, Clone)]
pub struct ExtractedContent {
    pub content: String,
    pub reasoning: String,
    pub finish_reason: Option<String>,
}

pub async fn extract_content(
    body: &GeminiResponseBody,
    images: Option<&ImageStorage>,
) -> ExtractedContent {
    let mut out = ExtractedContent::default();

    let Some(candidate) = body.candidates.first() else {
        return out;
    };
    out.finish_reason = candidate.finish_reason.clone();

    let Some(content) = &candidate.content else {
        return out;
    };
    for part in &content.parts {
        if let Some(text) = &part.text {
            if part.thought == Some(true) {
                out.reasoning.push_str(text);
            } else {
                out.content.push_str(text);
            }
            continue;
        }
        if let Some(inline) = &part.inline_data {
            match images {
                Some(storage) => {
                    if let Some(url) = storage.save_base64(&inline.mime_type, &inline.data).await {
                        out.content.push_str(&format!("\n![image]({url})\n"));
                    }
                }
                None => warn!("dropping inline image part (no storage configured)"),
            }
        }
    }
    out
}

fn usage_from_metadata(metadata: Option<&Value>) -> ChatUsage {
    let get = |key: &str| {
        metadata
            .and_then(|m| m.get(key))
            .and_then(Value::as_i64)
            .unwrap_or(0)
    };
    ChatUsage {
        prompt_tokens: get("promptTokenCount"),
        completion_tokens: get("candidatesTokenCount"),
        total_tokens: get("totalTokenCount"),
    }
}

/// Build the non-streaming OpenAI response for a native body. `model` echoes
/// the client's original model string.
pub async fn native_to_chat(
    body: &GeminiResponseBody,
    model: &str,
    images: Option<&ImageStorage>,
) -> ChatResponse {
    let extracted = extract_content(body, images).await;

    let message = AssistantMessage {
        role: "assistant".to_string(),
        content: extracted.content,
        reasoning_content: (!extracted.reasoning.is_empty()).then_some(extracted.reasoning),
    };

    ChatResponse {
        id: CHAT_COMPLETION_ID.to_string(),
        object: "chat.completion".to_string(),
        created: 0,
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message,
            finish_reason: Some("stop".to_string()),
        }],
        usage: usage_from_metadata(body.usage_metadata.as_ref()),
    }
}

/// Delta for one streaming frame; `None` when the frame carries nothing the
/// OpenAI surface can express.
pub async fn native_to_delta(
    body: &GeminiResponseBody,
    images: Option<&ImageStorage>,
) -> Option<ChatDelta> {
    let extracted = extract_content(body, images).await;
    let delta = ChatDelta {
        role: None,
        content: (!extracted.content.is_empty()).then_some(extracted.content),
        reasoning_content: (!extracted.reasoning.is_empty()).then_some(extracted.reasoning),
    };
    (!delta.is_empty()).then_some(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: Value) -> ChatRequest {
        serde_json::from_value(value).expect("request json must parse")
    }

    #[test]
    fn system_messages_merge_into_instruction() {
        let req = request(json!({
            "model": "gcli-gemini-2.5-flash",
            "messages": [
                {"role": "system", "content": "rule one"},
                {"role": "system", "content": "rule two"},
                {"role": "user", "content": "hi"}
            ]
        }));
        let native = chat_to_native(&req);
        assert_eq!(
            native.system_instruction.unwrap().parts[0].text.as_deref(),
            Some("rule one\n\nrule two")
        );
        assert_eq!(native.contents.len(), 1);
        assert_eq!(native.contents[0].role.as_deref(), Some("user"));
    }

    #[test]
    fn assistant_role_becomes_model() {
        let req = request(json!({
            "model": "m",
            "messages": [
                {"role": "user", "content": "q"},
                {"role": "assistant", "content": "a"},
                {"role": "user", "content": "q2"}
            ]
        }));
        let native = chat_to_native(&req);
        let roles: Vec<_> = native
            .contents
            .iter()
            .map(|c| c.role.as_deref().unwrap())
            .collect();
        assert_eq!(roles, ["user", "model", "user"]);
    }

    #[test]
    fn data_url_becomes_inline_data() {
        let part = image_url_to_part("data:image/png;base64,aGk=");
        let inline = part.inline_data.unwrap();
        assert_eq!(inline.mime_type, "image/png");
        assert_eq!(inline.data, "aGk=");
    }

    #[test]
    fn http_url_becomes_file_data() {
        let part = image_url_to_part("https://example.com/cat.jpg");
        let file = part.file_data.unwrap();
        assert_eq!(file.file_uri, "https://example.com/cat.jpg");
        assert_eq!(file.mime_type, "image/jpeg");
    }

    #[test]
    fn params_map_to_generation_config() {
        let req = request(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "x"}],
            "temperature": 0.5,
            "top_p": 0.8,
            "top_k": 20,
            "max_tokens": 2048
        }));
        let gc = chat_to_native(&req).generation_config.unwrap();
        assert_eq!(gc.temperature, Some(0.5));
        assert_eq!(gc.top_p, Some(0.8));
        assert_eq!(gc.top_k, Some(20));
        assert_eq!(gc.max_output_tokens, Some(2048));
    }

    #[tokio::test]
    async fn thought_parts_split_into_reasoning() {
        let body: GeminiResponseBody = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "thinking...", "thought": true},
                    {"text": "answer"}
                ]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();

        let resp = native_to_chat(&body, "gcli-gemini-2.5-pro", None).await;
        let choice = &resp.choices[0];
        assert_eq!(choice.message.content, "answer");
        assert_eq!(choice.message.reasoning_content.as_deref(), Some("thinking..."));
    }

    #[tokio::test]
    async fn empty_frame_yields_no_delta() {
        let body = GeminiResponseBody::default();
        assert!(native_to_delta(&body, None).await.is_none());
    }

    #[tokio::test]
    async fn usage_metadata_maps() {
        let body: GeminiResponseBody = serde_json::from_value(json!({
            "candidates": [],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15}
        }))
        .unwrap();
        let resp = native_to_chat(&body, "m", None).await;
        assert_eq!(resp.usage.prompt_tokens, 10);
        assert_eq!(resp.usage.completion_tokens, 5);
        assert_eq!(resp.usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn roundtrip_preserves_order_and_text() {
        let req = request(json!({
            "model": "gcli-gemini-2.5-flash",
            "messages": [
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "second"},
                {"role": "user", "content": "third"}
            ]
        }));
        let native = chat_to_native(&req);
        let texts: Vec<_> = native
            .contents
            .iter()
            .map(|c| c.parts[0].text.as_deref().unwrap())
            .collect();
        assert_eq!(texts, ["first", "second", "third"]);
    }
}
