use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::content::{Content, Part};
use super::generation::GenerationConfig;

/// Gemini `generateContent` / `streamGenerateContent` request body.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    /// Required conversation turns.
    #[serde(default)]
    pub contents: Vec<Content>,

    /// System-level instruction. Structured like a `Content` without a role.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_system_instruction"
    )]
    pub system_instruction: Option<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,

    /// Tool declarations, raw pass-through.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_settings: Option<Vec<SafetySetting>>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One `safetySettings[]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

impl SafetySetting {
    pub fn block_none(category: &str) -> Self {
        Self {
            category: category.to_string(),
            threshold: "BLOCK_NONE".to_string(),
        }
    }
}

/// Accepts `{parts: [...]}` with or without a role; merges text parts into a
/// single instruction and drops non-text parts. Empty instructions become
/// `None`.
fn deserialize_system_instruction<'de, D>(deserializer: D) -> Result<Option<Content>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let Some(content) = Option::<Content>::deserialize(deserializer)? else {
        return Ok(None);
    };

    let merged = content
        .parts
        .into_iter()
        .filter_map(|part| part.text.filter(|text| !text.trim().is_empty()))
        .collect::<Vec<_>>()
        .join("\n\n");

    Ok((!merged.is_empty()).then(|| Content {
        role: None,
        parts: vec![Part::text(merged)],
        extra: BTreeMap::new(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_request_deserializes() {
        let req: GenerateContentRequest =
            serde_json::from_value(json!({"contents": []})).unwrap();
        assert!(req.contents.is_empty());
        assert!(req.system_instruction.is_none());
    }

    #[test]
    fn system_instruction_role_dropped_and_text_merged() {
        let req: GenerateContentRequest = serde_json::from_value(json!({
            "contents": [],
            "systemInstruction": {
                "role": "user",
                "parts": [{"text": "be"}, {"text": "precise"}]
            }
        }))
        .unwrap();

        let si = req.system_instruction.unwrap();
        assert!(si.role.is_none());
        assert_eq!(si.parts[0].text.as_deref(), Some("be\n\nprecise"));
    }

    #[test]
    fn whitespace_only_system_instruction_becomes_none() {
        let req: GenerateContentRequest = serde_json::from_value(json!({
            "contents": [],
            "systemInstruction": {"parts": [{"text": "  \n"}]}
        }))
        .unwrap();
        assert!(req.system_instruction.is_none());
    }

    #[test]
    fn safety_settings_typed() {
        let req: GenerateContentRequest = serde_json::from_value(json!({
            "contents": [],
            "safetySettings": [
                {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_NONE"}
            ]
        }))
        .unwrap();
        assert_eq!(
            req.safety_settings.unwrap()[0],
            SafetySetting::block_none("HARM_CATEGORY_HARASSMENT")
        );
    }

    #[test]
    fn unknown_top_level_fields_preserved() {
        let input = json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            "cachedContent": "projects/x/cachedContents/y"
        });
        let req: GenerateContentRequest = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(
            req.extra.get("cachedContent"),
            Some(&json!("projects/x/cachedContents/y"))
        );
        assert_eq!(serde_json::to_value(&req).unwrap(), input);
    }
}
