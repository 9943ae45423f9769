use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// `generationConfig` object.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,

    /// Config for image generation, raw pass-through.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_config: Option<Value>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// `generationConfig.thinkingConfig` object.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_thoughts: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_fields_deserialize_camel_case() {
        let gc: GenerationConfig = serde_json::from_value(json!({
            "temperature": 0.7,
            "topP": 0.9,
            "topK": 40,
            "maxOutputTokens": 1024,
            "stopSequences": ["END"],
            "thinkingConfig": {"includeThoughts": true, "thinkingBudget": 2048}
        }))
        .unwrap();

        assert_eq!(gc.temperature, Some(0.7));
        assert_eq!(gc.top_k, Some(40));
        assert_eq!(gc.max_output_tokens, Some(1024));
        assert_eq!(gc.stop_sequences.as_deref(), Some(&["END".to_string()][..]));
        assert_eq!(
            gc.thinking_config,
            Some(ThinkingConfig {
                include_thoughts: Some(true),
                thinking_budget: Some(2048),
            })
        );
    }

    #[test]
    fn unknown_fields_preserved_in_extra() {
        let input = json!({
            "responseMimeType": "text/plain",
            "responseModalities": ["TEXT"]
        });
        let gc: GenerationConfig = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(gc.extra.get("responseMimeType"), Some(&json!("text/plain")));
        assert_eq!(serde_json::to_value(&gc).unwrap(), input);
    }
}
