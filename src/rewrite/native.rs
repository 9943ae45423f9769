//! Per-variant normalisation applied to every outbound native request.
//!
//! This is where the proxy earns upstream compatibility: the Antigravity
//! preamble, the permissive safety matrix, thinking configuration, the
//! Claude thought-block placeholder and parameter clamps.

use crate::rewrite::model_name::{
    base_model_name, is_search_model, is_thinking_model, map_claude_model, thinking_budget,
};
use crate::upstream::Variant;
use castor_schema::gemini::{
    Content, GenerateContentRequest, GenerationConfig, Part, SafetySetting, ThinkingConfig,
};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

/// Opaque signature accepted by the upstream thought validator. Contract with
/// the upstream, not a feature; do not generalise.
pub const SKIP_THOUGHT_SIGNATURE: &str = "skip_thought_signature_validator";

const DEFAULT_THINKING_BUDGET: i64 = 1024;

pub const TOP_K_RANGE: (i64, i64) = (1, 64);
pub const MAX_OUTPUT_TOKENS_RANGE: (i64, i64) = (1, 65536);

/// The full permissive safety matrix forced onto every request.
fn block_none_matrix() -> Vec<SafetySetting> {
    [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
        "HARM_CATEGORY_CIVIC_INTEGRITY",
        "HARM_CATEGORY_IMAGE_HARASSMENT",
        "HARM_CATEGORY_IMAGE_HATE_SPEECH",
        "HARM_CATEGORY_IMAGE_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_JAILBREAK",
    ]
    .into_iter()
    .map(SafetySetting::block_none)
    .collect()
}

/// Normalise `request` in place for the given variant and client model name
/// (prefix-stripped, suffixes intact). Returns the upstream model name.
pub fn normalize_request(
    variant: Variant,
    model: &str,
    request: &mut GenerateContentRequest,
    antigravity_preamble: &str,
) -> String {
    let upstream_model = match variant {
        Variant::Antigravity => {
            match normalize_antigravity(model, request, antigravity_preamble) {
                AntigravityOutcome::Image(name) => return name,
                AntigravityOutcome::Text(name) => name,
            }
        }
        Variant::GeminiCli => normalize_geminicli(model, request),
    };

    apply_common(request);
    upstream_model
}

enum AntigravityOutcome {
    /// Image requests skip the common pass entirely.
    Image(String),
    Text(String),
}

fn normalize_antigravity(
    model: &str,
    request: &mut GenerateContentRequest,
    preamble: &str,
) -> AntigravityOutcome {
    // The preamble always leads; the user's system text follows.
    let mut parts = vec![Part::text(preamble)];
    if let Some(existing) = request.system_instruction.take() {
        parts.extend(existing.parts);
    }
    request.system_instruction = Some(Content {
        role: None,
        parts,
        extra: BTreeMap::new(),
    });

    if model.to_lowercase().contains("image") {
        request.generation_config = Some(GenerationConfig {
            candidate_count: Some(1),
            image_config: Some(json!({})),
            ..Default::default()
        });
        request.system_instruction = None;
        request.tools = None;
        request.tool_config = None;
        return AntigravityOutcome::Image("gemini-3-pro-image".to_string());
    }

    let existing_budget = request
        .generation_config
        .as_ref()
        .and_then(|gc| gc.thinking_config.as_ref())
        .and_then(|tc| tc.thinking_budget)
        .unwrap_or(0);

    if is_thinking_model(model) || existing_budget != 0 {
        let gc = request.generation_config.get_or_insert_with(Default::default);
        let tc = gc.thinking_config.get_or_insert_with(ThinkingConfig::default);
        if tc.thinking_budget.is_none() {
            tc.thinking_budget = Some(DEFAULT_THINKING_BUDGET);
        }
        tc.include_thoughts = Some(true);

        if model.to_lowercase().contains("claude") {
            patch_claude_thinking(request);
        }
    }

    let mut stripped = model.to_string();
    for suffix in ["-maxthinking", "-nothinking", "-thinking"] {
        if let Some(rest) = stripped.strip_suffix(suffix) {
            stripped = rest.to_string();
            break;
        }
    }
    let mapped = map_claude_model(&stripped, !model.contains("-nothinking"));
    if mapped != stripped {
        debug!(from = %model, to = %mapped, "model aliased for upstream");
    }

    if let Some(gc) = request.generation_config.as_mut() {
        // Not accepted by this upstream.
        gc.presence_penalty = None;
        gc.frequency_penalty = None;
        gc.stop_sequences = None;
    }

    AntigravityOutcome::Text(mapped)
}

/// Claude conversations must open the last assistant turn with a thought
/// part. Tool-use conversations instead drop thinking entirely; the two
/// accommodations are mutually exclusive.
fn patch_claude_thinking(request: &mut GenerateContentRequest) {
    let has_tool_calls = request.contents.iter().any(Content::has_function_call);

    if has_tool_calls {
        if let Some(gc) = request.generation_config.as_mut() {
            gc.thinking_config = None;
        }
        debug!("tool calls present, thinkingConfig removed");
        return;
    }

    let Some(last_model) = request
        .contents
        .iter_mut()
        .rev()
        .find(|content| content.role.as_deref() == Some("model"))
    else {
        return;
    };

    let already_leads_with_thought = last_model.parts.first().is_some_and(|part| {
        part.thought.is_some() || part.thought_signature.is_some()
    });
    if already_leads_with_thought {
        return;
    }

    let placeholder = Part {
        text: Some("...".to_string()),
        thought_signature: Some(SKIP_THOUGHT_SIGNATURE.to_string()),
        ..Default::default()
    };
    last_model.parts.insert(0, placeholder);
    debug!("thought placeholder injected into last assistant turn");
}

fn normalize_geminicli(model: &str, request: &mut GenerateContentRequest) -> String {
    let existing_budget = request
        .generation_config
        .as_ref()
        .and_then(|gc| gc.thinking_config.as_ref())
        .and_then(|tc| tc.thinking_budget);
    let budget = thinking_budget(model).or(existing_budget);

    if is_thinking_model(model) || budget.is_some_and(|b| b != 0) {
        let gc = request.generation_config.get_or_insert_with(Default::default);
        let tc = gc.thinking_config.get_or_insert_with(ThinkingConfig::default);
        if let Some(budget) = budget {
            tc.thinking_budget = Some(budget);
        }
        tc.include_thoughts = Some(true);
    }

    if is_search_model(model) {
        let tools = request.tools.get_or_insert_with(Vec::new);
        let has_search = tools
            .iter()
            .any(|tool| tool.get("googleSearch").is_some());
        if !has_search {
            tools.push(json!({"googleSearch": {}}));
        }
    }

    base_model_name(model)
}

/// Variant-independent pass: safety matrix, parameter clamps, parts cleanup.
fn apply_common(request: &mut GenerateContentRequest) {
    request.safety_settings = Some(block_none_matrix());

    if let Some(gc) = request.generation_config.as_mut() {
        if let Some(top_k) = gc.top_k {
            gc.top_k = Some(top_k.clamp(TOP_K_RANGE.0, TOP_K_RANGE.1));
        }
        if let Some(max_tokens) = gc.max_output_tokens {
            gc.max_output_tokens = Some(
                max_tokens.clamp(MAX_OUTPUT_TOKENS_RANGE.0, MAX_OUTPUT_TOKENS_RANGE.1),
            );
        }
    }

    for content in &mut request.contents {
        for part in &mut content.parts {
            if let Some(text) = part.text.as_mut() {
                let trimmed = text.trim_end();
                if trimmed.len() != text.len() {
                    *text = trimmed.to_string();
                }
            }
        }
        content.parts.retain(|part| !part.is_empty());
    }
    request.contents.retain(|content| !content.parts.is_empty());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn req(value: Value) -> GenerateContentRequest {
        serde_json::from_value(value).expect("request json must parse")
    }

    #[test]
    fn preamble_leads_system_instruction() {
        let mut request = req(json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            "systemInstruction": {"parts": [{"text": "user rules"}]}
        }));
        normalize_request(Variant::Antigravity, "gemini-3-flash", &mut request, "PREAMBLE");

        let si = request.system_instruction.unwrap();
        assert_eq!(si.parts[0].text.as_deref(), Some("PREAMBLE"));
        assert_eq!(si.parts[1].text.as_deref(), Some("user rules"));
    }

    #[test]
    fn safety_matrix_forced() {
        let mut request = req(json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            "safetySettings": [{"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_ALL"}]
        }));
        normalize_request(Variant::GeminiCli, "gemini-2.5-flash", &mut request, "");

        let settings = request.safety_settings.unwrap();
        assert_eq!(settings.len(), 9);
        assert!(settings.iter().all(|s| s.threshold == "BLOCK_NONE"));
    }

    #[test]
    fn clamps_apply_at_bounds() {
        let mut low = req(json!({
            "contents": [{"role": "user", "parts": [{"text": "x"}]}],
            "generationConfig": {"topK": 0, "maxOutputTokens": 0}
        }));
        normalize_request(Variant::GeminiCli, "gemini-2.5-flash", &mut low, "");
        let gc = low.generation_config.unwrap();
        assert_eq!(gc.top_k, Some(1));
        assert_eq!(gc.max_output_tokens, Some(1));

        let mut high = req(json!({
            "contents": [{"role": "user", "parts": [{"text": "x"}]}],
            "generationConfig": {"topK": 100, "maxOutputTokens": 100000}
        }));
        normalize_request(Variant::GeminiCli, "gemini-2.5-flash", &mut high, "");
        let gc = high.generation_config.unwrap();
        assert_eq!(gc.top_k, Some(64));
        assert_eq!(gc.max_output_tokens, Some(65536));
    }

    #[test]
    fn image_model_rewrites_and_skips_common_pass() {
        let mut request = req(json!({
            "contents": [{"role": "user", "parts": [{"text": "a cat"}]}],
            "systemInstruction": {"parts": [{"text": "sys"}]},
            "tools": [{"googleSearch": {}}]
        }));
        let model = normalize_request(
            Variant::Antigravity,
            "gemini-3-pro-image",
            &mut request,
            "P",
        );

        assert_eq!(model, "gemini-3-pro-image");
        assert!(request.system_instruction.is_none());
        assert!(request.tools.is_none());
        assert!(request.safety_settings.is_none());
        let gc = request.generation_config.unwrap();
        assert_eq!(gc.candidate_count, Some(1));
        assert!(gc.image_config.is_some());
    }

    #[test]
    fn thinking_defaults_on_antigravity() {
        let mut request = req(json!({
            "contents": [{"role": "user", "parts": [{"text": "x"}]}]
        }));
        normalize_request(Variant::Antigravity, "gemini-3-pro-preview", &mut request, "P");

        let tc = request
            .generation_config
            .unwrap()
            .thinking_config
            .unwrap();
        assert_eq!(tc.thinking_budget, Some(1024));
        assert_eq!(tc.include_thoughts, Some(true));
    }

    #[test]
    fn claude_placeholder_injected_without_tools() {
        let mut request = req(json!({
            "contents": [
                {"role": "user", "parts": [{"text": "q"}]},
                {"role": "model", "parts": [{"text": "a"}]},
                {"role": "user", "parts": [{"text": "q2"}]}
            ]
        }));
        normalize_request(Variant::Antigravity, "claude-sonnet-4-5", &mut request, "P");

        let model_turn = &request.contents[1];
        assert_eq!(
            model_turn.parts[0].thought_signature.as_deref(),
            Some(SKIP_THOUGHT_SIGNATURE)
        );
        assert_eq!(model_turn.parts[1].text.as_deref(), Some("a"));
    }

    #[test]
    fn claude_with_tool_calls_drops_thinking() {
        let mut request = req(json!({
            "contents": [
                {"role": "user", "parts": [{"text": "q"}]},
                {"role": "model", "parts": [{"functionCall": {"name": "f", "args": {}}}]}
            ],
            "generationConfig": {"thinkingConfig": {"thinkingBudget": 2048}}
        }));
        normalize_request(Variant::Antigravity, "claude-sonnet-4-5", &mut request, "P");

        assert!(request.generation_config.unwrap().thinking_config.is_none());
        // No placeholder injected either.
        assert!(request.contents[1].parts[0].thought_signature.is_none());
    }

    #[test]
    fn existing_thought_lead_is_left_alone() {
        let mut request = req(json!({
            "contents": [
                {"role": "model", "parts": [
                    {"text": "prior thought", "thought": true},
                    {"text": "a"}
                ]}
            ]
        }));
        normalize_request(Variant::Antigravity, "claude-opus-4-5", &mut request, "P");
        assert_eq!(request.contents[0].parts.len(), 2);
        assert!(request.contents[0].parts[0].thought_signature.is_none());
    }

    #[test]
    fn search_suffix_appends_google_search_once() {
        let mut request = req(json!({
            "contents": [{"role": "user", "parts": [{"text": "x"}]}],
            "tools": [{"googleSearch": {}}]
        }));
        let model = normalize_request(
            Variant::GeminiCli,
            "gemini-2.5-flash-search",
            &mut request,
            "",
        );
        assert_eq!(model, "gemini-2.5-flash");
        assert_eq!(request.tools.unwrap().len(), 1);

        let mut request = req(json!({
            "contents": [{"role": "user", "parts": [{"text": "x"}]}]
        }));
        normalize_request(Variant::GeminiCli, "gemini-2.5-flash-search", &mut request, "");
        assert_eq!(request.tools.unwrap().len(), 1);
    }

    #[test]
    fn thinking_suffixes_stripped_before_dispatch() {
        let mut request = req(json!({
            "contents": [{"role": "user", "parts": [{"text": "x"}]}]
        }));
        let model = normalize_request(
            Variant::Antigravity,
            "gemini-3-flash-maxthinking",
            &mut request,
            "P",
        );
        assert_eq!(model, "gemini-3-flash");

        let mut request = req(json!({
            "contents": [{"role": "user", "parts": [{"text": "x"}]}]
        }));
        let model = normalize_request(
            Variant::Antigravity,
            "claude-opus-4-5-thinking",
            &mut request,
            "P",
        );
        assert_eq!(model, "claude-opus-4-5-thinking");
    }

    #[test]
    fn penalties_removed_for_antigravity_only() {
        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": "x"}]}],
            "generationConfig": {
                "presencePenalty": 0.5,
                "frequencyPenalty": 0.5,
                "stopSequences": ["STOP"]
            }
        });

        let mut agy = req(body.clone());
        normalize_request(Variant::Antigravity, "gemini-3-flash", &mut agy, "P");
        let gc = agy.generation_config.unwrap();
        assert!(gc.presence_penalty.is_none());
        assert!(gc.stop_sequences.is_none());

        let mut gcli = req(body);
        normalize_request(Variant::GeminiCli, "gemini-2.5-flash", &mut gcli, "");
        let gc = gcli.generation_config.unwrap();
        assert_eq!(gc.presence_penalty, Some(0.5));
        assert_eq!(gc.stop_sequences.as_deref(), Some(&["STOP".to_string()][..]));
    }

    #[test]
    fn empty_parts_are_cleaned() {
        let mut request = req(json!({
            "contents": [
                {"role": "user", "parts": [{"text": "keep  "}, {"text": ""}]},
                {"role": "model", "parts": [{"text": ""}]}
            ]
        }));
        normalize_request(Variant::GeminiCli, "gemini-2.5-flash", &mut request, "");
        assert_eq!(request.contents.len(), 1);
        assert_eq!(request.contents[0].parts.len(), 1);
        assert_eq!(request.contents[0].parts[0].text.as_deref(), Some("keep"));
    }

    #[test]
    fn nothinking_suffix_sets_minimal_budget() {
        let mut request = req(json!({
            "contents": [{"role": "user", "parts": [{"text": "x"}]}]
        }));
        let model = normalize_request(
            Variant::GeminiCli,
            "gemini-2.5-pro-nothinking",
            &mut request,
            "",
        );
        assert_eq!(model, "gemini-2.5-pro");
        let tc = request.generation_config.unwrap().thinking_config.unwrap();
        assert_eq!(tc.thinking_budget, Some(128));
        assert_eq!(tc.include_thoughts, Some(true));

        // Thought visibility stays on regardless of the base model family.
        let mut request = req(json!({
            "contents": [{"role": "user", "parts": [{"text": "x"}]}]
        }));
        let model = normalize_request(
            Variant::GeminiCli,
            "gemini-2.5-flash-nothinking",
            &mut request,
            "",
        );
        assert_eq!(model, "gemini-2.5-flash");
        let tc = request.generation_config.unwrap().thinking_config.unwrap();
        assert_eq!(tc.thinking_budget, Some(128));
        assert_eq!(tc.include_thoughts, Some(true));
    }
}
