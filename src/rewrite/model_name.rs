//! Client-facing model-name namespace.
//!
//! `agy-` routes to Antigravity, `gcli-` (or no prefix) to Gemini-CLI.
//! Streaming prefixes select delivery modes and are stripped before upstream
//! dispatch; thinking/search suffixes configure the rewriter.

use crate::upstream::Variant;

/// Prefix requesting emulated streaming over a non-streaming upstream call.
pub const FAKE_STREAM_PREFIX: &str = "fake-stream/";

/// Prefix requesting anti-truncation streaming; stripped and served as plain
/// streaming.
pub const ROBUST_STREAM_PREFIX: &str = "robust-stream/";

const THINKING_SUFFIXES: &[&str] = &["-maxthinking", "-nothinking", "-thinking"];

/// Routing decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoute {
    pub variant: Variant,
    pub fake_stream: bool,
    /// Model name with variant and streaming prefixes stripped; thinking and
    /// search suffixes remain for the rewriter.
    pub model: String,
}

/// Parse the raw client model string. Prefix order is lenient: streaming
/// prefixes may appear before or after the variant prefix. The Antigravity
/// upstream does not support fake streaming; its routes strip the prefix as
/// a no-op.
pub fn parse_route(raw: &str) -> ModelRoute {
    let mut rest = raw.trim();
    let mut fake_stream = false;
    let mut variant: Option<Variant> = None;

    loop {
        if let Some(stripped) = rest.strip_prefix(FAKE_STREAM_PREFIX) {
            fake_stream = true;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix(ROBUST_STREAM_PREFIX) {
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix(Variant::Antigravity.model_prefix()) {
            variant = variant.or(Some(Variant::Antigravity));
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix(Variant::GeminiCli.model_prefix()) {
            variant = variant.or(Some(Variant::GeminiCli));
            rest = stripped;
        } else {
            break;
        }
    }

    let variant = variant.unwrap_or(Variant::GeminiCli);
    ModelRoute {
        variant,
        fake_stream: fake_stream && variant != Variant::Antigravity,
        model: rest.to_string(),
    }
}

/// Strip thinking/search suffixes until none remain.
pub fn base_model_name(model: &str) -> String {
    let mut result = model;
    let mut changed = true;
    while changed {
        changed = false;
        for suffix in THINKING_SUFFIXES.iter().chain(&["-search"]) {
            if let Some(stripped) = result.strip_suffix(suffix) {
                result = stripped;
                changed = true;
            }
        }
    }
    result.to_string()
}

/// Thinking budget derived from the name suffix. `None` means "leave
/// whatever the request carries, defaulting later". Thought visibility is
/// not suffix-controlled; thinking requests always include thoughts.
pub fn thinking_budget(model: &str) -> Option<i64> {
    if model.contains("-nothinking") {
        Some(128)
    } else if model.contains("-maxthinking") {
        let base = base_model_name(model);
        if base.contains("flash") {
            Some(24576)
        } else {
            Some(32768)
        }
    } else {
        None
    }
}

pub fn is_search_model(model: &str) -> bool {
    model.contains("-search")
}

/// Models that run with a thinking configuration.
pub fn is_thinking_model(model: &str) -> bool {
    let lower = model.to_lowercase();
    lower.contains("think") || lower.contains("pro") || lower.contains("claude")
}

/// Canonical Antigravity names for Claude-family requests. Thinking intent
/// survives the rename.
pub fn map_claude_model(model: &str, thinking: bool) -> String {
    let lower = model.to_lowercase();
    let mapped = if lower.contains("opus") {
        "claude-opus-4-5"
    } else if lower.contains("sonnet") {
        "claude-sonnet-4-5"
    } else if lower.contains("haiku") {
        return "gemini-2.5-flash".to_string();
    } else if lower.contains("claude") {
        "claude-sonnet-4-5"
    } else {
        return model.to_string();
    };

    if thinking {
        format!("{mapped}-thinking")
    } else {
        mapped.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprefixed_goes_to_geminicli() {
        let route = parse_route("gemini-2.5-flash");
        assert_eq!(route.variant, Variant::GeminiCli);
        assert!(!route.fake_stream);
        assert_eq!(route.model, "gemini-2.5-flash");
    }

    #[test]
    fn variant_prefixes_route_and_strip() {
        assert_eq!(
            parse_route("agy-claude-sonnet-4-5").variant,
            Variant::Antigravity
        );
        assert_eq!(parse_route("gcli-gemini-2.5-pro").variant, Variant::GeminiCli);
        assert_eq!(parse_route("gcli-gemini-2.5-pro").model, "gemini-2.5-pro");
    }

    #[test]
    fn fake_stream_prefix_in_either_position() {
        let outer = parse_route("fake-stream/gcli-gemini-2.5-pro");
        assert!(outer.fake_stream);
        assert_eq!(outer.variant, Variant::GeminiCli);
        assert_eq!(outer.model, "gemini-2.5-pro");

        let inner = parse_route("gcli-fake-stream/gemini-2.5-pro");
        assert!(inner.fake_stream);
        assert_eq!(inner.variant, Variant::GeminiCli);
        assert_eq!(inner.model, "gemini-2.5-pro");
    }

    #[test]
    fn antigravity_never_fake_streams() {
        // The prefix still strips, but the mode stays off for this upstream.
        for raw in ["agy-fake-stream/gemini-3-flash", "fake-stream/agy-gemini-3-flash"] {
            let route = parse_route(raw);
            assert_eq!(route.variant, Variant::Antigravity);
            assert!(!route.fake_stream, "{raw} must not select fake streaming");
            assert_eq!(route.model, "gemini-3-flash");
        }
    }

    #[test]
    fn robust_stream_prefix_is_stripped_without_mode_change() {
        let route = parse_route("robust-stream/gemini-2.5-flash");
        assert!(!route.fake_stream);
        assert_eq!(route.model, "gemini-2.5-flash");
    }

    #[test]
    fn suffix_stripping_loops() {
        assert_eq!(base_model_name("gemini-2.5-pro-maxthinking"), "gemini-2.5-pro");
        assert_eq!(base_model_name("gemini-2.5-flash-search"), "gemini-2.5-flash");
        assert_eq!(
            base_model_name("gemini-2.5-flash-search-nothinking"),
            "gemini-2.5-flash"
        );
        assert_eq!(base_model_name("gemini-2.5-pro"), "gemini-2.5-pro");
    }

    #[test]
    fn thinking_budget_per_suffix() {
        assert_eq!(thinking_budget("gemini-2.5-pro-nothinking"), Some(128));
        assert_eq!(thinking_budget("gemini-2.5-flash-nothinking"), Some(128));
        assert_eq!(thinking_budget("gemini-2.5-flash-maxthinking"), Some(24576));
        assert_eq!(thinking_budget("gemini-2.5-pro-maxthinking"), Some(32768));
        assert_eq!(thinking_budget("gemini-2.5-pro"), None);
    }

    #[test]
    fn claude_aliases() {
        assert_eq!(map_claude_model("claude-opus-4-5", true), "claude-opus-4-5-thinking");
        assert_eq!(map_claude_model("claude-sonnet-4.5", false), "claude-sonnet-4-5");
        assert_eq!(map_claude_model("claude-haiku-x", true), "gemini-2.5-flash");
        assert_eq!(map_claude_model("claude-next", true), "claude-sonnet-4-5-thinking");
        assert_eq!(map_claude_model("gemini-3-flash", true), "gemini-3-flash");
    }

    #[test]
    fn thinking_model_detection() {
        assert!(is_thinking_model("gemini-2.5-pro"));
        assert!(is_thinking_model("gemini-2.5-flash-thinking"));
        assert!(is_thinking_model("claude-sonnet-4-5"));
        assert!(!is_thinking_model("gemini-2.5-flash"));
    }
}
