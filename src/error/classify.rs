//! Upstream error classification: map an HTTP status plus raw error text to a
//! stable `(kind, code)` pair used for usage-log records and message rules.

use regex::Regex;
use std::sync::LazyLock;

/// Coarse error taxonomy stored on usage-log rows and matched by
/// admin-configured message rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RateLimit,
    QuotaExhausted,
    AuthError,
    NotFound,
    Upstream5xx,
    NetworkError,
    Timeout,
    ConfigError,
    TokenError,
    NoCredential,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::RateLimit => "RATE_LIMIT",
            ErrorKind::QuotaExhausted => "QUOTA_EXHAUSTED",
            ErrorKind::AuthError => "AUTH_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Upstream5xx => "UPSTREAM_5XX",
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ConfigError => "CONFIG_ERROR",
            ErrorKind::TokenError => "TOKEN_ERROR",
            ErrorKind::NoCredential => "NO_CREDENTIAL",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static STATUS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"API Error (\d{3})",
        r#""code":\s*(\d{3})"#,
        r"status_code[=:]\s*(\d{3})",
        r"HTTP (\d{3})",
        r"Error (\d{3}):",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("status pattern must compile"))
    .collect()
});

/// Google RPC status tokens occasionally embedded in upstream error bodies;
/// surfaced as the `code` half of a classification when present.
static RPC_STATUS_TOKENS: &[&str] = &[
    "RESOURCE_EXHAUSTED",
    "PERMISSION_DENIED",
    "UNAUTHENTICATED",
    "NOT_FOUND",
    "DEADLINE_EXCEEDED",
    "UNAVAILABLE",
    "INVALID_ARGUMENT",
    "INTERNAL",
];

/// Substrings marking transient transport failures. Errors matching these are
/// retried with another credential even when no HTTP status is available.
static TRANSIENT_MARKERS: &[&str] = &[
    "connection reset",
    "connection closed",
    "connection refused",
    "broken pipe",
    "error sending request",
    "timed out",
    "timeout",
];

/// Scan the fixed pattern set and return the first captured 4xx/5xx status,
/// or `default` when nothing matches.
pub fn extract_status(text: &str, default: u16) -> u16 {
    for pattern in STATUS_PATTERNS.iter() {
        if let Some(cap) = pattern.captures(text)
            && let Some(m) = cap.get(1)
            && let Ok(code) = m.as_str().parse::<u16>()
            && (400..600).contains(&code)
        {
            return code;
        }
    }
    default
}

/// Map `(status, text)` to `(kind, code)`. Deterministic: classifying the
/// same inputs twice yields the same pair.
pub fn classify(status: u16, text: &str) -> (ErrorKind, String) {
    let lower = text.to_lowercase();

    let kind = match status {
        429 => ErrorKind::RateLimit,
        401 | 403 => ErrorKind::AuthError,
        404 => ErrorKind::NotFound,
        500..=599 => ErrorKind::Upstream5xx,
        _ if lower.contains("timed out") || lower.contains("timeout") => ErrorKind::Timeout,
        _ if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) => ErrorKind::NetworkError,
        _ => ErrorKind::Unknown,
    };

    let code = RPC_STATUS_TOKENS
        .iter()
        .find(|token| text.contains(*token))
        .map_or_else(|| format!("HTTP_{status}"), |token| (*token).to_string());

    (kind, code)
}

/// True when the raw error text matches the transient-transport whitelist.
pub fn is_transient_error(text: &str) -> bool {
    let lower = text.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_status_scans_patterns_in_order() {
        assert_eq!(extract_status("API Error 403: denied", 500), 403);
        assert_eq!(extract_status(r#"{"code": 429, "msg": "x"}"#, 500), 429);
        assert_eq!(extract_status("status_code=502 from upstream", 500), 502);
        assert_eq!(extract_status("got HTTP 503", 500), 503);
        assert_eq!(extract_status("Error 404: not found", 500), 404);
    }

    #[test]
    fn extract_status_ignores_non_http_codes() {
        assert_eq!(extract_status("API Error 200", 500), 500);
        assert_eq!(extract_status("nothing here", 418), 418);
    }

    #[test]
    fn classify_maps_statuses() {
        assert_eq!(classify(429, "").0, ErrorKind::RateLimit);
        assert_eq!(classify(401, "").0, ErrorKind::AuthError);
        assert_eq!(classify(403, "").0, ErrorKind::AuthError);
        assert_eq!(classify(404, "").0, ErrorKind::NotFound);
        assert_eq!(classify(500, "").0, ErrorKind::Upstream5xx);
        assert_eq!(classify(503, "").0, ErrorKind::Upstream5xx);
    }

    #[test]
    fn classify_recognises_transport_failures() {
        assert_eq!(classify(0, "connection reset by peer").0, ErrorKind::NetworkError);
        assert_eq!(classify(0, "operation timed out").0, ErrorKind::Timeout);
    }

    #[test]
    fn classify_surfaces_rpc_token_as_code() {
        let (kind, code) = classify(429, r#"{"status": "RESOURCE_EXHAUSTED"}"#);
        assert_eq!(kind, ErrorKind::RateLimit);
        assert_eq!(code, "RESOURCE_EXHAUSTED");
    }

    #[test]
    fn classify_is_stable_over_extracted_status() {
        let text = r#"API Error 429: {"retryDelay": "30s"}"#;
        let first = classify(extract_status(text, 500), text);
        let second = classify(extract_status(text, 500), text);
        assert_eq!(first, second);
    }
}
