//! Redaction of secret-looking values.
//!
//! Error bodies returned by external APIs can echo request payloads, including tokens and
//! secret values. Everything that ends up in a log line, a progress event, or a session
//! error passes through [`redact_sensitive`] first.

use once_cell::sync::Lazy;
use regex::Regex;

const REPLACEMENT: &str = "[REDACTED]";

/// Redacts values that look like secrets in a string.
///
/// Key names are preserved so the output stays useful for debugging.
///
/// ```rust
/// use demoforge_util::redact_sensitive;
///
/// assert_eq!(redact_sensitive("API_KEY=abc123 TOKEN=xyz789"), "API_KEY=[REDACTED] TOKEN=[REDACTED]");
/// assert_eq!(redact_sensitive("Authorization: Bearer secret123"), "Authorization: [REDACTED]");
/// ```
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in redact_patterns().iter() {
        redacted = pattern
            .replace_all(&redacted, |captures: &regex::Captures| {
                let prefix = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                let suffix = captures.get(3).map(|m| m.as_str()).unwrap_or("");
                format!("{}{}{}", prefix, REPLACEMENT, suffix)
            })
            .to_string();
    }
    redacted
}

fn redact_patterns() -> &'static Vec<Regex> {
    static PATTERNS: Lazy<Vec<Regex>> = Lazy::new(build_redact_patterns);
    &PATTERNS
}

/// Ordered from most specific to most general.
fn build_redact_patterns() -> Vec<Regex> {
    [
        r"(?i)(authorization:\s+)([^\r\n]+)()",
        r"(?i)(\bBearer\s+)([A-Za-z0-9\-._~+/]+=*)()",
        r"()(\b(?:ghp|gho|ghu|ghs|ghr)_[A-Za-z0-9]{20,}|\bgithub_pat_[A-Za-z0-9_]{20,})()",
        r#"(?i)("(?:[a-z0-9_]*?)(?:key|token|secret|password|encrypted_value)"\s*:\s*")([^"]*)(")"#,
        r"(?i)(\b[A-Z0-9_]*?(?:KEY|TOKEN|SECRET|PASSWORD)=)([^\s&]+)()",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
}
