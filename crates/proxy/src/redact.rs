//! Secret redaction for log output.
//!
//! Every string that reaches a log sink passes through [`redact`] first;
//! the logger layout in the server crate calls it on the fully formatted
//! line, so secrets are scrubbed no matter which module logged them.

use std::sync::OnceLock;

use regex::Regex;

const REPLACEMENT: &str = "[REDACTED]";

fn patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

    PATTERNS.get_or_init(|| {
        [
            // Anthropic API keys. Must run before the generic sk- pattern.
            r"sk-ant-api03-[A-Za-z0-9+/=\-_]{95,}",
            // Generic sk- style keys (OpenAI, OpenRouter, DeepSeek, ...).
            r"sk-[A-Za-z0-9]{20,}",
            // Bearer tokens in header dumps.
            r"(?i)Authorization:\s*Bearer\s+\S+",
            // JSON key/value pairs holding credentials.
            r#""(?:apiKey|x-api-key)"\s*:\s*"[^"]*""#,
            // Loose key=value / key: value assignments.
            r"(?i)api[-_]?key\s*[:=]\s*\S+",
        ]
        .into_iter()
        .map(|pattern| Regex::new(pattern).expect("redaction pattern must compile"))
        .collect()
    })
}

/// Replace every secret-shaped substring with `[REDACTED]`.
pub fn redact(input: &str) -> String {
    let mut output = input.to_string();

    for pattern in patterns() {
        if pattern.is_match(&output) {
            output = pattern.replace_all(&output, REPLACEMENT).into_owned();
        }
    }

    output
}
