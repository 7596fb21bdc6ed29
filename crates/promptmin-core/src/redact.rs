use regex::Regex;
use std::sync::OnceLock;

fn patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (
                Regex::new(r"\bsk-[A-Za-z0-9_-]{20,}").expect("valid regex"),
                "sk-REDACTED",
            ),
            (
                Regex::new(r"\bAKIA[0-9A-Z]{16}\b").expect("valid regex"),
                "AKIAREDACTED",
            ),
            (
                Regex::new(r"\bASIA[0-9A-Z]{16}\b").expect("valid regex"),
                "ASIAREDACTED",
            ),
            (
                Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9._~+/=-]{16,}").expect("valid regex"),
                "Bearer REDACTED",
            ),
        ]
    })
}

/// Masks API-key-shaped substrings before error text leaves an adapter.
pub fn redact_secrets(text: &str) -> String {
    let mut out = text.to_string();
    for (pattern, replacement) in patterns() {
        out = pattern.replace_all(&out, *replacement).into_owned();
    }
    out
}
