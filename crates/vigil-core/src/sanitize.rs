//! Credential sanitizer for audit output.
//!
//! Scans strings for credential-shaped content (bearer tokens, `key=value`
//! secrets, well-known API key prefixes, JWTs and card-number-like digit
//! runs) and replaces every match with a fixed placeholder. In JSON values
//! the whole value under a credential-named key is replaced regardless of
//! its shape. There is no configuration switch: the pattern set is fixed
//! and always applied.

use regex::Regex;

/// Placeholder substituted for every credential-shaped match.
pub const REDACTION_PLACEHOLDER: &str = "[REDACTED]";

/// Key fragments that mark a JSON field as a credential. Matched against
/// the key lowercased with `_` and `-` removed.
const CREDENTIAL_KEY_FRAGMENTS: &[&str] = &[
    "password",
    "passwd",
    "passphrase",
    "secret",
    "token",
    "apikey",
    "accesskey",
    "privatekey",
    "authorization",
    "credential",
    "cookie",
];

/// Whether a JSON object key names a credential.
pub fn is_credential_key(key: &str) -> bool {
    let normalized: String = key
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect();
    normalized == "pwd"
        || CREDENTIAL_KEY_FRAGMENTS
            .iter()
            .any(|fragment| normalized.contains(fragment))
}

/// Result of sanitizing one string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizeReport {
    pub text: String,
    pub redaction_count: usize,
}

/// Sanitizer holding the compiled credential patterns.
pub struct Sanitizer {
    key_value: Regex,
    bearer: Regex,
    key_prefix: Regex,
    jwt: Regex,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sanitizer {
    /// Compile the fixed pattern set.
    pub fn new() -> Self {
        Self {
            // secret-ish key, optional closing quote, `=` or `:`, then a
            // quoted or bare value. The value may not start with `[` so an
            // already-redacted value is left alone.
            key_value: Regex::new(
                r#"(?i)\b((?:api[_-]?key|access[_-]?key|secret[_-]?key|client[_-]?secret|secret|password|passwd|pwd|token|access[_-]?token|refresh[_-]?token|auth[_-]?token|credentials?|private[_-]?key))(["']?\s*[:=]\s*)("[^"]*"|'[^']*'|[^\s"',;&\[\]{}][^\s"',;&\]{}]*)"#,
            )
            .expect("Invalid key/value secret regex"),
            bearer: Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9\-._~+/]{8,}=*")
                .expect("Invalid bearer regex"),
            key_prefix: Regex::new(
                r"\b(?:sk-[A-Za-z0-9_\-]{16,}|gh[pousr]_[A-Za-z0-9]{20,}|AKIA[0-9A-Z]{16}|xox[abprs]-[A-Za-z0-9\-]{10,})",
            )
            .expect("Invalid key prefix regex"),
            jwt: Regex::new(r"\beyJ[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+")
                .expect("Invalid JWT regex"),
        }
    }

    /// Sanitize `content`, returning the cleaned text and match count.
    pub fn check(&self, content: &str) -> SanitizeReport {
        let mut count = 0usize;

        let text = self.key_value.replace_all(content, |caps: &regex::Captures<'_>| {
            count += 1;
            format!("{}{}{}", &caps[1], &caps[2], REDACTION_PLACEHOLDER)
        });

        let text = self.bearer.replace_all(&text, |_: &regex::Captures<'_>| {
            count += 1;
            REDACTION_PLACEHOLDER
        });

        let text = self.key_prefix.replace_all(&text, |_: &regex::Captures<'_>| {
            count += 1;
            REDACTION_PLACEHOLDER
        });

        let text = self.jwt.replace_all(&text, |_: &regex::Captures<'_>| {
            count += 1;
            REDACTION_PLACEHOLDER
        });

        let (text, cards) = redact_card_numbers(&text);
        count += cards;

        SanitizeReport {
            text,
            redaction_count: count,
        }
    }

    /// Convenience: return only the sanitized text.
    pub fn sanitize(&self, content: &str) -> String {
        self.check(content).text
    }

    /// Sanitize every string inside a JSON value in place.
    ///
    /// Returns the number of redactions performed.
    pub fn sanitize_value(&self, value: &mut serde_json::Value) -> usize {
        match value {
            serde_json::Value::String(s) => {
                let report = self.check(s);
                if report.redaction_count > 0 {
                    *s = report.text;
                }
                report.redaction_count
            }
            serde_json::Value::Array(items) => {
                items.iter_mut().map(|v| self.sanitize_value(v)).sum()
            }
            serde_json::Value::Object(map) => map
                .iter_mut()
                .map(|(key, v)| {
                    if is_credential_key(key) {
                        redact_whole(v)
                    } else {
                        self.sanitize_value(v)
                    }
                })
                .sum(),
            _ => 0,
        }
    }
}

/// Replace a credential field's value with the placeholder.
fn redact_whole(value: &mut serde_json::Value) -> usize {
    match value {
        serde_json::Value::Null => 0,
        serde_json::Value::String(s) if s == REDACTION_PLACEHOLDER => 0,
        _ => {
            *value = serde_json::Value::String(REDACTION_PLACEHOLDER.to_string());
            1
        }
    }
}

/// Replace runs of 13-19 digits (optionally separated by single spaces or
/// dashes) with the placeholder.
///
/// Every such run is treated as card-number-like; no checksum is applied
/// because a missed card is worse than a masked order number.
fn redact_card_numbers(text: &str) -> (String, usize) {
    let mut result = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    let mut count = 0;

    while i < chars.len() {
        if chars[i].is_ascii_digit() && (i == 0 || !chars[i - 1].is_ascii_alphanumeric()) {
            let start = i;
            let mut digit_count = 0;

            while i < chars.len()
                && (chars[i].is_ascii_digit() || chars[i] == ' ' || chars[i] == '-')
            {
                if chars[i].is_ascii_digit() {
                    digit_count += 1;
                } else if i + 1 >= chars.len() || !chars[i + 1].is_ascii_digit() {
                    // A separator not followed by a digit ends the run.
                    break;
                }
                i += 1;
            }

            let trailing_alnum = i < chars.len() && chars[i].is_ascii_alphanumeric();
            if (13..=19).contains(&digit_count) && !trailing_alnum {
                result.push_str(REDACTION_PLACEHOLDER);
                count += 1;
            } else {
                result.extend(&chars[start..i]);
            }
        } else {
            result.push(chars[i]);
            i += 1;
        }
    }

    (result, count)
}
