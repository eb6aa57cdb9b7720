//! Sanitization of vendor documents before they are persisted as job results.
//!
//! The pass is pure and recursive: it never mutates its input and returns a new
//! document with sensitive keys removed and contact-like strings normalized.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::document::Document;

/// Key fragments that mark a field as sensitive (matched case-insensitively).
pub const SENSITIVE_KEY_FRAGMENTS: [&str; 4] = ["password", "ssn", "credit", "secret"];

/// North-American number: optional `+`, optional country code `1`, then ten
/// digits whose area code does not start with 0 or 1.
static NANP_PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?1?[2-9]\d{9}$").expect("NANP_PHONE is a valid regex pattern")
});

/// Separators that may appear inside a written phone number.
const PHONE_PUNCTUATION: [char; 5] = [' ', '-', '.', '(', ')'];

/// Sanitize a document.
///
/// - objects: keys containing a [`SENSITIVE_KEY_FRAGMENTS`] entry are dropped
/// - arrays: every element is sanitized
/// - strings: trimmed, phone numbers rewritten to `+1XXXXXXXXXX`, strings
///   containing `@` lowercased
/// - other scalars are returned unchanged
pub fn sanitize(document: &Document) -> Document {
    match document {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !is_sensitive_key(key))
                .map(|(key, value)| (key.clone(), sanitize(value)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        Value::String(s) => Value::String(normalize_string(s)),
        other => other.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEY_FRAGMENTS
        .iter()
        .any(|fragment| lower.contains(fragment))
}

fn normalize_string(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out = normalize_phone(trimmed).unwrap_or_else(|| trimmed.to_string());
    if out.contains('@') {
        out = out.to_lowercase();
    }
    out
}

fn normalize_phone(value: &str) -> Option<String> {
    let compact: String = value
        .chars()
        .filter(|c| !PHONE_PUNCTUATION.contains(c))
        .collect();
    if !NANP_PHONE.is_match(&compact) {
        return None;
    }

    let digits: String = compact.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        10 => Some(format!("+1{digits}")),
        11 if digits.starts_with('1') => Some(format!("+{digits}")),
        _ => None,
    }
}
