//! Placeholder syntax shared by templates and generation.
//!
//! Templates reference inputs as `{{dotted.path}}`. Unknown facts are rendered
//! as the literal marker `[[MISSING: dotted.path]]`.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("placeholder pattern is valid")
});

static MISSING_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[MISSING:\s*([^\]]+)\]\]").expect("marker pattern is valid"));

static FIELD_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+(\.[A-Za-z0-9_]+)*$").expect("field pattern is valid"));

pub const MISSING_PREFIX: &str = "[[MISSING:";

/// The literal marker emitted for an unknown field.
pub fn missing_marker(field: &str) -> String {
    format!("[[MISSING: {}]]", field)
}

/// True when `value` is itself a missing marker rather than a fact.
pub fn is_missing_value(value: &str) -> bool {
    value.trim_start().starts_with(MISSING_PREFIX)
}

pub fn is_valid_field_name(field: &str) -> bool {
    FIELD_NAME_RE.is_match(field)
}

/// Sorted, de-duplicated `{{path}}` references in `text`.
pub fn extract_placeholders(text: &str) -> Vec<String> {
    let found: BTreeSet<String> = PLACEHOLDER_RE
        .captures_iter(text)
        .map(|c| c[1].trim().to_string())
        .collect();
    found.into_iter().collect()
}

/// Sorted, de-duplicated field names of `[[MISSING: ...]]` markers in `text`.
pub fn extract_missing_markers(text: &str) -> Vec<String> {
    let found: BTreeSet<String> = MISSING_MARKER_RE
        .captures_iter(text)
        .map(|c| c[1].trim().to_string())
        .collect();
    found.into_iter().collect()
}

/// Replace every `{{path}}` in `text` using `lookup`. Paths that resolve to
/// `None` become missing markers and are returned in order of first occurrence.
pub fn substitute<F>(text: &str, mut lookup: F) -> (String, Vec<String>)
where
    F: FnMut(&str) -> Option<String>,
{
    let mut missing: Vec<String> = Vec::new();
    let rendered = PLACEHOLDER_RE.replace_all(text, |caps: &regex::Captures<'_>| {
        let path = caps[1].trim();
        match lookup(path) {
            Some(value) => value,
            None => {
                if !missing.iter().any(|m| m == path) {
                    missing.push(path.to_string());
                }
                missing_marker(path)
            }
        }
    });
    (rendered.into_owned(), missing)
}
