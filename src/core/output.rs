//! Compact output rendering helpers for CLI surfaces.

use clap::ValueEnum;
use serde_json::Value as JsonValue;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Print a command result: pretty JSON, or the text rendering supplied by the caller.
pub fn emit<F>(format: OutputFormat, out: &JsonValue, text: F)
where
    F: FnOnce(&JsonValue),
{
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(out) {
            Ok(body) => println!("{}", body),
            Err(_) => println!("{}", out),
        },
        OutputFormat::Text => text(out),
    }
}

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Short form of a sha256 hex digest for tables.
pub fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// Render a field list as `a, b (+N more)`.
pub fn preview_fields(fields: &[String], max_items: usize) -> String {
    if fields.is_empty() {
        return "-".to_string();
    }
    let shown = fields
        .iter()
        .take(max_items)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if fields.len() > max_items {
        format!("{} (+{} more)", shown, fields.len() - max_items)
    } else {
        shown
    }
}
