//! Timestamp, identifier and CLI envelope helpers.

use crate::core::error::ProspectusError;
use serde_json::Value as JsonValue;
use ulid::Ulid;

/// Returns unix-epoch seconds with `Z` suffix (e.g. `1771220592Z`).
pub fn now_epoch_z() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{}Z", secs)
}

pub fn parse_epoch_z(ts: &str) -> Option<u64> {
    ts.strip_suffix('Z')?.parse().ok()
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Standard command response envelope shape used across CLI surfaces.
pub fn command_envelope(cmd: &str, status: &str, extra: JsonValue) -> JsonValue {
    let mut base = serde_json::json!({
        "envelope_version": "1.0.0",
        "ts": now_epoch_z(),
        "event_id": new_event_id(),
        "cmd": cmd,
        "status": status
    });
    if let (Some(base_obj), Some(extra_obj)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            base_obj.insert(k.clone(), v.clone());
        }
    }
    base
}

/// Envelope for a failed command; `error.kind` is stable for scripting.
pub fn error_envelope(cmd: &str, err: &ProspectusError) -> JsonValue {
    command_envelope(
        cmd,
        "error",
        serde_json::json!({
            "error": { "kind": err.kind(), "message": err.to_string() }
        }),
    )
}
