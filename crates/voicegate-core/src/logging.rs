//! PHI-redacting structured logging.
//!
//! Every session/upstream/gateway event helper routes its payload through
//! [`redacted`] before the value reaches a subscriber, so transcripts, audio,
//! contact details, and tokens never land in a log record. Production mode
//! emits line-delimited JSON; development mode emits pretty text with debug
//! enabled.

use std::sync::Once;

use serde_json::Value;
use tracing_subscriber::EnvFilter;

use crate::config::RunMode;

/// Replacement for any redacted value.
pub const REDACT_SENTINEL: &str = "[REDACTED]";

/// Field names whose values are scrubbed wherever they appear, at any
/// nesting depth. Matching is case-insensitive on the exact key.
pub const REDACTED_FIELDS: &[&str] = &[
    "transcript",
    "text",
    "audio",
    "data",
    "narrative",
    "email",
    "phone",
    "name",
    "patient",
    "token",
    "firebase_id_token",
];

static INIT: Once = Once::new();

/// Install the global tracing subscriber. Idempotent so tests can call it
/// freely; only the first call wins.
pub fn init_logging(mode: RunMode) {
    INIT.call_once(|| {
        let default_level = if mode.is_production() { "info" } else { "debug" };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level));

        if mode.is_production() {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_current_span(false)
                .init();
        } else {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    });
}

/// Scrub redacted fields from a JSON value in place, recursing through
/// nested objects and arrays.
pub fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if is_redacted_field(key) {
                    *v = Value::String(REDACT_SENTINEL.to_string());
                } else {
                    redact(v);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact(item);
            }
        }
        _ => {}
    }
}

/// Owning variant of [`redact`].
#[must_use]
pub fn redacted(mut value: Value) -> Value {
    redact(&mut value);
    value
}

fn is_redacted_field(key: &str) -> bool {
    REDACTED_FIELDS.iter().any(|f| key.eq_ignore_ascii_case(f))
}

// ── Event helpers ──────────────────────────────────────────────────
//
// Contextual fields mirror the record shape {ts, level, event, service, …ctx};
// ts and level come from the subscriber.

/// Session-scoped event at info.
pub fn session_event(event: &str, session_id: &str, user_id: Option<&str>, data: Value) {
    let data = redacted(data);
    tracing::info!(
        target: "voicegate.session",
        service = "voicegate",
        event,
        session_id,
        user_id = user_id.unwrap_or("-"),
        data = %data,
        "session event"
    );
}

/// Session-scoped event at warn.
pub fn session_warn(event: &str, session_id: &str, user_id: Option<&str>, data: Value) {
    let data = redacted(data);
    tracing::warn!(
        target: "voicegate.session",
        service = "voicegate",
        event,
        session_id,
        user_id = user_id.unwrap_or("-"),
        data = %data,
        "session event"
    );
}

/// Upstream-channel event at info.
pub fn upstream_event(event: &str, data: Value) {
    let data = redacted(data);
    tracing::info!(
        target: "voicegate.upstream",
        service = "voicegate",
        event,
        data = %data,
        "upstream event"
    );
}

/// Upstream-channel event at warn.
pub fn upstream_warn(event: &str, data: Value) {
    let data = redacted(data);
    tracing::warn!(
        target: "voicegate.upstream",
        service = "voicegate",
        event,
        data = %data,
        "upstream event"
    );
}

/// Gateway-wide event at info.
pub fn gateway_event(event: &str, data: Value) {
    let data = redacted(data);
    tracing::info!(
        target: "voicegate.gateway",
        service = "voicegate",
        event,
        data = %data,
        "gateway event"
    );
}

/// Gateway-wide event at warn.
pub fn gateway_warn(event: &str, data: Value) {
    let data = redacted(data);
    tracing::warn!(
        target: "voicegate.gateway",
        service = "voicegate",
        event,
        data = %data,
        "gateway event"
    );
}
