//! Ready-made events, receipts and response bodies.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use tryl_core::{BatchItemError, BatchResponse, Event, EventReceipt};

/// A well-formed test-environment API key.
pub const TEST_API_KEY: &str = "actlog_test_0123456789abcdef0123456789abcdef";

/// A well-formed live-environment API key.
pub const LIVE_API_KEY: &str = "actlog_live_0123456789abcdef0123456789abcdef";

/// A session token for management clients.
pub const SESSION_TOKEN: &str = "sess_0123456789abcdef";

/// Fixed timestamp used in generated receipts.
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 10, 30, 0).single().unwrap_or_default()
}

/// A valid event whose user id encodes `n`.
pub fn event(n: usize) -> Event {
    Event::new(format!("user_{n}"), "user.signed_in")
}

/// `count` distinct valid events.
pub fn events(count: usize) -> Vec<Event> {
    (0..count).map(event).collect()
}

/// A fully populated event.
pub fn detailed_event() -> Event {
    Event::new("user_123", "document.shared")
        .actor("admin_1")
        .target("document", "doc_42")
        .metadata(json!({"shared_with": ["user_456"], "permission": "edit"}))
}

/// Receipt with the given id at [`fixed_time`].
pub fn receipt(id: impl Into<String>) -> EventReceipt {
    EventReceipt { id: id.into(), timestamp: fixed_time() }
}

/// Receipt ids follow `evt_<n>`.
pub fn receipt_id(n: usize) -> String {
    format!("evt_{n}")
}

/// A batch response accepting `count` events with ids `evt_<offset + i>`.
pub fn batch_success(count: usize, offset: usize) -> BatchResponse {
    BatchResponse {
        results: (0..count).map(|i| receipt(receipt_id(offset + i))).collect(),
        errors: Vec::new(),
    }
}

/// A per-item rejection.
pub fn item_error(index: usize, code: &str, message: &str) -> BatchItemError {
    BatchItemError { index, code: code.to_string(), message: message.to_string() }
}

/// JSON body of an API error response.
pub fn error_body(code: &str, message: &str) -> Value {
    json!({"error": {"code": code, "message": message}})
}
