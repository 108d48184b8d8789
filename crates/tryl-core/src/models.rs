//! Event payloads and the response shapes returned when recording them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TrylError};

/// Maximum number of events accepted by one batch request.
pub const MAX_EVENTS_PER_BATCH: usize = 100;

/// Accessors needed to validate an event-like value.
///
/// Anything exposing these fields can be validated with
/// [`crate::validation::validate_event`]; optional fields return an empty
/// string when unset.
pub trait EventFields {
    /// User the event is about.
    fn user_id(&self) -> &str;
    /// Action that happened, e.g. `document.created`.
    fn action(&self) -> &str;
    /// Who performed the action.
    fn actor_id(&self) -> &str;
    /// Kind of resource affected.
    fn target_type(&self) -> &str;
    /// Identifier of the resource affected.
    fn target_id(&self) -> &str;
}

/// An activity event to be recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// User who performed or is associated with the action. Required.
    pub user_id: String,
    /// Action performed, lowercase with dots or underscores. Required.
    pub action: String,
    /// Who performed the action when it differs from `user_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    /// Type of resource affected, e.g. `document`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    /// Identifier of the resource affected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    /// Additional structured data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Event {
    /// Creates an event with the two required fields.
    pub fn new(user_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), action: action.into(), ..Default::default() }
    }

    /// Sets the actor.
    #[must_use]
    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Sets the target resource.
    #[must_use]
    pub fn target(mut self, target_type: impl Into<String>, target_id: impl Into<String>) -> Self {
        self.target_type = Some(target_type.into());
        self.target_id = Some(target_id.into());
        self
    }

    /// Sets metadata from any serializable value.
    ///
    /// # Errors
    ///
    /// Returns `TrylError::Validation` if the value cannot be represented as
    /// JSON.
    pub fn with_metadata<T: Serialize>(mut self, metadata: &T) -> Result<Self> {
        let value = serde_json::to_value(metadata).map_err(|e| {
            TrylError::validation("metadata", format!("failed to serialize metadata: {e}"))
        })?;
        self.metadata = Some(value);
        Ok(self)
    }

    /// Sets metadata from an already built JSON value.
    #[must_use]
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl EventFields for Event {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn action(&self) -> &str {
        &self.action
    }

    fn actor_id(&self) -> &str {
        self.actor_id.as_deref().unwrap_or_default()
    }

    fn target_type(&self) -> &str {
        self.target_type.as_deref().unwrap_or_default()
    }

    fn target_id(&self) -> &str {
        self.target_id.as_deref().unwrap_or_default()
    }
}

/// Server acknowledgement for a recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventReceipt {
    /// Identifier assigned by the server.
    pub id: String,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Body of a batch request.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRequest<'a> {
    /// Events in submission order.
    pub events: &'a [Event],
}

/// Rejection of a single event inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemError {
    /// Position of the rejected event in the request.
    pub index: usize,
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Response to a batch request.
///
/// `results` is aligned by position with the request; `errors` names
/// rejected positions explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Receipts in request order.
    #[serde(default)]
    pub results: Vec<EventReceipt>,
    /// Per-item rejections.
    #[serde(default)]
    pub errors: Vec<BatchItemError>,
}

impl BatchResponse {
    /// Returns the outcome for the event submitted at `index`.
    ///
    /// An explicit error for the position wins over a receipt. A response
    /// shorter than the request yields `MissingResponse` for the tail.
    pub fn outcome(&self, index: usize) -> Result<EventReceipt> {
        if let Some(error) = self.errors.iter().find(|e| e.index == index) {
            return Err(TrylError::api(400, error.code.clone(), error.message.clone()));
        }

        self.results.get(index).cloned().ok_or(TrylError::MissingResponse { index })
    }

    /// Returns one outcome per submitted position, in order.
    pub fn outcomes(&self, submitted: usize) -> Vec<Result<EventReceipt>> {
        (0..submitted).map(|index| self.outcome(index)).collect()
    }
}

/// An event as stored by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Event identifier.
    pub id: String,
    /// Associated user.
    pub user_id: String,
    /// Action performed.
    pub action: String,
    /// Actor, when recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    /// Target resource type, when recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    /// Target resource id, when recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    /// Structured metadata, when recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Recording time.
    pub timestamp: DateTime<Utc>,
}

/// One page of listed events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventList {
    /// Events on this page.
    #[serde(default)]
    pub events: Vec<StoredEvent>,
    /// Whether more events match the filter.
    #[serde(default)]
    pub has_more: bool,
    /// Total matches; only set with offset pagination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Cursor for the next page; only set with cursor pagination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn receipt(id: &str) -> EventReceipt {
        EventReceipt { id: id.to_string(), timestamp: Utc::now() }
    }

    #[test]
    fn optional_fields_are_omitted_when_unset() {
        let event = Event::new("user_1", "user.created");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json, json!({"user_id": "user_1", "action": "user.created"}));
    }

    #[test]
    fn builder_methods_populate_optional_fields() {
        let event = Event::new("user_1", "document.shared")
            .actor("admin_7")
            .target("document", "doc_42")
            .with_metadata(&json!({"title": "Plan"}))
            .unwrap();

        assert_eq!(event.actor_id(), "admin_7");
        assert_eq!(event.target_type(), "document");
        assert_eq!(event.target_id(), "doc_42");
        assert_eq!(event.metadata, Some(json!({"title": "Plan"})));
    }

    #[test]
    fn outcome_prefers_explicit_error_for_position() {
        let response = BatchResponse {
            results: vec![receipt("evt_0"), receipt("evt_1")],
            errors: vec![BatchItemError {
                index: 1,
                code: "validation_error".to_string(),
                message: "bad action".to_string(),
            }],
        };

        assert_eq!(response.outcome(0).unwrap().id, "evt_0");
        let error = response.outcome(1).unwrap_err();
        assert_eq!(error.status(), Some(400));
        assert_eq!(error.code(), Some("validation_error"));
    }

    #[test]
    fn short_response_reports_missing_positions() {
        let response = BatchResponse { results: vec![receipt("evt_0")], errors: vec![] };
        let outcomes = response.outcomes(3);

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_ok());
        assert_eq!(outcomes[1], Err(TrylError::MissingResponse { index: 1 }));
        assert_eq!(outcomes[2], Err(TrylError::MissingResponse { index: 2 }));
    }

    #[test]
    fn batch_response_tolerates_missing_arrays() {
        let response: BatchResponse = serde_json::from_str("{}").unwrap();
        assert!(response.results.is_empty());
        assert!(response.errors.is_empty());
    }
}
