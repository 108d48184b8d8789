//! Query filter for listing recorded events.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::error::{Result, TrylError};

/// Sort order for listed events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Oldest first.
    Asc,
    /// Newest first (server default).
    Desc,
}

impl SortOrder {
    fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Filter for `GET /v1/events`. Unset fields are not sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    /// Events for this user.
    pub user_id: Option<String>,
    /// Events performed by this actor.
    pub actor_id: Option<String>,
    /// Action, with `*` wildcards such as `org.*` or `*.created`.
    pub action: Option<String>,
    /// Target resource type.
    pub target_type: Option<String>,
    /// Target resource id.
    pub target_id: Option<String>,
    /// Inclusive lower bound on event time.
    pub start_time: Option<DateTime<Utc>>,
    /// Inclusive upper bound on event time.
    pub end_time: Option<DateTime<Utc>>,
    /// Metadata must contain this JSON object.
    pub metadata_contains: Option<Map<String, Value>>,
    /// Full-text search across metadata.
    pub metadata_search: Option<String>,
    /// Opaque cursor from a previous page. Takes precedence over `offset`.
    pub cursor: Option<String>,
    /// Number of events to skip.
    pub offset: Option<u32>,
    /// Page size (server maximum 100).
    pub limit: Option<u32>,
    /// Sort order.
    pub order: Option<SortOrder>,
}

impl EventFilter {
    /// Builds query pairs in a stable order.
    ///
    /// # Errors
    ///
    /// Returns `TrylError::Validation` if the metadata containment filter
    /// cannot be encoded.
    pub fn to_query(&self) -> Result<Vec<(String, String)>> {
        let mut query = Vec::new();
        let mut push = |key: &str, value: String| query.push((key.to_string(), value));

        let text_fields = [
            ("user_id", &self.user_id),
            ("actor_id", &self.actor_id),
            ("action", &self.action),
            ("target_type", &self.target_type),
            ("target_id", &self.target_id),
        ];
        for (key, value) in text_fields {
            if let Some(value) = value.as_ref().filter(|v| !v.is_empty()) {
                push(key, value.clone());
            }
        }

        if let Some(start) = self.start_time {
            push("start_time", start.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        if let Some(end) = self.end_time {
            push("end_time", end.to_rfc3339_opts(SecondsFormat::Secs, true));
        }

        if let Some(contains) = &self.metadata_contains {
            let encoded = serde_json::to_string(contains).map_err(|e| {
                TrylError::validation(
                    "metadata_contains",
                    format!("failed to marshal metadata filter: {e}"),
                )
            })?;
            push("metadata_contains", encoded);
        }
        if let Some(search) = self.metadata_search.as_ref().filter(|s| !s.is_empty()) {
            push("metadata_search", search.clone());
        }

        match (&self.cursor, self.offset) {
            (Some(cursor), _) if !cursor.is_empty() => push("cursor", cursor.clone()),
            (_, Some(offset)) if offset > 0 => push("offset", offset.to_string()),
            _ => {},
        }

        if let Some(limit) = self.limit.filter(|l| *l > 0) {
            push("limit", limit.to_string());
        }
        if let Some(order) = self.order {
            push("order", order.as_str().to_string());
        }

        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn value_of<'a>(query: &'a [(String, String)], key: &str) -> Option<&'a str> {
        query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn empty_filter_produces_no_query() {
        assert!(EventFilter::default().to_query().unwrap().is_empty());
    }

    #[test]
    fn cursor_takes_precedence_over_offset() {
        let filter = EventFilter {
            cursor: Some("c_abc".to_string()),
            offset: Some(20),
            ..Default::default()
        };
        let query = filter.to_query().unwrap();

        assert_eq!(value_of(&query, "cursor"), Some("c_abc"));
        assert_eq!(value_of(&query, "offset"), None);
    }

    #[test]
    fn offset_used_without_cursor() {
        let filter = EventFilter { offset: Some(20), limit: Some(50), ..Default::default() };
        let query = filter.to_query().unwrap();

        assert_eq!(value_of(&query, "offset"), Some("20"));
        assert_eq!(value_of(&query, "limit"), Some("50"));
    }

    #[test]
    fn times_and_metadata_are_encoded() {
        let mut contains = Map::new();
        contains.insert("status".to_string(), json!("active"));

        let filter = EventFilter {
            action: Some("org.*".to_string()),
            start_time: Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
            metadata_contains: Some(contains),
            order: Some(SortOrder::Asc),
            ..Default::default()
        };
        let query = filter.to_query().unwrap();

        assert_eq!(value_of(&query, "action"), Some("org.*"));
        assert_eq!(value_of(&query, "start_time"), Some("2024-01-02T03:04:05Z"));
        assert_eq!(value_of(&query, "metadata_contains"), Some(r#"{"status":"active"}"#));
        assert_eq!(value_of(&query, "order"), Some("asc"));
    }
}
