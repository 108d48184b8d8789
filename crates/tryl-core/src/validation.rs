//! Client-side validation mirroring the server's acceptance rules.
//!
//! Rejecting malformed input locally saves a round trip and, more
//! importantly, keeps it out of retry loops: validation errors are terminal.

use std::sync::LazyLock;

use regex::Regex;

use crate::{
    error::{Result, TrylError},
    models::EventFields,
};

/// Maximum length of any identifier or action field.
pub const MAX_FIELD_LENGTH: usize = 255;

/// Minimum length of an API key (prefix plus 32 random characters).
pub const MIN_API_KEY_LENGTH: usize = 44;

const LIVE_KEY_PREFIX: &str = "actlog_live_";
const TEST_KEY_PREFIX: &str = "actlog_test_";
const DISPLAY_LIMIT: usize = 50;

static ACTION_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_.]*[a-z0-9]$").ok());

/// Validates an event, returning the first failing field.
///
/// # Errors
///
/// Returns `TrylError::Validation` naming the field and the rule it broke.
pub fn validate_event<E: EventFields + ?Sized>(event: &E) -> Result<()> {
    require("user_id", event.user_id())?;
    max_length("user_id", event.user_id())?;
    validate_action(event.action())?;

    max_length("actor_id", event.actor_id())?;
    max_length("target_type", event.target_type())?;
    max_length("target_id", event.target_id())?;

    Ok(())
}

/// Validates just the action format.
///
/// # Errors
///
/// Returns `TrylError::Validation` when the action is empty, too long, or not
/// lowercase alphanumeric with dots or underscores.
pub fn validate_action(action: &str) -> Result<()> {
    require("action", action)?;
    max_length("action", action)?;

    let matches = ACTION_PATTERN.as_ref().is_some_and(|pattern| pattern.is_match(action));
    if !matches {
        return Err(TrylError::validation(
            "action",
            format!(
                "must be lowercase alphanumeric with dots or underscores (e.g., 'user.created', \
                 'org_member_added') (got: {})",
                truncate_for_display(action)
            ),
        ));
    }

    Ok(())
}

/// Validates API key format.
///
/// # Errors
///
/// Returns `TrylError::Configuration` when the key is empty, has an unknown
/// prefix, or is too short.
pub fn validate_api_key(api_key: &str) -> Result<()> {
    if api_key.is_empty() {
        return Err(TrylError::configuration("API key is required"));
    }
    if !is_live_key(api_key) && !is_test_key(api_key) {
        return Err(TrylError::configuration(format!(
            "API key must start with {LIVE_KEY_PREFIX} or {TEST_KEY_PREFIX}"
        )));
    }
    if api_key.len() < MIN_API_KEY_LENGTH {
        return Err(TrylError::configuration(format!(
            "API key must be at least {MIN_API_KEY_LENGTH} characters"
        )));
    }
    Ok(())
}

/// Reports whether the key is a production key.
pub fn is_live_key(api_key: &str) -> bool {
    api_key.starts_with(LIVE_KEY_PREFIX)
}

/// Reports whether the key is a test key.
pub fn is_test_key(api_key: &str) -> bool {
    api_key.starts_with(TEST_KEY_PREFIX)
}

/// Prefixes the field of a validation error with `events[index].`.
pub fn at_batch_index(error: TrylError, index: usize) -> TrylError {
    match error {
        TrylError::Validation { field, message } => {
            TrylError::Validation { field: format!("events[{index}].{field}"), message }
        },
        other => other,
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(TrylError::validation(field, "is required"));
    }
    Ok(())
}

fn max_length(field: &str, value: &str) -> Result<()> {
    if value.len() > MAX_FIELD_LENGTH {
        return Err(TrylError::validation(
            field,
            format!(
                "must be {MAX_FIELD_LENGTH} characters or less (got: {})",
                truncate_for_display(value)
            ),
        ));
    }
    Ok(())
}

fn truncate_for_display(value: &str) -> String {
    match value.char_indices().nth(DISPLAY_LIMIT) {
        Some((cut, _)) => format!("{}...", &value[..cut]),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Event;

    #[test]
    fn accepts_well_formed_actions() {
        for action in ["user.created", "org_member_added", "a1", "billing.invoice.paid2"] {
            assert!(validate_action(action).is_ok(), "{action} should be valid");
        }
    }

    #[test]
    fn rejects_malformed_actions() {
        for action in ["User.created", "user.", ".user", "a", "user created", "user-created"] {
            let error = validate_action(action).unwrap_err();
            assert!(error.is_client_validation(), "{action} should be rejected");
        }
    }

    #[test]
    fn long_values_are_truncated_in_messages() {
        let long = "x".repeat(300);
        let event = Event::new(long, "user.created");

        let TrylError::Validation { field, message } = validate_event(&event).unwrap_err() else {
            panic!("expected validation error");
        };
        assert_eq!(field, "user_id");
        assert!(message.ends_with("...)"));
        assert!(message.len() < 120);
    }

    #[test]
    fn batch_index_prefixes_field() {
        let error = at_batch_index(TrylError::validation("action", "is required"), 3);
        assert_eq!(error, TrylError::validation("events[3].action", "is required"));
    }
}
