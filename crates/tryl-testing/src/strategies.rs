//! Proptest strategies for events and batch responses.

use proptest::prelude::{prop, Strategy};
use tryl_core::{BatchItemError, BatchResponse, Event};

use crate::fixtures;

/// Valid action names like `user.created` or `org_member2.added`.
pub fn action() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,10}(\\.[a-z][a-z0-9_]{0,10}){0,2}[a-z0-9]"
}

/// Valid user identifiers.
pub fn user_id() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,40}"
}

/// Valid events with optional actor and target.
pub fn event() -> impl Strategy<Value = Event> {
    (user_id(), action(), prop::option::of(user_id()), prop::option::of(("[a-z]{1,12}", user_id())))
        .prop_map(|(user_id, action, actor, target)| {
            let mut event = Event::new(user_id, action);
            if let Some(actor) = actor {
                event = event.actor(actor);
            }
            if let Some((target_type, target_id)) = target {
                event = event.target(target_type, target_id);
            }
            event
        })
}

/// Batch responses for `submitted` events: some positions rejected, and the
/// result list possibly truncated.
pub fn batch_response(submitted: usize) -> impl Strategy<Value = BatchResponse> {
    (prop::collection::vec(prop::bool::weighted(0.2), submitted), 0..=submitted).prop_map(
        |(rejected, returned)| {
            let errors = rejected
                .iter()
                .enumerate()
                .filter(|(_, rejected)| **rejected)
                .map(|(index, _)| fixtures::item_error(index, "validation_error", "rejected"))
                .collect::<Vec<BatchItemError>>();
            BatchResponse { results: fixtures::batch_success(returned, 0).results, errors }
        },
    )
}
