//! Retry-wrapped API calls shared by the client and its batcher.
//!
//! The client facade and the background batch loop both need to send
//! events; [`Dispatcher`] owns the transport and retry executor so neither
//! has to hold a reference to the other.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tryl_core::{
    validate_event,
    validation::at_batch_index,
    BatchRequest, BatchResponse, Event, EventFilter, EventList, EventReceipt, Result, TrylError,
    MAX_EVENTS_PER_BATCH,
};

use crate::{
    retry::RetryExecutor,
    transport::{api_error, Transport, TransportRequest, TransportResponse},
};

/// Path for single event submission.
pub const EVENTS_PATH: &str = "/v1/events";

/// Path for batch submission.
pub const BATCH_PATH: &str = "/v1/events/batch";

/// Sends API requests through a transport under a retry policy.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    retry: RetryExecutor,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("retry", &self.retry).finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new(transport: Arc<dyn Transport>, retry: RetryExecutor) -> Self {
        Self { transport, retry }
    }

    /// The retry executor in use.
    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    /// Validates and records one event.
    ///
    /// # Errors
    ///
    /// Validation errors are returned before any request is made. Otherwise
    /// any error of [`RetryExecutor::execute`].
    pub async fn log(&self, cancel: &CancellationToken, event: &Event) -> Result<EventReceipt> {
        validate_event(event)?;

        let body = encode_body(event)?;
        let request = TransportRequest::new(Method::POST, EVENTS_PATH).with_body(body);

        let receipt: EventReceipt = self.call_json(cancel, request).await?;
        debug!(event_id = %receipt.id, action = %event.action, "event recorded");
        Ok(receipt)
    }

    /// Validates and records up to [`MAX_EVENTS_PER_BATCH`] events in one
    /// request.
    ///
    /// A 207 Multi-Status response is a success; per-item rejections are
    /// reported in [`BatchResponse::errors`].
    ///
    /// # Errors
    ///
    /// Validation errors name the offending position as `events[i].field`.
    pub async fn log_batch(
        &self,
        cancel: &CancellationToken,
        events: &[Event],
    ) -> Result<BatchResponse> {
        validate_batch(events)?;
        self.send_batch(cancel, events).await
    }

    /// Sends an already validated batch.
    pub(crate) async fn send_batch(
        &self,
        cancel: &CancellationToken,
        events: &[Event],
    ) -> Result<BatchResponse> {
        let body = encode_body(&BatchRequest { events })?;
        let request = TransportRequest::new(Method::POST, BATCH_PATH).with_body(body);

        let response: BatchResponse = self.call_json(cancel, request).await?;
        debug!(
            submitted = events.len(),
            accepted = response.results.len(),
            rejected = response.errors.len(),
            "batch recorded"
        );
        Ok(response)
    }

    /// Lists recorded events matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns `TrylError::Validation` if the metadata filter cannot be
    /// encoded, otherwise any error of [`RetryExecutor::execute`].
    pub async fn list(&self, cancel: &CancellationToken, filter: &EventFilter) -> Result<EventList> {
        let request = TransportRequest::new(Method::GET, EVENTS_PATH).with_query(filter.to_query()?);
        self.call_json(cancel, request).await
    }

    /// Executes a request and decodes the JSON body of the response.
    pub(crate) async fn call_json<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        request: TransportRequest,
    ) -> Result<T> {
        let response = self.call(cancel, request).await?;
        serde_json::from_slice(&response.body).map_err(|e| TrylError::decode(e.to_string()))
    }

    /// Executes a request, discarding the response body.
    pub(crate) async fn call_empty(
        &self,
        cancel: &CancellationToken,
        request: TransportRequest,
    ) -> Result<()> {
        self.call(cancel, request).await.map(|_| ())
    }

    async fn call(
        &self,
        cancel: &CancellationToken,
        request: TransportRequest,
    ) -> Result<TransportResponse> {
        self.retry
            .execute(cancel, || {
                let request = request.clone();
                async move {
                    let response = self.transport.execute(request).await?;
                    if response.status >= 400 {
                        return Err(api_error(&response));
                    }
                    Ok(response)
                }
            })
            .await
    }
}

/// Validates the size and every event of a batch.
///
/// # Errors
///
/// Returns `TrylError::Validation` on the `events` field for an empty or
/// oversized batch, or on `events[i].field` for the first invalid event.
pub fn validate_batch(events: &[Event]) -> Result<()> {
    if events.is_empty() {
        return Err(TrylError::validation("events", "at least one event is required"));
    }
    if events.len() > MAX_EVENTS_PER_BATCH {
        return Err(TrylError::validation(
            "events",
            format!("maximum {MAX_EVENTS_PER_BATCH} events per batch (got: {})", events.len()),
        ));
    }

    for (index, event) in events.iter().enumerate() {
        validate_event(event).map_err(|error| at_batch_index(error, index))?;
    }

    Ok(())
}

/// Serializes a request body.
pub(crate) fn encode_body<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| TrylError::validation("body", format!("failed to encode request: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batch_is_rejected() {
        let error = validate_batch(&[]).unwrap_err();
        assert_eq!(error, TrylError::validation("events", "at least one event is required"));
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let events = vec![Event::new("user_1", "user.created"); MAX_EVENTS_PER_BATCH + 1];

        let TrylError::Validation { field, message } = validate_batch(&events).unwrap_err() else {
            panic!("expected validation error");
        };
        assert_eq!(field, "events");
        assert!(message.contains("got: 101"));
    }

    #[test]
    fn invalid_event_is_reported_by_position() {
        let events = vec![
            Event::new("user_1", "user.created"),
            Event::new("user_2", "user.created"),
            Event::new("user_3", "Bad Action"),
        ];

        let TrylError::Validation { field, .. } = validate_batch(&events).unwrap_err() else {
            panic!("expected validation error");
        };
        assert_eq!(field, "events[2].action");
    }

    #[test]
    fn full_batch_is_accepted() {
        let events = vec![Event::new("user_1", "user.created"); MAX_EVENTS_PER_BATCH];
        assert!(validate_batch(&events).is_ok());
    }
}
