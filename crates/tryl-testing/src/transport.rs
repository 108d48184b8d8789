//! In-memory transport with scripted replies.
//!
//! [`ScriptedTransport`] answers requests from a queue of canned replies,
//! records every request it sees, and can hold replies behind a gate so
//! tests control exactly when a send completes.

use std::{collections::VecDeque, sync::Arc};

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex, Semaphore};
use tryl_core::{BatchResponse, Event, EventReceipt};
use tryl_delivery::{
    dispatcher::BATCH_PATH, Transport, TransportError, TransportFuture, TransportRequest,
    TransportResponse,
};

use crate::fixtures;

/// One canned reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Respond with this status and body.
    Response {
        /// HTTP status
        status: u16,
        /// Response body
        body: Bytes,
    },
    /// Fail the round trip.
    Error(TransportError),
}

impl ScriptedReply {
    /// A response with a JSON body.
    pub fn json<T: Serialize>(status: u16, body: &T) -> Self {
        let body = serde_json::to_vec(body).map(Bytes::from).unwrap_or_default();
        Self::Response { status, body }
    }

    /// An API error response in the standard envelope.
    pub fn api_error(status: u16, code: &str, message: &str) -> Self {
        Self::json(status, &fixtures::error_body(code, message))
    }

    /// A connection failure.
    pub fn connection_refused() -> Self {
        Self::Error(TransportError::Connect("connection refused".to_string()))
    }
}

/// Transport that replays scripted replies.
///
/// When the script is empty the transport falls back to the configured
/// default reply, or, with none configured, accepts everything: batch
/// requests get one receipt per event and single events get one receipt.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<ScriptedReply>>,
    fallback: Mutex<Option<ScriptedReply>>,
    requests: Mutex<Vec<TransportRequest>>,
    request_count: watch::Sender<usize>,
    gate: Option<Arc<Semaphore>>,
    next_id: Mutex<usize>,
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("requests", &*self.request_count.borrow())
            .field("gated", &self.gate.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    /// Creates a transport that accepts everything until scripted otherwise.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            request_count: watch::channel(0).0,
            gate: None,
            next_id: Mutex::new(0),
        }
    }

    /// Creates a transport that holds each reply until [`Self::release`]
    /// grants it.
    pub fn gated() -> Self {
        Self { gate: Some(Arc::new(Semaphore::new(0))), ..Self::new() }
    }

    /// Creates a transport that fails every request the same way.
    pub fn failing(reply: ScriptedReply) -> Self {
        Self { fallback: Mutex::new(Some(reply)), ..Self::new() }
    }

    /// Appends a reply to the script.
    pub async fn push(&self, reply: ScriptedReply) {
        self.script.lock().await.push_back(reply);
    }

    /// Appends a JSON response.
    pub async fn push_json<T: Serialize>(&self, status: u16, body: &T) {
        self.push(ScriptedReply::json(status, body)).await;
    }

    /// Appends a batch response.
    pub async fn push_batch(&self, response: &BatchResponse) {
        self.push_json(200, response).await;
    }

    /// Appends an API error response.
    pub async fn push_api_error(&self, status: u16, code: &str, message: &str) {
        self.push(ScriptedReply::api_error(status, code, message)).await;
    }

    /// Appends a transport failure.
    pub async fn push_error(&self, error: TransportError) {
        self.push(ScriptedReply::Error(error)).await;
    }

    /// Lets `permits` held replies complete.
    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    /// Every request received so far, in order.
    pub async fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().await.clone()
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        *self.request_count.borrow()
    }

    /// Waits until at least `count` requests have arrived.
    pub async fn wait_for_requests(&self, count: usize) {
        let mut receiver = self.request_count.subscribe();
        let _ = receiver.wait_for(|seen| *seen >= count).await;
    }

    /// Events of every batch request, in send order.
    pub async fn batches(&self) -> Vec<Vec<Event>> {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|request| request.path == BATCH_PATH)
            .filter_map(|request| decode_batch(request.body.as_ref()?))
            .collect()
    }

    /// Sizes of every batch request, in send order.
    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.batches().await.iter().map(Vec::len).collect()
    }

    async fn reply_to(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().await.push(request.clone());
        self.request_count.send_modify(|count| *count += 1);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let scripted = self.script.lock().await.pop_front();
        let reply = match scripted {
            Some(reply) => reply,
            None => match self.fallback.lock().await.clone() {
                Some(reply) => reply,
                None => self.accept(&request).await,
            },
        };

        match reply {
            ScriptedReply::Response { status, body } => Ok(TransportResponse {
                status,
                body,
                headers: Default::default(),
                request_id: Some(format!("req_{}", self.request_count())),
            }),
            ScriptedReply::Error(error) => Err(error),
        }
    }

    async fn accept(&self, request: &TransportRequest) -> ScriptedReply {
        let count = if request.path == BATCH_PATH {
            request.body.as_ref().and_then(decode_batch).map_or(0, |events| events.len())
        } else {
            1
        };

        let mut next_id = self.next_id.lock().await;
        let offset = *next_id;
        *next_id += count;

        if request.path == BATCH_PATH {
            ScriptedReply::json(200, &fixtures::batch_success(count, offset))
        } else {
            let receipt: EventReceipt = fixtures::receipt(fixtures::receipt_id(offset));
            ScriptedReply::json(201, &receipt)
        }
    }
}

impl Transport for ScriptedTransport {
    fn execute(&self, request: TransportRequest) -> TransportFuture<'_> {
        Box::pin(self.reply_to(request))
    }
}

fn decode_batch(body: &Bytes) -> Option<Vec<Event>> {
    let value: Value = serde_json::from_slice(body).ok()?;
    serde_json::from_value(value.get("events")?.clone()).ok()
}
