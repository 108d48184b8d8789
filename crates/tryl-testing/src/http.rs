//! HTTP mocking of the Tryl API.

use std::time::Duration;

use serde_json::Value;
use tryl_core::{BatchResponse, EventReceipt};
use tryl_delivery::{
    dispatcher::{BATCH_PATH, EVENTS_PATH},
    ClientBuilder, RetryPolicy,
};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, Request, Respond, ResponseTemplate,
};

use crate::fixtures;

/// Retry policy with millisecond delays for HTTP-level tests.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
        jitter_factor: 0.0,
    }
}

/// Mock Tryl API server on a random local port.
pub struct ApiServer {
    server: MockServer,
}

impl ApiServer {
    /// Starts the server.
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    /// Base URL of the server.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Client builder pointed at this server with a test API key and fast
    /// retries.
    pub fn client_builder(&self) -> ClientBuilder {
        ClientBuilder::new(fixtures::TEST_API_KEY).base_url(self.url()).retry(fast_retry())
    }

    /// Management client builder pointed at this server.
    pub fn management_builder(&self) -> ClientBuilder {
        ClientBuilder::management(fixtures::SESSION_TOKEN).base_url(self.url()).retry(fast_retry())
    }

    /// Direct access for custom mocks.
    pub fn inner(&self) -> &MockServer {
        &self.server
    }

    /// Answers `POST /v1/events` with the receipt.
    pub async fn mock_log_success(&self, receipt: &EventReceipt) {
        Mock::given(method("POST"))
            .and(path(EVENTS_PATH))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("X-Request-ID", "req_log")
                    .set_body_json(receipt),
            )
            .mount(&self.server)
            .await;
    }

    /// Answers every batch with one receipt per submitted event.
    pub async fn mock_batch_echo(&self) {
        Mock::given(method("POST"))
            .and(path(BATCH_PATH))
            .respond_with(BatchEcho)
            .mount(&self.server)
            .await;
    }

    /// Answers batches with a fixed body and status (e.g. 207).
    pub async fn mock_batch_response(&self, status: u16, response: &BatchResponse) {
        Mock::given(method("POST"))
            .and(path(BATCH_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_json(response))
            .mount(&self.server)
            .await;
    }

    /// Answers `method path` with a JSON body.
    pub async fn mock_json(&self, http_method: &str, request_path: &str, status: u16, body: Value) {
        Mock::given(method(http_method))
            .and(path(request_path))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Answers `method path` with an API error, `times` times (or always
    /// with `None`).
    pub async fn mock_error(
        &self,
        http_method: &str,
        request_path: &str,
        status: u16,
        code: &str,
        message: &str,
        times: Option<u64>,
    ) {
        let mock = Mock::given(method(http_method)).and(path(request_path)).respond_with(
            ResponseTemplate::new(status)
                .insert_header("X-Request-ID", "req_error")
                .set_body_json(fixtures::error_body(code, message)),
        );

        match times {
            Some(times) => mock.up_to_n_times(times).with_priority(1).mount(&self.server).await,
            None => mock.mount(&self.server).await,
        }
    }

    /// Requests received so far.
    pub async fn received_requests(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    /// Asserts that exactly `expected` requests were received.
    pub async fn assert_request_count(&self, expected: usize) {
        let requests = self.received_requests().await;
        assert_eq!(
            requests.len(),
            expected,
            "Expected {} requests, received {}",
            expected,
            requests.len()
        );
    }
}

/// Responds to a batch request with a receipt per event, in order.
struct BatchEcho;

impl Respond for BatchEcho {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let count = serde_json::from_slice::<Value>(&request.body)
            .ok()
            .and_then(|body| body.get("events").and_then(Value::as_array).map(Vec::len))
            .unwrap_or(0);

        ResponseTemplate::new(200).set_body_json(fixtures::batch_success(count, 0))
    }
}
