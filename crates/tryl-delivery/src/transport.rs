//! HTTP transport for API round trips.
//!
//! The delivery pipeline talks to the API through the [`Transport`] trait so
//! tests can substitute scripted responses. [`HttpTransport`] is the reqwest
//! implementation used in production; it handles authentication headers and
//! reports transport failures separately from non-2xx responses.

use std::{collections::HashMap, fmt, future::Future, pin::Pin, time::Duration};

use bytes::Bytes;
use reqwest::{header::HeaderMap, Method};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};
use tryl_core::{codes, TrylError};

/// Header carrying the server-assigned request identifier.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// A single API request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the base URL, starting with `/`.
    pub path: String,
    /// Query parameters in order.
    pub query: Vec<(String, String)>,
    /// JSON body, if any.
    pub body: Option<Bytes>,
}

impl TransportRequest {
    /// Creates a request without query or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), query: Vec::new(), body: None }
    }

    /// Attaches query parameters.
    #[must_use]
    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    /// Attaches a JSON body.
    #[must_use]
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }
}

/// Raw API response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Bytes,
    /// Response headers with lowercase names.
    pub headers: HashMap<String, String>,
    /// Value of the `X-Request-ID` header, if present.
    pub request_id: Option<String>,
}

impl TransportResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure to complete a round trip at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request did not complete in time.
    #[error("request timed out: {0}")]
    Timeout(String),
    /// A connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),
    /// The request could not be built; retrying will not help.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Any other I/O failure while sending or reading.
    #[error("{0}")]
    Io(String),
}

impl TransportError {
    /// Whether the failure may clear on retry.
    pub fn is_temporary(&self) -> bool {
        !matches!(self, Self::InvalidRequest(_))
    }
}

impl From<TransportError> for TrylError {
    fn from(error: TransportError) -> Self {
        let temporary = error.is_temporary();
        TrylError::Network { operation: "request".to_string(), message: error.to_string(), temporary }
    }
}

/// Future returned by [`Transport::execute`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + 'a>>;

/// A way of executing API requests.
pub trait Transport: Send + Sync + 'static {
    /// Executes one request and returns the raw response.
    ///
    /// Non-2xx responses are returned as `Ok`; only failures to complete the
    /// round trip are errors.
    fn execute(&self, request: TransportRequest) -> TransportFuture<'_>;
}

/// Settings for [`HttpTransport`].
#[derive(Clone)]
pub struct HttpTransportConfig {
    /// API base URL without trailing slash.
    pub base_url: String,
    /// Bearer token (API key or session token).
    pub token: String,
    /// Full User-Agent header value.
    pub user_agent: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl fmt::Debug for HttpTransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransportConfig")
            .field("base_url", &self.base_url)
            .field("token", &"***")
            .field("user_agent", &self.user_agent)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    /// Creates a transport with its own connection pool.
    ///
    /// # Errors
    ///
    /// Returns `TrylError::Configuration` if the HTTP client cannot be built.
    pub fn new(config: HttpTransportConfig) -> tryl_core::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| TrylError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let url = format!("{}{}", self.config.base_url, request.path);

        let mut http_request = self
            .client
            .request(request.method.clone(), &url)
            .bearer_auth(&self.config.token)
            .header("content-type", "application/json")
            .header("accept", "application/json");

        if !request.query.is_empty() {
            http_request = http_request.query(&request.query);
        }
        if let Some(body) = request.body {
            http_request = http_request.body(body);
        }

        let response = http_request.send().await.map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let headers = extract_headers(response.headers());
        let request_id = headers.get(REQUEST_ID_HEADER).cloned();

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Io(format!("failed to read response body: {e}")))?;

        debug!(status, bytes = body.len(), "received response");

        Ok(TransportResponse { status, body, headers, request_id })
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: TransportRequest) -> TransportFuture<'_> {
        let span = info_span!("tryl_request", method = %request.method, path = %request.path);
        Box::pin(self.send(request).instrument(span))
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else if error.is_builder() {
        TransportError::InvalidRequest(error.to_string())
    } else {
        TransportError::Io(error.to_string())
    }
}

/// Extracts headers into a map keyed by lowercase name.
fn extract_headers(header_map: &HeaderMap) -> HashMap<String, String> {
    header_map
        .iter()
        .filter_map(|(key, value)| {
            value.to_str().ok().map(|v| (key.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Converts a non-2xx response into `TrylError::Api`.
///
/// Uses the `{"error": {"code", "message"}}` envelope when present and falls
/// back to the raw body otherwise.
pub fn api_error(response: &TransportResponse) -> TrylError {
    let (code, message) = match serde_json::from_slice::<ErrorEnvelope>(&response.body) {
        Ok(envelope) => (envelope.error.code, envelope.error.message),
        Err(_) => (
            codes::UNKNOWN_ERROR.to_string(),
            format!("HTTP {}: {}", response.status, String::from_utf8_lossy(&response.body)),
        ),
    };

    TrylError::Api { status: response.status, code, message, request_id: response.request_id.clone() }
}

#[cfg(test)]
mod tests {
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn transport_for(server: &MockServer) -> HttpTransport {
        HttpTransport::new(HttpTransportConfig {
            base_url: server.uri(),
            token: "actlog_test_1234567890abcdef1234567890abcdef".to_string(),
            user_agent: "tryl-rust/test".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn response(status: u16, body: &str) -> TransportResponse {
        TransportResponse {
            status,
            body: Bytes::from(body.to_string()),
            headers: HashMap::new(),
            request_id: None,
        }
    }

    #[tokio::test]
    async fn sends_auth_and_content_headers() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/v1/events"))
            .and(matchers::header(
                "authorization",
                "Bearer actlog_test_1234567890abcdef1234567890abcdef",
            ))
            .and(matchers::header("content-type", "application/json"))
            .and(matchers::header("accept", "application/json"))
            .and(matchers::header("user-agent", "tryl-rust/test"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("X-Request-ID", "req_42")
                    .set_body_string(r#"{"id":"evt_1"}"#),
            )
            .mount(&server)
            .await;

        let request = TransportRequest::new(Method::POST, "/v1/events")
            .with_body(Bytes::from_static(b"{}"));
        let response = transport_for(&server).execute(request).await.unwrap();

        assert_eq!(response.status, 201);
        assert_eq!(response.request_id.as_deref(), Some("req_42"));
        assert_eq!(&response.body[..], br#"{"id":"evt_1"}"#);
    }

    #[tokio::test]
    async fn non_success_status_is_not_a_transport_error() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let response = transport_for(&server)
            .execute(TransportRequest::new(Method::GET, "/v1/events"))
            .await
            .unwrap();

        assert_eq!(response.status, 503);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn query_parameters_are_encoded() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::query_param("action", "org.*"))
            .and(matchers::query_param("limit", "10"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let request = TransportRequest::new(Method::GET, "/v1/events").with_query(vec![
            ("action".to_string(), "org.*".to_string()),
            ("limit".to_string(), "10".to_string()),
        ]);
        let response = transport_for(&server).execute(request).await.unwrap();

        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn connection_failure_is_temporary_network_error() {
        let transport = HttpTransport::new(HttpTransportConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            token: "t".to_string(),
            user_agent: "tryl-rust/test".to_string(),
            timeout: Duration::from_secs(2),
        })
        .unwrap();

        let error = transport
            .execute(TransportRequest::new(Method::GET, "/v1/events"))
            .await
            .unwrap_err();

        assert!(error.is_temporary());
        assert!(TrylError::from(error).is_retryable());
    }

    #[test]
    fn api_error_uses_error_envelope() {
        let mut response =
            response(404, r#"{"error":{"code":"project_not_found","message":"no such project"}}"#);
        response.request_id = Some("req_9".to_string());

        let error = api_error(&response);
        assert!(error.is_project_not_found());
        assert_eq!(
            error,
            TrylError::Api {
                status: 404,
                code: "project_not_found".to_string(),
                message: "no such project".to_string(),
                request_id: Some("req_9".to_string()),
            }
        );
    }

    #[test]
    fn api_error_falls_back_to_raw_body() {
        let error = api_error(&response(502, "Bad Gateway"));

        assert_eq!(error.code(), Some(codes::UNKNOWN_ERROR));
        assert!(error.to_string().starts_with("HTTP 502: Bad Gateway"));
        assert!(error.is_retryable());
    }
}
