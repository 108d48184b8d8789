//! Error types for event delivery and management operations.
//!
//! Every failure the client can report is a [`TrylError`]. Errors carry enough
//! context to decide whether an operation may be retried, and are `Clone` so a
//! single batch failure can be handed to every submission in that batch.

use std::fmt;

use thiserror::Error;

/// Result type alias for Tryl operations.
pub type Result<T> = std::result::Result<T, TrylError>;

/// Error codes returned by the API.
pub mod codes {
    /// The request was malformed.
    pub const INVALID_REQUEST: &str = "invalid_request";
    /// The request failed server-side validation.
    pub const VALIDATION_ERROR: &str = "validation_error";
    /// The bearer token is missing or invalid.
    pub const UNAUTHORIZED: &str = "unauthorized";
    /// The bearer token lacks the required scope.
    pub const FORBIDDEN: &str = "forbidden";
    /// Generic not-found.
    pub const NOT_FOUND: &str = "not_found";
    /// The referenced project does not exist.
    pub const PROJECT_NOT_FOUND: &str = "project_not_found";
    /// The referenced API key does not exist.
    pub const KEY_NOT_FOUND: &str = "key_not_found";
    /// Too many requests.
    pub const RATE_LIMITED: &str = "rate_limited";
    /// Unexpected server failure.
    pub const INTERNAL_ERROR: &str = "internal_error";
    /// The error body could not be parsed.
    pub const UNKNOWN_ERROR: &str = "unknown_error";
}

/// All error conditions surfaced by the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrylError {
    /// Transport-level failure: connection, timeout, unreadable response.
    #[error("network error during {operation}: {message}")]
    Network {
        /// Operation that failed (e.g. "request")
        operation: String,
        /// Description of the underlying failure
        message: String,
        /// Whether the failure is expected to clear on its own
        temporary: bool,
    },

    /// The API answered with a non-success status.
    #[error("{}", format_api_error(.status, .code, .message, .request_id))]
    Api {
        /// HTTP status code
        status: u16,
        /// Machine-readable error code from the API
        code: String,
        /// Human-readable message from the API
        message: String,
        /// Request identifier for support, when the server sent one
        request_id: Option<String>,
    },

    /// Local rejection before anything was sent.
    #[error("validation error: {field}: {message}")]
    Validation {
        /// Offending field path
        field: String,
        /// What is wrong with it
        message: String,
    },

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Every allowed attempt failed with a retryable error.
    #[error("max retries exceeded after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Error from the final attempt
        last: Box<TrylError>,
    },

    /// The batcher no longer accepts submissions.
    #[error("batcher is stopped")]
    BatcherStopped,

    /// A batch response had no entry for this position.
    #[error("missing response for event at index {index}")]
    MissingResponse {
        /// Position of the event within its batch
        index: usize,
    },

    /// A success response body could not be decoded.
    #[error("failed to parse response: {message}")]
    Decode {
        /// Decoder error message
        message: String,
    },

    /// Invalid client configuration or credentials format.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },
}

fn format_api_error(
    status: &u16,
    code: &str,
    message: &str,
    request_id: &Option<String>,
) -> String {
    match request_id.as_deref() {
        Some(id) if !id.is_empty() => {
            format!("{message} (code={code}, status={status}, request_id={id})")
        },
        _ => format!("{message} (code={code}, status={status})"),
    }
}

impl TrylError {
    /// Creates a network error for the given operation.
    pub fn network(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network { operation: operation.into(), message: message.into(), temporary: true }
    }

    /// Creates a network error that will not clear on retry.
    pub fn permanent_network(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network { operation: operation.into(), message: message.into(), temporary: false }
    }

    /// Creates an API error without a request id.
    pub fn api(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api { status, code: code.into(), message: message.into(), request_id: None }
    }

    /// Creates a validation error for a field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Wraps the last attempt's error once retries run out.
    pub fn retries_exhausted(attempts: u32, last: TrylError) -> Self {
        Self::RetriesExhausted { attempts, last: Box::new(last) }
    }

    /// Returns the innermost cause, looking through `RetriesExhausted`.
    pub fn root_cause(&self) -> &TrylError {
        match self {
            Self::RetriesExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }

    /// Determines if this error represents a temporary failure that should be
    /// retried.
    ///
    /// Network errors are retryable unless marked permanent; API errors are
    /// retryable for 5xx and 429. Everything else is terminal, including an
    /// already exhausted retry sequence.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { temporary, .. } => *temporary,
            Self::Api { status, .. } => *status >= 500 || *status == 429,

            Self::Validation { .. }
            | Self::Cancelled
            | Self::RetriesExhausted { .. }
            | Self::BatcherStopped
            | Self::MissingResponse { .. }
            | Self::Decode { .. }
            | Self::Configuration { .. } => false,
        }
    }

    /// Returns the HTTP status of an API error.
    pub fn status(&self) -> Option<u16> {
        match self.root_cause() {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the API error code, if any.
    pub fn code(&self) -> Option<&str> {
        match self.root_cause() {
            Self::Api { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    /// Reports whether the API rejected the bearer token.
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// Reports whether the API rate limited the request.
    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(429)
    }

    /// Reports whether the request failed validation, locally or server-side.
    pub fn is_validation(&self) -> bool {
        self.is_client_validation() || self.code() == Some(codes::VALIDATION_ERROR)
    }

    /// Reports whether the request was rejected locally, before sending.
    pub fn is_client_validation(&self) -> bool {
        matches!(self.root_cause(), Self::Validation { .. })
    }

    /// Reports whether the referenced project does not exist.
    pub fn is_project_not_found(&self) -> bool {
        self.is_not_found_with(codes::PROJECT_NOT_FOUND)
    }

    /// Reports whether the referenced API key does not exist.
    pub fn is_key_not_found(&self) -> bool {
        self.is_not_found_with(codes::KEY_NOT_FOUND)
    }

    /// Reports whether this error came from a cancelled token.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), Self::Cancelled)
    }

    fn is_not_found_with(&self, specific: &str) -> bool {
        match self.root_cause() {
            Self::Api { status, code, .. } => {
                code == specific || (*status == 404 && code == codes::NOT_FOUND)
            },
            _ => false,
        }
    }
}

/// Category of error for logs and observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transport failures.
    Network,
    /// 4xx responses other than rate limiting.
    Client,
    /// 5xx responses.
    Server,
    /// 429 responses.
    RateLimit,
    /// Local validation.
    Validation,
    /// Cancellation or shutdown.
    Cancelled,
    /// Malformed or incomplete responses.
    Protocol,
    /// Bad configuration.
    Configuration,
}

impl From<&TrylError> for ErrorCategory {
    fn from(error: &TrylError) -> Self {
        match error.root_cause() {
            TrylError::Network { .. } => Self::Network,
            TrylError::Api { status: 429, .. } => Self::RateLimit,
            TrylError::Api { status, .. } if *status >= 500 => Self::Server,
            TrylError::Api { .. } => Self::Client,
            TrylError::Validation { .. } => Self::Validation,
            TrylError::Cancelled | TrylError::BatcherStopped => Self::Cancelled,
            TrylError::MissingResponse { .. } | TrylError::Decode { .. } => Self::Protocol,
            TrylError::Configuration { .. } => Self::Configuration,
            TrylError::RetriesExhausted { .. } => Self::Network,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Validation => write!(f, "validation"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Protocol => write!(f, "protocol"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_identified_correctly() {
        assert!(TrylError::network("request", "connection refused").is_retryable());
        assert!(TrylError::api(500, codes::INTERNAL_ERROR, "boom").is_retryable());
        assert!(TrylError::api(503, codes::INTERNAL_ERROR, "unavailable").is_retryable());
        assert!(TrylError::api(429, codes::RATE_LIMITED, "slow down").is_retryable());

        assert!(!TrylError::permanent_network("request", "bad url").is_retryable());
        assert!(!TrylError::api(400, codes::VALIDATION_ERROR, "bad").is_retryable());
        assert!(!TrylError::api(401, codes::UNAUTHORIZED, "no").is_retryable());
        assert!(!TrylError::api(404, codes::NOT_FOUND, "gone").is_retryable());
        assert!(!TrylError::validation("user_id", "is required").is_retryable());
        assert!(!TrylError::Cancelled.is_retryable());
        assert!(!TrylError::BatcherStopped.is_retryable());
        assert!(!TrylError::retries_exhausted(3, TrylError::network("request", "x")).is_retryable());
    }

    #[test]
    fn classification_looks_through_exhausted_retries() {
        let error = TrylError::retries_exhausted(3, TrylError::api(429, codes::RATE_LIMITED, "x"));
        assert!(error.is_rate_limited());
        assert_eq!(error.status(), Some(429));
        assert_eq!(ErrorCategory::from(&error), ErrorCategory::RateLimit);
    }

    #[test]
    fn not_found_helpers_accept_generic_and_specific_codes() {
        assert!(TrylError::api(404, codes::NOT_FOUND, "x").is_project_not_found());
        assert!(TrylError::api(404, codes::PROJECT_NOT_FOUND, "x").is_project_not_found());
        assert!(TrylError::api(404, codes::KEY_NOT_FOUND, "x").is_key_not_found());
        assert!(!TrylError::api(404, codes::PROJECT_NOT_FOUND, "x").is_key_not_found());
        assert!(!TrylError::api(400, codes::NOT_FOUND, "x").is_key_not_found());
    }

    #[test]
    fn validation_helpers_distinguish_client_and_server() {
        let local = TrylError::validation("action", "is required");
        let remote = TrylError::api(400, codes::VALIDATION_ERROR, "bad action");

        assert!(local.is_validation());
        assert!(local.is_client_validation());
        assert!(remote.is_validation());
        assert!(!remote.is_client_validation());
        assert!(TrylError::api(401, codes::UNAUTHORIZED, "x").is_unauthorized());
    }

    #[test]
    fn error_display_format() {
        let error = TrylError::Api {
            status: 500,
            code: codes::INTERNAL_ERROR.to_string(),
            message: "database unavailable".to_string(),
            request_id: Some("req_123".to_string()),
        };
        assert_eq!(
            error.to_string(),
            "database unavailable (code=internal_error, status=500, request_id=req_123)"
        );

        let error = TrylError::api(400, codes::VALIDATION_ERROR, "bad action");
        assert_eq!(error.to_string(), "bad action (code=validation_error, status=400)");

        let error = TrylError::validation("events[2].action", "is required");
        assert_eq!(error.to_string(), "validation error: events[2].action: is required");
    }
}
