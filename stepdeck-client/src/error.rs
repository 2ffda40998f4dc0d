//! Error types for the Stepdeck client

use std::time::Duration;
use thiserror::Error;

/// Result type alias for remote operations
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Classification of a remote failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    Throttled,
    NotFound,
    InvalidState,
    Unauthorized,
    Transient,
    Malformed,
    Unknown,
}

/// Errors returned by the remote workflow service
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Rate limit hit; retried with backoff
    #[error("Request throttled: {0}")]
    Throttled(String),

    /// Execution or state machine does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the execution's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Credentials missing, expired or lacking permission
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Network failure, timeout or 5xx; retried with backoff
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The service answered with a body that could not be decoded
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Anything else; surfaced, never swallowed
    #[error("Remote error: {0}")]
    Unknown(String),
}

impl RemoteError {
    pub fn kind(&self) -> RemoteErrorKind {
        match self {
            RemoteError::Throttled(_) => RemoteErrorKind::Throttled,
            RemoteError::NotFound(_) => RemoteErrorKind::NotFound,
            RemoteError::InvalidState(_) => RemoteErrorKind::InvalidState,
            RemoteError::Unauthorized(_) => RemoteErrorKind::Unauthorized,
            RemoteError::Transient(_) => RemoteErrorKind::Transient,
            RemoteError::Malformed(_) => RemoteErrorKind::Malformed,
            RemoteError::Unknown(_) => RemoteErrorKind::Unknown,
        }
    }

    /// Only throttling and transient failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            RemoteErrorKind::Throttled | RemoteErrorKind::Transient
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == RemoteErrorKind::NotFound
    }

    pub fn is_malformed(&self) -> bool {
        self.kind() == RemoteErrorKind::Malformed
    }

    /// The whole call, retries included, ran past its deadline
    pub fn deadline_exceeded(operation: &str, deadline: Duration) -> Self {
        RemoteError::Transient(format!(
            "{} did not complete within {:?}",
            operation, deadline
        ))
    }

    /// Classify an error response from the workflow API
    ///
    /// # Arguments
    /// * `status` - HTTP status code
    /// * `error_type` - the `__type` field of the error body, if any
    /// * `message` - human readable message from the body
    pub fn from_api(status: u16, error_type: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        // "com.amazonaws.swf.base.model#ThrottlingException" -> "ThrottlingException"
        let short_type = error_type
            .map(|t| t.rsplit('#').next().unwrap_or(t))
            .map(|t| t.split(':').next().unwrap_or(t));
        let detail = match short_type {
            Some(t) => format!("{}: {}", t, message),
            None => format!("HTTP {}: {}", status, message),
        };

        match short_type {
            Some(
                "ThrottlingException"
                | "TooManyRequestsException"
                | "RequestLimitExceeded"
                | "Throttling",
            ) => return RemoteError::Throttled(detail),
            Some(
                "ExecutionDoesNotExist"
                | "StateMachineDoesNotExist"
                | "ResourceNotFound"
                | "ResourceNotFoundException",
            ) => return RemoteError::NotFound(detail),
            Some(
                "ExecutionNotRedrivable"
                | "ExecutionAlreadyExists"
                | "ExecutionLimitExceeded"
                | "StateMachineDeleting"
                | "ConflictException",
            ) => return RemoteError::InvalidState(detail),
            Some(
                "AccessDeniedException"
                | "UnrecognizedClientException"
                | "InvalidSignatureException"
                | "ExpiredTokenException"
                | "MissingAuthenticationToken",
            ) => return RemoteError::Unauthorized(detail),
            Some(
                "ServiceUnavailable"
                | "ServiceUnavailableException"
                | "InternalFailure"
                | "InternalServerError",
            ) => return RemoteError::Transient(detail),
            _ => {}
        }

        match status {
            429 => RemoteError::Throttled(detail),
            401 | 403 => RemoteError::Unauthorized(detail),
            404 => RemoteError::NotFound(detail),
            409 => RemoteError::InvalidState(detail),
            500..=599 => RemoteError::Transient(detail),
            _ => RemoteError::Unknown(detail),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            RemoteError::Transient(format!("HTTP request failed: {}", err))
        } else if err.is_decode() {
            RemoteError::Malformed(format!("Failed to parse response: {}", err))
        } else {
            RemoteError::Unknown(format!("HTTP request failed: {}", err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifies_error_types() {
        let throttled = RemoteError::from_api(
            400,
            Some("com.amazonaws.swf.base.model#ThrottlingException"),
            "Rate exceeded",
        );
        assert_eq!(throttled.kind(), RemoteErrorKind::Throttled);
        assert!(throttled.is_retryable());

        let missing = RemoteError::from_api(400, Some("ExecutionDoesNotExist"), "gone");
        assert!(missing.is_not_found());
        assert!(!missing.is_retryable());

        let not_redrivable = RemoteError::from_api(400, Some("ExecutionNotRedrivable"), "no");
        assert_eq!(not_redrivable.kind(), RemoteErrorKind::InvalidState);

        let denied = RemoteError::from_api(400, Some("AccessDeniedException"), "denied");
        assert_eq!(denied.kind(), RemoteErrorKind::Unauthorized);
    }

    #[test]
    fn test_falls_back_to_status_code() {
        assert_eq!(
            RemoteError::from_api(503, None, "down").kind(),
            RemoteErrorKind::Transient
        );
        assert_eq!(
            RemoteError::from_api(429, None, "slow down").kind(),
            RemoteErrorKind::Throttled
        );
        assert_eq!(
            RemoteError::from_api(403, None, "nope").kind(),
            RemoteErrorKind::Unauthorized
        );
        assert_eq!(
            RemoteError::from_api(400, Some("ValidationException"), "bad").kind(),
            RemoteErrorKind::Unknown
        );
    }

    #[test]
    fn test_deadline_is_transient() {
        let err = RemoteError::deadline_exceeded("DescribeExecution", Duration::from_secs(3));
        assert_eq!(err.kind(), RemoteErrorKind::Transient);
        assert!(err.to_string().contains("DescribeExecution"));
    }

    #[test]
    fn test_malformed_is_not_retried() {
        let err = RemoteError::Malformed("missing field `status`".to_string());
        assert!(err.is_malformed());
        assert!(!err.is_retryable());
    }
}
