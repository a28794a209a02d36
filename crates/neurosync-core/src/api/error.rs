use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Field name -> server-supplied messages, as returned with a `Validation` failure.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Every failure a request can resolve to. The set is closed: callers can
/// match exhaustively and the retry policy is derived from the variant alone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field_errors: FieldErrors,
    },

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Offline - the server is unreachable")]
    Offline,

    #[error("Invalid response: {0}")]
    ParseError(String),

    #[error("Request failed: {0}")]
    Unknown(String),
}

/// Fieldless tag of an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    NotFound,
    Conflict,
    Validation,
    ServerError,
    Timeout,
    Offline,
    ParseError,
    Unknown,
}

/// What the dispatcher may do after a failure of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Surface to the caller immediately.
    Terminal,
    /// Retry once after a bounded backoff, idempotent requests only.
    RetryOnce,
    /// Refresh the session, then retry once with the new token.
    RefreshThenRetry,
}

impl ErrorKind {
    pub fn retry_policy(self) -> RetryPolicy {
        match self {
            ErrorKind::Timeout | ErrorKind::ServerError => RetryPolicy::RetryOnce,
            ErrorKind::Unauthorized => RetryPolicy::RefreshThenRetry,
            ErrorKind::NotFound
            | ErrorKind::Conflict
            | ErrorKind::Validation
            | ErrorKind::Offline
            | ErrorKind::ParseError
            | ErrorKind::Unknown => RetryPolicy::Terminal,
        }
    }

    /// True for kinds recovered by a plain retry.
    pub fn retriable(self) -> bool {
        self.retry_policy() == RetryPolicy::RetryOnce
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Validation => "validation",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Offline => "offline",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Maximum length for error response bodies in log output
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Unauthorized(_) => ErrorKind::Unauthorized,
            ApiError::NotFound(_) => ErrorKind::NotFound,
            ApiError::Conflict(_) => ErrorKind::Conflict,
            ApiError::Validation { .. } => ErrorKind::Validation,
            ApiError::ServerError { .. } => ErrorKind::ServerError,
            ApiError::Timeout(_) => ErrorKind::Timeout,
            ApiError::Offline => ErrorKind::Offline,
            ApiError::ParseError(_) => ErrorKind::ParseError,
            ApiError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    pub fn retriable(&self) -> bool {
        self.kind().retriable()
    }

    /// Human-readable message without the kind prefix, safe to show to users.
    pub fn message(&self) -> String {
        match self {
            ApiError::Unauthorized(m)
            | ApiError::NotFound(m)
            | ApiError::Conflict(m)
            | ApiError::Timeout(m)
            | ApiError::ParseError(m)
            | ApiError::Unknown(m) => m.clone(),
            ApiError::Validation { message, .. } | ApiError::ServerError { message, .. } => {
                message.clone()
            }
            ApiError::Offline => "The server is unreachable".to_string(),
        }
    }

    /// Field-level messages for `Validation` failures, empty otherwise.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            ApiError::Validation { field_errors, .. } => Some(field_errors),
            _ => None,
        }
    }

    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_by_kind() {
        assert_eq!(ErrorKind::Timeout.retry_policy(), RetryPolicy::RetryOnce);
        assert_eq!(ErrorKind::ServerError.retry_policy(), RetryPolicy::RetryOnce);
        assert_eq!(ErrorKind::Unauthorized.retry_policy(), RetryPolicy::RefreshThenRetry);
        for kind in [
            ErrorKind::NotFound,
            ErrorKind::Conflict,
            ErrorKind::Validation,
            ErrorKind::Offline,
            ErrorKind::ParseError,
            ErrorKind::Unknown,
        ] {
            assert_eq!(kind.retry_policy(), RetryPolicy::Terminal, "{kind}");
            assert!(!kind.retriable());
        }
    }

    #[test]
    fn test_kind_matches_variant() {
        let err = ApiError::Validation {
            message: "bad".to_string(),
            field_errors: FieldErrors::new(),
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.field_errors().is_some());
        assert_eq!(ApiError::Offline.kind(), ErrorKind::Offline);
        assert!(ApiError::Offline.field_errors().is_none());
    }

    #[test]
    fn test_truncate_body() {
        let short = "short body";
        assert_eq!(ApiError::truncate_body(short), short);

        let long = "é".repeat(400);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.contains("truncated, 800 total bytes"));
    }
}
