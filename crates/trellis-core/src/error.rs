//! Error types for Trellis.
//!
//! This module provides [`TrellisError`], the error type that flows through
//! the middleware chain and out of handlers. Every recognized variant carries
//! an HTTP status and a numeric `err_code` that the outermost chain stage
//! serializes into the response body:
//!
//! | Variant | Status | `err_code` |
//! |---|---|---|
//! | `BadRequest` | 400 | 100 |
//! | `NotFound` | 404 | 104 |
//! | `AuthenticationFailed` | 401 | 401 |
//! | `ExpiredToken` | 401 | 402 |
//! | `InvalidToken` | 401 | 403 |
//! | `Application` | custom | custom |
//! | `Internal` | 500 | none |
//!
//! Internal errors never leak their message to clients: they serialize as
//! `{"err_msg": ""}`.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`TrellisError`].
pub type TrellisResult<T> = Result<T, TrellisError>;

/// Numeric error code for [`TrellisError::BadRequest`].
pub const BAD_REQUEST_CODE: u32 = 100;
/// Numeric error code for [`TrellisError::NotFound`].
pub const NOT_FOUND_CODE: u32 = 104;
/// Numeric error code for [`TrellisError::AuthenticationFailed`].
pub const AUTHENTICATION_FAILED_CODE: u32 = 401;
/// Numeric error code for [`TrellisError::ExpiredToken`].
pub const EXPIRED_TOKEN_CODE: u32 = 402;
/// Numeric error code for [`TrellisError::InvalidToken`].
pub const INVALID_TOKEN_CODE: u32 = 403;

/// Standard error type for request processing.
///
/// # Example
///
/// ```
/// use trellis_core::TrellisError;
///
/// fn lookup(path: &str) -> Result<(), TrellisError> {
///     if path.is_empty() {
///         return Err(TrellisError::bad_request("empty path"));
///     }
///     Err(TrellisError::not_found(format!("no route for {path}")))
/// }
///
/// let err = lookup("/missing").unwrap_err();
/// assert_eq!(err.status_code().as_u16(), 404);
/// assert_eq!(err.error_code(), Some(104));
/// ```
#[derive(Error, Debug)]
pub enum TrellisError {
    /// The request carried an invalid method, path or body.
    #[error("{message}")]
    BadRequest {
        /// Human-readable error message.
        message: String,
    },

    /// No route or mounted application matched the request.
    #[error("{message}")]
    NotFound {
        /// Human-readable error message.
        message: String,
    },

    /// Required credentials were absent.
    #[error("{message}")]
    AuthenticationFailed {
        /// Human-readable error message.
        message: String,
    },

    /// The presented token is older than its expiry window.
    #[error("{message}")]
    ExpiredToken {
        /// Human-readable error message.
        message: String,
    },

    /// The presented token does not match the persisted one.
    #[error("{message}")]
    InvalidToken {
        /// Human-readable error message.
        message: String,
    },

    /// Application-defined error with its own status and code.
    #[error("{message}")]
    Application {
        /// HTTP status to respond with.
        status: StatusCode,
        /// Client-facing error code; `None` hides the message.
        error_code: Option<u32>,
        /// Human-readable error message.
        message: String,
    },

    /// Unclassified failure. The message is logged, never sent to clients.
    #[error("Internal error: {message}")]
    Internal {
        /// Message for logs.
        message: String,
        /// The underlying error (not exposed to clients).
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl TrellisError {
    /// Creates a bad request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates an authentication failure.
    #[must_use]
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            message: message.into(),
        }
    }

    /// Creates an expired token error.
    #[must_use]
    pub fn expired_token(message: impl Into<String>) -> Self {
        Self::ExpiredToken {
            message: message.into(),
        }
    }

    /// Creates an invalid token error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates an application error with an explicit status and code.
    #[must_use]
    pub fn application(status: StatusCode, error_code: u32, message: impl Into<String>) -> Self {
        Self::Application {
            status,
            error_code: Some(error_code),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an internal error wrapping another error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::AuthenticationFailed { .. }
            | Self::ExpiredToken { .. }
            | Self::InvalidToken { .. } => StatusCode::UNAUTHORIZED,
            Self::Application { status, .. } => *status,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the client-facing error code, if this error is recognized.
    #[must_use]
    pub fn error_code(&self) -> Option<u32> {
        match self {
            Self::BadRequest { .. } => Some(BAD_REQUEST_CODE),
            Self::NotFound { .. } => Some(NOT_FOUND_CODE),
            Self::AuthenticationFailed { .. } => Some(AUTHENTICATION_FAILED_CODE),
            Self::ExpiredToken { .. } => Some(EXPIRED_TOKEN_CODE),
            Self::InvalidToken { .. } => Some(INVALID_TOKEN_CODE),
            Self::Application { error_code, .. } => *error_code,
            Self::Internal { .. } => None,
        }
    }

    /// Returns true if this error is one clients are allowed to see.
    #[must_use]
    pub fn is_recognized(&self) -> bool {
        self.error_code().is_some()
    }

    /// Builds the JSON body sent to clients for this error.
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        match self.error_code() {
            Some(code) => ErrorBody {
                err_msg: self.to_string(),
                err_code: Some(code),
            },
            None => ErrorBody {
                err_msg: String::new(),
                err_code: None,
            },
        }
    }
}

impl From<serde_json::Error> for TrellisError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal_with_source("JSON serialization failed", err)
    }
}

/// Client-facing error envelope: `{"err_msg": ..., "err_code": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error message; empty for internal errors.
    pub err_msg: String,
    /// Numeric error code; omitted for internal errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err_code: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_codes() {
        let cases = [
            (TrellisError::bad_request("x"), 400, Some(100)),
            (TrellisError::not_found("x"), 404, Some(104)),
            (TrellisError::authentication_failed("x"), 401, Some(401)),
            (TrellisError::expired_token("x"), 401, Some(402)),
            (TrellisError::invalid_token("x"), 401, Some(403)),
            (TrellisError::internal("x"), 500, None),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status_code().as_u16(), status, "{err:?}");
            assert_eq!(err.error_code(), code, "{err:?}");
        }
    }

    #[test]
    fn test_recognized_error_body() {
        let body = TrellisError::not_found("Resource Handler not found").to_body();
        assert_eq!(body.err_msg, "Resource Handler not found");
        assert_eq!(body.err_code, Some(104));

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"err_msg": "Resource Handler not found", "err_code": 104})
        );
    }

    #[test]
    fn test_internal_error_hides_message() {
        let err = TrellisError::internal_with_source(
            "database exploded",
            std::io::Error::new(std::io::ErrorKind::Other, "disk"),
        );
        assert!(err.to_string().contains("database exploded"));
        assert!(std::error::Error::source(&err).is_some());

        let json = serde_json::to_value(err.to_body()).unwrap();
        assert_eq!(json, serde_json::json!({"err_msg": ""}));
    }

    #[test]
    fn test_application_error_without_code_is_opaque() {
        let err = TrellisError::Application {
            status: StatusCode::CONFLICT,
            error_code: None,
            message: "row locked".into(),
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(!err.is_recognized());
        assert_eq!(err.to_body().err_msg, "");
    }

    #[test]
    fn test_application_error_with_code() {
        let err = TrellisError::application(StatusCode::PAYMENT_REQUIRED, 7, "quota");
        assert_eq!(err.to_body().err_code, Some(7));
        assert_eq!(err.to_body().err_msg, "quota");
    }
}
