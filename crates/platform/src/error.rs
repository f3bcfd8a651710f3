//! Platform Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Adapters translate whatever their
//! provider returns (HTTP status codes, error envelopes inside a `200`, fetch
//! failures) into one of these kinds so the engine can decide whether a
//! retry is worthwhile.

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

/// A platform error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for platform operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
///
/// ### Transient
/// - [`ErrorKind::Network`], [`ErrorKind::Timeout`], [`ErrorKind::Aborted`]
/// - [`ErrorKind::RateLimited`], [`ErrorKind::Server`]
///
/// ### Permanent
/// - [`ErrorKind::PermissionDenied`], [`ErrorKind::NotFound`],
///   [`ErrorKind::InvalidName`], [`ErrorKind::AlreadyExists`]
///
/// ### Provider-specific
/// - [`ErrorKind::Api`] - only the caller knows which codes are transient for
///   a given provider, see `RetryPolicy` in the engine.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection or fetch failure before a response was received.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// The adapter's per-request timeout elapsed.
    #[display("request timed out")]
    Timeout,
    /// The request was aborted before completion.
    #[display("request aborted")]
    Aborted,
    /// Provider throttled the request (HTTP 429 or equivalent).
    #[display("rate limited by provider")]
    RateLimited,
    /// Provider-side fault (HTTP 5xx or equivalent).
    #[display("server error: {_0}")]
    Server(#[error(not(source))] u16),
    /// Error envelope returned by the provider API.
    #[display("api error {code}: {message}")]
    Api { code: String, message: String },
    /// Access to the file was refused.
    #[display("permission denied: {_0}")]
    PermissionDenied(#[error(not(source))] String),
    /// No file with that identifier exists.
    #[display("file not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The provider (or local validation) rejected the target name.
    #[display("invalid name: {_0}")]
    InvalidName(#[error(not(source))] String),
    /// Another file already uses the target name.
    #[display("name already exists: {_0}")]
    AlreadyExists(#[error(not(source))] String),
    /// The live name of a file matches neither the expected old name nor the
    /// intended new name; it was probably renamed out-of-band.
    #[display("name mismatch for {id}: expected `{expected}`, found `{actual}`")]
    NameMismatch { id: String, expected: String, actual: String },
    /// Adapter-specific failure that doesn't fit elsewhere.
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// [`ErrorKind::Api`] is never considered retryable here because the code
    /// meanings are provider-specific.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout | Self::Aborted | Self::RateLimited | Self::Server(_))
    }

    /// Short machine-readable code, stable across releases.
    pub fn code(&self) -> &str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout => "timeout",
            Self::Aborted => "aborted",
            Self::RateLimited => "rate_limited",
            Self::Server(_) => "server",
            Self::Api { code, .. } => code,
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotFound(_) => "not_found",
            Self::InvalidName(_) => "invalid_name",
            Self::AlreadyExists(_) => "already_exists",
            Self::NameMismatch { .. } => "name_mismatch",
            Self::BackendError(_) => "backend",
        }
    }
}

/// Serialisable projection of an [`ErrorKind`], attached to failed rename
/// results so that consumers never have to deal with the error tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}
impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self { code: code.into(), message: message.into(), retryable }
    }
}
impl From<&ErrorKind> for ErrorInfo {
    fn from(kind: &ErrorKind) -> Self {
        Self::new(kind.code(), kind.to_string(), kind.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::Network("connection reset".to_string()), true)]
    #[case(ErrorKind::Timeout, true)]
    #[case(ErrorKind::Aborted, true)]
    #[case(ErrorKind::RateLimited, true)]
    #[case(ErrorKind::Server(503), true)]
    #[case(ErrorKind::Api { code: "31034".to_string(), message: "busy".to_string() }, false)]
    #[case(ErrorKind::PermissionDenied("f1".to_string()), false)]
    #[case(ErrorKind::NotFound("f1".to_string()), false)]
    #[case(ErrorKind::InvalidName("a/b".to_string()), false)]
    #[case(ErrorKind::AlreadyExists("a.txt".to_string()), false)]
    #[case(ErrorKind::BackendError("oops".to_string()), false)]
    fn test_error_kind_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }

    #[test]
    fn test_name_mismatch_is_permanent() {
        let kind = ErrorKind::NameMismatch {
            id: "f1".to_string(),
            expected: "old.txt".to_string(),
            actual: "other.txt".to_string(),
        };
        assert!(!kind.is_retryable());
        assert_eq!(kind.code(), "name_mismatch");
    }

    #[test]
    fn test_error_info_projection() {
        let info = ErrorInfo::from(&ErrorKind::Server(502));
        assert_eq!(info.code, "server");
        assert_eq!(info.message, "server error: 502");
        assert!(info.retryable);

        let info = ErrorInfo::from(&ErrorKind::Api { code: "-9".to_string(), message: "gone".to_string() });
        assert_eq!(info.code, "-9");
        assert!(!info.retryable);
    }
}
