//! Store Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// A stored value could not be decoded into the requested type. Retrying
    /// will read the same bytes again.
    #[display("invalid stored data for key `{_0}`")]
    InvalidData(#[error(not(source))] String),
    /// A value could not be encoded for storage.
    #[display("could not serialize value for key `{_0}`")]
    Serialize(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // SQLITE_BUSY and friends surface as generic database errors.
        matches!(self, Self::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::Database.to_string(), "database error");
        assert_eq!(ErrorKind::InvalidData("state".to_string()).to_string(), "invalid stored data for key `state`");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(ErrorKind::Database.is_retryable());
        assert!(!ErrorKind::Migration.is_retryable());
        assert!(!ErrorKind::InvalidData("k".to_string()).is_retryable());
    }
}
