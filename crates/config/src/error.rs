//! Config Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// One of the configuration sources could not be read or parsed.
    #[display("could not load configuration")]
    Load,
    /// A value was parsed but is out of range.
    #[display("invalid configuration value: {_0}")]
    Invalid(#[error(not(source))] &'static str),
    /// No platform-appropriate directory could be determined (no home
    /// directory).
    #[display("could not determine default directories")]
    Directories,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
