//! Engine Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Errors for individual files never
//! surface here: they are isolated into a failed
//! [`RenameResult`](crate::RenameResult). These kinds describe failures of
//! the batch as a whole.

use derive_more::{Display, Error};

/// An engine error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of an engine failure.
///
/// ### Operational Errors
/// - [`ErrorKind::Rule`]
/// - [`ErrorKind::Aborted`]
/// - [`ErrorKind::Unresolvable`]
///
/// ### State Integrity
/// - [`ErrorKind::CorruptState`] halts a running batch.
/// - [`ErrorKind::MissingState`]
///
/// ### Dependency Errors
/// - [`ErrorKind::Store`]
/// - [`ErrorKind::Platform`]
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A naming rule could not be compiled or rendered.
    #[display("naming rule failed")]
    Rule,
    /// The conflict arbiter declined to pick a strategy.
    #[display("rename aborted during conflict resolution")]
    Aborted,
    /// No free numbered variant of a name was found.
    #[display("could not find a free name for `{_0}`")]
    Unresolvable(#[error(not(source))] String),
    /// The persisted operation state is unreadable or violates its
    /// invariants.
    #[display("corrupt operation state: {_0}")]
    CorruptState(#[error(not(source))] String),
    /// No operation state is persisted.
    #[display("no operation state to update")]
    MissingState,
    /// Reading or writing the persisted store failed.
    #[display("store error")]
    Store,
    /// The platform adapter failed outside of a per-file rename.
    #[display("platform error")]
    Platform,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store)
    }
}
