//! Batch rename orchestration for remote storage providers.
//!
//! Given a selection of files and a naming rule, the engine:
//!
//! 1. computes proposed names ([`rule`]) and resolves naming conflicts
//!    ([`conflict`]) into a [`RenamePlan`];
//! 2. executes the plan one file at a time against a rate-limited, fallible
//!    [`Platform`](relabel_platform::Platform) with bounded retries
//!    ([`BatchExecutor`], [`RetryPolicy`]);
//! 3. journals every outcome so that an interrupted batch can be resumed
//!    without renaming anything twice ([`RecoveryManager`]).
//!
//! [`Session`] wires all of it together.

pub mod conflict;
pub mod error;
mod executor;
mod plan;
mod recovery;
mod retry;
pub mod rule;
mod session;
mod state;

pub use crate::conflict::{
    Abort, CheckFailurePolicy, ConflictArbiter, ConflictDetector, ConflictKind, ConflictResult, ConflictStrategy,
};
pub use crate::executor::{
    BatchControl, BatchEvent, BatchExecutor, BatchState, BatchSummary, ExecutorConfig, Progress, RenameResult,
};
pub use crate::plan::{PlanEntry, Planner, RenamePlan};
pub use crate::recovery::{RecoveryManager, RecoveryReport, Renamed};
pub use crate::retry::{Attempted, RateLimiter, RetryPolicy};
pub use crate::rule::{NamingRule, RuleSpec};
pub use crate::session::Session;
pub use crate::state::OperationState;
