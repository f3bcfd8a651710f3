//! Crash recovery for interrupted batches.
//!
//! The operation state is written when a batch starts and updated after every
//! file. When a batch is interrupted (crash, reload, closed window) the state
//! outlives the process; on the next start it is offered for resumption if it
//! is recent enough, and the remaining files are renamed after checking what
//! the platform already applied.

use crate::error::{ErrorKind, Result};
use crate::executor::{BatchExecutor, BatchSummary, ExecutorConfig, Progress};
use crate::retry::RateLimiter;
use crate::state::OperationState;
use exn::{OptionExt, ResultExt};
use relabel_config::RecoveryConfig;
use relabel_platform::{Platform, PlatformHandle};
use relabel_platform::error::{ErrorKind as PlatformErrorKind, Result as PlatformResult};
use relabel_store::error::ErrorKind as StoreErrorKind;
use relabel_store::{StoreHandle, TypedStore};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;

/// The "recovered N of M" part of a resumed batch's summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Files renamed successfully by the resumed batch.
    pub recovered: usize,
    /// Files that were still pending when the batch resumed.
    pub pending: usize,
    /// Files in the whole operation.
    pub total: usize,
}

/// A rename that the platform now reflects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renamed {
    pub name: String,
    /// The file already had the new name; no rename request was sent.
    pub skipped: bool,
}

impl Renamed {
    pub(crate) fn applied(name: String) -> Self {
        Self { name, skipped: false }
    }
}

/// Rename `id` from `expected` to `new_name` unless the platform already
/// shows the new name. A live name matching neither is reported as
/// [`NameMismatch`](PlatformErrorKind::NameMismatch) and left alone.
pub(crate) async fn rename_idempotent(
    platform: &dyn Platform,
    limiter: &RateLimiter,
    id: &str,
    expected: &str,
    new_name: &str,
) -> PlatformResult<Renamed> {
    let live = platform.file_info(id).await?;
    if live.name == new_name {
        tracing::debug!(file = id, name = new_name, "already renamed, skipping");
        return Ok(Renamed { name: live.name, skipped: true });
    }
    if live.name != expected {
        exn::bail!(PlatformErrorKind::NameMismatch {
            id: id.to_string(),
            expected: expected.to_string(),
            actual: live.name,
        });
    }
    limiter.acquire().await;
    platform.rename_file(id, new_name).await.map(Renamed::applied)
}

/// Persists operation state and resumes interrupted operations.
///
/// Assumes a single writer per state key; concurrent batches sharing a key
/// would corrupt each other's progress.
#[derive(Clone)]
pub struct RecoveryManager {
    store: StoreHandle,
    key: String,
    stale_after: Duration,
}

impl RecoveryManager {
    pub fn new(store: StoreHandle) -> Self {
        Self::from_config(store, &RecoveryConfig::default())
    }

    pub fn from_config(store: StoreHandle, config: &RecoveryConfig) -> Self {
        Self { store, key: config.state_key.clone(), stale_after: config.stale_after() }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub async fn save_operation_state(&self, state: &OperationState) -> Result<()> {
        self.store.set(&self.key, state).await.or_raise(|| ErrorKind::Store)
    }

    /// Read the persisted state, checking its invariants.
    pub async fn load(&self) -> Result<Option<OperationState>> {
        let state = match self.store.get::<OperationState>(&self.key).await {
            Ok(state) => state,
            Err(err) if matches!(*err, StoreErrorKind::InvalidData(_)) => {
                return Err(err).or_raise(|| ErrorKind::CorruptState("undecodable record".to_string()));
            },
            Err(err) => return Err(err).or_raise(|| ErrorKind::Store),
        };
        if let Some(state) = &state {
            state.validate()?;
        }
        Ok(state)
    }

    /// Find an operation worth resuming.
    ///
    /// Stale, finished and corrupt records are cleared and reported as
    /// nothing to recover.
    pub async fn check_recoverable_operation(&self) -> Result<Option<OperationState>> {
        let state = match self.load().await {
            Ok(Some(state)) => state,
            Ok(None) => return Ok(None),
            Err(err) if matches!(*err, ErrorKind::CorruptState(_)) => {
                let kind: &ErrorKind = &err;
                tracing::warn!(error = %kind, "discarding corrupt operation state");
                self.clear_operation_state().await?;
                return Ok(None);
            },
            Err(err) => return Err(err),
        };
        if state.is_stale(self.stale_after) {
            tracing::info!(age_secs = state.age().as_secs(), "discarding stale operation state");
            self.clear_operation_state().await?;
            return Ok(None);
        }
        if state.is_finished() {
            tracing::info!(files = state.files.len(), "discarding finished operation state");
            self.clear_operation_state().await?;
            return Ok(None);
        }
        tracing::info!(
            platform = %state.platform,
            pending = state.files.len() - state.processed(),
            total = state.files.len(),
            "found recoverable operation"
        );
        Ok(Some(state))
    }

    pub async fn mark_as_completed(&self, index: usize) -> Result<()> {
        self.update(|state| state.mark_completed(index)).await
    }

    pub async fn mark_as_failed(&self, index: usize) -> Result<()> {
        self.update(|state| state.mark_failed(index)).await
    }

    /// Read-modify-write of the persisted record. The record is removed once
    /// every file has an outcome.
    async fn update(&self, mark: impl FnOnce(&mut OperationState) -> Result<()>) -> Result<()> {
        let mut state = self.load().await?.ok_or_raise(|| ErrorKind::MissingState)?;
        mark(&mut state)?;
        if state.is_finished() {
            return self.clear_operation_state().await;
        }
        self.save_operation_state(&state).await
    }

    pub async fn clear_operation_state(&self) -> Result<()> {
        self.store.remove(&self.key).await.or_raise(|| ErrorKind::Store)
    }

    /// Rename a file unless the platform shows it was already renamed.
    ///
    /// Returns `skipped: true` without sending a rename when the live name is
    /// already `new_name`, and fails with
    /// [`NameMismatch`](PlatformErrorKind::NameMismatch) when the live name is
    /// neither `expected` nor `new_name`.
    pub async fn rename_with_idempotency(
        &self,
        platform: &dyn Platform,
        id: &str,
        expected: &str,
        new_name: &str,
    ) -> PlatformResult<Renamed> {
        rename_idempotent(platform, &RateLimiter::unlimited(), id, expected, new_name).await
    }

    /// Build the executor for the pending part of `state`.
    ///
    /// The persisted record is authoritative: if it no longer exists, or
    /// belongs to a different operation, there is nothing left to resume and
    /// `None` is returned.
    pub async fn resume_executor(
        &self,
        state: &OperationState,
        platform: PlatformHandle,
        config: ExecutorConfig,
    ) -> Result<Option<BatchExecutor>> {
        let Some(persisted) = self.load().await? else {
            return Ok(None);
        };
        if persisted.timestamp != state.timestamp {
            tracing::warn!(expected = state.timestamp, found = persisted.timestamp, "operation state was replaced");
            return Ok(None);
        }
        let plan = persisted.pending_plan();
        tracing::info!(pending = plan.len(), total = persisted.files.len(), "resuming operation");
        let executor =
            BatchExecutor::new(plan, platform, config).with_recovery(self.clone()).resuming(persisted.files.len());
        Ok(Some(executor))
    }

    /// Resume an interrupted operation, renaming only the pending files.
    ///
    /// The persisted state is cleared once the resumed batch finishes
    /// (cancellation keeps it for another attempt). Resuming an operation
    /// that is no longer persisted does nothing.
    #[instrument(skip_all, fields(platform = %state.platform, timestamp = state.timestamp))]
    pub async fn resume_operation(
        &self,
        state: &OperationState,
        platform: PlatformHandle,
        config: ExecutorConfig,
        on_progress: impl FnMut(&Progress),
        on_complete: impl FnOnce(&BatchSummary),
    ) -> Result<BatchSummary> {
        let Some(executor) = self.resume_executor(state, platform, config).await? else {
            tracing::info!("nothing left to resume");
            let summary = BatchSummary {
                recovery: Some(RecoveryReport { total: state.files.len(), ..RecoveryReport::default() }),
                ..BatchSummary::default()
            };
            on_complete(&summary);
            return Ok(summary);
        };
        let summary = executor.run(on_progress, on_complete).await?;
        if !summary.cancelled {
            self.clear_operation_state().await?;
        }
        Ok(summary)
    }
}
