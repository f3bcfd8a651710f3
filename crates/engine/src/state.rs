//! Persisted record of a batch's progress.

use crate::error::{ErrorKind, Result};
use crate::plan::{PlanEntry, RenamePlan};
use crate::rule::RuleSpec;
use relabel_platform::FileItem;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use time::OffsetDateTime;

/// Progress of one rename operation, persisted after every file.
///
/// `files` and `names` are fixed for the lifetime of the operation; they are
/// the authoritative list of pending work and are never re-derived from the
/// platform. `completed` and `failed` hold indices into `files`, only ever
/// grow, and never share an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationState {
    /// Creation time, in milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub platform: String,
    pub files: Vec<FileItem>,
    pub rule: RuleSpec,
    /// Resolved target name for every file, after conflict resolution.
    pub names: Vec<String>,
    pub completed: BTreeSet<usize>,
    pub failed: BTreeSet<usize>,
}

impl OperationState {
    pub fn new(platform: impl Into<String>, plan: &RenamePlan, rule: RuleSpec) -> Self {
        Self {
            timestamp: now_millis(),
            platform: platform.into(),
            files: plan.files(),
            rule,
            names: plan.names(),
            completed: BTreeSet::new(),
            failed: BTreeSet::new(),
        }
    }

    /// Time since the operation was created. A timestamp in the future
    /// counts as zero.
    pub fn age(&self) -> Duration {
        let millis = now_millis().saturating_sub(self.timestamp).max(0);
        Duration::from_millis(millis.unsigned_abs())
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.age() > max_age
    }

    pub fn processed(&self) -> usize {
        self.completed.len() + self.failed.len()
    }

    pub fn is_finished(&self) -> bool {
        self.processed() >= self.files.len()
    }

    pub fn pending_indices(&self) -> Vec<usize> {
        (0..self.files.len()).filter(|i| !self.completed.contains(i) && !self.failed.contains(i)).collect()
    }

    /// Plan containing only the files that have not been processed yet,
    /// keeping their original indices.
    pub fn pending_plan(&self) -> RenamePlan {
        let entries = self
            .pending_indices()
            .into_iter()
            .map(|index| PlanEntry { index, file: self.files[index].clone(), new_name: self.names[index].clone() })
            .collect();
        RenamePlan::from_entries(entries)
    }

    /// Record a successful (or already applied) rename. Marking the same
    /// index twice is a no-op.
    pub fn mark_completed(&mut self, index: usize) -> Result<()> {
        self.check_index(index, &self.failed)?;
        self.completed.insert(index);
        Ok(())
    }

    /// Record a failed rename. Marking the same index twice is a no-op.
    pub fn mark_failed(&mut self, index: usize) -> Result<()> {
        self.check_index(index, &self.completed)?;
        self.failed.insert(index);
        Ok(())
    }

    fn check_index(&self, index: usize, other: &BTreeSet<usize>) -> Result<()> {
        if index >= self.files.len() {
            exn::bail!(ErrorKind::CorruptState(format!("index {index} out of range")));
        }
        if other.contains(&index) {
            exn::bail!(ErrorKind::CorruptState(format!("index {index} already recorded")));
        }
        Ok(())
    }

    /// Check the invariants of a record read back from storage.
    pub fn validate(&self) -> Result<()> {
        if self.names.len() != self.files.len() {
            exn::bail!(ErrorKind::CorruptState("file and name counts differ".to_string()));
        }
        if let Some(index) = self.completed.iter().chain(&self.failed).find(|i| **i >= self.files.len()) {
            exn::bail!(ErrorKind::CorruptState(format!("index {index} out of range")));
        }
        if let Some(index) = self.completed.intersection(&self.failed).next() {
            exn::bail!(ErrorKind::CorruptState(format!("index {index} both completed and failed")));
        }
        Ok(())
    }
}

fn now_millis() -> i64 {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(millis).unwrap_or(i64::MAX)
}
