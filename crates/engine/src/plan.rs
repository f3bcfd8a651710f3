//! Rename plans: the final, conflict-free list of renames for a batch.

use crate::conflict::{ConflictArbiter, ConflictDetector, conflict_count, resolve_conflicts};
use crate::error::{ErrorKind, Result};
use crate::rule::RuleSpec;
use relabel_config::ConflictConfig;
use relabel_platform::{FileItem, PlatformHandle};
use tracing::instrument;

/// One rename in a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    /// Position of the file in the operation's file list. Stable across
    /// resumes, and the value journaled in the operation state.
    pub index: usize,
    pub file: FileItem,
    pub new_name: String,
}

/// An ordered list of renames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenamePlan {
    entries: Vec<PlanEntry>,
}

impl RenamePlan {
    /// Pair every file with its final name, dropping files whose name would
    /// not change. Entries are numbered in order after dropping.
    pub fn new(files: impl IntoIterator<Item = FileItem>, names: impl IntoIterator<Item = String>) -> Self {
        let entries = files
            .into_iter()
            .zip(names)
            .filter(|(file, name)| file.name != *name)
            .enumerate()
            .map(|(index, (file, new_name))| PlanEntry { index, file, new_name })
            .collect();
        Self { entries }
    }

    /// Build a plan from entries that already carry their operation index.
    pub fn from_entries(entries: Vec<PlanEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<PlanEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn files(&self) -> Vec<FileItem> {
        self.entries.iter().map(|entry| entry.file.clone()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.new_name.clone()).collect()
    }
}

/// Turns a selection of files and a naming rule into a [`RenamePlan`].
pub struct Planner {
    detector: ConflictDetector,
    config: ConflictConfig,
}

impl Planner {
    pub fn new(platform: PlatformHandle, config: ConflictConfig) -> Self {
        let detector = ConflictDetector::new(platform).with_policy(config.on_check_error);
        Self { detector, config }
    }

    /// Compute proposed names, detect conflicts and resolve them.
    ///
    /// The configured strategy is used when set; otherwise the arbiter is
    /// asked, and its refusal aborts planning with [`ErrorKind::Aborted`].
    #[instrument(skip_all, fields(files = files.len()))]
    pub async fn plan(&self, files: Vec<FileItem>, rule: &RuleSpec, arbiter: &dyn ConflictArbiter) -> Result<RenamePlan> {
        let compiled = rule.compile()?;
        let names =
            files.iter().enumerate().map(|(index, file)| compiled.apply(file, index)).collect::<Result<Vec<_>>>()?;

        let conflicts = self.detector.detect_conflicts(&files, &names).await;
        let count = conflict_count(&conflicts);
        if count == 0 {
            return Ok(RenamePlan::new(files, names));
        }

        let strategy = match self.config.strategy {
            Some(strategy) => strategy,
            None => match arbiter.resolve(count).await {
                Some(strategy) => strategy,
                None => {
                    tracing::info!(conflicts = count, "conflict resolution declined");
                    exn::bail!(ErrorKind::Aborted);
                },
            },
        };
        tracing::debug!(conflicts = count, ?strategy, "resolving conflicts");
        let resolved = if self.config.verify_numbered {
            self.detector.resolve_verified(&files, &names, &conflicts, strategy, self.config.max_number).await?
        } else {
            resolve_conflicts(&files, &names, &conflicts, strategy)
        };
        Ok(RenamePlan::new(files, resolved))
    }
}
