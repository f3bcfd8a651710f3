//! Naming conflict detection and resolution.
//!
//! A conflict is a proposed name that collides with another proposed name in
//! the same batch, or with a file that already exists in the destination.
//! Conflicts are not errors: they are resolved into final names before a
//! batch starts executing and never reach the retry layer.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use relabel_platform::error::ErrorKind as PlatformErrorKind;
use relabel_platform::{FileItem, PlatformHandle, join_name, split_name};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub use relabel_config::{CheckFailurePolicy, ConflictStrategy};

/// Maximum number of external conflict checks in flight at once.
const MAX_CHECK_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    #[default]
    None,
    /// A file with the proposed name already exists in the destination.
    NameExists,
    /// Another file in the same batch was given the same proposed name.
    DuplicateInBatch,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResult {
    pub kind: ConflictKind,
    pub conflicting_name: Option<String>,
    /// Current names of every batch file proposed under the same name.
    pub conflicting_files: Vec<String>,
}

impl ConflictResult {
    pub fn none() -> Self {
        Self::default()
    }

    fn exists(name: &str) -> Self {
        Self { kind: ConflictKind::NameExists, conflicting_name: Some(name.to_string()), conflicting_files: Vec::new() }
    }

    fn duplicate(name: &str, files: Vec<String>) -> Self {
        Self { kind: ConflictKind::DuplicateInBatch, conflicting_name: Some(name.to_string()), conflicting_files: files }
    }

    pub fn has_conflict(&self) -> bool {
        self.kind != ConflictKind::None
    }
}

/// Conflict results keyed by file id.
pub type Conflicts = HashMap<String, ConflictResult>;

/// Number of files with a conflict.
pub fn conflict_count(conflicts: &Conflicts) -> usize {
    conflicts.values().filter(|c| c.has_conflict()).count()
}

/// Decides what to do when conflicts are found and no strategy has been
/// configured up front. Typically backed by a UI dialog.
#[async_trait]
pub trait ConflictArbiter: Send + Sync {
    /// Return `None` to abort the batch.
    async fn resolve(&self, conflict_count: usize) -> Option<ConflictStrategy>;
}

/// A fixed strategy answers every question the same way.
#[async_trait]
impl ConflictArbiter for ConflictStrategy {
    async fn resolve(&self, _conflict_count: usize) -> Option<ConflictStrategy> {
        Some(*self)
    }
}

/// An arbiter that always aborts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Abort;

#[async_trait]
impl ConflictArbiter for Abort {
    async fn resolve(&self, _conflict_count: usize) -> Option<ConflictStrategy> {
        None
    }
}

/// Finds naming conflicts in a batch, asking the platform about names that
/// already exist.
pub struct ConflictDetector {
    platform: PlatformHandle,
    policy: CheckFailurePolicy,
}

impl ConflictDetector {
    pub fn new(platform: PlatformHandle) -> Self {
        Self { platform, policy: CheckFailurePolicy::default() }
    }

    pub fn with_policy(mut self, policy: CheckFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Detect conflicts for `files[i]` being renamed to `names[i]`.
    ///
    /// Every file gets an entry. Every proposed name counts towards
    /// duplicates, including one equal to the file's current name. External
    /// checks run concurrently and only for files that are actually renamed
    /// and not already duplicates; a failed check is interpreted according to
    /// the configured [`CheckFailurePolicy`].
    pub async fn detect_conflicts(&self, files: &[FileItem], names: &[String]) -> Conflicts {
        let mut by_name: HashMap<&str, Vec<&FileItem>> = HashMap::new();
        for (file, name) in files.iter().zip(names) {
            by_name.entry(name.as_str()).or_default().push(file);
        }
        let renamed: Vec<(&FileItem, &String)> =
            files.iter().zip(names).filter(|(file, name)| file.name != name.as_str()).collect();

        let mut conflicts: Conflicts = files.iter().map(|file| (file.id.clone(), ConflictResult::none())).collect();
        for (name, group) in by_name.iter().filter(|(_, group)| group.len() > 1) {
            let originals: Vec<String> = group.iter().map(|file| file.name.clone()).collect();
            for file in group {
                conflicts.insert(file.id.clone(), ConflictResult::duplicate(name, originals.clone()));
            }
        }

        let external: Vec<(String, String, bool)> = stream::iter(renamed)
            .filter(|(file, _)| std::future::ready(!conflicts[&file.id].has_conflict()))
            .map(|(file, name)| async move {
                let exists = self.check_name(name, &file.parent_id).await;
                (file.id.clone(), name.clone(), exists)
            })
            .buffer_unordered(MAX_CHECK_CONCURRENCY)
            .collect()
            .await;
        for (id, name, exists) in external {
            if exists {
                conflicts.insert(id, ConflictResult::exists(&name));
            }
        }

        let count = conflict_count(&conflicts);
        if count > 0 {
            tracing::info!(conflicts = count, files = files.len(), "naming conflicts detected");
        }
        conflicts
    }

    /// Check a single name against the platform.
    ///
    /// A failed check follows the same [`CheckFailurePolicy`] as
    /// [`detect_conflicts`](Self::detect_conflicts).
    pub async fn check_name(&self, name: &str, parent_id: &str) -> bool {
        match self.platform.check_name_conflict(name, parent_id).await {
            Ok(exists) => exists,
            Err(err) => {
                let kind: &PlatformErrorKind = &err;
                let assume = self.policy == CheckFailurePolicy::AssumeConflict;
                tracing::warn!(name, parent_id, error = %kind, assume_conflict = assume, "conflict check failed");
                assume
            },
        }
    }

    /// Like [`resolve_conflicts`], but numbered names are re-checked against
    /// the platform and bumped until a free one is found.
    ///
    /// Fails with [`ErrorKind::Unresolvable`] when no free variant exists up
    /// to `max_number`. The first failed check stops verification: that file
    /// and every file after it keep the unverified name from
    /// [`resolve_conflicts`].
    pub async fn resolve_verified(
        &self,
        files: &[FileItem],
        names: &[String],
        conflicts: &Conflicts,
        strategy: ConflictStrategy,
        max_number: u32,
    ) -> Result<Vec<String>> {
        let mut resolved = resolve_conflicts(files, names, conflicts, strategy);
        if strategy != ConflictStrategy::AutoNumber {
            return Ok(resolved);
        }
        let mut taken: HashSet<String> = resolved.iter().cloned().collect();
        for (i, (file, name)) in files.iter().zip(names).enumerate() {
            if !is_conflicting(conflicts, file) {
                continue;
            }
            taken.remove(&resolved[i]);
            let mut number = 1;
            let candidate = loop {
                if number > max_number {
                    exn::bail!(ErrorKind::Unresolvable(name.clone()));
                }
                let candidate = numbered(name, number);
                number += 1;
                if taken.contains(&candidate) {
                    continue;
                }
                match self.platform.check_name_conflict(&candidate, &file.parent_id).await {
                    Ok(false) => break candidate,
                    Ok(true) => {},
                    Err(err) => {
                        let kind: &PlatformErrorKind = &err;
                        tracing::warn!(
                            file = %file.id,
                            name = %candidate,
                            error = %kind,
                            "conflict check failed, keeping unverified numbered names"
                        );
                        return Ok(resolved);
                    },
                }
            };
            if candidate != resolved[i] {
                tracing::debug!(file = %file.id, from = %resolved[i], to = %candidate, "numbered name already taken");
            }
            taken.insert(candidate.clone());
            resolved[i] = candidate;
        }
        Ok(resolved)
    }
}

fn is_conflicting(conflicts: &Conflicts, file: &FileItem) -> bool {
    conflicts.get(&file.id).is_some_and(ConflictResult::has_conflict)
}

/// Insert `(n)` before the extension: `a.txt` becomes `a(1).txt`.
pub fn numbered(name: &str, number: u32) -> String {
    let (stem, ext) = split_name(name);
    join_name(&format!("{stem}({number})"), ext)
}

/// Turn proposed names into final names according to `strategy`.
///
/// - [`AutoNumber`](ConflictStrategy::AutoNumber): every conflicting file gets
///   `(n)` inserted before the extension, with one counter per proposed name
///   and numbers that would collide with another name in the batch skipped.
///   Nothing is re-checked against the platform; see
///   [`ConflictDetector::resolve_verified`].
/// - [`Skip`](ConflictStrategy::Skip): conflicting files keep their current
///   name.
/// - [`Overwrite`](ConflictStrategy::Overwrite): names pass through unchanged.
pub fn resolve_conflicts(
    files: &[FileItem],
    names: &[String],
    conflicts: &Conflicts,
    strategy: ConflictStrategy,
) -> Vec<String> {
    match strategy {
        ConflictStrategy::Overwrite => names.to_vec(),
        ConflictStrategy::Skip => files
            .iter()
            .zip(names)
            .map(|(file, name)| if is_conflicting(conflicts, file) { file.name.clone() } else { name.clone() })
            .collect(),
        ConflictStrategy::AutoNumber => {
            let mut taken: HashSet<String> = files
                .iter()
                .zip(names)
                .filter(|(file, _)| !is_conflicting(conflicts, file))
                .map(|(_, name)| name.clone())
                .collect();
            let mut counters: HashMap<&str, u32> = HashMap::new();
            files
                .iter()
                .zip(names)
                .map(|(file, name)| {
                    if !is_conflicting(conflicts, file) {
                        return name.clone();
                    }
                    let counter = counters.entry(name.as_str()).or_insert(0);
                    let candidate = loop {
                        *counter += 1;
                        let candidate = numbered(name, *counter);
                        if !taken.contains(&candidate) {
                            break candidate;
                        }
                    };
                    taken.insert(candidate.clone());
                    candidate
                })
                .collect()
        },
    }
}
