//! In-memory platform adapter for testing.

use crate::error::{ErrorKind, Result};
use crate::{FileItem, Platform, PlatformConfig, validate_name};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// How a scripted rename failure behaves.
#[derive(Clone)]
enum Failure {
    /// Nothing happens remotely; the error is reported.
    Before(ErrorKind),
    /// The rename is applied remotely, but the error is reported anyway
    /// (e.g. the response was lost).
    After(ErrorKind),
}

#[derive(Default)]
struct State {
    files: Vec<FileItem>,
    selection: Option<Vec<String>>,
    queued: HashMap<String, VecDeque<Failure>>,
    always: HashMap<String, ErrorKind>,
    check_failure: Option<ErrorKind>,
    renames_by_id: HashMap<String, usize>,
}

/// In-memory platform adapter for testing.
///
/// Files are stored in insertion order behind a [`Mutex`] (never held across
/// an `.await`), so failures can be scripted from synchronous test setup code
/// while a batch is running. Every rename attempt is counted, including the
/// ones that fail.
///
/// # Examples
///
/// ```
/// use relabel_platform::adapter::MockPlatform;
/// use relabel_platform::error::ErrorKind;
/// use relabel_platform::{FileItem, Platform};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let platform = MockPlatform::with_files([
///     FileItem::new("1", "a.txt", "root"),
///     FileItem::new("2", "b.txt", "root"),
/// ]);
/// platform.fail_rename("2", ErrorKind::RateLimited, 1);
///
/// assert_eq!(platform.rename_file("1", "c.txt").await.unwrap(), "c.txt");
/// assert!(platform.rename_file("2", "d.txt").await.is_err());
/// assert_eq!(platform.rename_file("2", "d.txt").await.unwrap(), "d.txt");
/// assert_eq!(platform.rename_calls(), 3);
/// # }
/// ```
pub struct MockPlatform {
    name: String,
    config: PlatformConfig,
    state: Mutex<State>,
    rename_calls: AtomicUsize,
    check_calls: AtomicUsize,
    info_calls: AtomicUsize,
}

impl MockPlatform {
    /// Create a mock adapter pre-populated with files.
    ///
    /// The request interval defaults to zero so tests don't have to wait on
    /// rate limiting unless they opt in with [`with_config`](Self::with_config).
    pub fn with_files(files: impl IntoIterator<Item = FileItem>) -> Self {
        Self {
            name: "mock".to_string(),
            config: PlatformConfig { request_interval: Duration::ZERO, ..PlatformConfig::default() },
            state: Mutex::new(State { files: files.into_iter().collect(), ..State::default() }),
            rename_calls: AtomicUsize::new(0),
            check_calls: AtomicUsize::new(0),
            info_calls: AtomicUsize::new(0),
        }
    }

    /// Change the name of the mock adapter.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_config(mut self, config: PlatformConfig) -> Self {
        self.config = config;
        self
    }

    /// Restrict [`selected_files()`](Platform::selected_files) to the given
    /// identifiers (all files are selected by default).
    pub fn with_selection(self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.state().selection = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread shouldn't cascade into every other assertion.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `times` renames of `id` fail with `kind` without touching
    /// the file.
    pub fn fail_rename(&self, id: &str, kind: ErrorKind, times: usize) {
        let mut state = self.state();
        let queue = state.queued.entry(id.to_string()).or_default();
        queue.extend(std::iter::repeat_n(Failure::Before(kind), times));
    }

    /// Every rename of `id` fails with `kind`.
    pub fn fail_rename_always(&self, id: &str, kind: ErrorKind) {
        self.state().always.insert(id.to_string(), kind);
    }

    /// The next rename of `id` is applied, but reported as failed with `kind`.
    pub fn fail_after_rename(&self, id: &str, kind: ErrorKind) {
        self.state().queued.entry(id.to_string()).or_default().push_back(Failure::After(kind));
    }

    /// Every conflict check fails with `kind` (`None` restores normal checks).
    pub fn fail_conflict_checks(&self, kind: impl Into<Option<ErrorKind>>) {
        self.state().check_failure = kind.into();
    }

    /// Rename a file behind the engine's back.
    pub fn rename_externally(&self, id: &str, new_name: &str) {
        if let Some(file) = self.state().files.iter_mut().find(|f| f.id == id) {
            let renamed = FileItem { id: file.id.clone(), ..FileItem::new("", new_name, file.parent_id.clone()) };
            *file = renamed.with_size(file.size);
        }
    }

    /// Add a file after construction.
    pub fn insert(&self, file: FileItem) {
        self.state().files.push(file);
    }

    /// Current name of a file, if it exists.
    pub fn name_of(&self, id: &str) -> Option<String> {
        self.state().files.iter().find(|f| f.id == id).map(|f| f.name.clone())
    }

    /// Total rename attempts, failed ones included.
    pub fn rename_calls(&self) -> usize {
        self.rename_calls.load(Ordering::SeqCst)
    }

    /// Rename attempts for a single file.
    pub fn rename_calls_for(&self, id: &str) -> usize {
        self.state().renames_by_id.get(id).copied().unwrap_or(0)
    }

    pub fn check_calls(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
    }

    pub fn info_calls(&self) -> usize {
        self.info_calls.load(Ordering::SeqCst)
    }

    fn apply_rename(state: &mut State, id: &str, new_name: &str) -> Result<String> {
        validate_name(new_name)?;
        let position =
            state.files.iter().position(|f| f.id == id).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(id.to_string())))?;
        let parent = state.files[position].parent_id.clone();
        if state.files.iter().any(|f| f.id != id && f.parent_id == parent && f.name == new_name) {
            exn::bail!(ErrorKind::AlreadyExists(new_name.to_string()));
        }
        let current = state.files[position].clone();
        state.files[position] =
            FileItem { id: current.id, mtime: current.mtime, ..FileItem::new("", new_name, parent) }.with_size(current.size);
        Ok(new_name.to_string())
    }
}
impl Default for MockPlatform {
    fn default() -> Self {
        Self::with_files(Vec::new())
    }
}

#[async_trait]
impl Platform for MockPlatform {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> PlatformConfig {
        self.config
    }

    async fn selected_files(&self) -> Result<Vec<FileItem>> {
        let state = self.state();
        Ok(match &state.selection {
            Some(ids) => ids.iter().filter_map(|id| state.files.iter().find(|f| &f.id == id).cloned()).collect(),
            None => state.files.clone(),
        })
    }

    async fn all_files(&self, parent_id: Option<&str>) -> Result<Vec<FileItem>> {
        let state = self.state();
        Ok(state.files.iter().filter(|f| parent_id.is_none_or(|p| f.parent_id == p)).cloned().collect())
    }

    async fn rename_file(&self, id: &str, new_name: &str) -> Result<String> {
        self.rename_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        *state.renames_by_id.entry(id.to_string()).or_default() += 1;
        if let Some(kind) = state.always.get(id) {
            exn::bail!(kind.clone());
        }
        match state.queued.get_mut(id).and_then(VecDeque::pop_front) {
            Some(Failure::Before(kind)) => exn::bail!(kind),
            Some(Failure::After(kind)) => {
                Self::apply_rename(&mut state, id, new_name)?;
                exn::bail!(kind);
            },
            None => Self::apply_rename(&mut state, id, new_name),
        }
    }

    async fn check_name_conflict(&self, name: &str, parent_id: &str) -> Result<bool> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if let Some(kind) = &state.check_failure {
            exn::bail!(kind.clone());
        }
        Ok(state.files.iter().any(|f| f.parent_id == parent_id && f.name == name))
    }

    async fn file_info(&self, id: &str) -> Result<FileItem> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        self.state()
            .files
            .iter()
            .find(|f| f.id == id)
            .cloned()
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(id.to_string())))
    }
}
