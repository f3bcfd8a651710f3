//! Sequential, rate-limited execution of a rename plan.
//!
//! Files are renamed strictly one at a time, in plan order. Every rename goes
//! through the [`RetryPolicy`] and the request spacing of the
//! [`RateLimiter`]. Pause and cancel are cooperative: they take effect
//! between files and never interrupt a request in flight.

use crate::error::{ErrorKind, Result};
use crate::plan::{PlanEntry, RenamePlan};
use crate::recovery::{RecoveryManager, RecoveryReport, Renamed, rename_idempotent};
use crate::retry::{Attempted, RateLimiter, RetryPolicy};
use async_stream::stream;
use futures::{Stream, StreamExt, pin_mut};
use relabel_platform::error::{ErrorInfo, ErrorKind as PlatformErrorKind};
use relabel_platform::{PlatformConfig, PlatformHandle, validate_name};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::instrument;

/// Execution tuning for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Minimum spacing between two requests to the platform.
    pub request_interval: Duration,
    pub retry: RetryPolicy,
}

impl ExecutorConfig {
    /// Tuning as reported by the platform, with default backoff.
    pub fn for_platform(platform: &PlatformConfig) -> Self {
        Self { request_interval: platform.request_interval, retry: RetryPolicy::new(platform.max_retries) }
    }

    /// Platform tuning, overridden by whatever the configuration sets.
    pub fn from_config(platform: &PlatformConfig, config: &relabel_config::Config) -> Self {
        let request_interval =
            config.executor.request_interval_ms.map(Duration::from_millis).unwrap_or(platform.request_interval);
        let max_attempts = config.executor.max_retries.unwrap_or(platform.max_retries);
        Self { request_interval, retry: RetryPolicy::from_config(max_attempts, &config.retry) }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::for_platform(&PlatformConfig::default())
    }
}

/// Lifecycle of a batch.
///
/// `Idle → Running → {Paused ⇄ Running} → Completed | Cancelled`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Idle,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl BatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Handle for pausing, resuming or cancelling a batch from elsewhere.
///
/// Cheap to clone; every clone controls the same batch.
#[derive(Debug, Clone)]
pub struct BatchControl {
    state: Arc<watch::Sender<BatchState>>,
}

impl Default for BatchControl {
    fn default() -> Self {
        Self { state: Arc::new(watch::channel(BatchState::Idle).0) }
    }
}

impl BatchControl {
    pub fn state(&self) -> BatchState {
        *self.state.borrow()
    }

    /// Returns `false` if the batch was not running (or about to run).
    pub fn pause(&self) -> bool {
        self.transition(|state| matches!(state, BatchState::Idle | BatchState::Running).then_some(BatchState::Paused))
    }

    pub fn resume(&self) -> bool {
        self.transition(|state| (state == BatchState::Paused).then_some(BatchState::Running))
    }

    /// Stop after the file currently being renamed. Returns `false` if the
    /// batch had already finished.
    pub fn cancel(&self) -> bool {
        self.transition(|state| (!state.is_terminal()).then_some(BatchState::Cancelled))
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<BatchState> {
        self.state.subscribe()
    }

    fn transition(&self, next: impl FnOnce(BatchState) -> Option<BatchState>) -> bool {
        self.state.send_if_modified(|state| match next(*state) {
            Some(next) => {
                *state = next;
                true
            },
            None => false,
        })
    }

    fn start(&self) {
        self.transition(|state| (state == BatchState::Idle).then_some(BatchState::Running));
    }

    fn finish(&self, cancelled: bool) {
        self.state.send_replace(if cancelled { BatchState::Cancelled } else { BatchState::Completed });
    }

    /// Wait while paused. Returns `false` once cancelled.
    async fn proceed(&self) -> bool {
        let mut receiver = self.state.subscribe();
        match receiver.wait_for(|state| *state != BatchState::Paused).await {
            Ok(state) => *state != BatchState::Cancelled,
            Err(_) => false,
        }
    }
}

/// Outcome of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameResult {
    /// Index of the file in the operation.
    pub index: usize,
    pub file_id: String,
    pub success: bool,
    pub new_name: Option<String>,
    pub error: Option<ErrorInfo>,
    /// The file already had its new name; no rename was issued.
    pub skipped: bool,
    pub attempts: u32,
}

impl RenameResult {
    fn from_attempted(entry: &PlanEntry, attempted: Attempted<Renamed>) -> Self {
        let Attempted { result, attempts } = attempted;
        match result {
            Ok(renamed) => Self {
                index: entry.index,
                file_id: entry.file.id.clone(),
                success: true,
                new_name: Some(renamed.name),
                error: None,
                skipped: renamed.skipped,
                attempts,
            },
            Err(err) => Self::failed(entry, &err, attempts),
        }
    }

    fn failed(entry: &PlanEntry, kind: &PlatformErrorKind, attempts: u32) -> Self {
        Self {
            index: entry.index,
            file_id: entry.file.id.clone(),
            success: false,
            new_name: None,
            error: Some(ErrorInfo::from(kind)),
            skipped: false,
            attempts,
        }
    }
}

/// Counters reported after every file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Files resolved so far, successes and failures alike.
    pub completed: usize,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    /// Current name of the file that was just processed.
    pub current_file: Option<String>,
}

/// Final report of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub completed: usize,
    pub success: usize,
    pub failed: usize,
    pub results: Vec<RenameResult>,
    /// The batch was cancelled before every file was attempted.
    pub cancelled: bool,
    /// Set when this batch resumed an interrupted operation.
    pub recovery: Option<RecoveryReport>,
}

impl BatchSummary {
    /// Short human-readable summary.
    pub fn summary(&self) -> String {
        let files = if self.success == 1 { "file" } else { "files" };
        let mut text = format!("Renamed {} {files}, {} failed", self.success, self.failed);
        if let Some(report) = &self.recovery {
            text.push_str(&format!(" (recovered {} of {})", report.recovered, report.pending));
        }
        if self.cancelled {
            text.push_str(" (cancelled)");
        }
        text
    }
}

/// Events emitted by [`BatchExecutor::execute`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started): exactly once, with the number of files.
/// 2. [`Progress`](Self::Progress): once per resolved file.
/// 3. [`Complete`](Self::Complete): exactly once, also after cancellation.
///
/// A corrupt operation state terminates the stream with an `Err` item, in
/// which case [`Complete`](Self::Complete) is never emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    Started(usize),
    Progress(Progress),
    Complete(BatchSummary),
}

/// Executes a [`RenamePlan`] against a platform.
///
/// # Examples
///
/// ```
/// use futures::StreamExt;
/// use relabel_engine::{BatchEvent, BatchExecutor, ExecutorConfig, RenamePlan};
/// use relabel_platform::FileItem;
/// use relabel_platform::adapter::{DryRunPlatform, MockPlatform};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let file = FileItem::new("1", "a.txt", "root");
/// let platform = Arc::new(DryRunPlatform::new(Arc::new(MockPlatform::with_files([file.clone()]))));
/// let plan = RenamePlan::new([file], ["b.txt".to_string()]);
///
/// let summary = BatchExecutor::new(plan, platform, ExecutorConfig::default()).run(|_| {}, |_| {}).await.unwrap();
/// assert_eq!(summary.summary(), "Renamed 1 file, 0 failed");
/// # }
/// ```
pub struct BatchExecutor {
    plan: RenamePlan,
    platform: PlatformHandle,
    config: ExecutorConfig,
    control: BatchControl,
    recovery: Option<RecoveryManager>,
    resumed: Option<usize>,
}

impl BatchExecutor {
    pub fn new(plan: RenamePlan, platform: PlatformHandle, config: ExecutorConfig) -> Self {
        Self { plan, platform, config, control: BatchControl::default(), recovery: None, resumed: None }
    }

    /// Journal every outcome into the persisted operation state.
    pub fn with_recovery(mut self, recovery: RecoveryManager) -> Self {
        self.recovery = Some(recovery);
        self
    }

    /// Mark this batch as the resumption of an operation of `total` files.
    /// Every rename is then preceded by an idempotency check.
    pub fn resuming(mut self, total: usize) -> Self {
        self.resumed = Some(total);
        self
    }

    pub fn control(&self) -> BatchControl {
        self.control.clone()
    }

    pub fn len(&self) -> usize {
        self.plan.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plan.is_empty()
    }

    /// Stream the batch's [`BatchEvent`]s, renaming files as the stream is
    /// polled.
    pub fn execute(self) -> impl Stream<Item = Result<BatchEvent>> {
        let Self { plan, platform, config, control, recovery, resumed } = self;
        // `rustfmt` does not format macros that use braces. Wrap in parentheses!
        stream!({
            let total = plan.len();
            control.start();
            tracing::info!(platform = platform.name(), total, resumed = resumed.is_some(), "batch started");
            yield Ok(BatchEvent::Started(total));

            let limiter = RateLimiter::new(config.request_interval);
            let mut progress = Progress { total, ..Progress::default() };
            let mut results = Vec::with_capacity(total);
            for entry in plan.into_entries() {
                if !control.proceed().await {
                    break;
                }
                let result = rename(&platform, &config.retry, &limiter, &entry, resumed.is_some()).await;
                tracing::debug!(
                    file = %entry.file.id,
                    success = result.success,
                    skipped = result.skipped,
                    attempts = result.attempts,
                    "file processed"
                );

                if let Some(recovery) = &recovery {
                    let journaled = if result.success {
                        recovery.mark_as_completed(entry.index).await
                    } else {
                        recovery.mark_as_failed(entry.index).await
                    };
                    if let Err(err) = journaled {
                        let kind: &ErrorKind = &err;
                        if matches!(kind, ErrorKind::CorruptState(_)) {
                            tracing::error!(index = entry.index, error = %kind, "operation state corrupt, halting batch");
                            control.finish(true);
                            yield Err(err);
                            return;
                        }
                        tracing::warn!(index = entry.index, error = %kind, "could not persist progress");
                    }
                }

                progress.completed += 1;
                if result.success {
                    progress.success += 1;
                } else {
                    progress.failed += 1;
                }
                progress.current_file = Some(entry.file.name.clone());
                results.push(result);
                yield Ok(BatchEvent::Progress(progress.clone()));
            }

            let cancelled = results.len() < total;
            control.finish(cancelled);
            let recovery = resumed.map(|operation_total| RecoveryReport {
                recovered: progress.success,
                pending: total,
                total: operation_total,
            });
            let summary = BatchSummary {
                completed: progress.completed,
                success: progress.success,
                failed: progress.failed,
                results,
                cancelled,
                recovery,
            };
            tracing::info!(
                completed = summary.completed,
                success = summary.success,
                failed = summary.failed,
                cancelled,
                "batch finished"
            );
            yield Ok(BatchEvent::Complete(summary));
        })
    }

    /// Run the batch to the end, calling back on progress and completion.
    #[instrument(skip_all, fields(files = self.len(), platform = self.platform.name()))]
    pub async fn run(
        self,
        mut on_progress: impl FnMut(&Progress),
        on_complete: impl FnOnce(&BatchSummary),
    ) -> Result<BatchSummary> {
        let events = self.execute();
        pin_mut!(events);
        while let Some(event) = events.next().await {
            match event? {
                BatchEvent::Started(_) => {},
                BatchEvent::Progress(progress) => on_progress(&progress),
                BatchEvent::Complete(summary) => {
                    on_complete(&summary);
                    return Ok(summary);
                },
            }
        }
        // Infallible: the stream always ends with `Complete` unless it
        // yielded an error above.
        exn::bail!(ErrorKind::CorruptState("batch ended without a summary".to_string()))
    }
}

async fn rename(
    platform: &PlatformHandle,
    retry: &RetryPolicy,
    limiter: &RateLimiter,
    entry: &PlanEntry,
    resumed: bool,
) -> RenameResult {
    if let Err(err) = validate_name(&entry.new_name) {
        return RenameResult::failed(entry, &err, 0);
    }
    let attempted = retry
        .run(limiter, |attempt| async move {
            // A retry may follow a rename that was applied remotely but
            // reported as failed.
            if resumed || attempt > 1 {
                rename_idempotent(platform.as_ref(), limiter, &entry.file.id, &entry.file.name, &entry.new_name).await
            } else {
                platform.rename_file(&entry.file.id, &entry.new_name).await.map(Renamed::applied)
            }
        })
        .await;
    RenameResult::from_attempted(entry, attempted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relabel_platform::adapter::MockPlatform;
    use relabel_platform::{FileItem, Platform};
    use tokio::time::Instant;

    fn setup(count: usize) -> (Arc<MockPlatform>, RenamePlan) {
        let files: Vec<_> = (0..count).map(|i| FileItem::new(format!("f{i}"), format!("old{i}.txt"), "root")).collect();
        let names: Vec<_> = (0..count).map(|i| format!("new{i}.txt")).collect();
        (Arc::new(MockPlatform::with_files(files.clone())), RenamePlan::new(files, names))
    }

    async fn collect(executor: BatchExecutor) -> Vec<BatchEvent> {
        executor.execute().map(|event| event.unwrap()).collect().await
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_order_and_counters() {
        let (platform, plan) = setup(3);
        let events = collect(BatchExecutor::new(plan, platform.clone(), ExecutorConfig::default())).await;

        assert_eq!(events.len(), 5);
        assert_eq!(events[0], BatchEvent::Started(3));
        let BatchEvent::Progress(progress) = &events[2] else { panic!("expected progress") };
        assert_eq!((progress.completed, progress.total, progress.success), (2, 3, 2));
        assert_eq!(progress.current_file.as_deref(), Some("old1.txt"));
        let BatchEvent::Complete(summary) = &events[4] else { panic!("expected completion") };
        assert_eq!((summary.completed, summary.success, summary.failed), (3, 3, 0));
        assert!(!summary.cancelled);
        assert_eq!(platform.name_of("f2").as_deref(), Some("new2.txt"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_spaced() {
        let (platform, plan) = setup(3);
        let config = ExecutorConfig { request_interval: Duration::from_millis(800), ..ExecutorConfig::default() };
        let started = Instant::now();
        collect(BatchExecutor::new(plan, platform, config)).await;
        assert_eq!(started.elapsed().as_millis(), 1600);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_isolated() {
        let (platform, plan) = setup(3);
        platform.fail_rename_always("f0", PlatformErrorKind::PermissionDenied("f0".to_string()));
        platform.fail_rename("f1", PlatformErrorKind::Server(502), 1);

        let summary = BatchExecutor::new(plan, platform.clone(), ExecutorConfig::default())
            .run(|_| {}, |_| {})
            .await
            .unwrap();
        assert_eq!((summary.success, summary.failed), (2, 1));
        let failure = summary.results[0].error.as_ref().unwrap();
        assert_eq!(failure.code, "permission_denied");
        assert!(!failure.retryable);
        assert_eq!(summary.results[0].attempts, 1);
        assert_eq!(summary.results[1].attempts, 2);
        assert!(summary.results[1].success);
        assert_eq!(summary.summary(), "Renamed 2 files, 1 failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_response_is_not_renamed_twice() {
        let (platform, plan) = setup(1);
        platform.fail_after_rename("f0", PlatformErrorKind::Timeout);

        let summary = BatchExecutor::new(plan, platform.clone(), ExecutorConfig::default())
            .run(|_| {}, |_| {})
            .await
            .unwrap();
        assert!(summary.results[0].success);
        assert!(summary.results[0].skipped);
        assert_eq!(platform.rename_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_name_fails_without_request() {
        let file = FileItem::new("f0", "a.txt", "root");
        let platform = Arc::new(MockPlatform::with_files([file.clone()]));
        let plan = RenamePlan::new([file], ["bad/name.txt".to_string()]);

        let summary = BatchExecutor::new(plan, platform.clone(), ExecutorConfig::default())
            .run(|_| {}, |_| {})
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.results[0].error.as_ref().unwrap().code, "invalid_name");
        assert_eq!(summary.results[0].attempts, 0);
        assert_eq!(platform.rename_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_after_current_file() {
        let (platform, plan) = setup(4);
        let executor = BatchExecutor::new(plan, platform.clone(), ExecutorConfig::default());
        let control = executor.control();

        let summary = executor
            .run(
                |progress| {
                    if progress.completed == 2 {
                        control.cancel();
                    }
                },
                |_| {},
            )
            .await
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.completed, 2);
        assert_eq!(platform.rename_calls(), 2);
        assert_eq!(control.state(), BatchState::Cancelled);
        assert_eq!(summary.summary(), "Renamed 2 files, 0 failed (cancelled)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume() {
        let (platform, plan) = setup(3);
        let executor = BatchExecutor::new(plan, platform.clone(), ExecutorConfig::default());
        let control = executor.control();
        let events = executor.execute();
        pin_mut!(events);

        assert_eq!(events.next().await.unwrap().unwrap(), BatchEvent::Started(3));
        assert_eq!(control.state(), BatchState::Running);
        assert!(matches!(events.next().await.unwrap().unwrap(), BatchEvent::Progress(_)));

        assert!(control.pause());
        let paused = tokio::time::timeout(Duration::from_secs(60), events.next()).await;
        assert!(paused.is_err(), "no file may be processed while paused");
        assert_eq!(platform.rename_calls(), 1);

        assert!(control.resume());
        let rest: Vec<_> = events.map(|event| event.unwrap()).collect().await;
        assert_eq!(rest.len(), 3);
        assert_eq!(platform.rename_calls(), 3);
        assert_eq!(control.state(), BatchState::Completed);
        assert!(!control.cancel());
    }

    /// Renames take a while to complete, so the batch can be paused while
    /// one is in flight.
    struct SlowPlatform {
        inner: Arc<MockPlatform>,
        latency: Duration,
    }

    #[async_trait::async_trait]
    impl Platform for SlowPlatform {
        fn name(&self) -> &str {
            "slow"
        }

        async fn selected_files(&self) -> relabel_platform::error::Result<Vec<FileItem>> {
            self.inner.selected_files().await
        }

        async fn all_files(&self, parent_id: Option<&str>) -> relabel_platform::error::Result<Vec<FileItem>> {
            self.inner.all_files(parent_id).await
        }

        async fn rename_file(&self, id: &str, new_name: &str) -> relabel_platform::error::Result<String> {
            tokio::time::sleep(self.latency).await;
            self.inner.rename_file(id, new_name).await
        }

        async fn file_info(&self, id: &str) -> relabel_platform::error::Result<FileItem> {
            self.inner.file_info(id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_lets_in_flight_rename_finish() {
        let (mock, plan) = setup(3);
        let platform = Arc::new(SlowPlatform { inner: mock.clone(), latency: Duration::from_secs(1) });
        let config = ExecutorConfig { request_interval: Duration::ZERO, ..ExecutorConfig::default() };
        let executor = BatchExecutor::new(plan, platform, config);
        let control = executor.control();
        let events = executor.execute();
        pin_mut!(events);
        assert_eq!(events.next().await.unwrap().unwrap(), BatchEvent::Started(3));

        // Pause halfway through the first rename.
        let (event, paused) = tokio::join!(events.next(), async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            control.pause()
        });
        assert!(paused);
        let BatchEvent::Progress(progress) = event.unwrap().unwrap() else { panic!("expected progress") };
        assert_eq!((progress.completed, progress.success), (1, 1));
        assert_eq!(mock.name_of("f0").as_deref(), Some("new0.txt"));
        assert_eq!(control.state(), BatchState::Paused);

        let waiting = tokio::time::timeout(Duration::from_secs(60), events.next()).await;
        assert!(waiting.is_err(), "no further file may start while paused");
        assert_eq!(mock.rename_calls(), 1);

        assert!(control.resume());
        let rest: Vec<_> = events.map(|event| event.unwrap()).collect().await;
        assert_eq!(rest.len(), 3);
        assert_eq!(mock.rename_calls(), 3);
        assert_eq!(control.state(), BatchState::Completed);
    }

    #[test]
    fn test_config_overrides() {
        let mut config = relabel_config::Config::default();
        config.executor.max_retries = Some(5);
        let platform = PlatformConfig::default();
        let executor = ExecutorConfig::from_config(&platform, &config);
        assert_eq!(executor.request_interval, Duration::from_millis(800));
        assert_eq!(executor.retry.max_attempts(), 5);
    }
}
