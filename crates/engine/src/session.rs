//! Entry point tying planning, execution and recovery together.

use crate::conflict::ConflictArbiter;
use crate::error::{ErrorKind, Result};
use crate::executor::{BatchExecutor, BatchSummary, ExecutorConfig, Progress};
use crate::plan::Planner;
use crate::recovery::RecoveryManager;
use crate::rule::RuleSpec;
use crate::state::OperationState;
use exn::ResultExt;
use relabel_config::Config;
use relabel_platform::{FileItem, PlatformHandle};
use relabel_store::StoreHandle;

/// One platform, one store, one configuration.
///
/// # Examples
///
/// ```
/// use relabel_config::{Config, ConflictStrategy};
/// use relabel_engine::{RuleSpec, Session};
/// use relabel_platform::FileItem;
/// use relabel_platform::adapter::MockPlatform;
/// use relabel_store::MemoryStore;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let platform = Arc::new(MockPlatform::with_files([FileItem::new("1", "scan.pdf", "inbox")]));
/// let session = Session::new(platform, Arc::new(MemoryStore::default()), Config::default());
///
/// if let Some(state) = session.recoverable().await.unwrap() {
///     session.resume(&state, |_| {}).await.unwrap();
/// }
///
/// let files = session.selected().await.unwrap();
/// let rule = RuleSpec::template("{{ pad(number, 3) }}.{{ ext }}");
/// let summary = session.start(files, rule, &ConflictStrategy::AutoNumber, |_| {}).await.unwrap();
/// assert_eq!(summary.success, 1);
/// # }
/// ```
pub struct Session {
    platform: PlatformHandle,
    recovery: RecoveryManager,
    planner: Planner,
    executor: ExecutorConfig,
}

impl Session {
    pub fn new(platform: PlatformHandle, store: StoreHandle, config: Config) -> Self {
        let executor = ExecutorConfig::from_config(&platform.config(), &config);
        let recovery = RecoveryManager::from_config(store, &config.recovery);
        let planner = Planner::new(platform.clone(), config.conflicts);
        Self { platform, recovery, planner, executor }
    }

    pub fn recovery(&self) -> &RecoveryManager {
        &self.recovery
    }

    /// Files currently selected on the platform.
    pub async fn selected(&self) -> Result<Vec<FileItem>> {
        self.platform.selected_files().await.or_raise(|| ErrorKind::Platform)
    }

    /// Plan the batch and persist its initial state, returning an executor
    /// ready to run. Use [`BatchExecutor::control`] to pause or cancel it.
    ///
    /// Failing to persist the initial state only costs crash recovery; the
    /// batch can still run.
    pub async fn prepare(
        &self,
        files: Vec<FileItem>,
        rule: RuleSpec,
        arbiter: &dyn ConflictArbiter,
    ) -> Result<BatchExecutor> {
        let plan = self.planner.plan(files, &rule, arbiter).await?;
        let state = OperationState::new(self.platform.name(), &plan, rule);
        let executor = BatchExecutor::new(plan, self.platform.clone(), self.executor.clone());
        if executor.is_empty() {
            return Ok(executor);
        }
        match self.recovery.save_operation_state(&state).await {
            Ok(()) => Ok(executor.with_recovery(self.recovery.clone())),
            Err(err) => {
                let kind: &ErrorKind = &err;
                tracing::warn!(error = %kind, "could not persist operation state, crash recovery disabled");
                Ok(executor)
            },
        }
    }

    /// Plan and run a batch to the end.
    pub async fn start(
        &self,
        files: Vec<FileItem>,
        rule: RuleSpec,
        arbiter: &dyn ConflictArbiter,
        on_progress: impl FnMut(&Progress),
    ) -> Result<BatchSummary> {
        self.prepare(files, rule, arbiter).await?.run(on_progress, |_| {}).await
    }

    /// An interrupted operation that can be resumed, if any.
    pub async fn recoverable(&self) -> Result<Option<OperationState>> {
        self.recovery.check_recoverable_operation().await
    }

    pub async fn resume(&self, state: &OperationState, on_progress: impl FnMut(&Progress)) -> Result<BatchSummary> {
        self.recovery.resume_operation(state, self.platform.clone(), self.executor.clone(), on_progress, |_| {}).await
    }

    /// Decline to resume: forget the interrupted operation.
    pub async fn discard(&self) -> Result<()> {
        self.recovery.clear_operation_state().await
    }
}
