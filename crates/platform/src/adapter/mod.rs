//! Platform adapter trait and implementations.
//!
//! This module defines the `Platform` trait: the capability a cloud-storage
//! provider exposes to the rename engine. Concrete adapters (per-site DOM
//! scraping, raw HTTP calls, session handling) live outside this workspace;
//! the engine only ever sees this interface.

mod dry_run;
#[cfg(feature = "mock")]
mod mock;

pub use self::dry_run::DryRunPlatform;
#[cfg(feature = "mock")]
pub use self::mock::MockPlatform;
use crate::error::Result;
use crate::models::{FileItem, PlatformConfig};
use async_trait::async_trait;

/// Unified interface for remote storage providers.
///
/// All operations are asynchronous; the engine makes no assumption about how
/// an adapter reaches the network. Adapters are responsible for their own
/// per-request timeout (see [`PlatformConfig::timeout`]) and for translating
/// provider responses into [`ErrorKind`](crate::error::ErrorKind)s.
///
/// # Examples
///
/// ```
/// use relabel_platform::{Platform, error::Result};
///
/// async fn rename_first_selected(platform: &dyn Platform) -> Result<Option<String>> {
///     let files = platform.selected_files().await?;
///     let Some(file) = files.first() else {
///         return Ok(None);
///     };
///     let target = format!("renamed-{}", file.name);
///     if platform.check_name_conflict(&target, &file.parent_id).await? {
///         return Ok(None);
///     }
///     platform.rename_file(&file.id, &target).await.map(Some)
/// }
/// ```
#[async_trait]
pub trait Platform: Send + Sync {
    /// Name of the provider (used for logging and stored alongside persisted
    /// operation state).
    fn name(&self) -> &str;

    /// Provider-specific request tuning.
    fn config(&self) -> PlatformConfig {
        PlatformConfig::default()
    }

    /// Files currently selected by the user in the provider's UI.
    async fn selected_files(&self) -> Result<Vec<FileItem>>;

    /// All files in a folder, or in the current folder when `parent_id` is
    /// `None`.
    async fn all_files(&self, parent_id: Option<&str>) -> Result<Vec<FileItem>>;

    /// Rename a file, returning the name the provider reports after the
    /// rename.
    ///
    /// # Notes
    /// - Providers differ on what happens when `new_name` is already taken;
    ///   adapters should report [`AlreadyExists`](crate::error::ErrorKind::AlreadyExists)
    ///   when the provider refuses.
    async fn rename_file(&self, id: &str, new_name: &str) -> Result<String>;

    /// Check whether `name` is already used by a file in `parent_id`.
    ///
    /// Default implementation lists the folder with
    /// [`all_files()`](Self::all_files) and compares names; adapters with a
    /// cheaper existence check should override it.
    async fn check_name_conflict(&self, name: &str, parent_id: &str) -> Result<bool> {
        Ok(self.all_files(Some(parent_id)).await?.iter().any(|file| file.name == name))
    }

    /// Fetch live metadata for a single file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn file_info(&self, id: &str) -> Result<FileItem>;
}
