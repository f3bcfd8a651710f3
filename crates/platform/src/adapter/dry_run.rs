//! Dry-run platform adapter.
//!
//! This module provides an adapter that wraps another adapter and prevents
//! renames from executing, while indicating success on return. Useful for
//! previewing what a batch would do against live data.

use async_trait::async_trait;

use crate::{FileItem, Platform, PlatformConfig, PlatformHandle, error::Result};

/// Dry-run platform adapter.
///
/// Wraps another adapter and silently drops all renames, logging an
/// [`info event`](tracing::Event). Reads and conflict checks are forwarded.
#[derive(Clone)]
pub struct DryRunPlatform {
    inner: PlatformHandle,
}
impl DryRunPlatform {
    pub fn new(inner: PlatformHandle) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Platform for DryRunPlatform {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn config(&self) -> PlatformConfig {
        self.inner.config()
    }

    async fn selected_files(&self) -> Result<Vec<FileItem>> {
        self.inner.selected_files().await
    }

    async fn all_files(&self, parent_id: Option<&str>) -> Result<Vec<FileItem>> {
        self.inner.all_files(parent_id).await
    }

    async fn rename_file(&self, id: &str, new_name: &str) -> Result<String> {
        tracing::info!(platform = self.inner.name(), id, new_name, "Skipping rename during dry-run mode");
        Ok(new_name.to_string())
    }

    async fn check_name_conflict(&self, name: &str, parent_id: &str) -> Result<bool> {
        self.inner.check_name_conflict(name, parent_id).await
    }

    async fn file_info(&self, id: &str) -> Result<FileItem> {
        self.inner.file_info(id).await
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::adapter::MockPlatform;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_rename_is_not_forwarded() {
        let mock = Arc::new(MockPlatform::with_files([FileItem::new("1", "a.txt", "root")]));
        let dry = DryRunPlatform::new(mock.clone());

        assert_eq!(dry.rename_file("1", "b.txt").await.unwrap(), "b.txt");
        assert_eq!(mock.rename_calls(), 0);
        assert_eq!(dry.file_info("1").await.unwrap().name, "a.txt");
    }

    #[tokio::test]
    async fn test_reads_are_forwarded() {
        let mock = Arc::new(MockPlatform::with_files([FileItem::new("1", "a.txt", "root")]));
        let dry = DryRunPlatform::new(mock);

        assert!(dry.check_name_conflict("a.txt", "root").await.unwrap());
        assert_eq!(dry.selected_files().await.unwrap().len(), 1);
        assert_eq!(dry.name(), "mock");
    }
}
