//! Platform models.
//!
//! These types are produced by platform adapters when listing or selecting
//! files and are persisted verbatim as part of a rename operation's state.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;

/// A file as reported by a platform adapter.
///
/// Identity is [`id`](Self::id): an opaque, provider-specific identifier that
/// stays stable across renames. [`name`](Self::name) and [`ext`](Self::ext)
/// are display data and become stale once a rename succeeds; nothing in the
/// engine rewrites a `FileItem` in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileItem {
    /// Provider-specific stable identifier.
    pub id: String,
    /// Full display name, extension included (e.g. `"report.pdf"`).
    pub name: String,
    /// Extension without the leading dot, empty when there is none.
    pub ext: String,
    /// Identifier of the containing folder.
    pub parent_id: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modified timestamp, when the provider reports one.
    pub mtime: Option<OffsetDateTime>,
}
impl FileItem {
    /// Create a new file item, deriving [`ext`](Self::ext) from the name.
    pub fn new(id: impl Into<String>, name: impl Into<String>, parent_id: impl Into<String>) -> Self {
        let name = name.into();
        let ext = split_name(&name).1.unwrap_or_default().to_string();
        Self { id: id.into(), name, ext, parent_id: parent_id.into(), size: 0, mtime: None }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_mtime(mut self, mtime: OffsetDateTime) -> Self {
        self.mtime = Some(mtime);
        self
    }

    /// Name without its extension.
    pub fn stem(&self) -> &str {
        split_name(&self.name).0
    }
}

/// Split a file name into `(stem, extension)`.
///
/// A leading dot does not start an extension, so dotfiles such as `.env` have
/// no extension.
///
/// ```
/// use relabel_platform::split_name;
/// assert_eq!(split_name("a.tar.gz"), ("a.tar", Some("gz")));
/// assert_eq!(split_name(".env"), (".env", None));
/// assert_eq!(split_name("README"), ("README", None));
/// ```
pub fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(0) | None => (name, None),
        Some(pos) if pos + 1 == name.len() => (name, None),
        Some(pos) => (&name[..pos], Some(&name[pos + 1..])),
    }
}

/// Join a stem and an optional extension back into a file name.
pub fn join_name(stem: &str, ext: Option<&str>) -> String {
    match ext {
        Some(ext) if !ext.is_empty() => format!("{stem}.{ext}"),
        _ => stem.to_string(),
    }
}

/// Provider-specific request tuning reported by an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Minimum spacing between two consecutive requests.
    pub request_interval: Duration,
    /// Maximum attempts per request (first attempt included).
    pub max_retries: u32,
    /// Per-request timeout enforced by the adapter itself.
    pub timeout: Duration,
}
impl Default for PlatformConfig {
    fn default() -> Self {
        Self { request_interval: Duration::from_millis(800), max_retries: 3, timeout: Duration::from_secs(30) }
    }
}
