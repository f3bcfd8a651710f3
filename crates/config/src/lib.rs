//! Layered configuration for the rename engine.
//!
//! Values are resolved in order, later sources overriding earlier ones:
//!
//! 1. Built-in defaults ([`Config::default`]).
//! 2. A configuration file (TOML, YAML or JSON, chosen by extension).
//! 3. Environment variables prefixed with `RELABEL_`, using `__` to separate
//!    nested keys (`RELABEL_RETRY__BASE_DELAY_MS=500`).

pub mod error;

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "RELABEL_";
const DEFAULT_FILE_NAME: &str = "relabel.toml";

/// What to do with a batch item whose proposed name is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Insert `(n)` before the extension until the name is free.
    AutoNumber,
    /// Leave the file under its current name.
    Skip,
    /// Rename anyway and let the platform decide.
    Overwrite,
}

/// How a failed external conflict check is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckFailurePolicy {
    /// Treat the name as taken. Safer: never overwrite something unseen.
    #[default]
    AssumeConflict,
    /// Treat the name as free and let the rename itself fail if it isn't.
    AssumeFree,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Minimum gap between two platform requests. Falls back to the
    /// platform's own configuration when unset.
    pub request_interval_ms: Option<u64>,
    /// Maximum attempts per file (including the first). Falls back to the
    /// platform's own configuration when unset.
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Platform-specific `Api` error codes that should be retried.
    pub transient_codes: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { base_delay_ms: 1000, max_delay_ms: 10_000, transient_codes: Vec::new() }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Persisted operations older than this are discarded rather than offered
    /// for resumption.
    pub stale_after_minutes: u64,
    pub state_key: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self { stale_after_minutes: 30, state_key: "rename_operation_state".to_string() }
    }
}

impl RecoveryConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_minutes * 60)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    pub on_check_error: CheckFailurePolicy,
    /// Strategy applied without asking. When unset, the caller's arbiter is
    /// consulted whenever conflicts are found.
    pub strategy: Option<ConflictStrategy>,
    /// Re-check auto-numbered names against the platform.
    pub verify_numbered: bool,
    /// Highest suffix tried before giving up on a name.
    pub max_number: u32,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self { on_check_error: CheckFailurePolicy::default(), strategy: None, verify_numbered: true, max_number: 999 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database used for recovery state. Defaults to a file in the
    /// user's data directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub executor: ExecutorConfig,
    pub retry: RetryConfig,
    pub recovery: RecoveryConfig,
    pub conflicts: ConflictConfig,
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration from defaults, the default file location (if it
    /// exists), and the environment.
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        tracing::debug!(path = %path.display(), "loading configuration");
        Self::extract(Self::figment(Some(&path)))
    }

    /// Load configuration using an explicit file instead of the default
    /// location. The file must exist.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            exn::bail!(ErrorKind::Load);
        }
        Self::extract(Self::figment(Some(path)))
    }

    /// The layered provider chain, exposed so callers can merge in their own
    /// sources before extracting.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = file {
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Extract and validate a configuration from any figment.
    pub fn extract(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// Location of the configuration file when none is given explicitly.
    pub fn default_path() -> Result<PathBuf> {
        let dirs = project_dirs()?;
        Ok(dirs.config_dir().join(DEFAULT_FILE_NAME))
    }

    /// Location of the recovery database, honouring `store.path`.
    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store.path {
            Some(path) => Ok(path.clone()),
            None => Ok(project_dirs()?.data_dir().join("state.sqlite")),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.executor.max_retries == Some(0) {
            exn::bail!(ErrorKind::Invalid("executor.max_retries"));
        }
        if self.retry.base_delay_ms == 0 {
            exn::bail!(ErrorKind::Invalid("retry.base_delay_ms"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            exn::bail!(ErrorKind::Invalid("retry.max_delay_ms"));
        }
        if self.recovery.stale_after_minutes == 0 {
            exn::bail!(ErrorKind::Invalid("recovery.stale_after_minutes"));
        }
        if self.recovery.state_key.is_empty() {
            exn::bail!(ErrorKind::Invalid("recovery.state_key"));
        }
        if self.conflicts.max_number == 0 {
            exn::bail!(ErrorKind::Invalid("conflicts.max_number"));
        }
        Ok(())
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "relabel").ok_or_raise(|| ErrorKind::Directories)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.retry.base_delay(), Duration::from_secs(1));
        assert_eq!(config.retry.max_delay(), Duration::from_secs(10));
        assert_eq!(config.recovery.stale_after(), Duration::from_secs(30 * 60));
        assert_eq!(config.conflicts.on_check_error, CheckFailurePolicy::AssumeConflict);
        assert_eq!(config.conflicts.strategy, None);
    }

    // Tests that read the environment run inside a `Jail` so they serialise
    // with the one that sets variables.
    #[test]
    fn test_from_toml_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "relabel.toml",
                r#"
[executor]
max_retries = 5

[retry]
transient_codes = ["quota_exceeded"]

[conflicts]
strategy = "skip"
on_check_error = "assume_free"
"#,
            )?;
            let config = Config::from_file("relabel.toml").unwrap();
            assert_eq!(config.executor.max_retries, Some(5));
            assert_eq!(config.executor.request_interval_ms, None);
            assert_eq!(config.retry.transient_codes, vec!["quota_exceeded".to_string()]);
            assert_eq!(config.retry.base_delay_ms, 1000);
            assert_eq!(config.conflicts.strategy, Some(ConflictStrategy::Skip));
            assert_eq!(config.conflicts.on_check_error, CheckFailurePolicy::AssumeFree);
            Ok(())
        });
    }

    #[test]
    fn test_from_json_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("relabel.json", r#"{"recovery": {"stale_after_minutes": 5}}"#)?;
            let config = Config::from_file("relabel.json").unwrap();
            assert_eq!(config.recovery.stale_after(), Duration::from_secs(300));
            assert_eq!(config.recovery.state_key, "rename_operation_state");
            Ok(())
        });
    }

    #[test]
    fn test_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_file(dir.path().join("absent.toml")).unwrap_err();
        assert_eq!(*err, ErrorKind::Load);
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("relabel.yaml", "retry:\n  base_delay_ms: 200\n  max_delay_ms: 400\n")?;
            jail.set_env("RELABEL_RETRY__BASE_DELAY_MS", "300");
            jail.set_env("RELABEL_CONFLICTS__STRATEGY", "auto_number");
            let config = Config::extract(Config::figment(Some(Path::new("relabel.yaml")))).unwrap();
            assert_eq!(config.retry.base_delay_ms, 300);
            assert_eq!(config.retry.max_delay_ms, 400);
            assert_eq!(config.conflicts.strategy, Some(ConflictStrategy::AutoNumber));
            Ok(())
        });
    }

    #[rstest]
    #[case::zero_retries(|c: &mut Config| c.executor.max_retries = Some(0), "executor.max_retries")]
    #[case::zero_base(|c: &mut Config| c.retry.base_delay_ms = 0, "retry.base_delay_ms")]
    #[case::max_below_base(|c: &mut Config| c.retry.max_delay_ms = 10, "retry.max_delay_ms")]
    #[case::zero_stale(|c: &mut Config| c.recovery.stale_after_minutes = 0, "recovery.stale_after_minutes")]
    #[case::empty_key(|c: &mut Config| c.recovery.state_key.clear(), "recovery.state_key")]
    #[case::zero_number(|c: &mut Config| c.conflicts.max_number = 0, "conflicts.max_number")]
    fn test_validate_rejects(#[case] mutate: fn(&mut Config), #[case] field: &'static str) {
        let mut config = Config::default();
        mutate(&mut config);
        let err = config.validate().unwrap_err();
        assert_eq!(*err, ErrorKind::Invalid(field));
    }
}
