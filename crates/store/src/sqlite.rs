//! SQLite-backed key/value store.

use exn::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use tracing::instrument;

use crate::KeyValueStore;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;

/// Embedded migrations that are run automatically on connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
// One writer (the batch executor) and the occasional reader.
const MAX_CONNECTIONS: u32 = 2;

/// Durable key/value store on top of a SQLite database file.
///
/// # Examples
///
/// ```no_run
/// use relabel_store::{SqliteStore, TypedStore};
///
/// # async fn example() -> relabel_store::error::Result<()> {
/// let store = SqliteStore::connect("/tmp/relabel.sqlite").await?;
/// store.set("greeting", &"hello").await?;
/// store.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    async fn new(options: SqliteConnectOptions, max: Option<u32>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max.unwrap_or(MAX_CONNECTIONS))
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Connect to the store database at the given path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = Self::base_options().filename(path.as_ref()).create_if_missing(true);
        Self::new(options, None).await
    }

    /// Connect to an in-memory database (useful for testing).
    ///
    /// Note:
    /// - In-memory databases are destroyed when the connection closes.
    /// - Do NOT apply `#[cfg(test)]` so that other crates can also use this in their tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        // In-memory database must be limited to one connection, otherwise
        // parallel connections will see different databases.
        Self::new(options, Some(1)).await
    }

    /// Base connection options shared between file and in-memory databases.
    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            // State is written after every renamed file; a crash must not
            // lose the last committed write.
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(std::time::Duration::from_millis(1500))
    }

    /// Run database migrations.
    ///
    /// This is called automatically by `connect` and `connect_in_memory`.
    #[instrument("performing store migrations", skip(self))]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    /// Close the database connection pool.
    ///
    /// After calling this, the store should not be used.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(row.map(|(value,)| value))
    }

    async fn set_raw(&self, key: &str, value: String) -> Result<()> {
        sqlx::query(
            r#"
                INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, CAST(strftime('%s', 'now') AS INTEGER))
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TypedStore;

    #[tokio::test]
    async fn test_connect_in_memory() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        assert!(!store.pool.is_closed());
        store.close().await;
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store.close().await;
    }

    #[tokio::test]
    async fn test_upsert_and_remove() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        store.set("k", &vec![1, 2]).await.unwrap();
        store.set("k", &vec![3]).await.unwrap();
        assert_eq!(store.get::<Vec<u32>>("k").await.unwrap(), Some(vec![3]));
        store.remove("k").await.unwrap();
        assert_eq!(store.get::<Vec<u32>>("k").await.unwrap(), None);
        store.close().await;
    }

    #[tokio::test]
    async fn test_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.sqlite");

        let store = SqliteStore::connect(&path).await.unwrap();
        store.set("state", &"persisted").await.unwrap();
        store.close().await;

        let store = SqliteStore::connect(&path).await.unwrap();
        assert_eq!(store.get::<String>("state").await.unwrap().as_deref(), Some("persisted"));
        store.close().await;
    }
}
