//! # Note Store Database
//!
//! Opens the SQLite pool behind [`SqliteLocalStorage`](crate::SqliteLocalStorage).
//!
//! Every pool is opened in WAL mode with foreign keys enforced, migrated to
//! the latest schema and probed once before it is handed out.
//!
//! ```rust,ignore
//! use core_library::db::{create_pool, DatabaseConfig};
//!
//! let pool = create_pool(DatabaseConfig::new(data_dir.join("notes.db"))).await?;
//! let storage = core_library::SqliteLocalStorage::new(pool);
//! ```

use crate::{LibraryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const IN_MEMORY_URL: &str = "sqlite::memory:";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Tables the initial migration creates, one per synchronized entity type.
pub const ENTITY_TABLES: &[&str] = &[
    "notes",
    "resources",
    "notebooks",
    "tags",
    "saved_searches",
    "linked_notebooks",
];

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `sqlite:<path>` or `sqlite::memory:`
    pub database_url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub max_lifetime: Option<Duration>,
    pub idle_timeout: Option<Duration>,
}

impl DatabaseConfig {
    /// File-backed store at `database_path`. The file is created on first open.
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_url: format!("sqlite:{}", database_path.into().display()),
            min_connections: 1,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Some(Duration::from_secs(30 * 60)),
            idle_timeout: Some(Duration::from_secs(10 * 60)),
        }
    }

    /// Ephemeral store.
    ///
    /// Each connection to `:memory:` sees its own database, so the pool holds
    /// exactly one connection and never recycles it.
    pub fn in_memory() -> Self {
        Self {
            database_url: IN_MEMORY_URL.to_string(),
            min_connections: 1,
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: None,
            idle_timeout: None,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url == IN_MEMORY_URL
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_connections == 0 || self.min_connections > self.max_connections {
            return Err(LibraryError::InvalidInput {
                field: "max_connections".to_string(),
                message: format!(
                    "need 0 < min ({}) <= max ({})",
                    self.min_connections, self.max_connections
                ),
            });
        }
        if self.is_in_memory() && self.max_connections > 1 {
            return Err(LibraryError::InvalidInput {
                field: "max_connections".to_string(),
                message: "an in-memory store supports a single connection".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Opens, migrates and probes a pool for `config`.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    config.validate()?;
    info!(
        database_url = %config.database_url,
        max_connections = config.max_connections,
        "Opening note store database"
    );

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(LibraryError::Database)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .create_if_missing(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.idle_timeout)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to open note store database");
            LibraryError::Database(e)
        })?;

    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        warn!(error = %e, "Note store migration failed");
        LibraryError::Migration(e.to_string())
    })?;
    debug!("Note store schema is current");

    sqlx::query("SELECT 1")
        .fetch_one(&pool)
        .await
        .map_err(LibraryError::Database)?;

    Ok(pool)
}

/// Migrated single-connection in-memory pool.
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    create_pool(DatabaseConfig::in_memory()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[core_async::test]
    async fn test_migrations_create_entity_tables() {
        let pool = create_test_pool().await.unwrap();

        for table in ENTITY_TABLES {
            let (count,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                    .bind(table)
                    .fetch_one(&pool)
                    .await
                    .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }

    #[core_async::test]
    async fn test_file_backed_pool_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.db");

        create_pool(DatabaseConfig::new(&path).max_connections(2))
            .await
            .unwrap();
        assert!(path.exists());
    }

    #[core_async::test]
    async fn test_in_memory_pool_rejects_extra_connections() {
        let result = create_pool(DatabaseConfig::in_memory().max_connections(4)).await;
        assert!(matches!(result, Err(LibraryError::InvalidInput { .. })));
    }

    #[test]
    fn test_file_url() {
        let config = DatabaseConfig::new("notes.db")
            .min_connections(2)
            .max_connections(10);

        assert_eq!(config.database_url, "sqlite:notes.db");
        assert!(!config.is_in_memory());
        assert!(config.validate().is_ok());
        assert!(config.min_connections(11).validate().is_err());
    }

    #[test]
    fn test_in_memory_defaults() {
        let config = DatabaseConfig::default();
        assert!(config.is_in_memory());
        assert_eq!(config.max_connections, 1);
        assert!(config.idle_timeout.is_none());
    }
}
