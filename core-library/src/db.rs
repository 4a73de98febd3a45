//! SQLite pool for the list store and the sync bookkeeping tables.
//!
//! File-backed databases run in WAL mode so a sync run writing items does not
//! block readers. Foreign keys are always on: deleting a list or a session
//! cascades to its items and conflict tasks. Migrations embedded from
//! `migrations/` are applied when the pool opens.
//!
//! ```rust,ignore
//! use core_library::db::{open, create_test_pool};
//!
//! let pool = open(Some("lists.db".into())).await?;
//! let scratch = create_test_pool().await?;
//! ```

use crate::{LibraryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const MEMORY_URL: &str = "sqlite::memory:";

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `sqlite:<path>` or `sqlite::memory:`
    pub database_url: String,
    pub max_connections: u32,
    /// How long to wait for a free pooled connection
    pub acquire_timeout: Duration,
    /// How long a statement waits on a locked database before failing
    pub busy_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

impl DatabaseConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_url: format!("sqlite:{}", database_path.into().display()),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }

    /// Each connection to `:memory:` is a separate database, so the pool holds
    /// exactly one connection that is never recycled.
    pub fn in_memory() -> Self {
        Self {
            database_url: MEMORY_URL.to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            idle_timeout: None,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        if !self.is_in_memory() {
            self.max_connections = max.max(1);
        }
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url == MEMORY_URL
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Open the pool for a configured database location, `None` meaning in-memory
///
/// # Errors
///
/// See [`create_pool`]
pub async fn open(database_path: Option<PathBuf>) -> Result<Pool<Sqlite>> {
    let config = match database_path {
        Some(path) => DatabaseConfig::new(path),
        None => DatabaseConfig::in_memory(),
    };
    create_pool(config).await
}

/// Open the pool, apply migrations and verify a connection
///
/// # Errors
///
/// Returns `LibraryError::Database` when the database cannot be opened and
/// `LibraryError::Migration` when a migration fails
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    let journal_mode = if config.is_in_memory() {
        SqliteJournalMode::Memory
    } else {
        SqliteJournalMode::Wal
    };

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(LibraryError::Database)?
        .journal_mode(journal_mode)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(config.busy_timeout)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            warn!(database_url = %config.database_url, error = %e, "Failed to open database");
            LibraryError::Database(e)
        })?;

    run_migrations(&pool).await?;
    health_check(&pool).await?;

    info!(
        database_url = %config.database_url,
        ?journal_mode,
        max_connections = config.max_connections,
        "List store ready"
    );
    Ok(pool)
}

/// In-memory pool with migrations applied
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    create_pool(DatabaseConfig::in_memory()).await
}

/// # Errors
///
/// Returns `LibraryError::Migration` if a migration fails to apply
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        warn!(error = %e, "Migration failed");
        LibraryError::Migration(e.to_string())
    })?;

    debug!("Migrations applied");
    Ok(())
}

/// # Errors
///
/// Returns `LibraryError::Database` if the probe query fails
pub async fn health_check(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map(|_| ())
        .map_err(LibraryError::Database)
}
