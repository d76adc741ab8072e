//! Shared resource store backed by `SQLite`.
//!
//! Each entity gets its own table: `locks`, `claims`, `zones` and `sessions`
//! are keyed maps, `violations` is an append-only capped list, and `rules`
//! holds a single versioned document. Timestamps are Unix milliseconds.

use std::{str::FromStr, time::Duration};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use tracing::debug;

use crate::Result;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS locks (
        resource_path TEXT PRIMARY KEY,
        locked_by TEXT NOT NULL,
        reason TEXT,
        resource_type TEXT NOT NULL,
        locked_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS claims (
        what TEXT PRIMARY KEY,
        claimed_by TEXT NOT NULL,
        description TEXT,
        since INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_claims_claimed_by ON claims (claimed_by)",
    "CREATE TABLE IF NOT EXISTS zones (
        zone_id TEXT PRIMARY KEY,
        path TEXT NOT NULL,
        owner TEXT NOT NULL,
        description TEXT,
        updated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS sessions (
        agent_id TEXT PRIMARY KEY,
        role TEXT NOT NULL,
        started_at INTEGER NOT NULL,
        last_activity INTEGER NOT NULL,
        rules_version INTEGER NOT NULL,
        rules_acknowledged INTEGER NOT NULL DEFAULT 0,
        violation_count INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS violations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        agent_id TEXT NOT NULL,
        action TEXT NOT NULL,
        target TEXT,
        failures TEXT NOT NULL,
        timestamp INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS rules (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        version INTEGER NOT NULL,
        body TEXT NOT NULL
    )",
];

/// Handle to the shared store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect to a database URL such as `sqlite://.substrate/substrate.db`.
    ///
    /// The database file and its parent directory are created if missing,
    /// and the schema is initialized.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// Open a private in-memory store.
    ///
    /// The pool is pinned to a single long-lived connection because every
    /// `SQLite` memory connection is its own database.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, initializing the schema.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Get the database pool
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!(tables = SCHEMA.len(), "store schema ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_has_all_tables() -> Result<()> {
        let store = Store::open_in_memory().await?;
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(store.pool())
        .await?;
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["claims", "locks", "rules", "sessions", "violations", "zones"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_connect_creates_parent_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db_path = dir.path().join("nested").join("substrate.db");
        let url = format!("sqlite://{}", db_path.display());

        let _store = Store::connect(&url).await?;
        assert!(db_path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_schema_init_is_idempotent() -> Result<()> {
        let store = Store::open_in_memory().await?;
        let again = Store::from_pool(store.pool().clone()).await;
        assert!(again.is_ok());
        Ok(())
    }
}
