use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

/// Handle to the SQLite store.
///
/// SQLite is single-writer, so the pool holds exactly one connection and
/// every operation additionally takes `lock` for its whole duration. That
/// makes each method observe a consistent snapshot and keeps multi-statement
/// checks (ownership, then mutation) free of interleaving. Callers must never
/// hold the lock across network I/O; the public API makes that impossible by
/// releasing it when each method returns.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    lock: Arc<Mutex<()>>,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `":memory:"` opens a private in-memory database (used by tests).
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process holds the
    /// database lock, `DatabaseError::Migration` if the schema can't be
    /// created and `DatabaseError::Other` for anything else.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: wait up to 5 seconds on a lock held by another
        // process before failing with SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            // The single connection must outlive idle periods or an
            // in-memory database would be dropped with it.
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let db = Self {
            pool,
            lock: Arc::new(Mutex::new(())),
        };
        db.migrate().await.map_err(|e| {
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
            {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        tracing::debug!(path = %path, "Database opened");
        Ok(db)
    }

    /// Take the store's serialization point.
    pub(crate) async fn serialize(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Run schema migrations atomically within a transaction.
    ///
    /// Every statement is `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<()> {
        let _guard = self.serialize().await;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS prefixes (
                handle TEXT PRIMARY KEY NOT NULL,
                name TEXT
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                owner_email TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_prefixes (
                feed_id TEXT NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                prefix_handle TEXT NOT NULL REFERENCES prefixes(handle),
                PRIMARY KEY (feed_id, prefix_handle)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS releases (
                id TEXT PRIMARY KEY NOT NULL,
                url TEXT NOT NULL,
                title TEXT NOT NULL,
                artist TEXT NOT NULL,
                date TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Many-to-many on paper; the crawler only ever writes one row per release.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS release_prefixes (
                release_id TEXT NOT NULL REFERENCES releases(id) ON DELETE CASCADE,
                prefix_handle TEXT NOT NULL REFERENCES prefixes(handle),
                PRIMARY KEY (release_id, prefix_handle)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feeds_owner ON feeds(owner_email)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feed_prefixes_prefix ON feed_prefixes(prefix_handle)",
        )
        .execute(&mut *tx)
        .await?;
        // Covers the keyset ORDER BY in get_feed_releases()
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_releases_date_id ON releases(date DESC, id DESC)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_release_prefixes_prefix ON release_prefixes(prefix_handle)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
