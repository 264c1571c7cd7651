use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::schema::Database;
use super::types::{DatabaseError, Prefix};

/// Keeps the bound parameter count well under SQLite's 999 limit (2 per row).
const BATCH_SIZE: usize = 200;

/// How an insert treats a prefix that already exists.
#[derive(Clone, Copy)]
pub(crate) enum OnConflict {
    /// Leave the stored row untouched
    Ignore,
    /// Take the new display name when one is given
    RefreshName,
}

/// Batch-insert prefixes on an open connection or transaction.
pub(crate) async fn insert_prefixes(
    conn: &mut SqliteConnection,
    prefixes: &[Prefix],
    on_conflict: OnConflict,
) -> Result<(), sqlx::Error> {
    for chunk in prefixes.chunks(BATCH_SIZE) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO prefixes (handle, name) ");
        builder.push_values(chunk, |mut b, prefix| {
            b.push_bind(&prefix.handle).push_bind(&prefix.name);
        });
        builder.push(match on_conflict {
            OnConflict::Ignore => " ON CONFLICT(handle) DO NOTHING",
            OnConflict::RefreshName => {
                " ON CONFLICT(handle) DO UPDATE SET name = COALESCE(excluded.name, prefixes.name)"
            }
        });
        builder.build().execute(&mut *conn).await?;
    }
    Ok(())
}

impl Database {
    // ========================================================================
    // Prefix Operations
    // ========================================================================

    /// Insert prefixes, ignoring any whose handle is already stored.
    pub async fn upsert_prefixes(&self, prefixes: &[Prefix]) -> Result<(), DatabaseError> {
        if prefixes.is_empty() {
            return Ok(());
        }

        let _guard = self.serialize().await;
        let mut tx = self.pool.begin().await?;
        insert_prefixes(&mut tx, prefixes, OnConflict::Ignore).await?;
        tx.commit().await?;

        tracing::debug!(count = prefixes.len(), "Upserted prefixes");
        Ok(())
    }

    /// Next prefix to crawl after `current` in the ring of feed-referenced prefixes.
    ///
    /// Returns the smallest referenced handle strictly greater than `current`,
    /// wrapping around to the smallest handle overall when `current` is `None`
    /// or already the largest. `None` only when no feed references a prefix.
    /// Nothing is persisted: the ring is recomputed on every call, so prefixes
    /// added or dropped between calls are picked up immediately.
    pub async fn get_next_prefix(&self, current: Option<&str>) -> Result<Option<String>, DatabaseError> {
        let _guard = self.serialize().await;
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT handle FROM (
                SELECT MIN(p.handle) AS handle, 0 AS pass
                FROM prefixes p
                JOIN feed_prefixes fp ON fp.prefix_handle = p.handle
                WHERE p.handle > ?
                UNION ALL
                SELECT MIN(p.handle) AS handle, 1 AS pass
                FROM prefixes p
                JOIN feed_prefixes fp ON fp.prefix_handle = p.handle
            )
            WHERE handle IS NOT NULL
            ORDER BY pass
            LIMIT 1
        "#,
        )
        .bind(current.unwrap_or(""))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(handle,)| handle))
    }

    /// All stored prefixes, sorted by handle.
    pub async fn get_prefixes(&self) -> Result<Vec<Prefix>, DatabaseError> {
        let _guard = self.serialize().await;
        let prefixes = sqlx::query_as::<_, Prefix>(
            "SELECT handle, name FROM prefixes ORDER BY handle",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(prefixes)
    }
}
