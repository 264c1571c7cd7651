use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::prefixes::{insert_prefixes, OnConflict};
use super::schema::Database;
use super::types::{DatabaseError, Feed, Prefix};

/// Row type for feed queries joined with their prefixes
type FeedPrefixRow = (String, String, String, Option<String>, Option<String>);

/// Insert membership rows for `feed_id`, one per prefix.
async fn insert_memberships(
    conn: &mut SqliteConnection,
    feed_id: &str,
    prefixes: &[Prefix],
) -> Result<(), sqlx::Error> {
    const BATCH_SIZE: usize = 200;

    for chunk in prefixes.chunks(BATCH_SIZE) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT OR IGNORE INTO feed_prefixes (feed_id, prefix_handle) ");
        builder.push_values(chunk, |mut b, prefix| {
            b.push_bind(feed_id).push_bind(&prefix.handle);
        });
        builder.build().execute(&mut *conn).await?;
    }
    Ok(())
}

/// Fold joined rows into feeds, keeping the order of first appearance.
fn group_feed_rows(rows: Vec<FeedPrefixRow>) -> Result<Vec<Feed>, DatabaseError> {
    let mut order: Vec<String> = Vec::new();
    let mut feeds: BTreeMap<String, Feed> = BTreeMap::new();

    for (id, name, owner_email, handle, prefix_name) in rows {
        if !feeds.contains_key(&id) {
            let uuid = Uuid::parse_str(&id).map_err(|e| {
                DatabaseError::Other(sqlx::Error::Decode(Box::new(e)))
            })?;
            order.push(id.clone());
            feeds.insert(
                id.clone(),
                Feed {
                    id: uuid,
                    name,
                    owner_email,
                    prefixes: Vec::new(),
                },
            );
        }
        if let (Some(handle), Some(feed)) = (handle, feeds.get_mut(&id)) {
            feed.prefixes.push(Prefix {
                handle,
                name: prefix_name,
            });
        }
    }

    Ok(order
        .into_iter()
        .filter_map(|id| feeds.remove(&id))
        .collect())
}

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Create a feed owned by `owner_email` over `prefixes`, returning its id.
    ///
    /// Referenced prefixes are upserted in the same transaction (a supplied
    /// display name replaces the stored one).
    ///
    /// # Errors
    ///
    /// `DatabaseError::EmptyFeed` if `prefixes` is empty.
    pub async fn save_feed(
        &self,
        name: &str,
        owner_email: &str,
        prefixes: &[Prefix],
    ) -> Result<Uuid, DatabaseError> {
        if prefixes.is_empty() {
            return Err(DatabaseError::EmptyFeed);
        }

        let feed_id = Uuid::new_v4();
        let id = feed_id.to_string();

        let _guard = self.serialize().await;
        let mut tx = self.pool.begin().await?;

        insert_prefixes(&mut tx, prefixes, OnConflict::RefreshName).await?;

        sqlx::query("INSERT INTO feeds (id, name, owner_email) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(name)
            .bind(owner_email)
            .execute(&mut *tx)
            .await?;

        insert_memberships(&mut tx, &id, prefixes).await?;

        tx.commit().await?;
        tracing::info!(feed_id = %feed_id, prefixes = prefixes.len(), "Feed created");
        Ok(feed_id)
    }

    /// Rename a feed and replace its whole prefix set.
    ///
    /// Returns `false` without touching anything when the feed doesn't exist
    /// or isn't owned by `owner_email`. The ownership check and the writes
    /// share one transaction.
    ///
    /// # Errors
    ///
    /// `DatabaseError::EmptyFeed` if the owner supplies an empty prefix set.
    pub async fn edit_feed(
        &self,
        feed_id: Uuid,
        name: &str,
        owner_email: &str,
        prefixes: &[Prefix],
    ) -> Result<bool, DatabaseError> {
        let id = feed_id.to_string();

        let _guard = self.serialize().await;
        let mut tx = self.pool.begin().await?;

        let owner: Option<(String,)> = sqlx::query_as("SELECT owner_email FROM feeds WHERE id = ?")
            .bind(&id)
            .fetch_optional(&mut *tx)
            .await?;
        match owner {
            Some((existing,)) if existing == owner_email => {}
            _ => {
                tracing::debug!(feed_id = %feed_id, "Edit refused: missing feed or not the owner");
                return Ok(false);
            }
        }
        if prefixes.is_empty() {
            return Err(DatabaseError::EmptyFeed);
        }

        insert_prefixes(&mut tx, prefixes, OnConflict::RefreshName).await?;

        sqlx::query("DELETE FROM feed_prefixes WHERE feed_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        insert_memberships(&mut tx, &id, prefixes).await?;

        sqlx::query("UPDATE feeds SET name = ? WHERE id = ?")
            .bind(name)
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(feed_id = %feed_id, prefixes = prefixes.len(), "Feed edited");
        Ok(true)
    }

    /// Delete a feed and its memberships. Returns whether a feed was removed.
    pub async fn delete_feed(&self, feed_id: Uuid) -> Result<bool, DatabaseError> {
        let _guard = self.serialize().await;
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a feed only if `owner_email` owns it.
    pub async fn delete_owned_feed(
        &self,
        feed_id: Uuid,
        owner_email: &str,
    ) -> Result<bool, DatabaseError> {
        let _guard = self.serialize().await;
        let result = sqlx::query("DELETE FROM feeds WHERE id = ? AND owner_email = ?")
            .bind(feed_id.to_string())
            .bind(owner_email)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All feeds owned by `owner_email`, sorted by name.
    pub async fn get_user_feeds(&self, owner_email: &str) -> Result<Vec<Feed>, DatabaseError> {
        let _guard = self.serialize().await;
        let rows: Vec<FeedPrefixRow> = sqlx::query_as(
            r#"
            SELECT f.id, f.name, f.owner_email, p.handle, p.name
            FROM feeds f
            LEFT JOIN feed_prefixes fp ON fp.feed_id = f.id
            LEFT JOIN prefixes p ON p.handle = fp.prefix_handle
            WHERE f.owner_email = ?
            ORDER BY f.name, f.id, p.handle
        "#,
        )
        .bind(owner_email)
        .fetch_all(&self.pool)
        .await?;

        group_feed_rows(rows)
    }

    /// A single feed with its prefixes, if it exists.
    pub async fn get_feed(&self, feed_id: Uuid) -> Result<Option<Feed>, DatabaseError> {
        let _guard = self.serialize().await;
        let rows: Vec<FeedPrefixRow> = sqlx::query_as(
            r#"
            SELECT f.id, f.name, f.owner_email, p.handle, p.name
            FROM feeds f
            LEFT JOIN feed_prefixes fp ON fp.feed_id = f.id
            LEFT JOIN prefixes p ON p.handle = fp.prefix_handle
            WHERE f.id = ?
            ORDER BY p.handle
        "#,
        )
        .bind(feed_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(group_feed_rows(rows)?.into_iter().next())
    }
}
