use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use super::schema::Database;
use super::types::{DatabaseError, FeedPage, Release, ReleaseQuery};

/// Largest page a single read may return (OOM protection)
const MAX_PAGE_SIZE: u32 = 500;

impl Database {
    // ========================================================================
    // Release Operations
    // ========================================================================

    /// Store a newly discovered release together with its discovering prefix.
    ///
    /// Releases are write-once. Callers check [`Database::is_release_present`]
    /// first; inserting an id twice is a constraint violation and fails.
    pub async fn add_release(&self, prefix: &str, release: &Release) -> Result<(), DatabaseError> {
        let _guard = self.serialize().await;
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO releases (id, url, title, artist, date) VALUES (?, ?, ?, ?, ?)")
            .bind(&release.id)
            .bind(&release.url)
            .bind(&release.title)
            .bind(&release.artist)
            .bind(release.date)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO release_prefixes (release_id, prefix_handle) VALUES (?, ?)")
            .bind(&release.id)
            .bind(prefix)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::debug!(prefix = %prefix, release_id = %release.id, "Release stored");
        Ok(())
    }

    /// Whether a release with this id has already been stored.
    pub async fn is_release_present(&self, release_id: &str) -> Result<bool, DatabaseError> {
        let _guard = self.serialize().await;
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM releases WHERE id = ?")
            .bind(release_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Total number of stored releases.
    pub async fn count_releases(&self) -> Result<i64, DatabaseError> {
        let _guard = self.serialize().await;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM releases")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ========================================================================
    // Feed Pages
    // ========================================================================

    /// Read one page of a feed's releases, newest first.
    ///
    /// Releases of every prefix in the feed are merged and ordered by
    /// `(date DESC, id DESC)`. With a cursor, only rows strictly after it in
    /// that order are returned, so pages neither repeat nor skip rows even
    /// while the crawler keeps inserting.
    ///
    /// # Returns
    ///
    /// - `None` if the feed doesn't exist
    /// - a page with no releases if the feed exists but nothing matches
    /// - `next_cursor` set only when a full page (`page_size` rows) came back;
    ///   a `page_size` of 0 yields an empty page with no cursor
    pub async fn get_feed_releases(
        &self,
        feed_id: Uuid,
        query: &ReleaseQuery,
    ) -> Result<Option<FeedPage>, DatabaseError> {
        let id = feed_id.to_string();
        let page_size = query.page_size.map(|n| n.min(MAX_PAGE_SIZE));

        let _guard = self.serialize().await;
        let mut tx = self.pool.begin().await?;

        let name: Option<(String,)> = sqlx::query_as("SELECT name FROM feeds WHERE id = ?")
            .bind(&id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some((name,)) = name else {
            return Ok(None);
        };

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT r.id, r.url, r.title, r.artist, r.date, rp.prefix_handle AS prefix
            FROM feed_prefixes fp
            JOIN release_prefixes rp ON rp.prefix_handle = fp.prefix_handle
            JOIN releases r ON r.id = rp.release_id
            WHERE fp.feed_id = "#,
        );
        builder.push_bind(&id);

        if let Some(cursor) = &query.cursor {
            builder
                .push(" AND (r.date < ")
                .push_bind(cursor.date)
                .push(" OR (r.date = ")
                .push_bind(cursor.date)
                .push(" AND r.id < ")
                .push_bind(&cursor.release_id)
                .push("))");
        }
        if let Some(from_date) = query.from_date {
            builder.push(" AND r.date <= ").push_bind(from_date);
        }
        if !query.include_prereleases {
            let today = chrono::Utc::now().date_naive();
            builder.push(" AND r.date <= ").push_bind(today);
        }

        builder.push(" ORDER BY r.date DESC, r.id DESC");
        if let Some(limit) = page_size {
            builder.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let releases: Vec<Release> = builder
            .build_query_as::<Release>()
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        let next_cursor = match (page_size, releases.last()) {
            (Some(limit), Some(last)) if releases.len() == limit as usize => {
                Some(last.page_cursor())
            }
            _ => None,
        };

        Ok(Some(FeedPage {
            name,
            releases,
            next_cursor,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{PageCursor, Prefix};
    use chrono::{Duration, NaiveDate};
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn release(id: &str, day: &str, prefix: &str) -> Release {
        Release {
            id: id.to_string(),
            url: format!("https://{}.bandcamp.com/album/{}", prefix, id),
            title: format!("Title {}", id),
            artist: "Artist".to_string(),
            date: date(day),
            prefix: prefix.to_string(),
        }
    }

    async fn feed_with_releases(db: &Database, releases: &[Release]) -> Uuid {
        let feed_id = db
            .save_feed("mix", "me@me.com", &[Prefix::new("a"), Prefix::new("b")])
            .await
            .unwrap();
        for r in releases {
            db.add_release(&r.prefix, r).await.unwrap();
        }
        feed_id
    }

    #[tokio::test]
    async fn test_add_release_marks_present() {
        let db = test_db().await;
        db.upsert_prefixes(&[Prefix::new("a")]).await.unwrap();
        let r = release("1", "2020-01-01", "a");

        assert!(!db.is_release_present("1").await.unwrap());
        db.add_release("a", &r).await.unwrap();
        assert!(db.is_release_present("1").await.unwrap());
        assert_eq!(db.count_releases().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_release_twice_fails_without_duplicating() {
        let db = test_db().await;
        db.upsert_prefixes(&[Prefix::new("a")]).await.unwrap();
        let r = release("1", "2020-01-01", "a");

        db.add_release("a", &r).await.unwrap();
        assert!(db.add_release("a", &r).await.is_err());
        assert_eq!(db.count_releases().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_release_for_unknown_prefix_rolls_back() {
        let db = test_db().await;
        let r = release("1", "2020-01-01", "ghost");

        assert!(db.add_release("ghost", &r).await.is_err());
        assert!(!db.is_release_present("1").await.unwrap());
    }

    #[tokio::test]
    async fn test_feed_releases_missing_feed_is_none() {
        let db = test_db().await;
        let page = db
            .get_feed_releases(Uuid::new_v4(), &ReleaseQuery::default())
            .await
            .unwrap();
        assert_eq!(page, None);
    }

    #[tokio::test]
    async fn test_feed_releases_empty_feed_has_name() {
        let db = test_db().await;
        let feed_id = feed_with_releases(&db, &[]).await;
        let page = db
            .get_feed_releases(feed_id, &ReleaseQuery::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.name, "mix");
        assert!(page.releases.is_empty());
        assert_eq!(page.next_cursor, None);
    }

    #[tokio::test]
    async fn test_feed_releases_merge_and_order() {
        let db = test_db().await;
        let feed_id = feed_with_releases(
            &db,
            &[
                release("10", "2020-01-01", "a"),
                release("30", "2021-06-01", "b"),
                release("20", "2020-01-01", "b"),
            ],
        )
        .await;

        let page = db
            .get_feed_releases(feed_id, &ReleaseQuery::default())
            .await
            .unwrap()
            .unwrap();
        let ids: Vec<&str> = page.releases.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["30", "20", "10"]);
        assert_eq!(page.releases[1].prefix, "b");
        assert_eq!(page.next_cursor, None);
    }

    #[tokio::test]
    async fn test_feed_releases_only_from_member_prefixes() {
        let db = test_db().await;
        let feed_id = feed_with_releases(&db, &[release("1", "2020-01-01", "a")]).await;
        db.upsert_prefixes(&[Prefix::new("outsider")]).await.unwrap();
        db.add_release("outsider", &release("2", "2020-01-02", "outsider"))
            .await
            .unwrap();

        let page = db
            .get_feed_releases(feed_id, &ReleaseQuery::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.releases.len(), 1);
        assert_eq!(page.releases[0].id, "1");
    }

    #[tokio::test]
    async fn test_pagination_is_complete_and_unique() {
        let db = test_db().await;
        let days = ["2019-05-05", "2020-01-01", "2020-01-01", "2020-01-01", "2021-12-31"];
        let mut fixtures = Vec::new();
        for i in 0..23 {
            let prefix = if i % 2 == 0 { "a" } else { "b" };
            fixtures.push(release(&format!("{:03}", i), days[i % days.len()], prefix));
        }
        let feed_id = feed_with_releases(&db, &fixtures).await;

        for page_size in [1u32, 2, 5, 23, 50] {
            let mut seen: Vec<Release> = Vec::new();
            let mut cursor: Option<PageCursor> = None;
            loop {
                let query = ReleaseQuery {
                    cursor: cursor.clone(),
                    page_size: Some(page_size),
                    ..ReleaseQuery::default()
                };
                let page = db
                    .get_feed_releases(feed_id, &query)
                    .await
                    .unwrap()
                    .unwrap();
                assert!(page.releases.len() <= page_size as usize);
                seen.extend(page.releases);
                match page.next_cursor {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }

            assert_eq!(seen.len(), fixtures.len(), "page_size={}", page_size);
            let unique: HashSet<&str> = seen.iter().map(|r| r.id.as_str()).collect();
            assert_eq!(unique.len(), fixtures.len());
            for pair in seen.windows(2) {
                assert!(
                    (pair[0].date, &pair[0].id) > (pair[1].date, &pair[1].id),
                    "not strictly descending: {:?} then {:?}",
                    pair[0].id,
                    pair[1].id
                );
            }
        }
    }

    #[tokio::test]
    async fn test_pagination_survives_concurrent_inserts() {
        let db = test_db().await;
        let feed_id = feed_with_releases(
            &db,
            &[
                release("1", "2020-01-03", "a"),
                release("2", "2020-01-02", "a"),
                release("3", "2020-01-01", "a"),
            ],
        )
        .await;

        let first = db
            .get_feed_releases(
                feed_id,
                &ReleaseQuery {
                    page_size: Some(2),
                    ..ReleaseQuery::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        // A newer release lands between page reads; it belongs before the cursor
        db.add_release("b", &release("9", "2020-02-01", "b"))
            .await
            .unwrap();

        let second = db
            .get_feed_releases(
                feed_id,
                &ReleaseQuery {
                    cursor: first.next_cursor.clone(),
                    page_size: Some(2),
                    ..ReleaseQuery::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        let ids: Vec<&str> = second.releases.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["3"]);
        assert_eq!(second.next_cursor, None);
    }

    #[tokio::test]
    async fn test_from_date_is_inclusive_upper_bound() {
        let db = test_db().await;
        let feed_id = feed_with_releases(
            &db,
            &[
                release("1", "2021-01-01", "a"),
                release("2", "2020-04-01", "a"),
                release("3", "2015-01-22", "b"),
            ],
        )
        .await;

        let page = db
            .get_feed_releases(
                feed_id,
                &ReleaseQuery {
                    from_date: Some(date("2020-04-01")),
                    ..ReleaseQuery::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        let ids: Vec<&str> = page.releases.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3"]);
    }

    #[tokio::test]
    async fn test_prereleases_excluded_on_request() {
        let db = test_db().await;
        let today = chrono::Utc::now().date_naive();
        let upcoming = (today + Duration::days(30)).format("%Y-%m-%d").to_string();
        let feed_id = feed_with_releases(
            &db,
            &[
                release("future", &upcoming, "a"),
                release("past", "2020-01-01", "a"),
            ],
        )
        .await;

        let all = db
            .get_feed_releases(feed_id, &ReleaseQuery::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(all.releases.len(), 2);

        let released = db
            .get_feed_releases(
                feed_id,
                &ReleaseQuery {
                    include_prereleases: false,
                    ..ReleaseQuery::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(released.releases.len(), 1);
        assert_eq!(released.releases[0].id, "past");
    }

    #[tokio::test]
    async fn test_full_last_page_yields_cursor_then_empty_page() {
        let db = test_db().await;
        let feed_id = feed_with_releases(
            &db,
            &[release("1", "2020-01-02", "a"), release("2", "2020-01-01", "a")],
        )
        .await;

        let query = ReleaseQuery {
            page_size: Some(2),
            ..ReleaseQuery::default()
        };
        let first = db.get_feed_releases(feed_id, &query).await.unwrap().unwrap();
        assert_eq!(
            first.next_cursor.as_ref().map(|c| c.to_string()).as_deref(),
            Some("2020-01-01_2")
        );

        let second = db
            .get_feed_releases(
                feed_id,
                &ReleaseQuery {
                    cursor: first.next_cursor,
                    ..query
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert!(second.releases.is_empty());
        assert_eq!(second.next_cursor, None);
    }

    #[tokio::test]
    async fn test_zero_page_size_returns_empty_page_without_cursor() {
        let db = test_db().await;
        let feed_id = feed_with_releases(&db, &[release("1", "2020-01-01", "a")]).await;

        let page = db
            .get_feed_releases(
                feed_id,
                &ReleaseQuery {
                    page_size: Some(0),
                    ..ReleaseQuery::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.name, "mix");
        assert!(page.releases.is_empty());
        assert_eq!(page.next_cursor, None);
    }
}
