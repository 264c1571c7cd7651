use thiserror::Error;
use uuid::Uuid;

use crate::bandcamp::{BandcampClient, ExtractionError};
use crate::storage::{Database, DatabaseError, Feed, FeedPage, Prefix, ReleaseQuery};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Interactive operations on feeds.
///
/// Owner strings are trusted as given; authenticating them is the caller's
/// job.
#[derive(Clone)]
pub struct FeedService {
    db: Database,
    client: BandcampClient,
}

impl FeedService {
    pub fn new(db: Database, client: BandcampClient) -> Self {
        Self { db, client }
    }

    /// Resolve the accounts `username` follows and make them known to the
    /// store, so they can be offered when building a feed.
    ///
    /// Nothing is crawled here; releases arrive once a feed references the
    /// prefixes.
    pub async fn import_followed(&self, username: &str) -> Result<Vec<Prefix>, FeedError> {
        let prefixes = self.client.resolve_followed_prefixes(username).await?;
        self.db.upsert_prefixes(&prefixes).await?;
        tracing::info!(username = %username, count = prefixes.len(), "Imported followed accounts");
        Ok(prefixes)
    }

    /// One page of a feed's releases; `None` if the feed doesn't exist.
    pub async fn feed_page(
        &self,
        feed_id: Uuid,
        query: &ReleaseQuery,
    ) -> Result<Option<FeedPage>, DatabaseError> {
        self.db.get_feed_releases(feed_id, query).await
    }

    pub async fn create_feed(
        &self,
        name: &str,
        owner_email: &str,
        prefixes: &[Prefix],
    ) -> Result<Uuid, DatabaseError> {
        let id = self.db.save_feed(name, owner_email, prefixes).await?;
        tracing::info!(feed_id = %id, owner = %owner_email, prefixes = prefixes.len(), "Created feed");
        Ok(id)
    }

    /// Replace a feed's name and prefix set. `false` if the feed doesn't
    /// exist or belongs to someone else.
    pub async fn edit_feed(
        &self,
        feed_id: Uuid,
        name: &str,
        owner_email: &str,
        prefixes: &[Prefix],
    ) -> Result<bool, DatabaseError> {
        let edited = self.db.edit_feed(feed_id, name, owner_email, prefixes).await?;
        if edited {
            tracing::info!(feed_id = %feed_id, prefixes = prefixes.len(), "Edited feed");
        } else {
            tracing::warn!(feed_id = %feed_id, owner = %owner_email, "Edit refused: feed not found or not owned");
        }
        Ok(edited)
    }

    /// Delete a feed if `owner_email` owns it.
    pub async fn delete_feed(&self, feed_id: Uuid, owner_email: &str) -> Result<bool, DatabaseError> {
        let deleted = self.db.delete_owned_feed(feed_id, owner_email).await?;
        if deleted {
            tracing::info!(feed_id = %feed_id, "Deleted feed");
        } else {
            tracing::warn!(feed_id = %feed_id, owner = %owner_email, "Delete refused: feed not found or not owned");
        }
        Ok(deleted)
    }

    pub async fn user_feeds(&self, owner_email: &str) -> Result<Vec<Feed>, DatabaseError> {
        self.db.get_user_feeds(owner_email).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::Release;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn service(server: &MockServer) -> (Database, FeedService) {
        let config = Config {
            account_url_template: format!("{}/{{prefix}}", server.uri()),
            site_url: server.uri(),
            requests_per_second: 1000,
            poll_interval_ms: 5,
            ..Config::default()
        };
        let db = Database::open(":memory:").await.unwrap();
        let client = BandcampClient::new(&config).unwrap();
        (db.clone(), FeedService::new(db, client))
    }

    #[tokio::test]
    async fn test_import_followed_stores_prefixes_without_crawling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fan/following/artists_and_labels"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<div id="pagedata" data-blob="{&quot;fan_data&quot;:{&quot;fan_id&quot;:7}}"></div>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/fancollection/1/following_bands"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "followeers": [{"url_hints": {"subdomain": "koseifukuda"}, "name": "Kosei Fukuda"}]
            })))
            .mount(&server)
            .await;
        let (db, service) = service(&server).await;

        let imported = service.import_followed("fan").await.unwrap();
        assert_eq!(imported, vec![Prefix::named("koseifukuda", "Kosei Fukuda")]);
        assert_eq!(db.get_prefixes().await.unwrap(), imported);
        assert_eq!(db.count_releases().await.unwrap(), 0);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_import_followed_propagates_extraction_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let (db, service) = service(&server).await;

        let err = service.import_followed("nobody").await.unwrap_err();
        assert!(matches!(err, FeedError::Extraction(ExtractionError::HttpStatus(404))));
        assert!(db.get_prefixes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_feed_lifecycle_enforces_ownership() {
        let server = MockServer::start().await;
        let (db, service) = service(&server).await;

        let id = service
            .create_feed("Mine", "me@example.com", &[Prefix::new("a")])
            .await
            .unwrap();
        db.add_release(
            "a",
            &Release {
                id: "1".to_string(),
                url: "https://a.bandcamp.com/album/one".to_string(),
                title: "One".to_string(),
                artist: "A".to_string(),
                date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                prefix: "a".to_string(),
            },
        )
        .await
        .unwrap();

        let page = service.feed_page(id, &ReleaseQuery::default()).await.unwrap().unwrap();
        assert_eq!(page.name, "Mine");
        assert_eq!(page.releases.len(), 1);

        assert!(!service
            .edit_feed(id, "Stolen", "them@example.com", &[Prefix::new("b")])
            .await
            .unwrap());
        assert!(!service.delete_feed(id, "them@example.com").await.unwrap());

        assert!(service
            .edit_feed(id, "Renamed", "me@example.com", &[Prefix::new("b")])
            .await
            .unwrap());
        let feeds = service.user_feeds("me@example.com").await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].name, "Renamed");
        assert_eq!(feeds[0].prefixes, vec![Prefix::new("b")]);

        assert!(service.delete_feed(id, "me@example.com").await.unwrap());
        assert!(service.feed_page(id, &ReleaseQuery::default()).await.unwrap().is_none());
        assert!(service.user_feeds("me@example.com").await.unwrap().is_empty());
    }
}
