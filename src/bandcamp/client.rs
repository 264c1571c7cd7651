use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use std::sync::Arc;

use super::error::ExtractionError;
use super::parser::{self, IntermediateRelease};
use super::throttle::{Priority, Throttle};
use crate::config::{self, Config};
use crate::storage::{Prefix, Release};

/// Maximum response body size (10MB)
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

/// Pagination token that starts the following listing at the newest entry
const FOLLOWING_START_TOKEN: &str = "9999999999:9999999999";

/// Embeddable player for a release, as shown in feed readers.
pub fn player_url(release_id: &str) -> String {
    format!(
        "https://bandcamp.com/EmbeddedPlayer/v=2/album={}/size=large/tracklist=true/artwork=small/",
        release_id
    )
}

#[derive(Debug, Serialize)]
struct FollowingRequest {
    fan_id: u64,
    older_than_token: &'static str,
    count: u32,
}

/// HTTP client for Bandcamp pages.
///
/// Every request goes through the shared [`Throttle`]. Crawl traffic
/// (`list_releases`, `fetch_detail`) is low priority; following lookups run
/// as a high-priority block.
#[derive(Clone)]
pub struct BandcampClient {
    http: reqwest::Client,
    throttle: Arc<Throttle>,
    account_url_template: String,
    site_url: String,
    follow_count: u32,
}

impl BandcampClient {
    pub fn new(config: &Config) -> Result<Self, ExtractionError> {
        let throttle = Throttle::new(config.requests_per_second, config.poll_interval());
        Self::with_throttle(config, Arc::new(throttle))
    }

    /// Build a client sharing an existing throttle.
    pub fn with_throttle(config: &Config, throttle: Arc<Throttle>) -> Result<Self, ExtractionError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            throttle,
            account_url_template: config.account_url_template.clone(),
            site_url: config.site_url.trim_end_matches('/').to_string(),
            follow_count: config.follow_count,
        })
    }

    pub fn throttle(&self) -> &Arc<Throttle> {
        &self.throttle
    }

    pub fn account_root(&self, prefix: &str) -> String {
        config::account_root(&self.account_url_template, prefix)
    }

    /// List an account's releases in page order (newest first).
    pub async fn list_releases(
        &self,
        prefix: &str,
    ) -> Result<Vec<IntermediateRelease>, ExtractionError> {
        let root = self.account_root(prefix);
        let html = self.get_text(&format!("{}/music", root), Priority::Low).await?;
        let releases = parser::parse_release_list(&html, prefix, &root)?;
        tracing::debug!(prefix = %prefix, count = releases.len(), "Listed releases");
        Ok(releases)
    }

    /// Fetch a release page and complete the entry with its release date.
    pub async fn fetch_detail(
        &self,
        release: &IntermediateRelease,
    ) -> Result<Release, ExtractionError> {
        let html = self.get_text(&release.url, Priority::Low).await?;
        let date = parser::parse_release_date(&html)?;
        Ok(Release {
            id: release.id.clone(),
            url: release.url.clone(),
            title: release.title.clone(),
            artist: release.artist.clone(),
            date,
            prefix: release.prefix.clone(),
        })
    }

    /// Look up the artists and labels a fan follows.
    ///
    /// Both requests run inside one high-priority block, so background
    /// crawling yields to them.
    pub async fn resolve_followed_prefixes(
        &self,
        username: &str,
    ) -> Result<Vec<Prefix>, ExtractionError> {
        self.throttle
            .high_priority(async {
                let page_url = format!("{}/{}/following/artists_and_labels", self.site_url, username);
                let html = self.get_text(&page_url, Priority::High).await?;
                let fan_id = parser::parse_fan_id(&html)?;

                let request = FollowingRequest {
                    fan_id,
                    older_than_token: FOLLOWING_START_TOKEN,
                    count: self.follow_count,
                };
                let api_url = format!("{}/api/fancollection/1/following_bands", self.site_url);
                let json = self.post_json(&api_url, &request, Priority::High).await?;
                let prefixes = parser::parse_following(&json)?;

                tracing::info!(
                    username = %username,
                    fan_id = fan_id,
                    count = prefixes.len(),
                    "Resolved followed accounts"
                );
                Ok::<_, ExtractionError>(prefixes)
            })
            .await
    }

    async fn get_text(&self, url: &str, priority: Priority) -> Result<String, ExtractionError> {
        self.throttle.admit(priority).await;
        tracing::debug!(url = %url, ?priority, "GET");
        let response = self.http.get(url).send().await?;
        read_text(response).await
    }

    async fn post_json<T: Serialize>(
        &self,
        url: &str,
        body: &T,
        priority: Priority,
    ) -> Result<String, ExtractionError> {
        let body = serde_json::to_vec(body).map_err(|e| ExtractionError::PageData(e.to_string()))?;
        self.throttle.admit(priority).await;
        tracing::debug!(url = %url, ?priority, "POST");
        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        read_text(response).await
    }
}

async fn read_text(response: reqwest::Response) -> Result<String, ExtractionError> {
    let status = response.status();
    if !status.is_success() {
        return Err(ExtractionError::HttpStatus(status.as_u16()));
    }
    let bytes = read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Read response body with a size limit to prevent memory exhaustion.
async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, ExtractionError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ExtractionError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ExtractionError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
