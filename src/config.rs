//! Configuration file parser for ~/.config/bandcamp-feed/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted but logged, since they are usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level service configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. `:memory:` is accepted for throwaway runs.
    pub db_path: PathBuf,

    /// Account root URL; `{prefix}` is replaced by the account handle.
    pub account_url_template: String,

    /// Root of the main site, used for the following page and the fan API.
    pub site_url: String,

    /// Shared ceiling for every request sent to Bandcamp.
    pub requests_per_second: u32,

    /// How often a waiting request re-checks the limiter and priority gate.
    pub poll_interval_ms: u64,

    pub request_timeout_secs: u64,

    /// Pause between crawl iterations.
    pub crawl_interval_secs: u64,

    pub user_agent: String,

    /// `count` sent to the following API; large enough to fetch everything.
    pub follow_count: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("bandcamp-feed.db"),
            account_url_template: "https://{prefix}.bandcamp.com".to_string(),
            site_url: "https://bandcamp.com".to_string(),
            requests_per_second: 2,
            poll_interval_ms: 100,
            request_timeout_secs: 30,
            crawl_interval_secs: 1,
            user_agent: concat!("bandcamp-feed/", env!("CARGO_PKG_VERSION")).to_string(),
            follow_count: i32::MAX as u32,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 9] = [
        "db_path",
        "account_url_template",
        "site_url",
        "requests_per_second",
        "poll_interval_ms",
        "request_timeout_secs",
        "crawl_interval_secs",
        "user_agent",
        "follow_count",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing, empty or whitespace-only file → `Ok(Config::default())`
    /// - Over 1 MB → `Err(ConfigError::TooLarge)`
    /// - Invalid TOML or wrong value types → `Err(ConfigError::Parse)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let Some(content) = Self::read_capped(path)? else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        };
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        let raw: toml::Table = content.parse()?;
        for key in raw.keys().filter(|k| !Self::KNOWN_KEYS.contains(&k.as_str())) {
            tracing::warn!(key = %key, path = %path.display(), "Unknown key in config file, ignoring");
        }

        let config: Config = toml::Value::Table(raw).try_into()?;
        tracing::info!(
            path = %path.display(),
            db = %config.db_path.display(),
            requests_per_second = config.requests_per_second,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// File contents, or `None` if there is no file at `path`.
    fn read_capped(path: &Path) -> Result<Option<String>, ConfigError> {
        let size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if size > Self::MAX_FILE_SIZE {
            return Err(ConfigError::TooLarge(format!(
                "{} is {} bytes (max {} bytes)",
                path.display(),
                size,
                Self::MAX_FILE_SIZE
            )));
        }
        Ok(Some(std::fs::read_to_string(path)?))
    }

    /// Account root for `prefix`, without a trailing slash.
    pub fn account_root(&self, prefix: &str) -> String {
        account_root(&self.account_url_template, prefix)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn crawl_interval(&self) -> Duration {
        Duration::from_secs(self.crawl_interval_secs)
    }
}

pub(crate) fn account_root(template: &str, prefix: &str) -> String {
    template
        .replace("{prefix}", prefix)
        .trim_end_matches('/')
        .to_string()
}

// ============================================================================
// Tests
// ============================================================================
