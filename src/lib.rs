//! Crawls Bandcamp accounts for new releases and serves them as
//! user-curated, paginated feeds.

pub mod bandcamp;
pub mod config;
pub mod crawler;
pub mod feed;
pub mod storage;
