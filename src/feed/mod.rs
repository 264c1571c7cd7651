//! Feed assembly: the interactive operations behind a feed, and rendering a
//! feed page for readers.
//!
//! - [`service`] - feed management and the following import
//! - [`rss`] - RSS 2.0 output with an embedded player per release
//!
//! Pages are also served as JSON by serializing [`crate::storage::FeedPage`]
//! directly: `{ "name", "releases", "nextPageKey" }`.

pub mod rss;
mod service;

pub use rss::render_feed;
pub use service::{FeedError, FeedService};
