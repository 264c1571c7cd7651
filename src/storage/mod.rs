mod feeds;
mod prefixes;
mod releases;
mod schema;
mod types;

pub use schema::Database;
pub use types::{
    DatabaseError, Feed, FeedPage, PageCursor, PageCursorError, Prefix, Release, ReleaseQuery,
};
