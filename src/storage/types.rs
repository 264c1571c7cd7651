use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The database is locked by another process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A feed must reference at least one prefix
    #[error("A feed needs at least one prefix")]
    EmptyFeed,

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A tracked Bandcamp account, identified by its subdomain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Prefix {
    pub handle: String,
    pub name: Option<String>,
}

impl Prefix {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            name: None,
        }
    }

    pub fn named(handle: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            name: Some(name.into()),
        }
    }
}

/// A user-curated set of prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feed {
    pub id: Uuid,
    pub name: String,
    pub owner_email: String,
    /// Sorted by handle
    pub prefixes: Vec<Prefix>,
}

/// A fully resolved release. Write-once: never updated after insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Release {
    pub id: String,
    pub url: String,
    pub title: String,
    pub artist: String,
    pub date: NaiveDate,
    /// Handle of the prefix that discovered this release
    pub prefix: String,
}

impl Release {
    pub fn page_cursor(&self) -> PageCursor {
        PageCursor {
            date: self.date,
            release_id: self.id.clone(),
        }
    }
}

// ============================================================================
// Pagination
// ============================================================================

/// Keyset pagination token over `(date DESC, id DESC)`.
///
/// Serialized as `{YYYY-MM-DD}_{release id}`. Dates never contain `_`, so the
/// first underscore always splits the two parts even if an id contains one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub date: NaiveDate,
    pub release_id: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageCursorError {
    #[error("Page key is missing the '_' separator: {0}")]
    MissingSeparator(String),
    #[error("Page key has an invalid date: {0}")]
    InvalidDate(String),
    #[error("Page key has an empty release id: {0}")]
    EmptyId(String),
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.date.format("%Y-%m-%d"), self.release_id)
    }
}

impl FromStr for PageCursor {
    type Err = PageCursorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (date, id) = s
            .split_once('_')
            .ok_or_else(|| PageCursorError::MissingSeparator(s.to_string()))?;
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| PageCursorError::InvalidDate(s.to_string()))?;
        if id.is_empty() {
            return Err(PageCursorError::EmptyId(s.to_string()));
        }
        Ok(Self {
            date,
            release_id: id.to_string(),
        })
    }
}

impl Serialize for PageCursor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Filters for a feed page read.
#[derive(Debug, Clone)]
pub struct ReleaseQuery {
    /// Resume strictly after this key
    pub cursor: Option<PageCursor>,
    /// Only releases dated on or before this day
    pub from_date: Option<NaiveDate>,
    /// When false, releases dated after today (UTC) are left out
    pub include_prereleases: bool,
    pub page_size: Option<u32>,
}

impl Default for ReleaseQuery {
    fn default() -> Self {
        Self {
            cursor: None,
            from_date: None,
            include_prereleases: true,
            page_size: None,
        }
    }
}

/// One page of a feed's merged releases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    pub name: String,
    pub releases: Vec<Release>,
    #[serde(rename = "nextPageKey")]
    pub next_cursor: Option<PageCursor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_cursor_display_and_parse() {
        let cursor = PageCursor {
            date: NaiveDate::from_ymd_opt(2020, 4, 1).unwrap(),
            release_id: "2072740262".to_string(),
        };
        assert_eq!(cursor.to_string(), "2020-04-01_2072740262");
        assert_eq!("2020-04-01_2072740262".parse::<PageCursor>(), Ok(cursor));
    }

    #[test]
    fn test_page_cursor_id_with_underscore() {
        let cursor: PageCursor = "2015-01-22_a_b".parse().unwrap();
        assert_eq!(cursor.release_id, "a_b");
    }

    #[test]
    fn test_page_cursor_rejects_garbage() {
        assert!(matches!(
            "20200401".parse::<PageCursor>(),
            Err(PageCursorError::MissingSeparator(_))
        ));
        assert!(matches!(
            "2020-13-01_1".parse::<PageCursor>(),
            Err(PageCursorError::InvalidDate(_))
        ));
        assert!(matches!(
            "2020-04-01_".parse::<PageCursor>(),
            Err(PageCursorError::EmptyId(_))
        ));
    }

    #[test]
    fn test_feed_page_json_shape() {
        let page = FeedPage {
            name: "title".to_string(),
            releases: vec![],
            next_cursor: Some("2020-04-01_1".parse().unwrap()),
        };
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["nextPageKey"], "2020-04-01_1");
        assert_eq!(json["name"], "title");
    }
}
