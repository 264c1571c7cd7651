//! Pure parsers for the three kinds of Bandcamp page the client reads.
//!
//! Each function takes fetched text and either returns fully typed data or
//! fails; there are no partial results. The only tolerated irregularity is a
//! release title without a separate artist line, which falls back to
//! `artist = "Various"`.

use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::sync::LazyLock;
use url::Url;

use super::error::ExtractionError;
use crate::storage::Prefix;

/// Artist reported when a release-list title has no artist line
pub const VARIOUS_ARTISTS: &str = "Various";

static ITEM_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:album|track)-(.+)$").expect("valid item id pattern"));
static RELEASE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:released|releases) (\d{1,2} [A-Za-z]+ \d{4})").expect("valid date pattern")
});
const DATE_FORMAT: &str = "%d %B %Y";

static ITEM: LazyLock<Selector> = LazyLock::new(|| selector("[data-item-id]"));
static LINK: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("p.title"));
static DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"meta[name="description"]"#));
static PAGE_DATA: LazyLock<Selector> = LazyLock::new(|| selector("#pagedata"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid static selector")
}

/// A release-list entry before its detail page has been read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntermediateRelease {
    pub id: String,
    pub url: String,
    pub title: String,
    pub artist: String,
    pub prefix: String,
}

// ============================================================================
// Release list
// ============================================================================

/// Parse an account's `/music` page into its releases, in page order.
///
/// `account_root` is the account's base URL, used to absolutize relative
/// links. Any entry missing its link or title, or carrying an unparsable id,
/// fails the whole page.
pub fn parse_release_list(
    html: &str,
    prefix: &str,
    account_root: &str,
) -> Result<Vec<IntermediateRelease>, ExtractionError> {
    let document = Html::parse_document(html);
    document
        .select(&ITEM)
        .map(|item| parse_release_item(item, prefix, account_root))
        .collect()
}

fn parse_release_item(
    item: ElementRef<'_>,
    prefix: &str,
    account_root: &str,
) -> Result<IntermediateRelease, ExtractionError> {
    let raw_id = item.value().attr("data-item-id").unwrap_or_default();
    let id = parse_item_id(raw_id)?;

    let href = item
        .select(&LINK)
        .next()
        .and_then(|a| a.value().attr("href"))
        .ok_or_else(|| ExtractionError::structure("release link", &item.html()))?;
    let url = clean_release_url(href, account_root)?;

    let title = item
        .select(&TITLE)
        .next()
        .ok_or_else(|| ExtractionError::structure("release title", &item.html()))?;
    let (title, artist) = parse_title_and_artist(title)
        .ok_or_else(|| ExtractionError::structure("release title text", &item.html()))?;

    Ok(IntermediateRelease {
        id,
        url,
        title,
        artist,
        prefix: prefix.to_string(),
    })
}

/// `album-123` / `track-123` → `123`
pub fn parse_item_id(attribute: &str) -> Result<String, ExtractionError> {
    ITEM_ID
        .captures(attribute)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ExtractionError::InvalidItemId(attribute.to_string()))
}

/// Title on the first line, artist on the second.
///
/// Labels render the artist as a second line; artist pages show only the
/// title, in which case the artist falls back to [`VARIOUS_ARTISTS`].
/// `None` when the element has no text at all.
fn parse_title_and_artist(element: ElementRef<'_>) -> Option<(String, String)> {
    let lines: Vec<&str> = element
        .text()
        .flat_map(str::lines)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    match lines.as_slice() {
        [] => None,
        [title, artist, ..] => Some((title.to_string(), artist.to_string())),
        [only] => Some((only.to_string(), VARIOUS_ARTISTS.to_string())),
    }
}

/// Absolutize a release link and drop its query string and fragment.
pub fn clean_release_url(href: &str, account_root: &str) -> Result<String, ExtractionError> {
    let absolute = if href.starts_with('/') {
        format!("{}{}", account_root.trim_end_matches('/'), href)
    } else {
        href.to_string()
    };
    let mut url = Url::parse(&absolute).map_err(|_| ExtractionError::InvalidUrl(absolute.clone()))?;
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}

// ============================================================================
// Release detail
// ============================================================================

/// Read the release date out of a release page's meta description.
pub fn parse_release_date(html: &str) -> Result<NaiveDate, ExtractionError> {
    let document = Html::parse_document(html);
    let description = document
        .select(&DESCRIPTION)
        .next()
        .and_then(|meta| meta.value().attr("content"))
        .ok_or_else(|| ExtractionError::structure("meta description", html))?;
    parse_description_date(description)
}

/// `"… released 01 April 2020\n…"` → 2020-04-01
pub fn parse_description_date(description: &str) -> Result<NaiveDate, ExtractionError> {
    RELEASE_DATE
        .captures(description)
        .and_then(|c| c.get(1))
        .and_then(|m| NaiveDate::parse_from_str(m.as_str(), DATE_FORMAT).ok())
        .ok_or_else(|| ExtractionError::InvalidDate(super::error::excerpt(description)))
}

// ============================================================================
// Following
// ============================================================================

#[derive(Debug, Deserialize)]
struct PageData {
    fan_data: FanData,
}

#[derive(Debug, Deserialize)]
struct FanData {
    fan_id: u64,
}

#[derive(Debug, Deserialize)]
struct FollowingResponse {
    // Bandcamp's spelling
    followeers: Vec<Follower>,
}

#[derive(Debug, Deserialize)]
struct Follower {
    url_hints: UrlHints,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UrlHints {
    subdomain: String,
}

/// Pull the numeric fan id out of a following page's embedded data blob.
pub fn parse_fan_id(html: &str) -> Result<u64, ExtractionError> {
    let document = Html::parse_document(html);
    let blob = document
        .select(&PAGE_DATA)
        .next()
        .and_then(|el| el.value().attr("data-blob"))
        .ok_or_else(|| ExtractionError::structure("#pagedata data-blob", html))?;
    let data: PageData =
        serde_json::from_str(blob).map_err(|e| ExtractionError::PageData(e.to_string()))?;
    Ok(data.fan_data.fan_id)
}

/// Decode the following API response into prefixes sorted by handle.
pub fn parse_following(json: &str) -> Result<Vec<Prefix>, ExtractionError> {
    let response: FollowingResponse =
        serde_json::from_str(json).map_err(|e| ExtractionError::PageData(e.to_string()))?;
    let mut prefixes: Vec<Prefix> = response
        .followeers
        .into_iter()
        .map(|f| Prefix {
            handle: f.url_hints.subdomain,
            name: f.name,
        })
        .collect();
    prefixes.sort_by(|a, b| a.handle.cmp(&b.handle));
    prefixes.dedup_by(|a, b| a.handle == b.handle);
    Ok(prefixes)
}
