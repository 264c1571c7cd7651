use thiserror::Error;

/// Longest page excerpt carried inside an error
const FRAGMENT_LIMIT: usize = 300;

/// Errors raised while fetching or reading a Bandcamp page.
///
/// Structure errors carry the piece of markup that failed to match so a
/// broken page can be diagnosed from the logs alone.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Network-level error (DNS, connection, TLS, timeout)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// A URL could not be built or parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// A required element or attribute is missing from the page
    #[error("Missing {what} in: {fragment}")]
    Structure { what: &'static str, fragment: String },
    /// An item id attribute didn't have the `album-`/`track-` shape
    #[error("Couldn't parse item id from attribute '{0}'")]
    InvalidItemId(String),
    /// The release date couldn't be found or parsed
    #[error("Couldn't parse date from description '{0}'")]
    InvalidDate(String),
    /// The embedded page data or an API response didn't decode
    #[error("Invalid page data: {0}")]
    PageData(String),
}

impl ExtractionError {
    pub(crate) fn structure(what: &'static str, fragment: &str) -> Self {
        ExtractionError::Structure {
            what,
            fragment: excerpt(fragment),
        }
    }
}

/// Trim a page fragment for inclusion in an error message.
pub(crate) fn excerpt(fragment: &str) -> String {
    let fragment = fragment.trim();
    match fragment.char_indices().nth(FRAGMENT_LIMIT) {
        Some((end, _)) => format!("{}…", &fragment[..end]),
        None => fragment.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_short_fragment_unchanged() {
        assert_eq!(excerpt("  <li>x</li> "), "<li>x</li>");
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let long = "é".repeat(FRAGMENT_LIMIT + 10);
        let cut = excerpt(&long);
        assert_eq!(cut.chars().count(), FRAGMENT_LIMIT + 1);
        assert!(cut.ends_with('…'));
    }
}
