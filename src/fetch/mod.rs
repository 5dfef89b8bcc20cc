//! Binary-safe downloads with progress reporting.
//!
//! A fetch performs exactly one GET and hands back the raw response body.
//! The body is never text-decoded: driver scripts and program archives both
//! travel as opaque bytes.

mod http;

pub use http::HttpFetcher;

use std::future::Future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Download progress for a single request.
///
/// `received` never decreases across the callbacks of one fetch. `expected`
/// is `None` when the server did not announce a length (or announced 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Announced body length, if known.
    pub expected: Option<u64>,
    /// Bytes received so far.
    pub received: u64,
}

impl Progress {
    /// Create a progress snapshot. A zero `expected` is treated as unknown.
    pub fn new(expected: Option<u64>, received: u64) -> Self {
        Self {
            expected: expected.filter(|&total| total > 0),
            received,
        }
    }

    /// Whether the total size is unknown.
    pub fn is_indeterminate(&self) -> bool {
        self.expected.is_none()
    }

    /// Completion percentage in `0..=100`.
    ///
    /// An unknown total reads as 0% until the fetch completes.
    pub fn percent(&self) -> u8 {
        match self.expected {
            Some(total) => (self.received.saturating_mul(100) / total).min(100) as u8,
            None => 0,
        }
    }
}

/// Errors raised while downloading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request failed: {0}")]
    Http(String),

    #[error("request failed with HTTP status {status}")]
    HttpStatus { status: u16 },

    #[error("download cancelled")]
    Cancelled,
}

/// A source of raw bytes addressed by URL.
pub trait Fetch {
    /// Download `url` in full.
    ///
    /// `progress` is called zero or more times as data arrives. The returned
    /// body is exactly the bytes the server sent.
    fn fetch(
        &self,
        url: &Url,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(Progress),
    ) -> impl Future<Output = Result<Vec<u8>, FetchError>>;
}

/// Resolve `raw` against an optional base URL.
///
/// Absolute URLs are used as-is. Relative ones need a base.
pub fn resolve_url(base: Option<&Url>, raw: &str) -> Result<Url, FetchError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(FetchError::InvalidUrl {
            url: String::new(),
            reason: "URL is empty".into(),
        });
    }

    let parsed = match base {
        Some(base) => base.join(raw),
        None => Url::parse(raw),
    };

    parsed.map_err(|e| FetchError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Strip credentials, query and fragment so a URL is safe to log.
pub fn redact_url_for_logs(url: &Url) -> Url {
    let mut url = url.clone();
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.set_query(None);
    url.set_fragment(None);
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_known_total() {
        assert_eq!(Progress::new(Some(200), 0).percent(), 0);
        assert_eq!(Progress::new(Some(200), 50).percent(), 25);
        assert_eq!(Progress::new(Some(200), 200).percent(), 100);
    }

    #[test]
    fn test_percent_unknown_total_is_zero() {
        let zero = Progress::new(Some(0), 4096);
        assert!(zero.is_indeterminate());
        assert_eq!(zero.percent(), 0);

        let absent = Progress::new(None, 4096);
        assert_eq!(absent.percent(), 0);
    }

    #[test]
    fn test_percent_clamps_when_server_undercounts() {
        assert_eq!(Progress::new(Some(10), 25).percent(), 100);
    }

    #[test]
    fn test_resolve_relative_against_base() {
        let base = Url::parse("http://games.example/dos/index.html").unwrap();
        let url = resolve_url(Some(&base), "components/js-dos-apiv3.js").unwrap();
        assert_eq!(url.as_str(), "http://games.example/dos/components/js-dos-apiv3.js");
    }

    #[test]
    fn test_resolve_rejects_empty_and_relative_without_base() {
        assert!(matches!(resolve_url(None, "  "), Err(FetchError::InvalidUrl { .. })));
        assert!(matches!(resolve_url(None, "game.zip"), Err(FetchError::InvalidUrl { .. })));
    }

    #[test]
    fn test_redact_url() {
        let url = Url::parse("https://user:pw@cdn.example/game.zip?token=abc#x").unwrap();
        assert_eq!(redact_url_for_logs(&url).as_str(), "https://cdn.example/game.zip");
    }
}
