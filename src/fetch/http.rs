//! HTTP fetcher backed by reqwest.

use super::{redact_url_for_logs, Fetch, FetchError, Progress};
use reqwest::header::{HeaderValue, ACCEPT_ENCODING};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Upper bound on the up-front body allocation taken from `Content-Length`.
#[cfg(not(target_arch = "wasm32"))]
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Plain HTTP GET downloader.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with a default client.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Fetch for HttpFetcher {
    async fn fetch(
        &self,
        url: &Url,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<Vec<u8>, FetchError> {
        debug!(url = %redact_url_for_logs(url), "GET");

        // The body must reach us byte-for-byte; ask intermediaries not to re-encode it.
        let request = self
            .client
            .get(url.clone())
            .header(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            resp = request.send() => resp.map_err(format_reqwest_error)?,
        };

        if !resp.status().is_success() {
            return Err(FetchError::HttpStatus {
                status: resp.status().as_u16(),
            });
        }

        let expected = resp.content_length();
        let body = read_body(resp, expected, cancel, progress).await?;
        debug!(url = %redact_url_for_logs(url), bytes = body.len(), "download complete");
        Ok(body)
    }
}

#[cfg(not(target_arch = "wasm32"))]
async fn read_body(
    mut resp: reqwest::Response,
    expected: Option<u64>,
    cancel: &CancellationToken,
    progress: &mut dyn FnMut(Progress),
) -> Result<Vec<u8>, FetchError> {
    let mut body = Vec::with_capacity(expected.unwrap_or(0).min(MAX_PREALLOC) as usize);

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            chunk = resp.chunk() => chunk.map_err(format_reqwest_error)?,
        };
        let Some(chunk) = chunk else {
            break;
        };
        if chunk.is_empty() {
            continue;
        }

        body.extend_from_slice(&chunk);
        progress(Progress::new(expected, body.len() as u64));
    }

    Ok(body)
}

// The browser fetch API behind reqwest does not expose partial reads, so the
// body arrives in one piece with a single progress report.
#[cfg(target_arch = "wasm32")]
async fn read_body(
    resp: reqwest::Response,
    expected: Option<u64>,
    cancel: &CancellationToken,
    progress: &mut dyn FnMut(Progress),
) -> Result<Vec<u8>, FetchError> {
    let bytes = tokio::select! {
        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        bytes = resp.bytes() => bytes.map_err(format_reqwest_error)?,
    };

    if !bytes.is_empty() {
        progress(Progress::new(expected, bytes.len() as u64));
    }
    Ok(bytes.to_vec())
}

fn format_reqwest_error(err: reqwest::Error) -> FetchError {
    let mut msg = err.to_string();
    if let Some(url) = err.url() {
        let redacted = redact_url_for_logs(url);
        msg = msg.replace(url.as_str(), redacted.as_str());
    }
    FetchError::Http(msg)
}
