//! HTTP client wrapper for fetching page images.
//!
//! This module provides [`HttpClient`], the production [`PageFetcher`]. One
//! fetch is one GET whose body is buffered in memory; nothing is retried here.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};
use super::error::DownloadError;
use crate::chapter::DownloadedFile;
use crate::user_agent;

/// Upper bound for pre-allocating a body buffer from `Content-Length`.
const MAX_PREALLOCATED_BODY: u64 = 16 * 1024 * 1024;

/// Retrieves the raw bytes of one page.
///
/// Implementations are stateless per call and must be shareable across the
/// tasks the chapter downloader spawns.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Performs a single fetch of `url` and tags the body with `page`.
    ///
    /// # Errors
    ///
    /// Returns a [`DownloadError`] describing the transport, status or body
    /// failure. Implementations do not retry.
    async fn fetch_page(&self, url: &str, page: u32) -> Result<DownloadedFile, DownloadError>;
}

/// HTTP client for fetching pages.
///
/// Created once and reused for every page so connections are pooled.
///
/// # Example
///
/// ```no_run
/// use mango_core::download::{HttpClient, PageFetcher};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new();
/// let file = client.fetch_page("https://cdn.example/data/1.jpg", 1).await?;
/// println!("page {} is {} bytes", file.page, file.data.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts.
    ///
    /// Default configuration:
    /// - Connect timeout: 30 seconds
    /// - Request timeout: 2 minutes
    /// - Gzip decompression: enabled
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::try_with_timeouts(CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS)
            .expect("failed to build HTTP client with static configuration")
    }

    /// Creates a new HTTP client with explicit timeout values.
    ///
    /// # Errors
    ///
    /// Returns the builder error if the TLS backend cannot be initialized.
    pub fn try_with_timeouts(
        connect_timeout_secs: u64,
        request_timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(request_timeout_secs))
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()?;
        Ok(Self { client })
    }

    /// Fetches `url` and returns the complete response body.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::InvalidUrl`] if the URL is not an absolute http(s) URL
    /// - [`DownloadError::Network`] / [`DownloadError::Timeout`] on transport failure
    /// - [`DownloadError::HttpStatus`] on a non-success status
    /// - [`DownloadError::Body`] if the body stream breaks
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DownloadError::invalid_url(url));
        }

        let response = self.client.get(parsed).send().await.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "remote rejected page request");
            return Err(DownloadError::http_status(url, status.as_u16()));
        }

        let capacity = response
            .content_length()
            .map_or(0, |len| len.min(MAX_PREALLOCATED_BODY));
        let mut data = Vec::with_capacity(usize::try_from(capacity).unwrap_or(0));
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                if e.is_timeout() {
                    DownloadError::timeout(url)
                } else {
                    DownloadError::body(url, e)
                }
            })?;
            data.extend_from_slice(&chunk);
        }

        debug!(bytes = data.len(), "page body received");
        Ok(data)
    }
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn fetch_page(&self, url: &str, page: u32) -> Result<DownloadedFile, DownloadError> {
        let data = self.fetch_bytes(url).await?;
        Ok(DownloadedFile::new(page, data))
    }
}
