//! Chapter catalogs.
//!
//! A [`Catalog`] knows a series' title, lists its chapters and resolves a
//! listed chapter into fetchable page URLs. The pipeline only talks to this
//! trait, so any source (a JSON manifest, the MangaDex API) can drive it.

mod mangadex;
mod manifest;
mod rate_limiter;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::chapter::{Chapter, ChapterSummary};

pub use mangadex::{FEED_PAGE_LIMIT, MangadexCatalog};
pub use manifest::{Manifest, ManifestCatalog, ManifestChapter};
pub use rate_limiter::{DEFAULT_CATALOG_CALLS_PER_MINUTE, RateLimitedCatalog, RateLimiter};

/// Errors returned by catalogs.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The manifest file could not be read.
    #[error("failed to read manifest {}: {source}", path.display())]
    Read {
        /// Manifest path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The manifest is not valid JSON of the expected shape.
    #[error("failed to parse manifest: {source}")]
    Parse {
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The manifest parsed but its content is unusable.
    #[error("invalid manifest: {reason}")]
    InvalidManifest {
        /// What is wrong with it.
        reason: String,
    },

    /// The series URL carries no usable manga id.
    #[error("not a valid series URL: {url}")]
    InvalidUrl {
        /// Offending URL.
        url: String,
    },

    /// The catalog HTTP client could not be built.
    #[error("failed to build catalog HTTP client: {source}")]
    Client {
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// A catalog API request failed or its body could not be decoded.
    #[error("catalog request to {url} failed: {source}")]
    Request {
        /// Requested URL.
        url: String,
        /// Underlying transport or decode error.
        #[source]
        source: reqwest::Error,
    },

    /// A catalog API answered with a non-success status.
    #[error("catalog request to {url} returned HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The series has no title in the requested or fallback language.
    #[error("series {id} has no usable title")]
    MissingTitle {
        /// Series id.
        id: String,
    },

    /// The requested chapter is not listed.
    #[error("chapter {number} ({language}) not found")]
    ChapterNotFound {
        /// Requested chapter number.
        number: f64,
        /// Requested language, possibly empty.
        language: String,
    },
}

/// Source of chapters for one series.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Returns the series title.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] if the title cannot be determined.
    async fn fetch_title(&self) -> Result<String, CatalogError>;

    /// Lists every chapter the catalog knows, in catalog order.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] if the listing fails.
    async fn fetch_chapters(&self) -> Result<Vec<ChapterSummary>, CatalogError>;

    /// Resolves one listed chapter into its ordered pages.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] if the chapter is unknown or its pages
    /// cannot be resolved.
    async fn fetch_chapter(&self, summary: &ChapterSummary) -> Result<Chapter, CatalogError>;
}
