//! Mango Core Library
//!
//! This library provides the core functionality for the `mango` tool, which
//! downloads manga chapters page by page and packs them into CBZ containers.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`chapter`] - Chapter, page and downloaded-file data model
//! - [`download`] - Page fetching and the concurrent chapter downloader
//! - [`pack`] - CBZ container writer and file naming
//! - [`catalog`] - Chapter sources and catalog rate limiting
//! - [`ranges`] - Chapter range selection syntax
//! - [`convert`] - Conversion to e-reader formats via `ebook-convert`
//! - [`pipeline`] - Multi-chapter batch acquisition

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod chapter;
pub mod convert;
pub mod download;
pub mod pack;
pub mod pipeline;
pub mod ranges;
#[cfg(test)]
pub mod test_support;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use catalog::{
    Catalog, CatalogError, MangadexCatalog, ManifestCatalog, RateLimitedCatalog, RateLimiter,
};
pub use chapter::{Chapter, ChapterSummary, DownloadedFile, Page};
pub use convert::{ConvertError, Converter, OutputFormat};
pub use download::{
    ChapterDownloader, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DownloadError, EngineError,
    HttpClient, PageFetcher, PageProgress, RetryPolicy,
};
pub use pack::{PackError, archive_cbz, bundle_chapters, cbz_filename, sanitize_filename};
pub use pipeline::{BatchReport, Pipeline, PipelineError, PipelineEvent};
pub use ranges::{Range, RangeError};
