//! Page downloading.
//!
//! This module fetches the pages of one chapter concurrently and hands them
//! back in reading order.
//!
//! # Features
//!
//! - [`PageFetcher`] abstraction, with [`HttpClient`] as the HTTP implementation
//! - Bounded parallelism per chapter (1-100 in-flight fetches, default 5)
//! - First-error-wins failure handling with cancellation of pending pages
//! - Opt-in retries with exponential backoff for transient failures
//! - Per-page progress callback
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mango_core::chapter::{Chapter, ChapterSummary};
//! use mango_core::download::{ChapterDownloader, HttpClient, RetryPolicy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = ChapterDownloader::new(Arc::new(HttpClient::new()), 8)?
//!     .with_retry_policy(RetryPolicy::with_max_retries(2));
//! let summary = ChapterSummary { id: String::new(), number: 12.0, title: String::new(), language: "en".into() };
//! let chapter = Chapter::from_urls(&summary, ["https://cdn.example/1.jpg", "https://cdn.example/2.jpg"]);
//! let pages = downloader.fetch_chapter(&chapter, |_| {}).await?;
//! println!("fetched {} pages", pages.len());
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod engine;
mod error;
mod retry;

pub use client::{HttpClient, PageFetcher};
pub use constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_CONCURRENCY, MAX_CONCURRENCY, MIN_CONCURRENCY,
    REQUEST_TIMEOUT_SECS,
};
pub use engine::{ChapterDownloader, EngineError, PageProgress};
pub use error::DownloadError;
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error};
