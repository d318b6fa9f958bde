//! Concurrent chapter downloader.
//!
//! [`ChapterDownloader`] fetches every page of one [`Chapter`] with bounded
//! parallelism and returns the pages sorted by index, or a single error.
//!
//! # Concurrency Model
//!
//! - Each page runs in its own Tokio task inside a `JoinSet`
//! - A fresh semaphore with `concurrency` permits gates every fetch; the
//!   permit is held for the whole fetch (retries included) and released on
//!   drop, whatever the outcome
//! - Results flow back to a single collecting loop, which is the only place
//!   that touches the result list, the first-error slot and the progress
//!   callback
//!
//! # Failure Model
//!
//! The first failed page wins. Its error becomes the result of the whole
//! call and a cancellation token is fired: pages still waiting for a permit
//! never start, and in-flight requests are dropped. Later failures are
//! reported to the progress callback but otherwise discarded.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mango_core::chapter::{Chapter, ChapterSummary};
//! use mango_core::download::{ChapterDownloader, HttpClient, DEFAULT_CONCURRENCY};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = ChapterDownloader::new(Arc::new(HttpClient::new()), DEFAULT_CONCURRENCY)?;
//! let summary = ChapterSummary { id: String::new(), number: 1.0, title: String::new(), language: String::new() };
//! let chapter = Chapter::from_urls(&summary, ["https://cdn.example/1.jpg"]);
//! let files = downloader
//!     .fetch_chapter(&chapter, |progress| println!("page {} done", progress.page))
//!     .await?;
//! assert_eq!(files.len(), 1);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::client::PageFetcher;
use super::constants::{MAX_CONCURRENCY, MIN_CONCURRENCY};
use super::error::DownloadError;
use super::retry::{RetryDecision, RetryPolicy, classify_error};
use crate::chapter::{Chapter, DownloadedFile, Page};

/// Error type for chapter download operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// A page failed; the chapter is abandoned.
    #[error("page {page}: {source}")]
    Page {
        /// Index of the first page that failed.
        page: u32,
        /// Why it failed.
        #[source]
        source: DownloadError,
    },

    /// The caller cancelled the chapter before every page was fetched.
    #[error("chapter download cancelled")]
    Cancelled,

    /// A page task panicked or was aborted by the runtime.
    #[error("page task failed: {reason}")]
    TaskFailed {
        /// Description of the join failure.
        reason: String,
    },
}

impl EngineError {
    /// Returns the index of the failed page, if a page failure caused this error.
    #[must_use]
    pub fn page(&self) -> Option<u32> {
        match self {
            Self::Page { page, .. } => Some(*page),
            _ => None,
        }
    }
}

/// One page outcome, as seen by the progress callback.
#[derive(Debug, Clone, Copy)]
pub struct PageProgress<'a> {
    /// Pages completed by this event: 1 on success, 0 on failure.
    pub completed: usize,
    /// Index of the page this event is about.
    pub page: u32,
    /// The failure, if the page failed.
    pub error: Option<&'a DownloadError>,
}

/// Downloads the pages of a chapter with bounded parallelism.
///
/// Holds no per-chapter state, so one downloader can serve many chapters;
/// every [`fetch_chapter`](Self::fetch_chapter) call gets its own admission
/// guard.
#[derive(Clone)]
pub struct ChapterDownloader {
    fetcher: Arc<dyn PageFetcher>,
    concurrency: usize,
    retry_policy: RetryPolicy,
}

impl std::fmt::Debug for ChapterDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChapterDownloader")
            .field("concurrency", &self.concurrency)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl ChapterDownloader {
    /// Creates a downloader that never retries.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if `concurrency` is outside 1-100.
    #[instrument(level = "debug", skip(fetcher))]
    pub fn new(fetcher: Arc<dyn PageFetcher>, concurrency: usize) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }

        Ok(Self {
            fetcher,
            concurrency,
            retry_policy: RetryPolicy::none(),
        })
    }

    /// Replaces the retry policy applied to each page.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Fetches every page of `chapter`.
    ///
    /// `on_progress` is called once per page that finished fetching, in
    /// completion order, always from the calling task.
    ///
    /// # Errors
    ///
    /// Returns the first [`EngineError::Page`] observed; no partial page list
    /// is ever returned.
    pub async fn fetch_chapter<F>(
        &self,
        chapter: &Chapter,
        on_progress: F,
    ) -> Result<Vec<DownloadedFile>, EngineError>
    where
        F: FnMut(PageProgress<'_>),
    {
        self.fetch_chapter_with_cancel(chapter, &CancellationToken::new(), on_progress)
            .await
    }

    /// Same as [`fetch_chapter`](Self::fetch_chapter), but abandons the
    /// chapter when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Cancelled`] if `cancel` fired before all pages
    /// were fetched and no page had failed.
    #[instrument(skip_all, fields(chapter = chapter.number, pages = chapter.pages.len(), concurrency = self.concurrency))]
    pub async fn fetch_chapter_with_cancel<F>(
        &self,
        chapter: &Chapter,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<Vec<DownloadedFile>, EngineError>
    where
        F: FnMut(PageProgress<'_>),
    {
        if chapter.pages.is_empty() {
            debug!("chapter has no pages");
            return Ok(Vec::new());
        }

        let total = chapter.pages.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let cancel = cancel.child_token();
        let mut tasks = JoinSet::new();

        for page in &chapter.pages {
            tasks.spawn(fetch_page_task(
                Arc::clone(&self.fetcher),
                page.clone(),
                self.retry_policy.clone(),
                Arc::clone(&semaphore),
                cancel.clone(),
            ));
        }

        let mut files = Vec::with_capacity(total);
        let mut first_error: Option<EngineError> = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(PageOutcome::Fetched(file)) => {
                    on_progress(PageProgress {
                        completed: 1,
                        page: file.page,
                        error: None,
                    });
                    if first_error.is_none() {
                        files.push(file);
                    }
                }
                Ok(PageOutcome::Failed(page, error)) => {
                    on_progress(PageProgress {
                        completed: 0,
                        page,
                        error: Some(&error),
                    });
                    if first_error.is_none() {
                        warn!(page, error = %error, "page failed, abandoning chapter");
                        cancel.cancel();
                        first_error = Some(EngineError::Page {
                            page,
                            source: error,
                        });
                    } else {
                        debug!(page, error = %error, "discarding failure after first error");
                    }
                }
                Ok(PageOutcome::Abandoned(page)) => {
                    debug!(page, "page fetch abandoned");
                }
                Err(join_error) => {
                    warn!(error = %join_error, "page task did not complete");
                    if first_error.is_none() {
                        cancel.cancel();
                        first_error = Some(EngineError::TaskFailed {
                            reason: join_error.to_string(),
                        });
                    }
                }
            }
        }

        if let Some(error) = first_error {
            return Err(error);
        }
        if files.len() != total {
            debug!(fetched = files.len(), total, "chapter cancelled by caller");
            return Err(EngineError::Cancelled);
        }

        // Completion order is arbitrary.
        files.sort_by_key(|file| file.page);

        info!(pages = files.len(), "chapter downloaded");
        Ok(files)
    }
}

enum PageOutcome {
    Fetched(DownloadedFile),
    Failed(u32, DownloadError),
    Abandoned(u32),
}

async fn fetch_page_task(
    fetcher: Arc<dyn PageFetcher>,
    page: Page,
    policy: RetryPolicy,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) -> PageOutcome {
    let permit = tokio::select! {
        biased;
        () = cancel.cancelled() => return PageOutcome::Abandoned(page.index),
        permit = semaphore.acquire_owned() => permit,
    };
    // The semaphore is never closed while tasks are alive.
    let Ok(_permit) = permit else {
        return PageOutcome::Abandoned(page.index);
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => PageOutcome::Abandoned(page.index),
        result = fetch_with_retry(fetcher.as_ref(), &page, &policy) => match result {
            Ok(file) => PageOutcome::Fetched(file),
            Err(error) => PageOutcome::Failed(page.index, error),
        },
    }
}

#[instrument(skip(fetcher, page, policy), fields(page = page.index, url = %page.url))]
async fn fetch_with_retry(
    fetcher: &dyn PageFetcher,
    page: &Page,
    policy: &RetryPolicy,
) -> Result<DownloadedFile, DownloadError> {
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match fetcher.fetch_page(&page.url, page.index).await {
            Ok(file) => return Ok(file),
            Err(error) => match policy.should_retry(classify_error(&error), attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    info!(
                        attempt = next_attempt,
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying page"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(%reason, "not retrying page");
                    return Err(error);
                }
            },
        }
    }
}
