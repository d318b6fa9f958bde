//! Multi-chapter acquisition.
//!
//! [`Pipeline`] drives one batch: it asks the catalog for the series title
//! and chapter list, keeps the selected chapters, then resolves, downloads
//! and packs each of them in ascending chapter order. Containers can
//! optionally be converted afterwards.
//!
//! A chapter that fails is recorded in the [`BatchReport`] and skipped; the
//! rest of the batch carries on. Only failures that leave nothing sensible
//! to do (no title, no listing, nothing selected, a failed bundle write)
//! abort the batch.

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{Catalog, CatalogError};
use crate::chapter::{ChapterSummary, DownloadedFile};
use crate::convert::{ConversionProgress, ConversionResult, Converter, OutputFormat};
use crate::download::{ChapterDownloader, EngineError, PageProgress};
use crate::pack::{
    CBZ_EXTENSION, PackError, archive_cbz, bundle_chapters, cbz_filename, sanitize_filename,
};
use crate::ranges::{self, Range};

/// Errors that abort a whole batch.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The series title could not be fetched.
    #[error("failed to fetch title: {0}")]
    Title(#[source] CatalogError),

    /// The chapter list could not be fetched.
    #[error("failed to fetch chapters: {0}")]
    Listing(#[source] CatalogError),

    /// No listed chapter matches the selection and language.
    #[error("no chapters match the selection")]
    NoChaptersSelected,

    /// The bundled container could not be written.
    #[error("failed to bundle chapters: {0}")]
    Bundle(#[source] PackError),

    /// A blocking packing task panicked.
    #[error("packing task failed: {reason}")]
    TaskFailed {
        /// Join error description.
        reason: String,
    },
}

/// Why one chapter was skipped.
#[derive(Debug, Error)]
pub enum ChapterError {
    /// The catalog could not resolve the chapter's pages.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// A page could not be downloaded.
    #[error(transparent)]
    Download(#[from] EngineError),

    /// The chapter's container could not be written.
    #[error(transparent)]
    Pack(#[from] PackError),

    /// The chapter resolved to zero pages.
    #[error("chapter has no pages")]
    NoPages,

    /// A blocking packing task panicked.
    #[error("packing task failed: {reason}")]
    TaskFailed {
        /// Join error description.
        reason: String,
    },
}

/// A chapter that was skipped.
#[derive(Debug)]
pub struct ChapterFailure {
    /// Chapter number.
    pub number: f64,
    /// Chapter language.
    pub language: String,
    /// What went wrong.
    pub error: ChapterError,
}

/// A container written for one chapter.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedChapter {
    /// Chapter number.
    pub number: f64,
    /// Container path.
    pub path: PathBuf,
    /// Pages in the container.
    pub pages: usize,
}

/// A container that could not be converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionFailure {
    /// Container that was being converted.
    pub input: PathBuf,
    /// Error message.
    pub error: String,
}

/// Outcome of one batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Series title.
    pub title: String,
    /// Chapters selected for acquisition.
    pub selected: usize,
    /// Containers written in per-chapter mode, or chapters included in the
    /// bundle in bundle mode (all sharing the bundle path).
    pub archived: Vec<ArchivedChapter>,
    /// Chapters that were skipped.
    pub failed: Vec<ChapterFailure>,
    /// The bundled container, in bundle mode.
    pub bundle: Option<PathBuf>,
    /// Successful conversions.
    pub conversions: Vec<ConversionResult>,
    /// Failed conversions.
    pub conversion_failures: Vec<ConversionFailure>,
    /// Whether the batch was cancelled before every chapter was attempted.
    pub cancelled: bool,
}

impl BatchReport {
    /// Returns true if chapters were selected and none of them succeeded.
    #[must_use]
    pub fn all_failed(&self) -> bool {
        self.selected > 0 && self.archived.is_empty()
    }

    /// Containers produced by the batch.
    #[must_use]
    pub fn containers(&self) -> Vec<PathBuf> {
        match &self.bundle {
            Some(bundle) => vec![bundle.clone()],
            None => self.archived.iter().map(|a| a.path.clone()).collect(),
        }
    }
}

/// Progress events emitted while a batch runs.
#[derive(Debug)]
pub enum PipelineEvent<'a> {
    /// A chapter's pages were resolved and its download starts.
    ChapterStarted {
        /// Chapter number.
        number: f64,
        /// Pages to fetch.
        pages: usize,
    },
    /// One page finished (successfully or not).
    Page(PageProgress<'a>),
    /// A chapter was downloaded and packed (or queued for the bundle).
    ChapterDone {
        /// Chapter number.
        number: f64,
    },
    /// A chapter was skipped.
    ChapterFailed {
        /// Chapter number.
        number: f64,
        /// Why.
        error: &'a ChapterError,
    },
    /// One conversion finished.
    Converted(ConversionProgress<'a>),
}

/// One batch acquisition setup.
pub struct Pipeline<C> {
    catalog: C,
    downloader: ChapterDownloader,
    output_dir: PathBuf,
    language: Option<String>,
    bundle: bool,
    conversion: Option<(Converter, OutputFormat)>,
    cancel: CancellationToken,
}

impl<C: Catalog> Pipeline<C> {
    /// Creates a per-chapter pipeline writing into `output_dir`.
    pub fn new(catalog: C, downloader: ChapterDownloader, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            downloader,
            output_dir: output_dir.into(),
            language: None,
            bundle: false,
            conversion: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Keeps only chapters in `language` (case-insensitive). Blank means any.
    #[must_use]
    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language.filter(|l| !l.trim().is_empty());
        self
    }

    /// Writes all chapters into one container instead of one per chapter.
    #[must_use]
    pub fn with_bundle(mut self, bundle: bool) -> Self {
        self.bundle = bundle;
        self
    }

    /// Converts every produced container to `format`.
    #[must_use]
    pub fn with_conversion(mut self, converter: Converter, format: OutputFormat) -> Self {
        self.conversion = Some((converter, format));
        self
    }

    /// Stops the batch (and the chapter in flight) when `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Acquires every chapter matching `selection` (empty means all).
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] only for whole-batch failures; per-chapter
    /// and per-conversion failures are in the report.
    #[instrument(skip_all, fields(selection = %ranges::to_string_list(selection), bundle = self.bundle))]
    pub async fn run<F>(&self, selection: &[Range], mut on_event: F) -> Result<BatchReport, PipelineError>
    where
        F: FnMut(PipelineEvent<'_>),
    {
        let title = self
            .catalog
            .fetch_title()
            .await
            .map_err(PipelineError::Title)?;
        let listing = self
            .catalog
            .fetch_chapters()
            .await
            .map_err(PipelineError::Listing)?;

        let selected = self.select(listing, selection);
        if selected.is_empty() {
            return Err(PipelineError::NoChaptersSelected);
        }
        info!(title = %title, chapters = selected.len(), "starting batch");

        let mut report = BatchReport {
            title: title.clone(),
            selected: selected.len(),
            ..BatchReport::default()
        };
        let mut bundled: Vec<(f64, Vec<DownloadedFile>)> = Vec::new();

        for summary in &selected {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            match self.acquire(&title, summary, &mut on_event).await {
                Ok(Acquired::Archived(archived)) => {
                    on_event(PipelineEvent::ChapterDone {
                        number: summary.number,
                    });
                    report.archived.push(archived);
                }
                Ok(Acquired::Downloaded(files)) => {
                    on_event(PipelineEvent::ChapterDone {
                        number: summary.number,
                    });
                    bundled.push((summary.number, files));
                }
                Err(error) => {
                    warn!(chapter = summary.number, error = %error, "skipping chapter");
                    on_event(PipelineEvent::ChapterFailed {
                        number: summary.number,
                        error: &error,
                    });
                    if matches!(error, ChapterError::Download(EngineError::Cancelled)) {
                        report.cancelled = true;
                    }
                    report.failed.push(ChapterFailure {
                        number: summary.number,
                        language: summary.language.clone(),
                        error,
                    });
                    if report.cancelled {
                        break;
                    }
                }
            }
        }

        if self.bundle && !bundled.is_empty() {
            let path = self.output_dir.join(bundle_filename(&title, selection, &bundled));
            let pages: Vec<usize> = bundled.iter().map(|(_, files)| files.len()).collect();
            let numbers: Vec<f64> = bundled.iter().map(|(number, _)| *number).collect();
            let chapters = renumber_for_bundle(bundled);

            let written = tokio::task::spawn_blocking(move || bundle_chapters(path, &chapters, |_| {}))
                .await
                .map_err(|e| PipelineError::TaskFailed {
                    reason: e.to_string(),
                })?
                .map_err(PipelineError::Bundle)?;

            info!(path = %written.display(), chapters = numbers.len(), "bundle written");
            report.archived = numbers
                .into_iter()
                .zip(pages)
                .map(|(number, pages)| ArchivedChapter {
                    number,
                    path: written.clone(),
                    pages,
                })
                .collect();
            report.bundle = Some(written);
        }

        if let Some((converter, format)) = &self.conversion {
            self.convert_all(converter, *format, &mut report, &mut on_event)
                .await;
        }

        info!(
            archived = report.archived.len(),
            failed = report.failed.len(),
            "batch finished"
        );
        Ok(report)
    }

    fn select(&self, listing: Vec<ChapterSummary>, selection: &[Range]) -> Vec<ChapterSummary> {
        let mut selected: Vec<ChapterSummary> = listing
            .into_iter()
            .filter(|c| selection.is_empty() || ranges::contains_any(selection, c.number))
            .filter(|c| {
                self.language
                    .as_deref()
                    .is_none_or(|language| c.language.eq_ignore_ascii_case(language))
            })
            .collect();
        selected.sort_by(|a, b| a.number.total_cmp(&b.number));
        selected
    }

    async fn acquire<F>(
        &self,
        title: &str,
        summary: &ChapterSummary,
        on_event: &mut F,
    ) -> Result<Acquired, ChapterError>
    where
        F: FnMut(PipelineEvent<'_>),
    {
        let chapter = self.catalog.fetch_chapter(summary).await?;
        if chapter.pages.is_empty() {
            return Err(ChapterError::NoPages);
        }

        on_event(PipelineEvent::ChapterStarted {
            number: chapter.number,
            pages: chapter.page_count(),
        });
        let files = self
            .downloader
            .fetch_chapter_with_cancel(&chapter, &self.cancel, |progress| {
                on_event(PipelineEvent::Page(progress));
            })
            .await?;

        if self.bundle {
            return Ok(Acquired::Downloaded(files));
        }

        let path = self
            .output_dir
            .join(cbz_filename(title, chapter.number, &chapter.title));
        let pages = files.len();
        let path = tokio::task::spawn_blocking(move || archive_cbz(path, &files, |_| {}))
            .await
            .map_err(|e| ChapterError::TaskFailed {
                reason: e.to_string(),
            })??;

        info!(chapter = chapter.number, path = %path.display(), "chapter archived");
        Ok(Acquired::Archived(ArchivedChapter {
            number: chapter.number,
            path,
            pages,
        }))
    }

    async fn convert_all<F>(
        &self,
        converter: &Converter,
        format: OutputFormat,
        report: &mut BatchReport,
        on_event: &mut F,
    ) where
        F: FnMut(PipelineEvent<'_>),
    {
        let containers = report.containers();
        if containers.is_empty() {
            return;
        }

        match converter
            .convert_many(&containers, format, |progress| {
                on_event(PipelineEvent::Converted(progress));
            })
            .await
        {
            Ok(results) => {
                for (input, result) in containers.into_iter().zip(results) {
                    match result {
                        Ok(converted) => report.conversions.push(converted),
                        Err(error) => {
                            warn!(input = %input.display(), error = %error, "conversion failed");
                            report.conversion_failures.push(ConversionFailure {
                                input,
                                error: error.to_string(),
                            });
                        }
                    }
                }
            }
            Err(error) => {
                warn!(error = %error, "conversion skipped");
                let message = error.to_string();
                report
                    .conversion_failures
                    .extend(containers.into_iter().map(|input| ConversionFailure {
                        input,
                        error: message.clone(),
                    }));
            }
        }
    }
}

enum Acquired {
    Archived(ArchivedChapter),
    Downloaded(Vec<DownloadedFile>),
}

/// Renumbers pages 1..N across chapters (already in ascending chapter
/// order) so entry names never collide inside the bundle.
fn renumber_for_bundle(chapters: Vec<(f64, Vec<DownloadedFile>)>) -> BTreeMap<String, Vec<DownloadedFile>> {
    let mut next_page = 1u32;
    let mut grouped = BTreeMap::new();

    // Keyed by position: chapter numbers are not unique across languages.
    for (position, (number, mut files)) in chapters.into_iter().enumerate() {
        files.sort_by_key(|file| file.page);
        let renumbered: Vec<DownloadedFile> = files
            .into_iter()
            .map(|file| {
                let page = next_page;
                next_page += 1;
                DownloadedFile::new(page, file.data)
            })
            .collect();
        debug!(chapter = number, position, pages = renumbered.len(), "bundling chapter");
        grouped.insert(format!("{position:04}"), renumbered);
    }
    grouped
}

/// `<title> - Chapters <selection>.cbz`. Without an explicit selection the
/// span of the downloaded chapters is used.
fn bundle_filename(title: &str, selection: &[Range], bundled: &[(f64, Vec<DownloadedFile>)]) -> String {
    let label = if selection.is_empty() {
        let first = bundled.first().map_or(0.0, |(number, _)| *number);
        let last = bundled.last().map_or(first, |(number, _)| *number);
        Range::new(first, last).to_string()
    } else {
        ranges::to_string_list(&ranges::merge(selection))
    };

    format!(
        "{} - Chapters {}.{CBZ_EXTENSION}",
        sanitize_filename(title),
        sanitize_filename(&label)
    )
}

impl<C> std::fmt::Debug for Pipeline<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("downloader", &self.downloader)
            .field("output_dir", &self.output_dir)
            .field("language", &self.language)
            .field("bundle", &self.bundle)
            .finish_non_exhaustive()
    }
}
