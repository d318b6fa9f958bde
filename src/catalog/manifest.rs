//! Catalog backed by a JSON manifest.
//!
//! ```json
//! {
//!   "title": "One Piece",
//!   "chapters": [
//!     { "number": 1, "title": "Romance Dawn", "language": "en",
//!       "pages": ["https://cdn.example/1/1.jpg", "https://cdn.example/1/2.jpg"] }
//!   ]
//! }
//! ```

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{Catalog, CatalogError};
use crate::chapter::{Chapter, ChapterSummary};

/// Top-level manifest document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Series title.
    pub title: String,
    /// Chapters in catalog order.
    #[serde(default)]
    pub chapters: Vec<ManifestChapter>,
}

/// One manifest chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestChapter {
    /// Chapter number.
    pub number: f64,
    /// Chapter title.
    #[serde(default)]
    pub title: String,
    /// Language code.
    #[serde(default)]
    pub language: String,
    /// Page URLs in reading order.
    #[serde(default)]
    pub pages: Vec<String>,
}

impl ManifestChapter {
    fn summary(&self) -> ChapterSummary {
        ChapterSummary {
            id: String::new(),
            number: self.number,
            title: self.title.clone(),
            language: self.language.clone(),
        }
    }

    #[allow(clippy::float_cmp)]
    fn matches(&self, summary: &ChapterSummary) -> bool {
        self.number == summary.number && self.language == summary.language
    }
}

/// [`Catalog`] over an in-memory [`Manifest`].
#[derive(Debug, Clone)]
pub struct ManifestCatalog {
    manifest: Manifest,
}

impl ManifestCatalog {
    /// Wraps a manifest after validating it.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidManifest`] for a blank title or a
    /// non-finite or negative chapter number.
    pub fn new(manifest: Manifest) -> Result<Self, CatalogError> {
        if manifest.title.trim().is_empty() {
            return Err(CatalogError::InvalidManifest {
                reason: "title is empty".to_string(),
            });
        }
        if let Some(bad) = manifest
            .chapters
            .iter()
            .find(|chapter| !chapter.number.is_finite() || chapter.number < 0.0)
        {
            return Err(CatalogError::InvalidManifest {
                reason: format!("chapter number {} is not a valid number", bad.number),
            });
        }
        Ok(Self { manifest })
    }

    /// Parses and validates a manifest from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Parse`] or [`CatalogError::InvalidManifest`].
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let manifest: Manifest =
            serde_json::from_str(json).map_err(|source| CatalogError::Parse { source })?;
        Self::new(manifest)
    }

    /// Reads a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Read`] if the file cannot be read, otherwise
    /// as [`from_json_str`](Self::from_json_str).
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| CatalogError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let catalog = Self::from_json_str(&json)?;
        debug!(chapters = catalog.manifest.chapters.len(), "manifest loaded");
        Ok(catalog)
    }

    /// Returns the underlying manifest.
    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }
}

#[async_trait]
impl Catalog for ManifestCatalog {
    async fn fetch_title(&self) -> Result<String, CatalogError> {
        Ok(self.manifest.title.clone())
    }

    async fn fetch_chapters(&self) -> Result<Vec<ChapterSummary>, CatalogError> {
        Ok(self
            .manifest
            .chapters
            .iter()
            .map(ManifestChapter::summary)
            .collect())
    }

    async fn fetch_chapter(&self, summary: &ChapterSummary) -> Result<Chapter, CatalogError> {
        self.manifest
            .chapters
            .iter()
            .find(|chapter| chapter.matches(summary))
            .map(|chapter| Chapter::from_urls(&chapter.summary(), chapter.pages.iter().cloned()))
            .ok_or_else(|| CatalogError::ChapterNotFound {
                number: summary.number,
                language: summary.language.clone(),
            })
    }
}
