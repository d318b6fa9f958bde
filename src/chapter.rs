//! Chapter data model shared by the catalog, downloader and packer.
//!
//! A [`Chapter`] is produced once per acquisition request by a catalog and
//! consumed read-only by the downloader. Each successfully fetched page becomes
//! a [`DownloadedFile`], which lives until the archive writer packs it.

use serde::{Deserialize, Serialize};

/// One page of a chapter: its 1-based reading-order index and source URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based index matching reading order.
    pub index: u32,
    /// Directly fetchable URL of the page image.
    pub url: String,
}

impl Page {
    /// Creates a page descriptor.
    #[must_use]
    pub fn new(index: u32, url: impl Into<String>) -> Self {
        Self {
            index,
            url: url.into(),
        }
    }
}

/// Display metadata for a chapter, as listed by a catalog before its pages
/// are resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterSummary {
    /// Catalog-specific chapter id, empty when the catalog needs none.
    #[serde(default)]
    pub id: String,
    /// Chapter number; fractional for extras (e.g. `10.5`).
    pub number: f64,
    /// Chapter title, possibly empty.
    #[serde(default)]
    pub title: String,
    /// Translated language code, possibly empty.
    #[serde(default)]
    pub language: String,
}

/// A chapter with its ordered pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    /// Chapter number; fractional for extras (e.g. `10.5`).
    pub number: f64,
    /// Chapter title, possibly empty.
    #[serde(default)]
    pub title: String,
    /// Translated language code, possibly empty.
    #[serde(default)]
    pub language: String,
    /// Pages in reading order.
    pub pages: Vec<Page>,
}

impl Chapter {
    /// Builds a chapter from a summary and a list of page URLs, assigning
    /// dense 1-based page indices in the given order.
    #[must_use]
    pub fn from_urls<I, S>(summary: &ChapterSummary, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pages = urls
            .into_iter()
            .zip(1u32..)
            .map(|(url, index)| Page::new(index, url))
            .collect();
        Self {
            number: summary.number,
            title: summary.title.clone(),
            language: summary.language.clone(),
            pages,
        }
    }

    /// Returns the number of pages.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Returns the display metadata of this chapter.
    #[must_use]
    pub fn summary(&self) -> ChapterSummary {
        ChapterSummary {
            id: String::new(),
            number: self.number,
            title: self.title.clone(),
            language: self.language.clone(),
        }
    }
}

/// Raw bytes of one fetched page.
///
/// Never mutated after creation; the archive writer derives the entry name
/// from `page`, not from the file's position in a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    /// 1-based page index this data belongs to.
    pub page: u32,
    /// Response body.
    pub data: Vec<u8>,
}

impl DownloadedFile {
    /// Creates a downloaded file.
    #[must_use]
    pub fn new(page: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            page,
            data: data.into(),
        }
    }
}
