//! Catalog backed by the MangaDex API.
//!
//! The series is identified by the manga UUID in a `mangadex.org` URL. The
//! title comes from `/manga/{id}`, the listing from the paginated
//! `/manga/{id}/feed` and page URLs from `/at-home/server/{chapter}`.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{Catalog, CatalogError};
use crate::chapter::{Chapter, ChapterSummary};
use crate::download::{CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};
use crate::user_agent::default_user_agent;

/// Default MangaDex API base URL.
const DEFAULT_BASE_URL: &str = "https://api.mangadex.org";

/// Chapters requested per feed page; the API maximum.
pub const FEED_PAGE_LIMIT: usize = 500;

/// Language used when no requested-language title exists.
const FALLBACK_TITLE_LANGUAGE: &str = "en";

#[allow(clippy::expect_used)]
static MANGADEX_HOST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"mangadex\.org").expect("host regex is valid"));

#[allow(clippy::expect_used)]
static MANGA_UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12}")
        .expect("uuid regex is valid")
});

// ==================== MangaDex API Response Types ====================

#[derive(Debug, Deserialize)]
pub(crate) struct MangaResponse {
    pub data: MangaData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MangaData {
    pub attributes: MangaAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MangaAttributes {
    #[serde(default)]
    pub title: HashMap<String, String>,
    #[serde(default)]
    pub alt_titles: Vec<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FeedResponse {
    #[serde(default)]
    pub data: Vec<FeedChapter>,
    pub total: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FeedChapter {
    pub id: String,
    pub attributes: FeedAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FeedAttributes {
    pub chapter: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub translated_language: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AtHomeResponse {
    pub base_url: String,
    pub chapter: AtHomeChapter,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AtHomeChapter {
    pub hash: String,
    #[serde(default)]
    pub data: Vec<String>,
}

// ==================== MangadexCatalog ====================

/// [`Catalog`] for one MangaDex series.
///
/// When a language is set, the title prefers the matching alternative title
/// and the feed is restricted to that translation. Every request carries the
/// series URL's origin as `Referer`.
pub struct MangadexCatalog {
    client: Client,
    base_url: String,
    manga_id: String,
    referer: String,
    language: Option<String>,
    title: OnceCell<String>,
}

impl MangadexCatalog {
    /// Creates a catalog for the series at `manga_url`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidUrl`] if the URL carries no manga id,
    /// or [`CatalogError::Client`] if the HTTP client cannot be built.
    #[instrument(skip_all, fields(manga_url = %manga_url))]
    pub fn new(manga_url: &str, language: Option<String>) -> Result<Self, CatalogError> {
        Self::build(manga_url, language, DEFAULT_BASE_URL.to_string())
    }

    /// Creates a catalog that talks to `base_url` instead of the public API.
    ///
    /// # Errors
    ///
    /// As [`new`](Self::new).
    #[instrument(skip_all, fields(manga_url = %manga_url, base_url))]
    pub fn with_base_url(
        manga_url: &str,
        language: Option<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, CatalogError> {
        Self::build(manga_url, language, base_url.into())
    }

    fn build(
        manga_url: &str,
        language: Option<String>,
        base_url: String,
    ) -> Result<Self, CatalogError> {
        let invalid = || CatalogError::InvalidUrl {
            url: manga_url.to_string(),
        };
        let manga_id = extract_manga_id(manga_url).ok_or_else(invalid)?;
        let referer = Url::parse(manga_url)
            .map(|url| url.origin().ascii_serialization())
            .map_err(|_| invalid())?;

        let mut headers = HeaderMap::new();
        headers.insert(
            REFERER,
            HeaderValue::from_str(&referer).map_err(|_| invalid())?,
        );
        let client = Client::builder()
            .user_agent(default_user_agent())
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .gzip(true)
            .build()
            .map_err(|source| CatalogError::Client { source })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            manga_id: manga_id.to_string(),
            referer,
            language: language.filter(|lang| !lang.trim().is_empty()),
            title: OnceCell::new(),
        })
    }

    /// Returns true if `input` points at mangadex.org.
    #[must_use]
    pub fn is_mangadex_url(input: &str) -> bool {
        MANGADEX_HOST.is_match(input)
    }

    /// Returns the manga id this catalog lists.
    #[must_use]
    pub fn manga_id(&self) -> &str {
        &self.manga_id
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, CatalogError> {
        let shown = url.to_string();
        debug!(api_url = %shown, "Calling MangaDex API");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| CatalogError::Request {
                url: shown.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                warn!("MangaDex rate limit exceeded");
            }
            return Err(CatalogError::Status {
                url: shown,
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|source| CatalogError::Request { url: shown, source })
    }

    fn endpoint(&self, path: &str) -> Result<Url, CatalogError> {
        let raw = format!("{}{path}", self.base_url);
        Url::parse(&raw).map_err(|_| CatalogError::InvalidUrl { url: raw })
    }

    async fn load_title(&self) -> Result<String, CatalogError> {
        let url = self.endpoint(&format!("/manga/{}", self.manga_id))?;
        let body: MangaResponse = self.get_json(url).await?;
        pick_title(&body.data.attributes, self.language.as_deref()).ok_or_else(|| {
            CatalogError::MissingTitle {
                id: self.manga_id.clone(),
            }
        })
    }

    fn feed_url(&self, offset: usize) -> Result<Url, CatalogError> {
        let mut url = self.endpoint(&format!("/manga/{}/feed", self.manga_id))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("limit", &FEED_PAGE_LIMIT.to_string())
                .append_pair("order[volume]", "asc")
                .append_pair("order[chapter]", "asc")
                .append_pair("offset", &offset.to_string());
            if let Some(language) = &self.language {
                query.append_pair("translatedLanguage[]", language);
            }
        }
        Ok(url)
    }
}

impl std::fmt::Debug for MangadexCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MangadexCatalog")
            .field("base_url", &self.base_url)
            .field("manga_id", &self.manga_id)
            .field("referer", &self.referer)
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Catalog for MangadexCatalog {
    #[instrument(skip(self), fields(manga_id = %self.manga_id))]
    async fn fetch_title(&self) -> Result<String, CatalogError> {
        self.title
            .get_or_try_init(|| self.load_title())
            .await
            .cloned()
    }

    #[instrument(skip(self), fields(manga_id = %self.manga_id))]
    async fn fetch_chapters(&self) -> Result<Vec<ChapterSummary>, CatalogError> {
        let mut chapters = Vec::new();
        let mut offset = 0;
        loop {
            let page: FeedResponse = self.get_json(self.feed_url(offset)?).await?;
            if page.data.is_empty() {
                break;
            }
            offset += page.data.len();
            chapters.extend(page.data.into_iter().map(summary_from_feed));
            if page.total.is_some_and(|total| offset >= total) {
                break;
            }
        }
        debug!(chapters = chapters.len(), "feed listed");
        Ok(chapters)
    }

    #[instrument(skip_all, fields(chapter = summary.number, id = %summary.id))]
    async fn fetch_chapter(&self, summary: &ChapterSummary) -> Result<Chapter, CatalogError> {
        if summary.id.is_empty() {
            return Err(CatalogError::ChapterNotFound {
                number: summary.number,
                language: summary.language.clone(),
            });
        }
        let url = self.endpoint(&format!("/at-home/server/{}", summary.id))?;
        let body: AtHomeResponse = self.get_json(url).await?;
        let base = body.base_url.trim_end_matches('/');
        let hash = &body.chapter.hash;
        let pages = body
            .chapter
            .data
            .iter()
            .map(|file| format!("{base}/data/{hash}/{file}"));
        Ok(Chapter::from_urls(summary, pages))
    }
}

// ==================== Extraction Helpers ====================

/// Extracts the first manga UUID from a MangaDex URL.
fn extract_manga_id(input: &str) -> Option<&str> {
    MANGA_UUID.find(input).map(|found| found.as_str())
}

/// Picks the alternative title in `language`, falling back to the English
/// main title.
fn pick_title(attributes: &MangaAttributes, language: Option<&str>) -> Option<String> {
    language
        .and_then(|lang| {
            attributes
                .alt_titles
                .iter()
                .find_map(|titles| titles.get(lang))
        })
        .or_else(|| attributes.title.get(FALLBACK_TITLE_LANGUAGE))
        .filter(|title| !title.trim().is_empty())
        .cloned()
}

/// Unparseable or missing chapter numbers become 0.
fn summary_from_feed(chapter: FeedChapter) -> ChapterSummary {
    let number = chapter
        .attributes
        .chapter
        .as_deref()
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|number| number.is_finite() && *number >= 0.0)
        .unwrap_or(0.0);
    ChapterSummary {
        id: chapter.id,
        number,
        title: chapter.attributes.title.unwrap_or_default(),
        language: chapter.attributes.translated_language,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SERIES_URL: &str =
        "https://mangadex.org/title/a1c7c817-4e59-43b7-9365-09675a149a6f/one-piece";

    #[test]
    fn test_extract_manga_id() {
        assert_eq!(
            extract_manga_id(SERIES_URL),
            Some("a1c7c817-4e59-43b7-9365-09675a149a6f")
        );
        assert_eq!(extract_manga_id("https://mangadex.org/title/"), None);
    }

    #[test]
    fn test_is_mangadex_url() {
        assert!(MangadexCatalog::is_mangadex_url(SERIES_URL));
        assert!(!MangadexCatalog::is_mangadex_url("series.json"));
        assert!(!MangadexCatalog::is_mangadex_url("https://example.com/title/x"));
    }

    #[test]
    fn test_new_rejects_url_without_id() {
        assert!(matches!(
            MangadexCatalog::new("https://mangadex.org/title/nothing-here", None),
            Err(CatalogError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_referer_is_series_origin() {
        let catalog = MangadexCatalog::new(SERIES_URL, Some(String::new())).unwrap();
        assert_eq!(catalog.referer, "https://mangadex.org");
        assert_eq!(catalog.language, None);
    }

    #[test]
    fn test_pick_title_prefers_requested_language() {
        let attributes: MangaAttributes = serde_json::from_value(serde_json::json!({
            "title": { "en": "One Piece" },
            "altTitles": [{ "ja": "ワンピース" }, { "es": "Una Pieza" }]
        }))
        .unwrap();

        assert_eq!(pick_title(&attributes, Some("es")).unwrap(), "Una Pieza");
        assert_eq!(pick_title(&attributes, Some("de")).unwrap(), "One Piece");
        assert_eq!(pick_title(&attributes, None).unwrap(), "One Piece");

        let untitled: MangaAttributes =
            serde_json::from_value(serde_json::json!({ "title": { "ja": "x" } })).unwrap();
        assert_eq!(pick_title(&untitled, None), None);
    }

    #[test]
    fn test_summary_from_feed_defaults() {
        let chapter: FeedChapter = serde_json::from_value(serde_json::json!({
            "id": "c1",
            "attributes": { "chapter": null, "title": null, "translatedLanguage": "en" }
        }))
        .unwrap();
        let summary = summary_from_feed(chapter);
        assert_eq!(summary.id, "c1");
        assert!(summary.number.abs() < f64::EPSILON);
        assert_eq!(summary.title, "");

        let extra: FeedChapter = serde_json::from_value(serde_json::json!({
            "id": "c2",
            "attributes": { "chapter": "10.5", "title": "Extra", "translatedLanguage": "fr" }
        }))
        .unwrap();
        let summary = summary_from_feed(extra);
        assert!((summary.number - 10.5).abs() < f64::EPSILON);
        assert_eq!(summary.language, "fr");
    }
}
