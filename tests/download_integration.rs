//! Integration tests for chapter downloads over HTTP.
//!
//! These tests run `ChapterDownloader` with the real `HttpClient` against a
//! wiremock server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use mango_core::{
    Chapter, ChapterDownloader, ChapterSummary, DownloadError, EngineError, HttpClient,
    RetryPolicy,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

mod support;
use support::socket_guard::{socket_skip_return, start_mock_server_or_skip};

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return socket_skip_return();
        };
        mock_server
    }};
}

fn summary(number: f64) -> ChapterSummary {
    ChapterSummary {
        id: String::new(),
        number,
        title: String::new(),
        language: "en".to_string(),
    }
}

async fn mount_pages(server: &MockServer, count: u32) -> Vec<String> {
    let mut urls = Vec::new();
    for page in 1..=count {
        Mock::given(method("GET"))
            .and(path(format!("/img/{page}.jpg")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(format!("page-{page}")))
            .mount(server)
            .await;
        urls.push(format!("{}/img/{page}.jpg", server.uri()));
    }
    urls
}

fn downloader(concurrency: usize) -> ChapterDownloader {
    ChapterDownloader::new(Arc::new(HttpClient::new()), concurrency).unwrap()
}

/// Responder that tracks how many requests are in flight at once.
///
/// Uses a blocking sleep so overlapping requests keep the counter elevated
/// while other requests arrive.
struct ConcurrencyTrackingResponder {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    delay_ms: u64,
}

impl Respond for ConcurrencyTrackingResponder {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let current_count = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current_count, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(self.delay_ms));
        self.current.fetch_sub(1, Ordering::SeqCst);
        ResponseTemplate::new(200).set_body_bytes(b"content".to_vec())
    }
}

/// Responder that fails the first `failures` requests with 503.
struct FlakyResponder {
    calls: Arc<AtomicUsize>,
    failures: usize,
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            ResponseTemplate::new(503)
        } else {
            ResponseTemplate::new(200).set_body_bytes(b"recovered".to_vec())
        }
    }
}

#[tokio::test]
async fn test_fetch_chapter_returns_pages_in_order() {
    let server = require_mock_server!();
    let urls = mount_pages(&server, 6).await;
    let chapter = Chapter::from_urls(&summary(1.0), urls);

    let mut completed = Vec::new();
    let files = downloader(3)
        .fetch_chapter(&chapter, |progress| {
            assert!(progress.error.is_none());
            completed.push(progress.completed);
        })
        .await
        .unwrap();

    let pages: Vec<u32> = files.iter().map(|f| f.page).collect();
    assert_eq!(pages, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(files[3].data, b"page-4");
    assert_eq!(completed, vec![1; 6]);
}

#[tokio::test]
async fn test_fetch_chapter_respects_concurrency_limit() {
    let server = require_mock_server!();
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .respond_with(ConcurrencyTrackingResponder {
            current: Arc::clone(&current),
            peak: Arc::clone(&peak),
            delay_ms: 50,
        })
        .mount(&server)
        .await;

    let urls: Vec<String> = (1..=10)
        .map(|page| format!("{}/img/{page}.jpg", server.uri()))
        .collect();
    let chapter = Chapter::from_urls(&summary(2.0), urls);

    let files = downloader(2)
        .fetch_chapter(&chapter, |_| {})
        .await
        .unwrap();

    assert_eq!(files.len(), 10);
    let observed = peak.load(Ordering::SeqCst);
    assert!(observed <= 2, "peak concurrency {observed} exceeded limit 2");
}

#[tokio::test]
async fn test_fetch_chapter_fails_on_http_error() {
    let server = require_mock_server!();
    let mut urls = mount_pages(&server, 3).await;
    Mock::given(method("GET"))
        .and(path("/img/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    urls.insert(1, format!("{}/img/missing.jpg", server.uri()));
    let chapter = Chapter::from_urls(&summary(3.0), urls);

    let mut failures = 0;
    let err = downloader(1)
        .fetch_chapter(&chapter, |progress| {
            if progress.error.is_some() {
                failures += 1;
            }
        })
        .await
        .unwrap_err();

    assert_eq!(failures, 1);
    match err {
        EngineError::Page { page, source } => {
            assert_eq!(page, 2);
            assert_eq!(source.status(), Some(404));
        }
        other => panic!("expected page error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fetch_chapter_rejects_invalid_url_without_request() {
    let chapter = Chapter::from_urls(&summary(4.0), ["not a url"]);

    let err = downloader(1)
        .fetch_chapter(&chapter, |_| {})
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Page {
            page: 1,
            source: DownloadError::InvalidUrl { .. }
        }
    ));
}

#[tokio::test]
async fn test_fetch_chapter_retries_transient_status() {
    let server = require_mock_server!();
    let calls = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .and(path("/img/1.jpg"))
        .respond_with(FlakyResponder {
            calls: Arc::clone(&calls),
            failures: 1,
        })
        .mount(&server)
        .await;
    let chapter = Chapter::from_urls(&summary(5.0), [format!("{}/img/1.jpg", server.uri())]);

    let files = downloader(1)
        .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(5), 2.0))
        .fetch_chapter(&chapter, |_| {})
        .await
        .unwrap();

    assert_eq!(files[0].data, b"recovered");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
