//! Token-bucket rate limiting for catalog calls.
//!
//! Remote catalogs usually cap how often chapter pages may be resolved.
//! [`RateLimiter`] is an explicit token bucket that is owned by (or shared
//! via `Arc` between) the catalogs that need it; there is no global state.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use mango_core::catalog::RateLimiter;
//!
//! # async fn example() {
//! // Bursts of up to 2 calls, then one call every 500ms.
//! let limiter = RateLimiter::new(2, Duration::from_millis(500));
//! limiter.acquire().await;
//! limiter.acquire().await;
//! limiter.acquire().await; // waits ~500ms
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::{Catalog, CatalogError};
use crate::chapter::{Chapter, ChapterSummary};

/// Default catalog call budget per minute.
///
/// Kept one below a 40-per-minute server limit so bursts never trip it.
pub const DEFAULT_CATALOG_CALLS_PER_MINUTE: u32 = 39;

/// Warning threshold for cumulative delay (30 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Token bucket.
///
/// Starts full. One token is added every `refill_interval`, up to
/// `capacity`. [`acquire`](Self::acquire) takes one token, waiting for the
/// next refill when the bucket is empty. Waiters are served in FIFO order.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    refill_interval: Duration,
    /// `None` when rate limiting is disabled.
    bucket: Option<Mutex<Bucket>>,
    cumulative_delay_ms: AtomicU64,
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, capacity: u32, interval: Duration) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let intervals = elapsed.as_nanos() / interval.as_nanos();
        if intervals == 0 {
            return;
        }

        let added = u32::try_from(intervals).unwrap_or(u32::MAX);
        self.tokens = self.tokens.saturating_add(added).min(capacity);
        if self.tokens == capacity {
            // A full bucket does not bank time.
            self.last_refill = now;
        } else {
            self.last_refill += interval * added;
        }
    }
}

impl RateLimiter {
    /// Creates a bucket holding up to `capacity` tokens (at least 1),
    /// refilled one token per `refill_interval`.
    ///
    /// A zero interval disables limiting.
    #[must_use]
    #[instrument(level = "debug", fields(interval_ms = refill_interval.as_millis()))]
    pub fn new(capacity: u32, refill_interval: Duration) -> Self {
        if refill_interval.is_zero() {
            return Self::disabled();
        }

        let capacity = capacity.max(1);
        debug!(capacity, "creating rate limiter");
        Self {
            capacity,
            refill_interval,
            bucket: Some(Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Allows `calls` calls per minute with no burst.
    #[must_use]
    pub fn per_minute(calls: u32) -> Self {
        if calls == 0 {
            return Self::disabled();
        }
        Self::new(1, Duration::from_secs(60) / calls)
    }

    /// Creates a limiter that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            capacity: 0,
            refill_interval: Duration::ZERO,
            bucket: None,
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Returns whether rate limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.bucket.is_none()
    }

    /// Returns the bucket capacity.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns the time between token refills.
    #[must_use]
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    /// Takes one token, waiting until one is available.
    pub async fn acquire(&self) {
        let Some(bucket) = &self.bucket else {
            return;
        };

        // Held across the wait so waiters queue up behind each other.
        let mut bucket = bucket.lock().await;
        bucket.refill(Instant::now(), self.capacity, self.refill_interval);

        if bucket.tokens == 0 {
            let wait = (bucket.last_refill + self.refill_interval)
                .saturating_duration_since(Instant::now());
            let cumulative = self.add_cumulative_delay(wait);

            debug!(
                delay_ms = wait.as_millis(),
                cumulative_ms = cumulative.as_millis(),
                "applying rate limit delay"
            );
            if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD
                && cumulative.saturating_sub(wait) < CUMULATIVE_DELAY_WARNING_THRESHOLD
            {
                warn!(
                    cumulative_delay_secs = cumulative.as_secs(),
                    "catalog calls are being heavily rate limited"
                );
            }

            tokio::time::sleep(wait).await;
            bucket.refill(Instant::now(), self.capacity, self.refill_interval);
        }

        bucket.tokens = bucket.tokens.saturating_sub(1);
    }

    /// Total time spent waiting so far.
    #[must_use]
    pub fn cumulative_delay(&self) -> Duration {
        Duration::from_millis(self.cumulative_delay_ms.load(Ordering::SeqCst))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(total)
    }
}

/// Catalog decorator that takes a token before every
/// [`fetch_chapter`](Catalog::fetch_chapter) call.
///
/// Title and listing calls pass straight through.
#[derive(Debug)]
pub struct RateLimitedCatalog<C> {
    inner: C,
    limiter: Arc<RateLimiter>,
}

impl<C> RateLimitedCatalog<C> {
    /// Wraps `inner`, sharing `limiter` with any other holder of the `Arc`.
    pub fn new(inner: C, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }

    /// Returns the wrapped catalog.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Returns the shared limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

#[async_trait]
impl<C: Catalog> Catalog for RateLimitedCatalog<C> {
    async fn fetch_title(&self) -> Result<String, CatalogError> {
        self.inner.fetch_title().await
    }

    async fn fetch_chapters(&self) -> Result<Vec<ChapterSummary>, CatalogError> {
        self.inner.fetch_chapters().await
    }

    async fn fetch_chapter(&self, summary: &ChapterSummary) -> Result<Chapter, CatalogError> {
        self.limiter.acquire().await;
        self.inner.fetch_chapter(summary).await
    }
}
