//! Constants for the download module (timeouts, concurrency bounds).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default whole-request timeout (2 minutes; page images are small).
pub const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// Default number of page fetches in flight per chapter.
pub const DEFAULT_CONCURRENCY: usize = 5;
