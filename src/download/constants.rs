//! Constants for the download module (timeouts, page naming).

/// Default HTTP connect timeout (10 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default HTTP read timeout (30 seconds per page image).
pub const READ_TIMEOUT_SECS: u64 = 30;

/// Default number of fetch workers per chapter batch.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Minimum allowed worker count.
pub const MIN_WORKER_COUNT: usize = 1;

/// Maximum allowed worker count.
pub const MAX_WORKER_COUNT: usize = 100;
