//! Centralized default constants for sightline.
//!
//! **This module is the single source of truth** for shared default values.
//! Client, pager, loader, and tracker configuration all start from these.

// =============================================================================
// CONNECTION POOL
// =============================================================================

/// Maximum idle connections kept per host.
pub const POOL_CAPACITY: usize = 50;

/// Total attempts per request, including the first one.
pub const RETRY_TOTAL: u32 = 3;

/// Base backoff between retries in milliseconds (doubled per attempt).
pub const RETRY_BACKOFF_MS: u64 = 300;

/// Status codes treated as transient.
pub const RETRY_STATUS_CODES: &[u16] = &[429, 500, 502, 503, 504];

/// Timeout for every backend request (seconds).
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// FEED
// =============================================================================

/// Activities requested per page.
pub const PAGE_SIZE: usize = 50;

/// Wire names of the activity kinds the feed requests.
pub const FEED_ACTIVITY_TYPES: &[&str] = &["comment", "status.change", "version.publish"];

// =============================================================================
// ATTACHMENTS
// =============================================================================

/// Concurrent attachment downloads per batch.
pub const ATTACHMENT_WORKERS: usize = 5;

// =============================================================================
// VIEWER TRACKING
// =============================================================================

/// Debounce window for host notifications (milliseconds).
pub const DEBOUNCE_MS: u64 = 500;

/// Lower bound accepted for the debounce window.
pub const DEBOUNCE_MIN_MS: u64 = 100;

/// Upper bound accepted for the debounce window.
pub const DEBOUNCE_MAX_MS: u64 = 2000;

// =============================================================================
// AUTO REFRESH
// =============================================================================

/// Interval between automatic refreshes of the current feed (milliseconds).
pub const AUTO_REFRESH_MS: u64 = 300_000;

/// Lower bound accepted for the auto-refresh interval.
pub const AUTO_REFRESH_MIN_MS: u64 = 60_000;

/// Upper bound accepted for the auto-refresh interval.
pub const AUTO_REFRESH_MAX_MS: u64 = 600_000;

// =============================================================================
// EVENT BUS
// =============================================================================

/// Buffer capacity of the event bus broadcast tap.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Colour used for statuses missing from the project catalogue.
pub const STATUS_FALLBACK_COLOR: &str = "#ffffff";
