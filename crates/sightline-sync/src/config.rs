//! Engine configuration.

use std::time::Duration;

use sightline_core::defaults;

/// Tuning for the feed engine and its helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Activities per page.
    pub page_size: usize,
    /// Concurrent attachment downloads.
    pub attachment_workers: usize,
    /// Host notification debounce window in milliseconds.
    pub debounce_ms: u64,
    /// Auto-refresh interval in milliseconds; `None` disables it.
    pub auto_refresh_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: defaults::PAGE_SIZE,
            attachment_workers: defaults::ATTACHMENT_WORKERS,
            debounce_ms: defaults::DEBOUNCE_MS,
            auto_refresh_ms: Some(defaults::AUTO_REFRESH_MS),
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `SIGHTLINE_PAGE_SIZE` | `50` | Activities per page |
    /// | `SIGHTLINE_ATTACHMENT_WORKERS` | `5` | Concurrent attachment downloads |
    /// | `SIGHTLINE_DEBOUNCE_MS` | `500` | Host debounce, clamped to 100..=2000 |
    /// | `SIGHTLINE_AUTO_REFRESH_MS` | `300000` | Clamped to 60000..=600000, `0` disables |
    pub fn from_env() -> Self {
        let page_size = std::env::var("SIGHTLINE_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::PAGE_SIZE);

        let attachment_workers = std::env::var("SIGHTLINE_ATTACHMENT_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::ATTACHMENT_WORKERS);

        let debounce_ms = std::env::var("SIGHTLINE_DEBOUNCE_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::DEBOUNCE_MS);

        let auto_refresh_ms = match std::env::var("SIGHTLINE_AUTO_REFRESH_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            Some(0) => None,
            Some(ms) => Some(ms),
            None => Some(defaults::AUTO_REFRESH_MS),
        };

        Self::default()
            .with_page_size(page_size)
            .with_attachment_workers(attachment_workers)
            .with_debounce_ms(debounce_ms)
            .with_auto_refresh_ms(auto_refresh_ms)
    }

    /// Set the page size (at least 1).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Set the attachment worker cap (at least 1).
    pub fn with_attachment_workers(mut self, workers: usize) -> Self {
        self.attachment_workers = workers.max(1);
        self
    }

    /// Set the debounce window, clamped to the supported range.
    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms.clamp(defaults::DEBOUNCE_MIN_MS, defaults::DEBOUNCE_MAX_MS);
        self
    }

    /// Set the auto-refresh interval, clamped; `None` disables it.
    pub fn with_auto_refresh_ms(mut self, ms: Option<u64>) -> Self {
        self.auto_refresh_ms =
            ms.map(|ms| ms.clamp(defaults::AUTO_REFRESH_MIN_MS, defaults::AUTO_REFRESH_MAX_MS));
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn auto_refresh(&self) -> Option<Duration> {
        self.auto_refresh_ms.map(Duration::from_millis)
    }
}
