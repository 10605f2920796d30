//! Runtime configuration

use std::time::Duration;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_LOCATION_PREVIEW_LIMIT: usize = 5;

/// Knobs for the file-touching operations.
///
/// Grid limits, sentinels and sanitizer thresholds are constants elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    /// How long to wait for another writer's lock
    pub lock_timeout: Duration,
    pub lock_poll_interval: Duration,
    /// Take the advisory lock around load-mutate-save
    pub locking: bool,
    /// Locations kept per sentinel in non-detailed reports
    pub location_preview_limit: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
            locking: true,
            location_preview_limit: DEFAULT_LOCATION_PREVIEW_LIMIT,
        }
    }
}

impl GuardConfig {
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn without_locking(mut self) -> Self {
        self.locking = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GuardConfig::default();
        assert_eq!(config.lock_timeout, Duration::from_secs(10));
        assert_eq!(config.lock_poll_interval, Duration::from_millis(100));
        assert_eq!(config.location_preview_limit, 5);
        assert!(config.locking);
    }

    #[test]
    fn test_builders() {
        let config = GuardConfig::default()
            .with_lock_timeout(Duration::from_millis(250))
            .without_locking();
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert!(!config.locking);
    }
}
