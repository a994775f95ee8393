//! Session configuration.
//!
//! All timing parameters of the session manager, with defaults matching the
//! behaviour the RTemp app shipped with.

use std::time::Duration;

/// How long a scan runs before it is stopped automatically.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(10);
/// How long a connect attempt may wait for the link.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Period of the full characteristic re-read while connected.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
/// Delay before reconnecting to the last sensor when the app becomes active.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);
/// Buffered events per listener before the slowest one starts lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;
/// Buffered commands from handles to the session task.
pub const DEFAULT_COMMAND_CAPACITY: usize = 32;

/// Configuration for a sensor session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Scan duration.
    pub scan_window: Duration,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Refresh period while connected.
    pub refresh_interval: Duration,
    /// Delay before the silent reconnect.
    pub reconnect_delay: Duration,
    /// Event channel capacity.
    pub event_capacity: usize,
    /// Command channel capacity.
    pub command_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_window: DEFAULT_SCAN_WINDOW,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan window.
    pub fn with_scan_window(mut self, window: Duration) -> Self {
        self.scan_window = window;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the refresh interval.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Set the reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the event channel capacity (at least 1).
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Set the command channel capacity (at least 1).
    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.scan_window, Duration::from_secs(10));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config, SessionConfig::new());
    }

    #[test]
    fn test_builder() {
        let config = SessionConfig::new()
            .with_scan_window(Duration::from_secs(5))
            .with_connect_timeout(Duration::from_secs(3))
            .with_refresh_interval(Duration::from_secs(30))
            .with_reconnect_delay(Duration::from_millis(500))
            .with_event_capacity(0)
            .with_command_capacity(8);

        assert_eq!(config.scan_window, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.refresh_interval, Duration::from_secs(30));
        assert_eq!(config.reconnect_delay, Duration::from_millis(500));
        assert_eq!(config.event_capacity, 1);
        assert_eq!(config.command_capacity, 8);
    }
}
