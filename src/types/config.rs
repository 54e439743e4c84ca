use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default RIO TCP port
pub const DEFAULT_PORT: u16 = 9621;
/// Default timeout for a single connection attempt
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default delay between reconnection attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Default bound on how long a command may wait for its reply
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a RIO connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RioConfig {
    /// Controller host name or address
    pub host: String,

    /// Controller port (default: 9621)
    pub port: u16,

    /// Timeout for each connection attempt (default: 10 seconds)
    pub connection_timeout: Duration,

    /// Keep retrying after connection failures (default: true)
    pub auto_reconnect: bool,

    /// Delay between reconnection attempts (default: 5 seconds)
    pub reconnect_delay: Duration,

    /// Upper bound on a command's wait for its reply, including time spent
    /// queued while reconnecting (default: 10 seconds, `None` = unbounded).
    /// A written command left unanswered this long is treated as a dead
    /// socket and triggers reconnection.
    pub command_timeout: Option<Duration>,

    /// Re-send `WATCH ... ON` for watched zones and sources after a
    /// reconnection (default: true)
    pub resubscribe_on_reconnect: bool,

    /// Log every wire line at debug level instead of trace
    pub debug_protocol: bool,
}

impl Default for RioConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            connection_timeout: DEFAULT_TIMEOUT,
            auto_reconnect: true,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            command_timeout: Some(DEFAULT_COMMAND_TIMEOUT),
            resubscribe_on_reconnect: true,
            debug_protocol: false,
        }
    }
}

impl RioConfig {
    /// Create a new config builder for `host`
    #[must_use]
    pub fn builder(host: impl Into<String>) -> RioConfigBuilder {
        RioConfigBuilder {
            config: Self {
                host: host.into(),
                ..Self::default()
            },
        }
    }

    /// Parse a config from JSON, filling missing fields with defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid JSON for this structure.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Builder for `RioConfig`
#[derive(Debug, Clone, Default)]
pub struct RioConfigBuilder {
    config: RioConfig,
}

impl RioConfigBuilder {
    /// Set controller port
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set connection timeout
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Enable or disable auto-reconnect
    #[must_use]
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    /// Set delay between reconnection attempts
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    /// Set command timeout (`None` waits indefinitely)
    #[must_use]
    pub fn command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Enable or disable re-watching after reconnection
    #[must_use]
    pub fn resubscribe_on_reconnect(mut self, enabled: bool) -> Self {
        self.config.resubscribe_on_reconnect = enabled;
        self
    }

    /// Enable protocol debug logging
    #[must_use]
    pub fn debug_protocol(mut self, enable: bool) -> Self {
        self.config.debug_protocol = enable;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> RioConfig {
        self.config
    }
}
