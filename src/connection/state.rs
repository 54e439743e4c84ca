//! Connection state and statistics

use std::fmt;
use std::time::{Duration, Instant};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected and not trying to be
    #[default]
    Disconnected,
    /// Socket open and background loop running
    Connected,
    /// Connection lost, retry loop running
    Reconnecting,
}

impl ConnectionState {
    /// Check if connected or trying to reconnect
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connected | Self::Reconnecting)
    }

    /// Check if fully connected
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if the retry loop is running
    #[must_use]
    pub fn is_reconnecting(self) -> bool {
        matches!(self, Self::Reconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting => f.write_str("reconnecting"),
        }
    }
}

/// Connection statistics
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    /// Time the current socket was established
    pub connected_at: Option<Instant>,
    /// Number of commands written to the wire
    pub commands_sent: u64,
    /// Number of lines read from the wire
    pub lines_received: u64,
    /// Number of reconnection attempts since creation
    pub reconnect_attempts: u32,
    /// Last transport fault, classified
    pub last_error: Option<String>,
}

impl ConnectionStats {
    /// Get connection uptime
    #[must_use]
    pub fn uptime(&self) -> Option<Duration> {
        self.connected_at.map(|t| t.elapsed())
    }

    /// Record a command written to the wire
    pub fn record_command(&mut self) {
        self.commands_sent += 1;
    }

    /// Record a line read from the wire
    pub fn record_line(&mut self) {
        self.lines_received += 1;
    }
}
