use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to a RIO controller
#[derive(Debug, Error)]
pub enum RioError {
    // ===== Command Errors =====
    /// The controller answered a command with an `E` outcome
    #[error("command failed: {message}")]
    Command {
        /// Message reported by the controller
        message: String,
    },

    /// The command did not resolve within the configured command timeout
    #[error("command timed out after {duration:?}")]
    CommandTimeout {
        /// The configured timeout
        duration: Duration,
    },

    // ===== Connection Errors =====
    /// No connection exists and none is being re-established
    #[error("not connected")]
    NotConnected,

    /// The connection was shut down before the command resolved
    #[error("connection closed")]
    ConnectionClosed,

    /// The transport failed while the command was awaiting its reply
    #[error("connection lost: {reason}")]
    ConnectionLost {
        /// Classified description of the transport fault
        reason: String,
    },

    /// Failed to open the TCP connection
    #[error("connection to {host}:{port} failed: {message}")]
    ConnectionFailed {
        /// Controller host
        host: String,
        /// Controller port
        port: u16,
        /// Classified description of the failure
        message: String,
        /// The underlying source of the error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Opening the TCP connection timed out
    #[error("connection timeout after {duration:?}")]
    ConnectionTimeout {
        /// The configured timeout
        duration: Duration,
    },

    // ===== I/O Errors =====
    /// Network I/O error on an established connection
    #[error("network error: {0}")]
    NetworkError(#[from] io::Error),

    /// Framing error on the wire (oversized line and similar)
    #[error("codec error: {message}")]
    Codec {
        /// Description of the error
        message: String,
    },

    // ===== Internal Errors =====
    /// The background read/dispatch loop failed for a non-I/O reason
    #[error("background loop fault: {message}")]
    BackgroundFault {
        /// Description of the fault
        message: String,
    },

    /// An identifier field was not a valid index
    #[error("invalid {name} '{value}': {message}")]
    InvalidIdentifier {
        /// Identifier field name
        name: &'static str,
        /// Offending input
        value: String,
        /// Description of the problem
        message: String,
    },
}

impl RioError {
    /// Check if this error is a device-reported command failure
    #[must_use]
    pub fn is_command_error(&self) -> bool {
        matches!(self, Self::Command { .. })
    }

    /// Check if retrying the operation later could succeed
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::CommandTimeout { .. }
                | Self::ConnectionLost { .. }
                | Self::ConnectionFailed { .. }
                | Self::NetworkError(_)
        )
    }

    /// Check if this error indicates the transport went away
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::ConnectionClosed
                | Self::ConnectionLost { .. }
                | Self::ConnectionFailed { .. }
                | Self::ConnectionTimeout { .. }
                | Self::NetworkError(_)
        )
    }

    /// Human-readable description of a transport fault
    ///
    /// I/O errors are run through [`describe_io_error`](crate::net::describe_io_error)
    /// so that bare error kinds get a stable message.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::NetworkError(err) => crate::net::describe_io_error(err),
            other => other.to_string(),
        }
    }
}

/// Result type alias for RIO operations
pub type Result<T> = std::result::Result<T, RioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RioError::Command {
            message: "Invalid command".to_string(),
        };
        assert_eq!(err.to_string(), "command failed: Invalid command");

        let err = RioError::ConnectionFailed {
            host: "10.0.0.5".to_string(),
            port: 9621,
            message: "Connection refused".to_string(),
            source: None,
        };
        assert_eq!(
            err.to_string(),
            "connection to 10.0.0.5:9621 failed: Connection refused"
        );
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(
            RioError::ConnectionTimeout {
                duration: Duration::from_secs(1)
            }
            .is_recoverable()
        );
        assert!(!RioError::ConnectionClosed.is_recoverable());
        assert!(
            !RioError::Command {
                message: "bad".to_string()
            }
            .is_recoverable()
        );
    }

    #[test]
    fn test_error_is_connection_lost() {
        assert!(RioError::ConnectionClosed.is_connection_lost());
        assert!(RioError::NotConnected.is_connection_lost());
        assert!(
            !RioError::Command {
                message: "bad".to_string()
            }
            .is_connection_lost()
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let err: RioError = io_err.into();

        assert!(matches!(err, RioError::NetworkError(_)));
        assert_eq!(err.describe(), "reset by peer");
    }

    #[test]
    fn test_describe_bare_io_kind() {
        let err: RioError = io::Error::from(io::ErrorKind::BrokenPipe).into();
        assert_eq!(err.describe(), "Broken pipe");
    }

    #[test]
    fn test_error_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RioError>();
    }
}
