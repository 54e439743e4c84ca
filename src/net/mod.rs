//! Network helpers
//!
//! Thin wrappers over tokio used by the connection state machine, plus the
//! transport-fault classification shared by every error path.


use std::future::Future;
use std::io;
use std::time::Duration;

pub use tokio::net::TcpStream;

use crate::error::RioError;

/// Runtime abstraction for common operations
pub struct Runtime;

impl Runtime {
    /// Sleep for the specified duration
    pub async fn sleep(duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Run a future with a timeout
    ///
    /// # Errors
    ///
    /// Returns `TimeoutError` if the future does not complete within the specified duration.
    pub async fn timeout<F, T>(duration: Duration, future: F) -> Result<T, TimeoutError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(duration, future)
            .await
            .map_err(|_| TimeoutError)
    }

    /// Get current timestamp
    #[must_use]
    pub fn now() -> std::time::Instant {
        std::time::Instant::now()
    }
}

/// Timeout error
#[derive(Debug, Clone, Copy)]
pub struct TimeoutError;

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation timed out")
    }
}

impl std::error::Error for TimeoutError {}

/// Open a TCP connection to a controller, bounded by `timeout`
///
/// # Errors
///
/// Returns `ConnectionTimeout` if the attempt exceeds `timeout`, or
/// `ConnectionFailed` carrying the classified I/O error otherwise.
pub async fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, RioError> {
    tracing::debug!(host, port, ?timeout, "Opening TCP connection");

    let stream = Runtime::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| RioError::ConnectionTimeout { duration: timeout })?
        .map_err(|e| RioError::ConnectionFailed {
            host: host.to_string(),
            port,
            message: describe_io_error(&e),
            source: Some(Box::new(e)),
        })?;

    // Commands are single short lines; don't let Nagle hold them back.
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    Ok(stream)
}

/// Describe a transport fault for logs and lifecycle events
///
/// Uses the error's own message when it carries one, otherwise falls back to
/// a fixed description keyed by the error kind.
#[must_use]
pub fn describe_io_error(err: &io::Error) -> String {
    if err.get_ref().is_some() || err.raw_os_error().is_some() {
        let message = err.to_string();
        if !message.is_empty() {
            return message;
        }
    }
    default_message(err.kind()).to_string()
}

fn default_message(kind: io::ErrorKind) -> &'static str {
    match kind {
        io::ErrorKind::TimedOut => "Command timed out",
        io::ErrorKind::BrokenPipe => "Broken pipe",
        io::ErrorKind::ConnectionAborted => "Connection aborted",
        io::ErrorKind::ConnectionRefused => "Connection refused",
        io::ErrorKind::ConnectionReset => "Connection reset",
        io::ErrorKind::NotConnected | io::ErrorKind::UnexpectedEof => "Connection error",
        _ => "OS I/O error",
    }
}
