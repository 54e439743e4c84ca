//! Background read/dispatch loop
//!
//! One loop per live socket. It races the next queued command against the
//! next line from the controller. Commands go out one at a time: after
//! writing a command the loop reads exclusively until an outcome line
//! arrives, routing every state update it passes to the cache, so replies
//! can never be attributed to the wrong caller.

use std::any::Any;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use super::state::ConnectionStats;
use crate::error::{Result, RioError};
use crate::protocol::{Response, RioCodec, parse_line};
use crate::state::VariableCache;

/// A command waiting for its outcome
#[derive(Debug)]
pub(crate) struct PendingCommand {
    pub(crate) text: String,
    reply: oneshot::Sender<Result<String>>,
}

impl PendingCommand {
    pub(crate) fn new(text: String) -> (Self, oneshot::Receiver<Result<String>>) {
        let (reply, rx) = oneshot::channel();
        (Self { text, reply }, rx)
    }

    /// Fulfil the result slot; the caller may already have given up
    pub(crate) fn resolve(self, result: Result<String>) {
        let _ = self.reply.send(result);
    }

    fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }
}

/// Receiving end of the command queue, shared by successive loops
pub(crate) type CommandQueue = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<PendingCommand>>>;

/// Why a loop stopped
#[derive(Debug)]
pub(crate) enum LoopExit {
    /// Cancelled or the owning connection is gone
    Shutdown,
    /// Transport or background fault
    Fault(RioError),
}

pub(crate) struct Multiplexer<S> {
    framed: Framed<S, RioCodec>,
    cache: Arc<VariableCache>,
    stats: Arc<Mutex<ConnectionStats>>,
    debug_protocol: bool,
    /// How long a written command may wait for its outcome line
    reply_timeout: Option<Duration>,
}

impl<S> Multiplexer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(
        stream: S,
        cache: Arc<VariableCache>,
        stats: Arc<Mutex<ConnectionStats>>,
        debug_protocol: bool,
        reply_timeout: Option<Duration>,
    ) -> Self {
        Self {
            framed: Framed::new(stream, RioCodec::new()),
            cache,
            stats,
            debug_protocol,
            reply_timeout,
        }
    }

    /// Run until cancelled or faulted
    ///
    /// A panic raised by a cache observer is reported as a background fault.
    pub(crate) async fn run(self, queue: CommandQueue, shutdown: CancellationToken) -> LoopExit {
        match AssertUnwindSafe(self.run_inner(queue, shutdown))
            .catch_unwind()
            .await
        {
            Ok(exit) => exit,
            Err(payload) => LoopExit::Fault(RioError::BackgroundFault {
                message: panic_message(&*payload),
            }),
        }
    }

    async fn run_inner(mut self, queue: CommandQueue, shutdown: CancellationToken) -> LoopExit {
        let mut commands = tokio::select! {
            () = shutdown.cancelled() => return LoopExit::Shutdown,
            guard = queue.lock() => guard,
        };

        tracing::debug!("Starting IO loop");

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    tracing::debug!("IO loop cancelled");
                    return LoopExit::Shutdown;
                }
                line = self.framed.next() => match line {
                    Some(Ok(line)) => {
                        if let Response::Error(message) = self.handle_line(&line) {
                            tracing::debug!(message, "Error outcome with no command in flight");
                        }
                    }
                    Some(Err(err)) => return LoopExit::Fault(err),
                    None => return LoopExit::Fault(end_of_stream()),
                },
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Err(exit) = self.execute(command, &shutdown).await {
                            return exit;
                        }
                    }
                    None => return LoopExit::Shutdown,
                },
            }
        }
    }

    /// Write one command and read until its outcome
    async fn execute(
        &mut self,
        command: PendingCommand,
        shutdown: &CancellationToken,
    ) -> std::result::Result<(), LoopExit> {
        if command.is_abandoned() {
            tracing::debug!(command = %command.text, "Skipping abandoned command");
            return Ok(());
        }

        self.log_wire(">>", &command.text);
        let sent = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                command.resolve(Err(RioError::ConnectionClosed));
                return Err(LoopExit::Shutdown);
            }
            sent = self.framed.send(command.text.as_str()) => sent,
        };
        match sent {
            Ok(()) => self.stats.lock().record_command(),
            // Rejected before anything was written
            Err(err @ RioError::Codec { .. }) => {
                command.resolve(Err(err));
                return Ok(());
            }
            Err(err) => {
                command.resolve(Err(lost(&err)));
                return Err(LoopExit::Fault(err));
            }
        }

        // A silent controller is a dead socket, not a slow reply
        let reply_timeout = self.reply_timeout;
        let deadline = async move {
            match reply_timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            let line = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    command.resolve(Err(RioError::ConnectionClosed));
                    return Err(LoopExit::Shutdown);
                }
                line = self.framed.next() => line,
                () = &mut deadline => {
                    let err = RioError::NetworkError(io::ErrorKind::TimedOut.into());
                    tracing::warn!(command = %command.text, "No reply from controller");
                    // Same outcome the caller's own bound would produce
                    command.resolve(Err(RioError::CommandTimeout {
                        duration: reply_timeout.unwrap_or_default(),
                    }));
                    return Err(LoopExit::Fault(err));
                }
            };

            match line {
                Some(Ok(line)) => {
                    let response = self.handle_line(&line);
                    if let Some(value) = response.success_value() {
                        command.resolve(Ok(value));
                        return Ok(());
                    }
                    if let Response::Error(message) = response {
                        tracing::debug!(command = %command.text, message, "Device responded with error");
                        command.resolve(Err(RioError::Command { message }));
                        return Ok(());
                    }
                }
                Some(Err(err)) => {
                    command.resolve(Err(lost(&err)));
                    return Err(LoopExit::Fault(err));
                }
                None => {
                    let err = end_of_stream();
                    command.resolve(Err(lost(&err)));
                    return Err(LoopExit::Fault(err));
                }
            }
        }
    }

    /// Parse a line and route any state update to the cache
    fn handle_line(&self, line: &str) -> Response {
        self.stats.lock().record_line();
        self.log_wire("<<", line);

        let response = parse_line(line);
        if let Some(update) = response.update() {
            self.cache.apply(update);
        }
        response
    }

    fn log_wire(&self, direction: &str, line: &str) {
        if self.debug_protocol {
            tracing::debug!(direction, line, "RIO wire");
        } else {
            tracing::trace!(direction, line, "RIO wire");
        }
    }
}

fn end_of_stream() -> RioError {
    RioError::NetworkError(io::Error::from(io::ErrorKind::UnexpectedEof))
}

fn lost(err: &RioError) -> RioError {
    RioError::ConnectionLost {
        reason: err.describe(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic in background loop".to_string())
}
