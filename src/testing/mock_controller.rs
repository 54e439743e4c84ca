//! Mock RIO controller for testing purposes.
//!
//! A small in-process TCP server that speaks enough RIO to exercise the
//! client: it answers `GET`, `SET`, `WATCH` and `EVENT`, pushes unsolicited
//! notifications on demand and can drop every client socket to simulate a
//! controller reboot.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};

use crate::protocol::Target;

/// Configuration for the mock controller.
#[derive(Debug, Clone)]
pub struct MockControllerConfig {
    /// Port to listen on (0 picks a free port).
    pub port: u16,
    /// Message sent with every `E` outcome.
    pub error_message: String,
    /// Maximum accepted command length.
    pub max_command_length: usize,
}

impl Default for MockControllerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            error_message: "Invalid command".to_string(),
            max_command_length: 4096,
        }
    }
}

/// Internal state of the mock controller.
#[derive(Default)]
struct ControllerState {
    /// Variables by target wire form, then lower-cased name.
    variables: BTreeMap<String, BTreeMap<String, String>>,
    /// Targets with an active `WATCH ... ON`.
    watched: BTreeSet<String>,
    /// Every command received, in order.
    received: Vec<String>,
    /// `EVENT` commands received, without the `EVENT ` prefix.
    events: Vec<String>,
    /// Swallow commands without answering.
    unresponsive: bool,
}

impl ControllerState {
    fn store(&mut self, target: &str, name: &str, value: &str) {
        self.variables
            .entry(target.to_string())
            .or_default()
            .insert(name.to_lowercase(), value.to_string());
    }

    fn lookup(&self, target: &str, name: &str) -> Option<&String> {
        self.variables
            .get(target)
            .and_then(|vars| vars.get(&name.to_lowercase()))
    }
}

/// Messages fanned out to every client task.
#[derive(Debug, Clone)]
enum ClientSignal {
    Push(String),
    Drop,
}

/// A mock RIO controller.
pub struct MockController {
    /// Controller configuration.
    config: MockControllerConfig,
    /// Shared controller state.
    state: Arc<RwLock<ControllerState>>,
    /// Fan-out to connected clients.
    clients: broadcast::Sender<ClientSignal>,
    /// Number of accepted connections.
    accepted: Arc<AtomicUsize>,
    /// Channel to signal shutdown to the accept loop.
    shutdown: Option<mpsc::Sender<()>>,
    /// The local address the controller is listening on.
    address: Option<SocketAddr>,
}

impl MockController {
    /// Creates a new `MockController` with the specified configuration.
    #[must_use]
    pub fn new(config: MockControllerConfig) -> Self {
        let (clients, _) = broadcast::channel(64);
        Self {
            config,
            state: Arc::new(RwLock::new(ControllerState::default())),
            clients,
            accepted: Arc::new(AtomicUsize::new(0)),
            shutdown: None,
            address: None,
        }
    }

    /// Creates a new `MockController` with default configuration.
    #[must_use]
    pub fn default_controller() -> Self {
        Self::new(MockControllerConfig::default())
    }

    /// Starts accepting connections.
    ///
    /// Returns the socket address the controller is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot be bound.
    pub async fn start(&mut self) -> Result<SocketAddr, std::io::Error> {
        let listener = TcpListener::bind(("127.0.0.1", self.config.port)).await?;
        let addr = listener.local_addr()?;
        self.address = Some(addr);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        self.shutdown = Some(shutdown_tx);

        let state = Arc::clone(&self.state);
        let clients = self.clients.clone();
        let accepted = Arc::clone(&self.accepted);
        let config = self.config.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => match result {
                        Ok((stream, peer)) => {
                            accepted.fetch_add(1, Ordering::SeqCst);
                            tracing::debug!(%peer, "Mock controller accepted client");
                            tokio::spawn(handle_client(
                                stream,
                                Arc::clone(&state),
                                clients.subscribe(),
                                config.clone(),
                            ));
                        }
                        Err(e) => tracing::error!("Accept error: {}", e),
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Ok(addr)
    }

    /// Stops listening and drops every connected client.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(()).await;
        }
        self.drop_clients();
    }

    /// Returns the address the controller is listening on.
    #[must_use]
    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    /// Number of client connections accepted so far.
    #[must_use]
    pub fn accepted_connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Sets a variable that `GET` will report.
    pub async fn set_variable(&self, target: impl Into<Target>, name: &str, value: &str) {
        let target = target.into().device_str();
        self.state.write().await.store(&target, name, value);
    }

    /// Stores a variable and pushes it to every client as a notification.
    pub async fn push_update(&self, target: impl Into<Target>, name: &str, value: &str) {
        let target = target.into().device_str();
        self.state.write().await.store(&target, name, value);
        self.push_line(&format!("N {target}.{name}=\"{value}\""));
    }

    /// Sends a raw line to every client.
    pub fn push_line(&self, line: &str) {
        let _ = self.clients.send(ClientSignal::Push(line.to_string()));
    }

    /// Closes every client socket; the listener keeps accepting.
    pub fn drop_clients(&self) {
        let _ = self.clients.send(ClientSignal::Drop);
    }

    /// Stop answering commands (they are still recorded).
    pub async fn set_unresponsive(&self, unresponsive: bool) {
        self.state.write().await.unresponsive = unresponsive;
    }

    /// Returns every command received so far.
    pub async fn received_commands(&self) -> Vec<String> {
        self.state.read().await.received.clone()
    }

    /// Forgets the received-command history.
    pub async fn clear_received(&self) {
        self.state.write().await.received.clear();
    }

    /// Returns targets currently watched, in wire form.
    pub async fn watched(&self) -> Vec<String> {
        self.state.read().await.watched.iter().cloned().collect()
    }

    /// Returns `EVENT` commands received, without the `EVENT ` prefix.
    pub async fn events(&self) -> Vec<String> {
        self.state.read().await.events.clone()
    }
}

impl Drop for MockController {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.try_send(());
        }
        let _ = self.clients.send(ClientSignal::Drop);
    }
}

/// Serve one client until it disconnects or is dropped.
async fn handle_client(
    stream: TcpStream,
    state: Arc<RwLock<ControllerState>>,
    mut signals: broadcast::Receiver<ClientSignal>,
    config: MockControllerConfig,
) {
    let (read, mut write) = stream.into_split();
    let codec =
        AnyDelimiterCodec::new_with_max_length(b"\r\n".to_vec(), b"\r\n".to_vec(), config.max_command_length);
    let mut commands = FramedRead::new(read, codec);

    loop {
        let lines = tokio::select! {
            command = commands.next() => match command {
                Some(Ok(bytes)) => {
                    let command = String::from_utf8_lossy(&bytes).trim().to_string();
                    if command.is_empty() {
                        continue;
                    }
                    answer(&state, &command, &config).await
                }
                Some(Err(e)) => {
                    tracing::debug!("Mock controller read error: {}", e);
                    return;
                }
                None => return,
            },
            signal = signals.recv() => match signal {
                Ok(ClientSignal::Push(line)) => vec![line],
                Ok(ClientSignal::Drop) | Err(broadcast::error::RecvError::Closed) => return,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            },
        };

        for line in lines {
            if write.write_all(format!("{line}\r\n").as_bytes()).await.is_err() {
                return;
            }
        }
    }
}

/// Lines to send back for one command.
async fn answer(
    state: &RwLock<ControllerState>,
    command: &str,
    config: &MockControllerConfig,
) -> Vec<String> {
    let mut state = state.write().await;
    state.received.push(command.to_string());
    if state.unresponsive {
        return Vec::new();
    }

    let error = || vec![format!("E {}", config.error_message)];
    let (verb, rest) = command.split_once(' ').unwrap_or((command, ""));

    match verb {
        "GET" => {
            let Some((target, name)) = rest.rsplit_once('.') else {
                return error();
            };
            match state.lookup(target, name) {
                Some(value) => vec![format!("S {target}.{name}=\"{value}\"")],
                None => error(),
            }
        }
        "SET" => {
            let Some((path, value)) = rest.split_once('=') else {
                return error();
            };
            let Some((target, name)) = path.rsplit_once('.') else {
                return error();
            };
            let value = value.trim_matches('"');
            state.store(target, name, value);

            let mut lines = Vec::new();
            if state.watched.contains(target) {
                lines.push(format!("N {target}.{}=\"{value}\"", name.to_lowercase()));
            }
            lines.push("S".to_string());
            lines
        }
        "WATCH" => {
            let Some((target, mode)) = rest.rsplit_once(' ') else {
                return error();
            };
            match mode {
                "ON" => {
                    state.watched.insert(target.to_string());
                    // A fresh watch reports the current state first
                    let mut lines: Vec<String> = state
                        .variables
                        .get(target)
                        .map(|vars| {
                            vars.iter()
                                .map(|(name, value)| format!("N {target}.{name}=\"{value}\""))
                                .collect()
                        })
                        .unwrap_or_default();
                    lines.push("S".to_string());
                    lines
                }
                "OFF" => {
                    state.watched.remove(target);
                    vec!["S".to_string()]
                }
                _ => error(),
            }
        }
        "EVENT" if rest.contains('!') => {
            state.events.push(rest.to_string());
            vec!["S".to_string()]
        }
        _ => error(),
    }
}
