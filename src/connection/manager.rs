//! Connection to a RIO controller
//!
//! Owns the socket (through the background loop), the variable cache, the
//! watch sets and the reconnection state machine.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::multiplexer::{CommandQueue, LoopExit, Multiplexer, PendingCommand};
use super::state::{ConnectionState, ConnectionStats};
use crate::error::{Result, RioError};
use crate::net::{self, Runtime, TcpStream};
use crate::protocol::Command;
use crate::state::{
    DisconnectReason, EventBus, ObserverId, PresetObserver, RioEvent, Signal, SourceObserver,
    VariableCache, Variables, ZoneObserver,
};
use crate::types::{PresetId, RioConfig, SourceId, ZoneId};

/// A spawned background task and its stop signal
struct Task {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

impl Task {
    fn spawn<F>(token: CancellationToken, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
            token,
        }
    }

    /// Cancel and wait for the task to finish
    async fn stop(self) {
        self.token.cancel();
        if let Err(err) = self.handle.await {
            if err.is_panic() {
                tracing::warn!("Background task panicked during shutdown");
            }
        }
    }
}

#[derive(Default)]
struct Lifecycle {
    io: Option<Task>,
    reconnect: Option<Task>,
    /// Bumped for every socket, so stale fault reports can be told apart
    session: u64,
}

struct Inner {
    bus: EventBus,
    cache: Arc<VariableCache>,
    state: watch::Sender<ConnectionState>,
    config: RwLock<Option<RioConfig>>,
    commands: mpsc::UnboundedSender<PendingCommand>,
    queue: CommandQueue,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    watched_zones: Mutex<BTreeSet<ZoneId>>,
    watched_sources: Mutex<BTreeSet<SourceId>>,
    stats: Arc<Mutex<ConnectionStats>>,
}

impl Inner {
    fn config(&self) -> Option<RioConfig> {
        self.config.read().clone()
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let old = self.state.send_replace(state);
        if old != state {
            tracing::debug!(%old, new = %state, "Connection state changed");
        }
    }

    fn publish(&self, event: RioEvent) {
        self.bus.publish(Signal::Connection, event);
    }

    /// Start a background loop over `stream` and enter `Connected`
    ///
    /// Caller holds the lifecycle lock.
    fn start_io(self: &Arc<Self>, lifecycle: &mut Lifecycle, stream: TcpStream, config: &RioConfig) {
        lifecycle.session += 1;
        let session = lifecycle.session;

        let mux = Multiplexer::new(
            stream,
            Arc::clone(&self.cache),
            Arc::clone(&self.stats),
            config.debug_protocol,
            config.command_timeout,
        );
        let queue = Arc::clone(&self.queue);
        let token = CancellationToken::new();
        let shutdown = token.clone();
        let weak = Arc::downgrade(self);

        lifecycle.io = Some(Task::spawn(token, async move {
            if let LoopExit::Fault(err) = mux.run(queue, shutdown).await {
                if let Some(inner) = weak.upgrade() {
                    // A disconnect may hold the lifecycle lock while awaiting this task
                    tokio::spawn(inner.handle_fault(session, err));
                }
            }
        }));

        self.stats.lock().connected_at = Some(Runtime::now());
        self.set_state(ConnectionState::Connected);
        tracing::debug!(host = %config.host, port = config.port, session, "Connected");
        self.publish(RioEvent::Connected);
    }

    /// React to a background loop fault on socket `session`
    async fn handle_fault(self: Arc<Self>, session: u64, err: RioError) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.session != session || !self.state().is_connected() {
            tracing::debug!(session, error = %err, "Ignoring stale fault");
            return;
        }
        lifecycle.io = None;

        let reason = err.describe();
        tracing::warn!(reason, "Connection lost");
        {
            let mut stats = self.stats.lock();
            stats.last_error = Some(reason.clone());
            stats.connected_at = None;
        }

        if self.config().is_some_and(|c| c.auto_reconnect) {
            self.begin_reconnect(&mut lifecycle, reason);
            return;
        }

        self.set_state(ConnectionState::Disconnected);
        let failed = self
            .fail_queued(|| RioError::ConnectionLost {
                reason: reason.clone(),
            })
            .await;
        tracing::debug!(failed, "Failed queued commands");
        self.publish(RioEvent::Disconnected {
            reason: DisconnectReason::Transport(reason),
        });
    }

    /// Enter `Reconnecting` and spawn the retry loop
    fn begin_reconnect(self: &Arc<Self>, lifecycle: &mut Lifecycle, reason: String) {
        self.set_state(ConnectionState::Reconnecting);
        self.publish(RioEvent::Reconnecting { reason });

        let token = CancellationToken::new();
        lifecycle.reconnect = Some(Task::spawn(
            token.clone(),
            reconnect_loop(Arc::downgrade(self), token),
        ));
    }

    /// Resolve every queued command with an error
    async fn fail_queued(&self, error: impl Fn() -> RioError) -> usize {
        let mut queue = self.queue.lock().await;
        let mut failed = 0;
        while let Ok(command) = queue.try_recv() {
            command.resolve(Err(error()));
            failed += 1;
        }
        failed
    }

    /// Re-send `WATCH ... ON` for everything in the watch sets
    fn rewatch(self: &Arc<Self>) {
        let zones: Vec<ZoneId> = self.watched_zones.lock().iter().copied().collect();
        let sources: Vec<SourceId> = self.watched_sources.lock().iter().copied().collect();
        if zones.is_empty() && sources.is_empty() {
            return;
        }

        let connection = Connection {
            inner: Arc::clone(self),
        };
        tokio::spawn(async move {
            for zone in zones {
                if let Err(err) = connection.send(&Command::watch(zone, true)).await {
                    tracing::warn!(%zone, error = %err, "Failed to re-watch zone");
                }
            }
            for source in sources {
                if let Err(err) = connection.send(&Command::watch(source, true)).await {
                    tracing::warn!(%source, error = %err, "Failed to re-watch source");
                }
            }
        });
    }
}

/// Retry until connected or cancelled, waiting `reconnect_delay` before each attempt
async fn reconnect_loop(weak: Weak<Inner>, token: CancellationToken) {
    loop {
        let Some(config) = weak.upgrade().and_then(|inner| inner.config()) else {
            return;
        };

        tokio::select! {
            () = token.cancelled() => return,
            () = Runtime::sleep(config.reconnect_delay) => {}
        }

        let Some(inner) = weak.upgrade() else {
            return;
        };
        let attempt = {
            let mut stats = inner.stats.lock();
            stats.reconnect_attempts += 1;
            stats.reconnect_attempts
        };
        tracing::debug!(host = %config.host, attempt, "Reconnecting");

        let result = tokio::select! {
            () = token.cancelled() => return,
            result = net::connect_tcp(&config.host, config.port, config.connection_timeout) => result,
        };

        match result {
            Ok(stream) => {
                let mut lifecycle = tokio::select! {
                    () = token.cancelled() => return,
                    lifecycle = inner.lifecycle.lock() => lifecycle,
                };
                // A disconnect that won the lock has already taken this task
                if token.is_cancelled() {
                    return;
                }
                lifecycle.reconnect = None;
                inner.start_io(&mut lifecycle, stream, &config);
                drop(lifecycle);

                tracing::info!(host = %config.host, attempt, "Reconnected");
                if config.resubscribe_on_reconnect {
                    inner.rewatch();
                }
                return;
            }
            Err(err) => {
                let reason = err.describe();
                tracing::debug!(attempt, reason, "Reconnect attempt failed");
                inner.stats.lock().last_error = Some(reason);
            }
        }
    }
}

/// Connection to a RIO controller
///
/// Cheap to clone; clones share the same socket, cache and state.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Create a disconnected connection publishing lifecycle events on `bus`
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        let (commands, queue) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(Inner {
                bus,
                cache: Arc::new(VariableCache::new()),
                state,
                config: RwLock::new(None),
                commands,
                queue: Arc::new(tokio::sync::Mutex::new(queue)),
                lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
                watched_zones: Mutex::new(BTreeSet::new()),
                watched_sources: Mutex::new(BTreeSet::new()),
                stats: Arc::new(Mutex::new(ConnectionStats::default())),
            }),
        }
    }

    /// Event bus lifecycle events are published on
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Variable cache fed by this connection
    #[must_use]
    pub fn cache(&self) -> &Arc<VariableCache> {
        &self.inner.cache
    }

    /// Get current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Receiver that observes every state change
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Check if fully connected
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Check if the retry loop is running
    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.state().is_reconnecting()
    }

    /// Parameters of the last `connect` call
    #[must_use]
    pub fn config(&self) -> Option<RioConfig> {
        self.inner.config()
    }

    /// Get connection statistics
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        self.inner.stats.lock().clone()
    }

    // === Lifecycle ===

    /// Connect to the controller described by `config`
    ///
    /// A no-op while already connected or reconnecting. When the attempt
    /// fails and `auto_reconnect` is set, the connection enters
    /// `Reconnecting` and this returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns the classified connection error if the attempt fails and
    /// `auto_reconnect` is off; the state stays `Disconnected`.
    pub async fn connect(&self, config: RioConfig) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let state = self.state();
        if state.is_active() {
            tracing::debug!(%state, "Connect ignored");
            return Ok(());
        }

        *self.inner.config.write() = Some(config.clone());
        tracing::debug!(host = %config.host, port = config.port, "Connecting");

        match net::connect_tcp(&config.host, config.port, config.connection_timeout).await {
            Ok(stream) => {
                self.inner.start_io(&mut lifecycle, stream, &config);
                Ok(())
            }
            Err(err) => {
                let reason = err.describe();
                self.inner.stats.lock().last_error = Some(reason.clone());

                if config.auto_reconnect {
                    tracing::warn!(host = %config.host, reason, "Connection failed, will retry");
                    self.inner.begin_reconnect(&mut lifecycle, reason);
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Shut the connection down
    ///
    /// Stops the retry loop and the background loop and waits for both,
    /// fails every queued command with `ConnectionClosed`, then publishes
    /// `Disconnected`. A no-op while already disconnected.
    pub async fn disconnect(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if self.state() == ConnectionState::Disconnected {
            return;
        }
        self.inner.set_state(ConnectionState::Disconnected);

        let tasks = [lifecycle.reconnect.take(), lifecycle.io.take()];
        for task in tasks.into_iter().flatten() {
            task.stop().await;
        }

        let failed = self.inner.fail_queued(|| RioError::ConnectionClosed).await;
        self.inner.stats.lock().connected_at = None;
        drop(lifecycle);

        tracing::debug!(failed, "Disconnected");
        self.inner.publish(RioEvent::Disconnected {
            reason: DisconnectReason::UserRequested,
        });
    }

    // === Commands ===

    /// Send raw command text and wait for its outcome
    ///
    /// While reconnecting the command is queued and sent once the
    /// connection is back, bounded by `command_timeout`. A written command
    /// that gets no outcome within that bound also drops the socket, which
    /// reconnects when `auto_reconnect` is set.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` when disconnected, `Command` for an `E`
    /// outcome, `CommandTimeout` when the bound elapses, and
    /// `ConnectionLost`/`ConnectionClosed` when the transport goes away
    /// before the outcome arrives.
    pub async fn send_command(&self, text: impl Into<String>) -> Result<String> {
        if self.state() == ConnectionState::Disconnected {
            return Err(RioError::NotConnected);
        }

        let timeout = self.inner.config().and_then(|c| c.command_timeout);
        let (command, reply) = PendingCommand::new(text.into());
        self.inner
            .commands
            .send(command)
            .map_err(|_| RioError::ConnectionClosed)?;

        let reply = async {
            reply.await.unwrap_or_else(|_| {
                Err(RioError::ConnectionLost {
                    reason: "background loop stopped".to_string(),
                })
            })
        };

        match timeout {
            Some(duration) => Runtime::timeout(duration, reply)
                .await
                .map_err(|_| RioError::CommandTimeout { duration })?,
            None => reply.await,
        }
    }

    /// Send a typed command
    ///
    /// # Errors
    ///
    /// Same as [`send_command`](Self::send_command).
    pub async fn send(&self, command: &Command) -> Result<String> {
        self.send_command(command.to_string()).await
    }

    // === Watches ===

    /// Ask the controller to push changes for `zone`
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails; the zone is then not recorded.
    pub async fn watch_zone(&self, zone: ZoneId) -> Result<()> {
        self.send(&Command::watch(zone, true)).await?;
        self.inner.watched_zones.lock().insert(zone);
        Ok(())
    }

    /// Stop push updates for `zone`
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn unwatch_zone(&self, zone: ZoneId) -> Result<()> {
        self.inner.watched_zones.lock().remove(&zone);
        self.send(&Command::watch(zone, false)).await?;
        Ok(())
    }

    /// Ask the controller to push changes for `source`
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails; the source is then not recorded.
    pub async fn watch_source(&self, source: SourceId) -> Result<()> {
        self.send(&Command::watch(source, true)).await?;
        self.inner.watched_sources.lock().insert(source);
        Ok(())
    }

    /// Stop push updates for `source`
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn unwatch_source(&self, source: SourceId) -> Result<()> {
        self.inner.watched_sources.lock().remove(&source);
        self.send(&Command::watch(source, false)).await?;
        Ok(())
    }

    /// Zones currently watched
    #[must_use]
    pub fn watched_zones(&self) -> Vec<ZoneId> {
        self.inner.watched_zones.lock().iter().copied().collect()
    }

    /// Sources currently watched
    #[must_use]
    pub fn watched_sources(&self) -> Vec<SourceId> {
        self.inner.watched_sources.lock().iter().copied().collect()
    }

    // === Variables ===

    /// Get a zone variable from the cache, asking the controller on a miss
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is uncached and the `GET` fails.
    pub async fn get_zone_variable(&self, zone: ZoneId, name: &str) -> Result<String> {
        match self.inner.cache.retrieve_zone(zone, name) {
            Ok(value) => Ok(value),
            Err(miss) => {
                tracing::trace!(%miss, "Asking controller");
                self.send(&Command::get(zone, name)).await
            }
        }
    }

    /// Get a source variable from the cache, asking the controller on a miss
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is uncached and the `GET` fails.
    pub async fn get_source_variable(&self, source: SourceId, name: &str) -> Result<String> {
        match self.inner.cache.retrieve_source(source, name) {
            Ok(value) => Ok(value),
            Err(miss) => {
                tracing::trace!(%miss, "Asking controller");
                self.send(&Command::get(source, name)).await
            }
        }
    }

    /// Get a preset variable from the cache, asking the controller on a miss
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is uncached and the `GET` fails.
    pub async fn get_preset_variable(&self, preset: PresetId, name: &str) -> Result<String> {
        match self.inner.cache.retrieve_preset(preset, name) {
            Ok(value) => Ok(value),
            Err(miss) => {
                tracing::trace!(%miss, "Asking controller");
                self.send(&Command::get(preset, name)).await
            }
        }
    }

    /// Cached zone variable, or `default`
    #[must_use]
    pub fn get_cached_zone_variable(&self, zone: ZoneId, name: &str, default: &str) -> String {
        self.inner
            .cache
            .retrieve_zone(zone, name)
            .unwrap_or_else(|_| default.to_string())
    }

    /// Cached source variable, or `default`
    #[must_use]
    pub fn get_cached_source_variable(
        &self,
        source: SourceId,
        name: &str,
        default: &str,
    ) -> String {
        self.inner
            .cache
            .retrieve_source(source, name)
            .unwrap_or_else(|_| default.to_string())
    }

    /// Cached preset variable, or `default`
    #[must_use]
    pub fn get_cached_preset_variable(
        &self,
        preset: PresetId,
        name: &str,
        default: &str,
    ) -> String {
        self.inner
            .cache
            .retrieve_preset(preset, name)
            .unwrap_or_else(|_| default.to_string())
    }

    /// All cached variables of a zone
    #[must_use]
    pub fn zone_variables(&self, zone: ZoneId) -> Option<Variables> {
        self.inner.cache.zone_variables(zone)
    }

    /// All cached variables of a source
    #[must_use]
    pub fn source_variables(&self, source: SourceId) -> Option<Variables> {
        self.inner.cache.source_variables(source)
    }

    /// All cached variables of a preset
    #[must_use]
    pub fn preset_variables(&self, preset: PresetId) -> Option<Variables> {
        self.inner.cache.preset_variables(preset)
    }

    /// Assign a zone variable
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn set_zone_variable(
        &self,
        zone: ZoneId,
        name: &str,
        value: impl Into<String>,
    ) -> Result<()> {
        self.send(&Command::set(zone, name, value)).await?;
        Ok(())
    }

    /// Assign a source variable
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn set_source_variable(
        &self,
        source: SourceId,
        name: &str,
        value: impl Into<String>,
    ) -> Result<()> {
        self.send(&Command::set(source, name, value)).await?;
        Ok(())
    }

    /// Send a key-press style event to a zone, e.g. `KeyPress Volume 25`
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn send_zone_event<I, A>(&self, zone: ZoneId, event: &str, args: I) -> Result<()>
    where
        I: IntoIterator<Item = A>,
        A: ToString,
    {
        self.send(&Command::event(zone, event, args)).await?;
        Ok(())
    }

    // === Callbacks ===

    /// Register a zone change callback
    pub fn add_zone_callback(&self, observer: impl ZoneObserver + 'static) -> ObserverId {
        self.inner.cache.add_zone_observer(observer)
    }

    /// Remove a zone change callback
    pub fn remove_zone_callback(&self, id: ObserverId) -> bool {
        self.inner.cache.remove_zone_observer(id)
    }

    /// Register a source change callback
    pub fn add_source_callback(&self, observer: impl SourceObserver + 'static) -> ObserverId {
        self.inner.cache.add_source_observer(observer)
    }

    /// Remove a source change callback
    pub fn remove_source_callback(&self, id: ObserverId) -> bool {
        self.inner.cache.remove_source_observer(id)
    }

    /// Register a preset change callback
    pub fn add_preset_callback(&self, observer: impl PresetObserver + 'static) -> ObserverId {
        self.inner.cache.add_preset_observer(observer)
    }

    /// Remove a preset change callback
    pub fn remove_preset_callback(&self, id: ObserverId) -> bool {
        self.inner.cache.remove_preset_observer(id)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("host", &self.config().map(|c| c.host))
            .finish_non_exhaustive()
    }
}
