//! Event bus for lifecycle events
//!
//! Handlers subscribe to a named [`Signal`]. Publishing calls every handler
//! of that signal in registration order. Immediate handlers run inline on the
//! publishing task; scheduled handlers are spawned onto the runtime the bus
//! was created with. Every published event is also copied to a broadcast
//! channel for stream-style consumers.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

/// Capacity of the broadcast tap
const TAP_CAPACITY: usize = 100;

/// Named channel an event is published on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Transport lifecycle of a [`Connection`](crate::Connection)
    Connection,
    /// Lifecycle of a [`Controller`](crate::Controller)
    Controller,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => f.write_str("connection"),
            Self::Controller => f.write_str("controller"),
        }
    }
}

/// Why a connection went down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect` was called
    UserRequested,
    /// The transport failed and reconnection is disabled
    Transport(String),
}

/// Lifecycle events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RioEvent {
    /// Transport is up and the reader is running
    Connected,
    /// Transport was lost and the retry loop is running
    Reconnecting {
        /// Failure that triggered the retry loop
        reason: String,
    },
    /// Transport is down and will not be retried
    Disconnected {
        /// Why the transport went down
        reason: DisconnectReason,
    },
    /// Controller became usable
    ControllerConnected,
    /// Controller stopped being usable
    ControllerDisconnected,
}

impl RioEvent {
    /// Signal this event is normally published on
    #[must_use]
    pub fn signal(&self) -> Signal {
        match self {
            Self::Connected | Self::Reconnecting { .. } | Self::Disconnected { .. } => {
                Signal::Connection
            }
            Self::ControllerConnected | Self::ControllerDisconnected => Signal::Controller,
        }
    }
}

type ImmediateFn = dyn Fn(&RioEvent) + Send + Sync;
type ScheduledFn = dyn Fn(RioEvent) -> BoxFuture<'static, ()> + Send + Sync;

/// A subscribed handler
#[derive(Clone)]
pub enum Handler {
    /// Runs synchronously inside `publish`
    Immediate(Arc<ImmediateFn>),
    /// Spawned as a task on the bus runtime
    Scheduled(Arc<ScheduledFn>),
}

impl Handler {
    /// Wrap a synchronous callback
    pub fn immediate<F>(f: F) -> Self
    where
        F: Fn(&RioEvent) + Send + Sync + 'static,
    {
        Self::Immediate(Arc::new(f))
    }

    /// Wrap an async callback
    pub fn scheduled<F, Fut>(f: F) -> Self
    where
        F: Fn(RioEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::Scheduled(Arc::new(move |event| f(event).boxed()))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate(_) => f.write_str("Handler::Immediate"),
            Self::Scheduled(_) => f.write_str("Handler::Scheduled"),
        }
    }
}

struct BusInner {
    handlers: RwLock<HashMap<Signal, Vec<(u64, Handler)>>>,
    next_id: AtomicU64,
    tap: broadcast::Sender<(Signal, RioEvent)>,
    runtime: Handle,
}

/// Publish/subscribe hub for lifecycle events
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus whose scheduled handlers run on `runtime`
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        let (tap, _) = broadcast::channel(TAP_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                handlers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                tap,
                runtime,
            }),
        }
    }

    /// Create a bus bound to the current runtime
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Register a handler; handlers of one signal fire in registration order
    pub fn subscribe(&self, signal: Signal, handler: Handler) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .entry(signal)
            .or_default()
            .push((id, handler));

        Subscription {
            bus: Arc::downgrade(&self.inner),
            signal,
            id,
        }
    }

    /// Deliver `event` to every handler subscribed to `signal`
    pub fn publish(&self, signal: Signal, event: RioEvent) {
        // Handlers may publish or subscribe themselves
        let handlers: Vec<Handler> = self
            .inner
            .handlers
            .read()
            .get(&signal)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        tracing::debug!(%signal, ?event, handlers = handlers.len(), "Publishing event");

        for handler in handlers {
            match handler {
                Handler::Immediate(f) => f(&event),
                Handler::Scheduled(f) => {
                    self.inner.runtime.spawn(f(event.clone()));
                }
            }
        }

        // No tap listeners is fine
        let _ = self.inner.tap.send((signal, event));
    }

    /// Remove every handler of every signal
    pub fn unsubscribe_all(&self) {
        self.inner.handlers.write().clear();
    }

    /// Number of handlers subscribed to `signal`
    #[must_use]
    pub fn subscriber_count(&self, signal: Signal) -> usize {
        self.inner
            .handlers
            .read()
            .get(&signal)
            .map_or(0, Vec::len)
    }

    /// Receive a copy of every published event
    #[must_use]
    pub fn listen(&self) -> broadcast::Receiver<(Signal, RioEvent)> {
        self.inner.tap.subscribe()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("connection", &self.subscriber_count(Signal::Connection))
            .field("controller", &self.subscriber_count(Signal::Controller))
            .finish_non_exhaustive()
    }
}

/// Handle to a registered handler
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<BusInner>,
    signal: Signal,
    id: u64,
}

impl Subscription {
    /// Signal the handler is subscribed to
    #[must_use]
    pub fn signal(&self) -> Signal {
        self.signal
    }

    /// Remove the handler; a no-op if the bus is gone or already cleared
    pub fn unsubscribe(self) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        if let Some(list) = bus.handlers.write().get_mut(&self.signal) {
            list.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Receiver that yields only events matching a predicate
pub struct EventFilter {
    rx: broadcast::Receiver<(Signal, RioEvent)>,
    filter: Box<dyn Fn(Signal, &RioEvent) -> bool + Send>,
}

impl EventFilter {
    /// Create a filtered receiver on `bus`
    pub fn new<F>(bus: &EventBus, filter: F) -> Self
    where
        F: Fn(Signal, &RioEvent) -> bool + Send + 'static,
    {
        Self {
            rx: bus.listen(),
            filter: Box::new(filter),
        }
    }

    /// Events published on one signal
    #[must_use]
    pub fn signal(bus: &EventBus, signal: Signal) -> Self {
        Self::new(bus, move |s, _| s == signal)
    }

    /// Receive the next matching event, or `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<RioEvent> {
        loop {
            match self.rx.recv().await {
                Ok((signal, event)) if (self.filter)(signal, &event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
