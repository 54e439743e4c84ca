//! Variable cache and lifecycle events

mod cache;
mod events;

pub use cache::{
    ObserverId, PresetObserver, SourceObserver, Uncached, VariableCache, Variables,
    ZoneObserver,
};
pub use events::{DisconnectReason, EventBus, EventFilter, Handler, RioEvent, Signal, Subscription};
