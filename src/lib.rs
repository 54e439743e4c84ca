//! # russound-rio
//!
//! An async client for the Russound RIO protocol, the line-oriented text
//! protocol Russound multi-zone audio controllers speak on TCP port 9621.
//!
//! ## Features
//!
//! - One shared socket with strict command/reply correlation
//! - Cache of every zone, source and preset variable seen on the wire
//! - Typed change observers per variable domain
//! - Automatic reconnection with re-subscription of watched zones
//! - Lifecycle events through a small publish/subscribe bus
//!
//! ## Example
//!
//! ```rust,no_run
//! use russound_rio::{Connection, EventBus, RioConfig, ZoneId};
//!
//! # async fn example() -> Result<(), russound_rio::RioError> {
//! let connection = Connection::new(EventBus::current());
//! connection.connect(RioConfig::builder("192.168.1.50").build()).await?;
//!
//! let kitchen = ZoneId::new(1, 1)?;
//! connection.add_zone_callback(|zone: ZoneId, name: &str, value: &str| {
//!     println!("{zone} {name} = {value}");
//! });
//! connection.watch_zone(kitchen).await?;
//!
//! let volume = connection.get_zone_variable(kitchen, "volume").await?;
//! println!("volume is {volume}");
//!
//! connection.disconnect().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **High-level**: [`Controller`] - lifecycle relay and zone/source discovery
//! - **Mid-level**: [`Connection`] - commands, cache, watches and reconnection
//! - **Low-level**: [`protocol`] - line codec, command rendering, response parsing

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
/// Error types
pub mod error;
/// Variable cache and lifecycle events
pub mod state;
/// Core types
pub mod types;

/// Testing utilities
pub mod testing;

pub mod connection;
mod controller;
pub mod net;
pub mod protocol;

// Re-exports
pub use connection::{Connection, ConnectionState, ConnectionStats};
pub use controller::{
    Controller, MAX_CONTROLLERS, MAX_SOURCES, PresetInfo, SourceInfo, TUNER_SOURCE_TYPE,
    ZONES_PER_CONTROLLER, ZoneInfo,
};
pub use error::{Result, RioError};
pub use protocol::{Command, Target};
pub use state::{
    DisconnectReason, EventBus, EventFilter, Handler, ObserverId, RioEvent, Signal, Subscription,
    Uncached, VariableCache,
};
pub use types::{PresetId, RioConfig, RioConfigBuilder, SourceId, ZoneId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for common imports
///
/// Convenient re-exports
pub mod prelude {
    pub use crate::{
        Connection, ConnectionState, Controller, EventBus, Handler, PresetId, RioConfig, RioError,
        RioEvent, Signal, SourceId, ZoneId,
    };
}
