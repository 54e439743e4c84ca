//! Core types module

mod config;
mod ids;


pub use config::{
    DEFAULT_COMMAND_TIMEOUT, DEFAULT_PORT, DEFAULT_RECONNECT_DELAY, DEFAULT_TIMEOUT, RioConfig,
    RioConfigBuilder,
};
pub use ids::{BANKS_PER_SOURCE, PRESETS_PER_BANK, PresetId, SourceId, ZoneId};
