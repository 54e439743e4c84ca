//! Connection management

mod manager;
mod multiplexer;
mod state;

pub use manager::Connection;
pub use state::{ConnectionState, ConnectionStats};
