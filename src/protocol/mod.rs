//! RIO wire protocol
//!
//! Sans-IO pieces: line framing, command rendering and response
//! classification. The connection module drives them over a socket.

pub mod codec;
pub mod command;
pub mod response;


pub use codec::RioCodec;
pub use command::{Command, Target};
pub use response::{Response, StateUpdate, UpdateTarget, parse_line, parse_state_update};
