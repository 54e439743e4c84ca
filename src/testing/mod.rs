//! Test support
//!
//! An in-process [`MockController`] used by this crate's integration tests
//! and available to host applications for their own.

pub mod mock_controller;

pub use mock_controller::{MockController, MockControllerConfig};
