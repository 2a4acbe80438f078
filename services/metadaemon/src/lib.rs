//! Station metadata daemon library.
//!
//! This module exposes the internal modules for testing purposes.

pub mod config;
pub mod daemon;
pub mod fdsnws;
pub mod server;
pub mod stages;
pub mod store;
