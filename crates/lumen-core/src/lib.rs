//! Core building blocks shared by every Lumen crate.
//!
//! Holds the configuration loaded once at startup, the error taxonomy, and
//! the wire-protocol types exchanged over the client WebSocket.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{LumenError, Result};
