// src/lib.rs
//! miniweb: a single-host HTTP server exposing system introspection endpoints.
//!
//! The engine lives in `miniweb-core`; this crate holds configuration, the
//! route handlers and the data collectors they read from.

pub mod cli;
pub mod config;
pub mod handlers;
pub mod logging;
pub mod netinfo;
pub mod state;
pub mod templates;

pub use config::{Config, ConfigError};
pub use state::AppState;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
