//! vexport common utilities
//!
//! Shared infrastructure for all vexport crates:
//! - Error types and result aliases
//! - Rational media time and time ranges
//! - Tracing/logging initialization
//! - Configuration loading

pub mod config;
pub mod error;
pub mod logging;
pub mod time;

pub use config::*;
pub use error::*;
pub use time::*;
