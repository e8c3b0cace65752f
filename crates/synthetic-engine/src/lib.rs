//! Synthetic media engine
//!
//! A complete, in-process implementation of the vexport media engine
//! contracts. Sources are generated from track descriptions, and the writer
//! "multiplexes" by appending one JSON line per sample to the destination
//! file, so exports can be run and inspected without a platform framework.
//!
//! Backpressure and failures are configurable through
//! [`SyntheticEngineConfig`] to exercise the export session's pump and
//! completion paths.

pub mod asset;
pub mod container;
pub mod engine;
pub mod reader;
pub mod writer;

pub use asset::*;
pub use container::*;
pub use engine::*;
