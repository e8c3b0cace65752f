//! vexport media core contracts
//!
//! This crate describes the external media engine that performs the actual
//! demultiplexing, decoding, compositing, encoding, and multiplexing. The
//! export engine only orchestrates calls through these traits:
//!
//! ```text
//!  Asset ──► AssetReader ──► ReaderOutput (video) ──┐
//!                      └──► ReaderOutput (audio) ──┼──► pump ──► WriterInput ──► AssetWriter ──► file
//!                                                   └──► PixelBufferAdaptor ─┘
//! ```
//!
//! It also holds the plain data those traits exchange: track descriptions,
//! samples, pixel buffers, settings maps, and video compositions.

pub mod composition;
pub mod engine;
pub mod media;
pub mod settings;

pub use composition::*;
pub use engine::*;
pub use media::*;
pub use settings::*;
