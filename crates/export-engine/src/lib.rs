//! vexport export engine
//!
//! Orchestrates a transcode through a [`vexport_media_core::MediaEngine`]:
//!
//! ```text
//! ExportSession -> ExportWorker (tokio task)
//!                    |- reader  -> video output -> pump -> video input -|
//!                    |          -> audio output -> pump -> audio input -|-> writer
//!                    \- PumpJoin -> finish -> resolve -> completion
//! ```
//!
//! The video output is composed with an orientation-correcting, letterboxing
//! transform computed by [`transform::RenderGeometry`]. Progress is derived
//! from video presentation times. A failed or cancelled export removes its
//! partial output before the caller is told.

pub mod config;
pub mod error;
pub mod export;
pub mod join;
pub mod pump;
pub mod session;
pub mod status;
pub mod transform;

pub use config::ExportConfiguration;
pub use error::{ExportError, ExportResult};
pub use export::{ExportEvent, ExportSession, ProgressStream};
pub use pump::{ProgressHandler, RenderHandler};
pub use session::{CompletionHandler, SessionSnapshot};
pub use status::ExportStatus;
pub use transform::{build_video_composition, CompositionPlan, RenderGeometry};
