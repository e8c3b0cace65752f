//! Errors surfaced to export callers.

use vexport_common::error::VexportError;
use vexport_media_core::EngineError;

/// Terminal failure of an export.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExportError {
    /// Invalid configuration, or the reader/writer could not be set up.
    #[error("Export setup failed: {reason}")]
    SetupFailure { reason: String },

    /// The reader failed without reporting an engine error.
    #[error("Reading the source failed")]
    ReadingFailure,

    /// The writer failed without reporting an engine error.
    #[error("Writing the destination failed")]
    WritingFailure,

    #[error("Export cancelled")]
    Cancelled,

    /// The reader or writer failed with this engine-reported error.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Result type alias using ExportError.
pub type ExportResult<T> = Result<T, ExportError>;

impl ExportError {
    pub fn setup(reason: impl Into<String>) -> Self {
        Self::SetupFailure {
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExportError::Cancelled)
    }
}

impl From<VexportError> for ExportError {
    fn from(err: VexportError) -> Self {
        Self::setup(err.to_string())
    }
}
