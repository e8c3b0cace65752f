//! Export status and final outcome resolution.

use serde::{Deserialize, Serialize};
use vexport_media_core::{EngineError, ReaderStatus, WriterStatus};

use crate::error::{ExportError, ExportResult};
use crate::join::JoinSummary;

/// Lifecycle of an export as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    /// No export started, or no writer exists yet.
    #[default]
    Unknown,
    Exporting,
    Completed,
    Failed,
    Cancelled,
}

impl ExportStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExportStatus::Completed | ExportStatus::Failed | ExportStatus::Cancelled
        )
    }
}

impl From<WriterStatus> for ExportStatus {
    fn from(status: WriterStatus) -> Self {
        match status {
            WriterStatus::Unknown => ExportStatus::Unknown,
            WriterStatus::Writing => ExportStatus::Exporting,
            WriterStatus::Completed => ExportStatus::Completed,
            WriterStatus::Failed => ExportStatus::Failed,
            WriterStatus::Cancelled => ExportStatus::Cancelled,
        }
    }
}

/// Everything known about an export once pumping stopped.
#[derive(Debug, Clone, Default)]
pub struct FinalState {
    pub cancel_requested: bool,
    pub reader: Option<(ReaderStatus, Option<EngineError>)>,
    pub writer: Option<(WriterStatus, Option<EngineError>)>,
    pub pumps: Option<JoinSummary>,
}

/// Decide how an export ended.
///
/// An explicit cancel wins. Otherwise an engine failure is reported with the
/// engine's own error when it has one, and a side cancelled in response to
/// the other side's failure does not mask that failure.
pub fn resolve(state: &FinalState) -> ExportResult<ExportStatus> {
    if state.cancel_requested {
        return Err(ExportError::Cancelled);
    }

    if let Some((WriterStatus::Failed, error)) = &state.writer {
        return Err(error
            .clone()
            .map_or(ExportError::WritingFailure, ExportError::Engine));
    }
    if let Some((ReaderStatus::Failed, error)) = &state.reader {
        return Err(error
            .clone()
            .map_or(ExportError::ReadingFailure, ExportError::Engine));
    }

    let reader_cancelled = matches!(state.reader, Some((ReaderStatus::Cancelled, _)));
    let writer_cancelled = matches!(state.writer, Some((WriterStatus::Cancelled, _)));
    let pump_failed = state.pumps.is_some_and(|p| p.any_failed());
    if pump_failed {
        return Err(ExportError::WritingFailure);
    }
    if reader_cancelled || writer_cancelled {
        return Err(ExportError::Cancelled);
    }

    match &state.writer {
        Some((status, _)) => Ok(ExportStatus::from(*status)),
        None => Err(ExportError::setup("no writer was created")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::TrackCompletion;

    fn engine_error() -> EngineError {
        EngineError::new("test", -1, "boom")
    }

    fn finished() -> FinalState {
        FinalState {
            reader: Some((ReaderStatus::Completed, None)),
            writer: Some((WriterStatus::Completed, None)),
            pumps: Some(JoinSummary {
                video: TrackCompletion::Drained,
                audio: TrackCompletion::Drained,
            }),
            ..FinalState::default()
        }
    }

    #[test]
    fn test_every_writer_status_maps() {
        assert_eq!(ExportStatus::from(WriterStatus::Unknown), ExportStatus::Unknown);
        assert_eq!(ExportStatus::from(WriterStatus::Writing), ExportStatus::Exporting);
        assert_eq!(ExportStatus::from(WriterStatus::Completed), ExportStatus::Completed);
        assert_eq!(ExportStatus::from(WriterStatus::Failed), ExportStatus::Failed);
        assert_eq!(ExportStatus::from(WriterStatus::Cancelled), ExportStatus::Cancelled);
    }

    #[test]
    fn test_completed_writer_resolves_ok() {
        assert_eq!(resolve(&finished()), Ok(ExportStatus::Completed));
    }

    #[test]
    fn test_explicit_cancel_wins() {
        let state = FinalState {
            cancel_requested: true,
            ..finished()
        };
        assert_eq!(resolve(&state), Err(ExportError::Cancelled));
    }

    #[test]
    fn test_writer_failure_beats_cancelled_reader() {
        let state = FinalState {
            reader: Some((ReaderStatus::Cancelled, None)),
            writer: Some((WriterStatus::Failed, Some(engine_error()))),
            ..finished()
        };
        assert_eq!(resolve(&state), Err(ExportError::Engine(engine_error())));
    }

    #[test]
    fn test_reader_failure_without_error_is_generic() {
        let state = FinalState {
            reader: Some((ReaderStatus::Failed, None)),
            writer: Some((WriterStatus::Cancelled, None)),
            ..finished()
        };
        assert_eq!(resolve(&state), Err(ExportError::ReadingFailure));
    }

    #[test]
    fn test_pump_failure_without_engine_failure_is_writing_failure() {
        let state = FinalState {
            reader: Some((ReaderStatus::Cancelled, None)),
            writer: Some((WriterStatus::Cancelled, None)),
            pumps: Some(JoinSummary {
                video: TrackCompletion::Failed,
                audio: TrackCompletion::Cancelled,
            }),
            ..FinalState::default()
        };
        assert_eq!(resolve(&state), Err(ExportError::WritingFailure));
    }

    #[test]
    fn test_missing_writer_is_setup_failure() {
        assert!(matches!(
            resolve(&FinalState::default()),
            Err(ExportError::SetupFailure { .. })
        ));
    }
}
