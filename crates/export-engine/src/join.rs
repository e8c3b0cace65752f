//! Join over the video and audio pumps.
//!
//! Both tracks must report before the session finishes. A track the source
//! does not have starts out drained. The first failure asks the caller to
//! stop the other track.

use vexport_media_core::MediaType;

/// How a track pump ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackCompletion {
    Drained,
    Failed,
    /// Stopped because the other track failed or the export was cancelled.
    Cancelled,
}

/// Final state of both tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinSummary {
    pub video: TrackCompletion,
    pub audio: TrackCompletion,
}

impl JoinSummary {
    pub fn any_failed(&self) -> bool {
        self.video == TrackCompletion::Failed || self.audio == TrackCompletion::Failed
    }

    pub fn all_drained(&self) -> bool {
        self.video == TrackCompletion::Drained && self.audio == TrackCompletion::Drained
    }
}

/// What the caller must do after a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStep {
    /// The other track is still running.
    Pending,
    /// Stop the given track and report it as cancelled.
    CancelCounterpart(MediaType),
    Joined(JoinSummary),
}

/// Two-slot completion join.
#[derive(Debug, Clone, Default)]
pub struct PumpJoin {
    video: Option<TrackCompletion>,
    audio: Option<TrackCompletion>,
}

impl PumpJoin {
    pub fn new(has_video: bool, has_audio: bool) -> Self {
        Self {
            video: (!has_video).then_some(TrackCompletion::Drained),
            audio: (!has_audio).then_some(TrackCompletion::Drained),
        }
    }

    /// Whether `media_type` has reported.
    pub fn is_done(&self, media_type: MediaType) -> bool {
        self.slot(media_type).is_some()
    }

    pub fn summary(&self) -> Option<JoinSummary> {
        Some(JoinSummary {
            video: self.video?,
            audio: self.audio?,
        })
    }

    /// Record how a track ended. Repeated reports for a track are ignored.
    pub fn report(&mut self, media_type: MediaType, completion: TrackCompletion) -> JoinStep {
        let slot = match media_type {
            MediaType::Video => &mut self.video,
            MediaType::Audio => &mut self.audio,
        };
        if slot.is_some() {
            return self.summary().map_or(JoinStep::Pending, JoinStep::Joined);
        }
        *slot = Some(completion);

        if let Some(summary) = self.summary() {
            return JoinStep::Joined(summary);
        }
        let counterpart = other(media_type);
        if completion == TrackCompletion::Failed && !self.is_done(counterpart) {
            JoinStep::CancelCounterpart(counterpart)
        } else {
            JoinStep::Pending
        }
    }

    fn slot(&self, media_type: MediaType) -> Option<TrackCompletion> {
        match media_type {
            MediaType::Video => self.video,
            MediaType::Audio => self.audio,
        }
    }
}

fn other(media_type: MediaType) -> MediaType {
    match media_type {
        MediaType::Video => MediaType::Audio,
        MediaType::Audio => MediaType::Video,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waits_for_both_tracks() {
        let mut join = PumpJoin::new(true, true);
        assert_eq!(join.report(MediaType::Audio, TrackCompletion::Drained), JoinStep::Pending);
        let step = join.report(MediaType::Video, TrackCompletion::Drained);
        assert!(matches!(step, JoinStep::Joined(summary) if summary.all_drained()));
    }

    #[test]
    fn test_absent_track_does_not_block() {
        let mut join = PumpJoin::new(true, false);
        assert!(join.is_done(MediaType::Audio));
        assert!(matches!(
            join.report(MediaType::Video, TrackCompletion::Drained),
            JoinStep::Joined(_)
        ));
    }

    #[test]
    fn test_failure_cancels_counterpart() {
        let mut join = PumpJoin::new(true, true);
        assert_eq!(
            join.report(MediaType::Video, TrackCompletion::Failed),
            JoinStep::CancelCounterpart(MediaType::Audio)
        );
        let step = join.report(MediaType::Audio, TrackCompletion::Cancelled);
        let JoinStep::Joined(summary) = step else {
            panic!("expected join, got {step:?}");
        };
        assert!(summary.any_failed());
        assert_eq!(summary.audio, TrackCompletion::Cancelled);
    }

    #[test]
    fn test_repeated_report_is_ignored() {
        let mut join = PumpJoin::new(true, true);
        join.report(MediaType::Video, TrackCompletion::Drained);
        assert_eq!(join.report(MediaType::Video, TrackCompletion::Failed), JoinStep::Pending);
        assert_eq!(join.summary(), None);
    }
}
