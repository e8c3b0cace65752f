//! Video composition and audio mix descriptions handed to reader outputs.

use kurbo::{Affine, Size};
use serde::{Deserialize, Serialize};
use vexport_common::time::{MediaTime, TimeRange};

use crate::media::TrackId;

/// How the engine renders source video frames before they reach the pump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoComposition {
    /// Size of the composed frame.
    pub render_size: Size,
    /// Duration of one output frame (`1 / fps`).
    pub frame_duration: MediaTime,
    pub instructions: Vec<CompositionInstruction>,
}

/// A set of layer instructions active during `time_range`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionInstruction {
    pub time_range: TimeRange,
    pub layer_instructions: Vec<LayerInstruction>,
}

/// Transform applied to one source track from `at` onwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerInstruction {
    pub track_id: TrackId,
    pub transform: Affine,
    pub at: MediaTime,
}

/// Per-track audio mixing parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioMix {
    pub input_parameters: Vec<AudioMixInputParameters>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioMixInputParameters {
    pub track_id: TrackId,
    /// Linear gain, `1.0` is unity.
    pub volume: f32,
}

impl AudioMix {
    /// Gain for a track, unity when the mix does not mention it.
    pub fn volume_for(&self, track_id: TrackId) -> f32 {
        self.input_parameters
            .iter()
            .find(|p| p.track_id == track_id)
            .map_or(1.0, |p| p.volume)
    }
}

impl VideoComposition {
    /// Transform of the first layer instruction for `track_id`, if any.
    pub fn transform_for(&self, track_id: TrackId) -> Option<Affine> {
        self.instructions
            .iter()
            .flat_map(|i| i.layer_instructions.iter())
            .find(|l| l.track_id == track_id)
            .map(|l| l.transform)
    }
}
