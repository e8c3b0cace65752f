//! Generated source assets.

use kurbo::{Affine, Size};
use serde::{Deserialize, Serialize};
use vexport_common::time::MediaTime;
use vexport_media_core::{Asset, MediaType, TrackInfo};

/// Orientation a camera recorded into a track's preferred transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    #[default]
    None,
    Clockwise90,
    Rotate180,
    Clockwise270,
}

impl Rotation {
    /// Parse a clockwise angle in degrees (0, 90, 180, 270; negatives wrap).
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Clockwise90),
            180 => Some(Rotation::Rotate180),
            270 => Some(Rotation::Clockwise270),
            _ => None,
        }
    }

    /// Preferred transform a recorder would store for a frame of `natural_size`.
    ///
    /// The translation keeps the rotated frame in the positive quadrant.
    pub fn preferred_transform(&self, natural_size: Size) -> Affine {
        let Size { width, height } = natural_size;
        match self {
            Rotation::None => Affine::IDENTITY,
            Rotation::Clockwise90 => Affine::new([0.0, 1.0, -1.0, 0.0, height, 0.0]),
            Rotation::Rotate180 => Affine::new([-1.0, 0.0, 0.0, -1.0, width, height]),
            Rotation::Clockwise270 => Affine::new([0.0, -1.0, 1.0, 0.0, 0.0, width]),
        }
    }
}

/// An in-memory asset described only by its tracks and duration.
#[derive(Debug, Clone)]
pub struct SyntheticAsset {
    duration: MediaTime,
    tracks: Vec<TrackInfo>,
}

impl SyntheticAsset {
    pub fn new(duration: MediaTime) -> Self {
        Self {
            duration,
            tracks: Vec::new(),
        }
    }

    /// Add a video track recorded at `frame_rate` with the given orientation.
    pub fn with_video_track(self, natural_size: Size, frame_rate: f32, rotation: Rotation) -> Self {
        let mut info = TrackInfo::video(0, natural_size);
        info.nominal_frame_rate = frame_rate;
        info.preferred_transform = rotation.preferred_transform(natural_size);
        self.with_track(info)
    }

    pub fn with_audio_track(self) -> Self {
        self.with_track(TrackInfo::audio(0))
    }

    /// Add a track as-is; its id is reassigned to stay unique.
    pub fn with_track(mut self, mut info: TrackInfo) -> Self {
        info.track_id = self.tracks.len() as u32 + 1;
        self.tracks.push(info);
        self
    }
}

impl Asset for SyntheticAsset {
    fn tracks(&self, media_type: MediaType) -> Vec<TrackInfo> {
        self.tracks
            .iter()
            .filter(|t| t.media_type == media_type)
            .cloned()
            .collect()
    }

    fn duration(&self) -> MediaTime {
        self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::{Point, Rect};

    #[test]
    fn test_track_ids_are_unique_and_filtered() {
        let asset = SyntheticAsset::new(MediaTime::new(2, 1))
            .with_video_track(Size::new(640.0, 480.0), 30.0, Rotation::None)
            .with_audio_track();
        let video = asset.tracks(MediaType::Video);
        let audio = asset.tracks(MediaType::Audio);
        assert_eq!(video.len(), 1);
        assert_eq!(audio.len(), 1);
        assert_ne!(video[0].track_id, audio[0].track_id);
    }

    #[test]
    fn test_preferred_transforms_keep_origin_at_zero() {
        let natural = Size::new(1920.0, 1080.0);
        for rotation in [
            Rotation::None,
            Rotation::Clockwise90,
            Rotation::Rotate180,
            Rotation::Clockwise270,
        ] {
            let rect = Rect::from_origin_size(Point::ORIGIN, natural);
            let mapped = rotation.preferred_transform(natural).transform_rect_bbox(rect);
            assert!(mapped.x0.abs() < 1e-9, "{rotation:?}");
            assert!(mapped.y0.abs() < 1e-9, "{rotation:?}");
        }
    }

    #[test]
    fn test_rotation_from_degrees_wraps() {
        assert_eq!(Rotation::from_degrees(-90), Some(Rotation::Clockwise270));
        assert_eq!(Rotation::from_degrees(450), Some(Rotation::Clockwise90));
        assert_eq!(Rotation::from_degrees(45), None);
    }
}
