//! Orientation and letterbox transform for the video composition.
//!
//! Coordinates follow the engine convention: `x' = a*x + c*y + e`,
//! `y' = b*x + d*y + f` with kurbo coefficients `[a, b, c, d, e, f]`.
//! The composition renders into `render_size`; the encoder then scales the
//! rendered frame to the target output size.

use kurbo::{Affine, Point, Rect, Size};
use serde::{Deserialize, Serialize};
use vexport_common::time::{MediaTime, TimeRange};
use vexport_media_core::{
    CompositionInstruction, LayerInstruction, Settings, TrackInfo, VideoComposition,
};

use crate::error::{ExportError, ExportResult};

/// Frame rate used when neither the caller nor the source names one.
pub const DEFAULT_FRAME_RATE: f64 = 30.0;

/// Angular slack, in degrees, for recognising a quarter turn.
const QUARTER_TURN_TOLERANCE_DEGREES: f64 = 1e-3;

/// Encode frame rate: caller-requested, else the track's nominal rate, else 30.
pub fn nominal_frame_rate(video_output_settings: &Settings, track: &TrackInfo) -> f64 {
    video_output_settings
        .requested_frame_rate()
        .or_else(|| {
            let rate = track.nominal_frame_rate as f64;
            (rate.is_finite() && rate > 0.0).then_some(rate)
        })
        .unwrap_or(DEFAULT_FRAME_RATE)
}

/// Duration of one frame at `fps`, at millisecond-of-frame precision.
pub fn frame_duration(fps: f64) -> MediaTime {
    MediaTime::new(1000, (fps * 1000.0).round() as i32)
}

/// Signed rotation encoded in a transform, in degrees.
pub fn rotation_degrees(transform: &Affine) -> f64 {
    let [a, b, ..] = transform.as_coeffs();
    b.atan2(a).to_degrees()
}

/// Whether `degrees` is a rotation by +90 or -90.
pub fn is_quarter_turn(degrees: f64) -> bool {
    (degrees.abs() - 90.0).abs() < QUARTER_TURN_TOLERANCE_DEGREES
}

/// Render size and layer transform for one source video track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderGeometry {
    /// Composition render size: the natural size, swapped for quarter turns.
    pub render_size: Size,

    /// Requested output size.
    pub target_size: Size,

    /// Source pixels to render-size pixels.
    pub transform: Affine,

    /// Rotation found in the preferred transform.
    pub rotation_degrees: f64,
}

impl RenderGeometry {
    /// Orient `track` and fit it, centred, inside `target_size`.
    pub fn compute(track: &TrackInfo, target_size: Size) -> ExportResult<Self> {
        let natural = track.natural_size;
        if !(natural.width > 0.0 && natural.height > 0.0) {
            return Err(ExportError::setup(format!(
                "video track {} has no natural size",
                track.track_id
            )));
        }
        if !(target_size.width > 0.0 && target_size.height > 0.0) {
            return Err(ExportError::setup("target size must be positive"));
        }

        // Some decoders leave the rotated rectangle off the origin.
        let preferred = track.preferred_transform;
        let moved = preferred.transform_rect_bbox(Rect::from_origin_size(Point::ORIGIN, natural));
        let corrected = Affine::translate((-moved.x0, -moved.y0)) * preferred;

        let rotation = rotation_degrees(&preferred);
        let natural = if is_quarter_turn(rotation) {
            Size::new(natural.height, natural.width)
        } else {
            natural
        };

        let x_ratio = target_size.width / natural.width;
        let y_ratio = target_size.height / natural.height;
        let ratio = x_ratio.min(y_ratio);
        let trans_x = (target_size.width - natural.width * ratio) * 0.5;
        let trans_y = (target_size.height - natural.height * ratio) * 0.5;

        let letterbox = Affine::translate((trans_x / x_ratio, trans_y / y_ratio))
            * Affine::scale_non_uniform(ratio / x_ratio, ratio / y_ratio);

        Ok(Self {
            render_size: natural,
            target_size,
            transform: letterbox * corrected,
            rotation_degrees: rotation,
        })
    }

    /// Source pixels straight to target pixels: the layer transform followed
    /// by the encoder's render-size to target-size scale.
    pub fn output_transform(&self) -> Affine {
        Affine::scale_non_uniform(
            self.target_size.width / self.render_size.width,
            self.target_size.height / self.render_size.height,
        ) * self.transform
    }

    /// Region of the target frame covered by source content.
    pub fn content_rect(&self, natural_size: Size) -> Rect {
        self.output_transform()
            .transform_rect_bbox(Rect::from_origin_size(Point::ORIGIN, natural_size))
    }
}

/// Composition computed for a source video track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionPlan {
    pub geometry: RenderGeometry,
    pub frame_rate: f64,
    pub composition: VideoComposition,
}

/// Build the single-instruction composition that orients and letterboxes
/// `track` for the whole of `asset_duration`.
pub fn build_video_composition(
    track: &TrackInfo,
    asset_duration: MediaTime,
    video_output_settings: &Settings,
    target_size: Size,
) -> ExportResult<CompositionPlan> {
    let geometry = RenderGeometry::compute(track, target_size)?;
    let frame_rate = nominal_frame_rate(video_output_settings, track);

    let composition = VideoComposition {
        render_size: geometry.render_size,
        frame_duration: frame_duration(frame_rate),
        instructions: vec![CompositionInstruction {
            time_range: TimeRange::new(MediaTime::ZERO, asset_duration),
            layer_instructions: vec![LayerInstruction {
                track_id: track.track_id,
                transform: geometry.transform,
                at: MediaTime::ZERO,
            }],
        }],
    };

    Ok(CompositionPlan {
        geometry,
        frame_rate,
        composition,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use vexport_media_core::keys;

    const EPS: f64 = 1e-6;

    fn track(natural: Size, preferred: Affine) -> TrackInfo {
        let mut info = TrackInfo::video(1, natural);
        info.preferred_transform = preferred;
        info
    }

    fn quarter_turn(natural: Size) -> Affine {
        Affine::new([0.0, 1.0, -1.0, 0.0, natural.height, 0.0])
    }

    fn corners(size: Size) -> [Point; 4] {
        [
            Point::new(0.0, 0.0),
            Point::new(size.width, 0.0),
            Point::new(0.0, size.height),
            Point::new(size.width, size.height),
        ]
    }

    fn assert_inside(point: Point, target: Size) {
        assert!(
            point.x >= -EPS && point.x <= target.width + EPS,
            "x out of bounds: {point:?} in {target:?}"
        );
        assert!(
            point.y >= -EPS && point.y <= target.height + EPS,
            "y out of bounds: {point:?} in {target:?}"
        );
    }

    #[test]
    fn test_portrait_rotated_source_fills_landscape_target() {
        let natural = Size::new(1080.0, 1920.0);
        let target = Size::new(1920.0, 1080.0);
        let geometry = RenderGeometry::compute(&track(natural, quarter_turn(natural)), target).unwrap();

        assert_eq!(geometry.render_size, Size::new(1920.0, 1080.0));
        assert!((geometry.rotation_degrees - 90.0).abs() < EPS);
        for corner in corners(natural) {
            assert_inside(geometry.output_transform() * corner, target);
        }
        let content = geometry.content_rect(natural);
        assert!((content.width() - 1920.0).abs() < EPS);
        assert!((content.height() - 1080.0).abs() < EPS);
    }

    #[test]
    fn test_unrotated_source_is_pillarboxed() {
        let natural = Size::new(640.0, 480.0);
        let target = Size::new(1920.0, 1080.0);
        let geometry = RenderGeometry::compute(&track(natural, Affine::IDENTITY), target).unwrap();

        assert_eq!(geometry.render_size, natural);
        let content = geometry.content_rect(natural);
        // 4:3 inside 16:9: full height, 1440 wide, centred.
        assert!((content.height() - 1080.0).abs() < EPS);
        assert!((content.width() - 1440.0).abs() < EPS);
        assert!((content.x0 - 240.0).abs() < EPS);
        assert!(content.y0.abs() < EPS);
    }

    #[test]
    fn test_corrective_translation_rezeroes_origin() {
        // Quarter turn without the usual translation leaves the frame at negative x.
        let natural = Size::new(1280.0, 720.0);
        let bare = Affine::new([0.0, 1.0, -1.0, 0.0, 0.0, 0.0]);
        let target = Size::new(720.0, 1280.0);
        let geometry = RenderGeometry::compute(&track(natural, bare), target).unwrap();
        for corner in corners(natural) {
            assert_inside(geometry.output_transform() * corner, target);
        }
    }

    #[test]
    fn test_half_turn_keeps_render_size() {
        let natural = Size::new(1280.0, 720.0);
        let half = Affine::new([-1.0, 0.0, 0.0, -1.0, 1280.0, 720.0]);
        let geometry =
            RenderGeometry::compute(&track(natural, half), Size::new(1280.0, 720.0)).unwrap();
        assert_eq!(geometry.render_size, natural);
        assert!(!is_quarter_turn(geometry.rotation_degrees));
    }

    #[test]
    fn test_near_quarter_turn_is_recognised() {
        assert!(is_quarter_turn(90.0));
        assert!(is_quarter_turn(-90.0));
        assert!(is_quarter_turn(89.999_999_9));
        assert!(!is_quarter_turn(45.0));
        assert!(!is_quarter_turn(180.0));
    }

    #[test]
    fn test_empty_natural_size_is_setup_failure() {
        let result = RenderGeometry::compute(
            &track(Size::ZERO, Affine::IDENTITY),
            Size::new(1920.0, 1080.0),
        );
        assert!(matches!(result, Err(ExportError::SetupFailure { .. })));
    }

    #[test]
    fn test_frame_rate_preference_order() {
        let mut info = track(Size::new(640.0, 480.0), Affine::IDENTITY);
        info.nominal_frame_rate = 25.0;

        let explicit = Settings::new().with_nested(
            keys::COMPRESSION_PROPERTIES,
            Settings::new().with(keys::AVERAGE_NON_DROPPABLE_FRAME_RATE, 60.0),
        );
        assert_eq!(nominal_frame_rate(&explicit, &info), 60.0);
        assert_eq!(nominal_frame_rate(&Settings::new(), &info), 25.0);

        info.nominal_frame_rate = 0.0;
        assert_eq!(nominal_frame_rate(&Settings::new(), &info), DEFAULT_FRAME_RATE);
    }

    #[test]
    fn test_composition_spans_asset_duration() {
        let natural = Size::new(1920.0, 1080.0);
        let duration = MediaTime::new(10, 1);
        let settings = Settings::new().with(keys::FRAME_RATE, 24.0);
        let plan = build_video_composition(
            &track(natural, Affine::IDENTITY),
            duration,
            &settings,
            Size::new(1280.0, 720.0),
        )
        .unwrap();

        assert_eq!(plan.frame_rate, 24.0);
        assert_eq!(plan.composition.frame_duration, MediaTime::new(1000, 24000));
        assert_eq!(plan.composition.instructions.len(), 1);
        let instruction = &plan.composition.instructions[0];
        assert_eq!(instruction.time_range.duration, duration);
        assert_eq!(instruction.layer_instructions[0].at, MediaTime::ZERO);
        assert_eq!(plan.composition.transform_for(1), Some(plan.geometry.transform));
    }

    proptest! {
        #[test]
        fn prop_corners_stay_inside_target(
            width in 16u32..4096,
            height in 16u32..4096,
            target_width in 16u32..4096,
            target_height in 16u32..4096,
            quarter in 0usize..4,
        ) {
            let natural = Size::new(width as f64, height as f64);
            let preferred = match quarter {
                0 => Affine::IDENTITY,
                1 => quarter_turn(natural),
                2 => Affine::new([-1.0, 0.0, 0.0, -1.0, natural.width, natural.height]),
                _ => Affine::new([0.0, -1.0, 1.0, 0.0, 0.0, natural.width]),
            };
            let target = Size::new(target_width as f64, target_height as f64);
            let geometry = RenderGeometry::compute(&track(natural, preferred), target).unwrap();
            let map = geometry.output_transform();
            for corner in corners(natural) {
                let p = map * corner;
                let slack = 1e-6 * target.width.max(target.height);
                prop_assert!(p.x >= -slack && p.x <= target.width + slack);
                prop_assert!(p.y >= -slack && p.y <= target.height + slack);
            }
        }
    }
}
