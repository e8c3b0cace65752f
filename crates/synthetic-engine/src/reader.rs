//! Synthetic reader: vends evenly spaced samples for each requested output.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use vexport_common::error::VexportResult;
use vexport_common::time::{MediaTime, TimeRange};
use vexport_media_core::{
    keys, Asset, AssetReader, EngineError, MediaType, PixelBuffer, PixelFormat, ReaderOutput,
    ReaderOutputSpec, ReaderStatus, Sample,
};

use crate::engine::SyntheticEngineConfig;

const ERROR_DOMAIN: &str = "synthetic.reader";
const DEFAULT_FRAME_RATE: f64 = 30.0;

#[derive(Debug)]
struct ReaderShared {
    status: ReaderStatus,
    error: Option<EngineError>,
    range: TimeRange,
    active_outputs: usize,
}

type SharedReader = Arc<Mutex<ReaderShared>>;

fn lock(shared: &SharedReader) -> MutexGuard<'_, ReaderShared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reader over any [`Asset`], generating samples from its track descriptions.
pub struct SyntheticReader {
    asset: Arc<dyn Asset>,
    config: SyntheticEngineConfig,
    shared: SharedReader,
    outputs: usize,
}

impl SyntheticReader {
    pub fn new(asset: Arc<dyn Asset>, config: SyntheticEngineConfig) -> Self {
        Self {
            asset,
            config,
            shared: Arc::new(Mutex::new(ReaderShared {
                status: ReaderStatus::Unknown,
                error: None,
                range: TimeRange::ALL,
                active_outputs: 0,
            })),
            outputs: 0,
        }
    }

    fn sample_duration(&self, spec: &ReaderOutputSpec) -> MediaTime {
        match spec.media_type {
            MediaType::Video => {
                if let Some(composition) = &spec.video_composition {
                    if composition.frame_duration.is_numeric()
                        && composition.frame_duration.value > 0
                    {
                        return composition.frame_duration;
                    }
                }
                let rate = spec
                    .tracks
                    .first()
                    .map(|t| t.nominal_frame_rate as f64)
                    .filter(|r| *r > 0.0)
                    .unwrap_or(DEFAULT_FRAME_RATE);
                MediaTime::new(1000, (rate * 1000.0).round() as i32)
            }
            MediaType::Audio => MediaTime::new(
                self.config.audio_packet_frames,
                self.config.audio_sample_rate,
            ),
        }
    }
}

impl AssetReader for SyntheticReader {
    fn set_time_range(&mut self, range: TimeRange) {
        lock(&self.shared).range = range;
    }

    fn add_output(
        &mut self,
        spec: ReaderOutputSpec,
    ) -> VexportResult<Option<Box<dyn ReaderOutput>>> {
        if lock(&self.shared).status != ReaderStatus::Unknown || spec.tracks.is_empty() {
            return Ok(None);
        }
        if spec
            .tracks
            .iter()
            .any(|track| track.media_type != spec.media_type)
        {
            return Ok(None);
        }

        let pixel_format = spec
            .settings
            .as_ref()
            .and_then(|s| s.get_str(keys::PIXEL_FORMAT))
            .and_then(PixelFormat::parse)
            .unwrap_or_default();
        let volume = spec
            .audio_mix
            .as_ref()
            .map_or(1.0, |mix| mix.volume_for(spec.tracks[0].track_id));
        let fail_after = match self.config.reader_faults.fail_after_samples {
            Some((media_type, count)) if media_type == spec.media_type => Some(count),
            _ => None,
        };

        self.outputs += 1;
        Ok(Some(Box::new(SyntheticReaderOutput {
            media_type: spec.media_type,
            shared: self.shared.clone(),
            sample_duration: self.sample_duration(&spec),
            frame_size: self.config.frame_size,
            pixel_format,
            volume,
            fail_after,
            vended: 0,
            finished: false,
        })))
    }

    fn start_reading(&mut self) -> bool {
        let mut shared = lock(&self.shared);
        if shared.status != ReaderStatus::Unknown {
            return false;
        }
        if self.config.reader_faults.fail_on_start {
            shared.status = ReaderStatus::Failed;
            shared.error = Some(EngineError::new(ERROR_DOMAIN, -11800, "cannot open source"));
            return false;
        }
        shared.range = shared.range.clamped_to(self.asset.duration());
        shared.active_outputs = self.outputs;
        shared.status = if self.outputs == 0 {
            ReaderStatus::Completed
        } else {
            ReaderStatus::Reading
        };
        tracing::debug!(outputs = self.outputs, "Synthetic reader started");
        true
    }

    fn status(&self) -> ReaderStatus {
        lock(&self.shared).status
    }

    fn error(&self) -> Option<EngineError> {
        lock(&self.shared).error.clone()
    }

    fn cancel_reading(&mut self) {
        let mut shared = lock(&self.shared);
        if shared.status == ReaderStatus::Reading {
            shared.status = ReaderStatus::Cancelled;
        }
    }
}

/// One output of a [`SyntheticReader`].
pub struct SyntheticReaderOutput {
    media_type: MediaType,
    shared: SharedReader,
    sample_duration: MediaTime,
    frame_size: (u32, u32),
    pixel_format: PixelFormat,
    volume: f32,
    fail_after: Option<usize>,
    vended: usize,
    finished: bool,
}

impl SyntheticReaderOutput {
    fn retire(&mut self, shared: &mut ReaderShared) {
        self.finished = true;
        shared.active_outputs = shared.active_outputs.saturating_sub(1);
        if shared.active_outputs == 0 && shared.status == ReaderStatus::Reading {
            shared.status = ReaderStatus::Completed;
        }
    }

    fn make_sample(&self, presentation_time: MediaTime) -> Sample {
        match self.media_type {
            MediaType::Video => {
                let (width, height) = self.frame_size;
                let mut image = PixelBuffer::new(width, height, self.pixel_format);
                image.fill((self.vended % 256) as u8);
                Sample::video(presentation_time, self.sample_duration, image)
            }
            MediaType::Audio => {
                let frames = self.sample_duration.value.max(0) as usize;
                let amplitude = (self.volume.clamp(0.0, 1.0) * 8192.0) as i16;
                let data = std::iter::repeat(amplitude.to_le_bytes())
                    .take(frames * 2)
                    .flatten()
                    .collect();
                Sample::audio(presentation_time, self.sample_duration, data)
            }
        }
    }
}

impl ReaderOutput for SyntheticReaderOutput {
    fn media_type(&self) -> MediaType {
        self.media_type
    }

    fn copy_next_sample(&mut self) -> Option<Sample> {
        let shared = self.shared.clone();
        let mut shared = lock(&shared);
        if self.finished || shared.status != ReaderStatus::Reading {
            return None;
        }

        if self.fail_after.is_some_and(|limit| self.vended >= limit) {
            shared.status = ReaderStatus::Failed;
            shared.error = Some(EngineError::new(
                ERROR_DOMAIN,
                -11829,
                format!("{} stream became undecodable", self.media_type),
            ));
            self.finished = true;
            return None;
        }

        let offset = MediaTime::new(
            self.sample_duration.value * self.vended as i64,
            self.sample_duration.timescale,
        );
        let presentation_time = shared.range.start + offset;
        if !shared.range.contains(presentation_time) {
            self.retire(&mut shared);
            return None;
        }

        let sample = self.make_sample(presentation_time);
        self.vended += 1;
        Some(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{Rotation, SyntheticAsset};
    use kurbo::Size;

    fn spec_for(asset: &SyntheticAsset, media_type: MediaType) -> ReaderOutputSpec {
        ReaderOutputSpec {
            media_type,
            tracks: asset.tracks(media_type),
            settings: None,
            video_composition: None,
            audio_mix: None,
            always_copies_sample_data: false,
        }
    }

    #[test]
    fn test_video_output_covers_range_then_completes() {
        let asset = SyntheticAsset::new(MediaTime::new(1, 1)).with_video_track(
            Size::new(320.0, 240.0),
            10.0,
            Rotation::None,
        );
        let mut reader =
            SyntheticReader::new(Arc::new(asset.clone()), SyntheticEngineConfig::default());
        let mut output = reader
            .add_output(spec_for(&asset, MediaType::Video))
            .unwrap()
            .unwrap();
        assert!(reader.start_reading());

        let mut times = Vec::new();
        while let Some(sample) = output.copy_next_sample() {
            times.push(sample.presentation_time);
        }
        assert_eq!(times.len(), 10);
        assert!(times.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(reader.status(), ReaderStatus::Completed);
    }

    #[test]
    fn test_time_range_offsets_first_sample() {
        let asset = SyntheticAsset::new(MediaTime::new(4, 1)).with_audio_track();
        let mut reader =
            SyntheticReader::new(Arc::new(asset.clone()), SyntheticEngineConfig::default());
        reader.set_time_range(TimeRange::new(MediaTime::new(2, 1), MediaTime::new(1, 1)));
        let mut output = reader
            .add_output(spec_for(&asset, MediaType::Audio))
            .unwrap()
            .unwrap();
        assert!(reader.start_reading());

        let first = output.copy_next_sample().unwrap();
        assert_eq!(first.presentation_time.seconds(), 2.0);
    }

    #[test]
    fn test_fault_fails_reader_with_error() {
        let asset = SyntheticAsset::new(MediaTime::new(1, 1)).with_audio_track();
        let mut config = SyntheticEngineConfig::default();
        config.reader_faults.fail_after_samples = Some((MediaType::Audio, 2));
        let mut reader = SyntheticReader::new(Arc::new(asset.clone()), config);
        let mut output = reader
            .add_output(spec_for(&asset, MediaType::Audio))
            .unwrap()
            .unwrap();
        assert!(reader.start_reading());

        assert!(output.copy_next_sample().is_some());
        assert!(output.copy_next_sample().is_some());
        assert!(output.copy_next_sample().is_none());
        assert_eq!(reader.status(), ReaderStatus::Failed);
        assert!(reader.error().is_some());
    }

    #[test]
    fn test_cancelled_reader_stops_vending() {
        let asset = SyntheticAsset::new(MediaTime::new(1, 1)).with_audio_track();
        let mut reader =
            SyntheticReader::new(Arc::new(asset.clone()), SyntheticEngineConfig::default());
        let mut output = reader
            .add_output(spec_for(&asset, MediaType::Audio))
            .unwrap()
            .unwrap();
        assert!(reader.start_reading());
        reader.cancel_reading();
        assert!(output.copy_next_sample().is_none());
        assert_eq!(reader.status(), ReaderStatus::Cancelled);
    }
}
