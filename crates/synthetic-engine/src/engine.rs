//! Synthetic engine entry point and fault configuration.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use vexport_common::error::{VexportError, VexportResult};
use vexport_media_core::{Asset, AssetReader, AssetWriter, ContainerType, MediaEngine, MediaType};

use crate::reader::SyntheticReader;
use crate::writer::SyntheticWriter;

/// How writer inputs pace the pump.
#[derive(Debug, Clone, Default)]
pub struct Backpressure {
    /// Appends accepted before an input reports not-ready. `0` never throttles.
    pub burst: usize,
    /// How long a throttled input stays not-ready. `None` yields once.
    pub delay: Option<Duration>,
}

/// Failures injected into readers.
#[derive(Debug, Clone, Default)]
pub struct ReaderFaults {
    pub fail_on_start: bool,
    /// Fail the reader after this many samples of the given type were vended.
    pub fail_after_samples: Option<(MediaType, usize)>,
}

/// Failures injected into writers.
#[derive(Debug, Clone, Default)]
pub struct WriterFaults {
    /// `create_writer` returns an error.
    pub refuse_creation: bool,
    pub fail_on_start: bool,
    /// Fail the writer on the append after this many samples of the given type.
    pub fail_append_after: Option<(MediaType, usize)>,
    /// Pixel buffer pools never hand out buffers.
    pub exhaust_pixel_buffer_pool: bool,
    /// `can_apply_output_settings` rejects every video settings map.
    pub reject_video_settings: bool,
}

/// Synthetic engine configuration.
#[derive(Debug, Clone)]
pub struct SyntheticEngineConfig {
    /// Size of generated video frames. Kept small: frames are proxies and
    /// only their timing matters.
    pub frame_size: (u32, u32),
    /// Audio sample rate of generated audio tracks.
    pub audio_sample_rate: i32,
    /// Frames per generated audio packet.
    pub audio_packet_frames: i64,
    pub backpressure: Backpressure,
    pub reader_faults: ReaderFaults,
    pub writer_faults: WriterFaults,
}

impl Default for SyntheticEngineConfig {
    fn default() -> Self {
        Self {
            frame_size: (16, 9),
            audio_sample_rate: 44_100,
            audio_packet_frames: 1024,
            backpressure: Backpressure::default(),
            reader_faults: ReaderFaults::default(),
            writer_faults: WriterFaults::default(),
        }
    }
}

/// Media engine that generates sources and writes JSON-lines containers.
#[derive(Debug, Clone, Default)]
pub struct SyntheticEngine {
    config: SyntheticEngineConfig,
}

impl SyntheticEngine {
    pub fn new(config: SyntheticEngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SyntheticEngineConfig {
        &self.config
    }
}

impl MediaEngine for SyntheticEngine {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn create_reader(&self, asset: Arc<dyn Asset>) -> VexportResult<Box<dyn AssetReader>> {
        Ok(Box::new(SyntheticReader::new(asset, self.config.clone())))
    }

    fn create_writer(
        &self,
        path: &Path,
        container: ContainerType,
    ) -> VexportResult<Box<dyn AssetWriter>> {
        if self.config.writer_faults.refuse_creation {
            return Err(VexportError::engine(format!(
                "Cannot create writer for {}",
                path.display()
            )));
        }
        Ok(Box::new(SyntheticWriter::new(
            path.to_path_buf(),
            container,
            self.config.clone(),
        )))
    }
}
