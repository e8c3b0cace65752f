//! Media engine traits.
//!
//! Implementations wrap a platform framework (or the synthetic engine used in
//! tests). Every handle is `Send + Sync` so the export worker can hold it
//! across await points.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use vexport_common::error::VexportResult;
use vexport_common::time::{MediaTime, TimeRange};

use crate::composition::{AudioMix, VideoComposition};
use crate::media::{ContainerType, MediaType, MetadataItem, PixelBuffer, Sample, TrackInfo};
use crate::settings::Settings;

/// Error reported by the engine for a reader or writer that has failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{domain} error {code}: {message}")]
pub struct EngineError {
    pub domain: String,
    pub code: i64,
    pub message: String,
}

impl EngineError {
    pub fn new(domain: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            code,
            message: message.into(),
        }
    }
}

/// Lifecycle of an [`AssetReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReaderStatus {
    #[default]
    Unknown,
    Reading,
    Completed,
    Failed,
    Cancelled,
}

/// Lifecycle of an [`AssetWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WriterStatus {
    #[default]
    Unknown,
    Writing,
    Completed,
    Failed,
    Cancelled,
}

/// A source media asset.
pub trait Asset: Send + Sync + fmt::Debug {
    /// Tracks of the given media type, in container order.
    fn tracks(&self, media_type: MediaType) -> Vec<TrackInfo>;

    /// Total duration of the asset.
    fn duration(&self) -> MediaTime;
}

/// What a reader output should deliver.
#[derive(Debug, Clone)]
pub struct ReaderOutputSpec {
    pub media_type: MediaType,
    /// Source tracks feeding this output.
    pub tracks: Vec<TrackInfo>,
    /// Decode settings; `None` delivers samples in their stored format.
    pub settings: Option<Settings>,
    /// Composition applied to video tracks.
    pub video_composition: Option<VideoComposition>,
    /// Mix applied to audio tracks.
    pub audio_mix: Option<AudioMix>,
    /// Whether the engine must copy sample data before vending it.
    pub always_copies_sample_data: bool,
}

/// Factory for readers and writers.
pub trait MediaEngine: Send + Sync {
    /// Engine name for logging.
    fn name(&self) -> &str;

    fn create_reader(&self, asset: Arc<dyn Asset>) -> VexportResult<Box<dyn AssetReader>>;

    fn create_writer(
        &self,
        path: &Path,
        container: ContainerType,
    ) -> VexportResult<Box<dyn AssetWriter>>;
}

/// Demultiplexes and decodes an asset.
pub trait AssetReader: Send + Sync {
    /// Restrict reading to a range of the source timeline.
    fn set_time_range(&mut self, range: TimeRange);

    /// Add an output. `Ok(None)` means the reader cannot vend this output.
    fn add_output(
        &mut self,
        spec: ReaderOutputSpec,
    ) -> VexportResult<Option<Box<dyn ReaderOutput>>>;

    /// Begin reading. Returns `false` and moves to `Failed` on error.
    fn start_reading(&mut self) -> bool;

    fn status(&self) -> ReaderStatus;

    fn error(&self) -> Option<EngineError>;

    fn cancel_reading(&mut self);
}

/// Decoded samples for one or more source tracks.
pub trait ReaderOutput: Send + Sync {
    fn media_type(&self) -> MediaType;

    /// Next sample in presentation order, `None` once exhausted or failed.
    fn copy_next_sample(&mut self) -> Option<Sample>;
}

/// Encodes and multiplexes samples into a destination container.
#[async_trait::async_trait]
pub trait AssetWriter: Send + Sync {
    /// Whether the writer accepts `settings` for an input of `media_type`.
    fn can_apply_output_settings(&self, settings: &Settings, media_type: MediaType) -> bool;

    /// Add an input. `Ok(None)` means the writer cannot accept it.
    fn add_input(
        &mut self,
        media_type: MediaType,
        settings: Option<Settings>,
    ) -> VexportResult<Option<Box<dyn WriterInput>>>;

    fn set_metadata(&mut self, items: Vec<MetadataItem>);

    fn set_should_optimize_for_network_use(&mut self, optimize: bool);

    /// Begin writing. Returns `false` and moves to `Failed` on error.
    fn start_writing(&mut self) -> bool;

    /// Anchor the output timeline at a source time.
    fn start_session(&mut self, at: MediaTime);

    /// Flush and close the container. Resolves once the writer has reached a
    /// terminal status; the outcome is read back through [`AssetWriter::status`].
    async fn finish_writing(&mut self);

    fn status(&self) -> WriterStatus;

    fn error(&self) -> Option<EngineError>;

    fn cancel_writing(&mut self);
}

/// One destination track of an [`AssetWriter`].
#[async_trait::async_trait]
pub trait WriterInput: Send + Sync {
    fn media_type(&self) -> MediaType;

    /// Backpressure flag: append only while this is `true`.
    fn is_ready_for_more_data(&self) -> bool;

    /// Resolves once [`WriterInput::is_ready_for_more_data`] is `true`.
    async fn ready_for_more_data(&self);

    /// Append a sample. `false` means the writer has failed.
    fn append(&mut self, sample: Sample) -> bool;

    /// No more samples will be appended.
    fn mark_as_finished(&mut self);

    fn set_expects_real_time_data(&mut self, expects: bool);

    /// Adaptor for appending caller-rendered pixel buffers to this input.
    fn pixel_buffer_adaptor(
        &self,
        attributes: Option<&Settings>,
    ) -> Option<Box<dyn PixelBufferAdaptor>>;
}

/// Appends raw pixel buffers to a video [`WriterInput`].
pub trait PixelBufferAdaptor: Send + Sync {
    /// Take a fresh buffer from the adaptor's pool.
    fn create_pixel_buffer(&mut self) -> Option<PixelBuffer>;

    /// Append a buffer at a presentation time. `false` means the writer has failed.
    fn append(&mut self, buffer: PixelBuffer, presentation_time: MediaTime) -> bool;
}
