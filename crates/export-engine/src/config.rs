//! Export configuration.

use std::path::PathBuf;
use std::sync::Arc;

use kurbo::Size;
use serde::{Deserialize, Serialize};
use vexport_common::config::ExportDefaults;
use vexport_common::time::TimeRange;
use vexport_media_core::{
    keys, Asset, AudioMix, ContainerType, MetadataItem, Settings, VideoComposition,
};

use crate::error::{ExportError, ExportResult};

/// Everything an export needs, fixed when the session is created.
///
/// The source asset is not serialized; jobs read from JSON attach it with
/// [`ExportConfiguration::with_asset`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfiguration {
    /// Source asset.
    #[serde(skip)]
    pub asset: Option<Arc<dyn Asset>>,

    /// Replaces the computed orientation/letterbox composition.
    pub video_composition: Option<VideoComposition>,

    /// Attached to the audio reader output.
    pub audio_mix: Option<AudioMix>,

    /// Destination file.
    pub output_path: Option<PathBuf>,

    /// Destination container.
    pub container: Option<ContainerType>,

    /// Portion of the source to export. Unbounded by default.
    pub time_range: TimeRange,

    /// Hint the writer inputs that data arrives in real time.
    pub expects_real_time_data: bool,

    /// Lay out the container for progressive download.
    pub optimize_for_network_use: bool,

    /// Metadata written into the container.
    pub metadata: Vec<MetadataItem>,

    /// Decoded pixel format settings; also the pixel buffer pool attributes.
    pub video_input_settings: Option<Settings>,

    /// Video encoder settings. Must carry output width and height.
    pub video_output_settings: Option<Settings>,

    /// Audio encoder settings.
    pub audio_output_settings: Option<Settings>,
}

/// A configuration that passed validation.
#[derive(Debug, Clone)]
pub(crate) struct ValidatedExport {
    pub asset: Arc<dyn Asset>,
    pub output_path: PathBuf,
    pub container: ContainerType,
    pub target_size: Size,
    pub video_output_settings: Settings,
}

impl ExportConfiguration {
    pub fn new(asset: Arc<dyn Asset>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            asset: Some(asset),
            output_path: Some(output_path.into()),
            container: Some(ContainerType::Mp4),
            ..Self::default()
        }
    }

    /// Configuration with encoder settings taken from the application defaults.
    pub fn from_defaults(
        asset: Arc<dyn Asset>,
        output_path: impl Into<PathBuf>,
        defaults: &ExportDefaults,
    ) -> Self {
        let mut compression =
            Settings::new().with(keys::AVERAGE_BIT_RATE, defaults.video_bit_rate);
        if let Some(fps) = defaults.frame_rate {
            compression.insert(keys::AVERAGE_NON_DROPPABLE_FRAME_RATE, fps as f64);
        }
        let video = Settings::new()
            .with(keys::CODEC, defaults.video_codec.as_str())
            .with(keys::WIDTH, defaults.width)
            .with(keys::HEIGHT, defaults.height)
            .with_nested(keys::COMPRESSION_PROPERTIES, compression);
        let audio = Settings::new()
            .with(keys::CODEC, "aac")
            .with(keys::SAMPLE_RATE, defaults.audio_sample_rate)
            .with(keys::CHANNELS, defaults.audio_channels)
            .with(keys::BIT_RATE, defaults.audio_bit_rate);

        Self {
            container: ContainerType::parse(&defaults.container),
            optimize_for_network_use: defaults.optimize_for_network_use,
            video_output_settings: Some(video),
            audio_output_settings: Some(audio),
            ..Self::new(asset, output_path)
        }
    }

    pub fn with_asset(mut self, asset: Arc<dyn Asset>) -> Self {
        self.asset = Some(asset);
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = range;
        self
    }

    pub fn with_video_output_settings(mut self, settings: Settings) -> Self {
        self.video_output_settings = Some(settings);
        self
    }

    pub fn with_audio_output_settings(mut self, settings: Settings) -> Self {
        self.audio_output_settings = Some(settings);
        self
    }

    pub fn with_video_input_settings(mut self, settings: Settings) -> Self {
        self.video_input_settings = Some(settings);
        self
    }

    pub fn with_metadata(mut self, items: Vec<MetadataItem>) -> Self {
        self.metadata = items;
        self
    }

    /// Check required fields without touching any engine.
    pub(crate) fn validate(&self) -> ExportResult<ValidatedExport> {
        let asset = self
            .asset
            .clone()
            .ok_or_else(|| ExportError::setup("no source asset"))?;
        let output_path = self
            .output_path
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| ExportError::setup("no output path"))?;
        let container = self
            .container
            .ok_or_else(|| ExportError::setup("no output container type"))?;
        let video_output_settings = self
            .video_output_settings
            .clone()
            .ok_or_else(|| ExportError::setup("no video output settings"))?;
        let target_size = video_output_settings.dimensions().ok_or_else(|| {
            ExportError::setup("video output settings must specify width and height")
        })?;

        Ok(ValidatedExport {
            asset,
            output_path,
            container,
            target_size,
            video_output_settings,
        })
    }
}
