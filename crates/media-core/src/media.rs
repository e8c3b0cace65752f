//! Tracks, samples, and pixel buffers.

use std::fmt;

use kurbo::{Affine, Size};
use serde::{Deserialize, Serialize};
use vexport_common::time::MediaTime;

/// Kind of elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Video,
    Audio,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Video => f.write_str("video"),
            MediaType::Audio => f.write_str("audio"),
        }
    }
}

/// Destination container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerType {
    Mp4,
    Mov,
    M4v,
    M4a,
}

impl ContainerType {
    /// Conventional file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerType::Mp4 => "mp4",
            ContainerType::Mov => "mov",
            ContainerType::M4v => "m4v",
            ContainerType::M4a => "m4a",
        }
    }

    /// Parse a container name or extension (case-insensitive).
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "mp4" => Some(ContainerType::Mp4),
            "mov" | "quicktime" => Some(ContainerType::Mov),
            "m4v" => Some(ContainerType::M4v),
            "m4a" => Some(ContainerType::M4a),
            _ => None,
        }
    }
}

/// Identifier of a track within an asset.
pub type TrackId = u32;

/// Description of one source track, as reported by the asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub track_id: TrackId,
    pub media_type: MediaType,
    /// Encoded frame size before the preferred transform is applied.
    pub natural_size: Size,
    /// Display orientation transform recorded in the container.
    pub preferred_transform: Affine,
    /// Frames per second as reported by the container; `0.0` when unknown.
    pub nominal_frame_rate: f32,
}

impl TrackInfo {
    pub fn video(track_id: TrackId, natural_size: Size) -> Self {
        Self {
            track_id,
            media_type: MediaType::Video,
            natural_size,
            preferred_transform: Affine::IDENTITY,
            nominal_frame_rate: 0.0,
        }
    }

    pub fn audio(track_id: TrackId) -> Self {
        Self {
            track_id,
            media_type: MediaType::Audio,
            natural_size: Size::ZERO,
            preferred_transform: Affine::IDENTITY,
            nominal_frame_rate: 0.0,
        }
    }
}

/// Pixel layout of a [`PixelBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    #[default]
    Bgra32,
    Rgba32,
    /// 8-bit 4:2:0 bi-planar luma/chroma.
    Yuv420Biplanar,
}

impl PixelFormat {
    /// Bytes needed for a `width x height` image in this format.
    pub fn frame_len(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Bgra32 | PixelFormat::Rgba32 => pixels * 4,
            PixelFormat::Yuv420Biplanar => pixels + pixels / 2,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "bgra32" | "bgra" => Some(PixelFormat::Bgra32),
            "rgba32" | "rgba" => Some(PixelFormat::Rgba32),
            "yuv420" | "nv12" | "yuv420_biplanar" => Some(PixelFormat::Yuv420Biplanar),
            _ => None,
        }
    }
}

/// A decoded image.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Allocate a zeroed buffer.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            data: vec![0; format.frame_len(width, height)],
        }
    }

    pub fn fill(&mut self, byte: u8) {
        self.data.fill(byte);
    }

    pub fn size(&self) -> Size {
        Size::new(self.width as f64, self.height as f64)
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("len", &self.data.len())
            .finish()
    }
}

/// One timestamped unit moved from a reader output to a writer input.
#[derive(Debug, Clone)]
pub struct Sample {
    pub media_type: MediaType,
    pub presentation_time: MediaTime,
    pub duration: MediaTime,
    /// Decoded image for video samples.
    pub image: Option<PixelBuffer>,
    /// Raw payload (PCM for audio, encoded bytes for passthrough).
    pub data: Vec<u8>,
}

impl Sample {
    pub fn video(presentation_time: MediaTime, duration: MediaTime, image: PixelBuffer) -> Self {
        Self {
            media_type: MediaType::Video,
            presentation_time,
            duration,
            image: Some(image),
            data: Vec::new(),
        }
    }

    pub fn audio(presentation_time: MediaTime, duration: MediaTime, data: Vec<u8>) -> Self {
        Self {
            media_type: MediaType::Audio,
            presentation_time,
            duration,
            image: None,
            data,
        }
    }

    /// Payload size in bytes, counting the image if present.
    pub fn byte_len(&self) -> usize {
        self.data.len() + self.image.as_ref().map_or(0, |image| image.data.len())
    }
}

/// A key/value metadata entry written into the destination container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataItem {
    pub key: String,
    pub value: String,
}

impl MetadataItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_parse_accepts_extensions() {
        assert_eq!(ContainerType::parse(".MP4"), Some(ContainerType::Mp4));
        assert_eq!(ContainerType::parse("quicktime"), Some(ContainerType::Mov));
        assert_eq!(ContainerType::parse("avi"), None);
        assert_eq!(ContainerType::M4v.extension(), "m4v");
    }

    #[test]
    fn test_pixel_buffer_allocation_matches_format() {
        let bgra = PixelBuffer::new(4, 2, PixelFormat::Bgra32);
        assert_eq!(bgra.data.len(), 32);
        let nv12 = PixelBuffer::new(4, 2, PixelFormat::Yuv420Biplanar);
        assert_eq!(nv12.data.len(), 12);
    }

    #[test]
    fn test_sample_byte_len_includes_image() {
        let sample = Sample::video(
            MediaTime::ZERO,
            MediaTime::new(1, 30),
            PixelBuffer::new(2, 2, PixelFormat::Bgra32),
        );
        assert_eq!(sample.byte_len(), 16);
    }
}
