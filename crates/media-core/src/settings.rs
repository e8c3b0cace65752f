//! Encoder and decoder settings maps.
//!
//! Settings are open key/value maps handed to the engine verbatim, with a
//! handful of well-known keys in [`keys`] that the export engine itself
//! inspects (output dimensions and frame rate).

use std::collections::BTreeMap;

use kurbo::Size;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known settings keys.
pub mod keys {
    /// Codec identifier, e.g. `"h264"`, `"hevc"`, `"aac"`.
    pub const CODEC: &str = "codec";
    /// Output width in pixels (video output settings).
    pub const WIDTH: &str = "width";
    /// Output height in pixels (video output settings).
    pub const HEIGHT: &str = "height";
    /// Nested map of encoder tuning properties.
    pub const COMPRESSION_PROPERTIES: &str = "compression_properties";
    /// Average bit rate in bits per second (inside compression properties).
    pub const AVERAGE_BIT_RATE: &str = "average_bit_rate";
    /// Frame rate the encoder must not drop below (inside compression properties).
    pub const AVERAGE_NON_DROPPABLE_FRAME_RATE: &str = "average_non_droppable_frame_rate";
    /// Top-level shorthand for the encode frame rate.
    pub const FRAME_RATE: &str = "frame_rate";
    /// Encoder profile/level, e.g. `"high_auto"`.
    pub const PROFILE_LEVEL: &str = "profile_level";
    /// Decoded pixel format (video input settings).
    pub const PIXEL_FORMAT: &str = "pixel_format";
    /// Audio sample rate in Hz.
    pub const SAMPLE_RATE: &str = "sample_rate";
    /// Audio channel count.
    pub const CHANNELS: &str = "channels";
    /// Audio bit rate in bits per second.
    pub const BIT_RATE: &str = "bit_rate";
}

/// An ordered key/value settings map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(BTreeMap<String, Value>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Builder-style insert of a nested settings map.
    pub fn with_nested(mut self, key: &str, nested: Settings) -> Self {
        self.0.insert(key.to_string(), nested.into_value());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Unsigned integer value; floats with no fractional part are accepted.
    pub fn get_u32(&self, key: &str) -> Option<u32> {
        let value = self.0.get(key)?;
        if let Some(n) = value.as_u64() {
            return u32::try_from(n).ok();
        }
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u32::MAX as f64)
            .map(|f| f as u32)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key)?.as_f64()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key)?.as_str()
    }

    /// Nested map stored under `key`.
    pub fn get_nested(&self, key: &str) -> Option<Settings> {
        match self.0.get(key)? {
            Value::Object(map) => Some(Settings(
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            )),
            _ => None,
        }
    }

    /// Output dimensions from [`keys::WIDTH`] and [`keys::HEIGHT`], if both are
    /// present and non-zero.
    pub fn dimensions(&self) -> Option<Size> {
        let width = self.get_u32(keys::WIDTH).filter(|w| *w > 0)?;
        let height = self.get_u32(keys::HEIGHT).filter(|h| *h > 0)?;
        Some(Size::new(width as f64, height as f64))
    }

    /// Explicit encode frame rate from the compression properties.
    pub fn average_non_droppable_frame_rate(&self) -> Option<f64> {
        self.get_nested(keys::COMPRESSION_PROPERTIES)?
            .get_f64(keys::AVERAGE_NON_DROPPABLE_FRAME_RATE)
    }

    /// Caller-requested encode frame rate: the compression property first,
    /// then the top-level [`keys::FRAME_RATE`] shorthand.
    pub fn requested_frame_rate(&self) -> Option<f64> {
        self.average_non_droppable_frame_rate()
            .or_else(|| self.get_f64(keys::FRAME_RATE))
            .filter(|fps| fps.is_finite() && *fps > 0.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0.into_iter().collect())
    }
}

impl FromIterator<(String, Value)> for Settings {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
