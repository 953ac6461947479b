//! Open key/value parameter descriptor shared by every session kind.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{MediaError, MediaResult};

/// Well-known descriptor keys
pub mod keys {
    pub const CODEC_MIME: &str = "codec_mime";
    pub const BITRATE: &str = "bitrate";
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const PIXEL_FORMAT: &str = "pixel_format";
    pub const FRAME_RATE: &str = "frame_rate";
    pub const CHANNEL_COUNT: &str = "channel_count";
    pub const SAMPLE_RATE: &str = "sample_rate";
    pub const MAX_INPUT_SIZE: &str = "max_input_size";
    pub const CODEC_PROFILE: &str = "codec_profile";
    pub const CODEC_LEVEL: &str = "codec_level";
    pub const I_FRAME_INTERVAL: &str = "i_frame_interval";
    pub const REQ_I_FRAME: &str = "req_i_frame";
    pub const DURATION: &str = "duration";
    pub const TRACK_COUNT: &str = "track_count";
    pub const CONTAINER_FORMAT: &str = "container_format";
    pub const URI: &str = "uri";
    pub const SURFACE: &str = "surface";
    pub const STRIDE: &str = "stride";
    pub const SLICE_HEIGHT: &str = "slice_height";

    // recorder
    pub const OUTPUT_URI: &str = "output_uri";
    pub const AUDIO_SOURCE: &str = "audio_source";
    pub const VIDEO_SOURCE: &str = "video_source";
    pub const AUDIO_CODEC_MIME: &str = "audio_codec_mime";
    pub const VIDEO_CODEC_MIME: &str = "video_codec_mime";
    pub const AUDIO_BITRATE: &str = "audio_bitrate";
    pub const VIDEO_BITRATE: &str = "video_bitrate";
    pub const MAX_DURATION: &str = "max_duration";
    pub const MAX_FILE_SIZE: &str = "max_file_size";

    pub const VENDOR_PREFIX: &str = "vendor.";

    /// Keys whose value must be an integer
    pub const INTEGER_KEYS: &[&str] = &[
        BITRATE,
        WIDTH,
        HEIGHT,
        PIXEL_FORMAT,
        CHANNEL_COUNT,
        SAMPLE_RATE,
        MAX_INPUT_SIZE,
        CODEC_PROFILE,
        CODEC_LEVEL,
        I_FRAME_INTERVAL,
        DURATION,
        TRACK_COUNT,
        STRIDE,
        SLICE_HEIGHT,
        AUDIO_BITRATE,
        VIDEO_BITRATE,
        MAX_DURATION,
        MAX_FILE_SIZE,
    ];

    /// Keys whose value must be a string
    pub const STRING_KEYS: &[&str] = &[
        CODEC_MIME,
        CONTAINER_FORMAT,
        URI,
        SURFACE,
        OUTPUT_URI,
        AUDIO_SOURCE,
        VIDEO_SOURCE,
        AUDIO_CODEC_MIME,
        VIDEO_CODEC_MIME,
    ];

    /// Alternative spellings accepted on input
    pub const ALIASES: &[(&str, &str)] = &[
        ("mime", CODEC_MIME),
        ("sampleRate", SAMPLE_RATE),
        ("samplerate", SAMPLE_RATE),
        ("channels", CHANNEL_COUNT),
        ("frameRate", FRAME_RATE),
    ];

    pub fn is_vendor_key(key: &str) -> bool {
        key.starts_with(VENDOR_PREFIX)
    }

    pub fn canonical(key: &str) -> &str {
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == key)
            .map(|(_, canonical)| *canonical)
            .unwrap_or(key)
    }
}

/// One descriptor value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireValue", into = "WireValue")]
pub enum FormatValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Bytes(Vec<u8>),
    IntArray(Vec<i64>),
}

impl FormatValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            FormatValue::Int(_) => "int",
            FormatValue::Float(_) => "float",
            FormatValue::Str(_) => "string",
            FormatValue::Bool(_) => "bool",
            FormatValue::Bytes(_) => "bytes",
            FormatValue::IntArray(_) => "int array",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FormatValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view; integers widen to floats
    pub fn as_float(&self) -> Option<f64> {
        match self {
            FormatValue::Float(v) => Some(*v),
            FormatValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FormatValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FormatValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FormatValue::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int_array(&self) -> Option<&[i64]> {
        match self {
            FormatValue::IntArray(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for FormatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatValue::Int(v) => write!(f, "{}", v),
            FormatValue::Float(v) => write!(f, "{}", v),
            FormatValue::Str(v) => write!(f, "\"{}\"", v),
            FormatValue::Bool(v) => write!(f, "{}", v),
            FormatValue::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            FormatValue::IntArray(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<i64> for FormatValue {
    fn from(v: i64) -> Self {
        FormatValue::Int(v)
    }
}

impl From<i32> for FormatValue {
    fn from(v: i32) -> Self {
        FormatValue::Int(v.into())
    }
}

impl From<u32> for FormatValue {
    fn from(v: u32) -> Self {
        FormatValue::Int(v.into())
    }
}

impl From<f64> for FormatValue {
    fn from(v: f64) -> Self {
        FormatValue::Float(v)
    }
}

impl From<bool> for FormatValue {
    fn from(v: bool) -> Self {
        FormatValue::Bool(v)
    }
}

impl From<&str> for FormatValue {
    fn from(v: &str) -> Self {
        FormatValue::Str(v.to_string())
    }
}

impl From<String> for FormatValue {
    fn from(v: String) -> Self {
        FormatValue::Str(v)
    }
}

impl From<Vec<u8>> for FormatValue {
    fn from(v: Vec<u8>) -> Self {
        FormatValue::Bytes(v)
    }
}

impl From<Vec<i64>> for FormatValue {
    fn from(v: Vec<i64>) -> Self {
        FormatValue::IntArray(v)
    }
}

/// Serialized shape of a value. Bytes get their own table so they never
/// read back as an integer array.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    IntArray(Vec<i64>),
    Bytes { bytes: Vec<u8> },
}

impl From<WireValue> for FormatValue {
    fn from(v: WireValue) -> Self {
        match v {
            WireValue::Bool(v) => FormatValue::Bool(v),
            WireValue::Int(v) => FormatValue::Int(v),
            WireValue::Float(v) => FormatValue::Float(v),
            WireValue::Str(v) => FormatValue::Str(v),
            WireValue::IntArray(v) => FormatValue::IntArray(v),
            WireValue::Bytes { bytes } => FormatValue::Bytes(bytes),
        }
    }
}

impl From<FormatValue> for WireValue {
    fn from(v: FormatValue) -> Self {
        match v {
            FormatValue::Bool(v) => WireValue::Bool(v),
            FormatValue::Int(v) => WireValue::Int(v),
            FormatValue::Float(v) => WireValue::Float(v),
            FormatValue::Str(v) => WireValue::Str(v),
            FormatValue::IntArray(v) => WireValue::IntArray(v),
            FormatValue::Bytes(bytes) => WireValue::Bytes { bytes },
        }
    }
}

/// Ordered key/value descriptor used for configuration, parameters and
/// negotiated output formats
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Format {
    entries: BTreeMap<String, FormatValue>,
}

impl Format {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Into<FormatValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<FormatValue>) -> Option<FormatValue> {
        self.entries.insert(key.to_string(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&FormatValue> {
        self.entries.get(key)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(FormatValue::as_int)
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(FormatValue::as_float)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FormatValue::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(FormatValue::as_bool)
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        self.get(key).and_then(FormatValue::as_bytes)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<FormatValue> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormatValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The codec mime, if set
    pub fn mime(&self) -> Option<&str> {
        self.get_str(keys::CODEC_MIME)
    }

    /// Copy with every alias rewritten to its canonical key. A canonical key
    /// already present wins over its alias.
    pub fn normalized(&self) -> Format {
        let mut out = Format::new();
        for (key, value) in &self.entries {
            let canonical = keys::canonical(key);
            if canonical != key.as_str() && self.entries.contains_key(canonical) {
                continue;
            }
            out.entries.insert(canonical.to_string(), value.clone());
        }
        out
    }

    /// Overlay `other` on top of `self`
    pub fn merge(&mut self, other: &Format) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    pub fn merged(&self, other: &Format) -> Format {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// True when every key of `other` is present here
    pub fn contains_keys_of(&self, other: &Format) -> bool {
        other.keys().all(|key| self.contains_key(key))
    }

    /// Subset made of the listed keys that are present
    pub fn select(&self, wanted: &[&str]) -> Format {
        let mut out = Format::new();
        for key in wanted {
            if let Some(value) = self.entries.get(*key) {
                out.entries.insert(key.to_string(), value.clone());
            }
        }
        out
    }

    /// Check the value types of well-known keys. Vendor and unknown keys pass.
    pub fn validate_types(&self) -> MediaResult<()> {
        for (key, value) in &self.entries {
            if keys::is_vendor_key(key) {
                continue;
            }
            let ok = if keys::INTEGER_KEYS.contains(&key.as_str()) {
                matches!(value, FormatValue::Int(_))
            } else if keys::STRING_KEYS.contains(&key.as_str()) {
                matches!(value, FormatValue::Str(_))
            } else if key == keys::FRAME_RATE {
                matches!(value, FormatValue::Int(_) | FormatValue::Float(_))
            } else if key == keys::REQ_I_FRAME {
                matches!(value, FormatValue::Bool(_) | FormatValue::Int(_))
            } else {
                true
            };

            if !ok {
                return Err(MediaError::invalid_argument(format!(
                    "'{}' has a value of type {}",
                    key,
                    value.type_name()
                )));
            }
        }
        Ok(())
    }

    /// Parse a descriptor written as a flat TOML table
    pub fn from_toml_str(content: &str) -> MediaResult<Format> {
        let format: Format = toml::from_str(content)
            .map_err(|e| MediaError::invalid_argument(format!("malformed descriptor: {}", e)))?;
        Ok(format.normalized())
    }

    pub fn to_toml_string(&self) -> MediaResult<String> {
        toml::to_string(self).map_err(|e| MediaError::invalid_argument(format!("descriptor not serializable: {}", e)))
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.entries.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

impl FromIterator<(String, FormatValue)> for Format {
    fn from_iter<I: IntoIterator<Item = (String, FormatValue)>>(iter: I) -> Self {
        Format {
            entries: iter.into_iter().collect(),
        }
    }
}
