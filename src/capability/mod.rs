//! Codec capability descriptions and the matching rules used by codec lookup
//! and configuration validation.

mod table;

pub use table::CapabilityTable;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MediaError, MediaResult};
use crate::format::{keys, Format, FormatValue};
use crate::models::{MediaType, SessionKind};

/// Tolerance applied to fractional frame rates
pub const FRAME_RATE_EPSILON: f64 = 0.0001;

/// Inclusive integer range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Range {
    pub min: i64,
    pub max: i64,
}

impl Range {
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: i64) -> bool {
        self.min <= value && value <= self.max
    }

    /// Frame-rate style check with a small tolerance at both ends
    pub fn contains_f64(&self, value: f64) -> bool {
        let below = (self.min as f64) > value && ((self.min as f64) - value).abs() >= FRAME_RATE_EPSILON;
        let above = (self.max as f64) < value && ((self.max as f64) - value).abs() >= FRAME_RATE_EPSILON;
        !below && !above
    }

    /// Overlap of two ranges; disjoint ranges collapse to `0..=0`
    pub fn intersect(&self, other: &Range) -> Range {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        if min > max {
            Range::default()
        } else {
            Range::new(min, max)
        }
    }

    /// True for the collapsed `0..=0` range
    pub fn is_unset(&self) -> bool {
        self.min == 0 && self.max == 0
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.min, self.max)
    }
}

/// The four codec roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    AudioDecoder,
    AudioEncoder,
    VideoDecoder,
    VideoEncoder,
}

impl CodecKind {
    pub fn new(media_type: MediaType, encoder: bool) -> Self {
        match (media_type.has_video(), encoder) {
            (false, false) => CodecKind::AudioDecoder,
            (false, true) => CodecKind::AudioEncoder,
            (true, false) => CodecKind::VideoDecoder,
            (true, true) => CodecKind::VideoEncoder,
        }
    }

    pub fn media_type(&self) -> MediaType {
        match self {
            CodecKind::AudioDecoder | CodecKind::AudioEncoder => MediaType::Audio,
            CodecKind::VideoDecoder | CodecKind::VideoEncoder => MediaType::Video,
        }
    }

    pub fn is_encoder(&self) -> bool {
        matches!(self, CodecKind::AudioEncoder | CodecKind::VideoEncoder)
    }

    pub fn session_kind(&self) -> SessionKind {
        if self.is_encoder() {
            SessionKind::Encoder
        } else {
            SessionKind::Decoder
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CodecKind::AudioDecoder => "audio_decoder",
            CodecKind::AudioEncoder => "audio_encoder",
            CodecKind::VideoDecoder => "video_decoder",
            CodecKind::VideoEncoder => "video_encoder",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio_decoder" => Some(CodecKind::AudioDecoder),
            "audio_encoder" => Some(CodecKind::AudioEncoder),
            "video_decoder" => Some(CodecKind::VideoDecoder),
            "video_encoder" => Some(CodecKind::VideoEncoder),
            _ => None,
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Block geometry used to derive frame-rate limits for a picture size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSize {
    pub width: i64,
    pub height: i64,
}

impl Default for BlockSize {
    fn default() -> Self {
        Self { width: 2, height: 2 }
    }
}

/// What one codec can do. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecCapability {
    pub name: String,
    pub kind: CodecKind,
    pub mime: String,
    #[serde(default)]
    pub is_vendor: bool,
    #[serde(default)]
    pub bitrate: Range,
    #[serde(default)]
    pub channels: Range,
    #[serde(default)]
    pub complexity: Range,
    #[serde(default)]
    pub quality: Range,
    #[serde(default)]
    pub width: Range,
    #[serde(default)]
    pub height: Range,
    #[serde(default)]
    pub frame_rate: Range,
    /// Width alignment in `min`, height alignment in `max`
    #[serde(default)]
    pub alignment: Range,
    #[serde(default)]
    pub block_size: BlockSize,
    #[serde(default)]
    pub blocks_per_second: Range,
    #[serde(default)]
    pub sample_rates: Vec<i64>,
    #[serde(default)]
    pub pixel_formats: Vec<i64>,
    #[serde(default)]
    pub profiles: Vec<i64>,
    #[serde(default)]
    pub levels: Vec<i64>,
    #[serde(default)]
    pub bitrate_modes: Vec<i64>,
}

impl CodecCapability {
    pub fn media_type(&self) -> MediaType {
        self.kind.media_type()
    }

    fn is_video(&self) -> bool {
        self.media_type().has_video()
    }

    /// Whether this codec admits every constrained key of `format`.
    /// Keys the codec does not constrain, and absent keys, are accepted.
    pub fn admits(&self, format: &Format) -> bool {
        format.mime() == Some(self.mime.as_str()) && self.validate(format).is_ok()
    }

    /// Check each constrained key of `format` and report the first one out of
    /// range. Values are never clamped.
    pub fn validate(&self, format: &Format) -> MediaResult<()> {
        check_range(format, keys::BITRATE, &self.bitrate)?;

        if self.is_video() {
            check_range(format, keys::WIDTH, &self.width)?;
            check_range(format, keys::HEIGHT, &self.height)?;
            check_listed(format, keys::PIXEL_FORMAT, &self.pixel_formats)?;
            check_frame_rate(format, &self.frame_rate)?;
        } else {
            check_listed(format, keys::SAMPLE_RATE, &self.sample_rates)?;
            check_range(format, keys::CHANNEL_COUNT, &self.channels)?;
        }

        check_listed(format, keys::CODEC_PROFILE, &self.profiles)?;
        check_listed(format, keys::CODEC_LEVEL, &self.levels)?;
        Ok(())
    }

    pub fn is_size_supported(&self, width: i64, height: i64) -> bool {
        self.is_video() && self.width.contains(width) && self.height.contains(height)
    }

    /// Frame rates achievable at the given size, `0..=0` if the size is not supported
    pub fn supported_frame_rates_for(&self, width: i64, height: i64) -> Range {
        if !self.is_size_supported(width, height) {
            return Range::default();
        }
        let frame_rate = self.effective_frame_rate();
        if self.blocks_per_second.is_unset() {
            return frame_rate;
        }

        let block_width = self.block_size.width.max(1);
        let block_height = self.block_size.height.max(1);
        let blocks_per_frame = div_ceil(width, block_width) * div_ceil(height, block_height);
        Range::new(
            (self.blocks_per_second.min / blocks_per_frame).max(frame_rate.min),
            (self.blocks_per_second.max / blocks_per_frame).min(frame_rate.max),
        )
    }

    pub fn is_size_and_rate_supported(&self, width: i64, height: i64, frame_rate: f64) -> bool {
        let rates = self.supported_frame_rates_for(width, height);
        !rates.is_unset() && rates.min <= rates.max && rates.contains_f64(frame_rate)
    }

    /// Sizes from a list of common resolutions this codec accepts
    pub fn supported_sizes(&self) -> Vec<(i64, i64)> {
        const COMMON: &[(i64, i64)] = &[
            (176, 144),
            (320, 240),
            (640, 360),
            (640, 480),
            (1280, 720),
            (1920, 1080),
            (2560, 1440),
            (3840, 2160),
        ];
        COMMON
            .iter()
            .copied()
            .filter(|(w, h)| self.is_size_supported(*w, *h))
            .collect()
    }

    pub fn supported_sample_rates(&self) -> &[i64] {
        if self.is_video() {
            &[]
        } else {
            &self.sample_rates
        }
    }

    /// Width and height rounded up to the codec alignment
    pub fn aligned_size(&self, width: i64, height: i64) -> (i64, i64) {
        (
            align_up(width, self.alignment.min),
            align_up(height, self.alignment.max),
        )
    }

    fn effective_frame_rate(&self) -> Range {
        if self.frame_rate.is_unset() {
            Range::new(1, 30)
        } else {
            self.frame_rate
        }
    }

    /// One-line summary for listings
    pub fn describe(&self) -> String {
        if self.is_video() {
            format!(
                "{:<24} {:<14} {:<18} {}x{} .. {}x{} @ {} fps",
                self.name,
                self.kind,
                self.mime,
                self.width.min,
                self.height.min,
                self.width.max,
                self.height.max,
                self.effective_frame_rate()
            )
        } else {
            format!(
                "{:<24} {:<14} {:<18} channels {} rates {:?}",
                self.name, self.kind, self.mime, self.channels, self.sample_rates
            )
        }
    }
}

fn div_ceil(value: i64, divisor: i64) -> i64 {
    (value + divisor - 1) / divisor
}

fn align_up(value: i64, alignment: i64) -> i64 {
    if alignment <= 1 {
        value
    } else {
        div_ceil(value, alignment) * alignment
    }
}

fn int_value(format: &Format, key: &str) -> MediaResult<Option<i64>> {
    match format.get(key) {
        None => Ok(None),
        Some(FormatValue::Int(v)) => Ok(Some(*v)),
        Some(other) => Err(MediaError::invalid_argument(format!(
            "'{}' must be an integer, got {}",
            key,
            other.type_name()
        ))),
    }
}

fn check_range(format: &Format, key: &str, range: &Range) -> MediaResult<()> {
    // An unset range means the codec does not constrain the key
    if range.is_unset() {
        return Ok(());
    }
    match int_value(format, key)? {
        Some(value) if !range.contains(value) => Err(out_of_range(key, value.to_string(), range)),
        _ => Ok(()),
    }
}

fn check_listed(format: &Format, key: &str, allowed: &[i64]) -> MediaResult<()> {
    if allowed.is_empty() {
        return Ok(());
    }
    match int_value(format, key)? {
        Some(value) if !allowed.contains(&value) => Err(MediaError::ParameterOutOfRange {
            key: key.to_string(),
            value: value.to_string(),
            min: allowed.iter().min().copied().unwrap_or_default().to_string(),
            max: allowed.iter().max().copied().unwrap_or_default().to_string(),
        }),
        _ => Ok(()),
    }
}

fn check_frame_rate(format: &Format, range: &Range) -> MediaResult<()> {
    if range.is_unset() {
        return Ok(());
    }
    match format.get(keys::FRAME_RATE) {
        None => Ok(()),
        Some(FormatValue::Int(v)) if !range.contains(*v) => Err(out_of_range(keys::FRAME_RATE, v.to_string(), range)),
        Some(FormatValue::Float(v)) if !range.contains_f64(*v) => {
            Err(out_of_range(keys::FRAME_RATE, v.to_string(), range))
        }
        Some(FormatValue::Int(_)) | Some(FormatValue::Float(_)) => Ok(()),
        Some(other) => Err(MediaError::invalid_argument(format!(
            "'frame_rate' must be numeric, got {}",
            other.type_name()
        ))),
    }
}

fn out_of_range(key: &str, value: String, range: &Range) -> MediaError {
    MediaError::ParameterOutOfRange {
        key: key.to_string(),
        value,
        min: range.min.to_string(),
        max: range.max.to_string(),
    }
}
