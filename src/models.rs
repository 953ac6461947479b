use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{MediaError, MediaResult};
use crate::format::Format;
use crate::session::buffer::BufferStats;
use crate::session::state::SessionState;

/// Unique identity of a session for its whole lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, used in log lines
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a session does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Player,
    Recorder,
    Encoder,
    Decoder,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Player => "player",
            SessionKind::Recorder => "recorder",
            SessionKind::Encoder => "encoder",
            SessionKind::Decoder => "decoder",
        }
    }

    pub fn is_codec(&self) -> bool {
        matches!(self, SessionKind::Encoder | SessionKind::Decoder)
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media carried by a session. Players and recorders may carry both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Audio,
    Video,
    AudioVideo,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
            MediaType::AudioVideo => "audio+video",
        }
    }

    pub fn has_video(&self) -> bool {
        matches!(self, MediaType::Video | MediaType::AudioVideo)
    }

    /// Infer the media type from a mime string such as `audio/mp4a-latm`
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.split('/').next()? {
            "audio" => Some(MediaType::Audio),
            "video" => Some(MediaType::Video),
            _ => None,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle naming one slot of a buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferIndex(pub u32);

impl BufferIndex {
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BufferIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Bit set attached to every queued or produced buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags(0);
    pub const END_OF_STREAM: BufferFlags = BufferFlags(1 << 0);
    pub const SYNC_FRAME: BufferFlags = BufferFlags(1 << 1);
    pub const PARTIAL_FRAME: BufferFlags = BufferFlags(1 << 2);
    pub const CODEC_CONFIG: BufferFlags = BufferFlags(1 << 3);

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: BufferFlags) {
        self.0 |= other.0;
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.contains(BufferFlags::END_OF_STREAM)
    }

    pub fn is_codec_config(&self) -> bool {
        self.contains(BufferFlags::CODEC_CONFIG)
    }
}

impl BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for BufferFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (BufferFlags::END_OF_STREAM, "EOS"),
            (BufferFlags::SYNC_FRAME, "SYNC"),
            (BufferFlags::PARTIAL_FRAME, "PARTIAL"),
            (BufferFlags::CODEC_CONFIG, "CONFIG"),
        ]
        .iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| *name)
        .collect();

        if names.is_empty() {
            f.write_str("-")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// Region and timestamp of a buffer's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
}

impl BufferInfo {
    pub fn new(offset: usize, size: usize, presentation_time_us: i64) -> Self {
        Self {
            offset,
            size,
            presentation_time_us,
        }
    }

    /// Payload of `size` bytes starting at offset zero
    pub fn sized(size: usize, presentation_time_us: i64) -> Self {
        Self::new(0, size, presentation_time_us)
    }

    pub fn end(&self) -> Option<usize> {
        self.offset.checked_add(self.size)
    }
}

/// Identity of a rendering or capture surface
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(String);

impl SurfaceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Fresh surface id with a random suffix
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{}-{}", prefix, Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Location of a player source or recorder sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaUri {
    File(PathBuf),
    Fd(i32),
    Network(String),
}

impl MediaUri {
    /// Parse `file://`, `fd://` and `http(s)://` locations. A bare path is a file.
    pub fn parse(uri: &str) -> MediaResult<Self> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(MediaError::invalid_argument("empty uri"));
        }

        if let Some(path) = uri.strip_prefix("file://") {
            if path.is_empty() {
                return Err(MediaError::invalid_argument("file uri without a path"));
            }
            return Ok(MediaUri::File(PathBuf::from(path)));
        }

        if let Some(fd) = uri.strip_prefix("fd://") {
            return fd
                .parse::<i32>()
                .ok()
                .filter(|fd| *fd >= 0)
                .map(MediaUri::Fd)
                .ok_or_else(|| MediaError::invalid_argument(format!("bad file descriptor in '{}'", uri)));
        }

        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Ok(MediaUri::Network(uri.to_string()));
        }

        if uri.contains("://") {
            return Err(MediaError::invalid_argument(format!("unsupported uri scheme in '{}'", uri)));
        }

        Ok(MediaUri::File(PathBuf::from(uri)))
    }

    pub fn is_local(&self) -> bool {
        !matches!(self, MediaUri::Network(_))
    }
}

impl fmt::Display for MediaUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaUri::File(path) => write!(f, "file://{}", path.display()),
            MediaUri::Fd(fd) => write!(f, "fd://{}", fd),
            MediaUri::Network(url) => f.write_str(url),
        }
    }
}

/// How a seek lands relative to sync frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeekMode {
    PreviousSync,
    NextSync,
    #[default]
    ClosestSync,
    Closest,
}

/// Playback rates a player accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackSpeed {
    X0_75,
    #[default]
    X1_00,
    X1_25,
    X1_75,
    X2_00,
}

impl PlaybackSpeed {
    pub fn factor(&self) -> f64 {
        match self {
            PlaybackSpeed::X0_75 => 0.75,
            PlaybackSpeed::X1_00 => 1.0,
            PlaybackSpeed::X1_25 => 1.25,
            PlaybackSpeed::X1_75 => 1.75,
            PlaybackSpeed::X2_00 => 2.0,
        }
    }

    pub fn from_factor(factor: f64) -> Option<Self> {
        [
            PlaybackSpeed::X0_75,
            PlaybackSpeed::X1_00,
            PlaybackSpeed::X1_25,
            PlaybackSpeed::X1_75,
            PlaybackSpeed::X2_00,
        ]
        .into_iter()
        .find(|speed| (speed.factor() - factor).abs() < f64::EPSILON)
    }
}

impl fmt::Display for PlaybackSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.factor())
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub id: SessionId,
    pub kind: SessionKind,
    pub media_type: MediaType,
    pub state: SessionState,
    pub last_error: Option<MediaError>,
    pub buffers: BufferStats,
    pub output_format: Option<Format>,
}

impl SessionStatus {
    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    pub fn is_failed(&self) -> bool {
        self.state == SessionState::Error
    }

    /// One-line description for logs and the CLI
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} {} [{}] state={} queued={} produced={}",
            self.kind,
            self.id.short(),
            self.media_type,
            self.state,
            self.buffers.inputs_queued,
            self.buffers.outputs_produced
        );
        if let Some(err) = &self.last_error {
            line.push_str(&format!(" last_error={}", err.kind()));
        }
        line
    }
}

/// Format a duration as `m:ss` or `h:mm:ss`
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
