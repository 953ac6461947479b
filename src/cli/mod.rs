use crate::capability::CodecKind;
use crate::format::{keys, Format};
use crate::models::MediaType;
use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod status;
pub use status::StatusDisplay;

/// Default chunk size for `transcode`
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Media session engine CLI
#[derive(Debug, Parser)]
#[command(name = "mediactl")]
#[command(about = "Inspect codec capabilities and drive media sessions")]
#[command(version = "0.1.0")]
pub struct CliApp {
    /// Engine configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List codec capabilities
    Caps {
        /// audio-decoder, audio-encoder, video-decoder or video-encoder
        #[arg(long)]
        kind: Option<String>,
        /// Only codecs handling this mime type
        #[arg(long)]
        mime: Option<String>,
    },
    /// Find a codec able to handle a format
    Find(FindArgs),
    /// Push a file through a pass-through codec session
    Transcode {
        input: PathBuf,
        output: PathBuf,
        /// Codec mime type
        #[arg(long, default_value = "audio/mp4a-latm")]
        mime: String,
        /// Bytes per input buffer
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk: usize,
    },
    /// Play a source on the clock player until it completes (Ctrl-C stops)
    Play {
        uri: String,
        /// Source length in milliseconds
        #[arg(long)]
        duration_ms: Option<u64>,
        /// Volume 0.0 - 1.0
        #[arg(long)]
        volume: Option<f32>,
    },
    /// Engine configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Codec lookup arguments
#[derive(Debug, Args)]
#[command(group(ArgGroup::new("direction").required(true).args(["decoder", "encoder"])))]
pub struct FindArgs {
    #[arg(long)]
    pub decoder: bool,
    #[arg(long)]
    pub encoder: bool,
    #[arg(long)]
    pub mime: String,
    #[arg(long)]
    pub width: Option<i64>,
    #[arg(long)]
    pub height: Option<i64>,
    #[arg(long)]
    pub frame_rate: Option<f64>,
    #[arg(long)]
    pub sample_rate: Option<i64>,
    #[arg(long)]
    pub channels: Option<i64>,
    #[arg(long)]
    pub bitrate: Option<i64>,
}

impl FindArgs {
    /// Lookup descriptor built from the given flags
    pub fn to_format(&self) -> Format {
        let mut format = Format::new().with(keys::CODEC_MIME, self.mime.as_str());
        let ints = [
            (keys::WIDTH, self.width),
            (keys::HEIGHT, self.height),
            (keys::SAMPLE_RATE, self.sample_rate),
            (keys::CHANNEL_COUNT, self.channels),
            (keys::BITRATE, self.bitrate),
        ];
        for (key, value) in ints {
            if let Some(value) = value {
                format.set(key, value);
            }
        }
        if let Some(rate) = self.frame_rate {
            format.set(keys::FRAME_RATE, rate);
        }
        format
    }

    pub fn media_type(&self) -> Result<MediaType, ParseError> {
        MediaType::from_mime(&self.mime).ok_or_else(|| ParseError::InvalidArgument {
            argument: "mime".to_string(),
            value: self.mime.clone(),
            expected: "an audio/* or video/* mime type".to_string(),
        })
    }
}

/// Configuration subcommands
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the configuration in effect and where it is stored
    Show,
    /// Restore and save the default configuration
    Reset,
}

impl CliApp {
    /// Parse command line arguments
    pub fn parse() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Expand tilde (~) in path to home directory
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home_dir) = dirs::home_dir() {
                return home_dir.join(rest);
            }
        } else if path == "~" {
            return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
        }
        PathBuf::from(path)
    }

    pub fn parse_kind(kind: &str) -> Result<CodecKind, ParseError> {
        CodecKind::parse(&kind.trim().to_lowercase().replace('-', "_")).ok_or_else(|| ParseError::InvalidArgument {
            argument: "kind".to_string(),
            value: kind.to_string(),
            expected: "audio-decoder, audio-encoder, video-decoder or video-encoder".to_string(),
        })
    }

    pub fn validate_volume(volume: f32) -> Result<f32, ParseError> {
        if (0.0..=1.0).contains(&volume) {
            Ok(volume)
        } else {
            Err(ParseError::InvalidArgument {
                argument: "volume".to_string(),
                value: volume.to_string(),
                expected: "0.0 - 1.0".to_string(),
            })
        }
    }

    pub fn validate_chunk(chunk: usize) -> Result<usize, ParseError> {
        if chunk == 0 {
            return Err(ParseError::InvalidArgument {
                argument: "chunk".to_string(),
                value: chunk.to_string(),
                expected: "a positive byte count".to_string(),
            });
        }
        Ok(chunk)
    }

    /// Descriptor `transcode` configures its codec session with
    pub fn transcode_format(mime: &str, chunk: usize) -> Result<Format, ParseError> {
        let media_type = MediaType::from_mime(mime).ok_or_else(|| ParseError::InvalidArgument {
            argument: "mime".to_string(),
            value: mime.to_string(),
            expected: "an audio/* or video/* mime type".to_string(),
        })?;
        let format = Format::new()
            .with(keys::CODEC_MIME, mime)
            .with(keys::MAX_INPUT_SIZE, chunk as i64);
        Ok(if media_type.has_video() {
            format.with(keys::WIDTH, 1280).with(keys::HEIGHT, 720)
        } else {
            format.with(keys::SAMPLE_RATE, 44100).with(keys::CHANNEL_COUNT, 2)
        })
    }
}

/// Command argument errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid argument {argument}: got '{value}', expected {expected}")]
    InvalidArgument {
        argument: String,
        value: String,
        expected: String,
    },
}
