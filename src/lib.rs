//! Session, state and buffer-exchange engine for media players, recorders
//! and codec processors.
//!
//! Sessions come from a [`MediaService`]. Every session runs as its own
//! task; the façades ([`Player`], [`Recorder`], [`CodecProcessor`]) only
//! enqueue requests and hand back a [`Completion`] that can be awaited,
//! observed through a callback or waited on from blocking code.

pub mod backend;
pub mod capability;
pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod models;
pub mod service;
pub mod session;


pub use capability::{CapabilityTable, CodecCapability, CodecKind, Range};
pub use config::{ConfigManager, EngineConfig, FeatureGates};
pub use error::{AppError, ConfigError, ErrorKind, ErrorSeverity, MediaError, MediaResult};
pub use format::{keys, Format, FormatValue};
pub use models::*;
pub use service::MediaService;
pub use session::{
    CodecProcessor, Completion, EventType, InfoKind, MediaSession, Operation, Player, Recorder, RecorderConfig,
    SessionEvent, SessionState, SubscriptionId,
};
