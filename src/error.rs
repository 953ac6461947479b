use std::time::Duration;
use thiserror::Error;

use crate::session::state::{Operation, SessionState};

/// Result alias used across the engine
pub type MediaResult<T> = Result<T, MediaError>;

/// Base of the externally visible error codes. Codes are `EXT_CODE_BASE + errno`
/// for the errno-derived kinds and sequential from `EXT_CODE_BASE + 0x200` for the rest.
pub const EXT_CODE_BASE: i32 = 5_400_000;

/// Application-level error used by the `mediactl` binary
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Parse(#[from] crate::cli::ParseError),
}

impl AppError {
    /// Get user-friendly error message with suggested solutions
    pub fn user_message(&self) -> String {
        match self {
            AppError::Media(err) => err.user_message(),
            AppError::File(err) => Self::format_file_error(err),
            AppError::Config(err) => err.user_message(),
            AppError::Parse(err) => err.to_string(),
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            AppError::Media(err) => err.recovery_suggestions(),
            AppError::File(_) => vec![
                "Check that the file path is correct".to_string(),
                "Check file permissions".to_string(),
            ],
            AppError::Config(err) => err.recovery_suggestions(),
            AppError::Parse(_) => vec!["Run with --help to see the accepted values".to_string()],
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AppError::Media(err) => err.severity(),
            AppError::File(_) => ErrorSeverity::Error,
            AppError::Config(_) => ErrorSeverity::Warning,
            AppError::Parse(_) => ErrorSeverity::Warning,
        }
    }

    fn format_file_error(err: &std::io::Error) -> String {
        match err.kind() {
            std::io::ErrorKind::NotFound => "File or directory not found".to_string(),
            std::io::ErrorKind::PermissionDenied => "Permission denied - cannot access file".to_string(),
            std::io::ErrorKind::UnexpectedEof => "File appears to be truncated".to_string(),
            _ => format!("File system error: {}", err),
        }
    }
}

/// Error severity levels for logging and user feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Warning => "WARNING",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }

    pub fn log_level(&self) -> log::Level {
        match self {
            ErrorSeverity::Info => log::Level::Info,
            ErrorSeverity::Warning => log::Level::Warn,
            ErrorSeverity::Error => log::Level::Error,
            ErrorSeverity::Critical => log::Level::Error,
        }
    }
}

/// The error taxonomy every session failure maps onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    OutOfMemory,
    PermissionDenied,
    InvalidArgument,
    IoFailure,
    Timeout,
    Unknown,
    ServiceDied,
    InvalidState,
    Unsupported,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::OutOfMemory => "OUT_OF_MEMORY",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::IoFailure => "IO_FAILURE",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Unknown => "UNKNOWN",
            ErrorKind::ServiceDied => "SERVICE_DIED",
            ErrorKind::InvalidState => "INVALID_STATE",
            ErrorKind::Unsupported => "UNSUPPORTED",
        }
    }

    /// Numeric code reported across the callback boundary
    pub fn ext_code(&self) -> i32 {
        EXT_CODE_BASE
            + match self {
                ErrorKind::PermissionDenied => 1, // EPERM
                ErrorKind::IoFailure => 5,        // EIO
                ErrorKind::OutOfMemory => 12,     // ENOMEM
                ErrorKind::InvalidArgument => 22, // EINVAL
                ErrorKind::Timeout => 110,        // ETIMEDOUT
                ErrorKind::Unknown => 0x200,
                ErrorKind::ServiceDied => 0x201,
                ErrorKind::InvalidState => 0x202,
                ErrorKind::Unsupported => 0x203,
            }
    }

    /// Whether an error of this kind poisons the whole session
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::OutOfMemory
                | ErrorKind::IoFailure
                | ErrorKind::Timeout
                | ErrorKind::ServiceDied
                | ErrorKind::Unknown
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by sessions, backends and capability queries
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MediaError {
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Parameter '{key}' value {value} is outside the supported range {min}..={max}")]
    ParameterOutOfRange {
        key: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Buffer {index} rejected: {reason}")]
    BufferOwnership { index: u32, reason: String },

    #[error("I/O failure: {0}")]
    Io(String),

    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout { operation: Operation, after: Duration },

    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Media service died: {0}")]
    ServiceDied(String),

    #[error("{operation} is not allowed in state {state}")]
    InvalidState {
        operation: Operation,
        state: SessionState,
    },

    #[error("{operation} was cancelled by {by}")]
    Cancelled { operation: Operation, by: Operation },

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl MediaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MediaError::OutOfMemory(_) => ErrorKind::OutOfMemory,
            MediaError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            MediaError::InvalidArgument(_)
            | MediaError::ParameterOutOfRange { .. }
            | MediaError::BufferOwnership { .. } => ErrorKind::InvalidArgument,
            MediaError::Io(_) => ErrorKind::IoFailure,
            MediaError::Timeout { .. } => ErrorKind::Timeout,
            MediaError::Unknown(_) => ErrorKind::Unknown,
            MediaError::ServiceDied(_) => ErrorKind::ServiceDied,
            MediaError::InvalidState { .. } | MediaError::Cancelled { .. } => ErrorKind::InvalidState,
            MediaError::Unsupported(_) => ErrorKind::Unsupported,
        }
    }

    pub fn ext_code(&self) -> i32 {
        self.kind().ext_code()
    }

    pub fn is_session_fatal(&self) -> bool {
        self.kind().is_session_fatal()
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        MediaError::InvalidArgument(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        MediaError::Unsupported(msg.into())
    }

    pub fn user_message(&self) -> String {
        match self {
            MediaError::OutOfMemory(msg) => format!("Not enough memory for the media session: {}", msg),
            MediaError::PermissionDenied(msg) => format!("Access to the media resource was denied: {}", msg),
            MediaError::InvalidArgument(msg) => format!("Invalid request: {}", msg),
            MediaError::ParameterOutOfRange { key, value, min, max } => {
                format!("'{}' = {} is not supported (allowed {} to {})", key, value, min, max)
            }
            MediaError::BufferOwnership { index, reason } => {
                format!("Buffer #{} cannot be used: {}", index, reason)
            }
            MediaError::Io(msg) => format!("Media I/O failed: {}", msg),
            MediaError::Timeout { operation, after } => {
                format!("{} did not complete within {:.1}s", operation, after.as_secs_f64())
            }
            MediaError::Unknown(msg) => format!("Unexpected media failure: {}", msg),
            MediaError::ServiceDied(msg) => format!("The media service stopped responding: {}", msg),
            MediaError::InvalidState { operation, state } => {
                format!("Cannot {} while the session is {}", operation, state)
            }
            MediaError::Cancelled { operation, by } => {
                format!("{} was interrupted by a {} request", operation, by)
            }
            MediaError::Unsupported(msg) => format!("Not supported: {}", msg),
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self.kind() {
            ErrorKind::OutOfMemory => vec![
                "Lower the buffer count or buffer capacity in the engine configuration".to_string(),
                "Release sessions that are no longer needed".to_string(),
            ],
            ErrorKind::PermissionDenied => vec![
                "Check the permissions of the source or sink".to_string(),
            ],
            ErrorKind::InvalidArgument => vec![
                "Use 'mediactl caps' to see the supported parameter ranges".to_string(),
                "Only queue or release buffers the session has granted you".to_string(),
            ],
            ErrorKind::IoFailure => vec![
                "Check that the media source or sink is reachable".to_string(),
                "Reset the session and configure it again".to_string(),
            ],
            ErrorKind::Timeout => vec![
                "Increase operation_timeout_ms in the engine configuration".to_string(),
                "Reset the session and try again".to_string(),
            ],
            ErrorKind::ServiceDied | ErrorKind::Unknown => vec![
                "Release the session and create a new one".to_string(),
            ],
            ErrorKind::InvalidState => vec![
                "Check the session state before issuing the request".to_string(),
                "A session in the error state only accepts reset or release".to_string(),
            ],
            ErrorKind::Unsupported => vec![
                "This session kind or codec does not implement the request".to_string(),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self.kind() {
            ErrorKind::InvalidArgument | ErrorKind::InvalidState => true, // caller can fix the request
            ErrorKind::IoFailure | ErrorKind::Timeout => true,           // reset and retry
            ErrorKind::OutOfMemory => true,
            ErrorKind::PermissionDenied | ErrorKind::Unsupported => false,
            ErrorKind::ServiceDied | ErrorKind::Unknown => false,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.kind() {
            ErrorKind::InvalidArgument | ErrorKind::InvalidState | ErrorKind::Unsupported => {
                ErrorSeverity::Warning
            }
            ErrorKind::PermissionDenied | ErrorKind::IoFailure | ErrorKind::Timeout => ErrorSeverity::Error,
            ErrorKind::OutOfMemory | ErrorKind::ServiceDied | ErrorKind::Unknown => ErrorSeverity::Critical,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::ConfigDirNotFound => "Cannot find or create configuration directory".to_string(),
            ConfigError::IoError(err) => format!("Cannot access configuration file: {}", err),
            ConfigError::SerializationError(_) => "Failed to save configuration settings".to_string(),
            ConfigError::DeserializationError(_) => {
                "Configuration file is corrupted or has invalid format".to_string()
            }
            ConfigError::InvalidValue(msg) => format!("Configuration contains an invalid value: {}", msg),
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            ConfigError::ConfigDirNotFound => vec![
                "Check that you have write permissions to your home directory".to_string(),
                "Try creating the directory manually: ~/.config/media-session/".to_string(),
            ],
            ConfigError::IoError(_) => vec![
                "Check file permissions for the configuration directory".to_string(),
                "Ensure the disk is not full".to_string(),
            ],
            ConfigError::SerializationError(_) => vec![
                "Configuration will use default values".to_string(),
            ],
            ConfigError::DeserializationError(_) | ConfigError::InvalidValue(_) => vec![
                "Delete the configuration file to reset to defaults".to_string(),
                "Run 'mediactl config show' to see the expected format".to_string(),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        true // defaults are always available
    }
}

impl From<ConfigError> for MediaError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::IoError(io) => MediaError::Io(io.to_string()),
            other => MediaError::InvalidArgument(other.to_string()),
        }
    }
}
