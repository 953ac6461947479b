//! Session lifecycle states and the operation validity table.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MediaError, MediaResult};
use crate::models::{MediaType, SessionKind};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Configured,
    /// A prepare is in flight
    Preparing,
    Prepared,
    Running,
    Paused,
    Stopped,
    Released,
    Error,
}

impl SessionState {
    pub const ALL: [SessionState; 9] = [
        SessionState::Idle,
        SessionState::Configured,
        SessionState::Preparing,
        SessionState::Prepared,
        SessionState::Running,
        SessionState::Paused,
        SessionState::Stopped,
        SessionState::Released,
        SessionState::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Configured => "configured",
            SessionState::Preparing => "preparing",
            SessionState::Prepared => "prepared",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::Stopped => "stopped",
            SessionState::Released => "released",
            SessionState::Error => "error",
        }
    }

    /// States in which a buffer pool exists
    pub fn has_resources(&self) -> bool {
        matches!(
            self,
            SessionState::Prepared | SessionState::Running | SessionState::Paused
        )
    }

    /// Whether the lifecycle graph has an edge from `self` to `to`
    pub fn can_transition_to(&self, to: SessionState) -> bool {
        use SessionState::*;

        match (*self, to) {
            (Released, _) => false,
            (_, Released) => true,
            (_, Error) => true,
            (_, Idle) => true,
            (Idle, Configured) => true,
            (Configured | Stopped, Preparing) => true,
            (Preparing, Prepared | Stopped) => true,
            // failed prepare falls back to where it came from
            (Preparing, Configured) => true,
            (Prepared | Paused, Running) => true,
            (Running, Paused) => true,
            (Running | Paused | Preparing, Stopped) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every request a session accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Configure,
    Prepare,
    Start,
    Pause,
    Resume,
    Stop,
    Flush,
    Reset,
    Release,
    QueueInput,
    ReleaseOutput,
    NotifyEndOfStream,
    SetParameter,
    SetOutputSurface,
    CreateInputSurface,
    Seek,
    SetVolume,
    SetSpeed,
    SetLooping,
    SetNextOutput,
    OutputFormat,
    CurrentTime,
    Duration,
}

use SessionState as S;

const ALL_STATES: &[SessionState] = &SessionState::ALL;
const NOT_RELEASED: &[SessionState] = &[
    S::Idle,
    S::Configured,
    S::Preparing,
    S::Prepared,
    S::Running,
    S::Paused,
    S::Stopped,
    S::Error,
];
const ACTIVE: &[SessionState] = &[S::Prepared, S::Running, S::Paused];
const RUNNING: &[SessionState] = &[S::Running];

impl Operation {
    pub const ALL: [Operation; 23] = [
        Operation::Configure,
        Operation::Prepare,
        Operation::Start,
        Operation::Pause,
        Operation::Resume,
        Operation::Stop,
        Operation::Flush,
        Operation::Reset,
        Operation::Release,
        Operation::QueueInput,
        Operation::ReleaseOutput,
        Operation::NotifyEndOfStream,
        Operation::SetParameter,
        Operation::SetOutputSurface,
        Operation::CreateInputSurface,
        Operation::Seek,
        Operation::SetVolume,
        Operation::SetSpeed,
        Operation::SetLooping,
        Operation::SetNextOutput,
        Operation::OutputFormat,
        Operation::CurrentTime,
        Operation::Duration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Configure => "configure",
            Operation::Prepare => "prepare",
            Operation::Start => "start",
            Operation::Pause => "pause",
            Operation::Resume => "resume",
            Operation::Stop => "stop",
            Operation::Flush => "flush",
            Operation::Reset => "reset",
            Operation::Release => "release",
            Operation::QueueInput => "queue_input",
            Operation::ReleaseOutput => "release_output",
            Operation::NotifyEndOfStream => "notify_end_of_stream",
            Operation::SetParameter => "set_parameter",
            Operation::SetOutputSurface => "set_output_surface",
            Operation::CreateInputSurface => "create_input_surface",
            Operation::Seek => "seek",
            Operation::SetVolume => "set_volume",
            Operation::SetSpeed => "set_speed",
            Operation::SetLooping => "set_looping",
            Operation::SetNextOutput => "set_next_output",
            Operation::OutputFormat => "output_format",
            Operation::CurrentTime => "current_time",
            Operation::Duration => "duration",
        }
    }

    /// Source states from which the operation is valid
    pub fn allowed_in(&self) -> &'static [SessionState] {
        match self {
            Operation::Configure => &[S::Idle],
            Operation::Prepare => &[S::Configured, S::Stopped],
            Operation::Start => &[S::Prepared, S::Paused],
            Operation::Pause => RUNNING,
            Operation::Resume => &[S::Paused],
            Operation::Stop => &[S::Preparing, S::Running, S::Paused],
            Operation::Flush => RUNNING,
            Operation::Reset => NOT_RELEASED,
            Operation::Release => ALL_STATES,
            Operation::QueueInput | Operation::ReleaseOutput | Operation::NotifyEndOfStream => RUNNING,
            Operation::SetParameter => ACTIVE,
            Operation::SetOutputSurface | Operation::CreateInputSurface => &[S::Configured],
            Operation::Seek | Operation::SetVolume | Operation::SetSpeed => ACTIVE,
            Operation::SetLooping => &[S::Configured, S::Prepared, S::Running, S::Paused, S::Stopped],
            Operation::SetNextOutput => &[S::Configured, S::Prepared, S::Running, S::Paused],
            Operation::OutputFormat => &[
                S::Configured,
                S::Preparing,
                S::Prepared,
                S::Running,
                S::Paused,
                S::Stopped,
            ],
            Operation::CurrentTime | Operation::Duration => &[S::Prepared, S::Running, S::Paused, S::Stopped],
        }
    }

    /// Whether the operation means anything for this kind of session
    pub fn applies_to(&self, kind: SessionKind, media_type: MediaType) -> bool {
        use SessionKind::*;

        match self {
            Operation::Configure
            | Operation::Prepare
            | Operation::Start
            | Operation::Stop
            | Operation::Reset
            | Operation::Release
            | Operation::SetParameter
            | Operation::OutputFormat => true,
            Operation::Pause | Operation::Resume => matches!(kind, Player | Recorder),
            Operation::Flush | Operation::QueueInput | Operation::ReleaseOutput => kind.is_codec(),
            Operation::NotifyEndOfStream => kind == Encoder && media_type.has_video(),
            Operation::SetOutputSurface => kind == Player || (kind == Decoder && media_type.has_video()),
            Operation::CreateInputSurface => kind == Recorder || (kind == Encoder && media_type.has_video()),
            Operation::Seek
            | Operation::SetVolume
            | Operation::SetSpeed
            | Operation::SetLooping
            | Operation::CurrentTime
            | Operation::Duration => kind == Player,
            Operation::SetNextOutput => kind == Recorder,
        }
    }

    /// Operations that wait on the backend and may be preempted
    pub fn is_long_running(&self) -> bool {
        matches!(self, Operation::Configure | Operation::Prepare | Operation::Start)
    }

    /// Operations that cancel this one when they arrive while it is in flight
    pub fn preempted_by(&self) -> &'static [Operation] {
        match self {
            Operation::Prepare => &[Operation::Stop, Operation::Reset, Operation::Release],
            Operation::Configure | Operation::Start => &[Operation::Reset, Operation::Release],
            _ => &[],
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state plus the rules for leaving it
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: SessionState,
    kind: SessionKind,
    media_type: MediaType,
}

impl StateMachine {
    pub fn new(kind: SessionKind, media_type: MediaType) -> Self {
        Self {
            state: SessionState::Idle,
            kind,
            media_type,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Validate `operation` against the kind first, then the current state
    pub fn check(&self, operation: Operation) -> MediaResult<()> {
        if !operation.applies_to(self.kind, self.media_type) {
            return Err(MediaError::Unsupported(format!(
                "{} on a {} {} session",
                operation, self.media_type, self.kind
            )));
        }
        if !operation.allowed_in().contains(&self.state) {
            return Err(MediaError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    /// Move to `to`, returning the previous state. Edges outside the
    /// lifecycle graph are logged and applied anyway.
    pub fn transition(&mut self, to: SessionState) -> SessionState {
        let from = self.state;
        if from != to && !from.can_transition_to(to) {
            log::warn!("Unexpected {} session transition {} -> {}", self.kind, from, to);
        }
        self.state = to;
        from
    }
}
