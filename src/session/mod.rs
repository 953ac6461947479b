//! Sessions: one actor task per player, recorder or codec instance, reached
//! through cloneable façades that enqueue commands and return completions.

pub(crate) mod actor;
pub mod buffer;
pub mod codec;
pub mod completion;
pub mod events;
pub mod player;
pub mod recorder;
pub mod state;

pub use buffer::{BufferStats, Owner, SharedMemory};
pub use codec::CodecProcessor;
pub use completion::Completion;
pub use events::{EventHandler, EventHub, EventType, InfoKind, SessionEvent, SubscriptionId};
pub use player::Player;
pub use recorder::{Recorder, RecorderConfig};
pub use state::{Operation, SessionState};

use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use crate::backend::MediaBackend;
use crate::capability::CodecCapability;
use crate::config::EngineConfig;
use crate::error::{MediaError, MediaResult};
use crate::format::Format;
use crate::logging::SessionLogger;
use crate::models::{MediaType, SessionId, SessionKind, SessionStatus};
use actor::{ActorSetup, Command, SessionActor, SharedStatus};
use completion::Responder;

/// Everything needed to start a session actor
pub(crate) struct SessionSpec {
    pub kind: SessionKind,
    pub media_type: MediaType,
    pub backend: Box<dyn MediaBackend>,
    pub capability: Option<CodecCapability>,
    pub config: Arc<EngineConfig>,
    pub logger: SessionLogger,
}

/// Shared plumbing behind every façade. Cloning it shares the session; the
/// session is released once the last clone is dropped.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    kind: SessionKind,
    media_type: MediaType,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    shared: Arc<Mutex<SharedStatus>>,
    events: Arc<EventHub>,
    runtime: Handle,
}

impl SessionHandle {
    pub(crate) fn spawn(runtime: &Handle, spec: SessionSpec) -> Self {
        let id = SessionId::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let shared = Arc::new(Mutex::new(SharedStatus::default()));
        let events = Arc::new(EventHub::new());

        let actor = SessionActor::new(ActorSetup {
            id,
            kind: spec.kind,
            media_type: spec.media_type,
            backend: spec.backend,
            capability: spec.capability,
            config: spec.config,
            logger: spec.logger,
            events: Arc::clone(&events),
            state_tx,
            shared: Arc::clone(&shared),
            commands: commands_rx,
        });
        runtime.spawn(actor.run());

        Self {
            id,
            kind: spec.kind,
            media_type: spec.media_type,
            commands: commands_tx,
            state: state_rx,
            shared,
            events,
            runtime: runtime.clone(),
        }
    }

    /// Enqueue the command built by `make` and hand back its completion
    pub(crate) fn submit<T>(&self, make: impl FnOnce(Responder<T>) -> Command) -> Completion<T> {
        let (reply, completion) = completion::pair(self.runtime.clone());
        if let Err(mpsc::error::SendError(cmd)) = self.commands.send(make(reply)) {
            if self.state() == SessionState::Released || cmd.operation() == Operation::Release {
                cmd.reject_released();
            } else {
                cmd.fail(MediaError::ServiceDied(format!(
                    "{} session {} is no longer running",
                    self.kind,
                    self.id.short()
                )));
            }
        }
        completion
    }

    pub(crate) fn ready<T>(&self, result: MediaResult<T>) -> Completion<T> {
        Completion::ready(self.runtime.clone(), result)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn status(&self) -> SessionStatus {
        let (last_error, buffers, output_format) = match self.shared.lock() {
            Ok(shared) => (
                shared.last_error.clone(),
                shared.buffers.clone(),
                shared.output_format.clone(),
            ),
            Err(_) => (None, BufferStats::default(), None),
        };
        SessionStatus {
            id: self.id,
            kind: self.kind,
            media_type: self.media_type,
            state: self.state(),
            last_error,
            buffers,
            output_format,
        }
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Resolves with the first state that is `target`, `Error` or `Released`
    pub fn wait_for_state(&self, target: SessionState) -> Completion<SessionState> {
        let (reply, completion) = completion::pair(self.runtime.clone());
        let mut state = self.state.clone();
        self.runtime.spawn(async move {
            let reached = state
                .wait_for(|s| *s == target || matches!(s, SessionState::Error | SessionState::Released))
                .await
                .map(|s| *s)
                .map_err(|_| MediaError::ServiceDied("session state is no longer published".to_string()));
            reply.send(reached);
        });
        completion
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("media_type", &self.media_type)
            .field("state", &self.state())
            .finish()
    }
}

/// Operations shared by players, recorders and codec processors
pub trait MediaSession {
    fn handle(&self) -> &SessionHandle;

    fn id(&self) -> SessionId {
        self.handle().id()
    }

    fn kind(&self) -> SessionKind {
        self.handle().kind()
    }

    fn media_type(&self) -> MediaType {
        self.handle().media_type()
    }

    fn state(&self) -> SessionState {
        self.handle().state()
    }

    fn status(&self) -> SessionStatus {
        self.handle().status()
    }

    /// The most recent error reported by the session, if any
    fn last_error(&self) -> Option<MediaError> {
        self.handle().status().last_error
    }

    fn configure(&self, format: Format) -> Completion<()> {
        self.handle().submit(|reply| Command::Configure(format, reply))
    }

    fn prepare(&self) -> Completion<()> {
        self.handle().submit(Command::Prepare)
    }

    fn start(&self) -> Completion<()> {
        self.handle().submit(Command::Start)
    }

    fn stop(&self) -> Completion<()> {
        self.handle().submit(Command::Stop)
    }

    fn reset(&self) -> Completion<()> {
        self.handle().submit(Command::Reset)
    }

    fn release(&self) -> Completion<()> {
        self.handle().submit(Command::Release)
    }

    fn set_parameter(&self, format: Format) -> Completion<()> {
        self.handle().submit(|reply| Command::SetParameter(format, reply))
    }

    fn output_format(&self) -> Completion<Format> {
        self.handle().submit(Command::OutputFormat)
    }

    fn subscribe<F>(&self, event_type: EventType, handler: F) -> Option<SubscriptionId>
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
        Self: Sized,
    {
        self.handle().events().subscribe(event_type, Arc::new(handler))
    }

    /// Receive the listed event types, or every type when the list is empty
    fn subscribe_channel(
        &self,
        event_types: &[EventType],
    ) -> Option<(SubscriptionId, mpsc::UnboundedReceiver<SessionEvent>)> {
        self.handle().events().subscribe_channel(event_types)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.handle().events().unsubscribe(id)
    }

    fn wait_for_state(&self, target: SessionState) -> Completion<SessionState> {
        self.handle().wait_for_state(target)
    }
}
