//! The task that owns a session. Every façade call becomes a [`Command`];
//! the actor validates it against the state machine, drives the backend and
//! the buffer pool, and publishes what happened through the event hub.

use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::backend::{BackendEvent, BackendNotifier, MediaBackend};
use crate::capability::{CapabilityTable, CodecCapability};
use crate::config::EngineConfig;
use crate::error::{MediaError, MediaResult};
use crate::format::{keys, Format};
use crate::logging::{OperationTimer, SessionLogger};
use crate::models::{
    BufferFlags, BufferIndex, BufferInfo, MediaType, MediaUri, PlaybackSpeed, SeekMode, SessionId, SessionKind,
    SurfaceId,
};
use crate::session::buffer::{BufferPool, BufferStats};
use crate::session::completion::Responder;
use crate::session::events::{EventHub, InfoKind, SessionEvent};
use crate::session::state::{Operation, SessionState, StateMachine};

const DEFAULT_AUDIO_ENCODER: &str = "audio/mp4a-latm";
const DEFAULT_VIDEO_ENCODER: &str = "video/avc";

/// A request queued to the actor together with the way to answer it
pub(crate) enum Command {
    Configure(Format, Responder<()>),
    Prepare(Responder<()>),
    Start(Responder<()>),
    Pause(Responder<()>),
    Resume(Responder<()>),
    Stop(Responder<()>),
    Flush(Responder<()>),
    Reset(Responder<()>),
    Release(Responder<()>),
    QueueInput {
        index: BufferIndex,
        info: BufferInfo,
        flags: BufferFlags,
        reply: Responder<()>,
    },
    ReleaseOutput {
        index: BufferIndex,
        render: bool,
        reply: Responder<()>,
    },
    NotifyEndOfStream(Responder<()>),
    SetParameter(Format, Responder<()>),
    SetOutputSurface(SurfaceId, Responder<()>),
    CreateInputSurface(Responder<SurfaceId>),
    Seek {
        position: Duration,
        mode: SeekMode,
        reply: Responder<Duration>,
    },
    SetVolume {
        left: f32,
        right: f32,
        reply: Responder<()>,
    },
    SetSpeed(PlaybackSpeed, Responder<()>),
    SetLooping(bool, Responder<()>),
    SetNextOutput(MediaUri, Responder<()>),
    OutputFormat(Responder<Format>),
    CurrentTime(Responder<Duration>),
    Duration(Responder<Option<Duration>>),
}

impl Command {
    pub(crate) fn operation(&self) -> Operation {
        match self {
            Command::Configure(..) => Operation::Configure,
            Command::Prepare(_) => Operation::Prepare,
            Command::Start(_) => Operation::Start,
            Command::Pause(_) => Operation::Pause,
            Command::Resume(_) => Operation::Resume,
            Command::Stop(_) => Operation::Stop,
            Command::Flush(_) => Operation::Flush,
            Command::Reset(_) => Operation::Reset,
            Command::Release(_) => Operation::Release,
            Command::QueueInput { .. } => Operation::QueueInput,
            Command::ReleaseOutput { .. } => Operation::ReleaseOutput,
            Command::NotifyEndOfStream(_) => Operation::NotifyEndOfStream,
            Command::SetParameter(..) => Operation::SetParameter,
            Command::SetOutputSurface(..) => Operation::SetOutputSurface,
            Command::CreateInputSurface(_) => Operation::CreateInputSurface,
            Command::Seek { .. } => Operation::Seek,
            Command::SetVolume { .. } => Operation::SetVolume,
            Command::SetSpeed(..) => Operation::SetSpeed,
            Command::SetLooping(..) => Operation::SetLooping,
            Command::SetNextOutput(..) => Operation::SetNextOutput,
            Command::OutputFormat(_) => Operation::OutputFormat,
            Command::CurrentTime(_) => Operation::CurrentTime,
            Command::Duration(_) => Operation::Duration,
        }
    }

    pub(crate) fn fail(self, err: MediaError) {
        match self {
            Command::Configure(_, reply)
            | Command::Prepare(reply)
            | Command::Start(reply)
            | Command::Pause(reply)
            | Command::Resume(reply)
            | Command::Stop(reply)
            | Command::Flush(reply)
            | Command::Reset(reply)
            | Command::Release(reply)
            | Command::QueueInput { reply, .. }
            | Command::ReleaseOutput { reply, .. }
            | Command::NotifyEndOfStream(reply)
            | Command::SetParameter(_, reply)
            | Command::SetOutputSurface(_, reply)
            | Command::SetVolume { reply, .. }
            | Command::SetSpeed(_, reply)
            | Command::SetLooping(_, reply)
            | Command::SetNextOutput(_, reply) => reply.fail(err),
            Command::CreateInputSurface(reply) => reply.fail(err),
            Command::Seek { reply, .. } => reply.fail(err),
            Command::OutputFormat(reply) => reply.fail(err),
            Command::CurrentTime(reply) => reply.fail(err),
            Command::Duration(reply) => reply.fail(err),
        }
    }

    /// Answer a command that reached a session which no longer exists.
    /// Releasing twice is not an error.
    pub(crate) fn reject_released(self) {
        match self {
            Command::Release(reply) => reply.ok(),
            other => {
                let operation = other.operation();
                other.fail(MediaError::InvalidState {
                    operation,
                    state: SessionState::Released,
                });
            }
        }
    }
}

/// Status fields readable without a round trip through the actor
#[derive(Debug, Default)]
pub(crate) struct SharedStatus {
    pub last_error: Option<MediaError>,
    pub buffers: BufferStats,
    pub output_format: Option<Format>,
}

/// Everything the actor reads from
pub(crate) struct Inbox {
    commands: mpsc::UnboundedReceiver<Command>,
    commands_open: bool,
    /// Commands that arrived while a long-running operation was in flight
    deferred: VecDeque<Command>,
    backend_events: mpsc::UnboundedReceiver<BackendEvent>,
    /// Backend events that arrived while a long-running operation was in flight
    stashed: VecDeque<BackendEvent>,
}

impl Inbox {
    pub(crate) fn new(
        commands: mpsc::UnboundedReceiver<Command>,
        backend_events: mpsc::UnboundedReceiver<BackendEvent>,
    ) -> Self {
        Self {
            commands,
            commands_open: true,
            deferred: VecDeque::new(),
            backend_events,
            stashed: VecDeque::new(),
        }
    }

    /// Move the first queued preemptor to the front of the deferred queue
    fn take_preemptor(&mut self, preemptors: &[Operation]) -> Option<Operation> {
        let position = self
            .deferred
            .iter()
            .position(|cmd| preemptors.contains(&cmd.operation()))?;
        let cmd = self.deferred.remove(position)?;
        let operation = cmd.operation();
        self.deferred.push_front(cmd);
        Some(operation)
    }
}

/// Drive `fut` to completion under `timeout` while still listening for
/// commands. A command listed in `preemptors` cancels the operation and is
/// queued to run next; anything else waits until the operation is over.
async fn run_cancellable<T, F>(
    inbox: &mut Inbox,
    operation: Operation,
    preemptors: &[Operation],
    timeout: Duration,
    fut: F,
) -> MediaResult<T>
where
    F: Future<Output = MediaResult<T>>,
{
    if let Some(by) = inbox.take_preemptor(preemptors) {
        return Err(MediaError::Cancelled { operation, by });
    }

    let fut = tokio::time::timeout(timeout, fut);
    tokio::pin!(fut);

    loop {
        tokio::select! {
            biased;

            cmd = inbox.commands.recv(), if inbox.commands_open => match cmd {
                Some(cmd) => {
                    let by = cmd.operation();
                    if preemptors.contains(&by) {
                        inbox.deferred.push_front(cmd);
                        return Err(MediaError::Cancelled { operation, by });
                    }
                    inbox.deferred.push_back(cmd);
                }
                None => {
                    // every handle is gone; the session is about to be released
                    inbox.commands_open = false;
                    return Err(MediaError::Cancelled { operation, by: Operation::Release });
                }
            },
            Some(event) = inbox.backend_events.recv() => match event {
                BackendEvent::Error(err) => return Err(err),
                other => inbox.stashed.push_back(other),
            },
            result = &mut fut => {
                return result.unwrap_or(Err(MediaError::Timeout { operation, after: timeout }));
            }
        }
    }
}

/// Run a backend call that cannot be cancelled, bounded by the engine timeout
async fn bounded<T, F>(operation: Operation, timeout: Duration, fut: F) -> MediaResult<T>
where
    F: Future<Output = MediaResult<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or(Err(MediaError::Timeout { operation, after: timeout }))
}

enum Flow {
    Continue,
    Exit,
}

enum PendingOutput {
    FormatChange(Format),
    Frame {
        data: Vec<u8>,
        presentation_time_us: i64,
        flags: BufferFlags,
    },
}

#[derive(Debug, Default)]
struct LimitProgress {
    approaching: bool,
    reached: bool,
}

#[derive(Debug, Default)]
struct RecorderLimits {
    max_duration: Option<Duration>,
    max_file_size: Option<u64>,
    duration: LimitProgress,
    file_size: LimitProgress,
}

impl RecorderLimits {
    fn from_format(format: &Format) -> Self {
        Self {
            max_duration: format
                .get_int(keys::MAX_DURATION)
                .filter(|ms| *ms > 0)
                .map(|ms| Duration::from_millis(ms as u64)),
            max_file_size: format.get_int(keys::MAX_FILE_SIZE).filter(|b| *b > 0).map(|b| b as u64),
            ..Self::default()
        }
    }
}

fn at_ninety_percent(value: u128, limit: u128) -> bool {
    value.saturating_mul(10) >= limit.saturating_mul(9)
}

/// Construction parameters of a session actor
pub(crate) struct ActorSetup {
    pub id: SessionId,
    pub kind: SessionKind,
    pub media_type: MediaType,
    pub backend: Box<dyn MediaBackend>,
    pub capability: Option<CodecCapability>,
    pub config: Arc<EngineConfig>,
    pub logger: SessionLogger,
    pub events: Arc<EventHub>,
    pub state_tx: watch::Sender<SessionState>,
    pub shared: Arc<Mutex<SharedStatus>>,
    pub commands: mpsc::UnboundedReceiver<Command>,
}

pub(crate) struct SessionActor {
    id: SessionId,
    kind: SessionKind,
    media_type: MediaType,
    machine: StateMachine,
    backend: Box<dyn MediaBackend>,
    capability: Option<CodecCapability>,
    config: Arc<EngineConfig>,
    logger: SessionLogger,
    events: Arc<EventHub>,
    state_tx: watch::Sender<SessionState>,
    shared: Arc<Mutex<SharedStatus>>,
    inbox: Inbox,
    // keeps the backend channel open for the lifetime of the actor
    _notifier: BackendNotifier,

    configured: Option<Format>,
    output_format: Option<Format>,
    pool: Option<BufferPool>,
    pending: VecDeque<PendingOutput>,
    input_eos: bool,
    output_eos: bool,
    input_surface: Option<SurfaceId>,
    output_surface: Option<SurfaceId>,
    first_frame_rendered: bool,
    limits: RecorderLimits,
    next_output: Option<MediaUri>,
}

impl SessionActor {
    pub(crate) fn new(setup: ActorSetup) -> Self {
        let ActorSetup {
            id,
            kind,
            media_type,
            mut backend,
            capability,
            config,
            logger,
            events,
            state_tx,
            shared,
            commands,
        } = setup;

        let (notifier, backend_events) = BackendNotifier::channel();
        backend.attach(notifier.clone());
        logger.log_session_created(&id, kind, backend.name());

        Self {
            id,
            kind,
            media_type,
            machine: StateMachine::new(kind, media_type),
            backend,
            capability,
            config,
            logger,
            events,
            state_tx,
            shared,
            inbox: Inbox::new(commands, backend_events),
            _notifier: notifier,
            configured: None,
            output_format: None,
            pool: None,
            pending: VecDeque::new(),
            input_eos: false,
            output_eos: false,
            input_surface: None,
            output_surface: None,
            first_frame_rendered: false,
            limits: RecorderLimits::default(),
            next_output: None,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            if let Some(event) = self.inbox.stashed.pop_front() {
                self.on_backend_event(event).await;
                self.sync_status();
                continue;
            }
            if let Some(cmd) = self.inbox.deferred.pop_front() {
                if let Flow::Exit = self.dispatch(cmd).await {
                    break;
                }
                continue;
            }
            if !self.inbox.commands_open {
                debug!("{} session {} dropped by every handle", self.kind, self.id.short());
                self.release().await;
                break;
            }

            tokio::select! {
                biased;

                Some(event) = self.inbox.backend_events.recv() => {
                    self.on_backend_event(event).await;
                    self.sync_status();
                }
                cmd = self.inbox.commands.recv() => match cmd {
                    Some(cmd) => {
                        if let Flow::Exit = self.dispatch(cmd).await {
                            break;
                        }
                    }
                    None => self.inbox.commands_open = false,
                },
            }
        }

        self.inbox.commands.close();
        for cmd in self.inbox.deferred.drain(..) {
            cmd.reject_released();
        }
        while let Ok(cmd) = self.inbox.commands.try_recv() {
            cmd.reject_released();
        }
    }

    async fn dispatch(&mut self, cmd: Command) -> Flow {
        let operation = cmd.operation();
        trace!("{} session {}: {}", self.kind, self.id.short(), operation);

        let cmd = match cmd {
            Command::Release(reply) => {
                self.release().await;
                reply.ok();
                return Flow::Exit;
            }
            other => other,
        };
        if let Err(err) = self.machine.check(operation) {
            debug!("{} session {} rejected {}: {}", self.kind, self.id.short(), operation, err);
            cmd.fail(err);
            return Flow::Continue;
        }

        let timer = operation.is_long_running().then(|| OperationTimer::new(operation));

        match cmd {
            Command::Configure(format, reply) => reply.send(self.configure(format).await),
            Command::Prepare(reply) => reply.send(self.prepare().await),
            Command::Start(reply) => reply.send(self.start().await),
            Command::Pause(reply) => reply.send(self.pause().await),
            Command::Resume(reply) => reply.send(self.resume().await),
            Command::Stop(reply) => reply.send(self.stop().await),
            Command::Flush(reply) => reply.send(self.flush().await),
            Command::Reset(reply) => reply.send(self.reset().await),
            Command::Release(reply) => reply.ok(),
            Command::QueueInput {
                index,
                info,
                flags,
                reply,
            } => reply.send(self.queue_input(index, info, flags)),
            Command::ReleaseOutput { index, render, reply } => reply.send(self.release_output(index, render)),
            Command::NotifyEndOfStream(reply) => reply.send(self.notify_end_of_stream()),
            Command::SetParameter(format, reply) => reply.send(self.set_parameter(format)),
            Command::SetOutputSurface(surface, reply) => reply.send(self.set_output_surface(surface)),
            Command::CreateInputSurface(reply) => reply.send(self.create_input_surface()),
            Command::Seek { position, mode, reply } => reply.send(self.seek(position, mode)),
            Command::SetVolume { left, right, reply } => reply.send(self.set_volume(left, right)),
            Command::SetSpeed(speed, reply) => reply.send(self.set_speed(speed)),
            Command::SetLooping(looping, reply) => reply.send(self.backend.set_looping(looping)),
            Command::SetNextOutput(uri, reply) => reply.send(self.set_next_output(uri)),
            Command::OutputFormat(reply) => reply.send(self.current_output_format()),
            Command::CurrentTime(reply) => reply.send(Ok(self.backend.position())),
            Command::Duration(reply) => reply.send(Ok(self.backend.duration())),
        }

        if let Some(timer) = timer {
            let threshold = self.config.operation_timeout() / 2;
            timer.finish_with_threshold(&self.logger, &self.id, threshold);
        }
        self.sync_status();
        Flow::Continue
    }

    fn timeout(&self) -> Duration {
        self.config.operation_timeout()
    }

    fn preemptors(&self, operation: Operation) -> Vec<Operation> {
        operation
            .preempted_by()
            .iter()
            .copied()
            .filter(|op| *op != Operation::Reset || self.config.features.async_reset)
            .collect()
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.machine.transition(to);
        if from == to {
            return;
        }
        self.state_tx.send_replace(to);
        self.logger.log_transition(&self.id, from, to);
        self.events.publish(&SessionEvent::StateChanged { from, to });
    }

    fn publish_info(&self, info: InfoKind) {
        debug!("{} session {}: {}", self.kind, self.id.short(), info);
        self.events.publish(&SessionEvent::Info(info));
    }

    /// Record `err` as the sticky error and broadcast it
    fn report_error(&self, err: &MediaError) {
        self.logger.log_session_error(&self.id, err);
        if let Ok(mut shared) = self.shared.lock() {
            shared.last_error = Some(err.clone());
        }
        self.events.publish(&SessionEvent::Error(err.clone()));
    }

    /// Fatal errors move the session to `Error`; others are only reported
    fn handle_error(&mut self, err: &MediaError) {
        if let MediaError::Cancelled { .. } = err {
            return;
        }
        if err.is_session_fatal() {
            self.report_error(err);
            self.transition(SessionState::Error);
        }
    }

    /// Report an error raised outside any request
    fn raise(&mut self, err: &MediaError) {
        if err.is_session_fatal() && self.machine.state() != SessionState::Error {
            self.handle_error(err);
        } else {
            self.report_error(err);
        }
    }

    fn sync_status(&self) {
        let Ok(mut shared) = self.shared.lock() else {
            return;
        };
        if let Some(pool) = &self.pool {
            shared.buffers = pool.stats();
            shared.buffers.pending_outputs = self.pending.len();
        }
        if shared.output_format != self.output_format {
            shared.output_format = self.output_format.clone();
        }
    }

    fn clear_stream_state(&mut self) {
        self.pending.clear();
        self.input_eos = false;
        self.output_eos = false;
        self.first_frame_rendered = false;
    }

    // configuration

    async fn configure(&mut self, format: Format) -> MediaResult<()> {
        let format = format.normalized();
        self.validate_configuration(&format)?;

        let preemptors = self.preemptors(Operation::Configure);
        let timeout = self.timeout();
        let fut = self.backend.configure(&format);
        let result = run_cancellable(&mut self.inbox, Operation::Configure, &preemptors, timeout, fut).await;

        match result {
            Ok(()) => {
                if self.kind == SessionKind::Recorder {
                    self.limits = RecorderLimits::from_format(&format);
                }
                self.configured = Some(format);
                self.transition(SessionState::Configured);
                Ok(())
            }
            Err(err) => {
                self.handle_error(&err);
                Err(err)
            }
        }
    }

    fn validate_configuration(&self, format: &Format) -> MediaResult<()> {
        format.validate_types()?;

        match self.kind {
            SessionKind::Encoder | SessionKind::Decoder => self.validate_codec_format(format),
            SessionKind::Player => {
                let uri = format
                    .get_str(keys::URI)
                    .ok_or_else(|| MediaError::invalid_argument("player needs a source uri"))?;
                MediaUri::parse(uri).map(|_| ())
            }
            SessionKind::Recorder => self.validate_recorder_format(format),
        }
    }

    fn validate_codec_format(&self, format: &Format) -> MediaResult<()> {
        let capability = self
            .capability
            .as_ref()
            .ok_or_else(|| MediaError::Unknown("codec session without a capability".to_string()))?;

        if let Some(mime) = format.mime() {
            if mime != capability.mime {
                return Err(MediaError::invalid_argument(format!(
                    "{} handles {}, not {}",
                    capability.name, capability.mime, mime
                )));
            }
        }

        let required: &[&str] = if self.media_type.has_video() {
            &[keys::WIDTH, keys::HEIGHT]
        } else {
            &[keys::SAMPLE_RATE, keys::CHANNEL_COUNT]
        };
        if let Some(missing) = required.iter().find(|key| !format.contains_key(key)) {
            return Err(MediaError::invalid_argument(format!("{} is required", missing)));
        }

        self.check_buffer_size(format)?;
        capability.validate(format)
    }

    /// `max_input_size` sizes every buffer of the pool; zero leaves it to the engine
    fn check_buffer_size(&self, format: &Format) -> MediaResult<()> {
        let Some(size) = format.get_int(keys::MAX_INPUT_SIZE) else {
            return Ok(());
        };
        let max = self.config.max_buffer_capacity;
        if size < 0 || size as u64 > max as u64 {
            return Err(MediaError::ParameterOutOfRange {
                key: keys::MAX_INPUT_SIZE.to_string(),
                value: size.to_string(),
                min: "0".to_string(),
                max: max.to_string(),
            });
        }
        Ok(())
    }

    fn validate_recorder_format(&self, format: &Format) -> MediaResult<()> {
        let output = format
            .get_str(keys::OUTPUT_URI)
            .ok_or_else(|| MediaError::invalid_argument("recorder needs an output_uri"))?;
        MediaUri::parse(output)?;

        let has_audio = format.contains_key(keys::AUDIO_SOURCE);
        let has_video = format.contains_key(keys::VIDEO_SOURCE);
        if !has_audio && !has_video {
            return Err(MediaError::invalid_argument("recorder needs an audio or video source"));
        }
        for key in [keys::MAX_DURATION, keys::MAX_FILE_SIZE] {
            if format.get_int(key).map_or(false, |v| v < 0) {
                return Err(MediaError::invalid_argument(format!("{} must not be negative", key)));
            }
        }

        let table = CapabilityTable::global();
        if has_audio {
            let mime = format.get_str(keys::AUDIO_CODEC_MIME).unwrap_or(DEFAULT_AUDIO_ENCODER);
            let mut track = format.select(&[keys::SAMPLE_RATE, keys::CHANNEL_COUNT]);
            track.set(keys::CODEC_MIME, mime);
            if let Some(bitrate) = format.get_int(keys::AUDIO_BITRATE) {
                track.set(keys::BITRATE, bitrate);
            }
            if table.find_encoder(MediaType::Audio, &track)?.is_none() {
                return Err(MediaError::unsupported(format!("no audio encoder for {}", track)));
            }
        }
        if has_video {
            let mime = format.get_str(keys::VIDEO_CODEC_MIME).unwrap_or(DEFAULT_VIDEO_ENCODER);
            let mut track = format.select(&[keys::WIDTH, keys::HEIGHT, keys::FRAME_RATE]);
            track.set(keys::CODEC_MIME, mime);
            if let Some(bitrate) = format.get_int(keys::VIDEO_BITRATE) {
                track.set(keys::BITRATE, bitrate);
            }
            if table.find_encoder(MediaType::Video, &track)?.is_none() {
                return Err(MediaError::unsupported(format!("no video encoder for {}", track)));
            }
        }
        Ok(())
    }

    fn set_parameter(&mut self, format: Format) -> MediaResult<()> {
        let format = format.normalized();
        format.validate_types()?;
        if let Some(capability) = &self.capability {
            self.check_buffer_size(&format)?;
            capability.validate(&format)?;
        }
        self.backend.set_parameter(&format)?;
        if let Some(configured) = self.configured.as_mut() {
            configured.merge(&format);
        }
        Ok(())
    }

    fn set_output_surface(&mut self, surface: SurfaceId) -> MediaResult<()> {
        self.backend.set_output_surface(&surface)?;
        if let Some(configured) = self.configured.as_mut() {
            configured.set(keys::SURFACE, surface.as_str());
        }
        debug!("{} session {} renders to {}", self.kind, self.id.short(), surface);
        self.output_surface = Some(surface);
        Ok(())
    }

    fn create_input_surface(&mut self) -> MediaResult<SurfaceId> {
        let surface = self.backend.create_input_surface()?;
        debug!("{} session {} reads from {}", self.kind, self.id.short(), surface);
        self.input_surface = Some(surface.clone());
        Ok(surface)
    }

    fn current_output_format(&self) -> MediaResult<Format> {
        self.output_format.clone().ok_or(MediaError::InvalidState {
            operation: Operation::OutputFormat,
            state: self.machine.state(),
        })
    }

    // lifecycle

    async fn prepare(&mut self) -> MediaResult<()> {
        let previous = self.machine.state();
        let mut format = self.configured.clone().ok_or(MediaError::InvalidState {
            operation: Operation::Prepare,
            state: previous,
        })?;

        let mut pool = None;
        if self.kind.is_codec() {
            let capacity = format
                .get_int(keys::MAX_INPUT_SIZE)
                .filter(|size| *size > 0)
                .map(|size| size as usize)
                .unwrap_or(self.config.buffer_capacity);
            format.set(keys::MAX_INPUT_SIZE, capacity as i64);

            let inputs = if self.input_surface.is_some() { 0 } else { self.config.input_buffer_count };
            let outputs = if self.output_surface.is_some() { 0 } else { self.config.output_buffer_count };
            match BufferPool::allocate(inputs, outputs, capacity) {
                Ok(allocated) => pool = Some(allocated),
                Err(err) => {
                    self.handle_error(&err);
                    return Err(err);
                }
            }
        }

        self.transition(SessionState::Preparing);
        let preemptors = self.preemptors(Operation::Prepare);
        let timeout = self.timeout();
        let fut = self.backend.prepare(&format);
        let result = run_cancellable(&mut self.inbox, Operation::Prepare, &preemptors, timeout, fut).await;

        match result {
            Ok(()) => {
                self.pool = pool;
                self.clear_stream_state();
                // a recording prepared again after a stop gets fresh limits
                self.limits.duration = LimitProgress::default();
                self.limits.file_size = LimitProgress::default();
                self.configured = Some(format);
                self.transition(SessionState::Prepared);
                Ok(())
            }
            // the cancelling command finishes the transition
            Err(err @ MediaError::Cancelled { .. }) => Err(err),
            Err(err) => {
                if err.is_session_fatal() {
                    self.handle_error(&err);
                } else {
                    self.transition(previous);
                }
                Err(err)
            }
        }
    }

    async fn start(&mut self) -> MediaResult<()> {
        let resuming = self.machine.state() == SessionState::Paused;
        let preemptors = self.preemptors(Operation::Start);
        let timeout = self.timeout();
        let fut = if resuming {
            self.backend.resume()
        } else {
            self.backend.start()
        };
        let result = run_cancellable(&mut self.inbox, Operation::Start, &preemptors, timeout, fut).await;

        if let Err(err) = result {
            self.handle_error(&err);
            return Err(err);
        }
        self.transition(SessionState::Running);
        if !resuming {
            self.grant_inputs();
        }
        Ok(())
    }

    async fn pause(&mut self) -> MediaResult<()> {
        let result = bounded(Operation::Pause, self.timeout(), self.backend.pause()).await;
        if let Err(err) = result {
            self.handle_error(&err);
            return Err(err);
        }
        self.transition(SessionState::Paused);
        Ok(())
    }

    async fn resume(&mut self) -> MediaResult<()> {
        let result = bounded(Operation::Resume, self.timeout(), self.backend.resume()).await;
        if let Err(err) = result {
            self.handle_error(&err);
            return Err(err);
        }
        self.transition(SessionState::Running);
        Ok(())
    }

    async fn stop(&mut self) -> MediaResult<()> {
        if self.machine.state() == SessionState::Preparing {
            // the prepare this stop cancelled never allocated anything
            self.transition(SessionState::Stopped);
            return Ok(());
        }

        let result = bounded(Operation::Stop, self.timeout(), self.backend.stop()).await;
        if let Err(err) = result {
            self.handle_error(&err);
            return Err(err);
        }
        self.stop_stream();
        Ok(())
    }

    /// Take every buffer back and settle in `Stopped`
    fn stop_stream(&mut self) {
        if let Some(pool) = self.pool.as_mut() {
            let reclaimed = pool.reclaim_all();
            if reclaimed > 0 {
                debug!(
                    "{} session {} reclaimed {} buffer(s) from the caller",
                    self.kind,
                    self.id.short(),
                    reclaimed
                );
            }
        }
        self.clear_stream_state();
        self.sync_status();
        self.pool = None;
        self.transition(SessionState::Stopped);
    }

    async fn flush(&mut self) -> MediaResult<()> {
        let result = bounded(Operation::Flush, self.timeout(), self.backend.flush()).await;
        if let Err(err) = result {
            self.handle_error(&err);
            return Err(err);
        }

        // frames the backend produced before the flush are stale
        while let Ok(event) = self.inbox.backend_events.try_recv() {
            if !matches!(event, BackendEvent::Output { .. }) {
                self.inbox.stashed.push_back(event);
            }
        }
        self.inbox
            .stashed
            .retain(|event| !matches!(event, BackendEvent::Output { .. }));

        // every index the caller holds is void after a flush
        if let Some(pool) = self.pool.as_mut() {
            let reclaimed = pool.reclaim_all();
            debug!("{} session {} flushed {} buffer(s)", self.kind, self.id.short(), reclaimed);
        }
        // queued frames are dropped, a queued format change still takes effect
        let format_change = self.pending.drain(..).rev().find_map(|pending| match pending {
            PendingOutput::FormatChange(format) => Some(format),
            PendingOutput::Frame { .. } => None,
        });
        self.clear_stream_state();
        if let Some(format) = format_change {
            self.apply_output_format(format);
        }
        self.grant_inputs();
        Ok(())
    }

    async fn reset(&mut self) -> MediaResult<()> {
        let result = bounded(Operation::Reset, self.timeout(), self.backend.reset()).await;

        self.configured = None;
        self.output_format = None;
        self.pool = None;
        self.clear_stream_state();
        self.input_surface = None;
        self.output_surface = None;
        self.limits = RecorderLimits::default();
        self.next_output = None;

        match result {
            Err(err) if err.is_session_fatal() => {
                self.handle_error(&err);
                Err(err)
            }
            other => {
                if let Ok(mut shared) = self.shared.lock() {
                    shared.last_error = None;
                    shared.buffers = BufferStats::default();
                }
                self.transition(SessionState::Idle);
                other
            }
        }
    }

    async fn release(&mut self) {
        if let Err(err) = bounded(Operation::Release, self.timeout(), self.backend.release()).await {
            warn!("{} session {} release: {}", self.kind, self.id.short(), err);
        }
        self.pool = None;
        self.pending.clear();
        self.output_format = None;
        self.sync_status();
        self.transition(SessionState::Released);
        self.events.close();
        self.logger.log_released(&self.id);
    }

    // buffer exchange

    fn grant_inputs(&mut self) {
        if self.input_eos || self.input_surface.is_some() {
            return;
        }
        while let Some((index, memory)) = self.pool.as_mut().and_then(BufferPool::grant_input) {
            trace!("{} session {} granted input {}", self.kind, self.id.short(), index);
            self.events.publish(&SessionEvent::InputAvailable { index, memory });
        }
    }

    fn queue_input(&mut self, index: BufferIndex, info: BufferInfo, flags: BufferFlags) -> MediaResult<()> {
        if self.input_surface.is_some() {
            return Err(MediaError::unsupported("input comes from the input surface"));
        }
        let pool = self.pool.as_mut().ok_or(MediaError::InvalidState {
            operation: Operation::QueueInput,
            state: self.machine.state(),
        })?;
        let data = pool.take_input(index, info)?;

        if self.input_eos {
            pool.recycle_input(index);
            return Err(MediaError::invalid_argument("end of stream was already queued"));
        }

        debug!(
            "{} session {} queued input {}: {} bytes flags={}",
            self.kind,
            self.id.short(),
            index,
            data.len(),
            flags
        );
        let result = self.backend.queue_input(&data, info, flags);
        if let Some(pool) = self.pool.as_mut() {
            pool.recycle_input(index);
        }
        if let Err(err) = result {
            self.handle_error(&err);
            if self.machine.state() == SessionState::Running {
                self.grant_inputs();
            }
            return Err(err);
        }

        if flags.is_end_of_stream() {
            self.input_eos = true;
        } else {
            self.grant_inputs();
        }
        Ok(())
    }

    fn notify_end_of_stream(&mut self) -> MediaResult<()> {
        if self.input_surface.is_none() {
            return Err(MediaError::unsupported(
                "byte-buffer input ends with an end-of-stream flagged queue_input",
            ));
        }
        if self.input_eos {
            return Err(MediaError::invalid_argument("end of stream was already signalled"));
        }
        self.backend.signal_end_of_input()?;
        self.input_eos = true;
        Ok(())
    }

    fn release_output(&mut self, index: BufferIndex, render: bool) -> MediaResult<()> {
        if self.output_surface.is_some() {
            return Err(MediaError::unsupported("outputs go straight to the output surface"));
        }
        let pool = self.pool.as_mut().ok_or(MediaError::InvalidState {
            operation: Operation::ReleaseOutput,
            state: self.machine.state(),
        })?;

        if render && self.media_type.has_video() {
            let (data, info) = pool.read_output(index)?;
            self.backend.render(None, &data, &info)?;
            if let Some(pool) = self.pool.as_mut() {
                pool.record_rendered();
            }
            if !self.first_frame_rendered {
                self.first_frame_rendered = true;
                self.publish_info(InfoKind::FirstFrameRendered);
            }
        }

        if let Some(pool) = self.pool.as_mut() {
            pool.release_output(index)?;
        }
        self.drain_pending()
    }

    /// Deliver waiting frames while output slots are free
    fn drain_pending(&mut self) -> MediaResult<()> {
        while let Some(next) = self.pending.pop_front() {
            match next {
                PendingOutput::FormatChange(format) => self.apply_output_format(format),
                PendingOutput::Frame {
                    data,
                    presentation_time_us,
                    flags,
                } => {
                    if !self.deliver_output(&data, presentation_time_us, flags)? {
                        self.pending.push_front(PendingOutput::Frame {
                            data,
                            presentation_time_us,
                            flags,
                        });
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Copy one frame into a free output slot. `Ok(false)` when none is free.
    fn deliver_output(&mut self, data: &[u8], presentation_time_us: i64, flags: BufferFlags) -> MediaResult<bool> {
        let Some(pool) = self.pool.as_mut() else {
            return Ok(false);
        };
        match pool.fill_output(data, presentation_time_us)? {
            Some((index, info, memory)) => {
                trace!(
                    "{} session {} output {}: {} bytes pts={} flags={}",
                    self.kind,
                    self.id.short(),
                    index,
                    info.size,
                    presentation_time_us,
                    flags
                );
                self.events.publish(&SessionEvent::OutputAvailable {
                    index,
                    info,
                    flags,
                    memory,
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn apply_output_format(&mut self, format: Format) {
        let merged = match &self.configured {
            Some(configured) => configured.merged(&format),
            None => format,
        };
        debug!("{} session {} output format {}", self.kind, self.id.short(), merged);
        self.output_format = Some(merged.clone());
        self.sync_status();
        self.events.publish(&SessionEvent::OutputFormatChanged(merged));
    }

    fn on_output(&mut self, data: Vec<u8>, presentation_time_us: i64, flags: BufferFlags) -> MediaResult<()> {
        if self.output_eos {
            debug!(
                "{} session {} dropped an output after end of stream",
                self.kind,
                self.id.short()
            );
            return Ok(());
        }
        if flags.is_end_of_stream() {
            self.output_eos = true;
        }

        if let Some(surface) = self.output_surface.clone() {
            if !data.is_empty() {
                let info = BufferInfo::sized(data.len(), presentation_time_us);
                self.backend.render(Some(&surface), &data, &info)?;
                if let Some(pool) = self.pool.as_mut() {
                    pool.record_rendered();
                }
                if !self.first_frame_rendered {
                    self.first_frame_rendered = true;
                    self.publish_info(InfoKind::FirstFrameRendered);
                }
            }
            if flags.is_end_of_stream() {
                self.publish_info(InfoKind::EndOfStream);
            }
            return Ok(());
        }

        if self.pending.is_empty() && self.deliver_output(&data, presentation_time_us, flags)? {
            return Ok(());
        }
        self.pending.push_back(PendingOutput::Frame {
            data,
            presentation_time_us,
            flags,
        });
        self.logger.log_backpressure(&self.id, self.pending.len());
        Ok(())
    }

    // player

    fn seek(&mut self, position: Duration, mode: SeekMode) -> MediaResult<Duration> {
        if let Some(duration) = self.backend.duration() {
            if position > duration {
                return Err(MediaError::invalid_argument(format!(
                    "seek to {}ms beyond the {}ms source",
                    position.as_millis(),
                    duration.as_millis()
                )));
            }
        }
        let reached = self.backend.seek(position, mode)?;
        self.publish_info(InfoKind::SeekDone { position: reached });
        Ok(reached)
    }

    fn set_volume(&mut self, left: f32, right: f32) -> MediaResult<()> {
        let valid = |v: f32| (0.0..=1.0).contains(&v);
        if !valid(left) || !valid(right) {
            return Err(MediaError::invalid_argument(format!(
                "volume {}/{} outside 0.0..=1.0",
                left, right
            )));
        }
        self.backend.set_volume(left, right)?;
        self.publish_info(InfoKind::VolumeChanged { left, right });
        Ok(())
    }

    fn set_speed(&mut self, speed: PlaybackSpeed) -> MediaResult<()> {
        self.backend.set_speed(speed)?;
        self.publish_info(InfoKind::SpeedChanged(speed));
        Ok(())
    }

    async fn complete_playback(&mut self) {
        self.publish_info(InfoKind::PlaybackComplete);
        match bounded(Operation::Stop, self.timeout(), self.backend.stop()).await {
            Ok(()) => self.stop_stream(),
            Err(err) => self.handle_error(&err),
        }
    }

    // recorder

    fn set_next_output(&mut self, uri: MediaUri) -> MediaResult<()> {
        if !self.config.features.max_file_size_rollover {
            return Err(MediaError::unsupported("output rollover is disabled"));
        }
        debug!("{} session {} next output {}", self.kind, self.id.short(), uri);
        self.next_output = Some(uri);
        Ok(())
    }

    async fn on_progress(&mut self, bytes_written: u64, elapsed: Duration) {
        if let Some(max) = self.limits.max_duration {
            if !self.limits.duration.approaching && at_ninety_percent(elapsed.as_millis(), max.as_millis()) {
                self.limits.duration.approaching = true;
                self.publish_info(InfoKind::MaxDurationApproaching);
            }
            if !self.limits.duration.reached && elapsed >= max {
                self.limits.duration.reached = true;
                self.logger.log_limit(&self.id, "max duration reached");
                self.publish_info(InfoKind::MaxDurationReached);
                self.stop_recording().await;
                return;
            }
        }

        if let Some(max) = self.limits.max_file_size {
            if !self.limits.file_size.approaching && at_ninety_percent(bytes_written.into(), max.into()) {
                self.limits.file_size.approaching = true;
                self.publish_info(InfoKind::MaxFileSizeApproaching);
            }
            if !self.limits.file_size.reached && bytes_written >= max {
                self.limits.file_size.reached = true;
                self.logger.log_limit(&self.id, "max file size reached");
                self.publish_info(InfoKind::MaxFileSizeReached);
                self.roll_over_or_stop().await;
            }
        }
    }

    async fn roll_over_or_stop(&mut self) {
        let next = if self.config.features.max_file_size_rollover {
            self.next_output.take()
        } else {
            None
        };
        let Some(uri) = next else {
            self.stop_recording().await;
            return;
        };

        match self.backend.switch_output(&uri) {
            Ok(()) => {
                self.limits.file_size = LimitProgress::default();
                if let Some(configured) = self.configured.as_mut() {
                    configured.set(keys::OUTPUT_URI, uri.to_string());
                }
                self.publish_info(InfoKind::NextOutputFileStarted { uri: uri.to_string() });
            }
            Err(err) => {
                warn!("{} session {} rollover failed: {}", self.kind, self.id.short(), err);
                self.report_error(&err);
                self.stop_recording().await;
            }
        }
    }

    async fn stop_recording(&mut self) {
        match bounded(Operation::Stop, self.timeout(), self.backend.stop()).await {
            Ok(()) => self.stop_stream(),
            Err(err) => self.handle_error(&err),
        }
    }

    // backend events

    async fn on_backend_event(&mut self, event: BackendEvent) {
        let state = self.machine.state();
        let dormant = matches!(state, SessionState::Idle | SessionState::Error | SessionState::Released);
        if dormant && !matches!(event, BackendEvent::Error(_)) {
            trace!("{} session {} ignored a backend event in {}", self.kind, self.id.short(), state);
            return;
        }

        match event {
            BackendEvent::OutputFormatChanged(format) => {
                if self.pending.is_empty() {
                    self.apply_output_format(format);
                } else {
                    self.pending.push_back(PendingOutput::FormatChange(format));
                }
            }
            BackendEvent::Output {
                data,
                presentation_time_us,
                flags,
            } => {
                if !self.kind.is_codec() || state != SessionState::Running {
                    trace!("{} session {} dropped an output in {}", self.kind, self.id.short(), state);
                    return;
                }
                if let Err(err) = self.on_output(data, presentation_time_us, flags) {
                    self.raise(&err);
                }
            }
            BackendEvent::EndOfStream => {
                if self.kind == SessionKind::Player && state == SessionState::Running {
                    self.complete_playback().await;
                }
            }
            BackendEvent::Progress { bytes_written, elapsed } => {
                if self.kind == SessionKind::Recorder && state == SessionState::Running {
                    self.on_progress(bytes_written, elapsed).await;
                }
            }
            BackendEvent::Info(info) => self.publish_info(info),
            BackendEvent::Error(err) => {
                warn!("{} session {} backend error: {}", self.kind, self.id.short(), err);
                self.raise(&err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::completion::pair;
    use tokio::runtime::Handle;

    #[tokio::test]
    async fn test_reject_released_answers_release_with_ok() {
        let (reply, release) = pair::<()>(Handle::current());
        Command::Release(reply).reject_released();
        assert!(release.await.is_ok());

        let (reply, start) = pair::<()>(Handle::current());
        Command::Start(reply).reject_released();
        assert_eq!(
            start.await.unwrap_err(),
            MediaError::InvalidState {
                operation: Operation::Start,
                state: SessionState::Released,
            }
        );
    }

    #[tokio::test]
    async fn test_preemptor_already_queued_cancels_at_once() {
        let (_tx, commands) = mpsc::unbounded_channel();
        let (_notifier, events) = BackendNotifier::channel();
        let mut inbox = Inbox::new(commands, events);

        let (reply, _flush) = pair::<()>(Handle::current());
        inbox.deferred.push_back(Command::Flush(reply));
        let (reply, _stop) = pair::<()>(Handle::current());
        inbox.deferred.push_back(Command::Stop(reply));

        let result: MediaResult<()> = run_cancellable(
            &mut inbox,
            Operation::Prepare,
            Operation::Prepare.preempted_by(),
            Duration::from_secs(1),
            std::future::pending(),
        )
        .await;

        assert_eq!(
            result.unwrap_err(),
            MediaError::Cancelled {
                operation: Operation::Prepare,
                by: Operation::Stop,
            }
        );
        let order: Vec<_> = inbox.deferred.iter().map(Command::operation).collect();
        assert_eq!(order, vec![Operation::Stop, Operation::Flush]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_commands_keep_order_and_timeout_fires() {
        let (tx, commands) = mpsc::unbounded_channel();
        let (_notifier, events) = BackendNotifier::channel();
        let mut inbox = Inbox::new(commands, events);

        let (reply, _a) = pair::<Format>(Handle::current());
        tx.send(Command::OutputFormat(reply)).unwrap();
        let (reply, _b) = pair::<()>(Handle::current());
        tx.send(Command::Pause(reply)).unwrap();

        let result: MediaResult<()> = run_cancellable(
            &mut inbox,
            Operation::Start,
            Operation::Start.preempted_by(),
            Duration::from_millis(100),
            std::future::pending(),
        )
        .await;

        assert!(matches!(result, Err(MediaError::Timeout { operation: Operation::Start, .. })));
        let order: Vec<_> = inbox.deferred.iter().map(Command::operation).collect();
        assert_eq!(order, vec![Operation::OutputFormat, Operation::Pause]);
    }

    #[tokio::test]
    async fn test_backend_error_ends_long_operation() {
        let (_tx, commands) = mpsc::unbounded_channel();
        let (notifier, events) = BackendNotifier::channel();
        let mut inbox = Inbox::new(commands, events);

        notifier.format_changed(Format::new());
        notifier.error(MediaError::ServiceDied("codec process exited".to_string()));

        let result: MediaResult<()> = run_cancellable(
            &mut inbox,
            Operation::Prepare,
            &[],
            Duration::from_secs(1),
            std::future::pending(),
        )
        .await;

        assert_eq!(result.unwrap_err().kind(), crate::error::ErrorKind::ServiceDied);
        assert_eq!(inbox.stashed.len(), 1);
    }

    #[test]
    fn test_ninety_percent_threshold() {
        assert!(!at_ninety_percent(89, 100));
        assert!(at_ninety_percent(90, 100));
        assert!(at_ninety_percent(u128::MAX, 100));
    }
}
