//! Entry point of the engine: owns the configuration and the runtime the
//! session actors run on, and creates sessions.

use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};

use crate::backend::{ClockPlayer, MediaBackend, PassthroughCodec, SimulatedRecorder};
use crate::capability::{CapabilityTable, CodecCapability, CodecKind};
use crate::config::EngineConfig;
use crate::error::{MediaError, MediaResult};
use crate::format::Format;
use crate::logging::SessionLogger;
use crate::models::{MediaType, SessionKind};
use crate::session::{CodecProcessor, Player, Recorder, SessionHandle, SessionSpec};

/// Length the clock player assumes for sources that do not declare one
pub const DEFAULT_SOURCE_DURATION: Duration = Duration::from_secs(180);

/// Session factory.
///
/// Created inside a tokio runtime the service spawns its sessions there;
/// created outside one it starts a runtime of its own, and completions can
/// then be observed with `wait_blocking`.
pub struct MediaService {
    runtime: Handle,
    owned_runtime: Option<Runtime>,
    config: Arc<EngineConfig>,
    logger: SessionLogger,
}

impl MediaService {
    pub fn new() -> MediaResult<Self> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> MediaResult<Self> {
        config.validate()?;

        if let Some(path) = &config.capability_file {
            let table = CapabilityTable::load(path)?;
            CapabilityTable::install(table)?;
        }

        let (runtime, owned_runtime) = match Handle::try_current() {
            Ok(handle) => (handle, None),
            Err(_) => {
                let runtime = Builder::new_multi_thread()
                    .thread_name("media-session")
                    .enable_all()
                    .build()
                    .map_err(|e| MediaError::Io(format!("cannot start the session runtime: {}", e)))?;
                debug!("Started a dedicated session runtime");
                (runtime.handle().clone(), Some(runtime))
            }
        };

        info!(
            "Media service ready ({} codecs, timeout {}ms)",
            CapabilityTable::global().len(),
            config.operation_timeout_ms
        );

        Ok(Self {
            runtime,
            owned_runtime,
            config: Arc::new(config),
            logger: SessionLogger::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Session history shared by every session of this service
    pub fn logger(&self) -> &SessionLogger {
        &self.logger
    }

    pub fn capabilities(&self) -> &'static CapabilityTable {
        CapabilityTable::global()
    }

    pub fn find_decoder(&self, media_type: MediaType, format: &Format) -> MediaResult<Option<String>> {
        self.capabilities().find_decoder(media_type, format)
    }

    pub fn find_encoder(&self, media_type: MediaType, format: &Format) -> MediaResult<Option<String>> {
        self.capabilities().find_encoder(media_type, format)
    }

    // players and recorders

    pub fn create_player(&self) -> MediaResult<Player> {
        let backend = ClockPlayer::new(DEFAULT_SOURCE_DURATION, self.config.position_update_interval());
        self.create_player_with_backend(Box::new(backend))
    }

    pub fn create_player_with_backend(&self, backend: Box<dyn MediaBackend>) -> MediaResult<Player> {
        let handle = self.spawn(SessionKind::Player, MediaType::AudioVideo, backend, None);
        Ok(Player::new(handle))
    }

    pub fn create_recorder(&self) -> MediaResult<Recorder> {
        let backend = SimulatedRecorder::new(self.config.position_update_interval());
        self.create_recorder_with_backend(Box::new(backend))
    }

    pub fn create_recorder_with_backend(&self, backend: Box<dyn MediaBackend>) -> MediaResult<Recorder> {
        let handle = self.spawn(SessionKind::Recorder, MediaType::AudioVideo, backend, None);
        Ok(Recorder::new(handle))
    }

    // codecs

    pub fn create_decoder_by_mime(&self, mime: &str) -> MediaResult<CodecProcessor> {
        let capability = self.codec_by_mime(mime, false)?;
        self.create_codec_with_backend(capability.clone(), Box::new(PassthroughCodec::new(capability)))
    }

    pub fn create_encoder_by_mime(&self, mime: &str) -> MediaResult<CodecProcessor> {
        let capability = self.codec_by_mime(mime, true)?;
        self.create_codec_with_backend(capability.clone(), Box::new(PassthroughCodec::new(capability)))
    }

    pub fn create_decoder_by_name(&self, name: &str) -> MediaResult<CodecProcessor> {
        let capability = self.codec_by_name(name, false)?;
        self.create_codec_with_backend(capability.clone(), Box::new(PassthroughCodec::new(capability)))
    }

    pub fn create_encoder_by_name(&self, name: &str) -> MediaResult<CodecProcessor> {
        let capability = self.codec_by_name(name, true)?;
        self.create_codec_with_backend(capability.clone(), Box::new(PassthroughCodec::new(capability)))
    }

    /// Codec session driving a caller-supplied backend within `capability`
    pub fn create_codec_with_backend(
        &self,
        capability: CodecCapability,
        backend: Box<dyn MediaBackend>,
    ) -> MediaResult<CodecProcessor> {
        let handle = self.spawn(
            capability.kind.session_kind(),
            capability.media_type(),
            backend,
            Some(capability.clone()),
        );
        Ok(CodecProcessor::new(handle, capability))
    }

    fn codec_by_mime(&self, mime: &str, encoder: bool) -> MediaResult<CodecCapability> {
        let mime = mime.trim();
        if mime.is_empty() {
            return Err(MediaError::invalid_argument("codec mime must not be empty"));
        }
        let media_type = MediaType::from_mime(mime)
            .ok_or_else(|| MediaError::invalid_argument(format!("'{}' is not an audio or video mime type", mime)))?;
        let kind = CodecKind::new(media_type, encoder);

        self.capabilities()
            .of_kind(kind)
            .find(|c| c.mime == mime)
            .cloned()
            .ok_or_else(|| MediaError::unsupported(format!("no {} for {}", kind, mime)))
    }

    fn codec_by_name(&self, name: &str, encoder: bool) -> MediaResult<CodecCapability> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MediaError::invalid_argument("codec name must not be empty"));
        }
        let capability = self
            .capabilities()
            .by_name(name)
            .ok_or_else(|| MediaError::unsupported(format!("no codec named '{}'", name)))?;
        if capability.kind.is_encoder() != encoder {
            return Err(MediaError::invalid_argument(format!(
                "'{}' is a {}, not an {}",
                name,
                capability.kind,
                if encoder { "encoder" } else { "decoder" }
            )));
        }
        Ok(capability.clone())
    }

    fn spawn(
        &self,
        kind: SessionKind,
        media_type: MediaType,
        backend: Box<dyn MediaBackend>,
        capability: Option<CodecCapability>,
    ) -> SessionHandle {
        SessionHandle::spawn(
            &self.runtime,
            SessionSpec {
                kind,
                media_type,
                backend,
                capability,
                config: Arc::clone(&self.config),
                logger: self.logger.clone(),
            },
        )
    }
}

impl Drop for MediaService {
    fn drop(&mut self) {
        if let Some(runtime) = self.owned_runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for MediaService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaService")
            .field("config", &self.config)
            .field("owns_runtime", &self.owned_runtime.is_some())
            .finish()
    }
}
