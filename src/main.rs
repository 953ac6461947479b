use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tokio::sync::mpsc;

use media_session::cli::{CliApp, Commands, ConfigAction, FindArgs, StatusDisplay};
use media_session::logging::SessionLogger;
use media_session::{
    keys, AppError, BufferFlags, BufferInfo, CodecKind, ConfigManager, EventType, Format, InfoKind, MediaError,
    MediaService, MediaSession, SessionEvent, SessionState,
};

/// Main application controller: owns the configuration and the media
/// service and runs one command against them
pub struct AppController {
    service: MediaService,
    config_manager: ConfigManager,
}

impl AppController {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, AppError> {
        let config_manager = match config_path {
            Some(path) => ConfigManager::with_path(path)?,
            None => ConfigManager::new()?,
        };
        let config = config_manager.get_config().clone();

        if let Err(e) = SessionLogger::init(&config.log_level) {
            eprintln!("Warning: Failed to initialize logging: {}", e);
        }

        let service = MediaService::with_config(config)?;
        info!("Application controller initialized successfully");

        Ok(Self {
            service,
            config_manager,
        })
    }

    pub async fn execute_command(&mut self, command: Commands) -> Result<(), AppError> {
        match command {
            Commands::Caps { kind, mime } => self.list_capabilities(kind.as_deref(), mime.as_deref()),
            Commands::Find(args) => self.find_codec(&args),
            Commands::Transcode {
                input,
                output,
                mime,
                chunk,
            } => self.transcode(&input, &output, &mime, chunk).await,
            Commands::Play {
                uri,
                duration_ms,
                volume,
            } => self.play(&uri, duration_ms, volume).await,
            Commands::Config { action } => self.handle_config(action),
        }
    }

    fn list_capabilities(&self, kind: Option<&str>, mime: Option<&str>) -> Result<(), AppError> {
        let kind = kind.map(CliApp::parse_kind).transpose()?;
        let table = self.service.capabilities();
        let matching: Vec<_> = table
            .iter()
            .filter(|c| kind.map_or(true, |k| c.kind == k))
            .filter(|c| mime.map_or(true, |m| c.mime.eq_ignore_ascii_case(m)))
            .collect();

        // a single hit gets the detailed view
        if let [codec] = matching.as_slice() {
            StatusDisplay::display_capability(codec);
        } else {
            StatusDisplay::display_capabilities(matching);
        }
        Ok(())
    }

    fn find_codec(&self, args: &FindArgs) -> Result<(), AppError> {
        let media_type = args.media_type()?;
        let format = args.to_format();
        let found = if args.encoder {
            self.service.find_encoder(media_type, &format)?
        } else {
            self.service.find_decoder(media_type, &format)?
        };

        match found {
            Some(name) => {
                println!("{}", name);
                if let Some(codec) = self.service.capabilities().by_name(&name) {
                    StatusDisplay::display_capability(codec);
                }
            }
            None => {
                let kind = CodecKind::new(media_type, args.encoder);
                println!("No {} accepts this format", kind);
            }
        }
        Ok(())
    }

    /// Push `input` through a codec session chunk by chunk and write every
    /// produced output to `output`
    async fn transcode(&self, input: &Path, output: &Path, mime: &str, chunk: usize) -> Result<(), AppError> {
        let chunk = CliApp::validate_chunk(chunk)?;
        let format = CliApp::transcode_format(mime, chunk)?;
        let data = std::fs::read(input)?;
        info!("Transcoding {} ({} bytes) as {}", input.display(), data.len(), mime);

        let codec = match self.service.create_decoder_by_mime(mime) {
            Ok(codec) => codec,
            Err(e) if e.kind() == media_session::ErrorKind::Unsupported => {
                debug!("No decoder for {}, trying an encoder", mime);
                self.service.create_encoder_by_mime(mime)?
            }
            Err(e) => return Err(e.into()),
        };

        let (_subscription, mut events) = codec
            .subscribe_channel(&[])
            .ok_or_else(|| MediaError::ServiceDied("session no longer delivers events".to_string()))?;

        codec.configure(format).await?;
        codec.prepare().await?;
        codec.start().await?;

        let mut produced = Vec::with_capacity(data.len());
        let mut offset = 0usize;
        let mut frame = 0i64;
        let mut eos_queued = false;

        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::InputAvailable { index, memory } => {
                    if eos_queued {
                        continue;
                    }
                    let len = chunk.min(memory.capacity()).min(data.len() - offset);
                    let flags = if len == 0 {
                        eos_queued = true;
                        BufferFlags::END_OF_STREAM
                    } else {
                        memory.write(0, &data[offset..offset + len])?;
                        offset += len;
                        BufferFlags::NONE
                    };
                    codec
                        .queue_input(index, BufferInfo::sized(len, frame * 10_000), flags)
                        .await?;
                    frame += 1;
                }
                SessionEvent::OutputAvailable {
                    index,
                    info,
                    flags,
                    memory,
                } => {
                    produced.extend_from_slice(&memory.read(info.offset, info.size)?);
                    codec.release_output(index, false).await?;
                    if flags.is_end_of_stream() {
                        break;
                    }
                }
                SessionEvent::OutputFormatChanged(format) => {
                    StatusDisplay::display_format("Output format", &format);
                }
                SessionEvent::Error(err) => {
                    codec.release().await?;
                    return Err(err.into());
                }
                _ => {}
            }
        }

        std::fs::write(output, &produced)?;
        let status = codec.status();
        codec.stop().await?;
        codec.release().await?;

        println!(
            "Wrote {} bytes to {} ({} inputs queued, {} outputs)",
            produced.len(),
            output.display(),
            status.buffers.inputs_queued,
            status.buffers.outputs_produced
        );
        StatusDisplay::display_statistics(&self.service.logger().get_event_statistics());
        Ok(())
    }

    /// Run the clock player over `uri` until playback completes or Ctrl-C
    async fn play(&self, uri: &str, duration_ms: Option<u64>, volume: Option<f32>) -> Result<(), AppError> {
        let volume = volume.map(CliApp::validate_volume).transpose()?;
        let player = self.service.create_player()?;

        let mut extra = Format::new();
        if let Some(ms) = duration_ms {
            extra.set(keys::DURATION, ms as i64);
        }
        player.set_source_with(uri, extra).await?;
        player.prepare().await?;
        if let Some(volume) = volume {
            player.set_volume(volume, volume).await?;
        }
        let duration = player.duration().await?;

        let (_subscription, mut events) = player
            .subscribe_channel(&[EventType::StateChanged, EventType::Info, EventType::Error])
            .ok_or_else(|| MediaError::ServiceDied("session no longer delivers events".to_string()))?;

        let (interrupt_tx, mut interrupted) = mpsc::unbounded_channel();
        if let Err(e) = ctrlc::set_handler(move || {
            let _ = interrupt_tx.send(());
        }) {
            warn!("Could not install the Ctrl-C handler: {}", e);
        }

        player.play().await?;
        StatusDisplay::display_session_status(&player.status());

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    match &event {
                        SessionEvent::Info(InfoKind::PositionUpdate(position)) => {
                            StatusDisplay::display_position_update(*position, duration);
                        }
                        SessionEvent::Info(InfoKind::PlaybackComplete) => {
                            StatusDisplay::display_event(&event);
                            break;
                        }
                        SessionEvent::Error(err) => {
                            StatusDisplay::display_event(&event);
                            let err = err.clone();
                            player.release().await?;
                            return Err(err.into());
                        }
                        SessionEvent::StateChanged { to: SessionState::Stopped, .. } => {
                            StatusDisplay::display_event(&event);
                            break;
                        }
                        _ => StatusDisplay::display_event(&event),
                    }
                }
                _ = interrupted.recv() => {
                    println!();
                    info!("Interrupted, stopping playback");
                    player.stop().await?;
                    break;
                }
            }
        }

        let position = player.current_time().await?;
        player.release().await?;
        println!("Stopped at {}", media_session::format_duration(position));
        Ok(())
    }

    fn handle_config(&mut self, action: ConfigAction) -> Result<(), AppError> {
        match action {
            ConfigAction::Show => {
                let rendered = toml::to_string_pretty(self.config_manager.get_config())
                    .map_err(media_session::ConfigError::from)?;
                println!("# {}", self.config_manager.config_path().display());
                print!("{}", rendered);
            }
            ConfigAction::Reset => {
                self.config_manager.reset_to_defaults()?;
                println!(
                    "Configuration reset to defaults in {}",
                    self.config_manager.config_path().display()
                );
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = CliApp::parse();

    let mut app = match AppController::new(cli.config.map(|p| CliApp::expand_path(&p.to_string_lossy()))) {
        Ok(app) => app,
        Err(e) => {
            StatusDisplay::display_simple_error(&e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app.execute_command(cli.command).await {
        StatusDisplay::display_error(&e);
        std::process::exit(1);
    }

    info!("Application shutdown complete");
    Ok(())
}
