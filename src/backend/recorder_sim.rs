use async_trait::async_trait;
use log::info;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::{BackendEvent, BackendNotifier, MediaBackend};
use crate::error::{MediaError, MediaResult};
use crate::format::{keys, Format};
use crate::models::{MediaUri, SurfaceId};

const DEFAULT_BYTES_PER_SECOND: u64 = 16_000;

#[derive(Debug, Default)]
struct Progress {
    elapsed: Duration,
    file_bytes: u64,
}

/// Recorder backend that writes nothing but reports progress as if it were
/// muxing at the configured bitrate
pub struct SimulatedRecorder {
    notifier: Option<BackendNotifier>,
    ticker: Option<JoinHandle<()>>,
    progress: Arc<Mutex<Progress>>,
    tick: Duration,
    bytes_per_second: u64,
    output: Option<MediaUri>,
    has_video: bool,
    input_surface: Option<SurfaceId>,
}

impl SimulatedRecorder {
    pub fn new(tick: Duration) -> Self {
        Self {
            notifier: None,
            ticker: None,
            progress: Arc::new(Mutex::new(Progress::default())),
            tick: tick.max(Duration::from_millis(1)),
            bytes_per_second: DEFAULT_BYTES_PER_SECOND,
            output: None,
            has_video: false,
            input_surface: None,
        }
    }

    pub fn output(&self) -> Option<&MediaUri> {
        self.output.as_ref()
    }

    fn spawn_ticker(&mut self) -> MediaResult<()> {
        self.abort_ticker();
        let notifier = self
            .notifier
            .clone()
            .ok_or_else(|| MediaError::Unknown("recorder used before attach".to_string()))?;
        let progress = Arc::clone(&self.progress);
        let tick = self.tick;
        let bytes_per_tick = (self.bytes_per_second as f64 * tick.as_secs_f64()).round() as u64;

        self.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
            loop {
                interval.tick().await;
                let event = match progress.lock() {
                    Ok(mut progress) => {
                        progress.elapsed += tick;
                        progress.file_bytes += bytes_per_tick;
                        BackendEvent::Progress {
                            bytes_written: progress.file_bytes,
                            elapsed: progress.elapsed,
                        }
                    }
                    Err(_) => break,
                };
                if !notifier.post(event) {
                    break;
                }
            }
        }));
        Ok(())
    }

    fn abort_ticker(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }

    fn reset_progress(&self) {
        if let Ok(mut progress) = self.progress.lock() {
            *progress = Progress::default();
        }
    }
}

impl Drop for SimulatedRecorder {
    fn drop(&mut self) {
        self.abort_ticker();
    }
}

#[async_trait]
impl MediaBackend for SimulatedRecorder {
    fn name(&self) -> &str {
        "simulated-recorder"
    }

    fn attach(&mut self, notifier: BackendNotifier) {
        self.notifier = Some(notifier);
    }

    async fn configure(&mut self, format: &Format) -> MediaResult<()> {
        let output = format
            .get_str(keys::OUTPUT_URI)
            .ok_or_else(|| MediaError::invalid_argument("recorder needs an output_uri"))?;
        self.output = Some(MediaUri::parse(output)?);
        self.has_video = format.contains_key(keys::VIDEO_SOURCE);

        let bits = format.get_int(keys::AUDIO_BITRATE).unwrap_or(0) + format.get_int(keys::VIDEO_BITRATE).unwrap_or(0);
        self.bytes_per_second = if bits > 0 { bits as u64 / 8 } else { DEFAULT_BYTES_PER_SECOND };
        Ok(())
    }

    async fn prepare(&mut self, _format: &Format) -> MediaResult<()> {
        self.reset_progress();
        Ok(())
    }

    async fn start(&mut self) -> MediaResult<()> {
        if let Some(output) = &self.output {
            info!("Recording to {} at {} B/s", output, self.bytes_per_second);
        }
        self.spawn_ticker()
    }

    async fn pause(&mut self) -> MediaResult<()> {
        self.abort_ticker();
        Ok(())
    }

    async fn resume(&mut self) -> MediaResult<()> {
        self.spawn_ticker()
    }

    async fn stop(&mut self) -> MediaResult<()> {
        self.abort_ticker();
        self.reset_progress();
        Ok(())
    }

    async fn reset(&mut self) -> MediaResult<()> {
        self.abort_ticker();
        self.reset_progress();
        self.output = None;
        self.has_video = false;
        self.input_surface = None;
        Ok(())
    }

    async fn release(&mut self) -> MediaResult<()> {
        self.abort_ticker();
        Ok(())
    }

    fn create_input_surface(&mut self) -> MediaResult<SurfaceId> {
        if !self.has_video {
            return Err(MediaError::unsupported("input surface needs a video source"));
        }
        let surface = SurfaceId::generate("recorder-input");
        self.input_surface = Some(surface.clone());
        Ok(surface)
    }

    fn switch_output(&mut self, uri: &MediaUri) -> MediaResult<()> {
        if let Ok(mut progress) = self.progress.lock() {
            progress.file_bytes = 0;
        }
        info!("Continuing recording in {}", uri);
        self.output = Some(uri.clone());
        Ok(())
    }
}
