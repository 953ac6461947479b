//! Seam between the session engine and whatever actually moves media:
//! hardware codecs, playback devices or capture pipelines.
//!
//! A backend is driven by exactly one session actor. Calls that can take a
//! while are `async`; the actor bounds them with the engine timeout and may
//! drop the future when a cancelling request arrives. Anything the backend
//! produces on its own (frames, format changes, progress, failures) is posted
//! through the [`BackendNotifier`] handed to [`MediaBackend::attach`].

mod clock_player;
mod passthrough;
mod recorder_sim;
#[cfg(test)]
pub(crate) mod scripted;

pub use clock_player::ClockPlayer;
pub use passthrough::PassthroughCodec;
pub use recorder_sim::SimulatedRecorder;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::{MediaError, MediaResult};
use crate::format::Format;
use crate::models::{BufferFlags, BufferInfo, MediaUri, PlaybackSpeed, SeekMode, SurfaceId};
use crate::session::events::InfoKind;

/// Something a backend reports without being asked
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// The negotiated output format changed; applies to every later output
    OutputFormatChanged(Format),
    /// A produced frame
    Output {
        data: Vec<u8>,
        presentation_time_us: i64,
        flags: BufferFlags,
    },
    /// Playback reached the end of the source
    EndOfStream,
    /// Recorder progress for the current output file
    Progress {
        bytes_written: u64,
        elapsed: Duration,
    },
    Info(InfoKind),
    Error(MediaError),
}

/// Posting half of the backend event channel
#[derive(Debug, Clone)]
pub struct BackendNotifier {
    tx: mpsc::UnboundedSender<BackendEvent>,
}

impl BackendNotifier {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<BackendEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the session is gone
    pub fn post(&self, event: BackendEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn output(&self, data: Vec<u8>, presentation_time_us: i64, flags: BufferFlags) -> bool {
        self.post(BackendEvent::Output {
            data,
            presentation_time_us,
            flags,
        })
    }

    pub fn format_changed(&self, format: Format) -> bool {
        self.post(BackendEvent::OutputFormatChanged(format))
    }

    pub fn error(&self, err: MediaError) -> bool {
        self.post(BackendEvent::Error(err))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

fn not_supported(what: &str) -> MediaError {
    MediaError::unsupported(format!("backend does not implement {}", what))
}

/// Operations a session forwards to its backend
#[async_trait]
pub trait MediaBackend: Send {
    fn name(&self) -> &str;

    /// Called once before any other call
    fn attach(&mut self, notifier: BackendNotifier);

    async fn configure(&mut self, _format: &Format) -> MediaResult<()> {
        Ok(())
    }

    async fn prepare(&mut self, format: &Format) -> MediaResult<()>;

    async fn start(&mut self) -> MediaResult<()>;

    async fn pause(&mut self) -> MediaResult<()> {
        Err(not_supported("pause"))
    }

    async fn resume(&mut self) -> MediaResult<()> {
        Err(not_supported("resume"))
    }

    async fn stop(&mut self) -> MediaResult<()>;

    async fn flush(&mut self) -> MediaResult<()> {
        Ok(())
    }

    async fn reset(&mut self) -> MediaResult<()>;

    async fn release(&mut self) -> MediaResult<()> {
        Ok(())
    }

    /// Consume one input payload. An empty payload flagged end-of-stream is valid.
    fn queue_input(&mut self, _data: &[u8], _info: BufferInfo, _flags: BufferFlags) -> MediaResult<()> {
        Err(not_supported("byte-buffer input"))
    }

    /// Forward a decoded frame to a display surface
    fn render(&mut self, _surface: Option<&SurfaceId>, _data: &[u8], _info: &BufferInfo) -> MediaResult<()> {
        Ok(())
    }

    fn set_parameter(&mut self, _format: &Format) -> MediaResult<()> {
        Ok(())
    }

    fn set_output_surface(&mut self, _surface: &SurfaceId) -> MediaResult<()> {
        Ok(())
    }

    fn create_input_surface(&mut self) -> MediaResult<SurfaceId> {
        Err(not_supported("input surfaces"))
    }

    /// End of stream for surface input
    fn signal_end_of_input(&mut self) -> MediaResult<()> {
        Err(not_supported("surface end of stream"))
    }

    /// Returns the position actually reached
    fn seek(&mut self, _position: Duration, _mode: SeekMode) -> MediaResult<Duration> {
        Err(not_supported("seek"))
    }

    fn set_volume(&mut self, _left: f32, _right: f32) -> MediaResult<()> {
        Err(not_supported("volume"))
    }

    fn set_speed(&mut self, _speed: PlaybackSpeed) -> MediaResult<()> {
        Err(not_supported("playback speed"))
    }

    fn set_looping(&mut self, _looping: bool) -> MediaResult<()> {
        Err(not_supported("looping"))
    }

    fn position(&self) -> Duration {
        Duration::ZERO
    }

    fn duration(&self) -> Option<Duration> {
        None
    }

    /// Continue recording into `uri`
    fn switch_output(&mut self, _uri: &MediaUri) -> MediaResult<()> {
        Err(not_supported("output rollover"))
    }
}
