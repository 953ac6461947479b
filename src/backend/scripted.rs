//! Test backend whose behaviour is set up front and which lets a test post
//! backend events directly.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{BackendEvent, BackendNotifier, MediaBackend};
use crate::error::{MediaError, MediaResult};
use crate::format::Format;
use crate::models::{BufferFlags, BufferInfo, SurfaceId};

#[derive(Debug, Clone, Default)]
pub(crate) struct Script {
    pub configure_delay: Option<Duration>,
    pub prepare_delay: Option<Duration>,
    pub prepare_error: Option<MediaError>,
    pub start_error: Option<MediaError>,
    pub reset_error: Option<MediaError>,
    /// Emit every input twice, both copies carrying its flags
    pub duplicate_outputs: bool,
}

/// Test-side view of a running scripted backend
#[derive(Clone, Default)]
pub(crate) struct ScriptHandle {
    notifier: Arc<Mutex<Option<BackendNotifier>>>,
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl ScriptHandle {
    pub fn post(&self, event: BackendEvent) -> bool {
        self.notifier
            .lock()
            .unwrap()
            .as_ref()
            .map(|n| n.post(event))
            .unwrap_or(false)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

pub(crate) struct ScriptedBackend {
    script: Script,
    handle: ScriptHandle,
}

impl ScriptedBackend {
    pub fn new(script: Script) -> (Self, ScriptHandle) {
        let handle = ScriptHandle::default();
        (
            Self {
                script,
                handle: handle.clone(),
            },
            handle,
        )
    }
}

#[async_trait]
impl MediaBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn attach(&mut self, notifier: BackendNotifier) {
        *self.handle.notifier.lock().unwrap() = Some(notifier);
    }

    async fn configure(&mut self, _format: &Format) -> MediaResult<()> {
        self.handle.record("configure");
        if let Some(delay) = self.script.configure_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn prepare(&mut self, format: &Format) -> MediaResult<()> {
        self.handle.record("prepare");
        if let Some(delay) = self.script.prepare_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.script.prepare_error.clone() {
            return Err(err);
        }
        self.handle.post(BackendEvent::OutputFormatChanged(format.clone()));
        self.handle.record("prepared");
        Ok(())
    }

    async fn start(&mut self) -> MediaResult<()> {
        self.handle.record("start");
        match self.script.start_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn pause(&mut self) -> MediaResult<()> {
        self.handle.record("pause");
        Ok(())
    }

    async fn resume(&mut self) -> MediaResult<()> {
        self.handle.record("resume");
        Ok(())
    }

    async fn stop(&mut self) -> MediaResult<()> {
        self.handle.record("stop");
        Ok(())
    }

    async fn flush(&mut self) -> MediaResult<()> {
        self.handle.record("flush");
        Ok(())
    }

    async fn reset(&mut self) -> MediaResult<()> {
        self.handle.record("reset");
        match self.script.reset_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn release(&mut self) -> MediaResult<()> {
        self.handle.record("release");
        Ok(())
    }

    fn queue_input(&mut self, data: &[u8], info: BufferInfo, flags: BufferFlags) -> MediaResult<()> {
        self.handle.record("queue_input");
        let copies = if self.script.duplicate_outputs { 2 } else { 1 };
        for _ in 0..copies {
            self.handle.post(BackendEvent::Output {
                data: data.to_vec(),
                presentation_time_us: info.presentation_time_us,
                flags,
            });
        }
        Ok(())
    }

    fn create_input_surface(&mut self) -> MediaResult<SurfaceId> {
        Ok(SurfaceId::new("scripted-surface"))
    }
}
