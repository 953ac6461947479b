use async_trait::async_trait;
use log::{debug, info};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{BackendEvent, BackendNotifier, MediaBackend};
use crate::error::{MediaError, MediaResult};
use crate::format::{keys, Format};
use crate::models::{MediaUri, PlaybackSpeed, SeekMode};
use crate::session::events::InfoKind;

/// Playback position that advances with wall-clock time scaled by speed
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

#[derive(Debug)]
struct ClockInner {
    position: Duration,
    last_update: Instant,
    duration: Duration,
    speed: f64,
    running: bool,
    looping: bool,
}

/// What the clock looks like after advancing it
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClockTick {
    Playing { position: Duration, remaining: Duration },
    Looped,
    Finished,
    Idle,
}

impl PlaybackClock {
    pub fn new(duration: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                position: Duration::ZERO,
                last_update: Instant::now(),
                duration,
                speed: 1.0,
                running: false,
                looping: false,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut ClockInner) -> R) -> Option<R> {
        self.inner.lock().ok().map(|mut inner| f(&mut inner))
    }

    pub fn start(&self) {
        self.with(|inner| {
            inner.last_update = Instant::now();
            inner.running = true;
        });
    }

    pub fn pause(&self) {
        self.with(|inner| {
            advance(inner);
            inner.running = false;
        });
    }

    pub fn stop(&self) {
        self.with(|inner| {
            inner.running = false;
            inner.position = Duration::ZERO;
        });
    }

    pub fn seek(&self, position: Duration) -> MediaResult<Duration> {
        self.with(|inner| {
            if position > inner.duration {
                return Err(MediaError::invalid_argument(format!(
                    "seek position {:.2}s exceeds duration {:.2}s",
                    position.as_secs_f64(),
                    inner.duration.as_secs_f64()
                )));
            }
            inner.position = position;
            inner.last_update = Instant::now();
            Ok(position)
        })
        .unwrap_or_else(|| Err(MediaError::Unknown("playback clock lock poisoned".to_string())))
    }

    pub fn set_speed(&self, speed: f64) {
        self.with(|inner| {
            advance(inner);
            inner.speed = speed;
        });
    }

    pub fn set_looping(&self, looping: bool) {
        self.with(|inner| inner.looping = looping);
    }

    pub fn position(&self) -> Duration {
        self.with(|inner| {
            advance(inner);
            inner.position
        })
        .unwrap_or_default()
    }

    pub fn duration(&self) -> Duration {
        self.with(|inner| inner.duration).unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.with(|inner| inner.running).unwrap_or(false)
    }

    /// Advance to now and report where playback stands
    pub fn tick(&self) -> ClockTick {
        self.with(|inner| {
            if !inner.running {
                return ClockTick::Idle;
            }
            advance(inner);
            if inner.position < inner.duration {
                let remaining = (inner.duration - inner.position).div_f64(inner.speed);
                return ClockTick::Playing {
                    position: inner.position,
                    remaining,
                };
            }
            if inner.looping {
                inner.position = Duration::ZERO;
                ClockTick::Looped
            } else {
                inner.running = false;
                ClockTick::Finished
            }
        })
        .unwrap_or(ClockTick::Idle)
    }
}

fn advance(inner: &mut ClockInner) {
    let now = Instant::now();
    if inner.running {
        let elapsed = now.duration_since(inner.last_update).mul_f64(inner.speed);
        inner.position = inner.position.saturating_add(elapsed).min(inner.duration);
    }
    inner.last_update = now;
}

/// Player backend with no real decoding: the source "plays" for its
/// duration, reporting position updates and completion.
pub struct ClockPlayer {
    clock: PlaybackClock,
    notifier: Option<BackendNotifier>,
    ticker: Option<JoinHandle<()>>,
    update_interval: Duration,
    default_duration: Duration,
    source: Option<MediaUri>,
    volume: (f32, f32),
}

impl ClockPlayer {
    pub fn new(default_duration: Duration, update_interval: Duration) -> Self {
        Self {
            clock: PlaybackClock::new(default_duration),
            notifier: None,
            ticker: None,
            update_interval: update_interval.max(Duration::from_millis(1)),
            default_duration,
            source: None,
            volume: (1.0, 1.0),
        }
    }

    pub fn volume(&self) -> (f32, f32) {
        self.volume
    }

    fn spawn_ticker(&mut self) -> MediaResult<()> {
        self.abort_ticker();
        let notifier = self
            .notifier
            .clone()
            .ok_or_else(|| MediaError::Unknown("clock player used before attach".to_string()))?;
        let clock = self.clock.clone();
        let interval = self.update_interval;

        self.ticker = Some(tokio::spawn(async move {
            let mut first = true;
            loop {
                match clock.tick() {
                    ClockTick::Playing { position, remaining } => {
                        if !first && !notifier.post(BackendEvent::Info(InfoKind::PositionUpdate(position))) {
                            break;
                        }
                        first = false;
                        tokio::time::sleep(remaining.min(interval)).await;
                    }
                    ClockTick::Looped => {
                        debug!("Looping back to start");
                        if !notifier.post(BackendEvent::Info(InfoKind::PositionUpdate(Duration::ZERO))) {
                            break;
                        }
                    }
                    ClockTick::Finished => {
                        notifier.post(BackendEvent::EndOfStream);
                        break;
                    }
                    ClockTick::Idle => break,
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

    fn restart_ticker_if_running(&mut self) -> MediaResult<()> {
        if self.clock.is_running() {
            self.spawn_ticker()?;
        }
        Ok(())
    }
}

impl Drop for ClockPlayer {
    fn drop(&mut self) {
        self.abort_ticker();
    }
}

#[async_trait]
impl MediaBackend for ClockPlayer {
    fn name(&self) -> &str {
        "clock-player"
    }

    fn attach(&mut self, notifier: BackendNotifier) {
        self.notifier = Some(notifier);
    }

    async fn configure(&mut self, format: &Format) -> MediaResult<()> {
        let uri = format
            .get_str(keys::URI)
            .ok_or_else(|| MediaError::invalid_argument("player source needs a uri"))?;
        self.source = Some(MediaUri::parse(uri)?);
        Ok(())
    }

    async fn prepare(&mut self, format: &Format) -> MediaResult<()> {
        let duration = match format.get_int(keys::DURATION) {
            Some(ms) if ms >= 0 => Duration::from_millis(ms as u64),
            Some(ms) => return Err(MediaError::invalid_argument(format!("negative duration {}ms", ms))),
            None => self.default_duration,
        };
        self.abort_ticker();
        self.clock = PlaybackClock::new(duration);

        let negotiated = format
            .clone()
            .with(keys::DURATION, duration.as_millis() as i64)
            .with(keys::TRACK_COUNT, 1);
        if let Some(notifier) = &self.notifier {
            notifier.format_changed(negotiated);
        }
        info!(
            "Prepared {} ({:.1}s)",
            self.source.as_ref().map(|s| s.to_string()).unwrap_or_default(),
            duration.as_secs_f64()
        );
        Ok(())
    }

    async fn start(&mut self) -> MediaResult<()> {
        self.clock.start();
        self.spawn_ticker()
    }

    async fn pause(&mut self) -> MediaResult<()> {
        self.clock.pause();
        self.abort_ticker();
        Ok(())
    }

    async fn resume(&mut self) -> MediaResult<()> {
        self.clock.start();
        self.spawn_ticker()
    }

    async fn stop(&mut self) -> MediaResult<()> {
        self.abort_ticker();
        self.clock.stop();
        Ok(())
    }

    async fn reset(&mut self) -> MediaResult<()> {
        self.abort_ticker();
        self.clock = PlaybackClock::new(self.default_duration);
        self.source = None;
        self.volume = (1.0, 1.0);
        Ok(())
    }

    async fn release(&mut self) -> MediaResult<()> {
        self.abort_ticker();
        Ok(())
    }

    fn seek(&mut self, position: Duration, _mode: SeekMode) -> MediaResult<Duration> {
        // every position is a sync point
        let reached = self.clock.seek(position)?;
        self.restart_ticker_if_running()?;
        Ok(reached)
    }

    fn set_volume(&mut self, left: f32, right: f32) -> MediaResult<()> {
        self.volume = (left, right);
        Ok(())
    }

    fn set_speed(&mut self, speed: PlaybackSpeed) -> MediaResult<()> {
        self.clock.set_speed(speed.factor());
        self.restart_ticker_if_running()
    }

    fn set_looping(&mut self, looping: bool) -> MediaResult<()> {
        self.clock.set_looping(looping);
        Ok(())
    }

    fn position(&self) -> Duration {
        self.clock.position()
    }

    fn duration(&self) -> Option<Duration> {
        Some(self.clock.duration())
    }
}
