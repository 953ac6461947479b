use std::time::Duration;

use super::actor::Command;
use super::completion::Completion;
use super::{MediaSession, SessionHandle};
use crate::format::{keys, Format};
use crate::models::{MediaUri, PlaybackSpeed, SeekMode, SurfaceId};

/// Playback session: source, transport control, volume, speed and looping
#[derive(Clone, Debug)]
pub struct Player {
    handle: SessionHandle,
}

impl MediaSession for Player {
    fn handle(&self) -> &SessionHandle {
        &self.handle
    }
}

impl Player {
    pub(crate) fn new(handle: SessionHandle) -> Self {
        Self { handle }
    }

    /// Configure the player with `uri` as its only parameter
    pub fn set_source(&self, uri: &str) -> Completion<()> {
        self.set_source_with(uri, Format::new())
    }

    /// Configure with `uri` plus extra descriptor keys
    pub fn set_source_with(&self, uri: &str, extra: Format) -> Completion<()> {
        match MediaUri::parse(uri) {
            Ok(uri) => self.configure(extra.with(keys::URI, uri.to_string())),
            Err(err) => self.handle.ready(Err(err)),
        }
    }

    pub fn set_output_surface(&self, surface: SurfaceId) -> Completion<()> {
        self.handle.submit(|reply| Command::SetOutputSurface(surface, reply))
    }

    /// Alias of `start`
    pub fn play(&self) -> Completion<()> {
        self.start()
    }

    pub fn pause(&self) -> Completion<()> {
        self.handle.submit(Command::Pause)
    }

    pub fn resume(&self) -> Completion<()> {
        self.handle.submit(Command::Resume)
    }

    /// Resolves with the position actually reached
    pub fn seek(&self, position: Duration, mode: SeekMode) -> Completion<Duration> {
        self.handle.submit(|reply| Command::Seek { position, mode, reply })
    }

    pub fn set_volume(&self, left: f32, right: f32) -> Completion<()> {
        self.handle.submit(|reply| Command::SetVolume { left, right, reply })
    }

    pub fn set_speed(&self, speed: PlaybackSpeed) -> Completion<()> {
        self.handle.submit(|reply| Command::SetSpeed(speed, reply))
    }

    pub fn set_looping(&self, looping: bool) -> Completion<()> {
        self.handle.submit(|reply| Command::SetLooping(looping, reply))
    }

    pub fn current_time(&self) -> Completion<Duration> {
        self.handle.submit(Command::CurrentTime)
    }

    /// `None` for live sources
    pub fn duration(&self) -> Completion<Option<Duration>> {
        self.handle.submit(Command::Duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error::ErrorKind;
    use crate::service::MediaService;
    use crate::session::{EventType, InfoKind, SessionEvent, SessionState};

    fn service() -> MediaService {
        MediaService::with_config(EngineConfig {
            position_update_interval_ms: 100,
            ..EngineConfig::default()
        })
        .unwrap()
    }

    async fn prepared_player(service: &MediaService, duration_ms: i64) -> Player {
        let player = service.create_player().unwrap();
        player
            .set_source_with("file:///music/track.flac", Format::new().with(keys::DURATION, duration_ms))
            .await
            .unwrap();
        player.prepare().await.unwrap();
        player
    }

    #[tokio::test]
    async fn test_set_source_rejects_bad_uri() {
        let service = service();
        let player = service.create_player().unwrap();
        let err = player.set_source("gopher://old").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(player.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_prepare_reports_duration() {
        let service = service();
        let player = prepared_player(&service, 3_000).await;
        assert_eq!(player.duration().await.unwrap(), Some(Duration::from_secs(3)));
        assert_eq!(player.current_time().await.unwrap(), Duration::ZERO);

        let format = player.output_format().await.unwrap();
        assert_eq!(format.get_int(keys::DURATION), Some(3_000));
        assert_eq!(format.get_str(keys::URI), Some("file:///music/track.flac"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_and_volume_publish_info() {
        let service = service();
        let player = prepared_player(&service, 10_000).await;
        let (_id, mut rx) = player.subscribe_channel(&[EventType::Info]).unwrap();

        let reached = player.seek(Duration::from_secs(4), SeekMode::ClosestSync).await.unwrap();
        assert_eq!(reached, Duration::from_secs(4));
        player.set_volume(0.5, 0.25).await.unwrap();

        assert!(matches!(
            rx.recv().await,
            Some(SessionEvent::Info(InfoKind::SeekDone { position })) if position == Duration::from_secs(4)
        ));
        assert!(matches!(
            rx.recv().await,
            Some(SessionEvent::Info(InfoKind::VolumeChanged { left, right })) if left == 0.5 && right == 0.25
        ));
    }

    #[tokio::test]
    async fn test_seek_past_end_and_loud_volume_are_rejected() {
        let service = service();
        let player = prepared_player(&service, 1_000).await;

        let err = player.seek(Duration::from_secs(5), SeekMode::Closest).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = player.set_volume(1.5, 0.0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(player.state(), SessionState::Prepared);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_completes_and_stops() {
        let service = service();
        let player = prepared_player(&service, 500).await;
        let (_id, mut rx) = player.subscribe_channel(&[EventType::Info]).unwrap();

        player.play().await.unwrap();
        assert_eq!(player.state(), SessionState::Running);

        loop {
            match rx.recv().await {
                Some(SessionEvent::Info(InfoKind::PlaybackComplete)) => break,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
        assert_eq!(
            player.wait_for_state(SessionState::Stopped).await.unwrap(),
            SessionState::Stopped
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume() {
        let service = service();
        let player = prepared_player(&service, 10_000).await;
        player.play().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        player.pause().await.unwrap();
        assert_eq!(player.state(), SessionState::Paused);
        let paused_at = player.current_time().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(player.current_time().await.unwrap(), paused_at);

        player.resume().await.unwrap();
        assert_eq!(player.state(), SessionState::Running);
    }

    #[tokio::test]
    async fn test_codec_operations_are_unsupported() {
        let service = service();
        let player = prepared_player(&service, 1_000).await;
        player.play().await.unwrap();

        let err = player
            .handle()
            .submit(|reply| Command::Flush(reply))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }
}
