use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::actor::Command;
use super::completion::Completion;
use super::{MediaSession, SessionHandle};
use crate::format::{keys, Format};
use crate::models::{MediaUri, SurfaceId};

/// Typed view of the keys a recorder understands. Converts into a [`Format`]
/// for `configure`; anything not covered here can be added to the format
/// directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfig {
    pub output_uri: String,
    pub audio_source: Option<String>,
    pub video_source: Option<String>,
    pub audio_codec_mime: Option<String>,
    pub video_codec_mime: Option<String>,
    pub sample_rate: Option<i64>,
    pub channel_count: Option<i64>,
    pub audio_bitrate: Option<i64>,
    pub video_bitrate: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub frame_rate: Option<i64>,
    pub container_format: Option<String>,
    pub max_duration: Option<Duration>,
    pub max_file_size: Option<u64>,
}

impl RecorderConfig {
    pub fn new(output_uri: impl Into<String>) -> Self {
        Self {
            output_uri: output_uri.into(),
            ..Self::default()
        }
    }

    pub fn audio(mut self, source: &str, sample_rate: i64, channel_count: i64) -> Self {
        self.audio_source = Some(source.to_string());
        self.sample_rate = Some(sample_rate);
        self.channel_count = Some(channel_count);
        self
    }

    pub fn video(mut self, source: &str, width: i64, height: i64, frame_rate: i64) -> Self {
        self.video_source = Some(source.to_string());
        self.width = Some(width);
        self.height = Some(height);
        self.frame_rate = Some(frame_rate);
        self
    }

    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    pub fn to_format(&self) -> Format {
        let mut format = Format::new().with(keys::OUTPUT_URI, self.output_uri.as_str());

        let strings = [
            (keys::AUDIO_SOURCE, &self.audio_source),
            (keys::VIDEO_SOURCE, &self.video_source),
            (keys::AUDIO_CODEC_MIME, &self.audio_codec_mime),
            (keys::VIDEO_CODEC_MIME, &self.video_codec_mime),
            (keys::CONTAINER_FORMAT, &self.container_format),
        ];
        for (key, value) in strings {
            if let Some(value) = value {
                format.set(key, value.as_str());
            }
        }

        let ints = [
            (keys::SAMPLE_RATE, self.sample_rate),
            (keys::CHANNEL_COUNT, self.channel_count),
            (keys::AUDIO_BITRATE, self.audio_bitrate),
            (keys::VIDEO_BITRATE, self.video_bitrate),
            (keys::WIDTH, self.width),
            (keys::HEIGHT, self.height),
            (keys::FRAME_RATE, self.frame_rate),
        ];
        for (key, value) in ints {
            if let Some(value) = value {
                format.set(key, value);
            }
        }

        if let Some(limit) = self.max_duration {
            format.set(keys::MAX_DURATION, limit.as_millis() as i64);
        }
        if let Some(bytes) = self.max_file_size {
            format.set(keys::MAX_FILE_SIZE, bytes as i64);
        }
        format
    }
}

impl From<&RecorderConfig> for Format {
    fn from(config: &RecorderConfig) -> Self {
        config.to_format()
    }
}

/// Capture session writing to `output_uri`
#[derive(Clone, Debug)]
pub struct Recorder {
    handle: SessionHandle,
}

impl MediaSession for Recorder {
    fn handle(&self) -> &SessionHandle {
        &self.handle
    }
}

impl Recorder {
    pub(crate) fn new(handle: SessionHandle) -> Self {
        Self { handle }
    }

    pub fn configure_with(&self, config: &RecorderConfig) -> Completion<()> {
        self.configure(config.to_format())
    }

    /// Surface a video producer draws into instead of the camera source
    pub fn create_input_surface(&self) -> Completion<SurfaceId> {
        self.handle.submit(Command::CreateInputSurface)
    }

    /// File to continue in once the current one reaches `max_file_size`
    pub fn set_next_output(&self, uri: &str) -> Completion<()> {
        match MediaUri::parse(uri) {
            Ok(uri) => self.handle.submit(|reply| Command::SetNextOutput(uri, reply)),
            Err(err) => self.handle.ready(Err(err)),
        }
    }

    pub fn pause(&self) -> Completion<()> {
        self.handle.submit(Command::Pause)
    }

    pub fn resume(&self) -> Completion<()> {
        self.handle.submit(Command::Resume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, FeatureGates};
    use crate::error::ErrorKind;
    use crate::service::MediaService;
    use crate::session::{EventType, InfoKind, SessionEvent, SessionState};

    fn service(rollover: bool) -> MediaService {
        MediaService::with_config(EngineConfig {
            features: FeatureGates {
                max_file_size_rollover: rollover,
                ..FeatureGates::default()
            },
            ..EngineConfig::default()
        })
        .unwrap()
    }

    fn voice_memo() -> RecorderConfig {
        let mut config = RecorderConfig::new("file:///tmp/memo.m4a").audio("mic", 44100, 1);
        config.audio_bitrate = Some(64_000);
        config
    }

    async fn next_info(rx: &mut tokio::sync::mpsc::UnboundedReceiver<SessionEvent>) -> InfoKind {
        loop {
            match rx.recv().await {
                Some(SessionEvent::Info(info)) => return info,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    }

    #[test]
    fn test_config_to_format() {
        let format = voice_memo().max_file_size(1 << 20).to_format();
        assert_eq!(format.get_str(keys::OUTPUT_URI), Some("file:///tmp/memo.m4a"));
        assert_eq!(format.get_str(keys::AUDIO_SOURCE), Some("mic"));
        assert_eq!(format.get_int(keys::SAMPLE_RATE), Some(44100));
        assert_eq!(format.get_int(keys::MAX_FILE_SIZE), Some(1 << 20));
        assert!(!format.contains_key(keys::VIDEO_SOURCE));
    }

    #[tokio::test]
    async fn test_configure_requires_a_source() {
        let service = service(false);
        let recorder = service.create_recorder().unwrap();
        let err = recorder
            .configure_with(&RecorderConfig::new("file:///tmp/empty.m4a"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(recorder.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_configure_without_matching_encoder_is_unsupported() {
        let service = service(false);
        let recorder = service.create_recorder().unwrap();
        let mut config = voice_memo();
        config.audio_codec_mime = Some("audio/flac".to_string());
        let err = recorder.configure_with(&config).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_input_surface_needs_video_source() {
        let service = service(false);
        let recorder = service.create_recorder().unwrap();
        recorder.configure_with(&voice_memo()).await.unwrap();
        assert!(recorder.create_input_surface().await.is_err());

        recorder.reset().await.unwrap();
        let config = voice_memo().video("camera", 1280, 720, 30);
        recorder.configure_with(&config).await.unwrap();
        let surface = recorder.create_input_surface().await.unwrap();
        assert!(surface.as_str().starts_with("recorder-input-"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_limit_stops_recording() {
        let service = service(false);
        let recorder = service.create_recorder().unwrap();
        let config = voice_memo().max_duration(Duration::from_secs(10));
        recorder.configure_with(&config).await.unwrap();
        let (_id, mut rx) = recorder.subscribe_channel(&[EventType::Info]).unwrap();

        recorder.prepare().await.unwrap();
        recorder.start().await.unwrap();

        assert_eq!(next_info(&mut rx).await, InfoKind::MaxDurationApproaching);
        assert_eq!(next_info(&mut rx).await, InfoKind::MaxDurationReached);
        assert_eq!(
            recorder.wait_for_state(SessionState::Stopped).await.unwrap(),
            SessionState::Stopped
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_limit_applies_to_every_recording() {
        let service = service(false);
        let recorder = service.create_recorder().unwrap();
        let config = voice_memo().max_duration(Duration::from_secs(10));
        recorder.configure_with(&config).await.unwrap();
        let (_id, mut rx) = recorder.subscribe_channel(&[EventType::Info]).unwrap();

        recorder.prepare().await.unwrap();
        recorder.start().await.unwrap();
        recorder.wait_for_state(SessionState::Stopped).await.unwrap();
        assert_eq!(next_info(&mut rx).await, InfoKind::MaxDurationApproaching);
        assert_eq!(next_info(&mut rx).await, InfoKind::MaxDurationReached);

        // same configuration, second take
        recorder.prepare().await.unwrap();
        recorder.start().await.unwrap();
        assert_eq!(recorder.state(), SessionState::Running);
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(recorder.state(), SessionState::Stopped);
        assert_eq!(next_info(&mut rx).await, InfoKind::MaxDurationApproaching);
        assert_eq!(next_info(&mut rx).await, InfoKind::MaxDurationReached);
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_size_limit_without_rollover_stops() {
        let service = service(false);
        let recorder = service.create_recorder().unwrap();
        // 64 kbit/s is 8000 bytes per second
        recorder
            .configure_with(&voice_memo().max_file_size(20_000))
            .await
            .unwrap();
        let err = recorder.set_next_output("file:///tmp/memo-2.m4a").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);

        let (_id, mut rx) = recorder.subscribe_channel(&[EventType::Info]).unwrap();
        recorder.prepare().await.unwrap();
        recorder.start().await.unwrap();

        assert_eq!(next_info(&mut rx).await, InfoKind::MaxFileSizeApproaching);
        assert_eq!(next_info(&mut rx).await, InfoKind::MaxFileSizeReached);
        assert_eq!(
            recorder.wait_for_state(SessionState::Stopped).await.unwrap(),
            SessionState::Stopped
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_size_limit_rolls_over_to_next_output() {
        let service = service(true);
        let recorder = service.create_recorder().unwrap();
        recorder
            .configure_with(&voice_memo().max_file_size(20_000))
            .await
            .unwrap();
        recorder.set_next_output("file:///tmp/memo-2.m4a").await.unwrap();

        let (_id, mut rx) = recorder.subscribe_channel(&[EventType::Info]).unwrap();
        recorder.prepare().await.unwrap();
        recorder.start().await.unwrap();

        assert_eq!(next_info(&mut rx).await, InfoKind::MaxFileSizeApproaching);
        assert_eq!(next_info(&mut rx).await, InfoKind::MaxFileSizeReached);
        assert_eq!(
            next_info(&mut rx).await,
            InfoKind::NextOutputFileStarted {
                uri: "file:///tmp/memo-2.m4a".to_string()
            }
        );
        assert_eq!(recorder.state(), SessionState::Running);
    }

    #[tokio::test]
    async fn test_pause_resume_cycle() {
        let service = service(false);
        let recorder = service.create_recorder().unwrap();
        recorder.configure_with(&voice_memo()).await.unwrap();
        recorder.prepare().await.unwrap();
        recorder.start().await.unwrap();

        recorder.pause().await.unwrap();
        assert_eq!(recorder.state(), SessionState::Paused);
        recorder.resume().await.unwrap();
        assert_eq!(recorder.state(), SessionState::Running);
        recorder.stop().await.unwrap();
        assert_eq!(recorder.state(), SessionState::Stopped);
    }
}
