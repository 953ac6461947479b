use async_trait::async_trait;
use log::{debug, trace};

use super::{BackendNotifier, MediaBackend};
use crate::capability::CodecCapability;
use crate::error::{MediaError, MediaResult};
use crate::format::{keys, Format};
use crate::models::{BufferFlags, BufferInfo, SurfaceId};

/// Software codec that copies every input payload to an output frame.
/// It negotiates formats like a real codec (aligned sizes, stride) so every
/// engine path can be exercised without media processing.
pub struct PassthroughCodec {
    capability: CodecCapability,
    notifier: Option<BackendNotifier>,
    negotiated: Option<Format>,
    format_announced: bool,
    running: bool,
    input_surface: Option<SurfaceId>,
    frames_in: u64,
    frames_rendered: u64,
}

impl PassthroughCodec {
    pub fn new(capability: CodecCapability) -> Self {
        Self {
            capability,
            notifier: None,
            negotiated: None,
            format_announced: false,
            running: false,
            input_surface: None,
            frames_in: 0,
            frames_rendered: 0,
        }
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Output format for a configured descriptor
    pub fn negotiate(&self, format: &Format) -> Format {
        let mut out = format.clone();
        if out.mime().is_none() {
            out.set(keys::CODEC_MIME, self.capability.mime.as_str());
        }

        if self.capability.media_type().has_video() {
            if let (Some(width), Some(height)) = (out.get_int(keys::WIDTH), out.get_int(keys::HEIGHT)) {
                let (width, height) = self.capability.aligned_size(width, height);
                out.set(keys::WIDTH, width);
                out.set(keys::HEIGHT, height);
                out.set(keys::STRIDE, width);
                out.set(keys::SLICE_HEIGHT, height);
            }
        }
        out
    }

    fn notifier(&self) -> MediaResult<&BackendNotifier> {
        self.notifier
            .as_ref()
            .ok_or_else(|| MediaError::Unknown("pass-through codec used before attach".to_string()))
    }

    fn announce_format(&mut self) -> MediaResult<()> {
        if self.format_announced {
            return Ok(());
        }
        let format = self
            .negotiated
            .clone()
            .ok_or_else(|| MediaError::Unknown("no negotiated format before first output".to_string()))?;
        debug!("{} output format {}", self.capability.name, format);
        self.notifier()?.format_changed(format);
        self.format_announced = true;
        Ok(())
    }
}

#[async_trait]
impl MediaBackend for PassthroughCodec {
    fn name(&self) -> &str {
        &self.capability.name
    }

    fn attach(&mut self, notifier: BackendNotifier) {
        self.notifier = Some(notifier);
    }

    async fn configure(&mut self, format: &Format) -> MediaResult<()> {
        self.negotiated = Some(self.negotiate(format));
        Ok(())
    }

    async fn prepare(&mut self, format: &Format) -> MediaResult<()> {
        self.negotiated = Some(self.negotiate(format));
        self.format_announced = false;
        Ok(())
    }

    async fn start(&mut self) -> MediaResult<()> {
        self.running = true;
        Ok(())
    }

    async fn stop(&mut self) -> MediaResult<()> {
        self.running = false;
        self.format_announced = false;
        Ok(())
    }

    async fn flush(&mut self) -> MediaResult<()> {
        // nothing is held between calls
        Ok(())
    }

    async fn reset(&mut self) -> MediaResult<()> {
        self.running = false;
        self.negotiated = None;
        self.format_announced = false;
        self.input_surface = None;
        self.frames_in = 0;
        Ok(())
    }

    fn queue_input(&mut self, data: &[u8], info: BufferInfo, flags: BufferFlags) -> MediaResult<()> {
        if !self.running {
            return Err(MediaError::Unknown("input queued to a stopped codec".to_string()));
        }
        self.frames_in += 1;
        trace!(
            "{} input #{}: {} bytes pts={} flags={}",
            self.capability.name,
            self.frames_in,
            data.len(),
            info.presentation_time_us,
            flags
        );

        // codec-specific data is consumed without producing a frame
        if flags.is_codec_config() && !flags.is_end_of_stream() {
            return Ok(());
        }

        self.announce_format()?;
        self.notifier()?.output(data.to_vec(), info.presentation_time_us, flags);
        Ok(())
    }

    fn render(&mut self, surface: Option<&SurfaceId>, data: &[u8], info: &BufferInfo) -> MediaResult<()> {
        self.frames_rendered += 1;
        trace!(
            "{} rendered {} bytes pts={} to {}",
            self.capability.name,
            data.len(),
            info.presentation_time_us,
            surface.map(SurfaceId::as_str).unwrap_or("default display")
        );
        Ok(())
    }

    fn set_parameter(&mut self, format: &Format) -> MediaResult<()> {
        if let Some(negotiated) = self.negotiated.as_mut() {
            negotiated.merge(format);
        }
        Ok(())
    }

    fn create_input_surface(&mut self) -> MediaResult<SurfaceId> {
        if !(self.capability.kind.is_encoder() && self.capability.media_type().has_video()) {
            return Err(MediaError::unsupported("input surfaces need a video encoder"));
        }
        let surface = SurfaceId::generate("encoder-input");
        self.input_surface = Some(surface.clone());
        Ok(surface)
    }

    fn signal_end_of_input(&mut self) -> MediaResult<()> {
        if self.input_surface.is_none() {
            return Err(MediaError::unsupported("no input surface to end"));
        }
        self.announce_format()?;
        self.notifier()?.output(Vec::new(), 0, BufferFlags::END_OF_STREAM);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendEvent;
    use crate::capability::{CapabilityTable, CodecKind};

    fn codec(kind: CodecKind, mime: &str) -> PassthroughCodec {
        let caps = CapabilityTable::builtin().capabilities(kind, mime).cloned().unwrap();
        PassthroughCodec::new(caps)
    }

    #[test]
    fn test_negotiate_aligns_video_size() {
        let codec = codec(CodecKind::VideoDecoder, "video/avc");
        let format = Format::new().with(keys::WIDTH, 1279).with(keys::HEIGHT, 719);
        let out = codec.negotiate(&format);

        assert_eq!(out.get_int(keys::WIDTH), Some(1280));
        assert_eq!(out.get_int(keys::HEIGHT), Some(720));
        assert_eq!(out.get_int(keys::STRIDE), Some(1280));
        assert_eq!(out.get_int(keys::SLICE_HEIGHT), Some(720));
        assert_eq!(out.mime(), Some("video/avc"));
        assert!(out.contains_keys_of(&format));
    }

    #[test]
    fn test_negotiate_leaves_audio_alone() {
        let codec = codec(CodecKind::AudioDecoder, "audio/mp4a-latm");
        let format = Format::new().with(keys::SAMPLE_RATE, 44100).with(keys::CHANNEL_COUNT, 2);
        let out = codec.negotiate(&format);
        assert_eq!(out.get_int(keys::SAMPLE_RATE), Some(44100));
        assert!(!out.contains_key(keys::STRIDE));
    }

    #[tokio::test]
    async fn test_format_precedes_first_output() {
        let mut codec = codec(CodecKind::AudioDecoder, "audio/mp4a-latm");
        let (notifier, mut rx) = BackendNotifier::channel();
        codec.attach(notifier);
        codec.prepare(&Format::new().with(keys::SAMPLE_RATE, 48000)).await.unwrap();
        codec.start().await.unwrap();

        codec.queue_input(b"csd", BufferInfo::sized(3, 0), BufferFlags::CODEC_CONFIG).unwrap();
        codec.queue_input(b"frame", BufferInfo::sized(5, 1000), BufferFlags::NONE).unwrap();
        codec.queue_input(b"", BufferInfo::sized(0, 2000), BufferFlags::END_OF_STREAM).unwrap();

        assert!(matches!(rx.recv().await, Some(BackendEvent::OutputFormatChanged(_))));
        match rx.recv().await {
            Some(BackendEvent::Output { data, .. }) => assert_eq!(data, b"frame"),
            other => panic!("unexpected {:?}", other),
        }
        match rx.recv().await {
            Some(BackendEvent::Output { data, flags, .. }) => {
                assert!(data.is_empty());
                assert!(flags.is_end_of_stream());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_input_surface_only_on_video_encoder() {
        let mut decoder = codec(CodecKind::VideoDecoder, "video/avc");
        assert!(decoder.create_input_surface().is_err());

        let mut encoder = codec(CodecKind::VideoEncoder, "video/avc");
        let (notifier, mut rx) = BackendNotifier::channel();
        encoder.attach(notifier);
        encoder.prepare(&Format::new()).await.unwrap();
        let surface = encoder.create_input_surface().unwrap();
        assert!(surface.as_str().starts_with("encoder-input-"));

        encoder.signal_end_of_input().unwrap();
        assert!(matches!(rx.recv().await, Some(BackendEvent::OutputFormatChanged(_))));
        assert!(matches!(rx.recv().await, Some(BackendEvent::Output { flags, .. }) if flags.is_end_of_stream()));
    }

    #[test]
    fn test_queue_before_start_fails() {
        let mut codec = codec(CodecKind::AudioEncoder, "audio/mp4a-latm");
        let (notifier, _rx) = BackendNotifier::channel();
        codec.attach(notifier);
        assert!(codec.queue_input(b"x", BufferInfo::sized(1, 0), BufferFlags::NONE).is_err());
    }
}
