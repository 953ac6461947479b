use super::actor::Command;
use super::completion::Completion;
use super::{MediaSession, SessionHandle};
use crate::capability::CodecCapability;
use crate::models::{BufferFlags, BufferIndex, BufferInfo, SurfaceId};

/// Encoder or decoder session exchanging buffers with the caller.
///
/// Inputs are granted through `InputAvailable` events once the session is
/// running: fill the shared memory, then hand the slot back with
/// [`queue_input`](Self::queue_input). Produced frames arrive as
/// `OutputAvailable` events and stay with the caller until
/// [`release_output`](Self::release_output). The last input carries
/// [`BufferFlags::END_OF_STREAM`]; exactly one output flagged the same way
/// follows it.
#[derive(Clone, Debug)]
pub struct CodecProcessor {
    handle: SessionHandle,
    capability: CodecCapability,
}

impl MediaSession for CodecProcessor {
    fn handle(&self) -> &SessionHandle {
        &self.handle
    }
}

impl CodecProcessor {
    pub(crate) fn new(handle: SessionHandle, capability: CodecCapability) -> Self {
        Self { handle, capability }
    }

    /// Limits of the codec behind this session
    pub fn capability(&self) -> &CodecCapability {
        &self.capability
    }

    /// Video decoders only. Frames go straight to `surface` and no output
    /// buffers are granted.
    pub fn set_output_surface(&self, surface: SurfaceId) -> Completion<()> {
        self.handle.submit(|reply| Command::SetOutputSurface(surface, reply))
    }

    /// Video encoders only. The producer draws into the returned surface
    /// and no input buffers are granted.
    pub fn create_input_surface(&self) -> Completion<SurfaceId> {
        self.handle.submit(Command::CreateInputSurface)
    }

    pub fn queue_input(&self, index: BufferIndex, info: BufferInfo, flags: BufferFlags) -> Completion<()> {
        self.handle.submit(|reply| Command::QueueInput {
            index,
            info,
            flags,
            reply,
        })
    }

    /// Give an output slot back. `render` shows the frame on video sessions.
    pub fn release_output(&self, index: BufferIndex, render: bool) -> Completion<()> {
        self.handle.submit(|reply| Command::ReleaseOutput { index, render, reply })
    }

    pub fn flush(&self) -> Completion<()> {
        self.handle.submit(Command::Flush)
    }

    /// End of input for input-surface mode
    pub fn notify_end_of_stream(&self) -> Completion<()> {
        self.handle.submit(Command::NotifyEndOfStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::scripted::Script;
    use crate::backend::BackendEvent;
    use crate::config::{EngineConfig, FeatureGates};
    use crate::error::{ErrorKind, MediaError};
    use crate::format::{keys, Format};
    use crate::service::MediaService;
    use crate::session::testing::{scripted_decoder, test_config};
    use crate::session::{EventType, Operation, SessionEvent, SessionState, SharedMemory};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn aac() -> Format {
        Format::new()
            .with(keys::CODEC_MIME, "audio/mp4a-latm")
            .with(keys::SAMPLE_RATE, 44100)
            .with(keys::CHANNEL_COUNT, 2)
    }

    fn drain(rx: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn granted(events: &[SessionEvent]) -> Vec<(BufferIndex, SharedMemory)> {
        events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::InputAvailable { index, memory } => Some((*index, memory.clone())),
                _ => None,
            })
            .collect()
    }

    fn outputs(events: &[SessionEvent]) -> Vec<(BufferIndex, BufferFlags)> {
        events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::OutputAvailable { index, flags, .. } => Some((*index, *flags)),
                _ => None,
            })
            .collect()
    }

    async fn running(script: Script) -> (CodecProcessor, UnboundedReceiver<SessionEvent>) {
        let (decoder, _script) = scripted_decoder(script, test_config());
        decoder.configure(aac()).await.unwrap();
        decoder.prepare().await.unwrap();
        let (_id, rx) = decoder.subscribe_channel(&[]).unwrap();
        decoder.start().await.unwrap();
        (decoder, rx)
    }

    async fn queue(decoder: &CodecProcessor, index: BufferIndex, memory: &SharedMemory, data: &[u8], flags: BufferFlags) {
        memory.write(0, data).unwrap();
        decoder
            .queue_input(index, BufferInfo::sized(data.len(), 0), flags)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_grants_every_input_in_order() {
        let (decoder, mut rx) = running(Script::default()).await;
        // round trip so every published event is in the channel
        decoder.output_format().await.unwrap();

        let indices: Vec<_> = granted(&drain(&mut rx)).into_iter().map(|(index, _)| index).collect();
        assert_eq!(indices, vec![BufferIndex(0), BufferIndex(1)]);
        assert_eq!(decoder.status().buffers.inputs_held_by_caller, 2);
    }

    #[tokio::test]
    async fn test_end_of_stream_is_delivered_once() {
        let (decoder, mut rx) = running(Script {
            duplicate_outputs: true,
            ..Script::default()
        })
        .await;
        decoder.output_format().await.unwrap();
        let inputs = granted(&drain(&mut rx));
        let (first, memory) = &inputs[0];

        queue(&decoder, *first, memory, b"", BufferFlags::END_OF_STREAM).await;
        decoder.output_format().await.unwrap();

        let events = drain(&mut rx);
        let eos: Vec<_> = outputs(&events)
            .into_iter()
            .filter(|(_, flags)| flags.is_end_of_stream())
            .collect();
        assert_eq!(eos.len(), 1);
        assert!(granted(&events).is_empty(), "no input grants after end of stream");

        let (second, memory) = &inputs[1];
        memory.write(0, b"late").unwrap();
        let err = decoder
            .queue_input(*second, BufferInfo::sized(4, 0), BufferFlags::NONE)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_queue_input_twice_is_invalid_argument() {
        let (decoder, mut rx) = running(Script::default()).await;
        decoder.output_format().await.unwrap();
        let inputs = granted(&drain(&mut rx));
        let (index, memory) = &inputs[1];

        queue(&decoder, *index, memory, b"frame", BufferFlags::NONE).await;
        // a consumed slot goes back to the caller with a fresh grant
        let regranted = granted(&drain(&mut rx));
        assert_eq!(regranted.len(), 1);
        assert_eq!(regranted[0].0, *index);

        let (index, memory) = &inputs[0];
        queue(&decoder, *index, memory, b"", BufferFlags::END_OF_STREAM).await;
        let err = decoder
            .queue_input(*index, BufferInfo::sized(0, 0), BufferFlags::NONE)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = decoder
            .queue_input(BufferIndex(7), BufferInfo::sized(1, 0), BufferFlags::NONE)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_region_must_fit_the_buffer() {
        let (decoder, mut rx) = running(Script::default()).await;
        decoder.output_format().await.unwrap();
        let inputs = granted(&drain(&mut rx));

        let err = decoder
            .queue_input(inputs[0].0, BufferInfo::new(60, 10, 0), BufferFlags::NONE)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(decoder.state(), SessionState::Running);
    }

    #[tokio::test]
    async fn test_release_output_twice_is_invalid_argument() {
        let (decoder, mut rx) = running(Script::default()).await;
        decoder.output_format().await.unwrap();
        let inputs = granted(&drain(&mut rx));
        queue(&decoder, inputs[0].0, &inputs[0].1, b"frame", BufferFlags::NONE).await;
        decoder.output_format().await.unwrap();

        let produced = outputs(&drain(&mut rx));
        let (index, _) = produced[0];
        decoder.release_output(index, false).await.unwrap();
        let err = decoder.release_output(index, false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_outputs_wait_for_free_slots() {
        let (decoder, mut rx) = running(Script {
            duplicate_outputs: true,
            ..Script::default()
        })
        .await;
        decoder.output_format().await.unwrap();
        let inputs = granted(&drain(&mut rx));

        // two inputs, four frames, two output slots
        queue(&decoder, inputs[0].0, &inputs[0].1, b"one", BufferFlags::NONE).await;
        queue(&decoder, inputs[1].0, &inputs[1].1, b"two", BufferFlags::NONE).await;
        decoder.output_format().await.unwrap();

        let delivered = outputs(&drain(&mut rx));
        assert_eq!(delivered.len(), 2);
        assert_eq!(decoder.status().buffers.pending_outputs, 2);

        decoder.release_output(delivered[0].0, false).await.unwrap();
        let next = outputs(&drain(&mut rx));
        assert_eq!(next, vec![(delivered[0].0, BufferFlags::NONE)]);
        assert_eq!(decoder.status().buffers.pending_outputs, 1);
    }

    #[tokio::test]
    async fn test_flush_drops_pending_and_invalidates_outputs() {
        let (decoder, mut rx) = running(Script {
            duplicate_outputs: true,
            ..Script::default()
        })
        .await;
        decoder.output_format().await.unwrap();
        let inputs = granted(&drain(&mut rx));
        queue(&decoder, inputs[0].0, &inputs[0].1, b"one", BufferFlags::NONE).await;
        queue(&decoder, inputs[1].0, &inputs[1].1, b"two", BufferFlags::NONE).await;
        decoder.output_format().await.unwrap();
        let delivered = outputs(&drain(&mut rx));

        decoder.flush().await.unwrap();
        let stats = decoder.status().buffers;
        assert_eq!(stats.pending_outputs, 0);
        assert_eq!(stats.outputs_held_by_caller, 0);
        assert_eq!(stats.inputs_held_by_caller, 2);

        // inputs come back as fresh grants in index order
        let regranted: Vec<u32> = granted(&drain(&mut rx)).iter().map(|(index, _)| index.0).collect();
        assert_eq!(regranted, vec![0, 1]);

        let err = decoder.release_output(delivered[0].0, false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(decoder.state(), SessionState::Running);
    }

    #[tokio::test]
    async fn test_stop_reclaims_caller_buffers() {
        let (decoder, _rx) = running(Script::default()).await;
        decoder.stop().await.unwrap();
        assert_eq!(decoder.state(), SessionState::Stopped);

        let err = decoder
            .queue_input(BufferIndex(0), BufferInfo::sized(0, 0), BufferFlags::NONE)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        decoder.prepare().await.unwrap();
        decoder.start().await.unwrap();
        assert_eq!(decoder.status().buffers.inputs_held_by_caller, 2);
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_prepare() {
        let (decoder, script) = scripted_decoder(
            Script {
                prepare_delay: Some(Duration::from_secs(1)),
                ..Script::default()
            },
            test_config(),
        );
        decoder.configure(aac()).await.unwrap();

        let prepare = decoder.prepare();
        let stop = decoder.stop();
        let err = prepare.await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        stop.await.unwrap();
        assert_eq!(decoder.state(), SessionState::Stopped);
        assert!(!script.calls().contains(&"prepared"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_waits_when_async_reset_is_off() {
        let config = Arc::new(EngineConfig {
            features: FeatureGates {
                async_reset: false,
                ..FeatureGates::default()
            },
            ..(*test_config()).clone()
        });
        let (decoder, script) = scripted_decoder(
            Script {
                prepare_delay: Some(Duration::from_millis(500)),
                ..Script::default()
            },
            config,
        );
        decoder.configure(aac()).await.unwrap();

        let prepare = decoder.prepare();
        let reset = decoder.reset();
        prepare.await.unwrap();
        reset.await.unwrap();
        assert_eq!(decoder.state(), SessionState::Idle);
        assert_eq!(script.calls(), vec!["configure", "prepare", "prepared", "reset"]);
    }

    #[tokio::test]
    async fn test_input_surface_mode() {
        let service = MediaService::with_config(EngineConfig::default()).unwrap();
        let encoder = service.create_encoder_by_mime("video/avc").unwrap();
        let format = Format::new()
            .with(keys::CODEC_MIME, "video/avc")
            .with(keys::WIDTH, 1280)
            .with(keys::HEIGHT, 720)
            .with(keys::FRAME_RATE, 30);
        encoder.configure(format).await.unwrap();
        let surface = encoder.create_input_surface().await.unwrap();
        assert!(surface.as_str().starts_with("encoder-input-"));

        encoder.prepare().await.unwrap();
        let (_id, mut rx) = encoder.subscribe_channel(&[]).unwrap();
        encoder.start().await.unwrap();

        let err = encoder
            .queue_input(BufferIndex(0), BufferInfo::sized(0, 0), BufferFlags::NONE)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);

        encoder.notify_end_of_stream().await.unwrap();
        let err = encoder.notify_end_of_stream().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let events = drain(&mut rx);
        assert!(granted(&events).is_empty());
        let produced = outputs(&events);
        assert_eq!(produced.len(), 1);
        assert!(produced[0].1.is_end_of_stream());
    }

    #[tokio::test]
    async fn test_notify_end_of_stream_needs_input_surface() {
        let service = MediaService::with_config(EngineConfig::default()).unwrap();
        let encoder = service.create_encoder_by_mime("video/avc").unwrap();
        encoder
            .configure(Format::new().with(keys::WIDTH, 640).with(keys::HEIGHT, 480))
            .await
            .unwrap();
        encoder.prepare().await.unwrap();
        encoder.start().await.unwrap();

        let err = encoder.notify_end_of_stream().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_audio_decoder_rejects_surfaces() {
        let (decoder, _script) = scripted_decoder(Script::default(), test_config());
        decoder.configure(aac()).await.unwrap();
        let err = decoder
            .set_output_surface(SurfaceId::new("display"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_flush_applies_a_waiting_format_change() {
        let (decoder, script) = scripted_decoder(
            Script {
                duplicate_outputs: true,
                ..Script::default()
            },
            test_config(),
        );
        decoder.configure(aac()).await.unwrap();
        decoder.prepare().await.unwrap();
        let (_id, mut rx) = decoder.subscribe_channel(&[]).unwrap();
        decoder.start().await.unwrap();
        decoder.output_format().await.unwrap();
        let inputs = granted(&drain(&mut rx));
        queue(&decoder, inputs[0].0, &inputs[0].1, b"one", BufferFlags::NONE).await;
        queue(&decoder, inputs[1].0, &inputs[1].1, b"two", BufferFlags::NONE).await;
        decoder.output_format().await.unwrap();
        assert_eq!(decoder.status().buffers.pending_outputs, 2);
        drain(&mut rx);

        // lands behind the two waiting frames
        assert!(script.post(BackendEvent::OutputFormatChanged(aac().with(keys::SAMPLE_RATE, 48000))));
        let format = decoder.output_format().await.unwrap();
        assert_eq!(format.get_int(keys::SAMPLE_RATE), Some(44100));

        decoder.flush().await.unwrap();
        let format = decoder.output_format().await.unwrap();
        assert_eq!(format.get_int(keys::SAMPLE_RATE), Some(48000));
        assert_eq!(decoder.status().output_format.unwrap().get_int(keys::SAMPLE_RATE), Some(48000));

        let announced: Vec<i64> = drain(&mut rx)
            .iter()
            .filter_map(|event| match event {
                SessionEvent::OutputFormatChanged(format) => format.get_int(keys::SAMPLE_RATE),
                _ => None,
            })
            .collect();
        assert_eq!(announced, vec![48000]);
    }

    #[tokio::test]
    async fn test_fatal_error_is_kept_without_subscribers() {
        let (decoder, _script) = scripted_decoder(
            Script {
                prepare_error: Some(MediaError::Io("device lost".to_string())),
                ..Script::default()
            },
            test_config(),
        );
        decoder.configure(aac()).await.unwrap();

        let err = decoder.prepare().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
        assert_eq!(decoder.state(), SessionState::Error);
        assert_eq!(decoder.last_error().map(|e| e.kind()), Some(ErrorKind::IoFailure));

        // later rejected requests leave it in place
        decoder.start().await.unwrap_err();
        assert_eq!(decoder.last_error().map(|e| e.kind()), Some(ErrorKind::IoFailure));
    }

    #[tokio::test]
    async fn test_fatal_error_reaches_every_subscriber() {
        let (decoder, _script) = scripted_decoder(
            Script {
                start_error: Some(MediaError::ServiceDied("codec process exited".to_string())),
                ..Script::default()
            },
            test_config(),
        );
        let (_first, mut errors) = decoder.subscribe_channel(&[EventType::Error]).unwrap();
        let (_second, mut everything) = decoder.subscribe_channel(&[]).unwrap();
        decoder.configure(aac()).await.unwrap();
        decoder.prepare().await.unwrap();

        let err = decoder.start().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceDied);

        let errors = drain(&mut errors);
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], SessionEvent::Error(MediaError::ServiceDied(_))));

        let everything = drain(&mut everything);
        assert!(everything
            .iter()
            .any(|event| matches!(event, SessionEvent::Error(MediaError::ServiceDied(_)))));
        assert!(everything.iter().any(|event| matches!(
            event,
            SessionEvent::StateChanged {
                to: SessionState::Error,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_error_state_accepts_only_reset_and_release() {
        let (decoder, _script) = scripted_decoder(
            Script {
                prepare_error: Some(MediaError::OutOfMemory("no codec memory".to_string())),
                ..Script::default()
            },
            test_config(),
        );
        decoder.configure(aac()).await.unwrap();
        decoder.prepare().await.unwrap_err();
        assert_eq!(decoder.state(), SessionState::Error);

        let rejected = [
            decoder.configure(aac()).await,
            decoder.prepare().await,
            decoder.start().await,
            decoder.stop().await,
            decoder.flush().await,
            decoder.set_parameter(Format::new().with(keys::BITRATE, 64_000)).await,
        ];
        for result in rejected {
            match result.unwrap_err() {
                MediaError::InvalidState { state, .. } => assert_eq!(state, SessionState::Error),
                other => panic!("Expected InvalidState, got {:?}", other),
            }
        }
        assert_eq!(decoder.state(), SessionState::Error);

        decoder.reset().await.unwrap();
        assert_eq!(decoder.state(), SessionState::Idle);
        assert!(decoder.last_error().is_none());
        decoder.release().await.unwrap();
        assert_eq!(decoder.state(), SessionState::Released);
    }

    #[tokio::test]
    async fn test_failed_reset_leaves_release_available() {
        let (decoder, script) = scripted_decoder(
            Script {
                start_error: Some(MediaError::Unknown("wedged".to_string())),
                reset_error: Some(MediaError::Io("reset failed".to_string())),
                ..Script::default()
            },
            test_config(),
        );
        decoder.configure(aac()).await.unwrap();
        decoder.prepare().await.unwrap();
        decoder.start().await.unwrap_err();
        assert_eq!(decoder.state(), SessionState::Error);

        let err = decoder.reset().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
        assert_eq!(decoder.state(), SessionState::Error);
        assert_eq!(decoder.last_error().map(|e| e.kind()), Some(ErrorKind::IoFailure));

        decoder.release().await.unwrap();
        assert_eq!(decoder.state(), SessionState::Released);
        assert_eq!(script.calls().last(), Some(&"release"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_timeout_moves_to_error() {
        let (decoder, _script) = scripted_decoder(
            Script {
                configure_delay: Some(Duration::from_secs(5)),
                ..Script::default()
            },
            test_config(),
        );

        match decoder.configure(aac()).await.unwrap_err() {
            MediaError::Timeout { operation, after } => {
                assert_eq!(operation, Operation::Configure);
                assert_eq!(after, Duration::from_millis(2000));
            }
            other => panic!("Expected Timeout, got {:?}", other),
        }
        assert_eq!(decoder.state(), SessionState::Error);
        assert_eq!(decoder.last_error().map(|e| e.kind()), Some(ErrorKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_cancels_pending_prepare() {
        let (decoder, script) = scripted_decoder(
            Script {
                prepare_delay: Some(Duration::from_secs(1)),
                ..Script::default()
            },
            test_config(),
        );
        decoder.configure(aac()).await.unwrap();

        let prepare = decoder.prepare();
        let release = decoder.release();
        match prepare.await.unwrap_err() {
            MediaError::Cancelled { operation, by } => {
                assert_eq!(operation, Operation::Prepare);
                assert_eq!(by, Operation::Release);
            }
            other => panic!("Expected Cancelled, got {:?}", other),
        }
        release.await.unwrap();
        assert_eq!(decoder.state(), SessionState::Released);
        assert!(!script.calls().contains(&"prepared"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_pending_prepare() {
        let (decoder, script) = scripted_decoder(
            Script {
                prepare_delay: Some(Duration::from_secs(1)),
                ..Script::default()
            },
            test_config(),
        );
        decoder.configure(aac()).await.unwrap();

        let prepare = decoder.prepare();
        let reset = decoder.reset();
        let err = prepare.await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(matches!(
            err,
            MediaError::Cancelled {
                operation: Operation::Prepare,
                by: Operation::Reset
            }
        ));
        reset.await.unwrap();
        assert_eq!(decoder.state(), SessionState::Idle);
        assert!(decoder.last_error().is_none());
        assert!(!script.calls().contains(&"prepared"));
    }

    #[tokio::test]
    async fn test_max_input_size_is_bounded() {
        let config = Arc::new(EngineConfig {
            max_buffer_capacity: 1024,
            ..(*test_config()).clone()
        });
        let (decoder, _script) = scripted_decoder(Script::default(), config);

        let err = decoder
            .configure(aac().with(keys::MAX_INPUT_SIZE, 1i64 << 40))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        match err {
            MediaError::ParameterOutOfRange { key, max, .. } => {
                assert_eq!(key, keys::MAX_INPUT_SIZE);
                assert_eq!(max, "1024");
            }
            other => panic!("Expected ParameterOutOfRange, got {:?}", other),
        }
        let err = decoder.configure(aac().with(keys::MAX_INPUT_SIZE, -1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(decoder.state(), SessionState::Idle);

        decoder.configure(aac().with(keys::MAX_INPUT_SIZE, 1024)).await.unwrap();
        decoder.prepare().await.unwrap();
        let err = decoder
            .set_parameter(Format::new().with(keys::MAX_INPUT_SIZE, 4096))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let (_id, mut rx) = decoder.subscribe_channel(&[EventType::InputAvailable]).unwrap();
        decoder.start().await.unwrap();
        let inputs = granted(&drain(&mut rx));
        assert_eq!(inputs.len(), 2);
        assert!(inputs.iter().all(|(_, memory)| memory.capacity() == 1024));
    }
}
