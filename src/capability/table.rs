use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

use super::{BlockSize, CodecCapability, CodecKind, Range};
use crate::error::{ConfigError, MediaError, MediaResult};
use crate::format::Format;
use crate::models::MediaType;

static GLOBAL_TABLE: OnceLock<CapabilityTable> = OnceLock::new();

const AUDIO_RATES: &[i64] = &[8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000];
const HIGH_AUDIO_RATES: &[i64] = &[64000, 88200, 96000];

/// The set of codecs known to the process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityTable {
    #[serde(rename = "codec", default)]
    codecs: Vec<CodecCapability>,
}

impl CapabilityTable {
    pub fn new(codecs: Vec<CodecCapability>) -> Self {
        Self { codecs }
    }

    /// Software codecs that ship with the engine
    pub fn builtin() -> Self {
        let mut all_audio_rates = AUDIO_RATES.to_vec();
        all_audio_rates.extend_from_slice(HIGH_AUDIO_RATES);

        let audio = |name: &str, kind: CodecKind, mime: &str, bitrate: Range, channels: Range, rates: &[i64]| {
            CodecCapability {
                name: name.to_string(),
                kind,
                mime: mime.to_string(),
                is_vendor: false,
                bitrate,
                channels,
                complexity: Range::default(),
                quality: Range::default(),
                width: Range::default(),
                height: Range::default(),
                frame_rate: Range::default(),
                alignment: Range::default(),
                block_size: BlockSize::default(),
                blocks_per_second: Range::default(),
                sample_rates: rates.to_vec(),
                pixel_formats: Vec::new(),
                profiles: Vec::new(),
                levels: Vec::new(),
                bitrate_modes: Vec::new(),
            }
        };

        let video = |name: &str, kind: CodecKind, mime: &str, width: Range, height: Range| CodecCapability {
            name: name.to_string(),
            kind,
            mime: mime.to_string(),
            is_vendor: false,
            bitrate: Range::new(1, 40_000_000),
            channels: Range::default(),
            complexity: Range::default(),
            quality: if kind.is_encoder() { Range::new(0, 100) } else { Range::default() },
            width,
            height,
            frame_rate: Range::new(1, 60),
            alignment: Range::new(2, 2),
            block_size: BlockSize { width: 16, height: 16 },
            blocks_per_second: Range::new(1, 489_600),
            sample_rates: Vec::new(),
            // YUVI420, NV12, NV21
            pixel_formats: vec![1, 2, 3],
            profiles: Vec::new(),
            levels: Vec::new(),
            bitrate_modes: if kind.is_encoder() { vec![0, 1] } else { Vec::new() },
        };

        Self::new(vec![
            audio(
                "sw.aac.decoder",
                CodecKind::AudioDecoder,
                "audio/mp4a-latm",
                Range::new(8_000, 960_000),
                Range::new(1, 8),
                &all_audio_rates[..],
            ),
            audio(
                "sw.aac.encoder",
                CodecKind::AudioEncoder,
                "audio/mp4a-latm",
                Range::new(8_000, 448_000),
                Range::new(1, 2),
                &all_audio_rates[..],
            ),
            audio(
                "sw.mp3.decoder",
                CodecKind::AudioDecoder,
                "audio/mpeg",
                Range::new(8_000, 320_000),
                Range::new(1, 2),
                AUDIO_RATES,
            ),
            audio(
                "sw.flac.decoder",
                CodecKind::AudioDecoder,
                "audio/flac",
                Range::new(1, 2_100_000),
                Range::new(1, 8),
                &[AUDIO_RATES, HIGH_AUDIO_RATES, &[176_400, 192_000]].concat()[..],
            ),
            video(
                "sw.avc.decoder",
                CodecKind::VideoDecoder,
                "video/avc",
                Range::new(2, 4096),
                Range::new(2, 2304),
            ),
            video(
                "sw.avc.encoder",
                CodecKind::VideoEncoder,
                "video/avc",
                Range::new(16, 1920),
                Range::new(16, 1080),
            ),
            video(
                "sw.hevc.decoder",
                CodecKind::VideoDecoder,
                "video/hevc",
                Range::new(2, 4096),
                Range::new(2, 2160),
            ),
        ])
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let table: CapabilityTable = toml::from_str(content)?;
        table.validate()?;
        Ok(table)
    }

    /// Load a capability file: a list of `[[codec]]` tables
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let table = Self::from_toml_str(&content)?;
        info!("Loaded {} codec capabilities from {}", table.codecs.len(), path.display());
        Ok(table)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (position, codec) in self.codecs.iter().enumerate() {
            if codec.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue(format!("codec #{} has no name", position)));
            }
            if MediaType::from_mime(&codec.mime) != Some(codec.kind.media_type()) {
                return Err(ConfigError::InvalidValue(format!(
                    "codec '{}' has mime '{}' which does not match kind {}",
                    codec.name, codec.mime, codec.kind
                )));
            }
        }
        Ok(())
    }

    /// Install the process-wide table. The table can be set once; installing
    /// a different table after that is an error, installing an equal one is not.
    pub(crate) fn install(table: CapabilityTable) -> Result<&'static CapabilityTable, ConfigError> {
        let mut candidate = Some(table);
        let global = GLOBAL_TABLE.get_or_init(|| candidate.take().unwrap_or_default());
        match candidate {
            Some(rejected) if rejected != *global => {
                warn!("Capability table already initialised; keeping the existing one");
                Err(ConfigError::InvalidValue(format!(
                    "capability table already initialised with {} codecs; cannot replace it with {}",
                    global.len(),
                    rejected.len()
                )))
            }
            _ => Ok(global),
        }
    }

    /// The process-wide table, built-in defaults unless a file was installed first
    pub fn global() -> &'static CapabilityTable {
        GLOBAL_TABLE.get_or_init(|| {
            debug!("Initialising built-in capability table");
            CapabilityTable::builtin()
        })
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CodecCapability> {
        self.codecs.iter()
    }

    pub fn of_kind(&self, kind: CodecKind) -> impl Iterator<Item = &CodecCapability> {
        self.codecs.iter().filter(move |c| c.kind == kind)
    }

    pub fn audio_decoders(&self) -> Vec<&CodecCapability> {
        self.of_kind(CodecKind::AudioDecoder).collect()
    }

    pub fn audio_encoders(&self) -> Vec<&CodecCapability> {
        self.of_kind(CodecKind::AudioEncoder).collect()
    }

    pub fn video_decoders(&self) -> Vec<&CodecCapability> {
        self.of_kind(CodecKind::VideoDecoder).collect()
    }

    pub fn video_encoders(&self) -> Vec<&CodecCapability> {
        self.of_kind(CodecKind::VideoEncoder).collect()
    }

    /// Look a codec up by exact name first, then by mime
    pub fn capabilities(&self, kind: CodecKind, mime_or_name: &str) -> Option<&CodecCapability> {
        self.of_kind(kind)
            .find(|c| c.name == mime_or_name)
            .or_else(|| self.of_kind(kind).find(|c| c.mime == mime_or_name))
    }

    pub fn by_name(&self, name: &str) -> Option<&CodecCapability> {
        self.codecs.iter().find(|c| c.name == name)
    }

    pub fn find_decoder(&self, media_type: MediaType, format: &Format) -> MediaResult<Option<String>> {
        self.find_codec(CodecKind::new(media_type, false), format)
    }

    pub fn find_encoder(&self, media_type: MediaType, format: &Format) -> MediaResult<Option<String>> {
        self.find_codec(CodecKind::new(media_type, true), format)
    }

    /// First codec of `kind` that admits `format`
    pub fn find_codec(&self, kind: CodecKind, format: &Format) -> MediaResult<Option<String>> {
        let format = format.normalized();
        if format.mime().map(str::is_empty).unwrap_or(true) {
            return Err(MediaError::invalid_argument("codec lookup needs a codec_mime"));
        }
        format.validate_types()?;

        let found = self.of_kind(kind).find(|c| c.admits(&format)).map(|c| c.name.clone());
        debug!(
            "{} lookup for {} -> {}",
            kind,
            format,
            found.as_deref().unwrap_or("<none>")
        );
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::format::keys;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_builtin_table_is_consistent() {
        let table = CapabilityTable::builtin();
        assert!(table.validate().is_ok());
        assert_eq!(table.audio_decoders().len(), 3);
        assert_eq!(table.audio_encoders().len(), 1);
        assert_eq!(table.video_decoders().len(), 2);
        assert_eq!(table.video_encoders().len(), 1);
    }

    #[test]
    fn test_capabilities_by_name_or_mime() {
        let table = CapabilityTable::builtin();
        let by_mime = table.capabilities(CodecKind::AudioDecoder, "audio/flac").unwrap();
        assert_eq!(by_mime.name, "sw.flac.decoder");
        let by_name = table.capabilities(CodecKind::VideoEncoder, "sw.avc.encoder").unwrap();
        assert_eq!(by_name.mime, "video/avc");
        assert!(table.capabilities(CodecKind::AudioEncoder, "audio/flac").is_none());
    }

    #[test]
    fn test_find_decoder_matches_ranges() {
        let table = CapabilityTable::builtin();
        let format = Format::new()
            .with("mime", "audio/mp4a-latm")
            .with("sampleRate", 44100)
            .with("channels", 2);
        assert_eq!(
            table.find_decoder(MediaType::Audio, &format).unwrap(),
            Some("sw.aac.decoder".to_string())
        );

        let format = format.with(keys::CHANNEL_COUNT, 32);
        assert_eq!(table.find_decoder(MediaType::Audio, &format).unwrap(), None);
    }

    #[test]
    fn test_find_encoder_video_size() {
        let table = CapabilityTable::builtin();
        let format = Format::new()
            .with(keys::CODEC_MIME, "video/avc")
            .with(keys::WIDTH, 1280)
            .with(keys::HEIGHT, 720)
            .with(keys::FRAME_RATE, 29.97);
        assert_eq!(
            table.find_encoder(MediaType::Video, &format).unwrap(),
            Some("sw.avc.encoder".to_string())
        );

        let format = format.with(keys::WIDTH, 3840).with(keys::HEIGHT, 2160);
        assert_eq!(table.find_encoder(MediaType::Video, &format).unwrap(), None);
        assert_eq!(
            table.find_decoder(MediaType::Video, &format).unwrap(),
            Some("sw.avc.decoder".to_string())
        );
    }

    #[test]
    fn test_find_rejects_malformed_input() {
        let table = CapabilityTable::builtin();
        let err = table.find_decoder(MediaType::Audio, &Format::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let format = Format::new().with(keys::CODEC_MIME, "audio/mpeg").with(keys::SAMPLE_RATE, 4.5);
        let err = table.find_decoder(MediaType::Audio, &format).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[[codec]]
name = "vendor.opus.decoder"
kind = "audio_decoder"
mime = "audio/opus"
is_vendor = true
bitrate = {{ min = 6000, max = 510000 }}
channels = {{ min = 1, max = 2 }}
sample_rates = [48000]
"#
        )
        .unwrap();

        let table = CapabilityTable::load(file.path()).unwrap();
        assert_eq!(table.len(), 1);
        let opus = table.by_name("vendor.opus.decoder").unwrap();
        assert!(opus.is_vendor);
        assert_eq!(opus.sample_rates, vec![48000]);
        assert!(opus.width.is_unset());
    }

    #[test]
    fn test_load_rejects_mismatched_kind() {
        let content = r#"
[[codec]]
name = "broken"
kind = "video_decoder"
mime = "audio/opus"
"#;
        assert!(matches!(
            CapabilityTable::from_toml_str(content),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_install_after_initialisation() {
        let global = CapabilityTable::global();
        let same = CapabilityTable::install(global.clone()).unwrap();
        assert!(std::ptr::eq(same, global));

        let other = CapabilityTable::from_toml_str(
            r#"
[[codec]]
name = "vendor.opus.decoder"
kind = "audio_decoder"
mime = "audio/opus"
"#,
        )
        .unwrap();
        assert!(matches!(
            CapabilityTable::install(other),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(std::ptr::eq(CapabilityTable::global(), global));
    }

    #[test]
    fn test_global_table_is_stable() {
        let a = CapabilityTable::global() as *const CapabilityTable;
        let b = CapabilityTable::global() as *const CapabilityTable;
        assert_eq!(a, b);
        assert!(!CapabilityTable::global().is_empty());
    }
}
