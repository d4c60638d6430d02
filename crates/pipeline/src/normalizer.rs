//! Input normalization
//!
//! Turns a [`RawRequest`] into a [`Query`]. Audio is loaded and its container
//! checked here so that an unusable upload is rejected before any
//! collaborator is called.

use std::io::Cursor;

use property_qa_config::{PipelineConfig, Settings};
use property_qa_core::{
    AudioClip, AudioRef, Error, Query, QueryOptions, RawRequest, Result,
};

/// Audio containers accepted for transcription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
    Ogg,
    Flac,
    WebM,
    Mp4,
}

impl AudioFormat {
    /// Detect the container from its magic bytes
    pub fn detect(data: &[u8]) -> Option<Self> {
        match data {
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => Some(Self::Wav),
            [b'I', b'D', b'3', ..] => Some(Self::Mp3),
            [0xFF, second, ..] if second & 0xE0 == 0xE0 => Some(Self::Mp3),
            [b'O', b'g', b'g', b'S', ..] => Some(Self::Ogg),
            [b'f', b'L', b'a', b'C', ..] => Some(Self::Flac),
            [0x1A, 0x45, 0xDF, 0xA3, ..] => Some(Self::WebM),
            [_, _, _, _, b'f', b't', b'y', b'p', ..] => Some(Self::Mp4),
            _ => None,
        }
    }
}

/// Normalizer configuration
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    pub default_language: String,
    /// Source of the match-count default and clamp
    pub pipeline: PipelineConfig,
    /// Upper bound on audio size
    pub max_audio_bytes: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for NormalizerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            default_language: property_qa_core::query::DEFAULT_LANGUAGE.to_string(),
            pipeline: settings.pipeline.clone(),
            max_audio_bytes: settings.server.max_body_bytes,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InputNormalizer {
    config: NormalizerConfig,
}

impl InputNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Build the canonical query
    ///
    /// Audio takes precedence when both text and audio are present.
    pub async fn normalize(&self, raw: RawRequest) -> Result<Query> {
        let language = raw
            .language
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(self.config.default_language.as_str())
            .to_string();
        let options = QueryOptions {
            top_k: self.config.pipeline.clamp_top_k(raw.max_results),
            include_similar: raw.include_similar || raw.require_similar,
            require_similar: raw.require_similar,
        };

        if let Some(audio) = raw.audio {
            if raw.text.is_some() {
                tracing::debug!("Request carries text and audio, using audio");
            }
            let clip = self.load_audio(audio).await?;
            return Ok(Query::from_audio(clip, language).with_options(options));
        }

        match raw.text {
            Some(text) if !text.trim().is_empty() => {
                Ok(Query::from_text(text.trim(), language).with_options(options))
            }
            Some(_) => Err(Error::InvalidInput("query text is empty".to_string())),
            None => Err(Error::InvalidInput(
                "request carries neither text nor audio".to_string(),
            )),
        }
    }

    async fn load_audio(&self, audio: AudioRef) -> Result<AudioClip> {
        let data = match audio {
            AudioRef::Inline(bytes) => bytes,
            AudioRef::File(path) => tokio::fs::read(&path).await.map_err(|e| {
                Error::InvalidInput(format!("audio file {} unreadable: {}", path.display(), e))
            })?,
        };

        if data.is_empty() {
            return Err(Error::InvalidInput("audio is empty".to_string()));
        }
        if data.len() > self.config.max_audio_bytes {
            return Err(Error::InvalidInput(format!(
                "audio exceeds {} bytes",
                self.config.max_audio_bytes
            )));
        }

        match AudioFormat::detect(&data) {
            Some(AudioFormat::Wav) => validate_wav(&data)?,
            Some(_) => {}
            None => {
                return Err(Error::InvalidInput(
                    "unrecognized audio container".to_string(),
                ))
            }
        }

        Ok(AudioClip::new(data))
    }
}

fn validate_wav(data: &[u8]) -> Result<()> {
    let reader = hound::WavReader::new(Cursor::new(data))
        .map_err(|e| Error::InvalidInput(format!("corrupt WAV audio: {}", e)))?;
    if reader.duration() == 0 {
        return Err(Error::InvalidInput("WAV audio has no samples".to_string()));
    }
    Ok(())
}
