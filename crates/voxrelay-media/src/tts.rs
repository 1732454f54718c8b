//! Text-to-speech adapter backed by an XTTS-style HTTP server.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use voxrelay_core::config::TtsConfig;
use voxrelay_core::error::SynthesisError;

use crate::wav::{is_wav, pcm_from_le_bytes, pcm_to_wav};

/// Sample rate of synthesized replies.
pub const SAMPLE_RATE: u32 = 24_000;

/// Turns reply text plus a voice selector into WAV bytes.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, SynthesisError>;

    fn describe(&self) -> String;
}

/// Reference voice samples on disk: selector `man` resolves to `<dir>/man.wav`.
#[derive(Debug, Clone)]
pub struct VoiceLibrary {
    dir: PathBuf,
}

impl VoiceLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve a selector to an existing reference sample.
    pub async fn resolve(&self, selector: &str) -> Result<PathBuf, SynthesisError> {
        let unknown = || SynthesisError::UnknownVoice(selector.to_string());

        let mut components = Path::new(selector).components();
        let plain = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if selector.is_empty() || !plain {
            return Err(unknown());
        }

        let path = self.dir.join(format!("{selector}.wav"));
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(unknown()),
        }
    }

    /// Selectors with a sample on disk, sorted.
    pub fn list(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut voices: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "wav"))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        voices.sort();
        voices
    }
}

#[derive(Debug, Serialize)]
struct XttsRequest<'a> {
    text: &'a str,
    speaker_wav: String,
    language: &'a str,
}

/// XTTS server client. Posts `{text, speaker_wav, language}` and accepts
/// either a WAV body or raw 16-bit PCM at [`SAMPLE_RATE`].
pub struct XttsSynthesizer {
    endpoint: String,
    language: String,
    voices: VoiceLibrary,
    client: reqwest::Client,
}

impl XttsSynthesizer {
    pub fn new(config: &TtsConfig, voices: VoiceLibrary) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            endpoint: config.endpoint.clone(),
            language: config.language.clone(),
            voices,
            client,
        }
    }

    pub fn voices(&self) -> &VoiceLibrary {
        &self.voices
    }
}

#[async_trait]
impl Synthesizer for XttsSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, SynthesisError> {
        let reference = self.voices.resolve(voice).await?;
        let speaker_wav = std::path::absolute(&reference)
            .unwrap_or(reference)
            .display()
            .to_string();

        debug!(voice, text_len = text.len(), url = %self.endpoint, "Requesting synthesis");

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&XttsRequest {
                text,
                speaker_wav,
                language: &self.language,
            })
            .send()
            .await
            .map_err(|e| SynthesisError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(SynthesisError::Status { status, body });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| SynthesisError::Request(e.to_string()))?;
        if body.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }

        if is_wav(&body) {
            Ok(body.to_vec())
        } else {
            let pcm = pcm_from_le_bytes(&body);
            if pcm.is_empty() {
                return Err(SynthesisError::EmptyAudio);
            }
            Ok(pcm_to_wav(&pcm, SAMPLE_RATE, 1, 16))
        }
    }

    fn describe(&self) -> String {
        format!("xtts:{}", self.language)
    }
}
