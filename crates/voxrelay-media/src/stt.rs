//! Speech-to-text adapters.
//!
//! Engines read audio from a file path rather than from memory, which is why
//! the pipeline materializes every chunk before calling [`Transcriber::transcribe`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use voxrelay_core::config::{SttEngine, TranscriptionConfig};
use voxrelay_core::error::TranscriptionError;

/// Turns an audio file into text.
///
/// An empty string is a normal result (silence, no speech). Errors are
/// scoped to the current turn by the caller.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<String, TranscriptionError>;

    /// Short engine label for logs and health output.
    fn describe(&self) -> String;
}

/// Build the configured transcription engine.
pub fn build_transcriber(config: &TranscriptionConfig) -> Arc<dyn Transcriber> {
    match config.engine {
        SttEngine::Remote => Arc::new(RemoteWhisper::new(config)),
        SttEngine::Command => Arc::new(WhisperCommand::new(config)),
    }
}

/// OpenAI-compatible `/v1/audio/transcriptions` endpoint (whisper server,
/// faster-whisper, Groq, OpenAI).
pub struct RemoteWhisper {
    endpoint: String,
    model: String,
    language: Option<String>,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl RemoteWhisper {
    pub fn new(config: &TranscriptionConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();
        Self {
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            language: config.language.clone(),
            api_key: config.resolve_api_key(),
            client,
        }
    }
}

#[async_trait]
impl Transcriber for RemoteWhisper {
    async fn transcribe(&self, audio_path: &Path) -> Result<String, TranscriptionError> {
        let audio = tokio::fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.wav".to_string());

        debug!(
            url = %self.endpoint,
            model = %self.model,
            wav_bytes = audio.len(),
            "Sending audio for transcription"
        );

        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(file_name)
            .mime_str("audio/wav")
            .map_err(|e| TranscriptionError::Request(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "text")
            .part("file", part);
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let resp = request
            .send()
            .await
            .map_err(|e| TranscriptionError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TranscriptionError::Status { status, body });
        }

        let text = resp
            .text()
            .await
            .map_err(|e| TranscriptionError::Request(e.to_string()))?;
        Ok(text.trim().to_string())
    }

    fn describe(&self) -> String {
        format!("remote:{}", self.model)
    }
}

/// Local `whisper` CLI, run as a child process per turn.
///
/// The command may carry leading arguments (e.g. `"python -m whisper"`).
/// Output is written as `<stem>.txt` into a private temp directory.
pub struct WhisperCommand {
    program: String,
    prefix_args: Vec<String>,
    model: String,
    device: String,
    language: Option<String>,
}

impl WhisperCommand {
    pub fn new(config: &TranscriptionConfig) -> Self {
        let command = config.command.as_deref().unwrap_or("whisper");
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_else(|| "whisper".to_string());
        Self {
            program,
            prefix_args: parts.collect(),
            model: config.model.clone(),
            device: config.device.clone(),
            language: config.language.clone(),
        }
    }

    fn args(&self, audio_path: &Path, output_dir: &Path) -> Vec<String> {
        let mut args = self.prefix_args.clone();
        args.push(audio_path.display().to_string());
        args.extend([
            "--model".to_string(),
            self.model.clone(),
            "--device".to_string(),
            self.device.clone(),
            "--output_format".to_string(),
            "txt".to_string(),
            "--output_dir".to_string(),
            output_dir.display().to_string(),
        ]);
        // Half precision is unsupported on CPU; ask for fp32 up front.
        if self.device == "cpu" {
            args.extend(["--fp16".to_string(), "False".to_string()]);
        }
        if let Some(language) = &self.language {
            args.extend(["--language".to_string(), language.clone()]);
        }
        args
    }

    fn transcript_path(audio_path: &Path, output_dir: &Path) -> PathBuf {
        let stem = audio_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        output_dir.join(format!("{stem}.txt"))
    }
}

#[async_trait]
impl Transcriber for WhisperCommand {
    async fn transcribe(&self, audio_path: &Path) -> Result<String, TranscriptionError> {
        let output_dir = tempfile::Builder::new()
            .prefix("voxrelay-stt-")
            .tempdir()?;
        let args = self.args(audio_path, output_dir.path());

        debug!(program = %self.program, ?args, "Running transcription command");

        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TranscriptionError::Process(format!("{}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscriptionError::Process(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let transcript = Self::transcript_path(audio_path, output_dir.path());
        let text = tokio::fs::read_to_string(&transcript).await.map_err(|e| {
            TranscriptionError::Process(format!("missing output {}: {e}", transcript.display()))
        })?;
        Ok(text.trim().to_string())
    }

    fn describe(&self) -> String {
        format!("command:{}@{}", self.model, self.device)
    }
}
