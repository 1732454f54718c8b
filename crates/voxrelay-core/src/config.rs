//! Configuration loading, environment overrides, and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_GENERATION_ENDPOINT: &str = "http://localhost:11434/api/generate";
pub const DEFAULT_GENERATION_MODEL: &str = "llama3.2";
pub const DEFAULT_STT_ENDPOINT: &str = "http://localhost:8080/v1/audio/transcriptions";
pub const DEFAULT_TTS_ENDPOINT: &str = "http://localhost:8020/tts";
pub const DEFAULT_VOICE: &str = "woman";

/// Top-level voxrelay configuration.
///
/// Every section is optional; accessors fall back to defaults so an empty
/// file (or no file at all) yields a working local setup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: None,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Text generation backend (Ollama-style `/api/generate`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Request timeout in seconds (default: 120).
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    /// Assistant persona substituted into `{persona}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,

    /// Reply language substituted into `{language}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Reply tone substituted into `{tone}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,

    /// Prompt template; must contain `{transcript}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    /// Reply spoken when the backend fails. Should match the reply language.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_generation_endpoint(),
            model: default_generation_model(),
            timeout_secs: default_generation_timeout(),
            persona: None,
            language: None,
            tone: None,
            template: None,
            fallback: None,
        }
    }
}

fn default_generation_endpoint() -> String {
    DEFAULT_GENERATION_ENDPOINT.into()
}

fn default_generation_model() -> String {
    DEFAULT_GENERATION_MODEL.into()
}

fn default_generation_timeout() -> u64 {
    120
}

/// Which speech-to-text engine backs the transcription adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SttEngine {
    /// OpenAI-compatible `/v1/audio/transcriptions` server.
    #[default]
    Remote,
    /// Local `whisper` command-line tool.
    Command,
}

impl std::str::FromStr for SttEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" => Ok(Self::Remote),
            "command" | "cli" => Ok(Self::Command),
            other => Err(format!("Unknown transcription engine: {other}")),
        }
    }
}

/// Speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(default)]
    pub engine: SttEngine,

    /// Model name or size (e.g. "tiny", "whisper-large-v3-turbo").
    #[serde(default = "default_stt_model")]
    pub model: String,

    /// Compute device handed to the local engine ("cpu", "cuda").
    #[serde(default = "default_stt_device")]
    pub device: String,

    #[serde(default = "default_stt_endpoint")]
    pub endpoint: String,

    /// Executable used by the `command` engine (default: "whisper").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Spoken language hint passed to the engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            engine: SttEngine::default(),
            model: default_stt_model(),
            device: default_stt_device(),
            endpoint: default_stt_endpoint(),
            command: None,
            language: None,
            api_key: None,
            api_key_env: None,
        }
    }
}

fn default_stt_model() -> String {
    "tiny".into()
}

fn default_stt_device() -> String {
    "cpu".into()
}

fn default_stt_endpoint() -> String {
    DEFAULT_STT_ENDPOINT.into()
}

impl TranscriptionConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Text-to-speech configuration. Synthesis is off unless `enabled` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_tts_endpoint")]
    pub endpoint: String,

    /// Voice selector used when a session does not pick one.
    #[serde(default = "default_voice")]
    pub default_voice: String,

    #[serde(default = "default_tts_language")]
    pub language: String,

    /// Request timeout in seconds (default: 300).
    #[serde(default = "default_tts_timeout")]
    pub timeout_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_tts_endpoint(),
            default_voice: default_voice(),
            language: default_tts_language(),
            timeout_secs: default_tts_timeout(),
        }
    }
}

fn default_tts_endpoint() -> String {
    DEFAULT_TTS_ENDPOINT.into()
}

fn default_voice() -> String {
    DEFAULT_VOICE.into()
}

fn default_tts_language() -> String {
    "pt".into()
}

fn default_tts_timeout() -> u64 {
    300
}

/// On-disk locations for voices, archived replies, and scratch chunks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Reference voice samples, one `<selector>.wav` each (default: "./audios").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voices_dir: Option<String>,

    /// Archive of synthesized replies (default: "./audios/generated").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_dir: Option<String>,

    /// Where inbound chunks are materialized (default: OS temp dir).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Extra filter directives (e.g. "voxrelay_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
        }
    }
}

fn default_log_format() -> String {
    "plain".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::VoxRelayError::Io)?;

        // Substitute ${ENV_VAR} references before parsing
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::VoxRelayError::Config(e.to_string()))?;

        debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Default config file location: `./voxrelay.json`.
    pub fn default_path() -> PathBuf {
        PathBuf::from("voxrelay.json")
    }

    /// Apply `VOXRELAY_*` environment variables on top of the loaded file.
    pub fn apply_env_overrides(&mut self) -> crate::error::Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Empty values are ignored. Malformed numbers or flags are config errors.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> crate::error::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        use crate::error::VoxRelayError;

        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = get("VOXRELAY_PORT") {
            let port = port
                .trim()
                .parse::<u16>()
                .map_err(|e| VoxRelayError::Config(format!("VOXRELAY_PORT: {e}")))?;
            self.gateway.get_or_insert_with(GatewayConfig::default).port = port;
        }
        if let Some(bind) = get("VOXRELAY_BIND") {
            self.gateway.get_or_insert_with(GatewayConfig::default).bind = Some(bind);
        }

        if let Some(endpoint) = get("VOXRELAY_LLM_ENDPOINT") {
            self.generation
                .get_or_insert_with(GenerationConfig::default)
                .endpoint = endpoint;
        }
        if let Some(model) = get("VOXRELAY_LLM_MODEL") {
            self.generation
                .get_or_insert_with(GenerationConfig::default)
                .model = model;
        }

        if let Some(engine) = get("VOXRELAY_STT_ENGINE") {
            let engine = engine.parse::<SttEngine>().map_err(VoxRelayError::Config)?;
            self.transcription
                .get_or_insert_with(TranscriptionConfig::default)
                .engine = engine;
        }
        if let Some(model) = get("VOXRELAY_STT_MODEL") {
            self.transcription
                .get_or_insert_with(TranscriptionConfig::default)
                .model = model;
        }
        if let Some(device) = get("VOXRELAY_STT_DEVICE") {
            self.transcription
                .get_or_insert_with(TranscriptionConfig::default)
                .device = device;
        }
        if let Some(endpoint) = get("VOXRELAY_STT_ENDPOINT") {
            self.transcription
                .get_or_insert_with(TranscriptionConfig::default)
                .endpoint = endpoint;
        }

        if let Some(enabled) = get("VOXRELAY_TTS_ENABLED") {
            let enabled = parse_flag(&enabled).ok_or_else(|| {
                VoxRelayError::Config(format!("VOXRELAY_TTS_ENABLED: not a flag: {enabled}"))
            })?;
            self.tts.get_or_insert_with(TtsConfig::default).enabled = enabled;
        }
        if let Some(endpoint) = get("VOXRELAY_TTS_ENDPOINT") {
            self.tts.get_or_insert_with(TtsConfig::default).endpoint = endpoint;
        }
        if let Some(voice) = get("VOXRELAY_VOICE") {
            self.tts.get_or_insert_with(TtsConfig::default).default_voice = voice;
        }

        if let Some(debug) = get("VOXRELAY_DEBUG") {
            if parse_flag(&debug) == Some(true) {
                self.logging
                    .get_or_insert_with(LoggingConfig::default)
                    .level = Some("debug".into());
            }
        }

        Ok(())
    }

    /// Gateway port.
    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or(DEFAULT_PORT)
    }

    /// Gateway bind address.
    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn generation(&self) -> GenerationConfig {
        self.generation.clone().unwrap_or_default()
    }

    pub fn transcription(&self) -> TranscriptionConfig {
        self.transcription.clone().unwrap_or_default()
    }

    pub fn tts(&self) -> TtsConfig {
        self.tts.clone().unwrap_or_default()
    }

    /// Whether speech synthesis should be wired up at startup.
    pub fn tts_enabled(&self) -> bool {
        self.tts.as_ref().is_some_and(|t| t.enabled)
    }

    pub fn voices_dir(&self) -> PathBuf {
        self.storage
            .as_ref()
            .and_then(|s| s.voices_dir.as_ref())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("audios"))
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.storage
            .as_ref()
            .and_then(|s| s.archive_dir.as_ref())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.voices_dir().join("generated"))
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.storage
            .as_ref()
            .and_then(|s| s.scratch_dir.as_ref())
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.gateway_port() == 0 {
            errors.push("Gateway port cannot be 0".to_string());
        }

        let generation = self.generation();
        if !generation.endpoint.starts_with("http://") && !generation.endpoint.starts_with("https://")
        {
            errors.push(format!(
                "Generation endpoint is not an http(s) URL: {}",
                generation.endpoint
            ));
        }
        if let Some(template) = &generation.template {
            if !template.contains("{transcript}") {
                warnings.push(
                    "Prompt template has no {transcript} placeholder; the transcript will be appended"
                        .to_string(),
                );
            }
        }

        let transcription = self.transcription();
        if transcription.engine == SttEngine::Remote && transcription.endpoint.is_empty() {
            errors.push("Remote transcription engine requires an endpoint".to_string());
        }

        if self.tts_enabled() {
            let voices = self.voices_dir();
            if !voices.is_dir() {
                warnings.push(format!(
                    "TTS is enabled but the voices directory does not exist: {}",
                    voices.display()
                ));
            } else {
                let default_voice = voices.join(format!("{}.wav", self.tts().default_voice));
                if !default_voice.exists() {
                    warnings.push(format!(
                        "Default voice sample not found: {}",
                        default_voice.display()
                    ));
                }
            }
        }

        (warnings, errors)
    }
}
