use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoxRelayError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoxRelayError>;

/// Speech-to-text failure. Scoped to the turn that produced it.
#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("Transcription engine request failed: {0}")]
    Request(String),

    #[error("Transcription engine returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transcription engine process failed: {0}")]
    Process(String),

    #[error("Audio file unreadable: {0}")]
    Io(#[from] std::io::Error),
}

/// Text generation failure. Never reaches the client: the adapter
/// substitutes a fallback reply.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation backend unreachable: {0}")]
    Request(String),

    #[error("Generation backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Generation backend response malformed: {0}")]
    Malformed(String),
}

/// Speech synthesis failure. Scoped to the turn that produced it.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Unknown voice selector: {0}")]
    UnknownVoice(String),

    #[error("Synthesis engine request failed: {0}")]
    Request(String),

    #[error("Synthesis engine returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Synthesis engine returned no audio")]
    EmptyAudio,
}

/// The connection is gone or broken. Ends the session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Receive failed: {0}")]
    Receive(String),
}
