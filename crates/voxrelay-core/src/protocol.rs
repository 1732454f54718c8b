//! Client-facing wire messages.
//!
//! Structured results go out as JSON text frames; synthesized audio goes out
//! as a separate binary frame. Inbound binary frames are audio chunks; inbound
//! text frames carry session controls.

use serde::{Deserialize, Serialize};

/// Server -> client structured message.
///
/// Serializes to `{"transcription": ...}` right after transcription and to
/// `{"transcription": ..., "llama": ...}` once the reply is ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMessage {
    pub transcription: String,
    #[serde(rename = "llama", skip_serializing_if = "Option::is_none", default)]
    pub reply: Option<String>,
}

impl TurnMessage {
    /// Transcript-only echo.
    pub fn transcript(text: impl Into<String>) -> Self {
        Self {
            transcription: text.into(),
            reply: None,
        }
    }

    /// Transcript together with the generated reply.
    pub fn with_reply(transcript: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            transcription: transcript.into(),
            reply: Some(reply.into()),
        }
    }

    pub fn to_json(&self) -> String {
        // A struct of two strings cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Client -> server control message, sent as a text frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Switch the voice used for this session's synthesized replies.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub voice: Option<String>,
}
