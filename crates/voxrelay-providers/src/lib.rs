//! Text generation adapter.
//!
//! A [`Generator`] turns a transcript into reply text. It never fails from
//! the caller's point of view: backend problems are logged and replaced by
//! [`FALLBACK_REPLY`] so a broken backend cannot end a session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod ollama;
pub mod prompt;

pub use ollama::OllamaGenerator;
pub use prompt::PromptTemplate;

/// Reply sent when the backend cannot produce one and `generation.fallback`
/// is unset. Portuguese, like the default prompt language and voice.
pub const FALLBACK_REPLY: &str = "Erro ao processar a resposta do modelo LLaMA.";

/// A generated reply and the prompt that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub text: String,
    pub prompt: String,
    /// True when `text` is the fallback reply standing in for a failed call.
    pub fallback: bool,
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a reply to `transcript`. Infallible by contract.
    async fn generate(&self, transcript: &str) -> Reply;

    /// Model label for logs and health output.
    fn model(&self) -> &str;
}
