//! Ollama `/api/generate` client.
//!
//! One non-streaming request per turn: `{"prompt", "stream": false, "model"}`
//! in, the `response` field out.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use voxrelay_core::config::GenerationConfig;
use voxrelay_core::error::GenerationError;

use crate::prompt::PromptTemplate;
use crate::{Generator, Reply, FALLBACK_REPLY};

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    stream: bool,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

pub struct OllamaGenerator {
    endpoint: String,
    model: String,
    template: PromptTemplate,
    fallback: String,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            template: PromptTemplate::from_config(config),
            fallback: config
                .fallback
                .clone()
                .unwrap_or_else(|| FALLBACK_REPLY.to_string()),
            client,
        }
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    /// Send an already-rendered prompt and classify any failure.
    pub async fn try_generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = GenerateRequest {
            prompt,
            stream: false,
            model: &self.model,
        };

        debug!(model = %self.model, url = %self.endpoint, prompt_len = prompt.len(), "Calling generation backend");

        let resp = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status, body });
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;

        parsed
            .response
            .map(|text| text.trim().to_string())
            .ok_or_else(|| GenerationError::Malformed("missing `response` field".into()))
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, transcript: &str) -> Reply {
        let prompt = self.template.render(transcript);
        match self.try_generate(&prompt).await {
            Ok(text) => Reply {
                text,
                prompt,
                fallback: false,
            },
            Err(e) => {
                warn!(model = %self.model, %e, "Generation failed, using fallback reply");
                Reply {
                    text: self.fallback.clone(),
                    prompt,
                    fallback: true,
                }
            }
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}
