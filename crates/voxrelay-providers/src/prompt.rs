//! Prompt template for the generation backend.

use voxrelay_core::config::GenerationConfig;

const DEFAULT_PERSONA: &str = "a friendly voice assistant";
const DEFAULT_LANGUAGE: &str = "Portuguese";
const DEFAULT_TONE: &str = "warm and concise";

const DEFAULT_TEMPLATE: &str = "You are {persona}. Always answer in {language}, \
keeping a {tone} tone. Your answer will be read aloud, so avoid lists, markup and emoji.\n\n\
User said: {transcript}\n\nAnswer:";

const TRANSCRIPT: &str = "{transcript}";

/// A fixed template whose persona, language and tone are filled once from
/// configuration; only the transcript varies per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new(
        template: &str,
        persona: &str,
        language: &str,
        tone: &str,
    ) -> Self {
        let template = template
            .replace("{persona}", persona)
            .replace("{language}", language)
            .replace("{tone}", tone);
        Self { template }
    }

    pub fn from_config(config: &GenerationConfig) -> Self {
        Self::new(
            config.template.as_deref().unwrap_or(DEFAULT_TEMPLATE),
            config.persona.as_deref().unwrap_or(DEFAULT_PERSONA),
            config.language.as_deref().unwrap_or(DEFAULT_LANGUAGE),
            config.tone.as_deref().unwrap_or(DEFAULT_TONE),
        )
    }

    /// Substitute the transcript. A template without a placeholder gets the
    /// transcript appended on its own line.
    pub fn render(&self, transcript: &str) -> String {
        if self.template.contains(TRANSCRIPT) {
            self.template.replace(TRANSCRIPT, transcript)
        } else if self.template.is_empty() {
            transcript.to_string()
        } else {
            format!("{}\n{transcript}", self.template)
        }
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}
