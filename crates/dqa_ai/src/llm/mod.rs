use dqa_core::error::AppError;

/// Text-completion collaborator.
pub trait Llm: Send + Sync {
    fn generate(&self, model: &str, prompt: &str) -> Result<String, AppError>;

    /// Like `generate`, but asks the backend to constrain output to `schema` when it can.
    fn generate_structured(
        &self,
        model: &str,
        prompt: &str,
        schema: &serde_json::Value,
    ) -> Result<String, AppError> {
        let _ = schema;
        self.generate(model, prompt)
    }
}

pub mod ollama_llm;
pub mod openai_llm;

pub use ollama_llm::OllamaLlm;
pub use openai_llm::OpenAiCompatLlm;

/// Sampling settings shared by the HTTP adapters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: std::time::Duration,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 2048,
            timeout: std::time::Duration::from_secs(60),
        }
    }
}
