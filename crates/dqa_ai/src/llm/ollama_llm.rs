use dqa_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::{GenerationOptions, Llm};
use crate::ollama::OllamaClient;

#[derive(Debug, Clone)]
pub struct OllamaLlm {
    client: OllamaClient,
    options: GenerationOptions,
}

impl OllamaLlm {
    pub fn new(client: OllamaClient) -> Self {
        Self {
            client,
            options: GenerationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    fn call(
        &self,
        model: &str,
        prompt: &str,
        format: Option<&serde_json::Value>,
    ) -> Result<String, AppError> {
        let url = format!("{}/api/generate", self.client.base_url());
        let req = GenerateRequest {
            model,
            prompt,
            stream: false,
            format,
            options: SamplingOptions {
                temperature: self.options.temperature,
                num_predict: self.options.max_tokens,
            },
        };

        let resp = ureq::post(&url)
            .timeout(self.options.timeout)
            .send_json(serde_json::to_value(req).map_err(|e| {
                AppError::new("AI_GENERATE_FAILED", "Failed to encode generate request")
                    .with_details(e.to_string())
            })?);

        match resp {
            Ok(r) if r.status() == 200 => {
                let v: GenerateResponse = r.into_json().map_err(|e| {
                    AppError::new("AI_GENERATE_FAILED", "Failed to decode generate response")
                        .with_details(e.to_string())
                })?;
                if v.response.trim().is_empty() {
                    return Err(AppError::new(
                        "AI_GENERATE_FAILED",
                        "Generate response was empty",
                    ));
                }
                Ok(v.response)
            }
            Ok(r) => Err(
                AppError::new("AI_GENERATE_FAILED", "Generate request failed")
                    .with_details(format!("status={}", r.status())),
            ),
            Err(e) => Err(
                AppError::new("AI_GENERATE_FAILED", "Failed to call generate endpoint")
                    .with_details(e.to_string())
                    .with_retryable(true),
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct SamplingOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a serde_json::Value>,
    options: SamplingOptions,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl Llm for OllamaLlm {
    fn generate(&self, model: &str, prompt: &str) -> Result<String, AppError> {
        self.call(model, prompt, None)
    }

    fn generate_structured(
        &self,
        model: &str,
        prompt: &str,
        schema: &serde_json::Value,
    ) -> Result<String, AppError> {
        self.call(model, prompt, Some(schema))
    }
}
