use std::time::Duration;

use dqa_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::ollama::OllamaClient;

/// Longer inputs are cut at a char boundary; chunks are far below this.
const MAX_INPUT_CHARS: usize = 12_000;

#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: OllamaClient,
    timeout: Duration,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

fn embed_error(message: &str) -> AppError {
    AppError::new("AI_EMBEDDINGS_FAILED", message)
}

fn truncate_input(input: &str) -> &str {
    match input.char_indices().nth(MAX_INPUT_CHARS) {
        Some((cut, _)) => &input[..cut],
        None => input,
    }
}

impl Embedder for OllamaEmbedder {
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        let url = format!("{}/api/embeddings", self.client.base_url());
        let body = serde_json::to_value(EmbedRequest {
            model,
            prompt: truncate_input(input),
        })
        .map_err(|e| embed_error("Failed to encode embeddings request").with_details(e.to_string()))?;

        let resp = match ureq::post(&url).timeout(self.timeout).send_json(body) {
            Ok(r) => r,
            Err(ureq::Error::Status(code, _)) => {
                return Err(embed_error("Embeddings request failed")
                    .with_details(format!("model={model}; status={code}"))
                    .with_retryable(code >= 500));
            }
            Err(e) => {
                return Err(embed_error("Failed to call embeddings endpoint")
                    .with_details(e.to_string())
                    .with_retryable(true));
            }
        };

        let parsed: EmbedResponse = resp
            .into_json()
            .map_err(|e| embed_error("Failed to decode embeddings response").with_details(e.to_string()))?;
        if parsed.embedding.is_empty() {
            return Err(embed_error("Embeddings response was empty").with_details(format!("model={model}")));
        }
        Ok(parsed.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(MAX_INPUT_CHARS + 5);
        let cut = truncate_input(&long);
        assert_eq!(cut.chars().count(), MAX_INPUT_CHARS);
        assert_eq!(truncate_input("short"), "short");
    }
}
