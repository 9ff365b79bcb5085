//! OpenAI-compatible chat completions (DeepSeek and friends).

use dqa_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::{GenerationOptions, Llm};
use crate::ollama::is_loopback_base_url;

#[derive(Clone)]
pub struct OpenAiCompatLlm {
    base_url: String,
    api_key: String,
    options: GenerationOptions,
}

impl std::fmt::Debug for OpenAiCompatLlm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatLlm")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("options", &self.options)
            .finish()
    }
}

/// Plain http to `127.0.0.1`, any path; the authority gets the same check as Ollama URLs.
fn is_loopback_http(base_url: &str) -> bool {
    let Some(rest) = base_url.strip_prefix("http://") else {
        return false;
    };
    let authority = rest.split('/').next().unwrap_or_default();
    is_loopback_base_url(&format!("http://{authority}"))
}

impl OpenAiCompatLlm {
    /// Remote endpoints must use https; plain http is accepted for loopback only.
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, AppError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        let secure = base_url.starts_with("https://") || is_loopback_http(&base_url);
        if !secure {
            return Err(AppError::new(
                "AI_ENDPOINT_INSECURE",
                "Chat completions endpoint must use https",
            )
            .with_details(format!("base_url={base_url}")));
        }
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AppError::new("AI_API_KEY_MISSING", "API key must not be empty"));
        }
        Ok(Self {
            base_url,
            api_key,
            options: GenerationOptions::default(),
        })
    }

    /// Reads the key from the environment variable named `key_env`.
    pub fn from_env(base_url: &str, key_env: &str) -> Result<Self, AppError> {
        let key = std::env::var(key_env).map_err(|_| {
            AppError::new("AI_API_KEY_MISSING", "API key environment variable is not set")
                .with_details(format!("env={key_env}"))
        })?;
        Self::new(base_url, key)
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    fn call(&self, model: &str, prompt: &str, json_mode: bool) -> Result<String, AppError> {
        let url = format!("{}/chat/completions", self.base_url);
        let req = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
            stream: false,
            response_format: json_mode.then_some(ResponseFormat { kind: "json_object" }),
        };

        let resp = ureq::post(&url)
            .timeout(self.options.timeout)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(serde_json::to_value(req).map_err(|e| {
                AppError::new("AI_GENERATE_FAILED", "Failed to encode chat request")
                    .with_details(e.to_string())
            })?);

        match resp {
            Ok(r) if r.status() == 200 => {
                let v: ChatResponse = r.into_json().map_err(|e| {
                    AppError::new("AI_GENERATE_FAILED", "Failed to decode chat response")
                        .with_details(e.to_string())
                })?;
                let content = v
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default();
                if content.trim().is_empty() {
                    return Err(AppError::new(
                        "AI_GENERATE_FAILED",
                        "Chat response was empty",
                    ));
                }
                Ok(content)
            }
            Ok(r) => Err(
                AppError::new("AI_GENERATE_FAILED", "Chat request failed")
                    .with_details(format!("status={}", r.status()))
                    .with_retryable(r.status() == 429 || r.status() >= 500),
            ),
            Err(ureq::Error::Status(status, _)) => Err(
                AppError::new("AI_GENERATE_FAILED", "Chat request failed")
                    .with_details(format!("status={status}"))
                    .with_retryable(status == 429 || status >= 500),
            ),
            Err(e) => Err(
                AppError::new("AI_GENERATE_FAILED", "Failed to call chat endpoint")
                    .with_details(e.to_string())
                    .with_retryable(true),
            ),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl Llm for OpenAiCompatLlm {
    fn generate(&self, model: &str, prompt: &str) -> Result<String, AppError> {
        self.call(model, prompt, false)
    }

    /// The chat API takes no schema; JSON mode plus the prompt's instructions stand in for it.
    fn generate_structured(
        &self,
        model: &str,
        prompt: &str,
        _schema: &serde_json::Value,
    ) -> Result<String, AppError> {
        self.call(model, prompt, true)
    }
}
