//! Layered application configuration.
//!
//! Resolution order (highest priority first):
//! 1. CLI flags (`ConfigOverrides`)
//! 2. Environment variables (`DOCQA_*`)
//! 3. Project config (`docqa.toml` in the project root)
//! 4. Compiled defaults

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const CONFIG_FILE_NAME: &str = "docqa.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub ingest: IngestConfig,
    pub filter: FilterConfig,
    pub retrieval: RetrievalConfig,
    pub controller: ControllerConfig,
    pub llm: LlmConfig,
    pub embeddings: EmbeddingsConfig,
    pub memory: MemoryConfig,
    pub storage: StorageConfig,
}

/// Page cleaning and splitting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Pages whose cleaned text is shorter than this are dropped before splitting.
    pub min_page_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            min_page_chars: 20,
        }
    }
}

/// Noise thresholds applied once, at ingestion time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    pub min_chunk_chars: usize,
    /// A chunk mentioning CONTENTS shorter than this is a table of contents.
    pub toc_max_chars: usize,
    /// A chunk mentioning CHAPTER shorter than this is a bare heading.
    pub heading_max_chars: usize,
    pub max_dot_ratio: f64,
    pub min_letter_ratio: f64,
    pub min_token_diversity: f64,
    pub max_malformed_ratio: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_chunk_chars: 200,
            toc_max_chars: 1500,
            heading_max_chars: 400,
            max_dot_ratio: 0.18,
            min_letter_ratio: 0.5,
            min_token_diversity: 0.25,
            max_malformed_ratio: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: u32,
    pub timeout_ms: u64,
    /// Query alias table: a query containing a key is also searched with each alias.
    pub synonyms: BTreeMap<String, Vec<String>>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            timeout_ms: 10_000,
            synonyms: BTreeMap::new(),
        }
    }
}

impl RetrievalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    pub max_rounds: u32,
    pub decision_timeout_ms: u64,
    pub synthesis_timeout_ms: u64,
    pub max_context_chars: usize,
    pub snippet_chars: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            decision_timeout_ms: 30_000,
            synthesis_timeout_ms: 60_000,
            max_context_chars: 6000,
            snippet_chars: 1200,
        }
    }
}

impl ControllerConfig {
    pub fn decision_timeout(&self) -> Duration {
        Duration::from_millis(self.decision_timeout_ms)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Ollama,
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key (OpenAI-compatible providers only).
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            base_url: "http://127.0.0.1:11434".to_string(),
            model: "llama3.2:latest".to_string(),
            api_key_env: "DEEPSEEK_API_KEY".to_string(),
            temperature: 0.2,
            max_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingsConfig {
    pub base_url: String,
    pub model: String,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            model: "nomic-embed-text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    pub max_turns: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { max_turns: 6 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".docqa"),
        }
    }
}

impl StorageConfig {
    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    pub fn memory_db_path(&self) -> PathBuf {
        self.data_dir.join("memory.sqlite")
    }
}

/// Flag-level overrides applied last.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub llm_model: Option<String>,
    pub max_rounds: Option<u32>,
    pub top_k: Option<u32>,
}

impl AppConfig {
    pub fn load(root: &Path, overrides: Option<&ConfigOverrides>) -> Result<Self, AppError> {
        let path = root.join(CONFIG_FILE_NAME);
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                AppError::new("CONFIG_READ_FAILED", "Failed to read config file")
                    .with_details(format!("path={}; err={}", path.display(), e))
            })?;
            Self::from_toml(&raw).map_err(|e| {
                let details = e.details.clone().unwrap_or_default();
                e.with_details(format!("path={}; err={}", path.display(), details))
            })?
        } else {
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        if let Some(o) = overrides {
            config.apply_overrides(o);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, AppError> {
        toml::from_str(raw).map_err(|e| {
            AppError::new("CONFIG_PARSE_FAILED", "Failed to parse TOML config")
                .with_details(e.to_string())
        })
    }

    /// `lookup` is `std::env::var` in production; tests pass a map.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DOCQA_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DOCQA_LLM_PROVIDER") {
            self.llm.provider = match v.trim().to_ascii_lowercase().as_str() {
                "ollama" => LlmProvider::Ollama,
                "openai" | "open_ai" | "deepseek" => LlmProvider::OpenAi,
                other => {
                    return Err(AppError::new("CONFIG_INVALID", "Unknown LLM provider")
                        .with_details(format!("DOCQA_LLM_PROVIDER={other}")))
                }
            };
        }
        if let Some(v) = lookup("DOCQA_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = lookup("DOCQA_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = lookup("DOCQA_EMBED_BASE_URL") {
            self.embeddings.base_url = v;
        }
        if let Some(v) = lookup("DOCQA_EMBED_MODEL") {
            self.embeddings.model = v;
        }
        if let Some(v) = lookup("DOCQA_MAX_ROUNDS") {
            self.controller.max_rounds = parse_env_number("DOCQA_MAX_ROUNDS", &v)?;
        }
        if let Some(v) = lookup("DOCQA_TOP_K") {
            self.retrieval.top_k = parse_env_number("DOCQA_TOP_K", &v)?;
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, o: &ConfigOverrides) {
        if let Some(d) = o.data_dir.as_ref() {
            self.storage.data_dir = d.clone();
        }
        if let Some(m) = o.llm_model.as_ref() {
            self.llm.model = m.clone();
        }
        if let Some(r) = o.max_rounds {
            self.controller.max_rounds = r;
        }
        if let Some(k) = o.top_k {
            self.retrieval.top_k = k;
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.controller.max_rounds == 0 || self.controller.max_rounds > 20 {
            return Err(invalid("controller.max_rounds", "must be between 1 and 20"));
        }
        if self.retrieval.top_k == 0 || self.retrieval.top_k > 50 {
            return Err(invalid("retrieval.top_k", "must be between 1 and 50"));
        }
        if self.ingest.chunk_size == 0 {
            return Err(invalid("ingest.chunk_size", "must be greater than 0"));
        }
        if self.ingest.chunk_overlap >= self.ingest.chunk_size {
            return Err(invalid("ingest.chunk_overlap", "must be smaller than chunk_size"));
        }
        for (field, v) in [
            ("filter.max_dot_ratio", self.filter.max_dot_ratio),
            ("filter.min_letter_ratio", self.filter.min_letter_ratio),
            ("filter.min_token_diversity", self.filter.min_token_diversity),
            ("filter.max_malformed_ratio", self.filter.max_malformed_ratio),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(invalid(field, "must be between 0.0 and 1.0"));
            }
        }
        for (field, v) in [
            ("retrieval.timeout_ms", self.retrieval.timeout_ms),
            ("controller.decision_timeout_ms", self.controller.decision_timeout_ms),
            ("controller.synthesis_timeout_ms", self.controller.synthesis_timeout_ms),
        ] {
            if v == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }
        if self.llm.base_url.trim().is_empty() {
            return Err(invalid("llm.base_url", "must not be empty"));
        }
        if self.llm.model.trim().is_empty() {
            return Err(invalid("llm.model", "must not be empty"));
        }
        if self.embeddings.model.trim().is_empty() {
            return Err(invalid("embeddings.model", "must not be empty"));
        }
        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> AppError {
    AppError::new("CONFIG_INVALID", format!("{field} {message}"))
}

fn parse_env_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, AppError> {
    raw.trim().parse::<T>().map_err(|_| {
        AppError::new("CONFIG_INVALID", "Environment override is not a number")
            .with_details(format!("{key}={raw}"))
    })
}
