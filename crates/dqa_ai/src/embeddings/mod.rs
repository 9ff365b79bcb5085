use dqa_core::error::AppError;

/// Text-to-vector collaborator. One model always yields the same dimensionality.
pub trait Embedder: Send + Sync {
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError>;
}

pub mod ollama_embed;

pub use ollama_embed::OllamaEmbedder;
