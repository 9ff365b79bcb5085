use std::collections::BTreeMap;
use std::sync::Arc;

use dqa_core::error::AppError;

use crate::embeddings::Embedder;
use crate::evidence::{EvidenceItem, EvidenceSet};
use crate::index::VectorIndex;

pub mod similarity;

pub const MAX_TOP_K: usize = 50;

/// Query string → top-`k` evidence, descending score.
pub trait Retriever: Send + Sync {
    fn retrieve(&self, query: &str, k: usize) -> Result<Vec<EvidenceItem>, AppError>;
}

pub struct IndexRetriever {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    model: String,
    synonyms: BTreeMap<String, Vec<String>>,
}

impl IndexRetriever {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>, model: impl Into<String>) -> Self {
        Self {
            index,
            embedder,
            model: model.into(),
            synonyms: BTreeMap::new(),
        }
    }

    pub fn with_synonyms(mut self, synonyms: BTreeMap<String, Vec<String>>) -> Self {
        self.synonyms = synonyms;
        self
    }

    fn search(&self, original: &str, text: &str, k: usize) -> Result<Vec<EvidenceItem>, AppError> {
        let qv = self.embedder.embed(&self.model, text).map_err(|e| {
            AppError::new("RETRIEVAL_FAILED", "Failed to embed query")
                .with_details(format!("query={text}; err={e}"))
                .with_retryable(e.retryable)
        })?;
        Ok(self
            .index
            .query(&qv, k)?
            .into_iter()
            .map(|hit| EvidenceItem {
                chunk: hit.chunk,
                score: hit.score,
                query: original.to_string(),
            })
            .collect())
    }
}

impl Retriever for IndexRetriever {
    fn retrieve(&self, query: &str, k: usize) -> Result<Vec<EvidenceItem>, AppError> {
        let q = query.trim();
        if q.is_empty() {
            return Err(AppError::new("RETRIEVAL_FAILED", "Query must not be empty"));
        }
        let k = k.clamp(1, MAX_TOP_K);
        if !self.index.is_ready() {
            return Err(crate::index::index_unavailable());
        }
        if self.index.is_empty() {
            return Ok(Vec::new());
        }

        let variants = expand_query(q, &self.synonyms);
        if variants.len() == 1 {
            return self.search(q, q, k);
        }

        // Same chunk reached through several aliases keeps its best score.
        let mut merged = EvidenceSet::new();
        for variant in variants.iter() {
            merged.merge(self.search(q, variant, k)?);
        }
        let mut out = merged.into_ranked();
        out.truncate(k);
        tracing::debug!(query = q, variants = variants.len(), hits = out.len(), "synonym-expanded retrieval");
        Ok(out)
    }
}

/// The query itself followed by every alias of every key it contains (case-insensitive).
pub fn expand_query(query: &str, synonyms: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    let lowered = query.to_lowercase();
    let mut out = vec![query.to_string()];
    for (key, aliases) in synonyms.iter() {
        if key.trim().is_empty() || !lowered.contains(&key.to_lowercase()) {
            continue;
        }
        for alias in aliases.iter() {
            let alias = alias.trim();
            if !alias.is_empty() && !out.iter().any(|q| q.eq_ignore_ascii_case(alias)) {
                out.push(alias.to_string());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn expands_matching_keys_only() {
        let mut table = BTreeMap::new();
        table.insert(
            "garbled circuit".to_string(),
            vec!["Yao".to_string(), "GC".to_string()],
        );
        table.insert("oblivious transfer".to_string(), vec!["OT".to_string()]);

        assert_eq!(
            expand_query("How do Garbled Circuit schemes work?", &table),
            vec![
                "How do Garbled Circuit schemes work?".to_string(),
                "Yao".to_string(),
                "GC".to_string()
            ]
        );
        assert_eq!(expand_query("unrelated", &table), vec!["unrelated".to_string()]);
    }
}
