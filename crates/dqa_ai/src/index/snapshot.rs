use dqa_core::domain::Chunk;
use dqa_core::error::AppError;
use serde::{Deserialize, Serialize};

use crate::retrieve::similarity;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Immutable published state of the index. Readers hold an `Arc` to one of these.
#[derive(Debug)]
pub struct IndexSnapshot {
    version: u64,
    model: String,
    dims: Option<u32>,
    entries: Vec<IndexEntry>,
    norms: Vec<f32>,
}

impl IndexSnapshot {
    pub fn new(version: u64, model: impl Into<String>, entries: Vec<IndexEntry>) -> Result<Self, AppError> {
        let mut dims: Option<u32> = None;
        for e in entries.iter() {
            if e.chunk.is_noise {
                return Err(AppError::new(
                    "INDEX_NOISE_REJECTED",
                    "Noise chunks are never stored in the index",
                )
                .with_details(format!("chunk_id={}", e.chunk.chunk_id)));
            }
            let this_dims = e.vector.len() as u32;
            match dims {
                Some(d) if d != this_dims => {
                    return Err(AppError::new(
                        "INDEX_BUILD_FAILED",
                        "Embedding dimension mismatch across chunks",
                    )
                    .with_details(format!(
                        "expected={}; got={}; chunk_id={}",
                        d, this_dims, e.chunk.chunk_id
                    )));
                }
                Some(_) => {}
                None => dims = Some(this_dims),
            }
        }
        let norms = entries.iter().map(|e| similarity::l2_norm(&e.vector)).collect();
        Ok(Self {
            version,
            model: model.into(),
            dims,
            entries,
            norms,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> Option<u32> {
        self.dims
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cosine top-`k`, descending score, ties by ascending sequence index then document.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, AppError> {
        let Some(dims) = self.dims else {
            return Ok(Vec::new());
        };
        if query.len() as u32 != dims {
            return Err(AppError::new(
                "RETRIEVAL_FAILED",
                "Query embedding dims do not match index dims",
            )
            .with_details(format!("index_dims={dims}; query_dims={}", query.len())));
        }
        let qnorm = similarity::l2_norm(query);
        if qnorm == 0.0 || !qnorm.is_finite() {
            return Err(AppError::new(
                "RETRIEVAL_FAILED",
                "Query embedding norm is zero or not finite",
            ));
        }

        let mut hits: Vec<(usize, f32)> = Vec::with_capacity(self.entries.len());
        for (i, e) in self.entries.iter().enumerate() {
            let vnorm = self.norms[i];
            if vnorm == 0.0 {
                continue;
            }
            let score = similarity::cosine_similarity(query, &e.vector, qnorm, vnorm);
            if score.is_finite() {
                hits.push((i, score));
            }
        }

        hits.sort_by(|a, b| {
            let ca = &self.entries[a.0].chunk;
            let cb = &self.entries[b.0].chunk;
            b.1.total_cmp(&a.1)
                .then(ca.sequence_index.cmp(&cb.sequence_index))
                .then_with(|| ca.source_document.cmp(&cb.source_document))
        });
        hits.truncate(k);

        Ok(hits
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.entries[i].chunk.clone(),
                score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dqa_core::domain::PageRange;

    fn entry(seq: u32, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: Chunk::new("a.pdf", PageRange::single(1), seq, format!("text {seq}")),
            vector,
        }
    }

    #[test]
    fn non_finite_vectors_are_skipped_not_ranked() {
        let snap = IndexSnapshot::new(
            1,
            "mock",
            vec![
                entry(0, vec![1.0, 0.0]),
                entry(1, vec![f32::NAN, 1.0]),
                entry(2, vec![0.5, 0.5]),
            ],
        )
        .expect("snapshot");

        let hits = snap.search(&[1.0, 0.0], 5).expect("search");

        let seqs: Vec<u32> = hits.iter().map(|h| h.chunk.sequence_index).collect();
        assert_eq!(seqs, vec![0, 2]);
        assert_eq!(
            snap.search(&[f32::NAN, 0.0], 5).unwrap_err().code,
            "RETRIEVAL_FAILED"
        );
    }
}
