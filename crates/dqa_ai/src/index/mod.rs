//! Nearest-neighbour index over retrievable chunks.
//!
//! The live index is an immutable [`IndexSnapshot`] behind `RwLock<Option<Arc<_>>>`.
//! Writers build a complete replacement, persist it, then swap the pointer, so a reader
//! holding an `Arc` never observes a half-built index. Writers are serialized by a mutex.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use dqa_core::domain::{now_rfc3339_utc, Chunk};
use dqa_core::error::AppError;

use crate::embeddings::Embedder;

mod snapshot;
mod store;

pub use snapshot::{IndexEntry, IndexSnapshot, ScoredChunk};
pub use store::{IndexStatus, IndexStore, INDEX_FORMAT_VERSION};

pub trait VectorIndex: Send + Sync {
    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, AppError>;

    /// Add chunks. A document present in `chunks` replaces all of its earlier chunks.
    /// Noise chunks are rejected.
    fn upsert(&self, chunks: Vec<Chunk>) -> Result<IndexStatus, AppError>;

    fn is_ready(&self) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct LocalVectorIndex {
    store: IndexStore,
    embedder: Arc<dyn Embedder>,
    model: String,
    current: RwLock<Option<Arc<IndexSnapshot>>>,
    writer: Mutex<()>,
}

impl std::fmt::Debug for LocalVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalVectorIndex")
            .field("dir", &self.store.dir())
            .field("model", &self.model)
            .field("len", &self.len())
            .finish()
    }
}

impl LocalVectorIndex {
    /// Load the persisted index if it was built with `model`; otherwise start not ready.
    pub fn open(
        dir: PathBuf,
        embedder: Arc<dyn Embedder>,
        model: impl Into<String>,
    ) -> Result<Self, AppError> {
        let store = IndexStore::open(dir);
        let model = model.into();
        let status = match store.read_status() {
            Ok(status) => status,
            Err(e) if e.has_code("INDEX_CORRUPT") => {
                tracing::warn!(error = %e, "index status is unreadable; rebuild required");
                IndexStatus::not_ready()
            }
            Err(e) => return Err(e),
        };
        let loaded = if !status.ready {
            None
        } else if status.model.as_deref() != Some(model.as_str()) {
            tracing::warn!(
                index_model = status.model.as_deref().unwrap_or(""),
                model = %model,
                "index was built with a different embedding model; rebuild required"
            );
            None
        } else if status.format != INDEX_FORMAT_VERSION {
            tracing::warn!(format = status.format, "unsupported index format; rebuild required");
            None
        } else {
            match store.read_entries(&status) {
                Ok(entries) => Some(Arc::new(IndexSnapshot::new(status.version, model.clone(), entries)?)),
                Err(e) if e.has_code("INDEX_CORRUPT") => {
                    tracing::warn!(error = %e, "index files are inconsistent; rebuild required");
                    None
                }
                Err(e) => return Err(e),
            }
        };

        Ok(Self {
            store,
            embedder,
            model,
            current: RwLock::new(loaded),
            writer: Mutex::new(()),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        match self.current.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn status(&self) -> Result<IndexStatus, AppError> {
        self.store.read_status()
    }

    /// Replace the whole index with `chunks`. Vectors of unchanged text are reused.
    pub fn rebuild(&self, chunks: Vec<Chunk>) -> Result<IndexStatus, AppError> {
        let _guard = self.writer.lock().map_err(|_| writer_poisoned())?;
        let previous = self.snapshot();
        let entries = self.embed_chunks(chunks, previous.as_deref())?;
        self.publish(entries, previous.as_deref())
    }

    fn embed_chunks(
        &self,
        chunks: Vec<Chunk>,
        previous: Option<&IndexSnapshot>,
    ) -> Result<Vec<IndexEntry>, AppError> {
        let mut reusable: HashMap<&str, &[f32]> = HashMap::new();
        if let Some(prev) = previous.filter(|p| p.model() == self.model) {
            for e in prev.entries() {
                reusable.insert(e.chunk.text_sha256.as_str(), e.vector.as_slice());
            }
        }

        let mut entries = Vec::with_capacity(chunks.len());
        let mut embedded = 0usize;
        for chunk in chunks {
            if chunk.is_noise {
                return Err(AppError::new(
                    "INDEX_NOISE_REJECTED",
                    "Noise chunks are never stored in the index",
                )
                .with_details(format!("chunk_id={}", chunk.chunk_id)));
            }
            let vector = match reusable.get(chunk.text_sha256.as_str()) {
                Some(v) => v.to_vec(),
                None => {
                    embedded += 1;
                    self.embedder.embed(&self.model, &chunk.text).map_err(|e| {
                        AppError::new("AI_EMBEDDINGS_FAILED", "Failed to compute embeddings")
                            .with_details(format!("chunk_id={}; err={}", chunk.chunk_id, e))
                            .with_retryable(e.retryable)
                    })?
                }
            };
            entries.push(IndexEntry { chunk, vector });
        }
        tracing::debug!(embedded, reused = entries.len() - embedded, "chunk vectors ready");
        Ok(entries)
    }

    fn publish(
        &self,
        entries: Vec<IndexEntry>,
        previous: Option<&IndexSnapshot>,
    ) -> Result<IndexStatus, AppError> {
        let version = previous.map(|p| p.version()).unwrap_or(0) + 1;
        let snapshot = IndexSnapshot::new(version, self.model.clone(), entries)?;
        let documents = snapshot
            .entries()
            .iter()
            .map(|e| e.chunk.source_document.as_str())
            .collect::<BTreeSet<_>>()
            .len() as u32;

        let status = self.store.write(
            snapshot.entries(),
            IndexStatus {
                ready: true,
                model: Some(self.model.clone()),
                dims: snapshot.dims(),
                chunk_count: snapshot.len() as u32,
                documents,
                version,
                format: INDEX_FORMAT_VERSION,
                entries_sha256: None,
                updated_at: Some(now_rfc3339_utc()?),
            },
        )?;
        self.swap(Some(Arc::new(snapshot)));
        tracing::info!(version, chunks = status.chunk_count, documents, "index published");
        Ok(status)
    }

    fn swap(&self, next: Option<Arc<IndexSnapshot>>) {
        match self.current.write() {
            Ok(mut g) => *g = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

impl VectorIndex for LocalVectorIndex {
    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, AppError> {
        let snapshot = self.snapshot().ok_or_else(index_unavailable)?;
        snapshot.search(vector, k)
    }

    fn upsert(&self, chunks: Vec<Chunk>) -> Result<IndexStatus, AppError> {
        let _guard = self.writer.lock().map_err(|_| writer_poisoned())?;
        let previous = self.snapshot();
        let incoming = self.embed_chunks(chunks, previous.as_deref())?;

        let replaced: BTreeSet<&str> = incoming
            .iter()
            .map(|e| e.chunk.source_document.as_str())
            .collect();
        let mut entries: Vec<IndexEntry> = previous
            .as_deref()
            .filter(|p| p.model() == self.model)
            .map(|p| {
                p.entries()
                    .iter()
                    .filter(|e| !replaced.contains(e.chunk.source_document.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        entries.extend(incoming);
        entries.sort_by(|a, b| a.chunk.key().cmp(&b.chunk.key()));
        self.publish(entries, previous.as_deref())
    }

    fn is_ready(&self) -> bool {
        self.snapshot().is_some()
    }

    fn len(&self) -> usize {
        self.snapshot().map(|s| s.len()).unwrap_or(0)
    }
}

pub fn index_unavailable() -> AppError {
    AppError::new(
        "INDEX_UNAVAILABLE",
        "Index not ready; ingest documents before asking questions",
    )
}

fn writer_poisoned() -> AppError {
    AppError::new("INDEX_LOCK_POISONED", "Index writer lock poisoned")
}
