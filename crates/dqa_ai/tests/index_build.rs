use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dqa_ai::embeddings::Embedder;
use dqa_ai::index::{LocalVectorIndex, VectorIndex};
use dqa_core::domain::{Chunk, PageRange};
use dqa_core::error::AppError;
use pretty_assertions::assert_eq;

struct CountingEmbedder {
    calls: AtomicUsize,
}

impl CountingEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for CountingEmbedder {
    fn embed(&self, _model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Deterministic embedding: [len, first_byte, last_byte]
        let bytes = input.as_bytes();
        let first = bytes.first().copied().unwrap_or(0) as f32;
        let last = bytes.last().copied().unwrap_or(0) as f32;
        Ok(vec![bytes.len() as f32, first, last])
    }
}

struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn embed(&self, _model: &str, _input: &str) -> Result<Vec<f32>, AppError> {
        Err(AppError::new("AI_EMBEDDINGS_FAILED", "offline").with_retryable(true))
    }
}

fn chunk(doc: &str, seq: u32, text: &str) -> Chunk {
    Chunk::new(doc, PageRange::single(1), seq, text)
}

#[test]
fn rebuild_persists_and_embeds_only_changed_chunks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let embedder = Arc::new(CountingEmbedder::new());
    let index = LocalVectorIndex::open(dir.path().to_path_buf(), embedder.clone(), "mock").expect("open");
    assert!(!index.is_ready());

    let st = index
        .rebuild(vec![chunk("a.pdf", 0, "aaaa"), chunk("a.pdf", 1, "bbbb")])
        .expect("rebuild");
    assert!(st.ready);
    assert_eq!(st.chunk_count, 2);
    assert_eq!(st.dims, Some(3));
    assert_eq!(st.documents, 1);
    assert_eq!(st.version, 1);
    assert!(st.entries_sha256.is_some());
    assert_eq!(embedder.call_count(), 2);

    // One chunk changed: only it is embedded again.
    let st = index
        .rebuild(vec![chunk("a.pdf", 0, "aaaa"), chunk("a.pdf", 1, "bbbc")])
        .expect("rebuild");
    assert_eq!(st.version, 2);
    assert_eq!(embedder.call_count(), 3);

    // A fresh handle on the same directory sees the published state.
    let reopened = LocalVectorIndex::open(dir.path().to_path_buf(), embedder.clone(), "mock").expect("reopen");
    assert!(reopened.is_ready());
    assert_eq!(reopened.len(), 2);
    let snap = reopened.snapshot().expect("snapshot");
    assert_eq!(snap.version(), 2);
    assert_eq!(snap.entries()[1].chunk.text, "bbbc");
    assert_eq!(embedder.call_count(), 3);
}

#[test]
fn noise_chunks_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let index = LocalVectorIndex::open(dir.path().to_path_buf(), Arc::new(CountingEmbedder::new()), "mock")
        .expect("open");
    let mut noisy = chunk("a.pdf", 0, "........");
    noisy.is_noise = true;

    let err = index.upsert(vec![noisy]).unwrap_err();

    assert_eq!(err.code, "INDEX_NOISE_REJECTED");
    assert!(!index.is_ready());
}

#[test]
fn upsert_replaces_documents_and_keeps_others() {
    let dir = tempfile::tempdir().expect("tempdir");
    let index = LocalVectorIndex::open(dir.path().to_path_buf(), Arc::new(CountingEmbedder::new()), "mock")
        .expect("open");
    index
        .rebuild(vec![
            chunk("a.pdf", 0, "a0"),
            chunk("a.pdf", 1, "a1"),
            chunk("a.pdf", 2, "a2"),
            chunk("b.pdf", 0, "b0"),
        ])
        .expect("rebuild");

    let st = index.upsert(vec![chunk("a.pdf", 0, "a0 revised")]).expect("upsert");

    assert_eq!(st.chunk_count, 2);
    assert_eq!(st.documents, 2);
    let snap = index.snapshot().expect("snapshot");
    let texts: Vec<&str> = snap.entries().iter().map(|e| e.chunk.text.as_str()).collect();
    assert_eq!(texts, vec!["a0 revised", "b0"]);
}

#[test]
fn readers_keep_their_snapshot_across_a_rebuild() {
    let dir = tempfile::tempdir().expect("tempdir");
    let index = LocalVectorIndex::open(dir.path().to_path_buf(), Arc::new(CountingEmbedder::new()), "mock")
        .expect("open");
    index.rebuild(vec![chunk("a.pdf", 0, "old text")]).expect("rebuild");
    let held = index.snapshot().expect("snapshot");

    index
        .rebuild(vec![chunk("a.pdf", 0, "new text"), chunk("a.pdf", 1, "more")])
        .expect("rebuild");

    assert_eq!(held.len(), 1);
    assert_eq!(held.entries()[0].chunk.text, "old text");
    assert_eq!(index.len(), 2);
}

#[test]
fn failed_rebuild_leaves_published_index_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let index = LocalVectorIndex::open(dir.path().to_path_buf(), Arc::new(CountingEmbedder::new()), "mock")
        .expect("open");
    index.rebuild(vec![chunk("a.pdf", 0, "kept")]).expect("rebuild");

    let failing = LocalVectorIndex::open(dir.path().to_path_buf(), Arc::new(FailingEmbedder), "mock").expect("open");
    let err = failing.rebuild(vec![chunk("a.pdf", 0, "changed")]).unwrap_err();
    assert_eq!(err.code, "AI_EMBEDDINGS_FAILED");
    assert!(err.retryable);

    let reopened = LocalVectorIndex::open(dir.path().to_path_buf(), Arc::new(CountingEmbedder::new()), "mock")
        .expect("reopen");
    assert_eq!(reopened.snapshot().expect("snapshot").entries()[0].chunk.text, "kept");
}

#[test]
fn different_model_or_torn_files_require_rebuild() {
    let dir = tempfile::tempdir().expect("tempdir");
    let index = LocalVectorIndex::open(dir.path().to_path_buf(), Arc::new(CountingEmbedder::new()), "mock")
        .expect("open");
    index.rebuild(vec![chunk("a.pdf", 0, "text")]).expect("rebuild");

    let other = LocalVectorIndex::open(dir.path().to_path_buf(), Arc::new(CountingEmbedder::new()), "other")
        .expect("open");
    assert!(!other.is_ready());

    std::fs::write(dir.path().join("index_entries.json"), b"[]").expect("tamper");
    let torn = LocalVectorIndex::open(dir.path().to_path_buf(), Arc::new(CountingEmbedder::new()), "mock")
        .expect("open");
    assert!(!torn.is_ready());
}

#[test]
fn unreadable_status_file_opens_as_not_ready() {
    let dir = tempfile::tempdir().expect("tempdir");
    let index = LocalVectorIndex::open(dir.path().to_path_buf(), Arc::new(CountingEmbedder::new()), "mock")
        .expect("open");
    index.rebuild(vec![chunk("a.pdf", 0, "text")]).expect("rebuild");
    std::fs::write(dir.path().join("index_status.json"), b"{ truncated").expect("tamper");

    let torn = LocalVectorIndex::open(dir.path().to_path_buf(), Arc::new(CountingEmbedder::new()), "mock")
        .expect("open");
    assert!(!torn.is_ready());

    let st = torn.rebuild(vec![chunk("a.pdf", 0, "text")]).expect("rebuild");
    assert!(st.ready);
    assert_eq!(st.version, 1);
}
