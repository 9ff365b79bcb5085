//! Document loading, page cleaning and splitting.
//!
//! Produces the ordered raw chunk sequence the noise filter and index consume. A document
//! that fails to load is reported and skipped; the remaining documents proceed.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::IngestConfig;
use crate::domain::{Chunk, PageRange};
use crate::error::AppError;

pub mod loaders;
pub mod splitting;

pub use loaders::{PdfLoader, TextLoader};
pub use splitting::{clean_page_text, split_text};

/// Raw text of one page as returned by a loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    pub source_document: String,
    /// 1-based.
    pub page_number: u32,
    pub text: String,
}

pub trait DocumentLoader: Send + Sync {
    fn supports(&self, path: &Path) -> bool;
    fn load(&self, path: &Path) -> Result<Vec<RawPage>, AppError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestFailure {
    pub path: String,
    pub error: AppError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct IngestReport {
    pub documents_loaded: u32,
    pub pages_kept: u32,
    pub pages_dropped: u32,
    pub chunks_total: u32,
    pub skipped_paths: Vec<String>,
    pub failures: Vec<IngestFailure>,
}

#[derive(Debug, Clone)]
pub struct IngestOutput {
    pub chunks: Vec<Chunk>,
    pub report: IngestReport,
}

pub struct Ingestor {
    loaders: Vec<Box<dyn DocumentLoader>>,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(config: IngestConfig) -> Self {
        Self {
            loaders: vec![Box::new(PdfLoader), Box::new(TextLoader)],
            config,
        }
    }

    pub fn with_loaders(config: IngestConfig, loaders: Vec<Box<dyn DocumentLoader>>) -> Self {
        Self { loaders, config }
    }

    fn loader_for(&self, path: &Path) -> Option<&dyn DocumentLoader> {
        self.loaders
            .iter()
            .find(|l| l.supports(path))
            .map(|l| l.as_ref())
    }

    /// Expand directories (one level, sorted) and drop unsupported paths.
    pub fn collect_paths(&self, paths: &[PathBuf]) -> (Vec<PathBuf>, Vec<String>) {
        let mut out = Vec::new();
        let mut skipped = Vec::new();
        for p in paths {
            if p.is_dir() {
                let mut entries: Vec<PathBuf> = match fs::read_dir(p) {
                    Ok(rd) => rd.flatten().map(|e| e.path()).collect(),
                    Err(e) => {
                        tracing::warn!(path = %p.display(), error = %e, "failed to read directory");
                        skipped.push(p.display().to_string());
                        continue;
                    }
                };
                entries.sort();
                for e in entries {
                    if e.is_file() && self.loader_for(&e).is_some() {
                        out.push(e);
                    }
                }
            } else if p.is_file() && self.loader_for(p).is_some() {
                out.push(p.clone());
            } else {
                tracing::warn!(path = %p.display(), "skipping unsupported path");
                skipped.push(p.display().to_string());
            }
        }
        (out, skipped)
    }

    pub fn ingest(&self, paths: &[PathBuf]) -> IngestOutput {
        let (files, skipped) = self.collect_paths(paths);
        let mut report = IngestReport {
            skipped_paths: skipped,
            ..IngestReport::default()
        };
        let mut chunks = Vec::new();

        for path in files {
            let Some(loader) = self.loader_for(&path) else {
                continue;
            };
            let pages = match loader.load(&path) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(path = %path.display(), code = %e.code, "document skipped");
                    report.failures.push(IngestFailure {
                        path: path.display().to_string(),
                        error: e,
                    });
                    continue;
                }
            };
            report.documents_loaded += 1;
            let (doc_chunks, kept, dropped) = self.split_pages(&pages);
            report.pages_kept += kept;
            report.pages_dropped += dropped;
            chunks.extend(doc_chunks);
        }

        report.chunks_total = chunks.len().min(u32::MAX as usize) as u32;
        tracing::info!(
            documents = report.documents_loaded,
            failed = report.failures.len(),
            chunks = report.chunks_total,
            "ingestion finished"
        );
        IngestOutput { chunks, report }
    }

    /// Clean and split one document's pages. `sequence_index` runs across all pages.
    pub fn split_pages(&self, pages: &[RawPage]) -> (Vec<Chunk>, u32, u32) {
        let mut out = Vec::new();
        let mut kept = 0u32;
        let mut dropped = 0u32;
        let mut seq: u32 = 0;
        for page in pages {
            let cleaned = clean_page_text(&page.text);
            if cleaned.chars().count() < self.config.min_page_chars {
                dropped += 1;
                continue;
            }
            kept += 1;
            for piece in split_text(&cleaned, self.config.chunk_size, self.config.chunk_overlap) {
                out.push(Chunk::new(
                    page.source_document.clone(),
                    PageRange::single(page.page_number),
                    seq,
                    piece,
                ));
                seq += 1;
            }
        }
        (out, kept, dropped)
    }
}
