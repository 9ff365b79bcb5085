use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use crate::error::AppError;

use super::{DocumentLoader, RawPage};

fn has_extension(path: &Path, exts: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| exts.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

/// PDF text extraction through `pdf-extract`, one `RawPage` per PDF page.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfLoader;

impl DocumentLoader for PdfLoader {
    fn supports(&self, path: &Path) -> bool {
        has_extension(path, &["pdf"])
    }

    fn load(&self, path: &Path) -> Result<Vec<RawPage>, AppError> {
        // pdf-extract panics on some malformed fonts; contain it to this document.
        let result = catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_by_pages(path)));
        let pages = match result {
            Ok(Ok(pages)) => pages,
            Ok(Err(e)) => {
                return Err(AppError::new("INGEST_DOCUMENT_FAILED", "Failed to extract PDF text")
                    .with_details(format!("path={}; err={}", path.display(), e)))
            }
            Err(payload) => {
                let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                return Err(AppError::new("INGEST_DOCUMENT_FAILED", "PDF extractor crashed")
                    .with_details(format!("path={}; err={}", path.display(), msg)));
            }
        };

        let source = path.display().to_string();
        Ok(pages
            .into_iter()
            .enumerate()
            .map(|(i, text)| RawPage {
                source_document: source.clone(),
                page_number: (i + 1).min(u32::MAX as usize) as u32,
                text,
            })
            .collect())
    }
}

/// Plain text files. Form feeds separate pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextLoader;

impl DocumentLoader for TextLoader {
    fn supports(&self, path: &Path) -> bool {
        has_extension(path, &["txt", "md"])
    }

    fn load(&self, path: &Path) -> Result<Vec<RawPage>, AppError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            AppError::new("INGEST_DOCUMENT_FAILED", "Failed to read text document")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        let source = path.display().to_string();
        Ok(raw
            .split('\u{c}')
            .enumerate()
            .map(|(i, text)| RawPage {
                source_document: source.clone(),
                page_number: (i + 1).min(u32::MAX as usize) as u32,
                text: text.to_string(),
            })
            .collect())
    }
}
