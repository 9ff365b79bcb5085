use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::AppError;

/// Inclusive, 1-based page span a chunk was cut from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl PageRange {
    pub fn single(page: u32) -> Self {
        Self {
            start: page,
            end: page,
        }
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Identity of a chunk across retrieval rounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub source_document: String,
    pub sequence_index: u32,
}

/// A contiguous span of document text. Immutable once ingestion has produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: String,
    pub source_document: String,
    pub page_range: PageRange,
    pub sequence_index: u32,
    pub text: String,
    pub text_sha256: String,
    #[serde(default)]
    pub is_noise: bool,
}

impl Chunk {
    pub fn new(
        source_document: impl Into<String>,
        page_range: PageRange,
        sequence_index: u32,
        text: impl Into<String>,
    ) -> Self {
        let source_document = source_document.into();
        let text = text.into();
        let text_sha256 = sha256_hex(text.as_bytes());
        // Content-derived: re-ingesting an unchanged document yields the same ids.
        let id_input = format!(
            "v1|{}|{}|{}|{}",
            source_document, page_range, sequence_index, text_sha256
        );
        Self {
            chunk_id: sha256_hex(id_input.as_bytes()),
            source_document,
            page_range,
            sequence_index,
            text,
            text_sha256,
            is_noise: false,
        }
    }

    pub fn key(&self) -> ChunkKey {
        ChunkKey {
            source_document: self.source_document.clone(),
            sequence_index: self.sequence_index,
        }
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// One prior question/answer exchange within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    /// RFC3339, UTC.
    pub timestamp: String,
}

pub fn now_rfc3339_utc() -> Result<String, AppError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| AppError::new("TIME_FORMAT_FAILED", "Failed to format time").with_details(e.to_string()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}
