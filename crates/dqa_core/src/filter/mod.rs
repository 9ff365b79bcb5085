//! Ingestion-time noise classification.
//!
//! Every predicate is total: odd input is classified, never raised as an error.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;
use crate::domain::{sha256_hex, Chunk};

static DOT_LEADER_SPACED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\.\s*){20,}").expect("dot leader regex is valid"));
static DOT_LEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.{8,}").expect("dot run regex is valid"));
static TRAILING_PAGE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s\d{1,4}\s*$").expect("page number regex is valid"));
static CHAPTER_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bchapter\s+([0-9]+|[ivxlc]+)\b").expect("chapter regex is valid")
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NoiseReason {
    TooShort,
    Malformed,
    DotLeader,
    TableOfContents,
    Heading,
    LowLetterRatio,
    LowTokenDiversity,
    RepeatedBoilerplate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterReport {
    pub kept: u32,
    pub dropped: Vec<(String, NoiseReason)>,
}

#[derive(Debug, Clone)]
pub struct ChunkFilter {
    config: FilterConfig,
}

impl ChunkFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Classify a single chunk's text, ignoring cross-chunk repetition.
    pub fn classify_text(&self, text: &str) -> Option<NoiseReason> {
        let text = text.trim();
        let len = text.chars().count();
        if len == 0 || len < self.config.min_chunk_chars {
            return Some(NoiseReason::TooShort);
        }
        if malformed_ratio(text) > self.config.max_malformed_ratio {
            return Some(NoiseReason::Malformed);
        }
        if DOT_LEADER_SPACED_RE.is_match(text) || DOT_LEADER_RE.is_match(text) {
            return Some(NoiseReason::DotLeader);
        }

        let upper = text.to_uppercase();
        if (upper.contains("CONTENTS") || text.contains("目录")) && len < self.config.toc_max_chars {
            return Some(NoiseReason::TableOfContents);
        }
        if (upper.contains("CHAPTER") || CHAPTER_HEADING_RE.is_match(text))
            && len < self.config.heading_max_chars
        {
            return Some(NoiseReason::Heading);
        }

        let dots = text.chars().filter(|c| *c == '.').count();
        let dot_ratio = dots as f64 / len.max(1) as f64;
        if dot_ratio > self.config.max_dot_ratio && TRAILING_PAGE_NUMBER_RE.is_match(text) {
            return Some(NoiseReason::DotLeader);
        }

        if letter_ratio(text) < self.config.min_letter_ratio {
            return Some(NoiseReason::LowLetterRatio);
        }
        if token_diversity(text) < self.config.min_token_diversity {
            return Some(NoiseReason::LowTokenDiversity);
        }
        None
    }

    /// Mark noise on every chunk (including repeated boilerplate seen earlier in the sequence).
    pub fn classify(&self, chunks: Vec<Chunk>) -> (Vec<Chunk>, FilterReport) {
        let mut seen: HashSet<String> = HashSet::new();
        let mut report = FilterReport::default();
        let mut out = Vec::with_capacity(chunks.len());

        for mut chunk in chunks {
            let reason = self.classify_text(&chunk.text).or_else(|| {
                let fingerprint = sha256_hex(fingerprint_text(&chunk.text).as_bytes());
                if seen.insert(fingerprint) {
                    None
                } else {
                    Some(NoiseReason::RepeatedBoilerplate)
                }
            });
            match reason {
                Some(r) => {
                    chunk.is_noise = true;
                    report.dropped.push((chunk.chunk_id.clone(), r));
                }
                None => {
                    chunk.is_noise = false;
                    report.kept += 1;
                }
            }
            out.push(chunk);
        }
        (out, report)
    }

    /// Retrievable chunks only, in input order.
    pub fn filter(&self, chunks: Vec<Chunk>) -> (Vec<Chunk>, FilterReport) {
        let (classified, report) = self.classify(chunks);
        let kept = classified.into_iter().filter(|c| !c.is_noise).collect();
        tracing::debug!(kept = report.kept, dropped = report.dropped.len(), "chunk filter applied");
        (kept, report)
    }
}

fn malformed_ratio(text: &str) -> f64 {
    let mut total = 0usize;
    let mut bad = 0usize;
    for c in text.chars() {
        total += 1;
        if c == '\u{fffd}' || (c.is_control() && !c.is_whitespace()) {
            bad += 1;
        }
    }
    bad as f64 / total.max(1) as f64
}

fn letter_ratio(text: &str) -> f64 {
    let mut visible = 0usize;
    let mut letters = 0usize;
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        visible += 1;
        if c.is_alphabetic() {
            letters += 1;
        }
    }
    letters as f64 / visible.max(1) as f64
}

fn token_diversity(text: &str) -> f64 {
    let tokens: Vec<String> = text
        .split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect();
    // Scripts without spaces (CJK) yield one long token; diversity is not meaningful there.
    if tokens.len() < 8 {
        return 1.0;
    }
    let distinct: HashSet<&String> = tokens.iter().collect();
    distinct.len() as f64 / tokens.len() as f64
}

/// Case, digit and whitespace-insensitive form, so "Page 3 of 10" footers collide.
fn fingerprint_text(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphabetic())
        .flat_map(|c| c.to_lowercase())
        .collect()
}
