//! Retrieved evidence, deduplicated across rounds, and its citation markers.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use dqa_core::domain::{Chunk, ChunkKey, PageRange};
use serde::{Deserialize, Serialize};

/// A chunk retrieved for a query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceItem {
    pub chunk: Chunk,
    pub score: f32,
    pub query: String,
}

impl EvidenceItem {
    pub fn key(&self) -> ChunkKey {
        self.chunk.key()
    }

    pub fn citation(&self) -> Citation {
        Citation::for_chunk(&self.chunk)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub marker: String,
    pub chunk_id: String,
    pub source_document: String,
    pub page_range: PageRange,
    pub sequence_index: u32,
}

impl Citation {
    pub fn for_chunk(chunk: &Chunk) -> Self {
        Self {
            marker: citation_marker(&chunk.source_document, chunk.page_range, chunk.sequence_index),
            chunk_id: chunk.chunk_id.clone(),
            source_document: chunk.source_document.clone(),
            page_range: chunk.page_range,
            sequence_index: chunk.sequence_index,
        }
    }
}

/// `[[doc:<document>|p:<pages>|c:<sequence_index>]]`.
///
/// Characters that would break the marker grammar are percent-encoded in the document
/// name, so distinct names always give distinct markers.
pub fn citation_marker(source_document: &str, page_range: PageRange, sequence_index: u32) -> String {
    let mut doc = String::with_capacity(source_document.len());
    for c in source_document.chars() {
        if matches!(c, '%' | '|' | '[' | ']') || c.is_control() {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                doc.push_str(&format!("%{b:02X}"));
            }
        } else {
            doc.push(c);
        }
    }
    format!("[[doc:{doc}|p:{page_range}|c:{sequence_index}]]")
}

/// Descending score, then ascending sequence index, then document name.
pub fn rank_order(a: &EvidenceItem, b: &EvidenceItem) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.chunk.sequence_index.cmp(&b.chunk.sequence_index))
        .then_with(|| a.chunk.source_document.cmp(&b.chunk.source_document))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Items whose identity was not yet in the set.
    pub added: usize,
    /// Already-present items replaced by a higher-scoring retrieval.
    pub improved: usize,
}

/// Evidence accumulated over a run, keyed by chunk identity.
#[derive(Debug, Clone, Default)]
pub struct EvidenceSet {
    items: BTreeMap<ChunkKey, EvidenceItem>,
}

impl EvidenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, items: impl IntoIterator<Item = EvidenceItem>) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        for item in items {
            match self.items.get_mut(&item.key()) {
                Some(existing) => {
                    if item.score > existing.score {
                        *existing = item;
                        outcome.improved += 1;
                    }
                }
                None => {
                    self.items.insert(item.key(), item);
                    outcome.added += 1;
                }
            }
        }
        outcome
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ranked(&self) -> Vec<EvidenceItem> {
        let mut out: Vec<EvidenceItem> = self.items.values().cloned().collect();
        out.sort_by(rank_order);
        out
    }

    pub fn into_ranked(self) -> Vec<EvidenceItem> {
        let mut out: Vec<EvidenceItem> = self.items.into_values().collect();
        out.sort_by(rank_order);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_format_is_stable() {
        assert_eq!(
            citation_marker("paper.pdf", PageRange { start: 3, end: 4 }, 17),
            "[[doc:paper.pdf|p:3-4|c:17]]"
        );
        assert_eq!(
            citation_marker("a|b]].pdf", PageRange::single(1), 0),
            "[[doc:a%7Cb%5D%5D.pdf|p:1|c:0]]"
        );
    }

    #[test]
    fn escaped_names_stay_distinct() {
        let page = PageRange::single(1);
        let names = ["a|b.pdf", "a_b.pdf", "a%7Cb.pdf", "a[b.pdf"];
        let markers: std::collections::BTreeSet<String> =
            names.iter().map(|n| citation_marker(n, page, 0)).collect();
        assert_eq!(markers.len(), names.len());
    }

    #[test]
    fn ranking_is_total_even_with_nan_scores() {
        let item = |seq: u32, score: f32| EvidenceItem {
            chunk: Chunk::new("a.pdf", PageRange::single(1), seq, "text"),
            score,
            query: "q".to_string(),
        };
        let mut items = vec![item(0, 0.2), item(1, f32::NAN), item(2, 0.9), item(3, 0.5)];

        items.sort_by(rank_order);

        let finite: Vec<u32> = items
            .iter()
            .filter(|i| i.score.is_finite())
            .map(|i| i.chunk.sequence_index)
            .collect();
        assert_eq!(finite, vec![2, 3, 0]);
    }
}
