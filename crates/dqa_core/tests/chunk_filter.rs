use dqa_core::config::FilterConfig;
use dqa_core::domain::{Chunk, PageRange};
use dqa_core::filter::{ChunkFilter, NoiseReason};
use proptest::prelude::*;

const BODY: &str = "Garbled circuits let two parties jointly evaluate a boolean function \
without revealing their private inputs. The garbler encrypts every gate's truth table and \
the evaluator decrypts exactly one row per gate using oblivious transfer for its input labels.";

fn chunk(seq: u32, text: &str) -> Chunk {
    Chunk::new("paper.pdf", PageRange::single(1), seq, text)
}

fn filter() -> ChunkFilter {
    ChunkFilter::new(FilterConfig::default())
}

#[test]
fn keeps_ordinary_prose() {
    assert!(BODY.chars().count() >= 200);
    assert_eq!(filter().classify_text(BODY), None);
}

#[test]
fn drops_short_fragments() {
    assert_eq!(
        filter().classify_text("3.2 Security model"),
        Some(NoiseReason::TooShort)
    );
}

#[test]
fn drops_dotted_leader_toc_lines() {
    let toc = format!(
        "1 Introduction ........................ 1 2 Background ........................ 4 {}",
        "3 Protocol design and security analysis of the scheme 9 ".repeat(4)
    );
    assert_eq!(filter().classify_text(&toc), Some(NoiseReason::DotLeader));
}

#[test]
fn drops_contents_pages_and_chapter_headings() {
    let contents = format!("Table of Contents {}", "Preface Introduction Methods Results ".repeat(8));
    assert_eq!(
        filter().classify_text(&contents),
        Some(NoiseReason::TableOfContents)
    );

    let heading = format!("Chapter 3 Secure Two-Party Computation {}", "overview of the ideas covered ".repeat(7));
    assert_eq!(filter().classify_text(&heading), Some(NoiseReason::Heading));
}

#[test]
fn drops_mostly_numeric_tables() {
    let table = "12 34 56 78 90 11 22 33 44 55 66 77 88 99 ".repeat(6);
    assert_eq!(
        filter().classify_text(&table),
        Some(NoiseReason::LowLetterRatio)
    );
}

#[test]
fn drops_low_diversity_boilerplate() {
    let text = "confidential draft do not distribute ".repeat(10);
    assert_eq!(
        filter().classify_text(&text),
        Some(NoiseReason::LowTokenDiversity)
    );
}

#[test]
fn drops_repeated_headers_across_the_sequence() {
    let footer_a = format!("{BODY} Proceedings of the Workshop, page 3");
    let footer_b = format!("{BODY} Proceedings of the Workshop, page 4");
    let (kept, report) = filter().filter(vec![chunk(0, &footer_a), chunk(1, &footer_b)]);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].sequence_index, 0);
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.dropped[0].1, NoiseReason::RepeatedBoilerplate);
}

#[test]
fn classify_marks_noise_without_removing() {
    let (all, report) = filter().classify(vec![chunk(0, BODY), chunk(1, "tiny")]);
    assert_eq!(all.len(), 2);
    assert!(!all[0].is_noise);
    assert!(all[1].is_noise);
    assert_eq!(report.kept, 1);
}

proptest! {
    #[test]
    fn never_emits_chunks_below_min_length(texts in proptest::collection::vec(".{0,400}", 0..20)) {
        let config = FilterConfig::default();
        let min = config.min_chunk_chars;
        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| chunk(i as u32, t))
            .collect();
        let (kept, _) = ChunkFilter::new(config).filter(chunks);
        for c in kept {
            prop_assert!(c.text.trim().chars().count() >= min);
            prop_assert!(!c.is_noise);
        }
    }
}
