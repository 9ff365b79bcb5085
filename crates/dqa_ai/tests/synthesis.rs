use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dqa_ai::evidence::EvidenceItem;
use dqa_ai::llm::Llm;
use dqa_ai::prompts::ContextBudget;
use dqa_ai::synth::{resolve_citations, AnswerSynthesizer, Synthesis, INSUFFICIENT_INFORMATION_ANSWER};
use dqa_core::domain::{Chunk, ConversationTurn, PageRange};
use dqa_core::error::AppError;
use pretty_assertions::assert_eq;

struct MockLlm {
    out: Result<String, AppError>,
    calls: AtomicUsize,
    last_prompt: Mutex<String>,
}

impl MockLlm {
    fn new(out: Result<String, AppError>) -> Self {
        Self {
            out,
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(String::new()),
        }
    }
}

impl Llm for MockLlm {
    fn generate(&self, _model: &str, prompt: &str) -> Result<String, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = prompt.to_string();
        self.out.clone()
    }
}

fn item(doc: &str, page: u32, seq: u32, text: &str, score: f32) -> EvidenceItem {
    EvidenceItem {
        chunk: Chunk::new(doc, PageRange::single(page), seq, text),
        score,
        query: "q".to_string(),
    }
}

#[test]
fn empty_evidence_is_answered_without_the_model() {
    let llm = Arc::new(MockLlm::new(Ok("never".to_string())));
    let synth = AnswerSynthesizer::new(llm.clone(), "mock", ContextBudget::default());

    let out = synth.synthesize("anything?", &[], &[]);

    assert_eq!(out, Synthesis::insufficient());
    assert_eq!(out.answer_text, INSUFFICIENT_INFORMATION_ANSWER);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn citations_are_referenced_markers_present_in_evidence() {
    let a = item("a.pdf", 1, 0, "alpha facts", 0.9);
    let b = item("b.pdf", 4, 7, "beta facts", 0.8);
    let answer = format!(
        "Beta first {} then alpha {} and an invented one [[doc:zzz.pdf|p:1|c:99]]. Beta again {}.",
        b.citation().marker,
        a.citation().marker,
        b.citation().marker
    );
    let llm = Arc::new(MockLlm::new(Ok(answer.clone())));
    let synth = AnswerSynthesizer::new(llm, "mock", ContextBudget::default());

    let out = synth.synthesize("facts?", &[a.clone(), b.clone()], &[]);

    assert_eq!(out.answer_text, answer);
    assert_eq!(out.citations, vec![b.citation(), a.citation()]);
    assert!(!out.synthesis_failed);
    assert_eq!(out.error, None);
}

#[test]
fn uncited_answer_is_kept_but_flagged() {
    let a = item("a.pdf", 1, 0, "alpha facts", 0.9);
    for reply in ["Alpha is true.", "Alpha is true [[doc:zzz.pdf|p:1|c:99]]."] {
        let llm = Arc::new(MockLlm::new(Ok(reply.to_string())));
        let synth = AnswerSynthesizer::new(llm, "mock", ContextBudget::default());

        let out = synth.synthesize("facts?", &[a.clone()], &[]);

        assert_eq!(out.answer_text, reply);
        assert!(out.citations.is_empty());
        assert!(!out.synthesis_failed);
        assert_eq!(out.error.map(|e| e.code), Some("AI_CITATION_REQUIRED".to_string()));
    }
}

#[test]
fn answer_without_markers_has_no_citations() {
    let a = item("a.pdf", 1, 0, "alpha facts", 0.9);
    assert!(resolve_citations("plain prose", &[a]).is_empty());
}

#[test]
fn model_failure_degrades_to_citations_only() {
    let a = item("a.pdf", 1, 0, "alpha facts", 0.9);
    let b = item("b.pdf", 2, 3, "beta facts", 0.5);
    let llm = Arc::new(MockLlm::new(Err(AppError::new("AI_GENERATE_FAILED", "offline"))));
    let synth = AnswerSynthesizer::new(llm, "mock", ContextBudget::default());

    let out = synth.synthesize("facts?", &[a.clone(), b.clone()], &[]);

    assert!(out.synthesis_failed);
    assert_eq!(out.citations, vec![a.citation(), b.citation()]);
    assert!(out.answer_text.contains(&a.citation().marker));
    assert!(out.answer_text.contains(&b.citation().marker));
    assert!(!out.answer_text.contains("alpha facts"));
    assert_eq!(out.error.map(|e| e.code), Some("MODEL_SYNTHESIS_FAILED".to_string()));
}

#[test]
fn prompt_respects_context_budget_and_includes_history() {
    let long = "word ".repeat(400);
    let evidence: Vec<EvidenceItem> = (0..10)
        .map(|i| item("long.pdf", 1, i, &long, 1.0 - i as f32 * 0.05))
        .collect();
    let llm = Arc::new(MockLlm::new(Ok("ok".to_string())));
    let budget = ContextBudget {
        max_context_chars: 1000,
        snippet_chars: 300,
    };
    let synth = AnswerSynthesizer::new(llm.clone(), "mock", budget);
    let history = vec![ConversationTurn {
        question: "What was asked before?".to_string(),
        answer: "An earlier answer.".to_string(),
        timestamp: "2026-01-01T00:00:00Z".to_string(),
    }];

    synth.synthesize("question?", &evidence, &history);

    let prompt = llm.last_prompt.lock().unwrap().clone();
    assert!(prompt.contains("What was asked before?"));
    assert!(prompt.contains("[[doc:long.pdf|p:1|c:0]]"));
    assert!(prompt.contains("[[doc:long.pdf|p:1|c:1]]"));
    assert!(!prompt.contains("[[doc:long.pdf|p:1|c:5]]"));
}

#[test]
fn similar_document_names_resolve_to_the_cited_one() {
    let piped = item("a|b.pdf", 1, 0, "piped name", 0.9);
    let plain = item("a_b.pdf", 1, 0, "plain name", 0.8);
    let answer = format!("From the second file {}.", plain.citation().marker);

    let cited = resolve_citations(&answer, &[piped.clone(), plain.clone()]);

    assert_ne!(piped.citation().marker, plain.citation().marker);
    assert_eq!(cited, vec![plain.citation()]);
}
