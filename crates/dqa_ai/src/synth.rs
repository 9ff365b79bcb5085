//! Final answer from the evidence set, with inline citation markers.

use std::sync::Arc;

use dqa_core::domain::ConversationTurn;
use dqa_core::error::AppError;
use serde::{Deserialize, Serialize};

use crate::evidence::{Citation, EvidenceItem};
use crate::guardrails::{enforce_citations, extract_citation_markers};
use crate::llm::Llm;
use crate::prompts::{self, ContextBudget};

pub const INSUFFICIENT_INFORMATION_ANSWER: &str =
    "I could not find enough information in the indexed documents to answer this question.";

const DEGRADED_HEADER: &str = "No synthesized answer is available. Relevant sources:";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Synthesis {
    pub answer_text: String,
    pub citations: Vec<Citation>,
    pub synthesis_failed: bool,
    /// Synthesis failure, or an answer that cites none of the evidence.
    pub error: Option<AppError>,
}

impl Synthesis {
    pub fn insufficient() -> Self {
        Self {
            answer_text: INSUFFICIENT_INFORMATION_ANSWER.to_string(),
            citations: Vec::new(),
            synthesis_failed: false,
            error: None,
        }
    }

    /// Every evidence citation, no prose.
    pub fn citations_only(evidence: &[EvidenceItem]) -> Self {
        if evidence.is_empty() {
            return Self::insufficient();
        }
        let citations: Vec<Citation> = evidence.iter().map(EvidenceItem::citation).collect();
        let mut answer_text = DEGRADED_HEADER.to_string();
        for c in citations.iter() {
            answer_text.push_str(&format!("\n- {}", c.marker));
        }
        Self {
            answer_text,
            citations,
            synthesis_failed: false,
            error: None,
        }
    }

    pub fn degraded(evidence: &[EvidenceItem], error: AppError) -> Self {
        Self {
            synthesis_failed: true,
            error: Some(error),
            ..Self::citations_only(evidence)
        }
    }
}

pub struct AnswerSynthesizer {
    llm: Arc<dyn Llm>,
    model: String,
    budget: ContextBudget,
}

impl AnswerSynthesizer {
    pub fn new(llm: Arc<dyn Llm>, model: impl Into<String>, budget: ContextBudget) -> Self {
        Self {
            llm,
            model: model.into(),
            budget,
        }
    }

    /// Never fails: a model error yields the degraded, citations-only answer.
    pub fn synthesize(
        &self,
        question: &str,
        evidence: &[EvidenceItem],
        history: &[ConversationTurn],
    ) -> Synthesis {
        if evidence.is_empty() {
            return Synthesis::insufficient();
        }

        let prompt = prompts::answer_prompt(
            question,
            &prompts::history_block(history),
            &prompts::evidence_blocks(evidence, self.budget),
        );
        let answer_text = match self.llm.generate(&self.model, &prompt) {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "answer synthesis failed; returning citations only");
                return Synthesis::degraded(
                    evidence,
                    AppError::new("MODEL_SYNTHESIS_FAILED", "Answer synthesis failed")
                        .with_details(e.to_string())
                        .with_retryable(e.retryable),
                );
            }
        };

        let citations = resolve_citations(&answer_text, evidence);
        let error = match enforce_citations(&answer_text) {
            Err(e) => Some(e),
            Ok(()) if citations.is_empty() => Some(
                AppError::new("AI_CITATION_REQUIRED", "Answer cites no retrieved evidence")
                    .with_details(format!("evidence={}", evidence.len())),
            ),
            Ok(()) => None,
        };
        if let Some(e) = error.as_ref() {
            tracing::warn!(error = %e, "answer is not grounded in citations");
        }
        Synthesis {
            citations,
            answer_text,
            synthesis_failed: false,
            error,
        }
    }
}

/// Markers referenced in `answer` that belong to `evidence`, in order of first reference.
pub fn resolve_citations(answer: &str, evidence: &[EvidenceItem]) -> Vec<Citation> {
    let available: Vec<Citation> = evidence.iter().map(EvidenceItem::citation).collect();
    let mut out = Vec::new();
    for marker in extract_citation_markers(answer) {
        match available.iter().find(|c| c.marker == marker) {
            Some(c) => out.push(c.clone()),
            None => tracing::debug!(marker = %marker, "answer cited a marker outside the evidence set"),
        }
    }
    out
}
