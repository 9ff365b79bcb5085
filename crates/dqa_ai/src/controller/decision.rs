use std::sync::Arc;

use dqa_core::domain::ConversationTurn;
use dqa_core::error::AppError;
use serde::{Deserialize, Serialize};

use crate::evidence::EvidenceItem;
use crate::llm::Llm;
use crate::prompts::{self, ContextBudget};

/// Sufficiency verdict for the evidence gathered so far.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Decision {
    #[serde(rename = "continue")]
    pub continue_retrieval: bool,
    #[serde(default)]
    pub next_query: Option<String>,
    #[serde(default)]
    pub rationale: String,
}

impl Decision {
    pub fn stop(rationale: impl Into<String>) -> Self {
        Self {
            continue_retrieval: false,
            next_query: None,
            rationale: rationale.into(),
        }
    }

    pub fn more(next_query: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            continue_retrieval: true,
            next_query: Some(next_query.into()),
            rationale: rationale.into(),
        }
    }

    /// `continue` must come with a non-empty `next_query`.
    pub fn validate(self) -> Result<Self, AppError> {
        if self.continue_retrieval
            && self
                .next_query
                .as_deref()
                .map(|q| q.trim().is_empty())
                .unwrap_or(true)
        {
            return Err(AppError::new(
                "MODEL_DECISION_FAILED",
                "Decision asked to continue without a next query",
            )
            .with_details(format!("rationale={}", self.rationale)));
        }
        Ok(self)
    }
}

/// Everything the decider sees. Owned so it can cross into a worker thread.
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub question: String,
    /// Ranked, deduplicated.
    pub evidence: Vec<EvidenceItem>,
    pub round_number: u32,
    pub max_rounds: u32,
    pub queries_issued: Vec<String>,
    pub history: Vec<ConversationTurn>,
}

pub trait Decider: Send + Sync {
    fn decide(&self, ctx: &DecisionContext) -> Result<Decision, AppError>;
}

pub struct LlmDecider {
    llm: Arc<dyn Llm>,
    model: String,
    budget: ContextBudget,
}

impl LlmDecider {
    pub fn new(llm: Arc<dyn Llm>, model: impl Into<String>, budget: ContextBudget) -> Self {
        Self {
            llm,
            model: model.into(),
            budget,
        }
    }
}

impl Decider for LlmDecider {
    fn decide(&self, ctx: &DecisionContext) -> Result<Decision, AppError> {
        let prompt = prompts::decision_prompt(
            &ctx.question,
            ctx.round_number,
            ctx.max_rounds,
            &ctx.queries_issued,
            &prompts::history_block(&ctx.history),
            &prompts::evidence_blocks(&ctx.evidence, self.budget),
        );
        let raw = self
            .llm
            .generate_structured(&self.model, &prompt, &decision_schema())
            .map_err(|e| {
                AppError::new("MODEL_DECISION_FAILED", "Decision model call failed")
                    .with_details(e.to_string())
                    .with_retryable(e.retryable)
            })?;
        parse_decision(&raw)
    }
}

pub fn decision_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "continue": { "type": "boolean" },
            "next_query": { "type": ["string", "null"] },
            "rationale": { "type": "string" }
        },
        "required": ["continue", "rationale"]
    })
}

/// Accepts bare JSON or JSON wrapped in prose or Markdown fences.
pub fn parse_decision(raw: &str) -> Result<Decision, AppError> {
    let (start, end) = match (raw.find('{'), raw.rfind('}')) {
        (Some(s), Some(e)) if s < e => (s, e),
        _ => {
            return Err(AppError::new(
                "MODEL_DECISION_FAILED",
                "Decision output contained no JSON object",
            )
            .with_details(prompts::truncate_chars(raw.trim(), 200)))
        }
    };
    let decision: Decision = serde_json::from_str(&raw[start..=end]).map_err(|e| {
        AppError::new("MODEL_DECISION_FAILED", "Failed to decode decision output")
            .with_details(format!("err={}; raw={}", e, prompts::truncate_chars(raw.trim(), 200)))
    })?;
    let decision = Decision {
        next_query: decision
            .next_query
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty()),
        ..decision
    };
    decision.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_fenced_json() {
        let raw = "```json\n{\"continue\": true, \"next_query\": \" context window size \", \"rationale\": \"need more\"}\n```";
        assert_eq!(
            parse_decision(raw).unwrap(),
            Decision::more("context window size", "need more")
        );
    }

    #[test]
    fn continue_without_query_is_a_failure() {
        let err = parse_decision(r#"{"continue": true, "next_query": "", "rationale": "x"}"#).unwrap_err();
        assert_eq!(err.code, "MODEL_DECISION_FAILED");
        let err = parse_decision(r#"{"continue": true}"#).unwrap_err();
        assert_eq!(err.code, "MODEL_DECISION_FAILED");
    }

    #[test]
    fn rejects_prose() {
        assert!(parse_decision("I think we are done.").is_err());
        assert!(parse_decision("{not json}").is_err());
    }

    #[test]
    fn stop_needs_no_query() {
        assert_eq!(
            parse_decision(r#"{"continue": false}"#).unwrap(),
            Decision::stop("")
        );
    }
}
