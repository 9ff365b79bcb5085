use std::fmt;

use dqa_core::error::AppError;
use serde::{Deserialize, Serialize};

use crate::evidence::EvidenceSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Sufficient,
    MaxRoundsReached,
    NoNewEvidence,
    Cancelled,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sufficient => "sufficient",
            Self::MaxRoundsReached => "max_rounds_reached",
            Self::NoNewEvidence => "no_new_evidence",
            Self::Cancelled => "cancelled",
        }
    }

    /// User-facing explanation of why retrieval stopped.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Sufficient => "The retrieved evidence was judged sufficient to answer.",
            Self::MaxRoundsReached => {
                "Stopped after the maximum number of retrieval rounds; the answer may be incomplete."
            }
            Self::NoNewEvidence => {
                "No new evidence was found; the answer uses what was retrieved so far."
            }
            Self::Cancelled => "The request was cancelled; only the sources found so far are listed.",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Retrieving,
    Evaluating,
    Synthesizing,
    Done,
}

/// Request-scoped loop state. Never shared, never persisted.
#[derive(Debug, Clone)]
pub struct IterationState {
    pub original_question: String,
    /// Starts with the question itself.
    pub queries_issued: Vec<String>,
    pub evidence: EvidenceSet,
    /// 1-based; never exceeds `max_rounds`.
    pub round_number: u32,
    pub max_rounds: u32,
    pub terminated: bool,
    pub termination_reason: Option<TerminationReason>,
}

impl IterationState {
    pub fn new(question: &str, max_rounds: u32) -> Self {
        let question = question.trim().to_string();
        Self {
            queries_issued: vec![question.clone()],
            original_question: question,
            evidence: EvidenceSet::new(),
            round_number: 1,
            max_rounds: max_rounds.max(1),
            terminated: false,
            termination_reason: None,
        }
    }

    pub fn current_query(&self) -> &str {
        self.queries_issued
            .last()
            .map(String::as_str)
            .unwrap_or(self.original_question.as_str())
    }

    pub fn has_issued(&self, query: &str) -> bool {
        let wanted = normalize_query(query);
        self.queries_issued.iter().any(|q| normalize_query(q) == wanted)
    }

    pub fn is_last_round(&self) -> bool {
        self.round_number >= self.max_rounds
    }

    /// Record the next query and move to the next round.
    pub fn advance(&mut self, next_query: String) -> Result<(), AppError> {
        if self.terminated {
            return Err(AppError::new(
                "CONTROLLER_STATE_INVALID",
                "Cannot advance a terminated run",
            ));
        }
        if self.is_last_round() {
            return Err(AppError::new(
                "CONTROLLER_STATE_INVALID",
                "Round limit reached",
            )
            .with_details(format!("max_rounds={}", self.max_rounds)));
        }
        self.queries_issued.push(next_query.trim().to_string());
        self.round_number += 1;
        Ok(())
    }

    /// First reason wins.
    pub fn terminate(&mut self, reason: TerminationReason) {
        if !self.terminated {
            self.terminated = true;
            self.termination_reason = Some(reason);
        }
    }

    /// Cancellation overrides any earlier reason.
    pub fn cancel(&mut self) {
        self.terminated = true;
        self.termination_reason = Some(TerminationReason::Cancelled);
    }
}

/// Lowercase, single-spaced, without surrounding punctuation.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_spacing_and_punctuation() {
        assert_eq!(normalize_query("  Context   Window size? "), "context window size");
        assert_eq!(normalize_query("\"context window size\""), "context window size");
    }

    #[test]
    fn advance_stops_at_round_limit() {
        let mut st = IterationState::new("q", 2);
        assert!(st.advance("q2".to_string()).is_ok());
        assert_eq!(st.round_number, 2);
        assert!(st.advance("q3".to_string()).is_err());
        assert_eq!(st.round_number, 2);
        assert_eq!(st.queries_issued, vec!["q".to_string(), "q2".to_string()]);
    }

    #[test]
    fn first_reason_wins_but_cancel_overrides() {
        let mut st = IterationState::new("q", 3);
        st.terminate(TerminationReason::Sufficient);
        st.terminate(TerminationReason::NoNewEvidence);
        assert_eq!(st.termination_reason, Some(TerminationReason::Sufficient));
        st.cancel();
        assert_eq!(st.termination_reason, Some(TerminationReason::Cancelled));
    }
}
