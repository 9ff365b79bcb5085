//! The iterative retrieval loop.
//!
//! `INIT → RETRIEVING → EVALUATING → (RETRIEVING | SYNTHESIZING) → DONE`. Collaborator
//! failures are absorbed into warnings; a run always ends with an answer.

use std::sync::Arc;
use std::time::Duration;

use dqa_core::config::AppConfig;
use dqa_core::domain::ConversationTurn;
use dqa_core::error::AppError;
use serde::{Deserialize, Serialize};

use crate::deadline::{call_with_deadline, CallOutcome, CancelToken};
use crate::evidence::{Citation, EvidenceItem};
use crate::retrieve::Retriever;
use crate::synth::{AnswerSynthesizer, Synthesis};

pub mod decision;
pub mod state;

pub use decision::{Decider, Decision, DecisionContext, LlmDecider};
pub use state::{normalize_query, IterationState, Phase, TerminationReason};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    pub max_rounds: u32,
    pub top_k: usize,
    pub retrieval_timeout: Duration,
    pub decision_timeout: Duration,
    pub synthesis_timeout: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_rounds: config.controller.max_rounds,
            top_k: config.retrieval.top_k as usize,
            retrieval_timeout: config.retrieval.timeout(),
            decision_timeout: config.controller.decision_timeout(),
            synthesis_timeout: config.controller.synthesis_timeout(),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerOutcome {
    pub answer_text: String,
    pub citations: Vec<Citation>,
    pub termination_reason: TerminationReason,
    pub round_number: u32,
    pub queries_issued: Vec<String>,
    /// Final deduplicated evidence, ranked.
    pub evidence: Vec<EvidenceItem>,
    pub warnings: Vec<AppError>,
    pub synthesis_failed: bool,
}

pub struct IterativeController {
    retriever: Arc<dyn Retriever>,
    decider: Arc<dyn Decider>,
    synthesizer: Arc<AnswerSynthesizer>,
    settings: ControllerSettings,
}

impl IterativeController {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        decider: Arc<dyn Decider>,
        synthesizer: Arc<AnswerSynthesizer>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            retriever,
            decider,
            synthesizer,
            settings,
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn run(
        &self,
        question: &str,
        history: &[ConversationTurn],
        cancel: &CancelToken,
    ) -> ControllerOutcome {
        let mut state = IterationState::new(question, self.settings.max_rounds);
        let mut warnings: Vec<AppError> = Vec::new();
        let mut synthesis: Option<Synthesis> = None;
        let mut phase = Phase::Init;

        loop {
            if phase != Phase::Done && cancel.is_cancelled() {
                state.cancel();
                phase = Phase::Done;
            }
            phase = match phase {
                Phase::Init => {
                    tracing::info!(max_rounds = state.max_rounds, "question received");
                    Phase::Retrieving
                }
                Phase::Retrieving => self.retrieve_step(&mut state, &mut warnings, cancel),
                Phase::Evaluating => self.evaluate_step(&mut state, history, &mut warnings, cancel),
                Phase::Synthesizing => {
                    synthesis = Some(self.synthesize_step(&mut state, history, &mut warnings, cancel));
                    Phase::Done
                }
                Phase::Done => break,
            };
        }

        let evidence = state.evidence.ranked();
        let reason = state
            .termination_reason
            .unwrap_or(TerminationReason::Sufficient);
        let synthesis = match (reason, synthesis) {
            (TerminationReason::Cancelled, _) | (_, None) => Synthesis::citations_only(&evidence),
            (_, Some(s)) => s,
        };

        tracing::info!(
            reason = %reason,
            rounds = state.round_number,
            evidence = evidence.len(),
            citations = synthesis.citations.len(),
            warnings = warnings.len(),
            synthesis_failed = synthesis.synthesis_failed,
            "question answered"
        );

        ControllerOutcome {
            answer_text: synthesis.answer_text,
            citations: synthesis.citations,
            termination_reason: reason,
            round_number: state.round_number,
            queries_issued: state.queries_issued,
            evidence,
            warnings,
            synthesis_failed: synthesis.synthesis_failed,
        }
    }

    fn retrieve_step(
        &self,
        state: &mut IterationState,
        warnings: &mut Vec<AppError>,
        cancel: &CancelToken,
    ) -> Phase {
        let round = state.round_number;
        let query = state.current_query().to_string();
        let retriever = Arc::clone(&self.retriever);
        let k = self.settings.top_k;
        let q = query.clone();

        let items = match call_with_deadline("retrieve", self.settings.retrieval_timeout, cancel, move || {
            retriever.retrieve(&q, k)
        }) {
            CallOutcome::Completed(Ok(items)) => items,
            CallOutcome::Completed(Err(e)) => {
                absorb(
                    warnings,
                    AppError::new("RETRIEVAL_FAILED", "Retrieval failed; round continued without evidence")
                        .with_details(format!("round={round}; query={query}; err={e}"))
                        .with_retryable(e.retryable),
                );
                Vec::new()
            }
            CallOutcome::TimedOut => {
                absorb(
                    warnings,
                    AppError::new("RETRIEVAL_TIMEOUT", "Retrieval timed out; round continued without evidence")
                        .with_details(format!(
                            "round={round}; query={query}; timeout_ms={}",
                            self.settings.retrieval_timeout.as_millis()
                        ))
                        .with_retryable(true),
                );
                Vec::new()
            }
            CallOutcome::WorkerLost(msg) => {
                absorb(
                    warnings,
                    AppError::new("RETRIEVAL_FAILED", "Retrieval worker failed")
                        .with_details(format!("round={round}; err={msg}")),
                );
                Vec::new()
            }
            CallOutcome::Cancelled => {
                state.cancel();
                return Phase::Done;
            }
        };

        let retrieved = items.len();
        let merged = state.evidence.merge(items);
        tracing::debug!(
            round,
            query = %query,
            retrieved,
            added = merged.added,
            improved = merged.improved,
            total = state.evidence.len(),
            "retrieval round"
        );
        if merged.added == 0 {
            state.terminate(TerminationReason::NoNewEvidence);
            return Phase::Synthesizing;
        }
        Phase::Evaluating
    }

    fn evaluate_step(
        &self,
        state: &mut IterationState,
        history: &[ConversationTurn],
        warnings: &mut Vec<AppError>,
        cancel: &CancelToken,
    ) -> Phase {
        let round = state.round_number;
        let ctx = DecisionContext {
            question: state.original_question.clone(),
            evidence: state.evidence.ranked(),
            round_number: round,
            max_rounds: state.max_rounds,
            queries_issued: state.queries_issued.clone(),
            history: history.to_vec(),
        };
        let decider = Arc::clone(&self.decider);

        let decision = match call_with_deadline("decide", self.settings.decision_timeout, cancel, move || {
            decider.decide(&ctx).and_then(Decision::validate)
        }) {
            CallOutcome::Completed(Ok(d)) => d,
            CallOutcome::Completed(Err(e)) => {
                let e = if e.has_code("MODEL_DECISION_FAILED") {
                    e
                } else {
                    AppError::new("MODEL_DECISION_FAILED", "Decision step failed")
                        .with_details(e.to_string())
                        .with_retryable(e.retryable)
                };
                absorb(warnings, e);
                Decision::stop("decision unavailable")
            }
            CallOutcome::TimedOut => {
                absorb(
                    warnings,
                    AppError::new("MODEL_DECISION_TIMEOUT", "Decision step timed out; answering from current evidence")
                        .with_details(format!(
                            "round={round}; timeout_ms={}",
                            self.settings.decision_timeout.as_millis()
                        ))
                        .with_retryable(true),
                );
                Decision::stop("decision timed out")
            }
            CallOutcome::WorkerLost(msg) => {
                absorb(
                    warnings,
                    AppError::new("MODEL_DECISION_FAILED", "Decision worker failed")
                        .with_details(format!("round={round}; err={msg}")),
                );
                Decision::stop("decision unavailable")
            }
            CallOutcome::Cancelled => {
                state.cancel();
                return Phase::Done;
            }
        };

        tracing::debug!(
            round,
            continue_retrieval = decision.continue_retrieval,
            next_query = decision.next_query.as_deref().unwrap_or(""),
            rationale = %decision.rationale,
            "sufficiency decision"
        );

        if !decision.continue_retrieval {
            state.terminate(TerminationReason::Sufficient);
            return Phase::Synthesizing;
        }
        if state.is_last_round() {
            state.terminate(TerminationReason::MaxRoundsReached);
            return Phase::Synthesizing;
        }
        let next_query = decision.next_query.unwrap_or_default();
        if state.has_issued(&next_query) {
            tracing::debug!(round, next_query = %next_query, "refined query repeats an issued query");
            state.terminate(TerminationReason::NoNewEvidence);
            return Phase::Synthesizing;
        }
        match state.advance(next_query) {
            Ok(()) => Phase::Retrieving,
            Err(e) => {
                tracing::warn!(error = %e, "could not advance round");
                state.terminate(TerminationReason::MaxRoundsReached);
                Phase::Synthesizing
            }
        }
    }

    fn synthesize_step(
        &self,
        state: &mut IterationState,
        history: &[ConversationTurn],
        warnings: &mut Vec<AppError>,
        cancel: &CancelToken,
    ) -> Synthesis {
        let evidence = state.evidence.ranked();
        if evidence.is_empty() {
            return Synthesis::insufficient();
        }

        let synthesizer = Arc::clone(&self.synthesizer);
        let question = state.original_question.clone();
        let history = history.to_vec();
        let items = evidence.clone();

        match call_with_deadline("synthesize", self.settings.synthesis_timeout, cancel, move || {
            synthesizer.synthesize(&question, &items, &history)
        }) {
            CallOutcome::Completed(s) => {
                if let Some(e) = s.error.as_ref() {
                    warnings.push(e.clone());
                }
                s
            }
            CallOutcome::TimedOut => {
                let e = AppError::new("MODEL_SYNTHESIS_FAILED", "Answer synthesis timed out")
                    .with_details(format!(
                        "timeout_ms={}",
                        self.settings.synthesis_timeout.as_millis()
                    ))
                    .with_retryable(true);
                absorb(warnings, e.clone());
                Synthesis::degraded(&evidence, e)
            }
            CallOutcome::WorkerLost(msg) => {
                let e = AppError::new("MODEL_SYNTHESIS_FAILED", "Answer synthesis worker failed")
                    .with_details(msg);
                absorb(warnings, e.clone());
                Synthesis::degraded(&evidence, e)
            }
            CallOutcome::Cancelled => {
                state.cancel();
                Synthesis::citations_only(&evidence)
            }
        }
    }
}

fn absorb(warnings: &mut Vec<AppError>, e: AppError) {
    tracing::warn!(code = %e.code, error = %e, "absorbed failure");
    warnings.push(e);
}
