//! Session boundary: index building and question answering.

use std::path::PathBuf;
use std::sync::Arc;

use dqa_core::config::AppConfig;
use dqa_core::domain::ConversationTurn;
use dqa_core::error::AppError;
use dqa_core::filter::{ChunkFilter, FilterReport};
use dqa_core::ingest::{IngestReport, Ingestor};
use dqa_core::memory::ConversationMemory;
use serde::{Deserialize, Serialize};

use crate::controller::{
    ControllerSettings, Decider, IterativeController, LlmDecider, TerminationReason,
};
use crate::deadline::CancelToken;
use crate::embeddings::Embedder;
use crate::evidence::Citation;
use crate::index::{index_unavailable, IndexStatus, LocalVectorIndex, VectorIndex};
use crate::llm::Llm;
use crate::prompts::ContextBudget;
use crate::retrieve::{IndexRetriever, Retriever};
use crate::synth::AnswerSynthesizer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Drop the existing index before ingesting.
    pub reset: bool,
    /// Leave a non-empty ready index untouched.
    pub skip_if_exists: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildReport {
    pub skipped: bool,
    pub ingest: IngestReport,
    pub filter: FilterReport,
    pub status: IndexStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QaResponse {
    pub session_id: String,
    pub answer_text: String,
    pub citations: Vec<Citation>,
    pub termination_reason: TerminationReason,
    pub termination_message: String,
    pub round_number: u32,
    pub queries_issued: Vec<String>,
    pub evidence_count: u32,
    pub warnings: Vec<AppError>,
    pub synthesis_failed: bool,
}

/// Collaborators the controller runs with; tests substitute scripted ones.
pub struct QaComponents {
    pub retriever: Arc<dyn Retriever>,
    pub decider: Arc<dyn Decider>,
    pub synthesizer: Arc<AnswerSynthesizer>,
}

pub struct QaService {
    config: AppConfig,
    index: Arc<LocalVectorIndex>,
    memory: Arc<dyn ConversationMemory>,
    controller: IterativeController,
}

impl QaService {
    /// Wire the index under `storage.data_dir` to the given model backends.
    pub fn new(
        config: AppConfig,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn Llm>,
        memory: Arc<dyn ConversationMemory>,
    ) -> Result<Self, AppError> {
        let index = Arc::new(LocalVectorIndex::open(
            config.storage.index_dir(),
            Arc::clone(&embedder),
            config.embeddings.model.clone(),
        )?);
        let budget = ContextBudget::from(&config.controller);
        let components = QaComponents {
            retriever: Arc::new(
                IndexRetriever::new(index.clone(), embedder, config.embeddings.model.clone())
                    .with_synonyms(config.retrieval.synonyms.clone()),
            ),
            decider: Arc::new(LlmDecider::new(Arc::clone(&llm), config.llm.model.clone(), budget)),
            synthesizer: Arc::new(AnswerSynthesizer::new(llm, config.llm.model.clone(), budget)),
        };
        Ok(Self::with_components(config, index, memory, components))
    }

    pub fn with_components(
        config: AppConfig,
        index: Arc<LocalVectorIndex>,
        memory: Arc<dyn ConversationMemory>,
        components: QaComponents,
    ) -> Self {
        let controller = IterativeController::new(
            components.retriever,
            components.decider,
            components.synthesizer,
            ControllerSettings::from_config(&config),
        );
        Self {
            config,
            index,
            memory,
            controller,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<LocalVectorIndex> {
        &self.index
    }

    pub fn status(&self) -> Result<IndexStatus, AppError> {
        self.index.status()
    }

    pub fn build_index(&self, paths: &[PathBuf], options: BuildOptions) -> Result<BuildReport, AppError> {
        let ingestor = Ingestor::new(self.config.ingest.clone());
        self.build_index_with(&ingestor, paths, options)
    }

    /// Ingest `paths`, drop noise, embed and publish. Without `reset`, documents seen in
    /// this batch replace their earlier chunks and other documents stay indexed. With
    /// `reset`, the new snapshot holds only this batch; the published index stays in
    /// place until it is swapped, and is kept when nothing could be loaded.
    pub fn build_index_with(
        &self,
        ingestor: &Ingestor,
        paths: &[PathBuf],
        options: BuildOptions,
    ) -> Result<BuildReport, AppError> {
        if !options.reset && options.skip_if_exists && self.index.is_ready() && !self.index.is_empty() {
            tracing::info!(chunks = self.index.len(), "index already built; skipping ingestion");
            return Ok(BuildReport {
                skipped: true,
                ingest: IngestReport::default(),
                filter: FilterReport::default(),
                status: self.index.status()?,
            });
        }

        let output = ingestor.ingest(paths);
        if output.report.documents_loaded == 0 {
            return Err(AppError::new(
                "INGEST_NO_DOCUMENTS",
                "No document could be loaded from the given paths",
            )
            .with_details(format!(
                "paths={}; failures={}; skipped={}",
                paths.len(),
                output.report.failures.len(),
                output.report.skipped_paths.len()
            )));
        }

        let (chunks, filter) = ChunkFilter::new(self.config.filter.clone()).filter(output.chunks);
        tracing::info!(
            documents = output.report.documents_loaded,
            chunks = output.report.chunks_total,
            kept = filter.kept,
            dropped = filter.dropped.len(),
            "documents ingested"
        );

        let status = if options.reset || !self.index.is_ready() {
            self.index.rebuild(chunks)?
        } else {
            self.index.upsert(chunks)?
        };
        Ok(BuildReport {
            skipped: false,
            ingest: output.report,
            filter,
            status,
        })
    }

    /// Answer `question` within `session_id`. Fails only before retrieval starts.
    pub fn ask(
        &self,
        session_id: &str,
        question: &str,
        cancel: &CancelToken,
    ) -> Result<QaResponse, AppError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::new("QA_QUESTION_EMPTY", "Question must not be empty"));
        }
        if session_id.trim().is_empty() {
            return Err(AppError::new("QA_SESSION_INVALID", "Session id must not be empty"));
        }
        if !self.index.is_ready() {
            return Err(index_unavailable());
        }

        let mut warnings: Vec<AppError> = Vec::new();
        let history = match self.memory.history(session_id, self.config.memory.max_turns) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "conversation history unavailable");
                warnings.push(e);
                Vec::new()
            }
        };

        let outcome = self.controller.run(question, &history, cancel);
        warnings.extend(outcome.warnings);

        if outcome.termination_reason != TerminationReason::Cancelled {
            let recorded = ConversationTurn::now(question, outcome.answer_text.clone())
                .and_then(|turn| self.memory.append(session_id, turn));
            if let Err(e) = recorded {
                tracing::warn!(session_id, error = %e, "failed to record conversation turn");
                warnings.push(e);
            }
        }

        Ok(QaResponse {
            session_id: session_id.to_string(),
            answer_text: outcome.answer_text,
            citations: outcome.citations,
            termination_reason: outcome.termination_reason,
            termination_message: outcome.termination_reason.describe().to_string(),
            round_number: outcome.round_number,
            queries_issued: outcome.queries_issued,
            evidence_count: outcome.evidence.len() as u32,
            warnings,
            synthesis_failed: outcome.synthesis_failed,
        })
    }

    pub fn history(&self, session_id: &str) -> Result<Vec<ConversationTurn>, AppError> {
        self.memory.history(session_id, self.config.memory.max_turns)
    }

    pub fn forget_session(&self, session_id: &str) -> Result<u32, AppError> {
        self.memory.evict(session_id)
    }
}
