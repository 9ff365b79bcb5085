use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use dqa_ai::deadline::CancelToken;
use dqa_ai::embeddings::{Embedder, OllamaEmbedder};
use dqa_ai::index::IndexStatus;
use dqa_ai::llm::{GenerationOptions, Llm, OllamaLlm, OpenAiCompatLlm};
use dqa_ai::ollama::OllamaClient;
use dqa_ai::service::{BuildOptions, BuildReport, QaResponse, QaService};
use dqa_core::config::{AppConfig, LlmProvider};
use dqa_core::error::AppError;
use dqa_core::memory::SqliteConversationMemory;

pub mod cli;
pub mod logging;

use cli::{Cli, Commands};

#[derive(Debug, serde::Serialize)]
pub struct AiHealthStatus {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, serde::Serialize)]
pub struct StatusReport {
    pub data_dir: String,
    pub index: IndexStatus,
    pub embeddings: AiHealthStatus,
    pub llm: AiHealthStatus,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing(cli.global.log_json);

    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = %e.code, details = ?e.details, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: Cli) -> Result<(), AppError> {
    let overrides = cli.global.overrides();
    let config = AppConfig::load(&cli.global.root, Some(&overrides))?;
    let stdout = std::io::stdout();

    match cli.command {
        Commands::Ingest {
            paths,
            reset,
            skip_if_exists,
        } => {
            tracing::info!(paths = %display_paths(&paths), reset, skip_if_exists, "ingest requested");
            let service = build_service(config)?;
            let report = service.build_index(
                &paths,
                BuildOptions {
                    reset,
                    skip_if_exists,
                },
            )?;
            write_out(&mut stdout.lock(), &render_build_report(&report))
        }
        Commands::Ask {
            question,
            session,
            json,
        } => {
            let service = build_service(config)?;
            let resp = service.ask(&session, &question, &CancelToken::new())?;
            let out = if json {
                to_pretty_json(&resp)?
            } else {
                render_response(&resp)
            };
            write_out(&mut stdout.lock(), &out)
        }
        Commands::Chat { session } => {
            let service = build_service(config)?;
            let stdin = std::io::stdin();
            chat_loop(&service, &session, stdin.lock(), stdout.lock())
        }
        Commands::Status { json } => {
            let report = status_report(&config)?;
            let out = if json {
                to_pretty_json(&report)?
            } else {
                render_status(&report)
            };
            write_out(&mut stdout.lock(), &out)
        }
    }
}

pub fn build_service(config: AppConfig) -> Result<QaService, AppError> {
    std::fs::create_dir_all(&config.storage.data_dir).map_err(|e| {
        AppError::new("CLI_DATA_DIR_FAILED", "Failed to create data directory")
            .with_details(format!("path={}; err={}", config.storage.data_dir.display(), e))
    })?;

    let embedder = build_embedder(&config)?;
    let embed_timeout_ms = embedder.timeout().as_millis() as u64;
    let embedder: Arc<dyn Embedder> = Arc::new(embedder);
    let llm = build_llm(&config)?;
    let memory = Arc::new(SqliteConversationMemory::open(&config.storage.memory_db_path())?);

    tracing::info!(
        provider = ?config.llm.provider,
        llm_model = %config.llm.model,
        embed_model = %config.embeddings.model,
        embed_timeout_ms,
        data_dir = %config.storage.data_dir.display(),
        "service ready"
    );
    QaService::new(config, embedder, llm, memory)
}

/// Query embedding runs inside the retrieval deadline, so the HTTP call gets the same bound.
fn build_embedder(config: &AppConfig) -> Result<OllamaEmbedder, AppError> {
    Ok(OllamaEmbedder::new(OllamaClient::new(&config.embeddings.base_url)?)
        .with_timeout(config.retrieval.timeout()))
}

fn build_llm(config: &AppConfig) -> Result<Arc<dyn Llm>, AppError> {
    // The per-request HTTP timeout never outlives the synthesis deadline.
    let options = GenerationOptions {
        temperature: config.llm.temperature,
        max_tokens: config.llm.max_tokens,
        timeout: config.controller.synthesis_timeout(),
    };
    Ok(match config.llm.provider {
        LlmProvider::Ollama => {
            Arc::new(OllamaLlm::new(OllamaClient::new(&config.llm.base_url)?).with_options(options))
        }
        LlmProvider::OpenAi => Arc::new(
            OpenAiCompatLlm::from_env(&config.llm.base_url, &config.llm.api_key_env)?
                .with_options(options),
        ),
    })
}

pub fn status_report(config: &AppConfig) -> Result<StatusReport, AppError> {
    let store = dqa_ai::index::IndexStore::open(config.storage.index_dir());
    let index = match store.read_status() {
        Ok(status) => status,
        Err(e) if e.has_code("INDEX_CORRUPT") => IndexStatus::not_ready(),
        Err(e) => return Err(e),
    };

    let embeddings = ollama_health(&config.embeddings.base_url);
    let llm = match config.llm.provider {
        LlmProvider::Ollama => ollama_health(&config.llm.base_url),
        LlmProvider::OpenAi => AiHealthStatus {
            ok: std::env::var(&config.llm.api_key_env).is_ok(),
            message: format!(
                "OpenAI-compatible endpoint {} (key from {})",
                config.llm.base_url, config.llm.api_key_env
            ),
        },
    };

    Ok(StatusReport {
        data_dir: config.storage.data_dir.display().to_string(),
        index,
        embeddings,
        llm,
    })
}

fn ollama_health(base_url: &str) -> AiHealthStatus {
    match OllamaClient::new(base_url).and_then(|c| c.health_check()) {
        Ok(()) => AiHealthStatus {
            ok: true,
            message: format!("Ollama reachable at {base_url}"),
        },
        Err(e) => AiHealthStatus {
            ok: false,
            message: e.to_string(),
        },
    }
}

/// Read questions line by line until EOF or `:quit`.
///
/// `:history` prints the session so far and `:forget` clears it.
pub fn chat_loop<R: BufRead, W: Write>(
    service: &QaService,
    session: &str,
    input: R,
    mut output: W,
) -> Result<(), AppError> {
    write_out(
        &mut output,
        &format!("session '{session}'. Type :quit to exit, :history, :forget.\n"),
    )?;
    for line in input.lines() {
        let line = line.map_err(|e| {
            AppError::new("CLI_IO_FAILED", "Failed to read input").with_details(e.to_string())
        })?;
        let question = line.trim();
        match question {
            "" => continue,
            ":quit" | ":exit" => break,
            ":history" => {
                let turns = service.history(session)?;
                if turns.is_empty() {
                    write_out(&mut output, "(no turns yet)\n")?;
                }
                for (i, t) in turns.iter().enumerate() {
                    write_out(
                        &mut output,
                        &format!("{}. Q: {}\n   A: {}\n", i + 1, t.question, t.answer),
                    )?;
                }
            }
            ":forget" => {
                let removed = service.forget_session(session)?;
                write_out(&mut output, &format!("forgot {removed} turn(s)\n"))?;
            }
            _ => match service.ask(session, question, &CancelToken::new()) {
                Ok(resp) => write_out(&mut output, &render_response(&resp))?,
                // A failed question leaves the session usable.
                Err(e) => write_out(&mut output, &format!("error: {e}\n"))?,
            },
        }
    }
    Ok(())
}

pub fn render_response(resp: &QaResponse) -> String {
    let mut out = String::new();
    out.push_str(resp.answer_text.trim_end());
    out.push_str("\n\n");

    if !resp.citations.is_empty() {
        out.push_str("Sources:\n");
        for c in &resp.citations {
            out.push_str(&format!(
                "  {} (p. {}, chunk {})\n",
                c.source_document, c.page_range, c.sequence_index
            ));
        }
    }
    out.push_str(&format!(
        "[{} after {} round(s)] {}\n",
        resp.termination_reason, resp.round_number, resp.termination_message
    ));
    for w in &resp.warnings {
        out.push_str(&format!("warning: {w}\n"));
    }
    out
}

pub fn render_build_report(report: &BuildReport) -> String {
    if report.skipped {
        return format!(
            "index already built ({} chunks from {} documents); nothing to do\n",
            report.status.chunk_count, report.status.documents
        );
    }
    let mut out = format!(
        "loaded {} document(s): {} page(s) kept, {} dropped, {} chunk(s)\n",
        report.ingest.documents_loaded,
        report.ingest.pages_kept,
        report.ingest.pages_dropped,
        report.ingest.chunks_total
    );
    out.push_str(&format!(
        "filter kept {}, dropped {}\n",
        report.filter.kept,
        report.filter.dropped.len()
    ));
    out.push_str(&format!(
        "index v{}: {} chunk(s) from {} document(s)\n",
        report.status.version, report.status.chunk_count, report.status.documents
    ));
    for p in &report.ingest.skipped_paths {
        out.push_str(&format!("skipped: {p}\n"));
    }
    for f in &report.ingest.failures {
        out.push_str(&format!("failed: {} {}\n", f.path, f.error));
    }
    out
}

pub fn render_status(report: &StatusReport) -> String {
    let index = &report.index;
    let mut out = format!("data dir: {}\n", report.data_dir);
    if index.ready {
        out.push_str(&format!(
            "index: ready v{} ({} chunks, {} documents, model {}, dims {})\n",
            index.version,
            index.chunk_count,
            index.documents,
            index.model.as_deref().unwrap_or("?"),
            index.dims.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
        ));
    } else {
        out.push_str("index: not built (run `docqa ingest <paths>`)\n");
    }
    for (label, h) in [("embeddings", &report.embeddings), ("llm", &report.llm)] {
        let state = if h.ok { "ok" } else { "unavailable" };
        out.push_str(&format!("{label}: {state} - {}\n", h.message));
    }
    out
}

fn to_pretty_json<T: serde::Serialize>(value: &T) -> Result<String, AppError> {
    let mut s = serde_json::to_string_pretty(value).map_err(|e| {
        AppError::new("CLI_OUTPUT_FAILED", "Failed to serialize output").with_details(e.to_string())
    })?;
    s.push('\n');
    Ok(s)
}

fn write_out<W: Write>(w: &mut W, text: &str) -> Result<(), AppError> {
    w.write_all(text.as_bytes())
        .and_then(|_| w.flush())
        .map_err(|e| AppError::new("CLI_IO_FAILED", "Failed to write output").with_details(e.to_string()))
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use dqa_ai::controller::TerminationReason;
    use dqa_ai::evidence::Citation;
    use dqa_core::domain::{Chunk, PageRange};
    use dqa_core::memory::InMemoryConversationMemory;
    use pretty_assertions::assert_eq;

    struct FlatEmbedder;

    impl Embedder for FlatEmbedder {
        fn embed(&self, _model: &str, _input: &str) -> Result<Vec<f32>, AppError> {
            Ok(vec![1.0, 0.5])
        }
    }

    struct EchoLlm;

    impl Llm for EchoLlm {
        fn generate(&self, _model: &str, _prompt: &str) -> Result<String, AppError> {
            Ok("An answer.".to_string())
        }
    }

    fn response() -> QaResponse {
        let chunk = Chunk::new("docs/model.pdf", PageRange { start: 3, end: 4 }, 12, "text");
        QaResponse {
            session_id: "s1".to_string(),
            answer_text: "The window is 8192 tokens [[doc:docs/model.pdf|p:3-4|c:12]].".to_string(),
            citations: vec![Citation::for_chunk(&chunk)],
            termination_reason: TerminationReason::Sufficient,
            termination_message: TerminationReason::Sufficient.describe().to_string(),
            round_number: 2,
            queries_issued: vec!["q".to_string(), "context window size".to_string()],
            evidence_count: 3,
            warnings: vec![AppError::new("RETRIEVAL_TIMEOUT", "Retrieval timed out")],
            synthesis_failed: false,
        }
    }

    #[test]
    fn renders_answer_sources_and_reason() {
        let text = render_response(&response());

        assert!(text.starts_with("The window is 8192 tokens"));
        assert!(text.contains("Sources:\n  docs/model.pdf (p. 3-4, chunk 12)\n"));
        assert!(text.contains("[sufficient after 2 round(s)]"));
        assert!(text.contains("warning: [RETRIEVAL_TIMEOUT] Retrieval timed out"));
    }

    #[test]
    fn embedder_timeout_follows_retrieval_timeout() {
        let mut config = AppConfig::default();
        config.retrieval.timeout_ms = 2_500;

        let embedder = build_embedder(&config).expect("embedder");

        assert_eq!(embedder.timeout(), std::time::Duration::from_millis(2_500));
    }

    #[test]
    fn chat_keeps_going_after_errors_and_handles_commands() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig::default();
        config.storage.data_dir = dir.path().join("data");
        let service = QaService::new(
            config,
            Arc::new(FlatEmbedder),
            Arc::new(EchoLlm),
            Arc::new(InMemoryConversationMemory::new()),
        )
        .expect("service");

        let input = "What is it?\n\n:history\n:forget\n:quit\nnever asked\n";
        let mut out = Vec::new();
        chat_loop(&service, "s1", input.as_bytes(), &mut out).expect("chat");

        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("error: [INDEX_UNAVAILABLE]"));
        assert!(text.contains("(no turns yet)"));
        assert!(text.contains("forgot 0 turn(s)"));
        assert_eq!(text.matches("error:").count(), 1);
    }
}
