use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use dqa_core::config::ConfigOverrides;

#[derive(Parser, Debug)]
#[command(
    name = "docqa",
    version,
    about = "Ask questions about a local PDF corpus and get cited answers"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Project root holding `docqa.toml`.
    #[arg(long, global = true, env = "DOCQA_ROOT", default_value = ".")]
    pub root: PathBuf,

    /// Directory for the vector index and conversation memory.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Language model used for decisions and answers.
    #[arg(long, global = true)]
    pub model: Option<String>,

    #[arg(long, global = true)]
    pub max_rounds: Option<u32>,

    #[arg(long, global = true)]
    pub top_k: Option<u32>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl GlobalArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            data_dir: self.data_dir.clone(),
            llm_model: self.model.clone(),
            max_rounds: self.max_rounds,
            top_k: self.top_k,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load, clean, filter and index documents.
    Ingest {
        /// PDF/text files or directories to scan.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Drop the existing index first.
        #[arg(long)]
        reset: bool,
        /// Do nothing when a non-empty index already exists.
        #[arg(long, conflicts_with = "reset")]
        skip_if_exists: bool,
    },
    /// Answer a single question.
    Ask {
        question: String,
        #[arg(long, default_value = "default")]
        session: String,
        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Interactive session; earlier turns inform later answers.
    Chat {
        #[arg(long, default_value = "default")]
        session: String,
    },
    /// Show index state and model server reachability.
    Status {
        #[arg(long)]
        json: bool,
    },
}
