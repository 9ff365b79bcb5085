use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use dqa_core::config::{AppConfig, ConfigOverrides, LlmProvider};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

#[test]
fn defaults_are_valid() {
    let c = AppConfig::default();
    c.validate().unwrap();
    assert_eq!(c.controller.max_rounds, 3);
    assert_eq!(c.retrieval.top_k, 5);
    assert_eq!(c.filter.min_chunk_chars, 200);
    assert_eq!(c.llm.provider, LlmProvider::Ollama);
}

#[test]
fn partial_toml_keeps_defaults_for_missing_fields() {
    let c = AppConfig::from_toml(
        r#"
[controller]
max_rounds = 5

[retrieval.synonyms]
"garbled circuit" = ["Yao", "GC"]

[llm]
provider = "open_ai"
base_url = "https://api.deepseek.com"
model = "deepseek-chat"
"#,
    )
    .unwrap();
    assert_eq!(c.controller.max_rounds, 5);
    assert_eq!(c.controller.max_context_chars, 6000);
    assert_eq!(c.llm.provider, LlmProvider::OpenAi);
    assert_eq!(c.retrieval.synonyms["garbled circuit"], vec!["Yao", "GC"]);
    assert_eq!(c.ingest.chunk_size, 1000);
}

#[test]
fn env_then_cli_overrides_apply_in_order() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("docqa.toml"),
        "[controller]\nmax_rounds = 4\n",
    )
    .unwrap();
    let mut c = AppConfig::load(dir.path(), None).unwrap();
    assert_eq!(c.controller.max_rounds, 4);

    let env: HashMap<&str, &str> = [("DOCQA_MAX_ROUNDS", "6"), ("DOCQA_LLM_MODEL", "qwen2.5")]
        .into_iter()
        .collect();
    c.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
        .unwrap();
    assert_eq!(c.controller.max_rounds, 6);
    assert_eq!(c.llm.model, "qwen2.5");

    c.apply_overrides(&ConfigOverrides {
        data_dir: Some(PathBuf::from("/tmp/docqa")),
        max_rounds: Some(2),
        ..ConfigOverrides::default()
    });
    assert_eq!(c.controller.max_rounds, 2);
    assert_eq!(c.storage.data_dir, PathBuf::from("/tmp/docqa"));
    assert_eq!(c.storage.index_dir(), PathBuf::from("/tmp/docqa/index"));
}

#[test]
fn invalid_values_are_rejected() {
    let mut c = AppConfig::default();
    c.controller.max_rounds = 0;
    assert_eq!(c.validate().unwrap_err().code, "CONFIG_INVALID");

    let mut c = AppConfig::default();
    c.ingest.chunk_overlap = c.ingest.chunk_size;
    assert_eq!(c.validate().unwrap_err().code, "CONFIG_INVALID");

    let mut c = AppConfig::default();
    let err = c
        .apply_env_overrides(|k| (k == "DOCQA_TOP_K").then(|| "many".to_string()))
        .unwrap_err();
    assert_eq!(err.code, "CONFIG_INVALID");

    assert_eq!(
        AppConfig::from_toml("controller = 3").unwrap_err().code,
        "CONFIG_PARSE_FAILED"
    );
}
