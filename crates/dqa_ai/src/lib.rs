//! Model adapters, retrieval and the iterative answering loop.
//!
//! [`service::QaService`] is the entry point: it builds the vector index from a
//! document corpus and answers questions through [`controller::IterativeController`].

pub mod controller;
pub mod deadline;
pub mod embeddings;
pub mod evidence;
pub mod guardrails;
pub mod index;
pub mod llm;
pub mod ollama;
pub mod prompts;
pub mod retrieve;
pub mod service;
pub mod synth;
