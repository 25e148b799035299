//! # Socratic Harness Core
//!
//! Pipeline logic for Socratic Harness: data models, chunking, the store
//! abstraction, retrieval, Socratic dialogue, summary and rubric synthesis,
//! conversation analysis and rubric-based grading.
//!
//! This crate contains no sqlx, HTTP client or filesystem I/O. The language
//! model and the store are traits ([`capability::LanguageModel`],
//! [`store::Store`]) injected into each component; the app crate supplies
//! the SQLite store and the OpenAI-compatible client.
//!
//! ## Pipeline
//!
//! ```text
//! files ─▶ DocumentIndexer ─▶ chunks+embeddings ─┬─▶ ContextRetriever ─▶ DialogueResponder
//!                                                └─▶ SummarySynthesizer ─▶ RubricSynthesizer
//!
//! transcript ─▶ ConversationAnalyzer ─▶ ConceptEvaluator ─▶ GradeAggregator ─▶ GradeReport
//! ```

pub mod analysis;
pub mod capability;
pub mod chunk;
pub mod dialogue;
pub mod embedding;
pub mod error;
pub mod evaluate;
pub mod grade;
pub mod grader;
pub mod index;
pub mod models;
pub mod prompts;
pub mod retrieve;
pub mod rubric;
pub mod store;
pub mod structured;
pub mod summary;
pub mod testing;
pub mod text;
