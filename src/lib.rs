//! # Socratic Harness
//!
//! Retrieval-grounded Socratic dialogue and rubric-based assessment over
//! course material.
//!
//! An instructor uploads documents. They are extracted, chunked and
//! embedded, then summarized and turned into per-concept rubrics. Learners
//! converse with an evaluator that asks probing questions grounded in the
//! retrieved material, and finished conversations are graded against the
//! rubrics into a report with feedback and recommendations.
//!
//! The algorithms live in `socratic-harness-core`; this crate supplies the
//! SQLite store, the OpenAI-compatible model client, file extraction,
//! configuration, event notification, and the `soc` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │   Files     │──▶│  Pipeline    │──▶│  SQLite   │
//! │ PDF/DOCX/MD │   │ Index+Derive │   │ Store     │
//! └─────────────┘   └──────┬───────┘   └──────────┘
//!                          │
//!                ┌─────────┴─────────┐
//!                ▼                   ▼
//!          ┌──────────┐        ┌───────────┐
//!          │   CLI    │        │ Notifier  │
//!          │  (soc)   │        │ (events)  │
//!          └──────────┘        └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! soc init
//! soc document add --title "Photosynthesis" notes.pdf
//! soc rubrics generate <document-id>
//! soc conversation start <document-id>
//! soc say <conversation-id> "Plants eat sunlight, right?"
//! soc evaluate <conversation-id>
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` |
//! | [`model`] | OpenAI-compatible chat and embedding client |
//! | [`extract`] | PDF, DOCX and plain text extraction |
//! | [`notify`] | Dialogue and evaluation events |
//! | [`pipeline`] | Units of work over documents and conversations |
//! | [`commands`] | CLI command handlers |

pub mod commands;
pub mod config;
pub mod db;
pub mod extract;
pub mod migrate;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod sqlite_store;
