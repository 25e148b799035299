//! Storage abstraction for the assessment pipeline.
//!
//! The [`Store`] trait defines every persistence operation the pipeline
//! components need, enabling pluggable backends (SQLite in the app crate,
//! in-memory here for tests).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Ownership and cascades
//!
//! Deleting a document removes its chunks, summary, rubrics and
//! misconception patterns. Deleting a conversation removes its messages and
//! grade reports. Messages and grade reports are append-only.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    Chunk, ChunkMatch, Conversation, Document, GradeReport, Message, MisconceptionPattern, Role,
    Rubric, RubricLevels, Summary,
};

/// Abstract storage backend.
///
/// # Operations
///
/// | Area | Methods |
/// |------|---------|
/// | Documents | [`insert_document`](Store::insert_document), [`get_document`](Store::get_document), [`mark_document_processed`](Store::mark_document_processed), [`delete_document`](Store::delete_document) |
/// | Chunks | [`insert_chunk`](Store::insert_chunk), [`list_chunks`](Store::list_chunks), [`nearest_chunks`](Store::nearest_chunks) |
/// | Summaries | [`get_summary`](Store::get_summary), [`insert_summary`](Store::insert_summary) |
/// | Rubrics | [`insert_rubric`](Store::insert_rubric), [`list_rubrics`](Store::list_rubrics), [`update_rubric`](Store::update_rubric) |
/// | Misconceptions | [`insert_misconception`](Store::insert_misconception), [`list_misconceptions`](Store::list_misconceptions) |
/// | Conversations | [`insert_conversation`](Store::insert_conversation), [`get_conversation`](Store::get_conversation), [`delete_conversation`](Store::delete_conversation) |
/// | Messages | [`append_message`](Store::append_message), [`get_message`](Store::get_message), [`list_messages`](Store::list_messages) |
/// | Reports | [`insert_report`](Store::insert_report), [`list_reports`](Store::list_reports) |
/// | In-flight marker | [`begin_evaluation`](Store::begin_evaluation), [`end_evaluation`](Store::end_evaluation) |
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_document(&self, doc: &Document) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// One-way `Uploaded → Processed` transition.
    async fn mark_document_processed(&self, id: &str) -> Result<()>;

    /// Delete a document and everything it owns.
    async fn delete_document(&self, id: &str) -> Result<()>;

    async fn insert_chunk(&self, chunk: &Chunk) -> Result<()>;

    /// All chunks of a document in `sequence` order.
    async fn list_chunks(&self, document_id: &str) -> Result<Vec<Chunk>>;

    /// The `limit` chunks of a document closest to `query`, by ascending
    /// cosine distance. Ties keep `sequence` order.
    async fn nearest_chunks(
        &self,
        document_id: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkMatch>>;

    async fn get_summary(&self, document_id: &str) -> Result<Option<Summary>>;

    /// Insert a summary. Fails if the document already has one.
    async fn insert_summary(&self, summary: &Summary) -> Result<()>;

    async fn insert_rubric(&self, rubric: &Rubric) -> Result<()>;

    /// All rubrics of a document in creation order.
    async fn list_rubrics(&self, document_id: &str) -> Result<Vec<Rubric>>;

    /// Replace a rubric's levels. Fails if any level is blank or the rubric
    /// does not exist.
    async fn update_rubric(&self, id: &str, levels: &RubricLevels) -> Result<Rubric>;

    async fn insert_misconception(&self, pattern: &MisconceptionPattern) -> Result<()>;

    async fn list_misconceptions(&self, document_id: &str) -> Result<Vec<MisconceptionPattern>>;

    async fn insert_conversation(&self, conversation: &Conversation) -> Result<()>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Delete a conversation with its messages and reports.
    async fn delete_conversation(&self, id: &str) -> Result<()>;

    /// Append a message. The store assigns `id`, `created_at` and `seq`.
    async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message>;

    async fn get_message(&self, id: &str) -> Result<Option<Message>>;

    /// Transcript of a conversation ordered by `(created_at, seq)`.
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    async fn insert_report(&self, report: &GradeReport) -> Result<()>;

    /// Reports of a conversation, oldest first.
    async fn list_reports(&self, conversation_id: &str) -> Result<Vec<GradeReport>>;

    /// Set the in-flight evaluation marker. Returns `false` if it was
    /// already set.
    async fn begin_evaluation(&self, conversation_id: &str) -> Result<bool>;

    /// Clear the in-flight evaluation marker.
    async fn end_evaluation(&self, conversation_id: &str) -> Result<()>;
}

/// Reject levels with a blank description.
pub fn validate_levels(levels: &RubricLevels) -> Result<()> {
    let blank = levels.blank_levels();
    if !blank.is_empty() {
        anyhow::bail!("rubric levels must not be blank: {}", blank.join(", "));
    }
    Ok(())
}
