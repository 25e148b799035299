//! In-memory [`Store`] implementation for tests and embedding.
//!
//! Uses `HashMap` and `Vec` behind a single `std::sync::RwLock`. Vector
//! search is brute-force cosine distance over the document's chunks.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::embedding::cosine_distance;
use crate::models::{
    sort_transcript, Chunk, ChunkMatch, Conversation, Document, DocumentStatus, GradeReport,
    Message, MisconceptionPattern, Role, Rubric, RubricLevels, Summary,
};

use super::{validate_levels, Store};

#[derive(Default)]
struct Tables {
    documents: HashMap<String, Document>,
    chunks: Vec<Chunk>,
    summaries: HashMap<String, Summary>,
    rubrics: Vec<Rubric>,
    misconceptions: Vec<MisconceptionPattern>,
    conversations: HashMap<String, Conversation>,
    messages: Vec<Message>,
    reports: Vec<GradeReport>,
    in_flight: HashSet<String>,
    next_seq: i64,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        self.write()?.documents.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.read()?.documents.get(id).cloned())
    }

    async fn mark_document_processed(&self, id: &str) -> Result<()> {
        let mut tables = self.write()?;
        let doc = tables
            .documents
            .get_mut(id)
            .ok_or_else(|| anyhow!("document {} not found", id))?;
        doc.status = DocumentStatus::Processed;
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        let mut tables = self.write()?;
        tables.documents.remove(id);
        tables.chunks.retain(|c| c.document_id != id);
        tables.summaries.remove(id);
        tables.rubrics.retain(|r| r.document_id != id);
        tables.misconceptions.retain(|m| m.document_id != id);
        Ok(())
    }

    async fn insert_chunk(&self, chunk: &Chunk) -> Result<()> {
        self.write()?.chunks.push(chunk.clone());
        Ok(())
    }

    async fn list_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let mut chunks: Vec<Chunk> = self
            .read()?
            .chunks
            .iter()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.sequence);
        Ok(chunks)
    }

    async fn nearest_chunks(
        &self,
        document_id: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkMatch>> {
        let mut matches: Vec<ChunkMatch> = self
            .list_chunks(document_id)
            .await?
            .into_iter()
            .map(|chunk| {
                let distance = cosine_distance(query, &chunk.embedding);
                ChunkMatch { chunk, distance }
            })
            .collect();
        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn get_summary(&self, document_id: &str) -> Result<Option<Summary>> {
        Ok(self.read()?.summaries.get(document_id).cloned())
    }

    async fn insert_summary(&self, summary: &Summary) -> Result<()> {
        let mut tables = self.write()?;
        if tables.summaries.contains_key(&summary.document_id) {
            bail!("document {} already has a summary", summary.document_id);
        }
        tables
            .summaries
            .insert(summary.document_id.clone(), summary.clone());
        Ok(())
    }

    async fn insert_rubric(&self, rubric: &Rubric) -> Result<()> {
        validate_levels(&rubric.levels)?;
        self.write()?.rubrics.push(rubric.clone());
        Ok(())
    }

    async fn list_rubrics(&self, document_id: &str) -> Result<Vec<Rubric>> {
        Ok(self
            .read()?
            .rubrics
            .iter()
            .filter(|r| r.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn update_rubric(&self, id: &str, levels: &RubricLevels) -> Result<Rubric> {
        validate_levels(levels)?;
        let mut tables = self.write()?;
        let rubric = tables
            .rubrics
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow!("rubric {} not found", id))?;
        rubric.levels = levels.clone();
        Ok(rubric.clone())
    }

    async fn insert_misconception(&self, pattern: &MisconceptionPattern) -> Result<()> {
        self.write()?.misconceptions.push(pattern.clone());
        Ok(())
    }

    async fn list_misconceptions(&self, document_id: &str) -> Result<Vec<MisconceptionPattern>> {
        Ok(self
            .read()?
            .misconceptions
            .iter()
            .filter(|m| m.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn insert_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.write()?
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.read()?.conversations.get(id).cloned())
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        let mut tables = self.write()?;
        tables.conversations.remove(id);
        tables.messages.retain(|m| m.conversation_id != id);
        tables.reports.retain(|r| r.conversation_id != id);
        tables.in_flight.remove(id);
        Ok(())
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message> {
        let mut tables = self.write()?;
        if !tables.conversations.contains_key(conversation_id) {
            bail!("conversation {} not found", conversation_id);
        }
        tables.next_seq += 1;
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
            seq: tables.next_seq,
        };
        tables.messages.push(message.clone());
        Ok(message)
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        Ok(self.read()?.messages.iter().find(|m| m.id == id).cloned())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .read()?
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        sort_transcript(&mut messages);
        Ok(messages)
    }

    async fn insert_report(&self, report: &GradeReport) -> Result<()> {
        self.write()?.reports.push(report.clone());
        Ok(())
    }

    async fn list_reports(&self, conversation_id: &str) -> Result<Vec<GradeReport>> {
        Ok(self
            .read()?
            .reports
            .iter()
            .filter(|r| r.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn begin_evaluation(&self, conversation_id: &str) -> Result<bool> {
        Ok(self.write()?.in_flight.insert(conversation_id.to_string()))
    }

    async fn end_evaluation(&self, conversation_id: &str) -> Result<()> {
        self.write()?.in_flight.remove(conversation_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(doc: &str, seq: i64, embedding: Vec<f32>) -> Chunk {
        Chunk {
            id: format!("{}-{}", doc, seq),
            document_id: doc.to_string(),
            source: "notes.txt".into(),
            ordinal: seq,
            sequence: seq,
            text: format!("chunk {}", seq),
            hash: String::new(),
            embedding,
        }
    }

    fn levels() -> RubricLevels {
        RubricLevels {
            beginner: "b".into(),
            developing: "d".into(),
            proficient: "p".into(),
            mastery: "m".into(),
        }
    }

    #[tokio::test]
    async fn test_nearest_chunks_ranked_ascending() {
        let store = InMemoryStore::new();
        store.insert_chunk(&chunk("d", 0, vec![0.0, 1.0])).await.unwrap();
        store.insert_chunk(&chunk("d", 1, vec![1.0, 0.0])).await.unwrap();
        store.insert_chunk(&chunk("d", 2, vec![1.0, 1.0])).await.unwrap();
        store.insert_chunk(&chunk("other", 0, vec![1.0, 0.0])).await.unwrap();

        let matches = store.nearest_chunks("d", &[1.0, 0.0], 2).await.unwrap();
        let seqs: Vec<i64> = matches.iter().map(|m| m.chunk.sequence).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert!(matches[0].distance < matches[1].distance);
    }

    #[tokio::test]
    async fn test_summary_is_unique_per_document() {
        let store = InMemoryStore::new();
        store.insert_summary(&Summary::new("d", "first")).await.unwrap();
        assert!(store.insert_summary(&Summary::new("d", "second")).await.is_err());
        assert_eq!(store.get_summary("d").await.unwrap().unwrap().content, "first");
    }

    #[tokio::test]
    async fn test_update_rubric_validates_levels() {
        let store = InMemoryStore::new();
        let rubric = Rubric::new("d", "Limits", levels());
        store.insert_rubric(&rubric).await.unwrap();

        let mut edited = levels();
        edited.mastery = "explains epsilon-delta proofs".into();
        let updated = store.update_rubric(&rubric.id, &edited).await.unwrap();
        assert_eq!(updated.levels.mastery, "explains epsilon-delta proofs");

        edited.beginner = " ".into();
        assert!(store.update_rubric(&rubric.id, &edited).await.is_err());
        assert!(store.update_rubric("missing", &levels()).await.is_err());
    }

    #[tokio::test]
    async fn test_messages_get_increasing_seq_and_cascade() {
        let store = InMemoryStore::new();
        let conv = Conversation::new("d");
        store.insert_conversation(&conv).await.unwrap();
        let a = store.append_message(&conv.id, Role::Learner, "a").await.unwrap();
        let b = store.append_message(&conv.id, Role::Evaluator, "b").await.unwrap();
        assert!(b.seq > a.seq);

        let listed = store.list_messages(&conv.id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, a.id);

        store.delete_conversation(&conv.id).await.unwrap();
        assert!(store.list_messages(&conv.id).await.unwrap().is_empty());
        assert!(store.append_message(&conv.id, Role::Learner, "c").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_document_cascades() {
        let store = InMemoryStore::new();
        let doc = Document::new("Calculus");
        store.insert_document(&doc).await.unwrap();
        store.insert_chunk(&chunk(&doc.id, 0, vec![1.0])).await.unwrap();
        store.insert_rubric(&Rubric::new(&doc.id, "Limits", levels())).await.unwrap();
        store.insert_summary(&Summary::new(&doc.id, "s")).await.unwrap();

        store.delete_document(&doc.id).await.unwrap();
        assert!(store.get_document(&doc.id).await.unwrap().is_none());
        assert!(store.list_chunks(&doc.id).await.unwrap().is_empty());
        assert!(store.list_rubrics(&doc.id).await.unwrap().is_empty());
        assert!(store.get_summary(&doc.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_flight_marker() {
        let store = InMemoryStore::new();
        assert!(store.begin_evaluation("c").await.unwrap());
        assert!(!store.begin_evaluation("c").await.unwrap());
        store.end_evaluation("c").await.unwrap();
        assert!(store.begin_evaluation("c").await.unwrap());
    }
}
