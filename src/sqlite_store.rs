//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] operation onto the schema created by
//! [`migrate`](crate::migrate). Nearest-chunk search loads the document's
//! embeddings and ranks them by cosine distance in process.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use socratic_harness_core::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use socratic_harness_core::models::{
    Chunk, ChunkMatch, Conversation, Document, DocumentStatus, GradeReport, Message,
    MisconceptionPattern, Role, Rubric, RubricLevels, Summary,
};
use socratic_harness_core::store::{validate_levels, Store};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| anyhow!("invalid timestamp: {}", micros))
}

fn from_json<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T> {
    let raw: String = row.try_get(column)?;
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON in column {}", column))
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let status: String = row.try_get("status")?;
    Ok(Document {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        status: DocumentStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown document status: {}", status))?,
        created_at: from_micros(row.try_get("created_at")?)?,
    })
}

fn chunk_from_row(row: &SqliteRow) -> Result<Chunk> {
    let blob: Vec<u8> = row.try_get("embedding")?;
    Ok(Chunk {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        source: row.try_get("source")?,
        ordinal: row.try_get("ordinal")?,
        sequence: row.try_get("sequence")?,
        text: row.try_get("text")?,
        hash: row.try_get("hash")?,
        embedding: blob_to_vec(&blob),
    })
}

fn rubric_from_row(row: &SqliteRow) -> Result<Rubric> {
    Ok(Rubric {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        concept: row.try_get("concept")?,
        levels: from_json(row, "levels_json")?,
        created_at: from_micros(row.try_get("created_at")?)?,
    })
}

fn pattern_from_row(row: &SqliteRow) -> Result<MisconceptionPattern> {
    Ok(MisconceptionPattern {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        concept: row.try_get("concept")?,
        name: row.try_get("name")?,
        signal_phrases: from_json(row, "signal_phrases_json")?,
        recommended_followups: from_json(row, "followups_json")?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let role: String = row.try_get("role")?;
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        role: Role::parse(&role).ok_or_else(|| anyhow!("unknown message role: {}", role))?,
        content: row.try_get("content")?,
        created_at: from_micros(row.try_get("created_at")?)?,
        seq: row.try_get("seq")?,
    })
}

fn report_from_row(row: &SqliteRow) -> Result<GradeReport> {
    Ok(GradeReport {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        overall_score: row.try_get("overall_score")?,
        detailed_scores: from_json(row, "detailed_scores_json")?,
        feedback: row.try_get("feedback")?,
        recommendations: from_json(row, "recommendations_json")?,
        strengths: from_json(row, "strengths_json")?,
        weaknesses: from_json(row, "weaknesses_json")?,
        evaluated_at: from_micros(row.try_get("evaluated_at")?)?,
    })
}

const MESSAGE_COLUMNS: &str = "seq, id, conversation_id, role, content, created_at";

#[async_trait]
impl Store for SqliteStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query("INSERT INTO documents (id, title, status, created_at) VALUES (?, ?, ?, ?)")
            .bind(&doc.id)
            .bind(&doc.title)
            .bind(doc.status.as_str())
            .bind(to_micros(&doc.created_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        sqlx::query("SELECT id, title, status, created_at FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(document_from_row)
            .transpose()
    }

    async fn mark_document_processed(&self, id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE documents SET status = ? WHERE id = ?")
            .bind(DocumentStatus::Processed.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("document {} not found", id);
        }
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["chunks", "summaries", "rubrics", "misconception_patterns"] {
            sqlx::query(&format!("DELETE FROM {} WHERE document_id = ?", table))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_chunk(&self, chunk: &Chunk) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, source, ordinal, sequence, text, hash, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(&chunk.source)
        .bind(chunk.ordinal)
        .bind(chunk.sequence)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .bind(vec_to_blob(&chunk.embedding))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        sqlx::query(
            r#"
            SELECT id, document_id, source, ordinal, sequence, text, hash, embedding
            FROM chunks
            WHERE document_id = ?
            ORDER BY sequence ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(chunk_from_row)
        .collect()
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
        let row = sqlx::query(
            "SELECT id, document_id, content, created_at FROM summaries WHERE document_id = ?",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<Summary> {
            Ok(Summary {
                id: r.try_get("id")?,
                document_id: r.try_get("document_id")?,
                content: r.try_get("content")?,
                created_at: from_micros(r.try_get("created_at")?)?,
            })
        })
        .transpose()
    }

    async fn insert_summary(&self, summary: &Summary) -> Result<()> {
        sqlx::query(
            "INSERT INTO summaries (id, document_id, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&summary.id)
        .bind(&summary.document_id)
        .bind(&summary.content)
        .bind(to_micros(&summary.created_at))
        .execute(&self.pool)
        .await
        .with_context(|| format!("document {} already has a summary", summary.document_id))?;
        Ok(())
    }

    async fn insert_rubric(&self, rubric: &Rubric) -> Result<()> {
        validate_levels(&rubric.levels)?;
        sqlx::query(
            "INSERT INTO rubrics (id, document_id, concept, levels_json, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&rubric.id)
        .bind(&rubric.document_id)
        .bind(&rubric.concept)
        .bind(serde_json::to_string(&rubric.levels)?)
        .bind(to_micros(&rubric.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_rubrics(&self, document_id: &str) -> Result<Vec<Rubric>> {
        sqlx::query(
            r#"
            SELECT id, document_id, concept, levels_json, created_at
            FROM rubrics
            WHERE document_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(rubric_from_row)
        .collect()
    }

    async fn update_rubric(&self, id: &str, levels: &RubricLevels) -> Result<Rubric> {
        validate_levels(levels)?;
        let result = sqlx::query("UPDATE rubrics SET levels_json = ? WHERE id = ?")
            .bind(serde_json::to_string(levels)?)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("rubric {} not found", id);
        }

        let row = sqlx::query(
            "SELECT id, document_id, concept, levels_json, created_at FROM rubrics WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        rubric_from_row(&row)
    }

    async fn insert_misconception(&self, pattern: &MisconceptionPattern) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO misconception_patterns
                (id, document_id, concept, name, signal_phrases_json, followups_json)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&pattern.id)
        .bind(&pattern.document_id)
        .bind(&pattern.concept)
        .bind(&pattern.name)
        .bind(serde_json::to_string(&pattern.signal_phrases)?)
        .bind(serde_json::to_string(&pattern.recommended_followups)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_misconceptions(&self, document_id: &str) -> Result<Vec<MisconceptionPattern>> {
        sqlx::query(
            r#"
            SELECT id, document_id, concept, name, signal_phrases_json, followups_json
            FROM misconception_patterns
            WHERE document_id = ?
            ORDER BY rowid ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(pattern_from_row)
        .collect()
    }

    async fn insert_conversation(&self, conversation: &Conversation) -> Result<()> {
        sqlx::query("INSERT INTO conversations (id, document_id, created_at) VALUES (?, ?, ?)")
            .bind(&conversation.id)
            .bind(&conversation.document_id)
            .bind(to_micros(&conversation.created_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query("SELECT id, document_id, created_at FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| -> Result<Conversation> {
            Ok(Conversation {
                id: r.try_get("id")?,
                document_id: r.try_get("document_id")?,
                created_at: from_micros(r.try_get("created_at")?)?,
            })
        })
        .transpose()
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["messages", "grade_reports"] {
            sqlx::query(&format!("DELETE FROM {} WHERE conversation_id = ?", table))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message> {
        if self.get_conversation(conversation_id).await?.is_none() {
            bail!("conversation {} not found", conversation_id);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(role.as_str())
        .bind(content)
        .bind(to_micros(&created_at))
        .execute(&self.pool)
        .await?;

        Ok(Message {
            id,
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: from_micros(to_micros(&created_at))?,
            seq: result.last_insert_rowid(),
        })
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        sqlx::query(&format!("SELECT {} FROM messages WHERE id = ?", MESSAGE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(message_from_row)
            .transpose()
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        sqlx::query(&format!(
            "SELECT {} FROM messages WHERE conversation_id = ? ORDER BY created_at ASC, seq ASC",
            MESSAGE_COLUMNS
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(message_from_row)
        .collect()
    }

    async fn insert_report(&self, report: &GradeReport) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO grade_reports
                (id, conversation_id, overall_score, detailed_scores_json, feedback,
                 recommendations_json, strengths_json, weaknesses_json, evaluated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.id)
        .bind(&report.conversation_id)
        .bind(report.overall_score)
        .bind(serde_json::to_string(&report.detailed_scores)?)
        .bind(&report.feedback)
        .bind(serde_json::to_string(&report.recommendations)?)
        .bind(serde_json::to_string(&report.strengths)?)
        .bind(serde_json::to_string(&report.weaknesses)?)
        .bind(to_micros(&report.evaluated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_reports(&self, conversation_id: &str) -> Result<Vec<GradeReport>> {
        sqlx::query(
            r#"
            SELECT id, conversation_id, overall_score, detailed_scores_json, feedback,
                   recommendations_json, strengths_json, weaknesses_json, evaluated_at
            FROM grade_reports
            WHERE conversation_id = ?
            ORDER BY evaluated_at ASC, rowid ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(report_from_row)
        .collect()
    }

    async fn begin_evaluation(&self, conversation_id: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE conversations SET evaluating = 1 WHERE id = ? AND evaluating = 0")
                .bind(conversation_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn end_evaluation(&self, conversation_id: &str) -> Result<()> {
        sqlx::query("UPDATE conversations SET evaluating = 0 WHERE id = ?")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
