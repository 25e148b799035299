//! Context retrieval: nearest chunks plus lexically relevant rubrics.
//!
//! Chunks are ranked by ascending cosine distance between the query
//! embedding and the stored chunk embeddings. Rubrics are ranked
//! independently by how many distinct words the query shares with the
//! rubric's concept name; ties keep creation order, and rubrics with no
//! overlap still fill the list when fewer relevant ones exist.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::capability::LanguageModel;
use crate::embedding::mean_distance;
use crate::error::{PipelineError, Result};
use crate::models::{ChunkMatch, Rubric};
use crate::store::Store;
use crate::text::{overlap, word_set};

/// Retrieval limits.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalParams {
    pub top_k: usize,
    pub rubric_limit: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k: 5,
            rubric_limit: 3,
        }
    }
}

/// A rubric with its word overlap against the query.
#[derive(Debug, Clone, Serialize)]
pub struct RankedRubric {
    pub rubric: Rubric,
    pub overlap: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub chunks: Vec<ChunkMatch>,
    pub rubrics: Vec<RankedRubric>,
}

impl RetrievedContext {
    pub fn average_distance(&self) -> Option<f64> {
        let distances: Vec<f64> = self.chunks.iter().map(|m| m.distance).collect();
        mean_distance(&distances)
    }
}

pub struct ContextRetriever {
    store: Arc<dyn Store>,
    model: Arc<dyn LanguageModel>,
    params: RetrievalParams,
}

impl ContextRetriever {
    pub fn new(store: Arc<dyn Store>, model: Arc<dyn LanguageModel>, params: RetrievalParams) -> Self {
        Self {
            store,
            model,
            params,
        }
    }

    /// Retrieve context for `query` within one document. Read-only.
    pub async fn retrieve(&self, query: &str, document_id: &str) -> Result<RetrievedContext> {
        let embedding = self.model.embed(query).await.map_err(|e| {
            PipelineError::capability(vec![format!("query embedding failed: {:#}", e)])
        })?;

        let chunks = self
            .store
            .nearest_chunks(document_id, &embedding, self.params.top_k)
            .await?;
        let rubrics = self.store.list_rubrics(document_id).await?;
        let rubrics = rank_rubrics(query, rubrics, self.params.rubric_limit);

        debug!(
            document_id,
            chunks = chunks.len(),
            rubrics = rubrics.len(),
            "context retrieved"
        );
        Ok(RetrievedContext { chunks, rubrics })
    }
}

/// Rank `rubrics` (in creation order) by descending word overlap between
/// `query` and each concept name, keeping the first `limit`.
pub fn rank_rubrics(query: &str, rubrics: Vec<Rubric>, limit: usize) -> Vec<RankedRubric> {
    let query_words = word_set(query);
    let mut ranked: Vec<RankedRubric> = rubrics
        .into_iter()
        .map(|rubric| {
            let overlap = overlap(&query_words, &word_set(&rubric.concept));
            RankedRubric { rubric, overlap }
        })
        .collect();
    ranked.sort_by(|a, b| b.overlap.cmp(&a.overlap));
    ranked.truncate(limit);
    ranked
}
