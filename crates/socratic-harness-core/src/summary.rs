//! Document summary synthesis over a diverse sample of chunks.
//!
//! ## Sampling
//!
//! 1. Documents with at most `full_coverage_threshold` chunks, or at most
//!    `max_chunks`, use every chunk.
//! 2. Otherwise 70% of `max_chunks` are taken at a regular positional
//!    interval (`total / target`) from the start of the document.
//! 3. The remaining slots are filled at random, without replacement, from
//!    the chunks not yet chosen.
//! 4. The selection is restored to document order before prompting.
//!
//! The random source is a [`StdRng`]; a fixed seed makes selection
//! reproducible.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{info, warn};

use crate::capability::LanguageModel;
use crate::error::{PipelineError, Precondition, Result};
use crate::models::Summary;
use crate::prompts;
use crate::store::Store;

/// Share of the sample drawn at regular intervals.
const INTERVAL_SHARE: f64 = 0.7;

#[derive(Debug, Clone, Copy)]
pub struct SamplingParams {
    pub max_chunks: usize,
    pub full_coverage_threshold: usize,
    pub seed: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_chunks: 15,
            full_coverage_threshold: 10,
            seed: None,
        }
    }
}

/// Interval-plus-random chunk selection.
pub struct DiverseSampler {
    params: SamplingParams,
    rng: StdRng,
}

impl DiverseSampler {
    /// Seeded from `params.seed` when set, from entropy otherwise.
    pub fn new(params: SamplingParams) -> Self {
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { params, rng }
    }

    pub fn with_seed(params: SamplingParams, seed: u64) -> Self {
        Self {
            params,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Indices, ascending, of the chunks to use out of `total`.
    pub fn select(&mut self, total: usize) -> Vec<usize> {
        let max = self.params.max_chunks.max(1);
        if total <= self.params.full_coverage_threshold || total <= max {
            return (0..total).collect();
        }

        let interval_target = ((max as f64 * INTERVAL_SHARE) as usize).max(1);
        let interval = (total / interval_target).max(1);
        let mut chosen: Vec<usize> = (0..total)
            .step_by(interval)
            .take(interval_target)
            .collect();

        let remaining = max - chosen.len();
        if remaining > 0 {
            let rest: Vec<usize> = (0..total).filter(|i| !chosen.contains(i)).collect();
            let picks = index::sample(&mut self.rng, rest.len(), remaining.min(rest.len()));
            chosen.extend(picks.into_iter().map(|i| rest[i]));
        }

        chosen.sort_unstable();
        chosen
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    pub summary: Summary,
    pub chunks_used: usize,
}

pub struct SummarySynthesizer {
    store: Arc<dyn Store>,
    model: Arc<dyn LanguageModel>,
    params: SamplingParams,
}

impl SummarySynthesizer {
    pub fn new(store: Arc<dyn Store>, model: Arc<dyn LanguageModel>, params: SamplingParams) -> Self {
        Self {
            store,
            model,
            params,
        }
    }

    /// Create the summary of a processed document. Refuses to replace an
    /// existing one.
    pub async fn synthesize(&self, document_id: &str) -> Result<SummaryReport> {
        let document = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| PipelineError::input(format!("document {} not found", document_id)))?;
        if !document.is_processed() {
            return Err(Precondition::DocumentNotProcessed(document.id).into());
        }
        if self.store.get_summary(document_id).await?.is_some() {
            return Err(Precondition::SummaryExists(document.id).into());
        }

        let chunks = self.store.list_chunks(document_id).await?;
        if chunks.is_empty() {
            return Err(PipelineError::input(format!(
                "document {} has no chunks to summarize",
                document_id
            )));
        }

        let selected: Vec<_> = DiverseSampler::new(self.params)
            .select(chunks.len())
            .into_iter()
            .map(|i| &chunks[i])
            .collect();
        info!(
            document_id,
            total = chunks.len(),
            selected = selected.len(),
            "generating summary"
        );

        let reply = self
            .model
            .complete(&prompts::summary(&selected))
            .await
            .map_err(|e| {
                warn!(document_id, error = %e, "summary completion failed");
                PipelineError::capability(vec![format!("summary generation failed: {:#}", e)])
            })?;
        let content = reply.trim();
        if content.is_empty() {
            return Err(PipelineError::capability(vec![
                "model returned an empty summary".to_string(),
            ]));
        }

        let summary = Summary::new(document_id, content);
        self.store.insert_summary(&summary).await?;
        info!(document_id, chars = content.len(), "summary saved");
        Ok(SummaryReport {
            summary,
            chunks_used: selected.len(),
        })
    }
}
