//! Rubric synthesis: summary → key concepts → four-level rubrics.
//!
//! A summary is created on demand when the document has none. Concept
//! entries missing `name`, `description` or `assessment_focus` are dropped
//! before rubric generation, and a generated rubric missing any of the four
//! levels is discarded rather than stored. The run succeeds when at least
//! one rubric was stored.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::capability::LanguageModel;
use crate::error::{PipelineError, Precondition, Result};
use crate::models::{Rubric, RubricLevels, Summary};
use crate::prompts;
use crate::store::Store;
use crate::structured::{decode_array, decode_object};
use crate::summary::SummarySynthesizer;

/// A key concept proposed by the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConceptSpec {
    pub name: String,
    pub description: String,
    pub assessment_focus: String,
}

impl ConceptSpec {
    /// Accept an entry only when all three fields are non-blank strings.
    pub fn from_json(value: &Value) -> Option<Self> {
        let field = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Some(Self {
            name: field("name")?,
            description: field("description")?,
            assessment_focus: field("assessment_focus")?,
        })
    }
}

/// Concept entries of a model reply that carry every required field.
pub fn parse_concepts(raw: &str) -> Vec<ConceptSpec> {
    let decoded = decode_array::<Value>(raw);
    if !decoded.ok {
        warn!("concept extraction returned unparsable output");
    }
    decoded
        .value
        .iter()
        .filter_map(ConceptSpec::from_json)
        .collect()
}

/// Four rubric levels from a model reply, or the missing level names.
pub fn parse_levels(raw: &str) -> std::result::Result<RubricLevels, Vec<&'static str>> {
    let decoded = decode_object::<Value>(raw);
    if !decoded.ok {
        return Err(RubricLevels::KEYS.to_vec());
    }
    RubricLevels::from_json(&decoded.value)
}

#[derive(Debug, Clone, Serialize)]
pub struct RubricSynthesisReport {
    pub document_id: String,
    pub summary_generated: bool,
    pub concepts_extracted: usize,
    pub rubrics: Vec<Rubric>,
    /// Concepts that produced no rubric, with the reason.
    pub warnings: Vec<String>,
}

pub struct RubricSynthesizer {
    store: Arc<dyn Store>,
    model: Arc<dyn LanguageModel>,
    summaries: SummarySynthesizer,
}

impl RubricSynthesizer {
    pub fn new(
        store: Arc<dyn Store>,
        model: Arc<dyn LanguageModel>,
        summaries: SummarySynthesizer,
    ) -> Self {
        Self {
            store,
            model,
            summaries,
        }
    }

    pub async fn synthesize(&self, document_id: &str) -> Result<RubricSynthesisReport> {
        let document = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| PipelineError::input(format!("document {} not found", document_id)))?;
        if !document.is_processed() {
            return Err(Precondition::DocumentNotProcessed(document.id).into());
        }

        let (summary, summary_generated) = self.ensure_summary(document_id).await?;

        let reply = self
            .model
            .complete(&prompts::concept_extraction(&summary.content))
            .await
            .map_err(|e| {
                PipelineError::capability(vec![format!("concept extraction failed: {:#}", e)])
            })?;
        let concepts = parse_concepts(&reply);
        if concepts.is_empty() {
            return Err(PipelineError::capability(vec![format!(
                "no usable concepts were extracted for document {}",
                document_id
            )]));
        }
        info!(document_id, concepts = concepts.len(), "concepts extracted");

        let mut report = RubricSynthesisReport {
            document_id: document_id.to_string(),
            summary_generated,
            concepts_extracted: concepts.len(),
            rubrics: Vec::new(),
            warnings: Vec::new(),
        };

        for concept in &concepts {
            let request = prompts::rubric_generation(
                &concept.name,
                &concept.description,
                &concept.assessment_focus,
            );
            let reply = match self.model.complete(&request).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(document_id, concept = %concept.name, error = %e, "rubric generation failed");
                    report
                        .warnings
                        .push(format!("{}: rubric generation failed: {:#}", concept.name, e));
                    continue;
                }
            };

            match parse_levels(&reply) {
                Ok(levels) => {
                    let rubric = Rubric::new(document_id, concept.name.clone(), levels);
                    self.store.insert_rubric(&rubric).await?;
                    report.rubrics.push(rubric);
                }
                Err(missing) => {
                    warn!(document_id, concept = %concept.name, ?missing, "rubric discarded");
                    report.warnings.push(format!(
                        "{}: rubric missing levels {}",
                        concept.name,
                        missing.join(", ")
                    ));
                }
            }
        }

        if report.rubrics.is_empty() {
            return Err(PipelineError::capability(report.warnings));
        }
        info!(document_id, rubrics = report.rubrics.len(), "rubrics generated");
        Ok(report)
    }

    async fn ensure_summary(&self, document_id: &str) -> Result<(Summary, bool)> {
        if let Some(summary) = self.store.get_summary(document_id).await? {
            return Ok((summary, false));
        }
        info!(document_id, "no summary yet, generating one first");
        let generated = self.summaries.synthesize(document_id).await?;
        Ok((generated.summary, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Document};
    use crate::store::memory::InMemoryStore;
    use crate::summary::SamplingParams;
    use crate::testing::MockModel;

    const CONCEPTS: &str = r#"Here are the concepts:
[
  {"name": "Cell membrane", "description": "Lipid bilayer", "assessment_focus": "Selective permeability"},
  {"name": "Mitosis", "description": "Cell division", "assessment_focus": "Phases in order"},
  {"name": "Osmosis", "description": "Water movement"}
]"#;

    const LEVELS: &str = r#"{"beginner": "b", "developing": "d", "proficient": "p", "mastery": "m"}"#;

    #[test]
    fn test_parse_concepts_drops_incomplete_entries() {
        let concepts = parse_concepts(CONCEPTS);
        let names: Vec<&str> = concepts.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Cell membrane", "Mitosis"]);
        assert!(parse_concepts("none").is_empty());
    }

    #[test]
    fn test_parse_levels_reports_missing() {
        assert!(parse_levels(LEVELS).is_ok());
        assert_eq!(
            parse_levels(r#"{"beginner": "b", "developing": "d", "proficient": "p"}"#).unwrap_err(),
            vec!["mastery"]
        );
        assert_eq!(parse_levels("nope").unwrap_err().len(), 4);
    }

    async fn setup(model: MockModel) -> (Arc<InMemoryStore>, Arc<MockModel>, RubricSynthesizer, Document) {
        let store = Arc::new(InMemoryStore::new());
        let doc = Document::new("Biology");
        store.insert_document(&doc).await.unwrap();
        store
            .insert_chunk(&Chunk {
                id: "c0".into(),
                document_id: doc.id.clone(),
                source: "bio.txt".into(),
                ordinal: 0,
                sequence: 0,
                text: "Cells divide by mitosis.".into(),
                hash: String::new(),
                embedding: vec![1.0],
            })
            .await
            .unwrap();
        store.mark_document_processed(&doc.id).await.unwrap();

        let model = Arc::new(model);
        let summaries = SummarySynthesizer::new(store.clone(), model.clone(), SamplingParams::default());
        let synth = RubricSynthesizer::new(store.clone(), model.clone(), summaries);
        (store, model, synth, doc)
    }

    #[tokio::test]
    async fn test_incomplete_concept_is_skipped_and_summary_generated() {
        let model = MockModel::new()
            .with_completion("Summarize the following", "## Cells\n- mitosis")
            .with_completion("Extract the key concepts", CONCEPTS)
            .with_completion("four-level rubric", LEVELS);
        let (store, model, synth, doc) = setup(model).await;

        let report = synth.synthesize(&doc.id).await.unwrap();
        assert!(report.summary_generated);
        assert_eq!(report.concepts_extracted, 2);
        assert_eq!(report.rubrics.len(), 2);
        // summary + extraction + two rubric calls
        assert_eq!(model.completion_requests().len(), 4);

        let stored = store.list_rubrics(&doc.id).await.unwrap();
        let names: Vec<&str> = stored.iter().map(|r| r.concept.as_str()).collect();
        assert_eq!(names, vec!["Cell membrane", "Mitosis"]);
        assert!(store.get_summary(&doc.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rubric_missing_level_is_discarded() {
        let model = MockModel::new()
            .with_completion("Extract the key concepts", CONCEPTS)
            .with_completion(
                "concept \"Mitosis\"",
                r#"{"beginner": "b", "developing": "d", "proficient": "p"}"#,
            )
            .with_completion("four-level rubric", LEVELS);
        let (store, _model, synth, doc) = setup(model).await;
        store.insert_summary(&Summary::new(&doc.id, "existing")).await.unwrap();

        let report = synth.synthesize(&doc.id).await.unwrap();
        assert!(!report.summary_generated);
        assert_eq!(report.rubrics.len(), 1);
        assert_eq!(report.rubrics[0].concept, "Cell membrane");
        assert_eq!(report.warnings, vec!["Mitosis: rubric missing levels mastery"]);
    }

    #[tokio::test]
    async fn test_no_rubrics_fails() {
        let model = MockModel::new()
            .with_completion("Extract the key concepts", CONCEPTS)
            .with_completion("four-level rubric", "I can't do that.");
        let (store, _model, synth, doc) = setup(model).await;
        store.insert_summary(&Summary::new(&doc.id, "existing")).await.unwrap();

        let err = synth.synthesize(&doc.id).await.unwrap_err();
        assert!(matches!(err, PipelineError::Capability { .. }));
        assert_eq!(err.reasons().len(), 2);
        assert!(store.list_rubrics(&doc.id).await.unwrap().is_empty());
    }
}
