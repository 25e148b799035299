//! Per-rubric concept evaluation.
//!
//! The evaluator never fails: a model error, an empty reply or output that
//! cannot be read as an evaluation all yield
//! [`ConceptEvaluation::fallback`], with the problem kept as a warning.
//!
//! Scores follow one scale, `[0, 1]`. A model score inside that range is
//! used as given; otherwise the score comes from the canonical level table
//! (advanced 0.95, proficient 0.75, developing 0.55, novice 0.25, unknown
//! 0.0). A valid score paired with an unknown level takes the nearest level.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::analysis::ConversationAnalysis;
use crate::capability::LanguageModel;
use crate::models::{ConceptEvaluation, ProficiencyLevel, Rubric};
use crate::prompts::{self, EvaluationContext};
use crate::structured::decode_object;
use crate::text::{char_len, words};

/// Result of evaluating one rubric.
#[derive(Debug, Clone, PartialEq)]
pub struct ConceptOutcome {
    pub evaluation: ConceptEvaluation,
    /// Why the fallback was used, if it was.
    pub warning: Option<String>,
}

impl ConceptOutcome {
    pub fn is_fallback(&self) -> bool {
        self.warning.is_some()
    }
}

pub struct ConceptEvaluator {
    model: Arc<dyn LanguageModel>,
}

impl ConceptEvaluator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Score `rubric` against the learner messages of a transcript.
    pub async fn evaluate(
        &self,
        rubric: &Rubric,
        learner_messages: &[&str],
        analysis: &ConversationAnalysis,
    ) -> ConceptOutcome {
        let evidence = concept_evidence(&rubric.concept, learner_messages);
        let context = EvaluationContext {
            learner_messages: analysis.learner_messages,
            trend: analysis.progression.trend.as_str(),
        };
        let request = prompts::concept_evaluation(rubric, &evidence, &context);

        let raw = match self.model.complete(&request).await {
            Ok(raw) if !raw.trim().is_empty() => raw,
            Ok(_) => return fallback(&rubric.concept, "model returned an empty response"),
            Err(e) => {
                return fallback(
                    &rubric.concept,
                    &format!("concept evaluation failed: {:#}", e),
                )
            }
        };

        match parse_evaluation(&rubric.concept, &raw) {
            Some(evaluation) => ConceptOutcome {
                evaluation,
                warning: None,
            },
            None => fallback(&rubric.concept, "could not parse the evaluation"),
        }
    }
}

fn fallback(concept: &str, reason: &str) -> ConceptOutcome {
    warn!(concept, reason, "using fallback concept evaluation");
    ConceptOutcome {
        evaluation: ConceptEvaluation::fallback(concept),
        warning: Some(format!("{}: {}", concept, reason)),
    }
}

/// Concept keywords: words of at least three characters.
pub fn concept_keywords(concept: &str) -> HashSet<String> {
    words(concept)
        .into_iter()
        .filter(|w| char_len(w) >= 3)
        .collect()
}

/// Learner messages sharing at least one word with the concept keywords.
pub fn concept_evidence<'a>(concept: &str, learner_messages: &[&'a str]) -> Vec<&'a str> {
    let keywords = concept_keywords(concept);
    learner_messages
        .iter()
        .copied()
        .filter(|m| words(m).iter().any(|w| keywords.contains(w)))
        .collect()
}

/// Read an evaluation out of raw model output. `None` means malformed.
pub fn parse_evaluation(concept: &str, raw: &str) -> Option<ConceptEvaluation> {
    let decoded = decode_object::<Value>(raw);
    if !decoded.ok {
        return None;
    }
    let obj = decoded.value.as_object()?;

    let label = obj.get("level").and_then(Value::as_str);
    let level = label.and_then(ProficiencyLevel::parse);
    let score = obj
        .get("score")
        .and_then(number)
        .filter(|s| (0.0..=1.0).contains(s));

    let (level, score) = match (level, score) {
        (Some(level), Some(score)) => (level, score),
        (Some(level), None) => (level, level.canonical_score()),
        (None, Some(score)) => (ProficiencyLevel::from_score(score), score),
        // An unrecognised label still maps through the level table.
        (None, None) if label.is_some() => {
            (ProficiencyLevel::Novice, ProficiencyLevel::score_for_label(label))
        }
        (None, None) => return None,
    };

    Some(ConceptEvaluation {
        concept: concept.to_string(),
        level,
        score,
        evidence: obj.get("evidence").map(text).unwrap_or_default(),
        feedback: obj.get("feedback").map(text).unwrap_or_default(),
        confidence: obj
            .get("confidence")
            .and_then(number)
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(0.0),
    })
}

fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("; "),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
