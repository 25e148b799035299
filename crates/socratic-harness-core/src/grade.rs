//! Aggregation of concept evaluations into a grade report.

use chrono::Utc;
use indexmap::IndexMap;

use crate::analysis::ConversationAnalysis;
use crate::dialogue::round_to;
use crate::error::{PipelineError, Result};
use crate::models::{performance_band, ConceptEvaluation, ConceptScore, GradeReport};

/// Concepts scoring at least this much are strengths.
pub const STRENGTH_THRESHOLD: f64 = 0.7;

/// Concepts scoring below this are weaknesses.
pub const WEAKNESS_THRESHOLD: f64 = 0.5;

pub const FOUNDATIONS_RECOMMENDATION: &str =
    "Consider reviewing foundational concepts before advancing to new material.";

pub const MISCONCEPTION_REMARK: &str =
    "Some conceptual areas may benefit from additional clarification.";

/// Builds [`GradeReport`]s. Stateless; persists nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct GradeAggregator;

impl GradeAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Combine evaluations, keyed by concept, into a new report.
    ///
    /// A concept evaluated twice keeps its first position and its last
    /// result. Fails when `evaluations` is empty.
    pub fn aggregate(
        &self,
        conversation_id: &str,
        evaluations: &[ConceptEvaluation],
        analysis: &ConversationAnalysis,
    ) -> Result<GradeReport> {
        let mut by_concept: IndexMap<String, &ConceptEvaluation> = IndexMap::new();
        for evaluation in evaluations {
            by_concept.insert(evaluation.concept.clone(), evaluation);
        }
        if by_concept.is_empty() {
            return Err(PipelineError::input(format!(
                "no concepts were evaluated for conversation {}",
                conversation_id
            )));
        }

        let mean = by_concept.values().map(|e| e.score).sum::<f64>() / by_concept.len() as f64;
        let overall_score = round_to(mean, 3);

        let strengths: Vec<String> = by_concept
            .iter()
            .filter(|(_, e)| e.score >= STRENGTH_THRESHOLD)
            .map(|(c, _)| c.clone())
            .collect();
        let weaknesses: Vec<String> = by_concept
            .iter()
            .filter(|(_, e)| e.score < WEAKNESS_THRESHOLD)
            .map(|(c, _)| c.clone())
            .collect();

        let mut recommendations: Vec<String> = weaknesses
            .iter()
            .filter_map(|c| {
                let feedback = by_concept.get(c)?.feedback.trim();
                (!feedback.is_empty()).then(|| format!("{}: {}", c, feedback))
            })
            .collect();
        if weaknesses.len() * 2 > by_concept.len() {
            recommendations.push(FOUNDATIONS_RECOMMENDATION.to_string());
        }

        let mut feedback = vec![assessment_summary(overall_score, &strengths, &weaknesses)];
        if let Some(remark) = analysis.progression.trend.remark() {
            feedback.push(remark.to_string());
        }
        if analysis.misconceptions.count() > 0 {
            feedback.push(MISCONCEPTION_REMARK.to_string());
        }

        let detailed_scores = by_concept
            .iter()
            .map(|(c, e)| {
                (
                    c.clone(),
                    ConceptScore {
                        level: e.level,
                        score: e.score,
                        evidence: e.evidence.clone(),
                        feedback: e.feedback.clone(),
                    },
                )
            })
            .collect();

        Ok(GradeReport {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            overall_score,
            detailed_scores,
            feedback: feedback.join(" "),
            recommendations,
            strengths,
            weaknesses,
            evaluated_at: Utc::now(),
        })
    }
}

fn assessment_summary(score: f64, strengths: &[String], weaknesses: &[String]) -> String {
    let mut summary = format!(
        "Overall performance: {} ({}%).",
        performance_band(score),
        (score * 100.0).round()
    );
    if !strengths.is_empty() {
        summary.push_str(&format!(
            " Strong understanding demonstrated in: {}.",
            strengths.join(", ")
        ));
    }
    if !weaknesses.is_empty() {
        summary.push_str(&format!(
            " Areas needing attention: {}.",
            weaknesses.join(", ")
        ));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{
        MisconceptionMatch, MisconceptionReport, Progression, ThemeSummary, Trend,
    };
    use crate::models::ProficiencyLevel;

    fn eval(concept: &str, score: f64, feedback: &str) -> ConceptEvaluation {
        ConceptEvaluation {
            concept: concept.into(),
            level: ProficiencyLevel::from_score(score),
            score,
            evidence: String::new(),
            feedback: feedback.into(),
            confidence: 0.5,
        }
    }

    fn analysis(trend: Trend, misconceptions: usize) -> ConversationAnalysis {
        let mut progression = Progression::insufficient();
        progression.trend = trend;
        let matched = (0..misconceptions)
            .map(|i| MisconceptionMatch {
                pattern_id: i.to_string(),
                name: "n".into(),
                concept: "c".into(),
                phrase: "p".into(),
                excerpt: "e".into(),
                recommended_followups: vec![],
                suggested_followup: None,
            })
            .collect();
        ConversationAnalysis {
            learner_messages: 3,
            evaluator_messages: 2,
            learner_chars: 100,
            themes: ThemeSummary::default(),
            progression,
            misconceptions: MisconceptionReport {
                repeated_themes: vec![],
                matched,
            },
        }
    }

    #[test]
    fn test_overall_is_rounded_mean() {
        let evals = vec![eval("A", 0.95, ""), eval("B", 0.55, ""), eval("C", 0.25, "")];
        let report = GradeAggregator::new()
            .aggregate("conv", &evals, &analysis(Trend::Stable, 0))
            .unwrap();
        assert_eq!(report.overall_score, 0.583);
        assert_eq!(report.strengths, vec!["A"]);
        assert_eq!(report.weaknesses, vec!["C"]);
        assert_eq!(report.detailed_scores.len(), 3);
        assert_eq!(
            report.detailed_scores.keys().collect::<Vec<_>>(),
            vec!["A", "B", "C"]
        );
    }

    #[test]
    fn test_feedback_and_recommendations() {
        let evals = vec![
            eval("Limits", 0.25, "Revisit the formal definition."),
            eval("Continuity", 0.3, "Practice with piecewise functions."),
            eval("Derivatives", 0.95, "Excellent."),
        ];
        let report = GradeAggregator::new()
            .aggregate("conv", &evals, &analysis(Trend::StrongImprovement, 1))
            .unwrap();
        assert_eq!(
            report.feedback,
            "Overall performance: fair (50%). Strong understanding demonstrated in: Derivatives. \
Areas needing attention: Limits, Continuity. Great progress shown throughout the conversation! \
Some conceptual areas may benefit from additional clarification."
        );
        assert_eq!(
            report.recommendations,
            vec![
                "Limits: Revisit the formal definition.",
                "Continuity: Practice with piecewise functions.",
                FOUNDATIONS_RECOMMENDATION,
            ]
        );
        assert!(report.needs_attention());
    }

    #[test]
    fn test_no_generic_recommendation_at_exactly_half() {
        let evals = vec![eval("A", 0.2, "x"), eval("B", 0.9, "y")];
        let report = GradeAggregator::new()
            .aggregate("conv", &evals, &analysis(Trend::Stable, 0))
            .unwrap();
        assert_eq!(report.recommendations, vec!["A: x"]);
        assert_eq!(report.feedback.matches("Overall performance").count(), 1);
    }

    #[test]
    fn test_empty_evaluations_fail() {
        let err = GradeAggregator::new()
            .aggregate("conv", &[], &analysis(Trend::Stable, 0))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Input { .. }));
    }

    #[test]
    fn test_aggregate_is_deterministic() {
        let evals = vec![eval("A", 0.8, "a"), eval("B", 0.45, "b")];
        let a = GradeAggregator::new()
            .aggregate("conv", &evals, &analysis(Trend::ConcerningDecline, 0))
            .unwrap();
        let b = GradeAggregator::new()
            .aggregate("conv", &evals, &analysis(Trend::ConcerningDecline, 0))
            .unwrap();
        assert_eq!(a.overall_score, b.overall_score);
        assert_eq!(a.detailed_scores, b.detailed_scores);
        assert_eq!(a.feedback, b.feedback);
        assert_eq!(a.recommendations, b.recommendations);
        assert!(a.feedback.ends_with("Consider taking a break and reviewing earlier concepts."));
    }
}
