//! End-to-end conversation evaluation.
//!
//! Transcript and rubrics → [`ConversationAnalyzer`] → [`ConceptEvaluator`]
//! per rubric → [`GradeAggregator`] → stored [`GradeReport`].
//!
//! A per-conversation in-flight marker is set in the store before work
//! starts and cleared when it ends, whatever the outcome. A second
//! evaluation of the same conversation while the marker is set is refused.
//! The marker is held by an [`EvaluationGuard`], so an evaluation future
//! that is dropped before completion (timeout, cancellation) still releases
//! it on the current Tokio runtime.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::analysis::{ConversationAnalysis, ConversationAnalyzer};
use crate::capability::LanguageModel;
use crate::error::{PipelineError, Precondition, Result};
use crate::evaluate::ConceptEvaluator;
use crate::grade::GradeAggregator;
use crate::models::{GradeReport, Message, Rubric};
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationOutcome {
    pub report: GradeReport,
    pub analysis: ConversationAnalysis,
    /// Concepts that were scored with the fallback evaluation, and why.
    pub warnings: Vec<String>,
}

pub struct ConversationGrader {
    store: Arc<dyn Store>,
    analyzer: ConversationAnalyzer,
    evaluator: ConceptEvaluator,
    aggregator: GradeAggregator,
}

impl ConversationGrader {
    pub fn new(store: Arc<dyn Store>, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            analyzer: ConversationAnalyzer::new(store.clone(), model.clone()),
            evaluator: ConceptEvaluator::new(model),
            aggregator: GradeAggregator::new(),
            store,
        }
    }

    pub async fn evaluate(&self, conversation_id: &str) -> Result<EvaluationOutcome> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| {
                PipelineError::input(format!("conversation {} not found", conversation_id))
            })?;

        let transcript = self.store.list_messages(conversation_id).await?;
        if !transcript.iter().any(Message::is_learner) {
            return Err(PipelineError::input(format!(
                "conversation {} has no learner messages to evaluate",
                conversation_id
            )));
        }
        let rubrics = self.store.list_rubrics(&conversation.document_id).await?;
        if rubrics.is_empty() {
            return Err(PipelineError::input(format!(
                "no rubrics defined for document {}",
                conversation.document_id
            )));
        }

        if !self.store.begin_evaluation(conversation_id).await? {
            return Err(Precondition::EvaluationInProgress(conversation_id.to_string()).into());
        }
        let guard = EvaluationGuard::new(self.store.clone(), conversation_id);

        let result = self
            .run(conversation_id, &conversation.document_id, &transcript, &rubrics)
            .await;

        guard.release().await;
        result
    }

    async fn run(
        &self,
        conversation_id: &str,
        document_id: &str,
        transcript: &[Message],
        rubrics: &[Rubric],
    ) -> Result<EvaluationOutcome> {
        info!(conversation_id, rubrics = rubrics.len(), "starting evaluation");

        let patterns = self.store.list_misconceptions(document_id).await?;
        let analysis = self.analyzer.analyze_transcript(transcript, &patterns).await;

        let learner: Vec<&str> = transcript
            .iter()
            .filter(|m| m.is_learner())
            .map(|m| m.content.as_str())
            .collect();

        let mut evaluations = Vec::with_capacity(rubrics.len());
        let mut warnings = Vec::new();
        for rubric in rubrics {
            let outcome = self.evaluator.evaluate(rubric, &learner, &analysis).await;
            warnings.extend(outcome.warning);
            evaluations.push(outcome.evaluation);
        }

        let report = self
            .aggregator
            .aggregate(conversation_id, &evaluations, &analysis)?;
        self.store.insert_report(&report).await?;

        info!(
            conversation_id,
            report_id = %report.id,
            overall = report.overall_score,
            fallbacks = warnings.len(),
            "evaluation completed"
        );
        Ok(EvaluationOutcome {
            report,
            analysis,
            warnings,
        })
    }
}

/// Owns a set in-flight marker and clears it exactly once.
///
/// [`release`](Self::release) clears it inline. If the guard is dropped
/// without being released, the clear is spawned onto the current runtime.
struct EvaluationGuard {
    store: Arc<dyn Store>,
    conversation_id: String,
    released: bool,
}

impl EvaluationGuard {
    fn new(store: Arc<dyn Store>, conversation_id: &str) -> Self {
        Self {
            store,
            conversation_id: conversation_id.to_string(),
            released: false,
        }
    }

    async fn release(mut self) {
        let cleared = self.store.end_evaluation(&self.conversation_id).await;
        self.released = true;
        if let Err(e) = cleared {
            warn!(conversation_id = %self.conversation_id, error = %e, "failed to clear evaluation marker");
        }
    }
}

impl Drop for EvaluationGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = self.store.clone();
        let conversation_id = std::mem::take(&mut self.conversation_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(conversation_id = %conversation_id, "evaluation abandoned, clearing marker");
                handle.spawn(async move {
                    if let Err(e) = store.end_evaluation(&conversation_id).await {
                        warn!(conversation_id = %conversation_id, error = %e, "failed to clear evaluation marker");
                    }
                });
            }
            Err(_) => {
                warn!(conversation_id = %conversation_id, "evaluation abandoned outside a runtime, marker left set");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Conversation, Document, Role, RubricLevels};
    use crate::store::memory::InMemoryStore;
    use crate::testing::MockModel;

    fn levels() -> RubricLevels {
        RubricLevels {
            beginner: "b".into(),
            developing: "d".into(),
            proficient: "p".into(),
            mastery: "m".into(),
        }
    }

    async fn setup(rubrics: &[&str]) -> (Arc<InMemoryStore>, Conversation) {
        let store = Arc::new(InMemoryStore::new());
        let doc = Document::new("Calculus");
        store.insert_document(&doc).await.unwrap();
        for concept in rubrics {
            store
                .insert_rubric(&Rubric::new(&doc.id, *concept, levels()))
                .await
                .unwrap();
        }
        let conv = Conversation::new(&doc.id);
        store.insert_conversation(&conv).await.unwrap();
        (store, conv)
    }

    #[tokio::test]
    async fn test_evaluate_stores_report_and_clears_marker() {
        let (store, conv) = setup(&["Limits", "Derivatives"]).await;
        store
            .append_message(&conv.id, Role::Learner, "Limits describe approach.")
            .await
            .unwrap();
        let model = MockModel::new()
            .with_completion("\"Limits\"", r#"{"level": "proficient", "score": 0.8, "feedback": "ok"}"#)
            .with_completion("\"Derivatives\"", "garbage");
        let grader = ConversationGrader::new(store.clone(), Arc::new(model));

        let outcome = grader.evaluate(&conv.id).await.unwrap();
        assert_eq!(outcome.report.overall_score, 0.525);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(store.list_reports(&conv.id).await.unwrap().len(), 1);
        assert!(store.begin_evaluation(&conv.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_in_flight_evaluation_is_refused() {
        let (store, conv) = setup(&["Limits"]).await;
        store
            .append_message(&conv.id, Role::Learner, "hello")
            .await
            .unwrap();
        store.begin_evaluation(&conv.id).await.unwrap();
        let grader = ConversationGrader::new(store.clone(), Arc::new(MockModel::new()));
        let err = grader.evaluate(&conv.id).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Precondition(Precondition::EvaluationInProgress(_))
        ));
        assert!(store.list_reports(&conv.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_rubrics_or_messages_fail_fast() {
        let (store, conv) = setup(&[]).await;
        store
            .append_message(&conv.id, Role::Learner, "hello")
            .await
            .unwrap();
        let grader = ConversationGrader::new(store.clone(), Arc::new(MockModel::new()));
        let err = grader.evaluate(&conv.id).await.unwrap_err();
        assert!(matches!(err, PipelineError::Input { .. }));
        assert!(store.begin_evaluation(&conv.id).await.unwrap());

        let (store, conv) = setup(&["Limits"]).await;
        let grader = ConversationGrader::new(store.clone(), Arc::new(MockModel::new()));
        assert!(matches!(
            grader.evaluate(&conv.id).await.unwrap_err(),
            PipelineError::Input { .. }
        ));
    }

    struct StalledModel;

    #[async_trait::async_trait]
    impl LanguageModel for StalledModel {
        fn model_name(&self) -> &str {
            "stalled"
        }

        fn dims(&self) -> usize {
            8
        }

        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            std::future::pending().await
        }

        async fn complete(&self, _messages: &[crate::capability::ChatMessage]) -> anyhow::Result<String> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_abandoned_evaluation_releases_marker() {
        let (store, conv) = setup(&["Limits"]).await;
        store
            .append_message(&conv.id, Role::Learner, "Limits describe approach.")
            .await
            .unwrap();

        let stalled = ConversationGrader::new(store.clone(), Arc::new(StalledModel));
        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            stalled.evaluate(&conv.id),
        )
        .await;
        assert!(abandoned.is_err());

        // Let the spawned clear run.
        tokio::task::yield_now().await;

        let model = MockModel::new().with_completion(
            "\"Limits\"",
            r#"{"level": "proficient", "score": 0.8, "feedback": "ok"}"#,
        );
        let grader = ConversationGrader::new(store.clone(), Arc::new(model));
        let outcome = grader.evaluate(&conv.id).await.unwrap();
        assert_eq!(outcome.report.overall_score, 0.8);
    }
}
