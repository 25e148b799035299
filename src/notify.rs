//! Completion and failure events for dialogue turns and evaluations.
//!
//! The pipeline emits each outcome as a discrete event to a [`Notifier`].
//! How events are delivered is up to the implementation:
//! [`TracingNotifier`] logs them, [`ChannelNotifier`] forwards them over a
//! tokio channel to whoever holds the receiver.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use socratic_harness_core::dialogue::DialogueTurn;
use socratic_harness_core::models::GradeReport;

/// Overall score below which a completed evaluation is flagged.
pub const LOW_PERFORMANCE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvaluationStatus {
    Completed {
        report: GradeReport,
        low_performance: bool,
    },
    Failed {
        reasons: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationEvent {
    pub conversation_id: String,
    #[serde(flatten)]
    pub status: EvaluationStatus,
}

impl EvaluationEvent {
    pub fn completed(report: GradeReport) -> Self {
        Self {
            conversation_id: report.conversation_id.clone(),
            status: EvaluationStatus::Completed {
                low_performance: report.overall_score < LOW_PERFORMANCE_THRESHOLD,
                report,
            },
        }
    }

    pub fn failed(conversation_id: &str, reasons: Vec<String>) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            status: EvaluationStatus::Failed { reasons },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DialogueStatus {
    Replied { turn: DialogueTurn },
    Failed { reasons: Vec<String> },
}

#[derive(Debug, Clone, Serialize)]
pub struct DialogueEvent {
    pub conversation_id: String,
    #[serde(flatten)]
    pub status: DialogueStatus,
}

/// Any event the pipeline emits.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    Evaluation(EvaluationEvent),
    Dialogue(DialogueEvent),
}

/// Receives pipeline events. Implementations must not fail the caller.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: PipelineEvent);
}

/// Logs events through `tracing`.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: PipelineEvent) {
        match &event {
            PipelineEvent::Evaluation(e) => match &e.status {
                EvaluationStatus::Completed {
                    report,
                    low_performance,
                } => info!(
                    conversation_id = %e.conversation_id,
                    overall = report.overall_score,
                    low_performance,
                    "evaluation complete"
                ),
                EvaluationStatus::Failed { reasons } => warn!(
                    conversation_id = %e.conversation_id,
                    reasons = %reasons.join("; "),
                    "evaluation failed"
                ),
            },
            PipelineEvent::Dialogue(e) => match &e.status {
                DialogueStatus::Replied { turn } => info!(
                    conversation_id = %e.conversation_id,
                    message_id = %turn.message.id,
                    confidence = turn.confidence,
                    "evaluator replied"
                ),
                DialogueStatus::Failed { reasons } => warn!(
                    conversation_id = %e.conversation_id,
                    reasons = %reasons.join("; "),
                    "evaluator reply failed"
                ),
            },
        }
    }
}

/// Forwards events to an unbounded tokio channel.
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: PipelineEvent) {
        // A dropped receiver means nobody is listening.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use indexmap::IndexMap;

    fn report(score: f64) -> GradeReport {
        GradeReport {
            id: "r1".into(),
            conversation_id: "c1".into(),
            overall_score: score,
            detailed_scores: IndexMap::new(),
            feedback: String::new(),
            recommendations: vec![],
            strengths: vec![],
            weaknesses: vec![],
            evaluated_at: Utc::now(),
        }
    }

    #[test]
    fn test_low_performance_flag() {
        let low = EvaluationEvent::completed(report(0.45));
        assert!(matches!(
            low.status,
            EvaluationStatus::Completed {
                low_performance: true,
                ..
            }
        ));
        let ok = EvaluationEvent::completed(report(0.5));
        assert!(matches!(
            ok.status,
            EvaluationStatus::Completed {
                low_performance: false,
                ..
            }
        ));
    }

    #[test]
    fn test_event_json_shape() {
        let event = PipelineEvent::Evaluation(EvaluationEvent::failed("c9", vec!["boom".into()]));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "evaluation");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["conversation_id"], "c9");
        assert_eq!(json["reasons"][0], "boom");
    }

    #[tokio::test]
    async fn test_channel_notifier_delivers() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.notify(PipelineEvent::Evaluation(EvaluationEvent::failed(
            "c1",
            vec!["x".into()],
        )));
        match rx.recv().await {
            Some(PipelineEvent::Evaluation(e)) => assert_eq!(e.conversation_id, "c1"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
