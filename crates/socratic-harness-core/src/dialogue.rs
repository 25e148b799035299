//! Socratic evaluator turns grounded in retrieved context.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::capability::{ChatMessage, LanguageModel};
use crate::error::{PipelineError, Precondition, Result};
use crate::models::{Message, Role};
use crate::prompts;
use crate::retrieve::ContextRetriever;
use crate::store::Store;
use crate::text::char_len;

#[derive(Debug, Clone, Copy)]
pub struct DialogueParams {
    /// Number of earlier messages replayed to the model.
    pub history_turns: usize,
}

impl Default for DialogueParams {
    fn default() -> Self {
        Self { history_turns: 6 }
    }
}

/// A generated evaluator message and how it was grounded.
#[derive(Debug, Clone, Serialize)]
pub struct DialogueTurn {
    pub message: Message,
    /// Heuristic confidence in `[0, 1]`, rounded to 2 decimals.
    pub confidence: f64,
    pub chunks_used: usize,
    pub rubrics_used: Vec<String>,
}

pub struct DialogueResponder {
    store: Arc<dyn Store>,
    model: Arc<dyn LanguageModel>,
    retriever: ContextRetriever,
    params: DialogueParams,
}

impl DialogueResponder {
    pub fn new(
        store: Arc<dyn Store>,
        model: Arc<dyn LanguageModel>,
        retriever: ContextRetriever,
        params: DialogueParams,
    ) -> Self {
        Self {
            store,
            model,
            retriever,
            params,
        }
    }

    /// Generate and persist the evaluator reply to a learner message.
    ///
    /// No message is created on failure.
    pub async fn respond(&self, conversation_id: &str, message_id: &str) -> Result<DialogueTurn> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| {
                PipelineError::input(format!("conversation {} not found", conversation_id))
            })?;

        let learner_message = match self.store.get_message(message_id).await? {
            Some(m) if m.conversation_id == conversation.id => m,
            _ => {
                return Err(PipelineError::input(format!(
                    "message {} not found in conversation {}",
                    message_id, conversation_id
                )))
            }
        };
        if !learner_message.is_learner() {
            return Err(Precondition::NotLearnerMessage(message_id.to_string()).into());
        }

        let document = self
            .store
            .get_document(&conversation.document_id)
            .await?
            .ok_or_else(|| {
                PipelineError::input(format!("document {} not found", conversation.document_id))
            })?;
        if !document.is_processed() {
            return Err(Precondition::DocumentNotProcessed(document.id).into());
        }

        let context = self
            .retriever
            .retrieve(&learner_message.content, &document.id)
            .await
            .map_err(|e| match e {
                PipelineError::Capability { reasons } => PipelineError::generation(reasons),
                other => other,
            })?;
        if context.chunks.is_empty() {
            return Err(PipelineError::generation(vec![format!(
                "no relevant material found for document {}",
                document.id
            )]));
        }

        let transcript = self.store.list_messages(conversation_id).await?;
        let history = recent_history(&transcript, &learner_message.id, self.params.history_turns);

        let chunk_refs: Vec<_> = context.chunks.iter().map(|m| &m.chunk).collect();
        let rubric_refs: Vec<_> = context.rubrics.iter().map(|r| &r.rubric).collect();
        let mut request = vec![ChatMessage::system(prompts::evaluator_system(
            &chunk_refs,
            &rubric_refs,
        ))];
        request.extend(history.iter().copied().map(ChatMessage::from));
        request.push(ChatMessage::from(&learner_message));

        info!(
            conversation_id,
            chunks = context.chunks.len(),
            rubrics = context.rubrics.len(),
            history = history.len(),
            "generating evaluator turn"
        );

        let reply = self.model.complete(&request).await.map_err(|e| {
            warn!(conversation_id, error = %e, "evaluator completion failed");
            PipelineError::generation(vec![format!("model call failed: {:#}", e)])
        })?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(PipelineError::generation(vec![
                "model returned an empty response".to_string(),
            ]));
        }

        let confidence =
            response_confidence(context.average_distance(), !context.rubrics.is_empty(), reply);
        let message = self
            .store
            .append_message(conversation_id, Role::Evaluator, reply)
            .await?;

        info!(conversation_id, confidence, "evaluator turn created");
        Ok(DialogueTurn {
            message,
            confidence,
            chunks_used: context.chunks.len(),
            rubrics_used: context
                .rubrics
                .iter()
                .map(|r| r.rubric.concept.clone())
                .collect(),
        })
    }
}

/// The last `limit` messages preceding `current_id` in transcript order.
fn recent_history<'a>(transcript: &'a [Message], current_id: &str, limit: usize) -> Vec<&'a Message> {
    let before: Vec<&Message> = transcript
        .iter()
        .take_while(|m| m.id != current_id)
        .collect();
    let skip = before.len().saturating_sub(limit);
    before.into_iter().skip(skip).collect()
}

/// Heuristic confidence of an evaluator reply.
///
/// Starts at 0.5, adds up to 0.3 for close context, 0.2 when rubrics were
/// matched, 0.1 for a question and 0.1 for a 50–300 character reply.
pub fn response_confidence(average_distance: Option<f64>, rubric_matched: bool, reply: &str) -> f64 {
    let mut score = 0.5;
    if let Some(d) = average_distance {
        score += (1.0 - d).max(0.0) * 0.3;
    }
    if rubric_matched {
        score += 0.2;
    }
    if reply.contains('?') {
        score += 0.1;
    }
    if (50..=300).contains(&char_len(reply)) {
        score += 0.1;
    }
    round_to(score.clamp(0.0, 1.0), 2)
}

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Conversation, Document, Rubric, RubricLevels};
    use crate::retrieve::RetrievalParams;
    use crate::store::memory::InMemoryStore;
    use crate::testing::MockModel;

    #[test]
    fn test_confidence_components() {
        let question = "What do you think happens to the slope as x grows larger and larger?";
        assert_eq!(response_confidence(Some(0.2), true, question), 1.0);
        assert_eq!(response_confidence(None, false, "ok"), 0.5);
        assert_eq!(response_confidence(Some(1.5), false, "Why?"), 0.6);
        assert_eq!(response_confidence(Some(0.5), false, "ok"), 0.65);
        let long = "a".repeat(301);
        assert_eq!(response_confidence(None, true, &long), 0.7);
    }

    #[test]
    fn test_recent_history_excludes_current_and_bounds() {
        let msgs: Vec<Message> = (0..9)
            .map(|i| Message {
                id: format!("m{}", i),
                conversation_id: "c".into(),
                role: if i % 2 == 0 { Role::Learner } else { Role::Evaluator },
                content: String::new(),
                created_at: chrono::Utc::now(),
                seq: i,
            })
            .collect();
        let history = recent_history(&msgs, "m8", 6);
        let ids: Vec<&str> = history.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3", "m4", "m5", "m6", "m7"]);
        assert!(recent_history(&msgs, "m0", 6).is_empty());
    }

    async fn setup(model: MockModel, processed: bool) -> (Arc<InMemoryStore>, DialogueResponder, Conversation) {
        let store = Arc::new(InMemoryStore::new());
        let doc = Document::new("Calculus");
        store.insert_document(&doc).await.unwrap();
        if processed {
            store.mark_document_processed(&doc.id).await.unwrap();
        }
        store
            .insert_chunk(&Chunk {
                id: "c0".into(),
                document_id: doc.id.clone(),
                source: "a.txt".into(),
                ordinal: 0,
                sequence: 0,
                text: "The derivative measures instantaneous rate of change.".into(),
                hash: String::new(),
                embedding: vec![1.0; 8],
            })
            .await
            .unwrap();
        store
            .insert_rubric(&Rubric::new(
                &doc.id,
                "Derivatives",
                RubricLevels {
                    beginner: "b".into(),
                    developing: "d".into(),
                    proficient: "p".into(),
                    mastery: "m".into(),
                },
            ))
            .await
            .unwrap();
        let conv = Conversation::new(&doc.id);
        store.insert_conversation(&conv).await.unwrap();

        let model: Arc<dyn LanguageModel> = Arc::new(model);
        let retriever = ContextRetriever::new(store.clone(), model.clone(), RetrievalParams::default());
        let responder =
            DialogueResponder::new(store.clone(), model, retriever, DialogueParams::default());
        (store, responder, conv)
    }

    #[tokio::test]
    async fn test_respond_creates_evaluator_message() {
        let model = MockModel::new()
            .with_default_completion("  How would you describe what a derivative measures?  ");
        let (store, responder, conv) = setup(model, true).await;
        let msg = store
            .append_message(&conv.id, Role::Learner, "I think derivatives are slopes")
            .await
            .unwrap();

        let turn = responder.respond(&conv.id, &msg.id).await.unwrap();
        assert_eq!(turn.message.role, Role::Evaluator);
        assert_eq!(
            turn.message.content,
            "How would you describe what a derivative measures?"
        );
        assert_eq!(turn.chunks_used, 1);
        assert_eq!(turn.rubrics_used, vec!["Derivatives"]);
        assert!(turn.confidence >= 0.8 && turn.confidence <= 1.0);
        assert_eq!(store.list_messages(&conv.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_blank_reply_creates_no_message() {
        let (store, responder, conv) = setup(MockModel::new().with_default_completion("   "), true).await;
        let msg = store
            .append_message(&conv.id, Role::Learner, "hello")
            .await
            .unwrap();
        let err = responder.respond(&conv.id, &msg.id).await.unwrap_err();
        assert!(matches!(err, PipelineError::Generation { .. }));
        assert_eq!(store.list_messages(&conv.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_evaluator_message_is_rejected() {
        let (store, responder, conv) = setup(MockModel::new(), true).await;
        let msg = store
            .append_message(&conv.id, Role::Evaluator, "Why?")
            .await
            .unwrap();
        let err = responder.respond(&conv.id, &msg.id).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Precondition(Precondition::NotLearnerMessage(_))
        ));
    }

    #[tokio::test]
    async fn test_unprocessed_document_is_rejected() {
        let (store, responder, conv) = setup(MockModel::new(), false).await;
        let msg = store
            .append_message(&conv.id, Role::Learner, "hello")
            .await
            .unwrap();
        let err = responder.respond(&conv.id, &msg.id).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Precondition(Precondition::DocumentNotProcessed(_))
        ));
    }
}
