//! Units of work over one document or one conversation.
//!
//! [`Pipeline`] wires the core components to a store, a language model and
//! a [`Notifier`]. Each method is one independently triggerable unit of
//! work; none of them keeps state between calls.
//!
//! Dialogue turns and evaluations report their outcome to the notifier.
//! A failed dialogue turn yields a fixed apology for the learner instead of
//! an error; that apology is never persisted.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use socratic_harness_core::capability::LanguageModel;
use socratic_harness_core::chunk::{ChunkingParams, TextChunker};
use socratic_harness_core::dialogue::{DialogueParams, DialogueResponder, DialogueTurn};
use socratic_harness_core::error::{PipelineError, Result};
use socratic_harness_core::grader::{ConversationGrader, EvaluationOutcome};
use socratic_harness_core::index::{DocumentIndexer, IndexReport, TextExtractor};
use socratic_harness_core::models::{
    Conversation, Document, MisconceptionPattern, Role, Rubric, SourceFile, Summary,
};
use socratic_harness_core::retrieve::{ContextRetriever, RetrievalParams, RetrievedContext};
use socratic_harness_core::rubric::{RubricSynthesisReport, RubricSynthesizer};
use socratic_harness_core::store::Store;
use socratic_harness_core::summary::{SamplingParams, SummaryReport, SummarySynthesizer};

use crate::config::Config;
use crate::extract::FileExtractor;
use crate::notify::{
    DialogueEvent, DialogueStatus, EvaluationEvent, Notifier, PipelineEvent, TracingNotifier,
};

/// Shown to the learner when no evaluator reply could be generated.
pub const ERROR_TURN: &str = "I apologize, but I encountered an error while processing your \
message. Please try again, or contact your instructor if the problem persists.";

/// Component parameters, decoupled from the TOML layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineSettings {
    pub chunking: ChunkingParams,
    pub retrieval: RetrievalParams,
    pub dialogue: DialogueParams,
    pub sampling: SamplingParams,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            chunking: config.chunking_params(),
            retrieval: config.retrieval_params(),
            dialogue: config.dialogue_params(),
            sampling: config.sampling_params(),
        }
    }
}

/// The evaluator's answer to a learner message as shown to the learner.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub content: String,
    /// Present when a reply was generated and stored.
    pub turn: Option<DialogueTurn>,
    /// Why generation failed, when it did.
    pub reasons: Vec<String>,
}

impl Reply {
    pub fn is_error(&self) -> bool {
        self.turn.is_none()
    }
}

/// A document with what has been derived from it so far.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentOverview {
    pub document: Document,
    pub chunks: usize,
    pub summary: Option<Summary>,
    pub rubrics: Vec<Rubric>,
    pub misconceptions: Vec<MisconceptionPattern>,
}

pub struct Pipeline {
    store: Arc<dyn Store>,
    model: Arc<dyn LanguageModel>,
    notifier: Arc<dyn Notifier>,
    extractor: Arc<dyn TextExtractor>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Store>,
        model: Arc<dyn LanguageModel>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            model,
            notifier: Arc::new(TracingNotifier),
            extractor: Arc::new(FileExtractor),
            settings,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn retriever(&self) -> ContextRetriever {
        ContextRetriever::new(
            self.store.clone(),
            self.model.clone(),
            self.settings.retrieval,
        )
    }

    fn summarizer(&self) -> SummarySynthesizer {
        SummarySynthesizer::new(
            self.store.clone(),
            self.model.clone(),
            self.settings.sampling,
        )
    }

    async fn require_document(&self, document_id: &str) -> Result<Document> {
        self.store
            .get_document(document_id)
            .await?
            .ok_or_else(|| PipelineError::input(format!("document {} not found", document_id)))
    }

    // ============ Documents ============

    pub async fn create_document(&self, title: &str) -> Result<Document> {
        if title.trim().is_empty() {
            return Err(PipelineError::input("document title must not be blank"));
        }
        let document = Document::new(title.trim());
        self.store.insert_document(&document).await?;
        info!(document_id = %document.id, title = %document.title, "document created");
        Ok(document)
    }

    /// Extract, chunk and embed the files of a document.
    pub async fn index_document(
        &self,
        document_id: &str,
        files: &[SourceFile],
    ) -> Result<IndexReport> {
        let indexer = DocumentIndexer::new(
            self.store.clone(),
            self.model.clone(),
            self.extractor.clone(),
            TextChunker::new(self.settings.chunking),
        );
        indexer.index(document_id, files).await
    }

    pub async fn document(&self, document_id: &str) -> Result<DocumentOverview> {
        let document = self.require_document(document_id).await?;
        Ok(DocumentOverview {
            chunks: self.store.list_chunks(document_id).await?.len(),
            summary: self.store.get_summary(document_id).await?,
            rubrics: self.store.list_rubrics(document_id).await?,
            misconceptions: self.store.list_misconceptions(document_id).await?,
            document,
        })
    }

    pub async fn summarize(&self, document_id: &str) -> Result<SummaryReport> {
        self.summarizer().synthesize(document_id).await
    }

    pub async fn generate_rubrics(&self, document_id: &str) -> Result<RubricSynthesisReport> {
        RubricSynthesizer::new(self.store.clone(), self.model.clone(), self.summarizer())
            .synthesize(document_id)
            .await
    }

    pub async fn rubrics(&self, document_id: &str) -> Result<Vec<Rubric>> {
        self.require_document(document_id).await?;
        Ok(self.store.list_rubrics(document_id).await?)
    }

    /// Register a known misconception for a document.
    pub async fn add_misconception(&self, pattern: MisconceptionPattern) -> Result<()> {
        self.require_document(&pattern.document_id).await?;
        if pattern.name.trim().is_empty() {
            return Err(PipelineError::input("misconception name must not be blank"));
        }
        if pattern.signal_phrases.iter().all(|p| p.trim().is_empty()) {
            return Err(PipelineError::input(
                "misconception needs at least one signal phrase",
            ));
        }
        self.store.insert_misconception(&pattern).await?;
        Ok(())
    }

    pub async fn retrieve(&self, document_id: &str, query: &str) -> Result<RetrievedContext> {
        self.require_document(document_id).await?;
        self.retriever().retrieve(query, document_id).await
    }

    // ============ Conversations ============

    pub async fn start_conversation(&self, document_id: &str) -> Result<Conversation> {
        self.require_document(document_id).await?;
        let conversation = Conversation::new(document_id);
        self.store.insert_conversation(&conversation).await?;
        info!(conversation_id = %conversation.id, document_id, "conversation started");
        Ok(conversation)
    }

    /// Record a learner message and generate the evaluator's reply.
    pub async fn say(&self, conversation_id: &str, content: &str) -> Result<Reply> {
        if content.trim().is_empty() {
            return Err(PipelineError::input("message must not be blank"));
        }
        if self.store.get_conversation(conversation_id).await?.is_none() {
            return Err(PipelineError::input(format!(
                "conversation {} not found",
                conversation_id
            )));
        }
        let message = self
            .store
            .append_message(conversation_id, Role::Learner, content)
            .await?;
        Ok(self.respond_to(conversation_id, &message.id).await)
    }

    /// Generate the evaluator reply to an existing learner message.
    ///
    /// Never fails: problems produce [`ERROR_TURN`] and a failed
    /// [`DialogueEvent`].
    pub async fn respond_to(&self, conversation_id: &str, message_id: &str) -> Reply {
        let responder = DialogueResponder::new(
            self.store.clone(),
            self.model.clone(),
            self.retriever(),
            self.settings.dialogue,
        );

        let (reply, status) = match responder.respond(conversation_id, message_id).await {
            Ok(turn) => (
                Reply {
                    content: turn.message.content.clone(),
                    turn: Some(turn.clone()),
                    reasons: Vec::new(),
                },
                DialogueStatus::Replied { turn },
            ),
            Err(e) => {
                let reasons = e.reasons();
                warn!(conversation_id, message_id, error = %e, "substituting error turn");
                (
                    Reply {
                        content: ERROR_TURN.to_string(),
                        turn: None,
                        reasons: reasons.clone(),
                    },
                    DialogueStatus::Failed { reasons },
                )
            }
        };

        self.notifier.notify(PipelineEvent::Dialogue(DialogueEvent {
            conversation_id: conversation_id.to_string(),
            status,
        }));
        reply
    }

    /// Clear a conversation's in-flight evaluation marker, e.g. one left
    /// behind by a process that exited mid-evaluation.
    pub async fn reset_evaluation(&self, conversation_id: &str) -> Result<()> {
        self.store.end_evaluation(conversation_id).await?;
        warn!(conversation_id, "evaluation marker reset");
        Ok(())
    }

    /// Grade a conversation against its document's rubrics.
    pub async fn evaluate(&self, conversation_id: &str) -> Result<EvaluationOutcome> {
        let grader = ConversationGrader::new(self.store.clone(), self.model.clone());
        let result = grader.evaluate(conversation_id).await;

        let event = match &result {
            Ok(outcome) => EvaluationEvent::completed(outcome.report.clone()),
            Err(e) => EvaluationEvent::failed(conversation_id, e.reasons()),
        };
        self.notifier.notify(PipelineEvent::Evaluation(event));
        result
    }
}
