//! The language-model capability consumed by every pipeline component.
//!
//! A single [`LanguageModel`] object is injected into each component's
//! constructor; there is no process-wide client. Concrete HTTP backends
//! live in the `socratic-harness` app crate.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{Message, Role};

/// Role of a chat-completion message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message of a chat-completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatMessage {
    /// Learner turns become `user` messages, evaluator turns `assistant`.
    fn from(message: &Message) -> Self {
        match message.role {
            Role::Learner => ChatMessage::user(message.content.clone()),
            Role::Evaluator => ChatMessage::assistant(message.content.clone()),
        }
    }
}

/// Embedding and chat-completion capability.
///
/// Calls are treated as blocking and externally rate-limited; components
/// issue them sequentially within a unit of work.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Returns the chat model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Run a chat completion and return the assistant's text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// A model that refuses every call. Used when `[model] provider = "disabled"`.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("language model is disabled; set [model] provider in the config")
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        bail!("language model is disabled; set [model] provider in the config")
    }
}
