//! Testing utilities including a scriptable mock model.
//!
//! [`MockModel`] lets tests drive every pipeline component without network
//! calls: embeddings are deterministic, completions are chosen by substring
//! rules, and every call is recorded for assertions.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::capability::{ChatMessage, LanguageModel};

/// Record of a call made to the mock model.
#[derive(Debug, Clone)]
pub enum MockCall {
    Embed { text: String },
    Complete { messages: Vec<ChatMessage> },
}

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

/// A mock [`LanguageModel`] for testing.
///
/// Completion rules are checked in insertion order against the
/// concatenated content of all request messages; the first rule whose
/// needle is contained wins. Unmatched requests get the default reply
/// (an empty string unless set).
pub struct MockModel {
    dims: usize,
    embeddings: RwLock<HashMap<String, Vec<f32>>>,
    embed_failures: RwLock<Vec<String>>,
    rules: RwLock<Vec<(String, Reply)>>,
    default_reply: RwLock<Reply>,
    calls: RwLock<Vec<MockCall>>,
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockModel {
    /// Create a mock with 8-dimensional embeddings and empty completions.
    pub fn new() -> Self {
        Self {
            dims: 8,
            embeddings: RwLock::new(HashMap::new()),
            embed_failures: RwLock::new(Vec::new()),
            rules: RwLock::new(Vec::new()),
            default_reply: RwLock::new(Reply::Text(String::new())),
            calls: RwLock::new(Vec::new()),
        }
    }

    pub fn with_dims(mut self, dims: usize) -> Self {
        self.dims = dims;
        self
    }

    /// Return `embedding` for exactly `text`.
    pub fn with_embedding(self, text: impl Into<String>, embedding: Vec<f32>) -> Self {
        self.embeddings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(text.into(), embedding);
        self
    }

    /// Fail embedding calls whose text contains `needle`.
    pub fn fail_embedding_containing(self, needle: impl Into<String>) -> Self {
        self.embed_failures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(needle.into());
        self
    }

    /// Reply with `response` when the request contains `needle`.
    pub fn with_completion(self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.push_rule(needle.into(), Reply::Text(response.into()));
        self
    }

    /// Fail completions whose request contains `needle`.
    pub fn fail_completion_containing(
        self,
        needle: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        self.push_rule(needle.into(), Reply::Fail(error.into()));
        self
    }

    /// Reply used when no rule matches.
    pub fn with_default_completion(self, response: impl Into<String>) -> Self {
        *self
            .default_reply
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Reply::Text(response.into());
        self
    }

    /// Add a completion rule after construction.
    pub fn add_completion(&self, needle: impl Into<String>, response: impl Into<String>) {
        self.push_rule(needle.into(), Reply::Text(response.into()));
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Requests sent to `complete`, in call order.
    pub fn completion_requests(&self) -> Vec<Vec<ChatMessage>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Complete { messages } => Some(messages),
                MockCall::Embed { .. } => None,
            })
            .collect()
    }

    pub fn embed_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Embed { .. }))
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Deterministic embedding derived from the SHA-256 of `text`.
    pub fn deterministic_embedding(&self, text: &str) -> Vec<f32> {
        let hash = Sha256::digest(text.as_bytes());
        (0..self.dims)
            .map(|i| (hash[i % 32] as f32 / 127.5) - 1.0)
            .collect()
    }

    fn push_rule(&self, needle: String, reply: Reply) {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((needle, reply));
    }

    fn record(&self, call: MockCall) {
        self.calls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    fn model_name(&self) -> &str {
        "mock"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.record(MockCall::Embed {
            text: text.to_string(),
        });

        let failing = self
            .embed_failures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|needle| text.contains(needle.as_str()));
        if failing {
            bail!("mock embedding failure");
        }

        if let Some(v) = self
            .embeddings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(text)
        {
            return Ok(v.clone());
        }
        Ok(self.deterministic_embedding(text))
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.record(MockCall::Complete {
            messages: messages.to_vec(),
        });

        let haystack = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let reply = self
            .rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(needle, _)| haystack.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone());
        let reply = match reply {
            Some(r) => r,
            None => self
                .default_reply
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        };

        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Fail(error) => bail!("{}", error),
        }
    }
}
