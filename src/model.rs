//! Language-model backends.
//!
//! [`create_model`] picks the [`LanguageModel`] for the provider named in
//! `[model]`:
//! - `"disabled"`: the core crate's [`DisabledModel`], which fails every call.
//! - `"openai"`: [`OpenAiModel`], defined here, which calls an
//!   OpenAI-compatible API for embeddings and chat completions with retry
//!   and backoff.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use socratic_harness_core::capability::{ChatMessage, DisabledModel, LanguageModel};

use crate::config::ModelConfig;

/// Instantiate the model named by `config.provider`.
pub fn create_model(config: &ModelConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "openai" => Ok(Arc::new(OpenAiModel::new(config)?)),
        other => bail!("Unknown model provider: {}", other),
    }
}

// ============ OpenAI Model ============

/// Model backed by `POST {base_url}/embeddings` and
/// `POST {base_url}/chat/completions`.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiModel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    embedding_model: String,
    dims: usize,
    temperature: f32,
    max_retries: u32,
}

impl OpenAiModel {
    /// # Errors
    ///
    /// Returns an error if `OPENAI_API_KEY` is not in the environment or the
    /// HTTP client cannot be built.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &ModelConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            dims: config.dims,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    /// POST `body` to `{base_url}/{path}` with retry/backoff and return the
    /// response JSON.
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                debug!(attempt, delay_secs = delay.as_secs(), url = %url, "retrying model request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if is_retryable(status.as_u16()) {
                        warn!(%status, attempt, "model API returned a retryable error");
                        last_err = Some(anyhow::anyhow!(
                            "model API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    bail!("model API error {}: {}", status, body_text);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "model API request failed");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("model request failed after retries")))
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn model_name(&self) -> &str {
        &self.chat_model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": [text],
        });
        let json = self.post_json("embeddings", &body).await?;
        let embedding = parse_embedding_response(&json)?;
        if self.dims > 0 && embedding.len() != self.dims {
            bail!(
                "embedding has {} dimensions, expected {}",
                embedding.len(),
                self.dims
            );
        }
        Ok(embedding)
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.chat_model,
            "messages": messages,
            "temperature": self.temperature,
        });
        let json = self.post_json("chat/completions", &body).await?;
        parse_chat_response(&json)
    }
}

/// 1s, 2s, 4s … capped at 32s.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}

fn is_retryable(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Extract `data[0].embedding` from an embeddings response.
fn parse_embedding_response(json: &Value) -> Result<Vec<f32>> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing data[0].embedding"))?;

    Ok(embedding
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

/// Extract `choices[0].message.content` from a chat-completions response.
fn parse_chat_response(json: &Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message.content"))
}
