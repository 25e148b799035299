//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to the defaults
//! below. [`load_config`] validates the parsed values before anything else
//! runs; core components then receive plain parameter structs built by the
//! `*_params` accessors.

use anyhow::{Context, Result};
use serde::Deserialize;
use socratic_harness_core::chunk::ChunkingParams;
use socratic_harness_core::dialogue::DialogueParams;
use socratic_harness_core::retrieve::RetrievalParams;
use socratic_harness_core::summary::SamplingParams;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub dialogue: DialogueConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
    #[serde(default)]
    pub model: ModelConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_tokens: default_min_tokens(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_min_tokens() -> usize {
    200
}
fn default_max_tokens() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_rubric_limit")]
    pub rubric_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            rubric_limit: default_rubric_limit(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_rubric_limit() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct DialogueConfig {
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            history_turns: default_history_turns(),
        }
    }
}

fn default_history_turns() -> usize {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummaryConfig {
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
    #[serde(default = "default_full_coverage_threshold")]
    pub full_coverage_threshold: usize,
    /// Fixes the random part of chunk sampling.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            max_chunks: default_max_chunks(),
            full_coverage_threshold: default_full_coverage_threshold(),
            seed: None,
        }
    }
}

fn default_max_chunks() -> usize {
    15
}
fn default_full_coverage_threshold() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            dims: default_dims(),
            base_url: default_base_url(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.3
}

impl ModelConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    pub fn chunking_params(&self) -> ChunkingParams {
        ChunkingParams {
            min_tokens: self.chunking.min_tokens,
            max_tokens: self.chunking.max_tokens,
        }
    }

    pub fn retrieval_params(&self) -> RetrievalParams {
        RetrievalParams {
            top_k: self.retrieval.top_k,
            rubric_limit: self.retrieval.rubric_limit,
        }
    }

    pub fn dialogue_params(&self) -> DialogueParams {
        DialogueParams {
            history_turns: self.dialogue.history_turns,
        }
    }

    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            max_chunks: self.summary.max_chunks,
            full_coverage_threshold: self.summary.full_coverage_threshold,
            seed: self.summary.seed,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.min_tokens == 0 {
        anyhow::bail!("chunking.min_tokens must be > 0");
    }
    if config.chunking.max_tokens <= config.chunking.min_tokens {
        anyhow::bail!("chunking.max_tokens must be greater than chunking.min_tokens");
    }

    // Validate retrieval and sampling
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.summary.max_chunks < 1 {
        anyhow::bail!("summary.max_chunks must be >= 1");
    }

    match config.model.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown model provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.model.is_enabled() && config.model.dims == 0 {
        anyhow::bail!(
            "model.dims must be > 0 when provider is '{}'",
            config.model.provider
        );
    }

    Ok(config)
}
