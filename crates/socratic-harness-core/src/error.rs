//! Typed errors for pipeline operations.
//!
//! Every failure carries the full list of human-readable reasons collected
//! during the unit of work, so callers can report several problems from a
//! single run (e.g. multiple chunks that failed to embed).
//!
//! Structured-output parse failures have no variant here: they are always
//! recovered locally with documented defaults (see [`crate::structured`]).

use thiserror::Error;

/// A checked precondition that short-circuits an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Precondition {
    #[error("document {0} has not been processed yet")]
    DocumentNotProcessed(String),

    #[error("a summary already exists for document {0}")]
    SummaryExists(String),

    #[error("message {0} was not written by the learner")]
    NotLearnerMessage(String),

    #[error("an evaluation is already running for conversation {0}")]
    EvaluationInProgress(String),
}

/// Errors returned by pipeline units of work.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing or invalid required entity; nothing was attempted.
    #[error("invalid input: {}", .reasons.join("; "))]
    Input { reasons: Vec<String> },

    #[error("precondition failed: {0}")]
    Precondition(#[from] Precondition),

    /// A model capability failed for the whole unit of work.
    #[error("capability failure: {}", .reasons.join("; "))]
    Capability { reasons: Vec<String> },

    /// The evaluator turn could not be generated; no message was created.
    #[error("generation failed: {}", .reasons.join("; "))]
    Generation { reasons: Vec<String> },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn input(reason: impl Into<String>) -> Self {
        PipelineError::Input {
            reasons: vec![reason.into()],
        }
    }

    pub fn capability(reasons: Vec<String>) -> Self {
        PipelineError::Capability { reasons }
    }

    pub fn generation(reasons: Vec<String>) -> Self {
        PipelineError::Generation { reasons }
    }

    /// All reasons carried by this error, in the order they were recorded.
    pub fn reasons(&self) -> Vec<String> {
        match self {
            PipelineError::Input { reasons }
            | PipelineError::Capability { reasons }
            | PipelineError::Generation { reasons } => reasons.clone(),
            PipelineError::Precondition(p) => vec![p.to_string()],
            PipelineError::Store(e) => vec![format!("{:#}", e)],
        }
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, PipelineError::Precondition(_))
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
