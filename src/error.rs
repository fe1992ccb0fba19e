//! Error taxonomy for the tender analysis core
//!
//! `BackendError` describes a single failed call to a remote model backend.
//! `PipelineError` is what an agent call surfaces once its attempt budget is
//! spent (or immediately, for malformed input). `RagError` covers the
//! retrieval subsystem.

use std::time::Duration;

/// A single failed call to the chat-completion or embedding backend
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("backend returned an unexpected payload: {0}")]
    Malformed(String),
}

/// Terminal failure of one pipeline stage
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The backend answered, but never with output that validated against
    /// the target schema within the attempt budget.
    #[error("no schema-valid output after {attempts} attempts: {reason}")]
    StructuredOutput {
        attempts: u32,
        reason: String,
        last_response: Option<String>,
    },

    /// The backend could not be reached (or timed out) on the final attempt.
    #[error("model backend unavailable after {attempts} attempts: {reason}")]
    BackendUnavailable {
        attempts: u32,
        reason: String,
        last_response: Option<String>,
    },

    /// Malformed tender rejected before any backend call.
    #[error("invalid tender: {0}")]
    Validation(String),
}

impl PipelineError {
    /// Number of backend attempts spent before the failure (0 for input errors)
    pub fn attempts(&self) -> u32 {
        match self {
            Self::StructuredOutput { attempts, .. } | Self::BackendUnavailable { attempts, .. } => {
                *attempts
            }
            Self::Validation(_) => 0,
        }
    }

    /// Last raw text returned by the backend, kept for diagnosis
    pub fn last_response(&self) -> Option<&str> {
        match self {
            Self::StructuredOutput { last_response, .. }
            | Self::BackendUnavailable { last_response, .. } => last_response.as_deref(),
            Self::Validation(_) => None,
        }
    }

    /// True for infrastructure faults as opposed to output-quality faults
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}

/// Failures of the embedding / indexing / knowledge-base layer
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("cannot embed empty text")]
    EmptyText,
    #[error("embedding backend failed: {0}")]
    Backend(#[from] BackendError),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding backend returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },
    #[error("knowledge base I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("knowledge base serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("failed to persist vector index: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error("example {example:?} uses reserved metadata key '{key}'")]
    ReservedMetadataKey { example: String, key: String },
}

pub type RagResult<T> = Result<T, RagError>;
