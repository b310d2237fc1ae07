//! Error taxonomy shared by the core pipeline and its adapters.

use thiserror::Error;

/// Failures surfaced by the build and turn operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// Bad parameter combination. Fatal at startup, never retried.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// One document failed to load, chunk, embed, or index. The build
    /// logs it, skips the document, and continues with the rest.
    #[error("failed to ingest document '{document}': {reason}")]
    Ingest { document: String, reason: String },

    /// The embedding provider failed after retries were exhausted.
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The generation provider failed after retries were exhausted.
    #[error("generation provider unavailable: {0}")]
    GenerationUnavailable(String),

    /// Query against a vector index with zero entries.
    #[error("no knowledge available: the index is empty")]
    IndexEmpty,

    /// Index or memory storage failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl RagError {
    pub fn ingest(document: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        RagError::Ingest {
            document: document.into(),
            reason: reason.to_string(),
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        RagError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RagError>;

/// Failure reported by an external provider (embedding, generation, re-ranking).
///
/// `Transient` failures (rate limiting, timeouts, 5xx, connection resets)
/// may be retried with backoff. `Fatal` failures (authentication, malformed
/// request or response) must fail fast.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("provider failure: {0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}
