//! Error type shared by every engine component.
//!
//! An empty query after normalization is not an error: it is scored as a
//! zero-relevance query by every method.

use crate::index::Method;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested method's artifact was never built for this collection.
    #[error("{method} index not found for collection '{collection}'")]
    IndexNotFound { method: Method, collection: String },

    /// The embedding provider or the vocabulary index cannot be used.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// A fused sub-method exceeded its time budget.
    #[error("{method} search timed out after {timeout_ms} ms")]
    UpstreamTimeout { method: Method, timeout_ms: u64 },

    /// Every sub-method of a fused query failed.
    #[error("all retrieval methods failed for collection '{collection}': {}", .failures.join("; "))]
    AllMethodsFailed { collection: String, failures: Vec<String> },

    #[error("unknown search method '{0}'")]
    UnknownMethod(String),

    #[error("invalid collection name '{0}'")]
    InvalidCollection(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index was built with embedding model '{built}' but provider is '{provider}'")]
    ModelMismatch { built: String, provider: String },

    #[error("corrupt index artifact {path}: {reason}")]
    CorruptIndex { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("chat model error: {0}")]
    Chat(String),

    #[error("document store error: {0}")]
    Store(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
