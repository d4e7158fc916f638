//! Error types for bi-agent-flows

use thiserror::Error;

/// Collaborator error type
#[derive(Debug, Error)]
pub enum FlowsError {
    /// No connection is registered under this name
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// Provider name did not parse
    #[error("unknown provider: {0:?} (expected openai, anthropic or gemini)")]
    UnknownProvider(String),

    /// Database type did not parse
    #[error("unknown database type: {0:?} (expected postgres, mysql or sqlite)")]
    UnknownDbType(String),

    /// Connection test did not succeed
    #[error("connection test failed: {0}")]
    ConnectionTest(String),

    /// Registry file I/O failure
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Registry file could not be (de)serialized
    #[error("registry format error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Approval checkpoint failure
    #[error(transparent)]
    Approval(#[from] bi_agent_core::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, FlowsError>;
