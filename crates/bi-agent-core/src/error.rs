//! Error types for bi-agent-core
//!
//! Approval errors are caller bugs (bad risk level, bad action, unknown id);
//! audit errors mean the durable record could not be written.

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Risk level string did not parse
    #[error("invalid risk level: {0:?} (expected low, medium, high or critical)")]
    InvalidRiskLevel(String),

    /// Resolution action string did not parse
    #[error("invalid action: {0:?} (expected approve, modify, reject or skip)")]
    InvalidAction(String),

    /// Request id is not pending (never existed or already resolved)
    #[error("unknown approval request: {0}")]
    UnknownRequest(String),

    /// A required field was empty
    #[error("field must not be empty: {0}")]
    EmptyField(&'static str),

    /// Configuration value out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Audit log I/O failure
    #[error("audit log error: {0}")]
    Audit(#[from] std::io::Error),

    /// Audit record (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Short message suitable for a chat transcript.
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidRiskLevel(level) => {
                format!("⚙️ Unknown risk level '{}'.", level)
            }
            Error::InvalidAction(action) => {
                format!(
                    "✋ Unknown action '{}'. Use approve, modify, reject or skip.",
                    action
                )
            }
            Error::UnknownRequest(id) => {
                format!("🔎 No pending approval with id '{}'.", id)
            }
            Error::EmptyField(field) => format!("✏️ '{}' must not be empty.", field),
            Error::InvalidConfig(reason) => format!("⚙️ Invalid configuration: {}.", reason),
            Error::Audit(_) | Error::Serialization(_) => {
                "📼 The audit log could not be written; the decision was not recorded.".to_string()
            }
        }
    }
}
