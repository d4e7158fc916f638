//! Configuration types for the approval manager and the flow engine.
//!
//! Both derive `serde` with per-field defaults so a partial TOML section (or
//! none at all) yields a working configuration.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::approval::RiskLevel;
use crate::error::{Error, Result};

/// Approval manager configuration (`[approval]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Risk levels approved without asking
    #[serde(default = "default_auto_approve")]
    pub auto_approve: Vec<RiskLevel>,
    /// Audit log location; relative paths are resolved against the data dir
    #[serde(default = "default_audit_log")]
    pub audit_log: PathBuf,
    /// Reject pending requests older than this many seconds (unset = never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_timeout_secs: Option<u64>,
}

fn default_auto_approve() -> Vec<RiskLevel> {
    vec![RiskLevel::Low]
}

fn default_audit_log() -> PathBuf {
    PathBuf::from("approvals.jsonl")
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            auto_approve: default_auto_approve(),
            audit_log: default_audit_log(),
            pending_timeout_secs: None,
        }
    }
}

impl ApprovalConfig {
    /// Pending timeout as a duration; `None` when unset or zero.
    ///
    /// Fails with `InvalidConfig` when the value does not fit a duration.
    pub fn pending_timeout(&self) -> Result<Option<Duration>> {
        let Some(secs) = self.pending_timeout_secs.filter(|secs| *secs > 0) else {
            return Ok(None);
        };
        i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .map(Some)
            .ok_or_else(|| {
                Error::InvalidConfig(format!("approval.pending_timeout_secs {} is too large", secs))
            })
    }
}

/// What the flow engine does when a dynamic prompt, default or
/// next-question function fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DynamicFieldPolicy {
    /// Log a warning and treat the field as absent
    #[default]
    Lenient,
    /// Log an error and abort the flow with an internal-error message
    Strict,
}

/// Flow engine configuration (`[flow]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEngineConfig {
    /// Input that aborts the active flow
    #[serde(default = "default_cancel_token")]
    pub cancel_token: String,
    /// Prefix that marks input as a command rather than an answer
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// Commands handed back to the host even while a flow is active
    #[serde(default = "default_passthrough")]
    pub passthrough_commands: Vec<String>,
    /// Echo shown instead of password answers
    #[serde(default = "default_password_mask")]
    pub password_mask: String,
    /// Handling of failing dynamic fields
    #[serde(default)]
    pub dynamic_field_policy: DynamicFieldPolicy,
}

fn default_cancel_token() -> String {
    "/cancel".to_string()
}

fn default_command_prefix() -> String {
    "/".to_string()
}

fn default_passthrough() -> Vec<String> {
    vec!["/help".to_string(), "/quit".to_string(), "/exit".to_string()]
}

fn default_password_mask() -> String {
    "********".to_string()
}

impl Default for FlowEngineConfig {
    fn default() -> Self {
        Self {
            cancel_token: default_cancel_token(),
            command_prefix: default_command_prefix(),
            passthrough_commands: default_passthrough(),
            password_mask: default_password_mask(),
            dynamic_field_policy: DynamicFieldPolicy::default(),
        }
    }
}
