//! Append-only JSONL audit log for approval events.
//!
//! One line per event. The file is the durable record; the manager never
//! reloads state from it, only tails it for history queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::types::{ApprovalRequest, ApprovalStatus, RiskLevel};
use crate::error::Result;

/// Kind of approval event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditEvent {
    /// Request created (pending or auto-approved)
    Created,
    /// Request resolved by a user
    Resolved,
    /// Request auto-rejected after the pending timeout
    Expired,
}

impl AuditEvent {
    /// Stable identifier
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::Created => "created",
            AuditEvent::Resolved => "resolved",
            AuditEvent::Expired => "expired",
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// What happened
    pub event: AuditEvent,
    /// Request id
    pub id: String,
    /// Step label
    pub step: String,
    /// Original payload
    pub content: String,
    /// Risk classification
    pub risk_level: RiskLevel,
    /// Status after the event
    pub status: ApprovalStatus,
    /// Resolution explanation
    pub user_response: String,
    /// Replacement payload for `modified`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_content: Option<String>,
    /// Request creation time
    pub timestamp: DateTime<Utc>,
    /// When this line was written
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Snapshot a request for the given event
    #[must_use]
    pub fn from_request(event: AuditEvent, request: &ApprovalRequest) -> Self {
        Self {
            event,
            id: request.id.clone(),
            step: request.step_name.clone(),
            content: request.content.clone(),
            risk_level: request.risk_level,
            status: request.status,
            user_response: request.user_response.clone(),
            modified_content: request.modified_content.clone(),
            timestamp: request.timestamp,
            recorded_at: Utc::now(),
        }
    }
}

/// JSONL audit file
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Audit log at `path`; the file and its parent directory are created lazily
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line
    pub async fn append(&self, record: &AuditRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(id = %record.id, event = ?record.event, status = %record.status, "Audit record written");
        Ok(())
    }

    /// Last `limit` records, oldest first. A missing file is an empty log.
    ///
    /// Lines that fail to parse are skipped so a truncated tail does not hide
    /// the rest of the history.
    pub async fn tail(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(limit);

        Ok(lines[start..]
            .iter()
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable audit line");
                    None
                }
            })
            .collect())
    }
}
