use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Ordinal risk classification of a gated action
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Read-only or trivially reversible
    Low,
    /// Writes that are easy to undo
    Medium,
    /// Schema or permission changes
    High,
    /// Irreversible data loss
    Critical,
}

impl RiskLevel {
    /// All levels in ascending order
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    /// Lowercase name used in the audit log
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            _ => Err(Error::InvalidRiskLevel(s.to_string())),
        }
    }
}

/// Status of an approval request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    /// Waiting for user decision
    Pending,
    /// User (or the auto-approve policy) approved the action
    Approved,
    /// User approved a modified payload
    Modified,
    /// User rejected the action
    Rejected,
    /// User chose not to run the action
    Skipped,
}

impl ApprovalStatus {
    /// Lowercase name used in the audit log
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Modified => "modified",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Skipped => "skipped",
        }
    }

    /// Whether the gated action may proceed
    #[must_use]
    pub fn allows_execution(&self) -> bool {
        matches!(self, ApprovalStatus::Approved | ApprovalStatus::Modified)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user decision on a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalAction {
    /// Run as proposed
    Approve,
    /// Run with replaced content
    Modify,
    /// Do not run
    Reject,
    /// Skip this step and continue
    Skip,
}

impl ApprovalAction {
    /// Terminal status this action produces
    #[must_use]
    pub fn status(&self) -> ApprovalStatus {
        match self {
            ApprovalAction::Approve => ApprovalStatus::Approved,
            ApprovalAction::Modify => ApprovalStatus::Modified,
            ApprovalAction::Reject => ApprovalStatus::Rejected,
            ApprovalAction::Skip => ApprovalStatus::Skipped,
        }
    }

    /// Lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalAction::Approve => "approve",
            ApprovalAction::Modify => "modify",
            ApprovalAction::Reject => "reject",
            ApprovalAction::Skip => "skip",
        }
    }
}

impl fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(ApprovalAction::Approve),
            "modify" => Ok(ApprovalAction::Modify),
            "reject" => Ok(ApprovalAction::Reject),
            "skip" => Ok(ApprovalAction::Skip),
            _ => Err(Error::InvalidAction(s.to_string())),
        }
    }
}

/// An approval request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Short random token, immutable
    pub id: String,
    /// Label of the gated action (e.g. "SQL execution")
    pub step_name: String,
    /// Payload being approved, opaque to the manager
    pub content: String,
    /// Risk classification
    pub risk_level: RiskLevel,
    /// When the request was created
    pub timestamp: DateTime<Utc>,
    /// Current status
    pub status: ApprovalStatus,
    /// Explanation of the resolution
    pub user_response: String,
    /// Replacement payload, only set when status is `Modified`
    pub modified_content: Option<String>,
    /// When the request was resolved
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    /// Create a new pending request
    #[must_use]
    pub fn new(
        step_name: impl Into<String>,
        content: impl Into<String>,
        risk_level: RiskLevel,
    ) -> Self {
        Self {
            id: new_request_id(),
            step_name: step_name.into(),
            content: content.into(),
            risk_level,
            timestamp: Utc::now(),
            status: ApprovalStatus::Pending,
            user_response: String::new(),
            modified_content: None,
            resolved_at: None,
        }
    }

    /// Check if the request is still pending
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    /// Content the caller should act on: the modified payload if any
    #[must_use]
    pub fn effective_content(&self) -> &str {
        self.modified_content.as_deref().unwrap_or(&self.content)
    }

    /// Apply a terminal status. Only legal on a pending request.
    pub(crate) fn settle(
        &mut self,
        status: ApprovalStatus,
        user_response: String,
        modified_content: Option<String>,
    ) {
        debug_assert!(self.is_pending());
        self.status = status;
        self.user_response = user_response;
        self.modified_content = modified_content;
        self.resolved_at = Some(Utc::now());
    }

    pub(crate) fn regenerate_id(&mut self) {
        self.id = new_request_id();
    }
}

fn new_request_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
