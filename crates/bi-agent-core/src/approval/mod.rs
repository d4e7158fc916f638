//! Approval - Human-in-the-loop gating for risky actions
//!
//! Risky actions are described by a step name, a payload and a risk level.
//! Low-risk actions are approved on the spot; everything else waits in the
//! pending set until a user resolves it. Every creation and resolution is
//! appended to a JSONL audit log.

use std::sync::Arc;

pub mod audit;
pub mod manager;
pub mod risk;
pub mod types;

pub use audit::{AuditEvent, AuditLog, AuditRecord};
pub use manager::{ApprovalManager, ResolveCallback};
pub use risk::classify_sql_risk;
pub use types::{ApprovalAction, ApprovalRequest, ApprovalStatus, RiskLevel};

/// Shared approval manager type
pub type SharedApprovalManager = Arc<ApprovalManager>;

#[cfg(test)]
mod tests;
