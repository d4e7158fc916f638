//! BI Agent Core - Human-in-the-loop building blocks
//!
//! This crate provides the interaction primitives of the BI agent:
//! - Approval: Risk-gated approval requests with a JSONL audit trail
//! - Flow: Inline question flows rendered into the chat transcript
//! - Config: Serde configuration for both

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod approval;
pub mod config;
pub mod error;
pub mod flow;

pub use approval::{
    classify_sql_risk, ApprovalAction, ApprovalManager, ApprovalRequest, ApprovalStatus,
    AuditLog, AuditRecord, RiskLevel, SharedApprovalManager,
};
pub use config::{ApprovalConfig, DynamicFieldPolicy, FlowEngineConfig};
pub use error::{Error, Result};
pub use flow::{
    Answers, DisplaySink, FlowDefinition, FlowEngine, FlowResult, FlowState, MessageRole,
    Question, TranscriptSink,
};
