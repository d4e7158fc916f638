use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

use super::audit::{AuditEvent, AuditLog, AuditRecord};
use super::types::{ApprovalAction, ApprovalRequest, ApprovalStatus, RiskLevel};
use crate::config::ApprovalConfig;
use crate::error::{Error, Result};

/// Callback fired once when a pending request is resolved or expires
pub type ResolveCallback = Box<dyn FnOnce(&ApprovalRequest) + Send>;

#[derive(Default)]
struct ManagerState {
    pending: HashMap<String, ApprovalRequest>,
    history: Vec<ApprovalRequest>,
    callbacks: HashMap<String, Vec<ResolveCallback>>,
}

impl ManagerState {
    /// Ids are short; draw again until the id is unused.
    fn assign_unique_id(&self, request: &mut ApprovalRequest) {
        while self.pending.contains_key(&request.id)
            || self.history.iter().any(|r| r.id == request.id)
        {
            request.regenerate_id();
        }
    }
}

/// Manager for approval requests
///
/// Requests live in exactly one of two places: the pending map until they
/// are resolved, then the history list. Every state change writes one audit
/// line before it is committed in memory, under the same lock, so the log
/// order matches the event order.
pub struct ApprovalManager {
    state: Mutex<ManagerState>,
    auto_approve: RwLock<HashSet<RiskLevel>>,
    pending_timeout: Option<Duration>,
    audit: AuditLog,
}

impl ApprovalManager {
    /// Create a manager writing its audit trail to `audit`, auto-approving
    /// `low` risk only and never expiring pending requests.
    #[must_use]
    pub fn new(audit: AuditLog) -> Self {
        Self {
            state: Mutex::new(ManagerState::default()),
            auto_approve: RwLock::new(HashSet::from([RiskLevel::Low])),
            pending_timeout: None,
            audit,
        }
    }

    /// Create from configuration; `audit` points at the resolved log location.
    ///
    /// Fails with `InvalidConfig` when the pending timeout is out of range.
    pub fn from_config(config: &ApprovalConfig, audit: AuditLog) -> Result<Self> {
        let mut manager = Self::new(audit);
        manager.set_auto_approve(config.auto_approve.iter().copied());
        manager.pending_timeout = config.pending_timeout()?;
        Ok(manager)
    }

    /// Reject pending requests older than `timeout` when `expire_stale` runs
    #[must_use]
    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout = Some(timeout);
        self
    }

    /// Replace the set of automatically approved risk levels
    pub fn set_auto_approve(&self, levels: impl IntoIterator<Item = RiskLevel>) {
        let levels: HashSet<RiskLevel> = levels.into_iter().collect();
        info!(levels = ?levels, "Auto-approve levels updated");
        *self
            .auto_approve
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = levels;
    }

    /// Currently auto-approved risk levels, ascending
    #[must_use]
    pub fn auto_approve_levels(&self) -> Vec<RiskLevel> {
        let set = self
            .auto_approve
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut levels: Vec<RiskLevel> = set.iter().copied().collect();
        levels.sort();
        levels
    }

    /// Whether an action at this risk level needs an explicit decision
    #[must_use]
    pub fn should_interrupt(&self, step: &str, risk_level: RiskLevel) -> bool {
        let interrupt = !self
            .auto_approve
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&risk_level);
        tracing::trace!(step, risk = %risk_level, interrupt, "Interrupt check");
        interrupt
    }

    /// The audit log backing this manager
    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Create a request from a risk level string.
    ///
    /// Fails with `InvalidRiskLevel` when the level does not parse.
    pub async fn create_approval_request(
        &self,
        step: &str,
        content: &str,
        risk_level: &str,
    ) -> Result<ApprovalRequest> {
        let risk_level: RiskLevel = risk_level.parse()?;
        self.create_request(step, content, risk_level).await
    }

    /// Create a request. Auto-approvable levels are settled immediately and
    /// go straight to history; the caller must inspect `status`.
    pub async fn create_request(
        &self,
        step: &str,
        content: &str,
        risk_level: RiskLevel,
    ) -> Result<ApprovalRequest> {
        if step.trim().is_empty() {
            return Err(Error::EmptyField("step"));
        }
        if content.trim().is_empty() {
            return Err(Error::EmptyField("content"));
        }

        let mut request = ApprovalRequest::new(step, content, risk_level);
        let auto = !self.should_interrupt(step, risk_level);
        if auto {
            request.settle(
                ApprovalStatus::Approved,
                format!("auto-approved ({} risk)", risk_level),
                None,
            );
        }

        let mut state = self.state.lock().await;
        state.assign_unique_id(&mut request);
        self.audit
            .append(&AuditRecord::from_request(AuditEvent::Created, &request))
            .await?;

        if auto {
            info!(id = %request.id, step, risk = %risk_level, "Approval request auto-approved");
            state.history.push(request.clone());
        } else {
            info!(id = %request.id, step, risk = %risk_level, "Approval request pending");
            state.pending.insert(request.id.clone(), request.clone());
        }

        Ok(request)
    }

    /// Resolve a pending request from an action string.
    ///
    /// `modified_content` is only used for `modify`; an empty `comment` is
    /// replaced with "user selected <action>".
    pub async fn resolve(
        &self,
        request_id: &str,
        action: &str,
        modified_content: &str,
        comment: &str,
    ) -> Result<ApprovalRequest> {
        let action: ApprovalAction = action.parse()?;
        let modified = (action == ApprovalAction::Modify).then(|| modified_content.to_string());
        let comment = (!comment.trim().is_empty()).then(|| comment.to_string());
        self.resolve_action(request_id, action, modified, comment)
            .await
    }

    /// Resolve a pending request. Each id resolves at most once; later calls
    /// fail with `UnknownRequest`.
    pub async fn resolve_action(
        &self,
        request_id: &str,
        action: ApprovalAction,
        modified_content: Option<String>,
        comment: Option<String>,
    ) -> Result<ApprovalRequest> {
        if action == ApprovalAction::Modify
            && modified_content
                .as_deref()
                .map_or(true, |c| c.trim().is_empty())
        {
            return Err(Error::EmptyField("modified_content"));
        }

        let (resolved, callbacks) = {
            let mut state = self.state.lock().await;
            let Some(pending) = state.pending.get(request_id) else {
                return Err(Error::UnknownRequest(request_id.to_string()));
            };

            let mut resolved = pending.clone();
            let response = comment.unwrap_or_else(|| format!("user selected {}", action));
            let modified = match action {
                ApprovalAction::Modify => modified_content,
                _ => None,
            };
            resolved.settle(action.status(), response, modified);

            self.audit
                .append(&AuditRecord::from_request(AuditEvent::Resolved, &resolved))
                .await?;

            state.pending.remove(request_id);
            state.history.push(resolved.clone());
            let callbacks = state.callbacks.remove(request_id).unwrap_or_default();
            (resolved, callbacks)
        };

        info!(id = %resolved.id, status = %resolved.status, "Approval request resolved");
        for callback in callbacks {
            callback(&resolved);
        }

        Ok(resolved)
    }

    /// Register a callback for when `request_id` is resolved.
    ///
    /// Fails with `UnknownRequest` if the id is not pending.
    pub async fn on_resolve(&self, request_id: &str, callback: ResolveCallback) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.pending.contains_key(request_id) {
            return Err(Error::UnknownRequest(request_id.to_string()));
        }
        state
            .callbacks
            .entry(request_id.to_string())
            .or_default()
            .push(callback);
        Ok(())
    }

    /// Await the decision on a pending request from another control path.
    pub async fn wait_for(&self, request_id: &str) -> Result<oneshot::Receiver<ApprovalRequest>> {
        let (tx, rx) = oneshot::channel();
        self.on_resolve(
            request_id,
            Box::new(move |request| {
                let _ = tx.send(request.clone());
            }),
        )
        .await?;
        Ok(rx)
    }

    /// Reject every pending request older than the configured timeout.
    ///
    /// No-op when no timeout is configured. Returns the expired requests.
    pub async fn expire_stale(&self) -> Result<Vec<ApprovalRequest>> {
        let Some(timeout) = self.pending_timeout else {
            return Ok(Vec::new());
        };
        let cutoff = Utc::now() - timeout;

        let mut expired = Vec::new();
        let mut fired = Vec::new();
        {
            let mut state = self.state.lock().await;
            let mut stale: Vec<ApprovalRequest> = state
                .pending
                .values()
                .filter(|r| r.timestamp <= cutoff)
                .cloned()
                .collect();
            stale.sort_by_key(|r| r.timestamp);

            for mut request in stale {
                request.settle(
                    ApprovalStatus::Rejected,
                    format!(
                        "auto-rejected after {}s without a decision",
                        timeout.num_seconds()
                    ),
                    None,
                );
                self.audit
                    .append(&AuditRecord::from_request(AuditEvent::Expired, &request))
                    .await?;

                warn!(id = %request.id, step = %request.step_name, "Approval request expired");
                state.pending.remove(&request.id);
                state.history.push(request.clone());
                if let Some(callbacks) = state.callbacks.remove(&request.id) {
                    fired.push((request.clone(), callbacks));
                }
                expired.push(request);
            }
        }

        for (request, callbacks) in fired {
            for callback in callbacks {
                callback(&request);
            }
        }

        Ok(expired)
    }

    /// Get a pending request by id
    pub async fn get_pending(&self, request_id: &str) -> Option<ApprovalRequest> {
        self.state.lock().await.pending.get(request_id).cloned()
    }

    /// All pending requests, oldest first
    pub async fn pending(&self) -> Vec<ApprovalRequest> {
        let state = self.state.lock().await;
        let mut pending: Vec<ApprovalRequest> = state.pending.values().cloned().collect();
        pending.sort_by_key(|r| r.timestamp);
        pending
    }

    /// Every resolved request of this process, in resolution order
    pub async fn history(&self) -> Vec<ApprovalRequest> {
        self.state.lock().await.history.clone()
    }

    /// The most recent `limit` resolved requests, oldest first
    pub async fn get_history(&self, limit: usize) -> Vec<ApprovalRequest> {
        let state = self.state.lock().await;
        let start = state.history.len().saturating_sub(limit);
        state.history[start..].to_vec()
    }

    /// The last `limit` audit records from disk, including previous runs
    pub async fn audit_tail(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        self.audit.tail(limit).await
    }
}
