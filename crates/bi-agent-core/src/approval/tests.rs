use super::*;
use crate::config::ApprovalConfig;
use crate::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn manager_in(dir: &TempDir) -> ApprovalManager {
    ApprovalManager::new(AuditLog::new(dir.path().join("approvals.jsonl")))
}

fn audit_lines(dir: &TempDir) -> Vec<serde_json::Value> {
    let raw = std::fs::read_to_string(dir.path().join("approvals.jsonl")).unwrap_or_default();
    raw.lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn test_low_risk_is_auto_approved() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);

    for _ in 0..3 {
        let request = manager
            .create_approval_request("SQL execution", "SELECT 1", "low")
            .await
            .unwrap();
        assert_eq!(request.status, ApprovalStatus::Approved);
        assert!(manager.get_pending(&request.id).await.is_none());
    }

    assert!(manager.pending().await.is_empty());
    assert_eq!(manager.history().await.len(), 3);
    assert_eq!(audit_lines(&dir).len(), 3);
}

#[tokio::test]
async fn test_scenario_critical_request_rejected() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);

    let request = manager
        .create_approval_request("Delete rows", "DELETE FROM x", "critical")
        .await
        .unwrap();
    assert_eq!(request.status, ApprovalStatus::Pending);
    assert!(manager.get_pending(&request.id).await.is_some());

    let resolved = manager.resolve(&request.id, "reject", "", "").await.unwrap();
    assert_eq!(resolved.status, ApprovalStatus::Rejected);
    assert_eq!(resolved.user_response, "user selected reject");
    assert!(resolved.resolved_at.is_some());

    let lines: Vec<_> = audit_lines(&dir)
        .into_iter()
        .filter(|l| l["id"] == request.id.as_str())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["status"], "pending");
    assert_eq!(lines[0]["event"], "created");
    assert_eq!(lines[1]["status"], "rejected");
    assert_eq!(lines[1]["step"], "Delete rows");
    assert_eq!(lines[1]["content"], "DELETE FROM x");
    assert_eq!(lines[1]["risk_level"], "critical");
    assert!(lines[1]["timestamp"].is_string());
}

#[tokio::test]
async fn test_second_resolve_fails_and_keeps_first_status() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);

    let request = manager
        .create_approval_request("Update", "UPDATE x SET a = 1 WHERE b = 2", "medium")
        .await
        .unwrap();
    manager
        .resolve(&request.id, "approve", "", "looks fine")
        .await
        .unwrap();

    let err = manager
        .resolve(&request.id, "reject", "", "")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownRequest(id) if id == request.id));

    let history = manager.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ApprovalStatus::Approved);
    assert_eq!(history[0].user_response, "looks fine");
    assert_eq!(audit_lines(&dir).len(), 2);
}

#[tokio::test]
async fn test_audit_line_count_matches_events() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);

    let levels = ["low", "medium", "high", "critical", "low", "high"];
    let mut pending_ids = Vec::new();
    for level in levels {
        let request = manager
            .create_approval_request("step", "payload", level)
            .await
            .unwrap();
        if request.is_pending() {
            pending_ids.push(request.id);
        }
    }
    assert_eq!(pending_ids.len(), 4);

    for id in pending_ids.iter().take(3) {
        manager.resolve(id, "skip", "", "").await.unwrap();
    }

    assert_eq!(audit_lines(&dir).len(), levels.len() + 3);
    assert_eq!(manager.pending().await.len(), 1);
}

#[tokio::test]
async fn test_modify_stores_modified_content() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);

    let request = manager
        .create_approval_request("SQL execution", "DELETE FROM x", "critical")
        .await
        .unwrap();
    let resolved = manager
        .resolve(&request.id, "modify", "DELETE FROM x WHERE id = 1", "")
        .await
        .unwrap();

    assert_eq!(resolved.status, ApprovalStatus::Modified);
    assert_eq!(
        resolved.modified_content.as_deref(),
        Some("DELETE FROM x WHERE id = 1")
    );
    assert_eq!(resolved.effective_content(), "DELETE FROM x WHERE id = 1");
    assert!(resolved.status.allows_execution());
}

#[tokio::test]
async fn test_non_modify_ignores_modified_content() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);

    let request = manager
        .create_approval_request("SQL execution", "DROP TABLE x", "critical")
        .await
        .unwrap();
    let resolved = manager
        .resolve(&request.id, "approve", "SELECT 1", "")
        .await
        .unwrap();
    assert!(resolved.modified_content.is_none());
    assert_eq!(resolved.effective_content(), "DROP TABLE x");
}

#[tokio::test]
async fn test_invalid_inputs_are_rejected() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);

    let err = manager
        .create_approval_request("step", "payload", "extreme")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRiskLevel(_)));

    let err = manager
        .create_approval_request("", "payload", "high")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmptyField("step")));

    let request = manager
        .create_approval_request("step", "payload", "high")
        .await
        .unwrap();
    let err = manager
        .resolve(&request.id, "maybe", "", "")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidAction(_)));

    let err = manager.resolve(&request.id, "modify", " ", "").await.unwrap_err();
    assert!(matches!(err, Error::EmptyField("modified_content")));

    let err = manager.resolve("nope", "approve", "", "").await.unwrap_err();
    assert!(matches!(err, Error::UnknownRequest(_)));

    // Only the creation was logged
    assert_eq!(audit_lines(&dir).len(), 1);
    assert!(manager.get_pending(&request.id).await.is_some());
}

#[tokio::test]
async fn test_risk_level_parsing_is_case_insensitive() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);

    let request = manager
        .create_approval_request("step", "payload", "HIGH")
        .await
        .unwrap();
    assert_eq!(request.risk_level, RiskLevel::High);
}

#[tokio::test]
async fn test_auto_approve_set_is_configurable() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);

    assert!(!manager.should_interrupt("read", RiskLevel::Low));
    assert!(manager.should_interrupt("write", RiskLevel::Medium));

    manager.set_auto_approve([RiskLevel::Low, RiskLevel::Medium]);
    assert!(!manager.should_interrupt("write", RiskLevel::Medium));
    assert!(manager.should_interrupt("ddl", RiskLevel::High));

    let request = manager
        .create_approval_request("write", "INSERT INTO x VALUES (1)", "medium")
        .await
        .unwrap();
    assert_eq!(request.status, ApprovalStatus::Approved);

    manager.set_auto_approve([]);
    assert!(manager.should_interrupt("read", RiskLevel::Low));
    assert!(manager.auto_approve_levels().is_empty());
}

#[tokio::test]
async fn test_from_config() {
    let dir = TempDir::new().unwrap();
    let config = ApprovalConfig {
        auto_approve: vec![RiskLevel::Medium, RiskLevel::Low],
        pending_timeout_secs: Some(0),
        ..ApprovalConfig::default()
    };
    let manager =
        ApprovalManager::from_config(&config, AuditLog::new(dir.path().join("a.jsonl")))
            .unwrap();

    assert_eq!(
        manager.auto_approve_levels(),
        vec![RiskLevel::Low, RiskLevel::Medium]
    );
    // A zero timeout disables expiry
    manager
        .create_approval_request("step", "payload", "high")
        .await
        .unwrap();
    assert!(manager.expire_stale().await.unwrap().is_empty());
}

#[test]
fn test_from_config_rejects_oversized_timeout() {
    let dir = TempDir::new().unwrap();
    let config = ApprovalConfig {
        pending_timeout_secs: Some(u64::MAX),
        ..ApprovalConfig::default()
    };
    let result = ApprovalManager::from_config(&config, AuditLog::new(dir.path().join("a.jsonl")));
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[tokio::test]
async fn test_on_resolve_fires_once() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);
    let calls = Arc::new(AtomicUsize::new(0));

    let request = manager
        .create_approval_request("step", "payload", "high")
        .await
        .unwrap();
    let counter = calls.clone();
    manager
        .on_resolve(
            &request.id,
            Box::new(move |resolved| {
                assert_eq!(resolved.status, ApprovalStatus::Skipped);
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

    manager.resolve(&request.id, "skip", "", "").await.unwrap();
    let _ = manager.resolve(&request.id, "skip", "", "").await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let err = manager
        .on_resolve(&request.id, Box::new(|_| {}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownRequest(_)));
}

#[tokio::test]
async fn test_wait_for_resolution_from_another_task() {
    let dir = TempDir::new().unwrap();
    let manager = Arc::new(manager_in(&dir));

    let request = manager
        .create_approval_request("SQL execution", "TRUNCATE t", "critical")
        .await
        .unwrap();
    let rx = manager.wait_for(&request.id).await.unwrap();

    let mgr = manager.clone();
    let id = request.id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        mgr.resolve(&id, "approve", "", "ok").await.unwrap();
    });

    let resolved = tokio::time::timeout(std::time::Duration::from_secs(5), rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.status, ApprovalStatus::Approved);
    assert_eq!(resolved.user_response, "ok");
}

#[tokio::test]
async fn test_expire_stale_rejects_old_requests() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir).with_pending_timeout(chrono::Duration::zero());

    let request = manager
        .create_approval_request("SQL execution", "DROP TABLE x", "critical")
        .await
        .unwrap();
    let rx = manager.wait_for(&request.id).await.unwrap();

    let expired = manager.expire_stale().await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].status, ApprovalStatus::Rejected);
    assert!(expired[0].user_response.contains("auto-rejected"));
    assert!(manager.pending().await.is_empty());
    assert_eq!(rx.await.unwrap().status, ApprovalStatus::Rejected);

    let lines = audit_lines(&dir);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1]["event"], "expired");
}

#[tokio::test]
async fn test_expire_without_timeout_is_noop() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);
    manager
        .create_approval_request("step", "payload", "critical")
        .await
        .unwrap();
    assert!(manager.expire_stale().await.unwrap().is_empty());
    assert_eq!(manager.pending().await.len(), 1);
}

#[tokio::test]
async fn test_history_and_audit_tail() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);

    for i in 0..5 {
        manager
            .create_approval_request("step", &format!("SELECT {i}"), "low")
            .await
            .unwrap();
    }

    let recent = manager.get_history(2).await;
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[1].content, "SELECT 4");

    let tail = manager.audit_tail(3).await.unwrap();
    assert_eq!(tail.len(), 3);
    assert_eq!(tail[0].content, "SELECT 2");
    assert_eq!(tail[2].event, AuditEvent::Created);

    // A fresh manager on the same file still sees the old records
    let reopened = manager_in(&dir);
    assert_eq!(reopened.audit_tail(100).await.unwrap().len(), 5);
    assert!(reopened.history().await.is_empty());
}

#[tokio::test]
async fn test_audit_tail_of_missing_file_is_empty() {
    let dir = TempDir::new().unwrap();
    let log = AuditLog::new(dir.path().join("nested").join("none.jsonl"));
    assert!(log.tail(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_audit_failure_leaves_state_unchanged() {
    let dir = TempDir::new().unwrap();
    // A directory where the log file should be makes every append fail
    let log_path = dir.path().join("approvals.jsonl");
    std::fs::create_dir(&log_path).unwrap();
    let manager = ApprovalManager::new(AuditLog::new(&log_path));

    let err = manager
        .create_approval_request("step", "payload", "high")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Audit(_)));
    assert!(manager.pending().await.is_empty());
    assert!(manager.history().await.is_empty());
}

#[test]
fn test_request_ids_are_short_tokens() {
    let a = ApprovalRequest::new("step", "payload", RiskLevel::High);
    let b = ApprovalRequest::new("step", "payload", RiskLevel::High);
    assert_eq!(a.id.len(), 8);
    assert_ne!(a.id, b.id);
    assert!(a.is_pending());
}

#[test]
fn test_risk_levels_are_ordered() {
    assert!(RiskLevel::Low < RiskLevel::Medium);
    assert!(RiskLevel::High < RiskLevel::Critical);
    assert_eq!(RiskLevel::ALL.iter().max(), Some(&RiskLevel::Critical));
}
