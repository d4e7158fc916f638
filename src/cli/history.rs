//! `bi-agent history`: tail the approval audit log

use anyhow::{Context, Result};
use bi_agent_core::approval::{AuditLog, AuditRecord};

use crate::config::AppConfig;

pub async fn run(config: &AppConfig, limit: usize) -> Result<()> {
    let log = AuditLog::new(config.audit_log_path());
    let records = log
        .tail(limit)
        .await
        .with_context(|| format!("Failed to read {}", log.path().display()))?;

    if records.is_empty() {
        println!("No approval events recorded in {}", log.path().display());
        return Ok(());
    }
    for record in &records {
        println!("{}", format_record(record));
    }
    Ok(())
}

/// One-line rendering shared with the chat `/history` command
pub fn format_record(record: &AuditRecord) -> String {
    let content = match &record.modified_content {
        Some(modified) => format!("{} → {}", record.content, modified),
        None => record.content.clone(),
    };
    format!(
        "{}  {:<8} {}  {:<8} {:<8} {}: {} ({})",
        record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
        record.event.as_str(),
        record.id,
        record.risk_level.as_str(),
        record.status.as_str(),
        record.step,
        truncate(&content, 80),
        record.user_response
    )
}

fn truncate(text: &str, max_chars: usize) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= max_chars {
        single_line
    } else {
        let cut: String = single_line.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
