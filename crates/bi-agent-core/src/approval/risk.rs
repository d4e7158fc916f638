//! Stateless risk classification for SQL payloads.

use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tracing::warn;

use super::types::RiskLevel;

/// Classify a SQL string by its most dangerous statement.
///
/// Multi-statement scripts take the maximum over all statements. An
/// `UPDATE` without a `WHERE` clause is treated like a bulk delete, and
/// `EXPLAIN ANALYZE` is classified by the statement it runs. SQL that does
/// not parse is `High` so it always interrupts.
#[must_use]
pub fn classify_sql_risk(sql: &str) -> RiskLevel {
    if sql.trim().is_empty() {
        return RiskLevel::Low;
    }
    match Parser::parse_sql(&GenericDialect {}, sql) {
        Ok(statements) => statements
            .iter()
            .map(statement_risk)
            .max()
            .unwrap_or(RiskLevel::Low),
        Err(e) => {
            warn!(error = %e, "SQL did not parse; treating as high risk");
            RiskLevel::High
        }
    }
}

fn statement_risk(statement: &Statement) -> RiskLevel {
    match statement {
        Statement::Query(query) => query_risk(query),
        // EXPLAIN ANALYZE executes the statement
        Statement::Explain {
            analyze, statement, ..
        } => {
            if *analyze {
                statement_risk(statement)
            } else {
                RiskLevel::Low
            }
        }
        Statement::ExplainTable { .. }
        | Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowCreate { .. }
        | Statement::ShowFunctions { .. }
        | Statement::ShowVariable { .. }
        | Statement::ShowCollation { .. } => RiskLevel::Low,
        Statement::Insert { .. } | Statement::Merge { .. } => RiskLevel::Medium,
        Statement::Update { selection, .. } => {
            if selection.is_some() {
                RiskLevel::Medium
            } else {
                RiskLevel::Critical
            }
        }
        Statement::Delete { .. } | Statement::Drop { .. } | Statement::Truncate { .. } => {
            RiskLevel::Critical
        }
        // DDL, grants and everything else
        _ => RiskLevel::High,
    }
}

fn query_risk(query: &Query) -> RiskLevel {
    let ctes = query
        .with
        .iter()
        .flat_map(|with| with.cte_tables.iter())
        .map(|cte| query_risk(&cte.query));
    ctes.fold(set_expr_risk(&query.body), RiskLevel::max)
}

fn set_expr_risk(body: &SetExpr) -> RiskLevel {
    match body {
        // SELECT ... INTO creates a table
        SetExpr::Select(select) if select.into.is_some() => RiskLevel::High,
        SetExpr::Select(_) | SetExpr::Values(_) => RiskLevel::Low,
        SetExpr::Query(query) => query_risk(query),
        SetExpr::SetOperation { left, right, .. } => {
            set_expr_risk(left).max(set_expr_risk(right))
        }
        SetExpr::Insert(statement) => statement_risk(statement),
        _ => RiskLevel::High,
    }
}
