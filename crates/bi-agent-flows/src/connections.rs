//! Connection management flow
//!
//! An action menu branching into four sub-graphs that meet again only at
//! completion:
//!
//! - connect: `connect_select`
//! - create: `create_name` → `create_db_type` → (`create_host` → `create_port` →)
//!   `create_database` (→ `create_username` → `create_password`)
//! - edit: `edit_select` → (`edit_host` → `edit_port` →) `edit_database`
//!   (→ `edit_username` → `edit_password`), defaults taken from the record
//! - delete: `delete_select` → `delete_confirm`, gated by a `high` risk
//!   approval request when an approval manager is attached
//!
//! Parenthesised steps are skipped for SQLite.

use anyhow::Context;
use bi_agent_core::approval::{ApprovalAction, RiskLevel, SharedApprovalManager};
use bi_agent_core::flow::{Answers, FlowDefinition, FlowResult, Question};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{FlowsError, Result};
use crate::registry::{ConnectionConfig, ConnectionRegistry, DbType};

/// Flow id of the connection management flow
pub const CONNECTION_FLOW_ID: &str = "connections";

/// Approval step name used for deletions
pub const DELETE_STEP: &str = "Delete connection";

type Records = Arc<BTreeMap<String, ConnectionConfig>>;

/// Build the connection flow from a snapshot of `registry`.
///
/// With an empty registry the action menu only offers `create`.
pub async fn connection_flow(
    registry: Arc<dyn ConnectionRegistry>,
    approvals: Option<SharedApprovalManager>,
) -> Result<FlowDefinition> {
    let records: Records = Arc::new(
        registry
            .list_connections()
            .await?
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect(),
    );

    let mut actions = vec![("create", "Create a new connection")];
    if !records.is_empty() {
        actions.insert(0, ("connect", "Connect to a saved connection"));
        actions.push(("edit", "Edit a connection"));
        actions.push(("delete", "Delete a connection"));
    }

    let completion_records = Arc::clone(&records);
    let mut flow = FlowDefinition::new(
        CONNECTION_FLOW_ID,
        "Database connections",
        "action",
        move |answers: Answers| {
            let registry = Arc::clone(&registry);
            let approvals = approvals.clone();
            let records = Arc::clone(&completion_records);
            async move { complete(registry.as_ref(), approvals, &records, &answers).await }
        },
    )
    .with_question(
        Question::choice("action", "What would you like to do?", actions).then_with(|answers| {
            let next = match answers.get_str("action") {
                Some("connect") => "connect_select",
                Some("create") => "create_name",
                Some("edit") => "edit_select",
                Some("delete") => "delete_select",
                other => anyhow::bail!("unexpected action {:?}", other),
            };
            Ok(Some(next.to_string()))
        }),
    );

    for question in create_questions(&records) {
        flow = flow.with_question(question);
    }
    if !records.is_empty() {
        for question in existing_questions(&records) {
            flow = flow.with_question(question);
        }
    }
    Ok(flow)
}

fn record_choices(records: &Records) -> Vec<(String, String)> {
    records
        .values()
        .map(|c| (c.name.clone(), format!("{} ({})", c.name, c.summary())))
        .collect()
}

fn answered_db_type(answers: &Answers, id: &str) -> anyhow::Result<DbType> {
    let raw = answers
        .get_str(id)
        .with_context(|| format!("{} has not been answered", id))?;
    Ok(raw.parse()?)
}

fn selected<'a>(
    records: &'a BTreeMap<String, ConnectionConfig>,
    answers: &Answers,
    id: &str,
) -> anyhow::Result<&'a ConnectionConfig> {
    let name = answers
        .get_str(id)
        .with_context(|| format!("{} has not been answered", id))?;
    records
        .get(name)
        .with_context(|| format!("connection {:?} is not in the snapshot", name))
}

fn validate_port(value: &str) -> Option<String> {
    match value.trim().parse::<u16>() {
        Ok(port) if port > 0 => None,
        _ => Some("Port must be a number between 1 and 65535.".to_string()),
    }
}

fn port_value(value: &str) -> anyhow::Result<serde_json::Value> {
    let port: u16 = value.trim().parse()?;
    Ok(json!(port))
}

fn non_empty(label: &'static str) -> impl Fn(&str) -> Option<String> + Send + Sync + 'static {
    move |value: &str| {
        value
            .trim()
            .is_empty()
            .then(|| format!("{} must not be empty.", label))
    }
}

fn create_questions(records: &Records) -> Vec<Question> {
    let taken: Vec<String> = records.keys().map(|n| n.to_lowercase()).collect();
    let db_types = DbType::ALL.map(|t| (t.as_str(), t.label()));

    vec![
        Question::text("create_name", "Name for the new connection")
            .with_validator(move |value| {
                let name = value.trim();
                if name.is_empty() {
                    Some("Name must not be empty.".to_string())
                } else if taken.contains(&name.to_lowercase()) {
                    Some(format!("A connection named '{}' already exists.", name))
                } else {
                    None
                }
            })
            .then("create_db_type"),
        Question::choice("create_db_type", "Database type", db_types).then_with(|answers| {
            Ok(Some(
                match answered_db_type(answers, "create_db_type")? {
                    DbType::Sqlite => "create_database",
                    _ => "create_host",
                }
                .to_string(),
            ))
        }),
        Question::text("create_host", "Host")
            .with_default("localhost")
            .with_validator(non_empty("Host"))
            .then("create_port"),
        Question::text("create_port", "Port")
            .with_dynamic_default(|answers| {
                answered_db_type(answers, "create_db_type")?
                    .default_port()
                    .map(|p| p.to_string())
                    .context("database type has no default port")
            })
            .with_validator(validate_port)
            .with_transform(port_value)
            .then("create_database"),
        Question::text("create_database", "Database name")
            .with_dynamic_prompt(|answers| {
                Ok(match answered_db_type(answers, "create_db_type")? {
                    DbType::Sqlite => "Path to the SQLite database file".to_string(),
                    _ => "Database name".to_string(),
                })
            })
            .with_validator(non_empty("Database"))
            .then_with(|answers| {
                Ok(match answered_db_type(answers, "create_db_type")? {
                    DbType::Sqlite => None,
                    _ => Some("create_username".to_string()),
                })
            }),
        Question::text("create_username", "Username")
            .with_validator(non_empty("Username"))
            .then("create_password"),
        Question::password("create_password", "Password"),
    ]
}

fn existing_questions(records: &Records) -> Vec<Question> {
    let choices = record_choices(records);

    let route = Arc::clone(records);
    let host = Arc::clone(records);
    let port = Arc::clone(records);
    let database = Arc::clone(records);
    let database_next = Arc::clone(records);
    let username = Arc::clone(records);
    let confirm = Arc::clone(records);

    vec![
        Question::choice("connect_select", "Which connection?", choices.clone()),
        Question::choice("edit_select", "Which connection do you want to edit?", choices.clone())
            .then_with(move |answers| {
                let record = selected(&route, answers, "edit_select")?;
                Ok(Some(
                    if record.db_type.is_server() {
                        "edit_host"
                    } else {
                        "edit_database"
                    }
                    .to_string(),
                ))
            }),
        Question::text("edit_host", "Host")
            .with_dynamic_default(move |answers| {
                Ok(selected(&host, answers, "edit_select")?.host.clone())
            })
            .with_validator(non_empty("Host"))
            .then("edit_port"),
        Question::text("edit_port", "Port")
            .with_dynamic_default(move |answers| {
                let record = selected(&port, answers, "edit_select")?;
                record
                    .port
                    .or(record.db_type.default_port())
                    .map(|p| p.to_string())
                    .context("connection has no port")
            })
            .with_validator(validate_port)
            .with_transform(port_value)
            .then("edit_database"),
        Question::text("edit_database", "Database")
            .with_dynamic_default(move |answers| {
                Ok(selected(&database, answers, "edit_select")?.database.clone())
            })
            .with_validator(non_empty("Database"))
            .then_with(move |answers| {
                let record = selected(&database_next, answers, "edit_select")?;
                Ok(record
                    .db_type
                    .is_server()
                    .then(|| "edit_username".to_string()))
            }),
        Question::text("edit_username", "Username")
            .with_dynamic_default(move |answers| {
                Ok(selected(&username, answers, "edit_select")?.username.clone())
            })
            .with_validator(non_empty("Username"))
            .then("edit_password"),
        Question::password("edit_password", "New password").with_default(""),
        Question::choice("delete_select", "Which connection do you want to delete?", choices)
            .then("delete_confirm"),
        Question::confirm("delete_confirm", "Delete this connection?").with_dynamic_prompt(
            move |answers| {
                let record = selected(&confirm, answers, "delete_select")?;
                Ok(format!(
                    "Delete connection '{}' ({})? This cannot be undone.",
                    record.name,
                    record.summary()
                ))
            },
        ),
    ]
}

async fn complete(
    registry: &dyn ConnectionRegistry,
    approvals: Option<SharedApprovalManager>,
    records: &BTreeMap<String, ConnectionConfig>,
    answers: &Answers,
) -> anyhow::Result<FlowResult> {
    match answers.get_str("action") {
        Some("connect") => {
            let record = selected(records, answers, "connect_select")?;
            match registry.activate(&record.name).await {
                Ok(()) => Ok(FlowResult::success(format!(
                    "Connected to '{}' ({}).",
                    record.name,
                    record.summary()
                ))),
                Err(FlowsError::ConnectionNotFound(name)) => Ok(FlowResult::failure(format!(
                    "Connection '{}' no longer exists.",
                    name
                ))),
                Err(e) => Err(e.into()),
            }
        }
        Some("create") => {
            let config = created_config(answers)?;
            let retry_from = if config.db_type.is_server() {
                "create_host"
            } else {
                "create_database"
            };
            save_tested(registry, config, retry_from, "saved").await
        }
        Some("edit") => {
            let record = selected(records, answers, "edit_select")?;
            let config = edited_config(record, answers)?;
            let retry_from = if config.db_type.is_server() {
                "edit_host"
            } else {
                "edit_database"
            };
            save_tested(registry, config, retry_from, "updated").await
        }
        Some("delete") => {
            let record = selected(records, answers, "delete_select")?;
            delete(registry, approvals, record, answers.is_yes("delete_confirm")).await
        }
        other => anyhow::bail!("unexpected action {:?}", other),
    }
}

fn answered_port(answers: &Answers, id: &str) -> anyhow::Result<u16> {
    let port = answers
        .get_i64(id)
        .with_context(|| format!("{} has not been answered", id))?;
    Ok(u16::try_from(port)?)
}

fn answered_text(answers: &Answers, id: &str) -> anyhow::Result<String> {
    Ok(answers
        .get_str(id)
        .with_context(|| format!("{} has not been answered", id))?
        .trim()
        .to_string())
}

fn created_config(answers: &Answers) -> anyhow::Result<ConnectionConfig> {
    let name = answered_text(answers, "create_name")?;
    let database = answered_text(answers, "create_database")?;
    match answered_db_type(answers, "create_db_type")? {
        DbType::Sqlite => Ok(ConnectionConfig::sqlite(name, database)),
        db_type => Ok(ConnectionConfig::server(
            name,
            db_type,
            answered_text(answers, "create_host")?,
            database,
            answered_text(answers, "create_username")?,
        )
        .with_port(answered_port(answers, "create_port")?)
        .with_password(
            answers
                .get_str("create_password")
                .context("create_password has not been answered")?,
        )),
    }
}

fn edited_config(
    record: &ConnectionConfig,
    answers: &Answers,
) -> anyhow::Result<ConnectionConfig> {
    let mut config = record.clone();
    config.database = answered_text(answers, "edit_database")?;
    if config.db_type.is_server() {
        config.host = answered_text(answers, "edit_host")?;
        config.port = Some(answered_port(answers, "edit_port")?);
        config.username = answered_text(answers, "edit_username")?;
        if let Some(password) = answers.get_str("edit_password").filter(|p| !p.is_empty()) {
            config.password = password.to_string();
        }
    }
    Ok(config)
}

async fn save_tested(
    registry: &dyn ConnectionRegistry,
    config: ConnectionConfig,
    retry_from: &str,
    verb: &str,
) -> anyhow::Result<FlowResult> {
    if let Err(e) = registry.test_connection(&config).await {
        warn!(name = %config.name, error = %e, "Connection test failed");
        let reason = match e {
            FlowsError::ConnectionTest(reason) => reason,
            other => other.to_string(),
        };
        return Ok(FlowResult::retry(
            format!("Connection test failed: {}. Check the details and try again.", reason),
            retry_from,
        ));
    }

    let name = config.name.clone();
    let summary = config.summary();
    registry.register_connection(config).await?;
    Ok(FlowResult::success(format!(
        "Connection '{}' {} ({}).",
        name, verb, summary
    )))
}

async fn delete(
    registry: &dyn ConnectionRegistry,
    approvals: Option<SharedApprovalManager>,
    record: &ConnectionConfig,
    confirmed: bool,
) -> anyhow::Result<FlowResult> {
    let approved = match approvals {
        Some(manager) => {
            let request = manager
                .create_request(
                    DELETE_STEP,
                    &format!("delete connection '{}' ({})", record.name, record.summary()),
                    RiskLevel::High,
                )
                .await?;
            let status = if request.is_pending() {
                let action = if confirmed {
                    ApprovalAction::Approve
                } else {
                    ApprovalAction::Reject
                };
                let comment =
                    format!("user answered {} in connection flow", answer_word(confirmed));
                manager
                    .resolve_action(&request.id, action, None, Some(comment))
                    .await?
                    .status
            } else {
                request.status
            };
            confirmed && status.allows_execution()
        }
        None => confirmed,
    };

    if !approved {
        info!(name = %record.name, "Connection deletion declined");
        return Ok(FlowResult::failure(format!(
            "Deletion of '{}' cancelled.",
            record.name
        )));
    }

    if registry.delete_connection(&record.name).await? {
        Ok(FlowResult::success(format!(
            "Connection '{}' deleted.",
            record.name
        )))
    } else {
        Ok(FlowResult::failure(format!(
            "Connection '{}' no longer exists.",
            record.name
        )))
    }
}

fn answer_word(confirmed: bool) -> &'static str {
    if confirmed {
        "yes"
    } else {
        "no"
    }
}
