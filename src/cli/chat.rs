//! Interactive chat session
//!
//! Line-oriented REPL. Every line is offered to the flow engine first;
//! whatever it does not consume is dispatched as a slash command.

use anyhow::{Context, Result};
use bi_agent_core::approval::{
    classify_sql_risk, ApprovalManager, ApprovalRequest, ApprovalStatus, AuditLog,
    SharedApprovalManager,
};
use bi_agent_core::config::FlowEngineConfig;
use bi_agent_core::flow::{DisplaySink, FlowEngine, MessageRole};
use bi_agent_flows::{
    auth_setup_flow, connection_flow, ConnectionRegistry, CredentialStore,
    FileConnectionRegistry, MemoryCredentialStore, Provider,
};
use chrono::Utc;
use secrecy::SecretString;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use super::history::format_record;
use crate::config::AppConfig;

/// A slash command definition.
struct Command {
    name: &'static str,
    usage: &'static str,
    about: &'static str,
}

const COMMANDS: &[Command] = &[
    Command {
        name: "help",
        usage: "",
        about: "Show this help",
    },
    Command {
        name: "auth",
        usage: "",
        about: "Configure an LLM provider key",
    },
    Command {
        name: "connections",
        usage: "",
        about: "Connect, create, edit or delete database connections",
    },
    Command {
        name: "sql",
        usage: "<statement>",
        about: "Submit a statement for risk review",
    },
    Command {
        name: "pending",
        usage: "",
        about: "List approvals waiting for a decision",
    },
    Command {
        name: "approve",
        usage: "<id> [comment]",
        about: "Approve a pending request",
    },
    Command {
        name: "modify",
        usage: "<id> <content>",
        about: "Approve with replacement content",
    },
    Command {
        name: "reject",
        usage: "<id> [comment]",
        about: "Reject a pending request",
    },
    Command {
        name: "skip",
        usage: "<id> [comment]",
        about: "Skip a pending request",
    },
    Command {
        name: "history",
        usage: "[n]",
        about: "Show the last n approval events",
    },
    Command {
        name: "quit",
        usage: "",
        about: "Exit (also /exit)",
    },
];

/// Approval step name for submitted statements
const SQL_STEP: &str = "SQL execution";

const DEFAULT_HISTORY: usize = 10;

/// Terminal sink; remembers the placeholder so the prompt can show it
#[derive(Default)]
pub struct StdoutSink {
    placeholder: Mutex<Option<String>>,
}

impl StdoutSink {
    fn prompt(&self) -> String {
        let placeholder = self
            .placeholder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match placeholder.as_deref() {
            Some(text) => format!("[{}] > ", text),
            None => "> ".to_string(),
        }
    }
}

impl DisplaySink for StdoutSink {
    fn mount(&self, role: MessageRole, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = match role {
            MessageRole::User => writeln!(out, "  ↳ {}", text),
            MessageRole::Agent => writeln!(out, "{}", text),
            MessageRole::System => writeln!(out, "· {}", text),
        };
    }

    fn set_placeholder(&self, text: Option<&str>) {
        *self
            .placeholder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = text.map(str::to_string);
    }
}

/// Chat session state
pub struct App {
    engine: FlowEngine,
    approvals: SharedApprovalManager,
    credentials: Arc<dyn CredentialStore>,
    registry: Arc<dyn ConnectionRegistry>,
    sink: Arc<dyn DisplaySink>,
    pub should_quit: bool,
}

impl App {
    pub fn new(
        flow_config: &FlowEngineConfig,
        approvals: SharedApprovalManager,
        credentials: Arc<dyn CredentialStore>,
        registry: Arc<dyn ConnectionRegistry>,
        sink: Arc<dyn DisplaySink>,
    ) -> Self {
        Self {
            engine: FlowEngine::new(flow_config.clone()).with_sink(Arc::clone(&sink)),
            approvals,
            credentials,
            registry,
            sink,
            should_quit: false,
        }
    }

    fn push_system(&self, content: impl AsRef<str>) {
        self.sink.mount(MessageRole::System, content.as_ref());
    }

    fn push_agent(&self, content: impl AsRef<str>) {
        self.sink.mount(MessageRole::Agent, content.as_ref());
    }

    /// Greeting with provider status
    pub async fn welcome(&self) {
        let mut configured = Vec::new();
        for provider in Provider::ALL {
            if self.credentials.has_key(provider).await {
                configured.push(provider.label());
            }
        }
        let status = if configured.is_empty() {
            "No LLM provider configured yet; run /auth.".to_string()
        } else {
            format!("LLM providers: {}.", configured.join(", "))
        };
        self.push_agent(format!(
            "BI Agent v{}. {} Type /help for commands.",
            env!("CARGO_PKG_VERSION"),
            status
        ));
    }

    /// Process one line of input
    pub async fn handle_line(&mut self, line: &str) {
        if self.engine.handle_input(line).await {
            return;
        }

        let input = line.trim();
        if input.is_empty() {
            return;
        }

        self.expire_stale().await;
        if input.starts_with('/') {
            self.dispatch(input).await;
        } else {
            self.push_system("Only slash commands are available here. Type /help for the list.");
        }
    }

    async fn expire_stale(&self) {
        match self.approvals.expire_stale().await {
            Ok(expired) => {
                for request in expired {
                    self.push_system(format!(
                        "⌛ Approval {} ({}) timed out and was rejected.",
                        request.id, request.step_name
                    ));
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to expire stale approvals");
                self.push_system(e.user_message());
            }
        }
    }

    async fn dispatch(&mut self, input: &str) {
        let (name, rest) = split_command(input);
        match name.as_str() {
            "help" => self.show_help(),
            "quit" | "exit" => self.should_quit = true,
            "auth" => {
                let flow = auth_setup_flow(Arc::clone(&self.credentials));
                self.engine.start_flow(flow);
            }
            "connections" => {
                let approvals = Some(Arc::clone(&self.approvals));
                match connection_flow(Arc::clone(&self.registry), approvals).await {
                    Ok(flow) => {
                        self.engine.start_flow(flow);
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to load connections");
                        self.push_system(format!("❌ Could not load connections: {}", e));
                    }
                }
            }
            "sql" => self.submit_sql(rest).await,
            "pending" => self.show_pending().await,
            "approve" | "reject" | "skip" => self.resolve(&name, rest).await,
            "modify" => self.modify(rest).await,
            "history" => self.show_history(rest).await,
            other => self.push_system(format!("Unknown command: /{}", other)),
        }
    }

    fn show_help(&self) {
        let mut help_text = String::from("Available commands:\n");
        for cmd in COMMANDS {
            let invocation = if cmd.usage.is_empty() {
                format!("/{}", cmd.name)
            } else {
                format!("/{} {}", cmd.name, cmd.usage)
            };
            help_text.push_str(&format!("  {:<26} {}\n", invocation, cmd.about));
        }
        help_text.push_str("While a question is on screen, type /cancel to leave it.");
        self.push_system(help_text);
    }

    async fn submit_sql(&self, statement: &str) {
        if statement.is_empty() {
            self.push_system("Usage: /sql <statement>");
            return;
        }

        let risk = classify_sql_risk(statement);
        match self.approvals.create_request(SQL_STEP, statement, risk).await {
            Ok(request) if request.status == ApprovalStatus::Approved => {
                self.push_agent(format!(
                    "✅ Auto-approved ({} risk) as {}. Cleared for execution.",
                    risk, request.id
                ));
            }
            Ok(request) => {
                self.push_agent(format!(
                    "⏸️ {} risk statement needs approval (id {}).\n\
                     Use /approve {id}, /modify {id} <sql>, /reject {id} or /skip {id}.",
                    capitalize(risk.as_str()),
                    request.id,
                    id = request.id
                ));
            }
            Err(e) => self.push_system(e.user_message()),
        }
    }

    async fn show_pending(&self) {
        let pending = self.approvals.pending().await;
        if pending.is_empty() {
            self.push_system("No approvals are waiting.");
            return;
        }
        let now = Utc::now();
        let lines: Vec<String> = pending
            .iter()
            .map(|r| {
                let age = (now - r.timestamp).num_seconds().max(0);
                format!(
                    "  {} [{}] {}: {} ({}s ago)",
                    r.id, r.risk_level, r.step_name, r.content, age
                )
            })
            .collect();
        self.push_system(format!("Pending approvals:\n{}", lines.join("\n")));
    }

    async fn resolve(&self, action: &str, rest: &str) {
        let (id, comment) = split_first(rest);
        if id.is_empty() {
            self.push_system(format!("Usage: /{} <id> [comment]", action));
            return;
        }
        match self.approvals.resolve(id, action, "", comment).await {
            Ok(request) => self.report_resolution(&request),
            Err(e) => self.push_system(e.user_message()),
        }
    }

    async fn modify(&self, rest: &str) {
        let (id, content) = split_first(rest);
        if id.is_empty() || content.is_empty() {
            self.push_system("Usage: /modify <id> <content>");
            return;
        }
        match self.approvals.resolve(id, "modify", content, "").await {
            Ok(request) => self.report_resolution(&request),
            Err(e) => self.push_system(e.user_message()),
        }
    }

    fn report_resolution(&self, request: &ApprovalRequest) {
        let icon = match request.status {
            ApprovalStatus::Approved | ApprovalStatus::Modified => "✅",
            ApprovalStatus::Rejected => "🚫",
            ApprovalStatus::Skipped => "⏭️",
            ApprovalStatus::Pending => "⏸️",
        };
        let mut message = format!("{} {} is now {}.", icon, request.id, request.status);
        if request.status.allows_execution() {
            message.push_str(&format!(
                " Cleared for execution: {}",
                request.effective_content()
            ));
        }
        self.push_agent(message);
    }

    async fn show_history(&self, rest: &str) {
        let limit = match rest.trim() {
            "" => DEFAULT_HISTORY,
            raw => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    self.push_system("Usage: /history [n]");
                    return;
                }
            },
        };
        match self.approvals.audit_tail(limit).await {
            Ok(records) if records.is_empty() => self.push_system("No approval events yet."),
            Ok(records) => {
                let lines: Vec<String> = records.iter().map(format_record).collect();
                self.push_system(lines.join("\n"));
            }
            Err(e) => self.push_system(e.user_message()),
        }
    }
}

/// `/name rest` → (lowercased name, trimmed rest)
fn split_command(input: &str) -> (String, &str) {
    let body = input.strip_prefix('/').unwrap_or(input);
    match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name.to_lowercase(), rest.trim()),
        None => (body.to_lowercase(), ""),
    }
}

/// First word and the trimmed remainder
fn split_first(text: &str) -> (&str, &str) {
    let text = text.trim();
    match text.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, rest.trim()),
        None => (text, ""),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Seed the credential store from provider environment variables
async fn seed_credentials(store: &dyn CredentialStore) -> Result<()> {
    for provider in Provider::ALL {
        let Ok(key) = std::env::var(provider.env_var()) else {
            continue;
        };
        if key.trim().is_empty() {
            continue;
        }
        store
            .save_key(provider, SecretString::from(key.trim().to_string()))
            .await
            .with_context(|| format!("Failed to load {}", provider.env_var()))?;
    }
    Ok(())
}

/// Run the interactive session until EOF or `/quit`
pub async fn run(config: AppConfig) -> Result<()> {
    let audit_path = config.audit_log_path();
    let approvals = Arc::new(ApprovalManager::from_config(
        &config.approval,
        AuditLog::new(&audit_path),
    )?);
    let registry: Arc<dyn ConnectionRegistry> =
        Arc::new(FileConnectionRegistry::new(config.registry_path()));
    let credentials: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
    seed_credentials(credentials.as_ref()).await?;

    let sink = Arc::new(StdoutSink::default());
    let mut app = App::new(
        &config.flow,
        approvals,
        credentials,
        registry,
        sink.clone(),
    );

    info!(audit_log = %audit_path.display(), "Chat session started");
    app.welcome().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}", sink.prompt());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        app.handle_line(&line).await;
        if app.should_quit {
            break;
        }
    }

    info!("Chat session ended");
    Ok(())
}
