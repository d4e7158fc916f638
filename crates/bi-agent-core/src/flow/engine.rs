use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::display::{DisplaySink, MessageRole};
use super::question::{Answers, FieldValue, FlowDefinition, InputType, Question};
use crate::config::{DynamicFieldPolicy, FlowEngineConfig};

/// Engine state as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// No flow; all input belongs to the host
    Idle,
    /// A question is on screen and the next input answers it
    AwaitingAnswer,
}

struct ActiveFlow {
    flow: FlowDefinition,
    current_question_id: String,
    answers: Answers,
}

/// A dynamic field failed under the strict policy
struct FieldAbort;

/// Why an answer was not accepted
enum Rejection {
    /// Show the message and ask again
    Reprompt(String),
    /// Stop the flow
    Abort,
}

/// Drives one conversational flow at a time
///
/// While a flow is active the host routes every line through
/// [`FlowEngine::handle_input`] first; a `true` return means the engine
/// consumed it.
pub struct FlowEngine {
    config: FlowEngineConfig,
    sink: Option<Arc<dyn DisplaySink>>,
    active: Option<ActiveFlow>,
}

impl FlowEngine {
    /// Engine without a display; output is dropped
    #[must_use]
    pub fn new(config: FlowEngineConfig) -> Self {
        Self {
            config,
            sink: None,
            active: None,
        }
    }

    /// Attach a display sink
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn DisplaySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replace the display sink
    pub fn set_sink(&mut self, sink: Arc<dyn DisplaySink>) {
        self.sink = Some(sink);
    }

    /// Engine configuration
    pub fn config(&self) -> &FlowEngineConfig {
        &self.config
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> FlowState {
        if self.active.is_some() {
            FlowState::AwaitingAnswer
        } else {
            FlowState::Idle
        }
    }

    /// Whether a flow is active
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Id of the active flow
    pub fn active_flow_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.flow.flow_id.as_str())
    }

    /// Id of the question awaiting an answer
    pub fn current_question_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.current_question_id.as_str())
    }

    /// Answers of the active flow
    pub fn answers(&self) -> Option<&Answers> {
        self.active.as_ref().map(|a| &a.answers)
    }

    /// Activate `flow` and render its first question.
    ///
    /// An already active flow is cancelled first. Returns `false`, leaving the
    /// engine idle with nothing mounted, when the first question does not
    /// exist or cannot be rendered.
    pub fn start_flow(&mut self, flow: FlowDefinition) -> bool {
        if flow.question(&flow.first_question).is_none() {
            error!(
                flow_id = %flow.flow_id,
                first_question = %flow.first_question,
                "Flow first question not found"
            );
            if let Some(previous) = self.active.take() {
                warn!(
                    flow_id = %previous.flow.flow_id,
                    "Active flow dropped by a failed start"
                );
                self.placeholder(None);
            }
            return false;
        }

        if let Some(previous) = self.active.take() {
            warn!(
                flow_id = %previous.flow.flow_id,
                replaced_by = %flow.flow_id,
                "Active flow replaced"
            );
            self.mount(
                MessageRole::System,
                &format!("🚫 {} cancelled.", previous.flow.title),
            );
        }

        info!(flow_id = %flow.flow_id, "Flow started");
        self.mount(
            MessageRole::Agent,
            &format!(
                "📋 {}\nType {} to exit at any time.",
                flow.title, self.config.cancel_token
            ),
        );
        self.placeholder(Some(&format!(
            "Answering: {} ({} to exit)",
            flow.title, self.config.cancel_token
        )));

        let active = ActiveFlow {
            current_question_id: flow.first_question.clone(),
            answers: Answers::new(),
            flow,
        };
        self.ask_current(active)
    }

    /// Abort the active flow. Returns `false` when idle.
    pub fn cancel(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        info!(
            flow_id = %active.flow.flow_id,
            question = %active.current_question_id,
            "Flow cancelled"
        );
        self.mount(
            MessageRole::System,
            &format!("🚫 {} cancelled.", active.flow.title),
        );
        self.placeholder(None);
        true
    }

    /// Offer one line of input to the engine.
    ///
    /// Returns `true` when the engine consumed it. Idle engines and
    /// passthrough commands return `false` so the host handles them.
    pub async fn handle_input(&mut self, text: &str) -> bool {
        let Some(active) = self.active.as_ref() else {
            return false;
        };
        let input = text.trim();

        if input.eq_ignore_ascii_case(&self.config.cancel_token) {
            self.cancel();
            return true;
        }

        if let Some(command) = self.command_word(input) {
            if self
                .config
                .passthrough_commands
                .iter()
                .any(|c| c.eq_ignore_ascii_case(command))
            {
                debug!(command, "Passing command through active flow");
                return false;
            }
            let notice = format!(
                "⚠️ Commands are disabled while '{}' is active. Answer the question above or type {}.",
                active.flow.title, self.config.cancel_token
            );
            self.mount(MessageRole::System, &notice);
            return true;
        }

        self.answer(input).await;
        true
    }

    /// First word of `input` when it has the shape of a command: the prefix
    /// followed by a name of letters, digits, `_` or `-`. Absolute paths such
    /// as `/tmp/local.db` are answers.
    fn command_word<'a>(&self, input: &'a str) -> Option<&'a str> {
        let prefix = self.config.command_prefix.as_str();
        if prefix.is_empty() {
            return None;
        }
        let word = input.split_whitespace().next()?;
        let name = word.strip_prefix(prefix)?;
        let mut chars = name.chars();
        let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
        (starts_with_letter && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .then_some(word)
    }

    async fn answer(&mut self, input: &str) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        let Some(question) = active.flow.question(&active.current_question_id).cloned() else {
            self.abort(&active, "current question missing");
            return;
        };

        let resolved = match self.accept(&question, input, &active.answers) {
            Ok(value) => value,
            Err(Rejection::Reprompt(message)) => {
                self.reprompt(active, &message);
                return;
            }
            Err(Rejection::Abort) => {
                self.abort(&active, "dynamic default failed");
                return;
            }
        };

        let echo = match question.input_type {
            InputType::Password => self.config.password_mask.clone(),
            _ => resolved.clone(),
        };
        self.mount(MessageRole::User, &echo);

        let value = match &question.transform {
            Some(transform) => match transform(&resolved) {
                Ok(value) => value,
                Err(e) => {
                    debug!(question = %question.id, error = %e, "Transform rejected answer");
                    self.reprompt(active, &format!("Invalid value: {}", e));
                    return;
                }
            },
            None => Value::String(resolved),
        };
        debug!(
            flow_id = %active.flow.flow_id,
            question = %question.id,
            "Answer stored"
        );
        active.answers.insert(question.id.clone(), value);

        let next = match self.eval(&question.next_question, &active.answers, &question.id, "next")
        {
            Ok(next) => next.flatten(),
            Err(FieldAbort) => {
                self.abort(&active, "next question failed");
                return;
            }
        };

        match next {
            Some(next_id) => {
                if active.flow.question(&next_id).is_none() {
                    error!(
                        flow_id = %active.flow.flow_id,
                        from = %question.id,
                        next = %next_id,
                        "Next question not found"
                    );
                    self.abort(&active, "next question not found");
                    return;
                }
                active.current_question_id = next_id;
                self.ask_current(active);
            }
            None => self.complete(active).await,
        }
    }

    /// Resolve defaults and normalise input for the question type
    fn accept(
        &self,
        question: &Question,
        input: &str,
        answers: &Answers,
    ) -> Result<String, Rejection> {
        let raw = if input.is_empty() {
            let default = match &question.default {
                Some(field) => self
                    .eval(field, answers, &question.id, "default")
                    .map_err(|FieldAbort| Rejection::Abort)?,
                None => None,
            };
            match default {
                Some(default) => default,
                None => return Err(Rejection::Reprompt("An answer is required.".to_string())),
            }
        } else {
            input.to_string()
        };

        let value = match question.input_type {
            InputType::Choice => resolve_choice(question, &raw)?,
            InputType::Confirm => match raw.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" | "true" | "1" => "y".to_string(),
                "n" | "no" | "false" | "0" => "n".to_string(),
                _ => return Err(Rejection::Reprompt("Please answer y or n.".to_string())),
            },
            InputType::Text | InputType::Password => raw,
        };

        if let Some(validator) = &question.validator {
            if let Some(message) = validator(&value) {
                return Err(Rejection::Reprompt(message));
            }
        }
        Ok(value)
    }

    /// Evaluate a dynamic field; `Ok(None)` means it failed under the lenient
    /// policy and should be treated as absent.
    fn eval<T: Clone>(
        &self,
        field: &FieldValue<T>,
        answers: &Answers,
        question_id: &str,
        field_name: &str,
    ) -> Result<Option<T>, FieldAbort> {
        match field.resolve(answers) {
            Ok(value) => Ok(Some(value)),
            Err(e) => match self.config.dynamic_field_policy {
                DynamicFieldPolicy::Lenient => {
                    warn!(question = question_id, field = field_name, error = %e, "Dynamic field failed");
                    Ok(None)
                }
                DynamicFieldPolicy::Strict => {
                    error!(question = question_id, field = field_name, error = %e, "Dynamic field failed");
                    Err(FieldAbort)
                }
            },
        }
    }

    /// Render the current question and make `active` the running flow.
    fn ask_current(&mut self, active: ActiveFlow) -> bool {
        let Some(question) = active.flow.question(&active.current_question_id) else {
            self.abort(&active, "current question missing");
            return false;
        };
        match self.render(question, &active.answers) {
            Ok(text) => {
                self.mount(MessageRole::Agent, &text);
                self.active = Some(active);
                true
            }
            Err(FieldAbort) => {
                self.abort(&active, "prompt failed");
                false
            }
        }
    }

    fn render(&self, question: &Question, answers: &Answers) -> Result<String, FieldAbort> {
        let prompt = self
            .eval(&question.prompt, answers, &question.id, "prompt")?
            .unwrap_or_else(|| question.id.clone());

        let mut text = prompt;
        match question.input_type {
            InputType::Choice => {
                for (i, choice) in question.choices.iter().enumerate() {
                    text.push_str(&format!("\n  {}. {}", i + 1, choice.label));
                }
            }
            InputType::Confirm => text.push_str(" (y/n)"),
            InputType::Text | InputType::Password => {}
        }

        let default = match &question.default {
            Some(field) => self.eval(field, answers, &question.id, "default")?,
            None => None,
        };
        if let Some(default) = default {
            if question.input_type == InputType::Password {
                text.push_str("\n[press Enter to keep the current value]");
            } else {
                text.push_str(&format!("\n[default: {}]", default));
            }
        }
        Ok(text)
    }

    fn reprompt(&mut self, active: ActiveFlow, message: &str) {
        self.mount(MessageRole::System, &format!("⚠️ {}", message));
        self.ask_current(active);
    }

    async fn complete(&mut self, active: ActiveFlow) {
        let flow_id = active.flow.flow_id.clone();
        let future = (active.flow.on_complete)(active.answers.clone());
        let outcome = match AssertUnwindSafe(future).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow::anyhow!("completion handler panicked")),
        };

        match outcome {
            Ok(result) if result.success => {
                info!(flow_id = %flow_id, "Flow completed");
                if !result.message.is_empty() {
                    self.mount(MessageRole::Agent, &format!("✅ {}", result.message));
                }
                self.placeholder(None);
            }
            Ok(result) => {
                if !result.message.is_empty() {
                    self.mount(MessageRole::Agent, &format!("❌ {}", result.message));
                }
                match result.retry_from_question {
                    Some(retry) => {
                        if active.flow.question(&retry).is_none() {
                            error!(flow_id = %flow_id, retry = %retry, "Retry question not found");
                            self.abort(&active, "retry question not found");
                            return;
                        }
                        info!(flow_id = %flow_id, retry = %retry, "Flow retrying");
                        let mut active = active;
                        active.current_question_id = retry;
                        self.ask_current(active);
                    }
                    None => {
                        info!(flow_id = %flow_id, "Flow finished without success");
                        self.placeholder(None);
                    }
                }
            }
            Err(e) => {
                error!(flow_id = %flow_id, error = %e, "Flow completion failed");
                self.mount(
                    MessageRole::System,
                    &format!("❌ {} failed: {}", active.flow.title, e),
                );
                self.placeholder(None);
            }
        }
    }

    /// Stop the flow after an internal error; the engine is left idle.
    fn abort(&mut self, active: &ActiveFlow, reason: &str) {
        error!(
            flow_id = %active.flow.flow_id,
            question = %active.current_question_id,
            reason,
            "Flow aborted"
        );
        self.active = None;
        self.mount(
            MessageRole::System,
            "⚠️ An internal error occurred; the flow was stopped.",
        );
        self.placeholder(None);
    }

    fn mount(&self, role: MessageRole, text: &str) {
        if let Some(sink) = &self.sink {
            sink.mount(role, text);
        }
    }

    fn placeholder(&self, text: Option<&str>) {
        if let Some(sink) = &self.sink {
            sink.set_placeholder(text);
        }
    }
}

fn resolve_choice(question: &Question, raw: &str) -> Result<String, Rejection> {
    let raw = raw.trim();
    if let Ok(index) = raw.parse::<usize>() {
        if (1..=question.choices.len()).contains(&index) {
            return Ok(question.choices[index - 1].value.clone());
        }
    }
    if let Some(choice) = question
        .choices
        .iter()
        .find(|c| c.value.eq_ignore_ascii_case(raw))
    {
        return Ok(choice.value.clone());
    }

    let values: Vec<&str> = question.choices.iter().map(|c| c.value.as_str()).collect();
    Err(Rejection::Reprompt(format!(
        "Invalid selection '{}'. Enter a number between 1 and {} or one of: {}",
        raw,
        question.choices.len(),
        values.join(", ")
    )))
}
