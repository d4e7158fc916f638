//! Flow graph data: questions, answers and flow definitions.

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Answers collected so far, keyed by question id
///
/// Ordered so that two runs with the same inputs compare and print equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Answers(BTreeMap<String, Value>);

impl Answers {
    /// Empty answer set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored value
    pub fn get(&self, id: &str) -> Option<&Value> {
        self.0.get(id)
    }

    /// Stored value as a string, if it is one
    pub fn get_str(&self, id: &str) -> Option<&str> {
        self.0.get(id).and_then(Value::as_str)
    }

    /// Stored value as an integer, accepting numeric strings too
    pub fn get_i64(&self, id: &str) -> Option<i64> {
        match self.0.get(id)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Whether a confirm question was answered `y`
    pub fn is_yes(&self, id: &str) -> bool {
        self.get_str(id) == Some("y")
    }

    /// Store a value, overwriting any previous answer for `id`
    pub fn insert(&mut self, id: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(id.into(), value.into());
    }

    /// Whether `id` has an answer
    pub fn contains(&self, id: &str) -> bool {
        self.0.contains_key(id)
    }

    /// Number of answers
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no answers were collected
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate answers in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Answers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Function of the answers collected so far
pub type AnswerFn<T> = Arc<dyn Fn(&Answers) -> anyhow::Result<T> + Send + Sync>;

/// Validator: `Some(message)` rejects the input
pub type Validator = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Transform from the validated string to the stored value
pub type Transform = Arc<dyn Fn(&str) -> anyhow::Result<Value> + Send + Sync>;

/// A field that is either a literal or computed from earlier answers
pub enum FieldValue<T> {
    /// Fixed value
    Static(T),
    /// Computed when the field is needed
    Dynamic(AnswerFn<T>),
}

impl<T: Clone> FieldValue<T> {
    /// Evaluate against the current answers
    pub fn resolve(&self, answers: &Answers) -> anyhow::Result<T> {
        match self {
            FieldValue::Static(value) => Ok(value.clone()),
            FieldValue::Dynamic(f) => f(answers),
        }
    }
}

impl<T: Clone> Clone for FieldValue<T> {
    fn clone(&self) -> Self {
        match self {
            FieldValue::Static(value) => FieldValue::Static(value.clone()),
            FieldValue::Dynamic(f) => FieldValue::Dynamic(Arc::clone(f)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for FieldValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Static(value) => f.debug_tuple("Static").field(value).finish(),
            FieldValue::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// How an answer is read and echoed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    /// One of a fixed list, by 1-based index or value
    Choice,
    /// Free text
    Text,
    /// Free text, echoed masked
    Password,
    /// Yes/no, stored as `y` or `n`
    Confirm,
}

/// One selectable option of a choice question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    /// Stored value
    pub value: String,
    /// Display label
    pub label: String,
}

/// A node of the flow graph
#[derive(Clone)]
pub struct Question {
    /// Unique key within the flow
    pub id: String,
    /// Text shown to the user
    pub prompt: FieldValue<String>,
    /// Input handling
    pub input_type: InputType,
    /// Options for `Choice` questions
    pub choices: Vec<Choice>,
    /// Used when the user submits empty input
    pub default: Option<FieldValue<String>>,
    /// Rejects bad input before it is stored
    pub validator: Option<Validator>,
    /// Converts the validated string before storage
    pub transform: Option<Transform>,
    /// Next node; `None` completes the flow
    pub next_question: FieldValue<Option<String>>,
}

impl Question {
    /// Question with a static prompt that ends the flow unless routed with `then`
    pub fn new(id: impl Into<String>, input_type: InputType, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: FieldValue::Static(prompt.into()),
            input_type,
            choices: Vec::new(),
            default: None,
            validator: None,
            transform: None,
            next_question: FieldValue::Static(None),
        }
    }

    /// Free-text question
    pub fn text(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(id, InputType::Text, prompt)
    }

    /// Masked free-text question
    pub fn password(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(id, InputType::Password, prompt)
    }

    /// Yes/no question
    pub fn confirm(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(id, InputType::Confirm, prompt)
    }

    /// Pick-one question over `(value, label)` pairs
    pub fn choice<V, L>(
        id: impl Into<String>,
        prompt: impl Into<String>,
        choices: impl IntoIterator<Item = (V, L)>,
    ) -> Self
    where
        V: Into<String>,
        L: Into<String>,
    {
        let mut question = Self::new(id, InputType::Choice, prompt);
        question.choices = choices
            .into_iter()
            .map(|(value, label)| Choice {
                value: value.into(),
                label: label.into(),
            })
            .collect();
        question
    }

    /// Prompt computed from earlier answers
    #[must_use]
    pub fn with_dynamic_prompt<F>(mut self, f: F) -> Self
    where
        F: Fn(&Answers) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.prompt = FieldValue::Dynamic(Arc::new(f));
        self
    }

    /// Literal default
    #[must_use]
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(FieldValue::Static(default.into()));
        self
    }

    /// Default computed from earlier answers
    #[must_use]
    pub fn with_dynamic_default<F>(mut self, f: F) -> Self
    where
        F: Fn(&Answers) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.default = Some(FieldValue::Dynamic(Arc::new(f)));
        self
    }

    /// Reject input for which `f` returns an error message
    #[must_use]
    pub fn with_validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(f));
        self
    }

    /// Convert the validated input before storing it
    #[must_use]
    pub fn with_transform<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(f));
        self
    }

    /// Always continue with `next`
    #[must_use]
    pub fn then(mut self, next: impl Into<String>) -> Self {
        self.next_question = FieldValue::Static(Some(next.into()));
        self
    }

    /// Route on earlier answers; `Ok(None)` completes the flow
    #[must_use]
    pub fn then_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Answers) -> anyhow::Result<Option<String>> + Send + Sync + 'static,
    {
        self.next_question = FieldValue::Dynamic(Arc::new(f));
        self
    }
}

impl fmt::Debug for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Question")
            .field("id", &self.id)
            .field("input_type", &self.input_type)
            .field("choices", &self.choices)
            .field("next_question", &self.next_question)
            .finish_non_exhaustive()
    }
}

/// Outcome of a flow's completion callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowResult {
    /// Whether the flow achieved its goal
    pub success: bool,
    /// Shown to the user
    pub message: String,
    /// On failure, rewind here instead of ending the flow
    pub retry_from_question: Option<String>,
}

impl FlowResult {
    /// Successful completion
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            retry_from_question: None,
        }
    }

    /// Failure that ends the flow
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            retry_from_question: None,
        }
    }

    /// Failure that rewinds to `question_id`, keeping collected answers
    pub fn retry(message: impl Into<String>, question_id: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            retry_from_question: Some(question_id.into()),
        }
    }
}

/// Future returned by a completion callback
pub type CompletionFuture = BoxFuture<'static, anyhow::Result<FlowResult>>;

/// Completion callback
pub type CompletionFn = Arc<dyn Fn(Answers) -> CompletionFuture + Send + Sync>;

/// A complete question graph plus its completion callback
#[derive(Clone)]
pub struct FlowDefinition {
    /// Identity
    pub flow_id: String,
    /// Banner text
    pub title: String,
    /// Nodes by id
    pub questions: HashMap<String, Question>,
    /// Entry node
    pub first_question: String,
    /// Runs once the graph reaches a node with no next question
    pub on_complete: CompletionFn,
}

impl FlowDefinition {
    /// Empty flow; add nodes with `with_question`
    pub fn new<F, Fut>(
        flow_id: impl Into<String>,
        title: impl Into<String>,
        first_question: impl Into<String>,
        on_complete: F,
    ) -> Self
    where
        F: Fn(Answers) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<FlowResult>> + Send + 'static,
    {
        Self {
            flow_id: flow_id.into(),
            title: title.into(),
            questions: HashMap::new(),
            first_question: first_question.into(),
            on_complete: Arc::new(move |answers| Box::pin(on_complete(answers))),
        }
    }

    /// Add (or replace) a node
    #[must_use]
    pub fn with_question(mut self, question: Question) -> Self {
        self.questions.insert(question.id.clone(), question);
        self
    }

    /// Node by id
    pub fn question(&self, id: &str) -> Option<&Question> {
        self.questions.get(id)
    }
}

impl fmt::Debug for FlowDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&String> = self.questions.keys().collect();
        ids.sort();
        f.debug_struct("FlowDefinition")
            .field("flow_id", &self.flow_id)
            .field("title", &self.title)
            .field("first_question", &self.first_question)
            .field("questions", &ids)
            .finish_non_exhaustive()
    }
}
