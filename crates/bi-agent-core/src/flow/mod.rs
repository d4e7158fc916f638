//! Flow - Inline conversational question flows
//!
//! A flow is a small graph of questions asked one at a time inside the chat
//! transcript. The host hands every line of input to [`FlowEngine`] first;
//! answers are validated, echoed and stored until the graph runs out of
//! questions, then the flow's completion callback decides the outcome.

pub mod display;
pub mod engine;
pub mod question;

pub use display::{DisplaySink, MessageRole, TranscriptEntry, TranscriptSink};
pub use engine::{FlowEngine, FlowState};
pub use question::{
    Answers, Choice, CompletionFn, FieldValue, FlowDefinition, FlowResult, InputType, Question,
};

#[cfg(test)]
mod tests;
