//! Display sink the flow engine renders into.

use std::fmt;
use std::sync::Mutex;

/// Who a transcript turn belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    /// Echo of user input
    User,
    /// Questions and results
    Agent,
    /// Warnings, errors and status
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MessageRole::User => "user",
            MessageRole::Agent => "agent",
            MessageRole::System => "system",
        })
    }
}

/// Where the engine appends transcript turns
pub trait DisplaySink: Send + Sync {
    /// Append one turn to the visible transcript
    fn mount(&self, role: MessageRole, text: &str);

    /// Update the host's input placeholder; `None` restores the default
    fn set_placeholder(&self, _text: Option<&str>) {}
}

/// One recorded turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    /// Speaker
    pub role: MessageRole,
    /// Rendered text
    pub text: String,
}

/// In-memory sink that records every turn
#[derive(Debug, Default)]
pub struct TranscriptSink {
    entries: Mutex<Vec<TranscriptEntry>>,
    placeholder: Mutex<Option<String>>,
}

impl TranscriptSink {
    /// Empty transcript
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every turn so far
    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Texts of every turn by `role`
    pub fn texts(&self, role: MessageRole) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.role == role)
            .map(|e| e.text)
            .collect()
    }

    /// Most recent turn
    pub fn last(&self) -> Option<TranscriptEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last()
            .cloned()
    }

    /// Whether any turn contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.entries().iter().any(|e| e.text.contains(needle))
    }

    /// Number of turns
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Whether nothing was rendered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget all turns
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    /// Current placeholder text
    pub fn placeholder(&self) -> Option<String> {
        self.placeholder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl DisplaySink for TranscriptSink {
    fn mount(&self, role: MessageRole, text: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(TranscriptEntry {
                role,
                text: text.to_string(),
            });
    }

    fn set_placeholder(&self, text: Option<&str>) {
        *self
            .placeholder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = text.map(str::to_string);
    }
}
