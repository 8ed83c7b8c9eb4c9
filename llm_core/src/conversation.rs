//! Bounded window of prior user/assistant turns.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// What happens once the window holds more than `max_turns` exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncateMode {
    /// Keep the most recent `max_turns` exchanges.
    Sliding,
    /// Start over from an empty window.
    Clear,
}

impl FromStr for TruncateMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sliding" => Ok(TruncateMode::Sliding),
            "clear" => Ok(TruncateMode::Clear),
            other => Err(anyhow::anyhow!("unknown truncate mode: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    max_turns: usize,
    mode: TruncateMode,
}

impl Conversation {
    pub fn new(max_turns: usize, mode: TruncateMode) -> Self {
        Self {
            messages: Vec::new(),
            max_turns,
            mode,
        }
    }

    /// Prior turns, oldest first, without any system prompt.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn turns(&self) -> usize {
        self.messages.len() / 2
    }

    /// Append one completed exchange and enforce the window.
    pub fn record_exchange(&mut self, user: &str, assistant: &str) {
        if self.mode == TruncateMode::Clear && self.turns() >= self.max_turns {
            self.messages.clear();
        }

        self.messages.push(ChatMessage::user(user));
        self.messages.push(ChatMessage::assistant(assistant));

        if self.mode == TruncateMode::Sliding && self.turns() > self.max_turns {
            let keep = self.max_turns * 2;
            let excess = self.messages.len() - keep;
            self.messages.drain(..excess);
        }
    }
}
