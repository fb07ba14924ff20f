use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;

use crate::models::chat::ChatMessage;

/// Speaker of a recorded turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One message exchanged in a conversation. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    role: TurnRole,
    content: String,
}

impl Turn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }

    pub fn role(&self) -> TurnRole {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn to_chat_message(&self) -> ChatMessage {
        match self.role {
            TurnRole::User => ChatMessage::user(self.content.clone()),
            TurnRole::Assistant => ChatMessage::assistant(self.content.clone()),
        }
    }
}

/// Conversation memory owned by one session.
///
/// Recent turns are kept in chronological order; the running summary logically
/// precedes all of them. Mutation goes through [`super::SummarizingPolicy`], which
/// keeps the estimated size of `turns` within `token_budget`.
#[derive(Debug, Clone)]
pub struct Memory {
    turns: VecDeque<Turn>,
    summary: Option<String>,
    token_budget: usize,
    created_at: Instant,
    pub metadata: MemoryMetadata,
}

/// Counters for monitoring and the `memoryInfo` response block.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetadata {
    /// Turns ever recorded, including the ones folded into the summary.
    pub total_turns: usize,
    pub summarizations: usize,
    pub failed_summarizations: usize,
}

impl Memory {
    pub fn new(token_budget: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            summary: None,
            token_budget,
            created_at: Instant::now(),
            metadata: MemoryMetadata::default(),
        }
    }

    pub fn turns(&self) -> impl ExactSizeIterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn token_budget(&self) -> usize {
        self.token_budget
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            recent_messages: self.turns.iter().cloned().collect(),
            summary: self.summary.clone(),
            total_messages: self.turns.len(),
        }
    }

    pub(super) fn push_turn(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        self.metadata.total_turns += 1;
    }

    pub(super) fn pop_oldest(&mut self) -> Option<Turn> {
        self.turns.pop_front()
    }

    /// Put turns back at the front, preserving their original order.
    pub(super) fn restore_oldest(&mut self, turns: Vec<Turn>) {
        for turn in turns.into_iter().rev() {
            self.turns.push_front(turn);
        }
    }

    pub(super) fn set_summary(&mut self, summary: String) {
        let trimmed = summary.trim();
        self.summary = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
    }
}

/// Read-only view of a session's memory, as handed to the model and the history route.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    pub recent_messages: Vec<Turn>,
    pub summary: Option<String>,
    pub total_messages: usize,
}

impl MemorySnapshot {
    /// Running summary as a system message, followed by the recent turns.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.recent_messages.len() + 1);
        if let Some(summary) = &self.summary {
            messages.push(ChatMessage::system(format!(
                "Summary of the earlier conversation:\n{}",
                summary
            )));
        }
        messages.extend(self.recent_messages.iter().map(Turn::to_chat_message));
        messages
    }
}
