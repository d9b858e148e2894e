//! Conversation Context
//!
//! Rolling window of completed delegation turns. The most recent turns ride
//! along in every delegation envelope so peer agents see prior context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of turns kept per session
pub const DEFAULT_WINDOW_SIZE: usize = 5;

/// Longest response text kept when rendering history as prose
const MAX_RENDERED_CHARS: usize = 500;

/// One completed exchange with a peer agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub request: serde_json::Value,
    pub response: serde_json::Value,
}

impl ConversationTurn {
    pub fn new(agent: &str, request: serde_json::Value, response: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            agent: agent.to_string(),
            request,
            response,
        }
    }
}

/// Bounded FIFO of turns; oldest evicted first
#[derive(Debug, Clone, Serialize)]
pub struct ConversationWindow {
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
}

impl Default for ConversationWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl ConversationWindow {
    /// Capacity is clamped to at least one turn
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        while self.turns.len() >= self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Turns in chronological order
    pub fn iter(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    /// Owned copy of the window for an outbound envelope
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    /// History formatted for prompt injection
    pub fn as_context(&self) -> String {
        if self.turns.is_empty() {
            return String::new();
        }

        let mut context = String::from("[Previous conversation:]\n");
        for turn in &self.turns {
            let request = turn
                .request
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or_default();
            let response = match &turn.response {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            context.push_str(&format!("User: {}\n", request));
            context.push_str(&format!(
                "{}: {}\n",
                turn.agent,
                truncate(&response, MAX_RENDERED_CHARS)
            ));
        }
        context
    }
}

/// Truncate at a UTF-8 boundary, appending an ellipsis when cut
fn truncate(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let cut = text
        .char_indices()
        .take_while(|(i, c)| i + c.len_utf8() <= max_bytes)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    format!("{}...", &text[..cut])
}
