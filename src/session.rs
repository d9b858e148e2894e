//! Session state owned by one orchestrator

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::conversation::{ConversationTurn, ConversationWindow};
use crate::usage::{TokenLedger, TokenUsageRecord};

/// Scope over which history and token accounting accumulate
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    history: ConversationWindow,
    ledger: TokenLedger,
}

impl Session {
    pub fn new(history_window: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            ended_at: None,
            history: ConversationWindow::new(history_window),
            ledger: TokenLedger::new(),
        }
    }

    pub fn history(&self) -> &ConversationWindow {
        &self.history
    }

    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut TokenLedger {
        &mut self.ledger
    }

    pub fn add_turn(&mut self, turn: ConversationTurn) {
        self.history.push(turn);
    }

    pub fn record_usage(&mut self, record: TokenUsageRecord) {
        self.ledger.record(record);
    }

    /// Stamp the end time; later calls keep the first stamp
    pub fn end(&mut self) {
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
    }

    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}
