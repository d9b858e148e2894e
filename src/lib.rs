//! Concierge
//!
//! Request-orchestration core for a personal-assistant agent.
//!
//! # Features
//!
//! - **Discovery**: ranked service/tool candidates from a semantic registry
//! - **Planning**: reasoning-backed choice of target service(s) with a
//!   deterministic top-candidate fallback
//! - **Parameter Extraction**: structured tool arguments from the raw request
//! - **Delegation**: bounded-concurrency fan-out to peer agents with rich
//!   context envelopes and conversation history
//! - **Synthesis**: one answer from one or many agent responses
//! - **Ledger**: per-session token, latency and cost accounting
//!
//! # Architecture
//!
//! ```text
//! query ──► Discovery ──► Planner ──► Delegator ──► Synthesizer ──► answer
//!              │            │  ▲          │ │            │
//!           Registry    Reasoner │    Peer agents    Reasoner
//!                          Extractor      │
//!                                  Session (history + ledger)
//! ```

pub mod agent;
pub mod claude;
pub mod config;
pub mod conversation;
pub mod discovery;
pub mod session;
pub mod tokenizer;
pub mod usage;

pub use agent::{
    DelegationFailure, DelegationPlan, DelegationResult, Delegator, Orchestrator,
    OrchestratorStatus, ParameterExtractor, PlannedDelegation, Planner, Stage, Strategy,
    Synthesizer,
};
pub use claude::{ClaudeClient, Completion, Reasoner};
pub use config::{Config, ReasoningConfig};
pub use conversation::{ConversationTurn, ConversationWindow};
pub use discovery::{
    DiscoveryClient, DiscoveryError, IntegrationDetails, RecommendedTool, SearchMode,
    ServiceCandidate,
};
pub use session::Session;
pub use tokenizer::TokenCounter;
pub use usage::{LedgerSummary, Operation, TokenLedger, TokenUsageRecord};
