//! Request Orchestrator
//!
//! Top-level sequencer for one session:
//! Idle → Discovering → Planning → Delegating → Synthesizing → Done.
//!
//! Only a registry failure ends in `Errored`; every later stage has a
//! degraded path that still produces an answer. History and the token
//! ledger persist across requests on the same orchestrator.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::delegator::Delegator;
use super::extractor::ParameterExtractor;
use super::planner::Planner;
use super::synthesizer::Synthesizer;
use crate::claude::{ClaudeClient, Reasoner};
use crate::config::Config;
use crate::discovery::{DiscoveryClient, SearchMode};
use crate::session::Session;
use crate::usage::{LedgerSummary, Operation, TokenUsageRecord};

/// Terminal answer when discovery finds nothing
pub const NO_SERVICES_MESSAGE: &str = "No relevant services found for your request.";

const EMPTY_QUERY_MESSAGE: &str = "Please tell me what you need help with.";

/// Pipeline stage of the current (or last) request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Discovering,
    Planning,
    Delegating,
    Synthesizing,
    Done,
    Errored,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::Planning => "planning",
            Self::Delegating => "delegating",
            Self::Synthesizing => "synthesizing",
            Self::Done => "done",
            Self::Errored => "errored",
        }
    }
}

/// Snapshot for the `status` command
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub session_id: String,
    pub active: bool,
    pub stage: Stage,
    pub requests_processed: usize,
    pub history_turns: usize,
    pub history_capacity: usize,
    pub usage: LedgerSummary,
}

impl fmt::Display for OrchestratorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Session:  {}{}", self.session_id, if self.active { "" } else { " (ended)" })?;
        writeln!(f, "Stage:    {}", self.stage.as_str())?;
        writeln!(f, "Requests: {}", self.requests_processed)?;
        writeln!(f, "History:  {}/{} turns", self.history_turns, self.history_capacity)?;
        write!(f, "{}", self.usage)
    }
}

/// Discovery → Planner → Delegator → Synthesizer for one session
pub struct Orchestrator {
    config: Config,
    discovery: DiscoveryClient,
    planner: Planner,
    extractor: ParameterExtractor,
    delegator: Delegator,
    synthesizer: Synthesizer,
    session: Session,
    stage: Stage,
    requests: usize,
}

impl Orchestrator {
    /// Create with the Claude reasoning client
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let reasoner = Arc::new(ClaudeClient::from_config(&config.reasoning)?);
        Self::with_reasoner(config, reasoner)
    }

    /// Create with any reasoning capability
    pub fn with_reasoner(config: Config, reasoner: Arc<dyn Reasoner>) -> anyhow::Result<Self> {
        config.validate()?;

        let orchestrator = Self {
            discovery: DiscoveryClient::from_config(&config)?,
            planner: Planner::new(reasoner.clone(), config.planner_top_k),
            extractor: ParameterExtractor::new(reasoner.clone()),
            delegator: Delegator::from_config(&config)?,
            synthesizer: Synthesizer::new(reasoner),
            session: Session::new(config.history_window_size),
            stage: Stage::Idle,
            requests: 0,
            config,
        };

        info!("Orchestrator ready: session={}", orchestrator.session.id);
        Ok(orchestrator)
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            session_id: self.session.id.clone(),
            active: self.session.is_active(),
            stage: self.stage,
            requests_processed: self.requests,
            history_turns: self.session.history().len(),
            history_capacity: self.session.history().capacity(),
            usage: self.session.ledger().summary(),
        }
    }

    /// End the session and return its final usage
    pub fn shutdown(&mut self) -> LedgerSummary {
        self.session.end();
        let summary = self.session.ledger().summary();
        info!(
            "Session {} ended: requests={}, calls={}, tokens={}",
            self.session.id, self.requests, summary.calls, summary.total_tokens
        );
        summary
    }

    fn transition(&mut self, next: Stage) {
        debug!("Stage {} → {}", self.stage.as_str(), next.as_str());
        self.stage = next;
    }

    /// Run one request through the full pipeline
    pub async fn process_request(&mut self, query: &str) -> String {
        self.requests += 1;
        self.stage = Stage::Idle;

        let query = query.trim();
        if query.is_empty() {
            self.transition(Stage::Done);
            return EMPTY_QUERY_MESSAGE.to_string();
        }

        info!("Processing request #{}: {} chars", self.requests, query.len());
        let started = Instant::now();

        // Discovery
        self.transition(Stage::Discovering);
        let discovery_start = Instant::now();
        let discovered = self
            .discovery
            .discover(query, SearchMode::Both, self.config.discovery_limit, true)
            .await;
        self.session.record_usage(TokenUsageRecord::new(
            Operation::Discovery,
            "registry",
            0,
            0,
            discovery_start.elapsed().as_millis() as u64,
        ));

        let candidates = match discovered {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Discovery failed: {}", e);
                self.transition(Stage::Errored);
                return format!(
                    "I encountered an error searching for services ({}). \
                     Please try again in a moment.",
                    e
                );
            }
        };

        if candidates.is_empty() {
            info!("No candidates for request #{}", self.requests);
            self.transition(Stage::Done);
            return NO_SERVICES_MESSAGE.to_string();
        }

        // Planning
        self.transition(Stage::Planning);
        let Some(mut plan) = self
            .planner
            .plan(query, &candidates, self.session.ledger_mut())
            .await
        else {
            self.transition(Stage::Done);
            return NO_SERVICES_MESSAGE.to_string();
        };

        for delegation in plan.delegations.iter_mut() {
            if let Some(tool) = delegation.tool.as_ref().filter(|t| t.has_inputs()) {
                delegation.parameters = self
                    .extractor
                    .extract(query, tool, self.session.ledger_mut())
                    .await;
            }
        }

        // Delegation
        self.transition(Stage::Delegating);
        let results = self.delegator.delegate(query, &plan, &mut self.session).await;

        // Synthesis
        self.transition(Stage::Synthesizing);
        let answer = self
            .synthesizer
            .synthesize(query, &results, &plan, self.session.ledger_mut())
            .await;

        self.transition(Stage::Done);
        info!(
            "Request #{} done in {}ms: strategy={}, degraded_plan={}, succeeded={}/{}",
            self.requests,
            started.elapsed().as_millis(),
            plan.strategy.as_str(),
            plan.degraded,
            results.iter().filter(|r| r.is_success()).count(),
            results.len()
        );

        answer
    }
}
