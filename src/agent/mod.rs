//! Request Orchestration Pipeline
//!
//! Discovery → Planning → Delegation → Synthesis:
//! - Planner: picks which discovered service(s) and tool to use
//! - Parameter Extractor: structured tool arguments from the raw query
//! - Delegator: concurrent fan-out to peer agents with context envelopes
//! - Synthesizer: one answer from one or more agent responses
//!
//! Every reasoning-dependent stage has a deterministic degraded path, so only
//! a registry failure ends a request in error.

pub mod delegator;
pub mod extractor;
pub mod orchestrator;
pub mod planner;
pub mod synthesizer;

pub use delegator::{DelegationFailure, DelegationResult, Delegator};
pub use extractor::ParameterExtractor;
pub use orchestrator::{Orchestrator, OrchestratorStatus, Stage};
pub use planner::{DelegationPlan, PlannedDelegation, Planner, Strategy};
pub use synthesizer::Synthesizer;

use std::time::Instant;

use crate::claude::{Completion, Reasoner};
use crate::usage::{Operation, TokenLedger, TokenUsageRecord};

/// One reasoning call, accounted in the ledger
///
/// A failed call that reached the model is recorded with zero tokens and its
/// latency. Nothing is recorded when the reasoner is not configured.
pub(crate) async fn reason(
    reasoner: &dyn Reasoner,
    operation: Operation,
    system: &str,
    prompt: &str,
    ledger: &mut TokenLedger,
) -> anyhow::Result<Completion> {
    let start = Instant::now();
    match reasoner.complete(system, prompt).await {
        Ok(completion) => {
            ledger.record(TokenUsageRecord::from_completion(operation, &completion));
            Ok(completion)
        }
        Err(e) => {
            if reasoner.is_available() {
                ledger.record(TokenUsageRecord::new(
                    operation,
                    reasoner.model(),
                    0,
                    0,
                    start.elapsed().as_millis() as u64,
                ));
            }
            Err(e)
        }
    }
}

/// Extract the JSON object embedded in reasoning output
///
/// Takes the span from the first `{` to the last `}`. Nested braces inside
/// string fields or truncated output make this fail; callers degrade.
pub(crate) fn extract_json(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    if end > start {
        Some(&s[start..=end])
    } else {
        None
    }
}

/// Parse the embedded JSON object into `T`
pub(crate) fn parse_embedded<T: serde::de::DeserializeOwned>(s: &str) -> Option<T> {
    let json = extract_json(s)?;
    serde_json::from_str(json).ok()
}
