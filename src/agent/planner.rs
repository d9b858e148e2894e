//! Delegation Planner
//!
//! Interprets discovery results with one reasoning call and decides which
//! service(s) and tool to delegate to. Services named in the reasoning output
//! are resolved back to the original candidates by exact name, so nothing the
//! model writes about endpoints or tools ever reaches the plan.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::claude::Reasoner;
use crate::discovery::{RecommendedTool, ServiceCandidate};
use crate::usage::{Operation, TokenLedger};

/// Confidence ceiling for plans built without a usable reasoning call
pub const DEGRADED_CONFIDENCE_CAP: f64 = 0.5;

const SYSTEM_PROMPT: &str = "You are the planning component of a personal assistant. \
    You read a user request and a list of candidate services found in a service registry, \
    and decide which service or services should handle the request. \
    Respond with a single JSON object and nothing else.";

/// Single- or multi-agent delegation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    SingleAgent,
    MultiAgent,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleAgent => "single_agent",
            Self::MultiAgent => "multi_agent",
        }
    }
}

/// One target of a plan
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedDelegation {
    pub service: ServiceCandidate,
    pub tool: Option<RecommendedTool>,
    pub parameters: Map<String, Value>,
}

impl PlannedDelegation {
    pub fn new(service: ServiceCandidate) -> Self {
        let tool = service.recommended_tool.clone();
        Self {
            service,
            tool,
            parameters: Map::new(),
        }
    }
}

/// Produced once per request, consumed once by the delegator
#[derive(Debug, Clone)]
pub struct DelegationPlan {
    pub rationale: String,
    pub intent: Option<String>,
    pub strategy: Strategy,
    pub confidence: f64,
    pub delegations: Vec<PlannedDelegation>,
    /// Built by the deterministic fallback rather than the reasoning call
    pub degraded: bool,
}

impl DelegationPlan {
    pub fn service_names(&self) -> Vec<&str> {
        self.delegations.iter().map(|d| d.service.name.as_str()).collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisJson {
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    selected_services: Vec<Selection>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Selection {
    Named { name: String },
    Bare(String),
}

impl Selection {
    fn name(&self) -> &str {
        match self {
            Self::Named { name } => name,
            Self::Bare(name) => name,
        }
    }
}

/// Reasoning-backed planner with a deterministic fallback
pub struct Planner {
    reasoner: Arc<dyn Reasoner>,
    top_k: usize,
}

impl Planner {
    pub fn new(reasoner: Arc<dyn Reasoner>, top_k: usize) -> Self {
        Self {
            reasoner,
            top_k: top_k.max(1),
        }
    }

    /// Build a plan; `None` only when there are no candidates
    pub async fn plan(
        &self,
        query: &str,
        candidates: &[ServiceCandidate],
        ledger: &mut TokenLedger,
    ) -> Option<DelegationPlan> {
        if candidates.is_empty() {
            return None;
        }

        let shortlist = &candidates[..candidates.len().min(self.top_k)];
        let prompt = build_prompt(query, shortlist);

        let reasoned = super::reason(
            self.reasoner.as_ref(),
            Operation::Analysis,
            SYSTEM_PROMPT,
            &prompt,
            ledger,
        )
        .await;
        let completion = match reasoned {
            Ok(completion) => completion,
            Err(e) => {
                warn!("Planning degraded: reasoning call failed: {}", e);
                return Some(fallback_plan(candidates, "reasoning call failed"));
            }
        };

        let Some(analysis) = super::parse_embedded::<AnalysisJson>(&completion.content) else {
            warn!("Planning degraded: unparseable analysis output");
            return Some(fallback_plan(candidates, "analysis output was not valid JSON"));
        };

        let plan = resolve_plan(analysis, shortlist);
        match plan {
            Some(plan) => {
                info!(
                    "Plan: strategy={}, confidence={:.2}, targets={:?}",
                    plan.strategy.as_str(),
                    plan.confidence,
                    plan.service_names()
                );
                Some(plan)
            }
            None => {
                warn!("Planning degraded: no selected service matched a candidate");
                Some(fallback_plan(candidates, "no selected service matched a candidate"))
            }
        }
    }
}

fn build_prompt(query: &str, shortlist: &[ServiceCandidate]) -> String {
    let listing: Vec<Value> = shortlist
        .iter()
        .map(|c| {
            serde_json::json!({
                "name": c.name,
                "description": c.description,
                "score": c.score,
                "capabilities": c.capabilities,
                "recommendedTool": c.recommended_tool.as_ref().map(|t| serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                })),
            })
        })
        .collect();

    let listing = serde_json::to_string_pretty(&listing).unwrap_or_else(|_| "[]".to_string());

    format!(
        r#"User request: {query}

Candidate services:
{listing}

Decide which candidate(s) should handle the request. Use more than one only
when the request clearly needs several independent services.

Return a JSON object with:
- intent: short description of what the user wants
- strategy: "single_agent" or "multi_agent"
- selectedServices: array of {{"name": <exact candidate name>, "reason": "..."}}
- confidence: number between 0 and 1
- reasoning: one or two sentences

JSON only:"#
    )
}

/// Map reasoning selections onto the original candidates
fn resolve_plan(analysis: AnalysisJson, candidates: &[ServiceCandidate]) -> Option<DelegationPlan> {
    let mut delegations: Vec<PlannedDelegation> = Vec::new();

    for selection in &analysis.selected_services {
        let Some(candidate) = candidates.iter().find(|c| c.name == selection.name()) else {
            warn!("Ignoring unknown service from analysis: {}", selection.name());
            continue;
        };
        if delegations.iter().any(|d| d.service.name == candidate.name) {
            continue;
        }
        delegations.push(PlannedDelegation::new(candidate.clone()));
    }

    let first = delegations.first()?;

    let confidence = analysis
        .confidence
        .filter(|c| c.is_finite())
        .unwrap_or(first.service.score)
        .clamp(0.0, 1.0);

    let strategy = if delegations.len() > 1 {
        Strategy::MultiAgent
    } else {
        Strategy::SingleAgent
    };

    Some(DelegationPlan {
        rationale: analysis.reasoning.unwrap_or_default(),
        intent: analysis.intent,
        strategy,
        confidence,
        delegations,
        degraded: false,
    })
}

/// Highest-scoring original candidate, single agent, capped confidence
pub fn fallback_plan(candidates: &[ServiceCandidate], reason: &str) -> DelegationPlan {
    let top = candidates
        .iter()
        .fold(None::<&ServiceCandidate>, |best, c| match best {
            Some(b) if b.score >= c.score => Some(b),
            _ => Some(c),
        });

    let delegations: Vec<PlannedDelegation> =
        top.cloned().map(PlannedDelegation::new).into_iter().collect();
    let confidence = top
        .map(|c| c.score)
        .filter(|s| s.is_finite())
        .unwrap_or(0.0)
        .clamp(0.0, DEGRADED_CONFIDENCE_CAP);

    DelegationPlan {
        rationale: format!("Selected the highest-ranked candidate ({})", reason),
        intent: None,
        strategy: Strategy::SingleAgent,
        confidence,
        delegations,
        degraded: true,
    }
}
