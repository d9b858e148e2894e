//! Delegator
//!
//! Sends the user request, wrapped in a context envelope, to each planned
//! peer agent. Calls run concurrently up to a worker cap; results come back
//! in plan order whatever order the calls complete in.

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::planner::{DelegationPlan, PlannedDelegation};
use crate::config::Config;
use crate::conversation::ConversationTurn;
use crate::session::Session;
use crate::tokenizer::TokenCounter;
use crate::usage::{Operation, TokenUsageRecord};

/// Longest error body kept in a failure detail
const MAX_ERROR_DETAIL: usize = 300;

/// Why a delegation produced no response
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DelegationFailure {
    #[error("no integration details")]
    NoIntegrationDetails,

    #[error("endpoint not found (HTTP {status})")]
    NotFound { status: u16 },

    #[error("HTTP {status}: {detail}")]
    Http { status: u16, detail: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl DelegationFailure {
    /// The target could not be reached at all, as opposed to answering with an error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoIntegrationDetails | Self::NotFound { .. })
    }
}

/// Outcome of one planned delegation
#[derive(Debug, Clone)]
pub struct DelegationResult {
    pub service: String,
    pub outcome: Result<Value, DelegationFailure>,
    pub elapsed: Duration,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

impl DelegationResult {
    fn failed(
        service: &str,
        failure: DelegationFailure,
        elapsed: Duration,
        prompt_tokens: usize,
    ) -> Self {
        Self {
            service: service.to_string(),
            outcome: Err(failure),
            elapsed,
            prompt_tokens,
            completion_tokens: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn response(&self) -> Option<&Value> {
        self.outcome.as_ref().ok()
    }

    pub fn failure(&self) -> Option<&DelegationFailure> {
        self.outcome.as_ref().err()
    }

    pub fn total_tokens(&self) -> usize {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Primary payload of an opaque agent response as display text
///
/// Prefers `response`, then `result`, then the whole object.
pub fn primary_payload(response: &Value) -> String {
    let primary = response
        .get("response")
        .or_else(|| response.get("result"))
        .unwrap_or(response);

    match primary {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Message sent to a peer agent's invocation endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationEnvelope {
    pub message: String,
    pub context: EnvelopeContext,
    pub integration_info: IntegrationInfo,
    pub conversation_history: Vec<ConversationTurn>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeContext {
    pub source_agent: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub user_intent: String,
    pub discovery_analysis: DiscoveryAnalysis,
    pub suggested_action: Option<SuggestedAction>,
    pub available_tools: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryAnalysis {
    pub matched_service: String,
    pub service_description: String,
    pub confidence_score: f64,
    pub recommended_tool: Option<String>,
    pub tool_description: Option<String>,
    pub recommendation_reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SuggestedAction {
    pub tool: String,
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationInfo {
    pub auth_method: Option<String>,
    pub rate_limits: Option<Value>,
    pub capabilities: Vec<String>,
}

impl DelegationEnvelope {
    pub fn build(
        query: &str,
        plan: &DelegationPlan,
        delegation: &PlannedDelegation,
        source_agent: &str,
        session_id: &str,
        history: Vec<ConversationTurn>,
    ) -> Self {
        let service = &delegation.service;
        let tool = delegation.tool.as_ref();
        let details = service.integration_details.as_ref();

        Self {
            message: query.to_string(),
            context: EnvelopeContext {
                source_agent: source_agent.to_string(),
                session_id: session_id.to_string(),
                timestamp: Utc::now(),
                user_intent: plan.intent.clone().unwrap_or_else(|| query.to_string()),
                discovery_analysis: DiscoveryAnalysis {
                    matched_service: service.name.clone(),
                    service_description: service.description.clone(),
                    confidence_score: service.score,
                    recommended_tool: tool.map(|t| t.name.clone()),
                    tool_description: tool.map(|t| t.description.clone()),
                    recommendation_reason: tool.and_then(|t| t.recommendation_reason.clone()),
                },
                suggested_action: tool.map(|t| SuggestedAction {
                    tool: t.name.clone(),
                    parameters: delegation.parameters.clone(),
                }),
                available_tools: service.capabilities.clone(),
            },
            integration_info: IntegrationInfo {
                auth_method: details.and_then(|d| d.auth_method.clone()),
                rate_limits: details.and_then(|d| d.rate_limit.clone()),
                capabilities: service.capabilities.clone(),
            },
            conversation_history: history,
        }
    }
}

/// Concurrent fan-out to peer agents
pub struct Delegator {
    client: Client,
    source_agent: String,
    auth_token: Option<String>,
    max_concurrent: usize,
    timeout: Duration,
    counter: TokenCounter,
}

impl Delegator {
    pub fn new(
        source_agent: &str,
        auth_token: Option<&str>,
        max_concurrent: usize,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            source_agent: source_agent.to_string(),
            auth_token: auth_token.map(|s| s.to_string()),
            max_concurrent: max_concurrent.max(1),
            timeout,
            counter: TokenCounter::new(),
        })
    }

    /// Create from config
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Self::new(
            &config.source_agent,
            config.agent_auth_token.as_deref(),
            config.max_concurrent_delegations,
            config.request_timeout,
        )
    }

    /// One result per planned delegation, in plan order
    pub async fn delegate(
        &self,
        query: &str,
        plan: &DelegationPlan,
        session: &mut Session,
    ) -> Vec<DelegationResult> {
        let history = session.history().snapshot();
        let session_id = session.id.clone();

        let calls = plan.delegations.iter().enumerate().map(|(index, delegation)| {
            let envelope = DelegationEnvelope::build(
                query,
                plan,
                delegation,
                &self.source_agent,
                &session_id,
                history.clone(),
            );
            async move {
                let (result, turn) = self.dispatch(query, delegation, &envelope).await;
                (index, result, turn)
            }
        });

        let mut completed: Vec<(usize, DelegationResult, Option<ConversationTurn>)> =
            stream::iter(calls)
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;

        // History and ledger follow completion order
        for (_, result, turn) in completed.iter_mut() {
            if result.failure() != Some(&DelegationFailure::NoIntegrationDetails) {
                session.record_usage(TokenUsageRecord::new(
                    Operation::Delegation,
                    &format!("agent:{}", result.service),
                    result.prompt_tokens,
                    result.completion_tokens,
                    result.elapsed.as_millis() as u64,
                ));
            }
            if let Some(turn) = turn.take() {
                session.add_turn(turn);
            }
        }

        completed.sort_by_key(|(index, _, _)| *index);
        let results: Vec<DelegationResult> = completed.into_iter().map(|(_, r, _)| r).collect();

        info!(
            "Delegation complete: {}/{} succeeded",
            results.iter().filter(|r| r.is_success()).count(),
            results.len()
        );
        results
    }

    async fn dispatch(
        &self,
        query: &str,
        delegation: &PlannedDelegation,
        envelope: &DelegationEnvelope,
    ) -> (DelegationResult, Option<ConversationTurn>) {
        let service = &delegation.service;

        let Some(details) = service.integration_details.as_ref() else {
            warn!("Delegation to {} skipped: no integration details", service.name);
            return (
                DelegationResult::failed(
                    &service.name,
                    DelegationFailure::NoIntegrationDetails,
                    Duration::ZERO,
                    0,
                ),
                None,
            );
        };

        let prompt_tokens = serde_json::to_string(envelope)
            .map(|s| self.counter.count(&s))
            .unwrap_or(0);

        let mut request = self.client.post(&details.endpoint).json(envelope);
        if details.requires_auth() {
            if let Some(token) = &self.auth_token {
                request = request.bearer_auth(token);
            }
        }

        debug!("Delegating to {} at {}", service.name, details.endpoint);
        let start = Instant::now();

        let outcome = match tokio::time::timeout(self.timeout, self.call(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(DelegationFailure::Timeout(self.timeout)),
        };
        let elapsed = start.elapsed();

        match outcome {
            Ok(response) => {
                let completion_tokens = self.counter.count_json(&response);
                info!(
                    "Delegation to {} succeeded in {}ms",
                    service.name,
                    elapsed.as_millis()
                );

                let turn = ConversationTurn::new(
                    &service.name,
                    json!({
                        "message": query,
                        "tool": delegation.tool.as_ref().map(|t| t.name.clone()),
                        "parameters": delegation.parameters,
                    }),
                    response.clone(),
                );

                let result = DelegationResult {
                    service: service.name.clone(),
                    outcome: Ok(response),
                    elapsed,
                    prompt_tokens,
                    completion_tokens,
                };
                (result, Some(turn))
            }
            Err(failure) => {
                match &failure {
                    DelegationFailure::NotFound { .. } | DelegationFailure::Http { .. } => {
                        warn!("Delegation to {} failed with HTTP error: {}", service.name, failure)
                    }
                    _ => warn!("Delegation to {} failed in transport: {}", service.name, failure),
                }
                (
                    DelegationResult::failed(&service.name, failure, elapsed, prompt_tokens),
                    None,
                )
            }
        }
    }

    async fn call(&self, request: reqwest::RequestBuilder) -> Result<Value, DelegationFailure> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DelegationFailure::Timeout(self.timeout)
            } else {
                DelegationFailure::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DelegationFailure::Transport(e.to_string()))?;

        if status == StatusCode::NOT_FOUND {
            return Err(DelegationFailure::NotFound { status: status.as_u16() });
        }
        if !status.is_success() {
            let detail: String = body.chars().take(MAX_ERROR_DETAIL).collect();
            return Err(DelegationFailure::Http {
                status: status.as_u16(),
                detail,
            });
        }

        // Agents that answer in plain text still count as a response
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}
