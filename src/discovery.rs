//! Discovery Client
//!
//! Queries the semantic registry for services and tools ranked against a
//! natural-language query. Every call is a fresh query; nothing is cached.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::Config;

/// Errors from the registry
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Registry unreachable: {0}")]
    Unreachable(String),

    #[error("Registry returned {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("Malformed registry response: {0}")]
    Malformed(String),
}

/// What kind of candidates to search for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Services,
    Tools,
    #[default]
    Both,
}

/// Invocation endpoint of a peer agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationDetails {
    pub endpoint: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub auth_method: Option<String>,
    #[serde(default)]
    pub rate_limit: Option<serde_json::Value>,
}

impl IntegrationDetails {
    /// True when the peer declares some auth scheme other than "none"
    pub fn requires_auth(&self) -> bool {
        self.auth_method
            .as_deref()
            .map(|m| !m.is_empty() && !m.eq_ignore_ascii_case("none"))
            .unwrap_or(false)
    }
}

/// Structured descriptor of one tool input field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    pub name: String,
    #[serde(default, rename = "type")]
    pub field_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Tool the registry recommends for the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Vec<FieldSchema>,
    #[serde(default)]
    pub recommendation_reason: Option<String>,
    #[serde(default)]
    pub score: f64,
}

impl RecommendedTool {
    pub fn has_inputs(&self) -> bool {
        !self.input_schema.is_empty()
    }
}

/// Service as described by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub integration_details: Option<IntegrationDetails>,
}

/// Immutable snapshot of one ranked discovery hit
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCandidate {
    pub name: String,
    pub description: String,
    pub score: f64,
    pub capabilities: Vec<String>,
    pub integration_details: Option<IntegrationDetails>,
    pub recommended_tool: Option<RecommendedTool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    query: &'a str,
    mode: SearchMode,
    limit: usize,
    want_orchestration_details: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchHit {
    service: ServiceDescriptor,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    recommended_tool: Option<RecommendedTool>,
}

impl From<SearchHit> for ServiceCandidate {
    fn from(hit: SearchHit) -> Self {
        Self {
            name: hit.service.name,
            description: hit.service.description,
            score: hit.score,
            capabilities: hit.service.capabilities,
            integration_details: hit.service.integration_details,
            recommended_tool: hit.recommended_tool,
        }
    }
}

/// Registry search client
#[derive(Clone)]
pub struct DiscoveryClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl DiscoveryClient {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, DiscoveryError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DiscoveryError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(|s| s.to_string()),
        })
    }

    /// Create from config
    pub fn from_config(config: &Config) -> Result<Self, DiscoveryError> {
        Self::new(
            &config.registry_base_url,
            config.registry_api_key.as_deref(),
            config.request_timeout,
        )
    }

    /// Search the registry; results come back by descending score
    pub async fn discover(
        &self,
        query: &str,
        mode: SearchMode,
        limit: usize,
        want_orchestration_details: bool,
    ) -> Result<Vec<ServiceCandidate>, DiscoveryError> {
        if query.trim().is_empty() {
            return Err(DiscoveryError::InvalidQuery("query must not be empty".to_string()));
        }
        if limit == 0 {
            return Err(DiscoveryError::InvalidQuery("limit must be at least 1".to_string()));
        }

        let request = SearchRequest {
            query,
            mode,
            limit,
            want_orchestration_details,
        };

        debug!("Registry search: query_len={}, mode={:?}, limit={}", query.len(), mode, limit);
        let start = Instant::now();

        let mut builder = self.client.post(format!("{}/search", self.base_url)).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DiscoveryError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(DiscoveryError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| DiscoveryError::Malformed(e.to_string()))?;

        let mut candidates: Vec<ServiceCandidate> =
            body.results.into_iter().map(ServiceCandidate::from).collect();
        rank(&mut candidates);
        candidates.truncate(limit);

        info!(
            "Registry returned {} candidates in {}ms",
            candidates.len(),
            start.elapsed().as_millis()
        );

        Ok(candidates)
    }
}

/// Stable sort by non-increasing score; ties keep registry order
pub fn rank(candidates: &mut [ServiceCandidate]) {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
}
