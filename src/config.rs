//! Configuration management

use anyhow::Result;
use std::time::Duration;

/// Reasoning (language model) configuration
#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    /// Messages API endpoint
    pub api_url: String,

    /// Anthropic API key (optional - reasoning stages degrade without it)
    pub api_key: Option<String>,

    /// Model hint (haiku, sonnet, opus)
    pub model: String,

    /// Max response tokens per call
    pub max_tokens: usize,

    /// Per-call timeout
    pub timeout: Duration,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            api_url: crate::claude::ANTHROPIC_API_URL.to_string(),
            api_key: None,
            model: "sonnet".to_string(),
            max_tokens: 1024,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the discovery registry
    pub registry_base_url: String,

    /// Registry API key (optional, sent as bearer token)
    pub registry_api_key: Option<String>,

    /// Reasoning capability settings
    pub reasoning: ReasoningConfig,

    /// Timeout for discovery and delegation calls
    pub request_timeout: Duration,

    /// Upper bound on concurrent outbound delegations
    pub max_concurrent_delegations: usize,

    /// Conversation turns carried in each delegation envelope
    pub history_window_size: usize,

    /// Candidates requested from the registry
    pub discovery_limit: usize,

    /// Candidates handed to the planner
    pub planner_top_k: usize,

    /// Name this agent reports as `sourceAgent`
    pub source_agent: String,

    /// Opaque token for peer agents that require auth
    pub agent_auth_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_base_url: "http://localhost:8000".to_string(),
            registry_api_key: None,
            reasoning: ReasoningConfig::default(),
            request_timeout: Duration::from_secs(20),
            max_concurrent_delegations: 4,
            history_window_size: 5,
            discovery_limit: 5,
            planner_top_k: 5,
            source_agent: "concierge".to_string(),
            agent_auth_token: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let registry_base_url = std::env::var("CONCIERGE_REGISTRY_URL")
            .unwrap_or(defaults.registry_base_url);
        let registry_api_key = std::env::var("CONCIERGE_REGISTRY_API_KEY").ok();

        let reasoning = ReasoningConfig {
            api_url: std::env::var("CONCIERGE_REASONING_URL")
                .unwrap_or(defaults.reasoning.api_url),
            api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            model: std::env::var("CONCIERGE_REASONING_MODEL")
                .unwrap_or(defaults.reasoning.model),
            max_tokens: env_parse("CONCIERGE_REASONING_MAX_TOKENS")
                .unwrap_or(defaults.reasoning.max_tokens),
            timeout: env_parse("CONCIERGE_REASONING_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reasoning.timeout),
        };

        let config = Self {
            registry_base_url,
            registry_api_key,
            reasoning,
            request_timeout: env_parse("CONCIERGE_REQUEST_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_concurrent_delegations: env_parse("CONCIERGE_MAX_CONCURRENT")
                .unwrap_or(defaults.max_concurrent_delegations),
            history_window_size: env_parse("CONCIERGE_HISTORY_WINDOW")
                .unwrap_or(defaults.history_window_size),
            discovery_limit: env_parse("CONCIERGE_DISCOVERY_LIMIT")
                .unwrap_or(defaults.discovery_limit),
            planner_top_k: env_parse("CONCIERGE_PLANNER_TOP_K")
                .unwrap_or(defaults.planner_top_k),
            source_agent: std::env::var("CONCIERGE_AGENT_NAME")
                .unwrap_or(defaults.source_agent),
            agent_auth_token: std::env::var("CONCIERGE_AGENT_TOKEN").ok(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.registry_base_url.trim().is_empty() {
            anyhow::bail!("registry base URL must not be empty");
        }
        if self.discovery_limit == 0 {
            anyhow::bail!("discovery limit must be at least 1");
        }
        if self.max_concurrent_delegations == 0 {
            anyhow::bail!("max concurrent delegations must be at least 1");
        }
        if self.history_window_size == 0 {
            anyhow::bail!("history window size must be at least 1");
        }
        if self.planner_top_k == 0 {
            anyhow::bail!("planner top-k must be at least 1");
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
