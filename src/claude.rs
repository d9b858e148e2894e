//! Reasoning Client
//!
//! The orchestrator's language-model capability: query interpretation,
//! parameter extraction and multi-response synthesis all go through the
//! [`Reasoner`] trait. [`ClaudeClient`] implements it against the Anthropic
//! Messages API, with the static instructions cached via cache_control.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

use crate::config::ReasoningConfig;

pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Text completion with usage stats
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub latency_ms: u64,
}

/// Free-form prompt in, free-form text out
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Complete `prompt` under the `system` instructions
    async fn complete(&self, system: &str, prompt: &str) -> Result<Completion>;

    /// Model identifier reported in usage records
    fn model(&self) -> &str;

    /// Whether `complete` can reach a model at all
    fn is_available(&self) -> bool {
        true
    }
}

/// Claude API client
#[derive(Clone)]
pub struct ClaudeClient {
    client: Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: usize,
}

/// System message block with optional cache control
#[derive(Debug, Serialize)]
struct SystemBlock {
    r#type: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    r#type: String,
}

/// Message in conversation
#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

/// API request
#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: usize,
    system: Vec<SystemBlock>,
    messages: Vec<Message>,
}

/// API response
#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    r#type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: usize,
    output_tokens: usize,
}

impl ClaudeClient {
    /// Create from reasoning config
    pub fn from_config(config: &ReasoningConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    /// Get model ID from hint
    pub fn model_id(model: &str) -> &'static str {
        match model.to_lowercase().as_str() {
            "haiku" => "claude-3-5-haiku-20241022",
            "opus" => "claude-3-opus-20240229",
            _ => "claude-sonnet-4-20250514",
        }
    }
}

#[async_trait]
impl Reasoner for ClaudeClient {
    fn model(&self) -> &str {
        Self::model_id(&self.model)
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<Completion> {
        let model_id = Self::model_id(&self.model);

        let request = MessageRequest {
            model: model_id.to_string(),
            max_tokens: self.max_tokens,
            system: vec![SystemBlock {
                r#type: "text".to_string(),
                text: system.to_string(),
                cache_control: Some(CacheControl {
                    r#type: "ephemeral".to_string(),
                }),
            }],
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        debug!("Calling Claude API: model={}, prompt_len={}", model_id, prompt.len());

        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("ANTHROPIC_API_KEY not set - reasoning unavailable"))?;

        let start = Instant::now();
        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            anyhow::bail!("Claude API error {}: {}", status, text);
        }

        let result: MessageResponse = response.json().await?;

        let content = result
            .content
            .into_iter()
            .filter_map(|b| if b.r#type == "text" { b.text } else { None })
            .collect::<Vec<_>>()
            .join("\n");

        let completion = Completion {
            content,
            model: model_id.to_string(),
            input_tokens: result.usage.input_tokens,
            output_tokens: result.usage.output_tokens,
            latency_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            "Claude response: model={}, in={}, out={}, latency={}ms",
            model_id, completion.input_tokens, completion.output_tokens, completion.latency_ms
        );

        Ok(completion)
    }
}

#[cfg(test)]
pub(crate) mod stub {
    //! Scripted reasoner for pipeline tests

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies in order; `None` entries fail the call
    pub struct StubReasoner {
        replies: Mutex<VecDeque<Option<String>>>,
        available: bool,
        pub prompts: Mutex<Vec<String>>,
    }

    impl StubReasoner {
        pub fn replying(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| Some(r.to_string())).collect()),
                available: true,
                prompts: Mutex::new(Vec::new()),
            }
        }

        /// Every call reaches the model and fails
        pub fn failing() -> Self {
            Self {
                replies: Mutex::new(VecDeque::new()),
                available: true,
                prompts: Mutex::new(Vec::new()),
            }
        }

        /// Not configured; calls fail without reaching a model
        pub fn unavailable() -> Self {
            Self {
                available: false,
                ..Self::failing()
            }
        }

        pub fn call_count(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Reasoner for StubReasoner {
        fn model(&self) -> &str {
            "stub"
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn complete(&self, _system: &str, prompt: &str) -> Result<Completion> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match self.replies.lock().unwrap().pop_front().flatten() {
                Some(content) => Ok(Completion {
                    output_tokens: content.len() / 4,
                    input_tokens: prompt.len() / 4,
                    content,
                    model: "stub".to_string(),
                    latency_ms: 1,
                }),
                None => anyhow::bail!("stub reasoner has no reply"),
            }
        }
    }
}
