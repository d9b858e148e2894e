//! Token Usage Ledger
//!
//! Per-session accounting of external calls: token counts, latency and
//! estimated cost, grouped by pipeline operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::claude::Completion;

/// Pipeline operation that made an external call
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Discovery,
    Analysis,
    ParameterExtraction,
    Delegation,
    Synthesis,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Analysis => "analysis",
            Self::ParameterExtraction => "parameter_extraction",
            Self::Delegation => "delegation",
            Self::Synthesis => "synthesis",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One external call, appended once and never mutated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageRecord {
    pub operation: Operation,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
    pub model: String,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl TokenUsageRecord {
    pub fn new(
        operation: Operation,
        model: &str,
        prompt_tokens: usize,
        completion_tokens: usize,
        latency_ms: u64,
    ) -> Self {
        Self {
            operation,
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            model: model.to_string(),
            latency_ms,
            timestamp: Utc::now(),
        }
    }

    /// Record for a reasoning completion
    pub fn from_completion(operation: Operation, completion: &Completion) -> Self {
        Self::new(
            operation,
            &completion.model,
            completion.input_tokens,
            completion.output_tokens,
            completion.latency_ms,
        )
    }
}

/// Pricing per million tokens (USD)
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
}

impl ModelPricing {
    pub const HAIKU: Self = Self { input: 0.25, output: 1.25 };
    pub const SONNET: Self = Self { input: 3.0, output: 15.0 };
    pub const OPUS: Self = Self { input: 15.0, output: 75.0 };
    /// Registry and peer-agent calls are not billed per token
    pub const FREE: Self = Self { input: 0.0, output: 0.0 };

    /// Get pricing for model name
    pub fn for_model(model: &str) -> Self {
        let model = model.to_lowercase();
        if !model.starts_with("claude") {
            Self::FREE
        } else if model.contains("haiku") {
            Self::HAIKU
        } else if model.contains("opus") {
            Self::OPUS
        } else {
            Self::SONNET
        }
    }

    pub fn calculate_cost(&self, input_tokens: usize, output_tokens: usize) -> f64 {
        (input_tokens as f64 * self.input + output_tokens as f64 * self.output) / 1_000_000.0
    }
}

/// Per-operation aggregate
#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationStats {
    pub calls: usize,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_latency_ms: u64,
    pub cost_usd: f64,
}

impl OperationStats {
    pub fn avg_latency_ms(&self) -> f64 {
        if self.calls == 0 {
            return 0.0;
        }
        self.total_latency_ms as f64 / self.calls as f64
    }
}

/// Ledger totals for reporting
#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerSummary {
    pub calls: usize,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
    pub estimated_cost_usd: f64,
    pub by_operation: BTreeMap<Operation, OperationStats>,
}

impl fmt::Display for LedgerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Calls: {} | Tokens: {} (prompt {}, completion {}) | Est. cost: ${:.4}",
            self.calls,
            format_tokens(self.total_tokens),
            format_tokens(self.prompt_tokens),
            format_tokens(self.completion_tokens),
            self.estimated_cost_usd
        )?;
        for (op, stats) in &self.by_operation {
            writeln!(
                f,
                "  {:<22} calls={:<3} tokens={:<8} avg_latency={:.0}ms",
                op.as_str(),
                stats.calls,
                format_tokens(stats.prompt_tokens + stats.completion_tokens),
                stats.avg_latency_ms()
            )?;
        }
        Ok(())
    }
}

/// Append-only session ledger
#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenLedger {
    records: Vec<TokenUsageRecord>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: TokenUsageRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[TokenUsageRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of calls recorded for one operation
    pub fn count(&self, operation: Operation) -> usize {
        self.records.iter().filter(|r| r.operation == operation).count()
    }

    pub fn summary(&self) -> LedgerSummary {
        let mut summary = LedgerSummary::default();

        for r in &self.records {
            let cost = ModelPricing::for_model(&r.model)
                .calculate_cost(r.prompt_tokens, r.completion_tokens);

            summary.calls += 1;
            summary.prompt_tokens += r.prompt_tokens;
            summary.completion_tokens += r.completion_tokens;
            summary.total_tokens += r.total_tokens;
            summary.estimated_cost_usd += cost;

            let entry = summary.by_operation.entry(r.operation).or_default();
            entry.calls += 1;
            entry.prompt_tokens += r.prompt_tokens;
            entry.completion_tokens += r.completion_tokens;
            entry.total_latency_ms += r.latency_ms;
            entry.cost_usd += cost;
        }

        summary
    }
}

/// Format token count for display (e.g., 1.5M, 500K)
pub fn format_tokens(tokens: usize) -> String {
    if tokens >= 1_000_000 {
        format!("{:.1}M", tokens as f64 / 1_000_000.0)
    } else if tokens >= 1_000 {
        format!("{:.1}K", tokens as f64 / 1_000.0)
    } else {
        format!("{}", tokens)
    }
}
