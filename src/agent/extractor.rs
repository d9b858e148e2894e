//! Parameter Extractor
//!
//! Turns the raw request plus a tool's input schema into a structured
//! argument object. Failure is never fatal: the peer agent gets an empty or
//! partial set and is expected to ask for or default what is missing.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::claude::Reasoner;
use crate::discovery::RecommendedTool;
use crate::usage::{Operation, TokenLedger};

const SYSTEM_PROMPT: &str = "You extract tool arguments from user requests. \
    Only include a field when the request states its value clearly. \
    Never guess or invent values. Respond with a single JSON object.";

pub struct ParameterExtractor {
    reasoner: Arc<dyn Reasoner>,
}

impl ParameterExtractor {
    pub fn new(reasoner: Arc<dyn Reasoner>) -> Self {
        Self { reasoner }
    }

    /// Extract arguments for `tool`; empty map on any failure
    pub async fn extract(
        &self,
        query: &str,
        tool: &RecommendedTool,
        ledger: &mut TokenLedger,
    ) -> Map<String, Value> {
        if !tool.has_inputs() {
            return Map::new();
        }

        let prompt = build_prompt(query, tool);
        let reasoned = super::reason(
            self.reasoner.as_ref(),
            Operation::ParameterExtraction,
            SYSTEM_PROMPT,
            &prompt,
            ledger,
        )
        .await;
        let completion = match reasoned {
            Ok(c) => c,
            Err(e) => {
                warn!("Parameter extraction for {} failed: {}", tool.name, e);
                return Map::new();
            }
        };

        let Some(Value::Object(parsed)) = super::parse_embedded::<Value>(&completion.content)
        else {
            warn!("Parameter extraction for {} returned no JSON object", tool.name);
            return Map::new();
        };

        // Keep only declared fields; drop nulls the model used for "unknown"
        let params: Map<String, Value> = parsed
            .into_iter()
            .filter(|(k, v)| !v.is_null() && tool.input_schema.iter().any(|f| &f.name == k))
            .collect();

        debug!(
            "Extracted {} of {} parameters for {}",
            params.len(),
            tool.input_schema.len(),
            tool.name
        );
        params
    }
}

fn build_prompt(query: &str, tool: &RecommendedTool) -> String {
    let mut fields = String::new();
    for field in &tool.input_schema {
        fields.push_str(&format!(
            "- {} ({}{}): {}\n",
            field.name,
            field.field_type.as_deref().unwrap_or("any"),
            if field.required { ", required" } else { "" },
            field.description.as_deref().unwrap_or("")
        ));
    }

    format!(
        "Tool: {}\nDescription: {}\n\nInput fields:\n{}\nUser request: {}\n\n\
         Return a JSON object whose keys are field names. Omit any field you \
         cannot confidently extract from the request.\n\nJSON only:",
        tool.name, tool.description, fields, query
    )
}
