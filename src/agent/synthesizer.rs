//! Response Synthesizer
//!
//! Merges delegation results into the final user-facing answer. Every
//! result is represented in the output, failed ones included.

use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

use super::delegator::{primary_payload, DelegationFailure, DelegationResult};
use super::planner::DelegationPlan;
use crate::claude::Reasoner;
use crate::usage::{Operation, TokenLedger};

const SYSTEM_PROMPT: &str = "You are a friendly personal assistant. Several specialist \
    services answered parts of the user's request. Combine their answers into one clear, \
    conversational reply. Mention which service provided which information, and say \
    plainly when a service could not help.";

pub struct Synthesizer {
    reasoner: Arc<dyn Reasoner>,
}

impl Synthesizer {
    pub fn new(reasoner: Arc<dyn Reasoner>) -> Self {
        Self { reasoner }
    }

    pub async fn synthesize(
        &self,
        query: &str,
        results: &[DelegationResult],
        plan: &DelegationPlan,
        ledger: &mut TokenLedger,
    ) -> String {
        match results {
            [] => "I wasn't able to reach any services for your request.".to_string(),
            [single] => single_answer(single),
            many => self.merge(query, many, plan, ledger).await,
        }
    }

    async fn merge(
        &self,
        query: &str,
        results: &[DelegationResult],
        plan: &DelegationPlan,
        ledger: &mut TokenLedger,
    ) -> String {
        let prompt = build_prompt(query, results, plan);

        let reasoned = super::reason(
            self.reasoner.as_ref(),
            Operation::Synthesis,
            SYSTEM_PROMPT,
            &prompt,
            ledger,
        )
        .await;

        match reasoned {
            Ok(completion) => {
                let text = completion.content.trim();
                if text.is_empty() {
                    warn!("Synthesis degraded: empty reasoning output");
                    return concatenate(results);
                }
                debug!("Synthesized {} results into {} chars", results.len(), text.len());
                with_sources(text, results)
            }
            Err(e) => {
                warn!("Synthesis degraded: {}", e);
                concatenate(results)
            }
        }
    }
}

/// Answer for a plan with exactly one target
fn single_answer(result: &DelegationResult) -> String {
    match &result.outcome {
        Ok(response) => format!(
            "Here's what I found through {}:\n\n{}",
            result.service,
            primary_payload(response)
        ),
        Err(failure) => failure_message(&result.service, failure),
    }
}

/// User-facing recovery text for one failed delegation
pub fn failure_message(service: &str, failure: &DelegationFailure) -> String {
    if failure.is_not_found() {
        format!(
            "I found {} which should be able to help with this, but I could not connect to it. \
             The service may not be fully integrated yet. \
             Would you like me to search for alternative services?",
            service
        )
    } else {
        format!(
            "I tried to use {} but encountered an issue: {}. \
             Would you like me to try again or search for an alternative service?",
            service, failure
        )
    }
}

fn build_prompt(query: &str, results: &[DelegationResult], plan: &DelegationPlan) -> String {
    let mut prompt = format!("User request: {}\n", query);
    if let Some(intent) = &plan.intent {
        prompt.push_str(&format!("Interpreted intent: {}\n", intent));
    }
    prompt.push_str("\nService responses:\n");

    for (i, result) in results.iter().enumerate() {
        match &result.outcome {
            Ok(response) => prompt.push_str(&format!(
                "\n[{}] {} (succeeded):\n{}\n",
                i + 1,
                result.service,
                primary_payload(response)
            )),
            Err(failure) => prompt.push_str(&format!(
                "\n[{}] {} (failed): {}\n",
                i + 1,
                result.service,
                failure
            )),
        }
    }

    prompt.push_str("\nWrite the combined reply:");
    prompt
}

/// Deterministic merge used when reasoning is unavailable
fn concatenate(results: &[DelegationResult]) -> String {
    let mut text = format!("Here's what I found from {} services:\n", results.len());
    for result in results {
        match &result.outcome {
            Ok(response) => text.push_str(&format!(
                "\n**{}**:\n{}\n",
                result.service,
                primary_payload(response)
            )),
            Err(failure) => {
                text.push_str(&format!("\n**{}** (unavailable): {}\n", result.service, failure))
            }
        }
    }
    text
}

/// Append a sources line when the synthesis omits any service name
fn with_sources(text: &str, results: &[DelegationResult]) -> String {
    if results.iter().all(|r| mentions(text, &r.service)) {
        return text.to_string();
    }
    let names: Vec<&str> = results.iter().map(|r| r.service.as_str()).collect();
    format!("{}\n\nSources: {}", text, names.join(", "))
}

/// Whether `name` appears in `text` as a whole word
fn mentions(text: &str, name: &str) -> bool {
    let pattern = format!(r"(?:^|[^\w]){}(?:$|[^\w])", regex::escape(name));
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(text),
        Err(_) => text.contains(name),
    }
}
