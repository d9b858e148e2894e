//! Orchestrator Integration Tests
//!
//! Full pipeline against mock registry, peer agents and Messages API.

use concierge::agent::orchestrator::NO_SERVICES_MESSAGE;
use concierge::{Config, Operation, Orchestrator, ReasoningConfig, Stage};
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(registry: &MockServer, claude: Option<&MockServer>) -> Config {
    Config {
        registry_base_url: registry.uri(),
        reasoning: ReasoningConfig {
            api_url: claude
                .map(|c| format!("{}/v1/messages", c.uri()))
                .unwrap_or_else(|| "http://127.0.0.1:9/v1/messages".to_string()),
            api_key: claude.map(|_| "test-key".to_string()),
            ..ReasoningConfig::default()
        },
        request_timeout: Duration::from_secs(5),
        ..Config::default()
    }
}

fn hit(name: &str, score: f64, endpoint: Option<String>, tool: Option<Value>) -> Value {
    let mut service = json!({
        "name": name,
        "description": format!("{} service", name),
        "capabilities": ["search"],
    });
    if let Some(endpoint) = endpoint {
        service["integrationDetails"] = json!({"endpoint": endpoint, "protocol": "http"});
    }
    let mut hit = json!({"service": service, "score": score});
    if let Some(tool) = tool {
        hit["recommendedTool"] = tool;
    }
    hit
}

fn claude_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "content": [{"type": "text", "text": text}],
        "usage": {"input_tokens": 120, "output_tokens": 40}
    }))
}

async fn mount_registry(registry: &MockServer, results: Vec<Value>) {
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": results})))
        .mount(registry)
        .await;
}

async fn mount_plan(claude: &MockServer, plan: Value) {
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_string_contains("Candidate services"))
        .respond_with(claude_reply(&plan.to_string()))
        .mount(claude)
        .await;
}

async fn agent_bodies(agent: &MockServer) -> Vec<Value> {
    agent
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

#[tokio::test]
async fn test_single_agent_answer() {
    let registry = MockServer::start().await;
    let claude = MockServer::start().await;
    let agent = MockServer::start().await;

    let tool = json!({
        "name": "find_stores",
        "description": "Nearby shoe stores",
        "recommendationReason": "location query"
    });
    mount_registry(
        &registry,
        vec![
            hit("StoreLocator", 0.92, Some(format!("{}/invoke", agent.uri())), Some(tool)),
            hit("Recipes", 0.31, None, None),
        ],
    )
    .await;
    mount_plan(
        &claude,
        json!({
            "intent": "find shoe stores",
            "strategy": "single_agent",
            "selectedServices": [{"name": "StoreLocator", "reason": "stores"}],
            "confidence": 0.9,
            "reasoning": "Store lookup"
        }),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/invoke"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"response": "Two stores within 1km."})),
        )
        .expect(1)
        .mount(&agent)
        .await;

    let mut orchestrator = Orchestrator::new(test_config(&registry, Some(&claude))).unwrap();
    let answer = orchestrator.process_request("where can I buy running shoes").await;

    assert!(answer.starts_with("Here's what I found through StoreLocator:"));
    assert!(answer.contains("Two stores within 1km."));
    assert_eq!(orchestrator.stage(), Stage::Done);

    let body = &agent_bodies(&agent).await[0];
    assert_eq!(body["message"], "where can I buy running shoes");
    assert_eq!(body["context"]["sourceAgent"], "concierge");
    assert_eq!(body["context"]["userIntent"], "find shoe stores");
    assert_eq!(body["context"]["discoveryAnalysis"]["matchedService"], "StoreLocator");
    assert_eq!(body["context"]["suggestedAction"]["tool"], "find_stores");
    assert_eq!(body["conversationHistory"], json!([]));

    let ledger = orchestrator.session().ledger();
    assert_eq!(ledger.count(Operation::Discovery), 1);
    assert_eq!(ledger.count(Operation::Analysis), 1);
    assert_eq!(ledger.count(Operation::Delegation), 1);
    assert_eq!(ledger.count(Operation::Synthesis), 0);
}

#[tokio::test]
async fn test_not_found_offers_alternatives() {
    let registry = MockServer::start().await;
    let claude = MockServer::start().await;
    let agent = MockServer::start().await;

    let endpoint = Some(format!("{}/invoke", agent.uri()));
    mount_registry(&registry, vec![hit("Flights", 0.8, endpoint, None)]).await;
    mount_plan(&claude, json!({"selectedServices": ["Flights"], "confidence": 0.7})).await;
    Mock::given(path("/invoke"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&agent)
        .await;

    let mut orchestrator = Orchestrator::new(test_config(&registry, Some(&claude))).unwrap();
    let answer = orchestrator.process_request("book a flight to Lisbon").await;

    assert!(answer.contains("Flights"));
    assert!(answer.contains("could not connect"));
    assert!(answer.contains("alternative services"));
    assert_eq!(orchestrator.stage(), Stage::Done);
    // Failed delegations are not remembered
    assert!(orchestrator.session().history().is_empty());
}

#[tokio::test]
async fn test_no_candidates_short_circuits() {
    let registry = MockServer::start().await;
    let claude = MockServer::start().await;

    mount_registry(&registry, vec![]).await;
    Mock::given(method("POST"))
        .respond_with(claude_reply("{}"))
        .expect(0)
        .mount(&claude)
        .await;

    let mut orchestrator = Orchestrator::new(test_config(&registry, Some(&claude))).unwrap();
    let answer = orchestrator.process_request("translate this poem").await;

    assert_eq!(answer, NO_SERVICES_MESSAGE);
    assert_eq!(orchestrator.stage(), Stage::Done);
}

#[tokio::test]
async fn test_multi_agent_mentions_every_service() {
    let registry = MockServer::start().await;
    let claude = MockServer::start().await;
    let flights = MockServer::start().await;
    let weather = MockServer::start().await;

    mount_registry(
        &registry,
        vec![
            hit("Flights", 0.85, Some(format!("{}/invoke", flights.uri())), None),
            hit("Weather", 0.83, Some(format!("{}/invoke", weather.uri())), None),
        ],
    )
    .await;
    mount_plan(
        &claude,
        json!({
            "intent": "plan a weekend trip",
            "strategy": "multi_agent",
            "selectedServices": [{"name": "Flights"}, {"name": "Weather"}],
            "confidence": 0.8
        }),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_string_contains("Service responses"))
        .respond_with(claude_reply("There is a 9am departure on Saturday."))
        .expect(1)
        .mount(&claude)
        .await;
    Mock::given(path("/invoke"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"result": "SAS 9am"}))
                .set_delay(Duration::from_millis(150)),
        )
        .mount(&flights)
        .await;
    Mock::given(path("/invoke"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "Sunny, 21C"})))
        .mount(&weather)
        .await;

    let mut orchestrator = Orchestrator::new(test_config(&registry, Some(&claude))).unwrap();
    let answer = orchestrator.process_request("plan my weekend in Oslo").await;

    assert!(answer.contains("Flights"));
    assert!(answer.contains("Weather"));
    assert!(answer.ends_with("Sources: Flights, Weather"));

    let ledger = orchestrator.session().ledger();
    assert_eq!(ledger.count(Operation::Delegation), 2);
    assert_eq!(ledger.count(Operation::Synthesis), 1);
    assert_eq!(orchestrator.session().history().len(), 2);
}

#[tokio::test]
async fn test_registry_failure_errors() {
    let registry = MockServer::start().await;
    let claude = MockServer::start().await;

    Mock::given(path("/search"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&registry)
        .await;
    Mock::given(method("POST"))
        .respond_with(claude_reply("{}"))
        .expect(0)
        .mount(&claude)
        .await;

    let mut orchestrator = Orchestrator::new(test_config(&registry, Some(&claude))).unwrap();
    let answer = orchestrator.process_request("order pizza").await;

    assert!(answer.contains("error searching for services"));
    assert_eq!(orchestrator.stage(), Stage::Errored);
}

#[tokio::test]
async fn test_history_carries_across_requests() {
    let registry = MockServer::start().await;
    let claude = MockServer::start().await;
    let agent = MockServer::start().await;

    let endpoint = Some(format!("{}/invoke", agent.uri()));
    mount_registry(&registry, vec![hit("Weather", 0.9, endpoint, None)]).await;
    mount_plan(&claude, json!({"selectedServices": ["Weather"]})).await;
    Mock::given(path("/invoke"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "Rain later."})))
        .mount(&agent)
        .await;

    let mut orchestrator = Orchestrator::new(test_config(&registry, Some(&claude))).unwrap();
    orchestrator.process_request("weather in Bergen today").await;
    orchestrator.process_request("and tomorrow?").await;

    let bodies = agent_bodies(&agent).await;
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0]["conversationHistory"], json!([]));

    let history = bodies[1]["conversationHistory"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["agent"], "Weather");
    assert_eq!(history[0]["request"]["message"], "weather in Bergen today");
    assert_eq!(bodies[1]["context"]["sessionId"], bodies[0]["context"]["sessionId"]);

    let status = orchestrator.status();
    assert_eq!(status.requests_processed, 2);
    assert_eq!(status.history_turns, 2);
}

#[tokio::test]
async fn test_extracted_parameters_reach_agent() {
    let registry = MockServer::start().await;
    let claude = MockServer::start().await;
    let agent = MockServer::start().await;

    let tool = json!({
        "name": "get_forecast",
        "description": "Forecast for a city",
        "inputSchema": [
            {"name": "city", "type": "string", "required": true},
            {"name": "days", "type": "integer"}
        ]
    });
    let endpoint = Some(format!("{}/invoke", agent.uri()));
    mount_registry(&registry, vec![hit("Weather", 0.9, endpoint, Some(tool))]).await;
    mount_plan(&claude, json!({"selectedServices": ["Weather"], "confidence": 0.95})).await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_string_contains("Input fields"))
        .respond_with(claude_reply("{\"city\": \"Tromsø\", \"days\": null}"))
        .expect(1)
        .mount(&claude)
        .await;
    Mock::given(path("/invoke"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "Snow."})))
        .mount(&agent)
        .await;

    let mut orchestrator = Orchestrator::new(test_config(&registry, Some(&claude))).unwrap();
    let answer = orchestrator.process_request("forecast for Tromsø").await;

    assert!(answer.contains("Snow."));
    let body = &agent_bodies(&agent).await[0];
    assert_eq!(body["context"]["suggestedAction"]["tool"], "get_forecast");
    assert_eq!(body["context"]["suggestedAction"]["parameters"], json!({"city": "Tromsø"}));
    assert_eq!(orchestrator.session().ledger().count(Operation::ParameterExtraction), 1);
}

#[tokio::test]
async fn test_without_api_key_uses_top_candidate() {
    let registry = MockServer::start().await;
    let agent = MockServer::start().await;

    mount_registry(
        &registry,
        vec![
            hit("Recipes", 0.4, None, None),
            hit("StoreLocator", 0.9, Some(format!("{}/invoke", agent.uri())), None),
        ],
    )
    .await;
    Mock::given(path("/invoke"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"response": "Open until 8pm."})),
        )
        .expect(1)
        .mount(&agent)
        .await;

    let mut orchestrator = Orchestrator::new(test_config(&registry, None)).unwrap();
    let answer = orchestrator.process_request("is the shoe store open").await;

    assert_eq!(answer, "Here's what I found through StoreLocator:\n\nOpen until 8pm.");
    assert_eq!(orchestrator.session().ledger().count(Operation::Analysis), 0);
}

#[tokio::test]
async fn test_failed_reasoning_is_still_accounted() {
    let registry = MockServer::start().await;
    let claude = MockServer::start().await;
    let agent = MockServer::start().await;

    let endpoint = Some(format!("{}/invoke", agent.uri()));
    mount_registry(&registry, vec![hit("Weather", 0.7, endpoint, None)]).await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
        .expect(1)
        .mount(&claude)
        .await;
    Mock::given(path("/invoke"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "Cloudy."})))
        .mount(&agent)
        .await;

    let mut orchestrator = Orchestrator::new(test_config(&registry, Some(&claude))).unwrap();
    let answer = orchestrator.process_request("will it rain").await;

    assert_eq!(answer, "Here's what I found through Weather:\n\nCloudy.");

    let ledger = orchestrator.session().ledger();
    assert_eq!(ledger.count(Operation::Analysis), 1);
    let analysis = ledger
        .records()
        .iter()
        .find(|r| r.operation == Operation::Analysis)
        .unwrap();
    assert_eq!(analysis.total_tokens, 0);
    assert!(analysis.model.starts_with("claude"));
}

#[tokio::test]
async fn test_shutdown_reports_usage() {
    let registry = MockServer::start().await;
    mount_registry(&registry, vec![]).await;

    let mut orchestrator = Orchestrator::new(test_config(&registry, None)).unwrap();
    orchestrator.process_request("anything").await;

    let summary = orchestrator.shutdown();
    assert_eq!(summary.calls, 1);
    assert!(!orchestrator.session().is_active());
}
