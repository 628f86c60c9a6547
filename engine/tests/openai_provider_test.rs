//! OpenAI-compatible provider against a mock HTTP server

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crew_engine::agent::{Agent, AgentSpec, LlmAgent};
use crew_engine::config::{Config, LLMConfig};
use crew_engine::llm::openai::OpenAIProvider;
use crew_engine::llm::{LLMError, LLMProvider, LLMResponse, Message, RetryConfig};
use crew_engine::state::HistoryView;
use sdk::event::{Action, ErrorKind, Event, NewEvent};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn llm_config(server: &MockServer) -> LLMConfig {
    LLMConfig {
        base_url: server.uri(),
        api_key: Some("test-key".to_string()),
        ..Config::default_config().llm
    }
}

fn tool_call_body(name: &str, arguments: &str) -> serde_json::Value {
    json!({
        "choices": [{
            "message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_7",
                    "type": "function",
                    "function": {"name": name, "arguments": arguments}
                }]
            }
        }],
        "usage": {"prompt_tokens": 200, "completion_tokens": 15}
    })
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
    }
}

fn spec() -> AgentSpec {
    AgentSpec {
        name: "orchestrator".to_string(),
        description: "Plans work".to_string(),
        system_prompt: "You are a careful engineer.".to_string(),
        tools_enabled: vec!["run".to_string()],
        delegates: Vec::new(),
        context_limit_tokens: 4_000,
    }
}

fn history() -> Vec<Arc<Event>> {
    vec![Arc::new(
        Event::seal(
            NewEvent::user_message("orchestrator", "list the files"),
            1,
            Utc::now(),
        )
        .unwrap(),
    )]
}

#[tokio::test]
async fn test_native_tool_call_is_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(tool_call_body("run", r#"{"command":"ls"}"#)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAIProvider::new(llm_config(&server)).unwrap();
    let completion = provider
        .generate(&[Message::user("list the files")], &[])
        .await
        .unwrap();

    assert_eq!(completion.usage.prompt_tokens, 200);
    assert_eq!(completion.usage.completion_tokens, 15);
    match completion.response {
        LLMResponse::ToolCall(call) => {
            assert_eq!(call.id, "call_7");
            assert_eq!(call.name, "run");
            assert_eq!(call.arguments, r#"{"command":"ls"}"#);
        }
        other => panic!("expected a tool call, got {:?}", other),
    }
}

#[tokio::test]
async fn test_http_errors_are_classified() {
    for (status, transient) in [(429, true), (401, false), (403, false), (503, true), (400, false)] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new(llm_config(&server)).unwrap();
        let err = provider
            .generate(&[Message::user("hi")], &[])
            .await
            .unwrap_err();

        match status {
            429 => assert!(matches!(err, LLMError::RateLimitExceeded)),
            401 | 403 => assert!(matches!(err, LLMError::AuthenticationFailed(_))),
            503 => assert!(matches!(err, LLMError::ProviderUnavailable(_))),
            _ => assert!(matches!(err, LLMError::InvalidRequest(_))),
        }
        assert_eq!(err.is_transient(), transient, "status {}", status);
    }
}

#[tokio::test]
async fn test_agent_retries_transient_failure_then_acts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(tool_call_body("run", r#"{"command":"cargo test"}"#)),
        )
        .mount(&server)
        .await;

    let provider = Arc::new(OpenAIProvider::new(llm_config(&server)).unwrap());
    let agent = LlmAgent::new(spec(), provider, fast_retry());
    let events = history();
    let view = HistoryView::new("orchestrator", None, &events);

    let outcome = agent.step(&view).await;
    assert_eq!(
        outcome.action,
        Action::CmdRun {
            command: "cargo test".to_string()
        }
    );
    let metrics = outcome.metrics.expect("a successful call carries metrics");
    assert_eq!(metrics.prompt_tokens, 200);
    assert_eq!(metrics.completion_tokens, 15);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let body: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(body["messages"][0]["role"], "system");
    assert!(body["tools"]
        .as_array()
        .unwrap()
        .iter()
        .any(|tool| tool["function"]["name"] == "run"));
}

#[tokio::test]
async fn test_agent_reports_permanent_failure_as_error_action() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .expect(1)
        .mount(&server)
        .await;

    let provider = Arc::new(OpenAIProvider::new(llm_config(&server)).unwrap());
    let agent = LlmAgent::new(spec(), provider, fast_retry());
    let events = history();
    let view = HistoryView::new("orchestrator", None, &events);

    let outcome = agent.step(&view).await;
    assert!(matches!(
        outcome.action,
        Action::Error { kind: ErrorKind::Llm, .. }
    ));
    assert!(outcome.metrics.is_none());
}

#[tokio::test]
async fn test_tool_outside_allowlist_becomes_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(tool_call_body("edit", r#"{"path":"a.rs","content":""}"#)),
        )
        .mount(&server)
        .await;

    let provider = Arc::new(OpenAIProvider::new(llm_config(&server)).unwrap());
    let agent = LlmAgent::new(spec(), provider, fast_retry());
    let events = history();
    let view = HistoryView::new("orchestrator", None, &events);

    let outcome = agent.step(&view).await;
    assert!(matches!(
        outcome.action,
        Action::Error { kind: ErrorKind::Parse, .. }
    ));
    assert!(outcome.metrics.is_some());
}
