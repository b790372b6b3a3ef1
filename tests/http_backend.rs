use std::sync::Arc;

use futures_util::StreamExt;
use probewerk::{
    providers::http::HttpBackend, ApiSurface, Backend, BackendConfig, BackendRegistry,
    Credentials, Knobs, OutputKind, ProbeError, ProbeRunner, ProbeStatus, RequestBuilder,
    ResponseFragment, Scenario,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> HttpBackend {
    let config = BackendConfig::new("mock", format!("{}/v1", server.uri())).with_api_key("sk-test");
    HttpBackend::from_config(config).unwrap()
}

async fn dispatch(
    backend: &HttpBackend,
    scenario: &Scenario,
) -> Result<Vec<ResponseFragment>, ProbeError> {
    let payload = RequestBuilder::new(&Credentials::new()).build(scenario)?;
    let mut stream = backend.dispatch(&payload).await?;
    let mut fragments = Vec::new();
    while let Some(fragment) = stream.next().await {
        fragments.push(fragment?);
    }
    Ok(fragments)
}

#[tokio::test]
async fn non_streaming_request_yields_exactly_one_fragment() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o",
            "input": [{ "role": "user", "content": "Write a haiku." }],
            "include": ["message.output_text.logprobs"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "resp_1",
            "object": "response",
            "output": [{ "type": "message", "content": [{ "type": "output_text", "text": "Waves" }] }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let scenario = Scenario::new("haiku", "mock", "gpt-4o", "Write a haiku.")
        .with_knobs(Knobs::new().with_include("message.output_text.logprobs"));
    let fragments = dispatch(&backend(&server), &scenario).await.unwrap();

    assert_eq!(fragments.len(), 1);
    assert!(matches!(fragments[0], ResponseFragment::Complete(_)));
    assert_eq!(fragments[0].body()["id"], "resp_1");
}

#[tokio::test]
async fn streaming_request_yields_one_delta_per_event() {
    let server = MockServer::start().await;
    let events = [
        r#"{"type":"response.created","response":{"id":"resp_1"}}"#,
        r#"{"type":"response.output_text.delta","delta":"Three"}"#,
        r#"{"type":"response.completed","response":{"id":"resp_1"}}"#,
    ];
    let body: String = events
        .iter()
        .map(|event| format!("event: message\ndata: {event}\n\n"))
        .chain(std::iter::once("data: [DONE]\n\n".to_string()))
        .collect();

    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .and(header("accept", "text/event-stream"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let scenario = Scenario::new("stream", "mock", "ollama/gpt-oss:latest", "r's?")
        .with_knobs(Knobs::new().streaming());
    let fragments = dispatch(&backend(&server), &scenario).await.unwrap();

    assert_eq!(fragments.len(), 3);
    assert!(fragments.iter().all(ResponseFragment::is_delta));
    assert_eq!(fragments[2].event_type(), Some("response.completed"));
}

#[tokio::test]
async fn broken_stream_keeps_the_events_already_received() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_1\"}}\n\n",
        "data: {\"type\":\"response.output_item.done\",\"item\":",
        "{\"type\":\"web_search_call\",\"id\":\"ws_1\",\"status\":\"completed\"}}\n\n",
        "data: {broken\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let runner = ProbeRunner::new(
        BackendRegistry::new().with_backend(Arc::new(backend(&server))),
        Credentials::new(),
    );
    let scenario = Scenario::new("search", "mock", "gpt-4o", "Find news")
        .with_knobs(Knobs::new().streaming());
    let outcome = runner.run(&scenario).await.unwrap();

    assert_eq!(outcome.status, ProbeStatus::Partial);
    assert_eq!(outcome.fragments.len(), 2);
    assert_eq!(outcome.summary.count(OutputKind::BuiltinToolCall), 1);
    assert!(outcome
        .error
        .as_deref()
        .is_some_and(|error| error.contains("malformed stream event")));
}

#[tokio::test]
async fn chat_surface_posts_to_chat_completions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [{ "role": "user", "content": "count" }],
            "reasoning_effort": "low",
            "max_completion_tokens": 200
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "chat.completion",
            "choices": [{ "message": { "role": "assistant", "content": "3", "reasoning": "..." } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let scenario = Scenario::new("chat", "mock", "gpt-oss:latest", "count")
        .with_api(ApiSurface::ChatCompletions)
        .with_knobs(Knobs::new().with_reasoning_effort("low").with_max_output_tokens(200));
    let fragments = dispatch(&backend(&server), &scenario).await.unwrap();

    assert_eq!(fragments.len(), 1);
}

#[tokio::test]
async fn rejected_credentials_are_authentication_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "message": "Incorrect API key provided", "type": "invalid_request_error" }
        })))
        .mount(&server)
        .await;

    let scenario = Scenario::new("auth", "mock", "gpt-4o", "hi");
    let error = dispatch(&backend(&server), &scenario).await.unwrap_err();

    assert!(matches!(error, ProbeError::Authentication { .. }));
    assert!(!error.is_fatal());
}

#[tokio::test]
async fn unsupported_parameters_are_invalid_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "Unsupported parameter: 'max_tool_calls'" }
        })))
        .mount(&server)
        .await;

    let scenario = Scenario::new("knob", "mock", "Qwen/Qwen3-0.6B", "hi")
        .with_knobs(Knobs::new().with_max_tool_calls(1));
    let error = dispatch(&backend(&server), &scenario).await.unwrap_err();

    match error {
        ProbeError::InvalidRequest { status, message, .. } => {
            assert_eq!(status, 400);
            assert!(message.contains("max_tool_calls"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn malformed_body_is_an_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let scenario = Scenario::new("html", "mock", "gpt-4o", "hi");
    let error = dispatch(&backend(&server), &scenario).await.unwrap_err();
    assert!(matches!(error, ProbeError::InvalidResponse(_)));
}

#[tokio::test]
async fn unreachable_server_is_backend_unavailable() {
    let config = BackendConfig::new("vllm", "http://127.0.0.1:1/v1");
    let backend = HttpBackend::from_config(config).unwrap();

    let scenario = Scenario::new("down", "vllm", "Qwen/Qwen3-0.6B", "hi");
    let error = dispatch(&backend, &scenario).await.unwrap_err();
    assert!(matches!(error, ProbeError::BackendUnavailable { .. }));
}
