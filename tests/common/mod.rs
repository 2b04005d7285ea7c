//! Shared test utilities and fixtures
//!
//! Common infrastructure for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use persona_engine::{ApiConfig, ApiKey, GenerationClient, ModelName};
use persona_providers::rate_limit::RateLimitConfig;
use persona_providers::retry::RetryPolicy;
use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CHAT_PATH: &str = "/v1/chat/completions";

/// Start a mock server that simulates the Chat Completions API
pub async fn start_chat_mock() -> MockServer {
    MockServer::start().await
}

/// A Chat Completions success body
pub fn chat_body(content: &str) -> Value {
    serde_json::json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": 10,
            "completion_tokens": 5,
            "total_tokens": 15
        }
    })
}

/// Mount a reply served for every request
pub async fn mount_chat_response(server: &MockServer, content: &str) {
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(content)))
        .mount(server)
        .await;
}

/// Mount an error status for the next `times` requests
pub async fn mount_error(server: &MockServer, status: u16, body: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .up_to_n_times(times)
        .mount(server)
        .await;
}

/// Millisecond-scale backoff so retry tests run in real time
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(2),
        max_delay: Duration::from_millis(20),
        jitter_fraction: 0.0,
        transient_delay: Duration::from_millis(2),
        ..RetryPolicy::default()
    }
}

pub fn api_config(server: &MockServer, model: &str) -> ApiConfig {
    ApiConfig::new(
        ApiKey::new("sk-test-key").expect("non-empty key"),
        ModelName::parse(model).expect("valid model"),
    )
    .with_endpoint(format!("{}{CHAT_PATH}", server.uri()))
}

pub fn client_for(
    server: &MockServer,
    model: &str,
    rate_limit: Option<RateLimitConfig>,
) -> GenerationClient {
    GenerationClient::new(api_config(server, model), fast_retry_policy(), rate_limit)
        .expect("client builds")
}

/// Request bodies received so far, in order
pub async fn received_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .expect("request recording enabled")
        .iter()
        .map(|request| serde_json::from_slice(&request.body).expect("json body"))
        .collect()
}
