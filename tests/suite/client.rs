//! Generation client against a mock Chat Completions endpoint

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use persona_engine::{ChatMessage, ErrorClass, GenerationClient, TerminalError};
use persona_providers::openai::RequestParams;
use persona_providers::rate_limit::RateLimitConfig;
use persona_providers::retry::RetryPolicy;
use wiremock::matchers::method;
use wiremock::{Mock, ResponseTemplate};

use crate::common::{
    api_config, client_for, fast_retry_policy, mount_chat_response, mount_error, received_bodies,
    start_chat_mock,
};

fn hello() -> Vec<ChatMessage> {
    vec![ChatMessage::system("You are terse."), ChatMessage::user("hello")]
}

#[tokio::test]
async fn request_fields_follow_model_profile() {
    let server = start_chat_mock().await;
    mount_chat_response(&server, "hey").await;

    for model in ["gpt-5", "o1-preview", "O3-mini", "o4-mini", "gpt-4o-mini", "gpt-4.1"] {
        client_for(&server, model, None)
            .complete(&hello(), RequestParams::default())
            .await
            .unwrap();
    }

    let bodies = received_bodies(&server).await;
    assert_eq!(bodies.len(), 6);
    for body in &bodies[..4] {
        assert!(body.get("temperature").is_none(), "{body}");
        assert!(body.get("max_tokens").is_none(), "{body}");
        assert!(body.get("max_completion_tokens").is_some(), "{body}");
    }
    for body in &bodies[4..] {
        assert!(body.get("temperature").is_some(), "{body}");
        assert!(body.get("max_tokens").is_some(), "{body}");
        assert!(body.get("max_completion_tokens").is_none(), "{body}");
    }
}

#[tokio::test]
async fn rate_limited_call_retries_with_stable_idempotency_key() {
    let server = start_chat_mock().await;
    mount_error(&server, 429, "rate_limit_exceeded", 2).await;
    mount_chat_response(&server, "finally").await;

    let completion = client_for(&server, "gpt-4o-mini", None)
        .complete(&hello(), RequestParams::default())
        .await
        .unwrap();
    assert_eq!(completion.text, "finally");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    let keys: Vec<_> = requests
        .iter()
        .map(|r| r.headers.get("idempotency-key").unwrap().clone())
        .collect();
    assert!(keys.windows(2).all(|pair| pair[0] == pair[1]));
    let counts: Vec<_> = requests
        .iter()
        .map(|r| r.headers.get("x-retry-count").unwrap().to_str().unwrap().to_string())
        .collect();
    assert_eq!(counts, vec!["0", "1", "2"]);
}

#[tokio::test]
async fn persistent_rate_limit_exhausts_after_max_attempts() {
    let server = start_chat_mock().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
        .mount(&server)
        .await;

    let policy = RetryPolicy {
        max_attempts: 4,
        ..fast_retry_policy()
    };
    let client = GenerationClient::new(api_config(&server, "gpt-4o-mini"), policy, None).unwrap();
    let err = client
        .complete(&hello(), RequestParams::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TerminalError::Exhausted {
            class: ErrorClass::RateLimited,
            attempts: 4,
            ..
        }
    ));
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
}

#[tokio::test]
async fn server_errors_get_short_retries() {
    let server = start_chat_mock().await;
    mount_error(&server, 503, "overloaded", 1).await;
    mount_chat_response(&server, "ok").await;

    let completion = client_for(&server, "gpt-4o-mini", None)
        .complete(&hello(), RequestParams::default())
        .await
        .unwrap();
    assert_eq!(completion.text, "ok");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn rate_limiter_spaces_consecutive_calls() {
    let server = start_chat_mock().await;
    mount_chat_response(&server, "ok").await;

    // 600 rpm: 100ms between request starts.
    let mut limit = RateLimitConfig::new(NonZeroU32::new(600).unwrap());
    limit.cooldown_every = 0;
    let client = client_for(&server, "gpt-4o-mini", Some(limit));

    let started = Instant::now();
    for _ in 0..3 {
        client
            .complete(&hello(), RequestParams::default())
            .await
            .unwrap();
    }
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(client.rate_limiter().unwrap().request_count().await, 3);
}

#[tokio::test]
async fn deadline_cancels_between_attempts() {
    let server = start_chat_mock().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limit"))
        .mount(&server)
        .await;

    let policy = RetryPolicy {
        base_delay: Duration::from_millis(200),
        max_delay: Duration::from_secs(1),
        jitter_fraction: 0.0,
        ..RetryPolicy::default()
    };
    let client = GenerationClient::new(api_config(&server, "gpt-4o-mini"), policy, None)
        .unwrap()
        .with_call_timeout(Duration::from_millis(300));

    let err = client
        .complete(&hello(), RequestParams::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TerminalError::Canceled { .. }), "{err:?}");
    assert!(err.class().is_none());
}
