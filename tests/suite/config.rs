//! A config file driving the client and session

use std::fs;
use std::path::PathBuf;

use persona_engine::{ChatSession, ClientOptions, GenerationClient, PersonaConfig};
use tempfile::TempDir;

use crate::common::{CHAT_PATH, mount_chat_response, received_bodies, start_chat_mock};

const CONFIG: &str = r#"
[app]
model = "gpt-4.1-mini"
debug = true

[api_keys]
openai = "sk-from-file"

[rate_limit]
requests_per_minute = 6000
cooldown_every = 0

[retry]
max_attempts = 2
base_delay_secs = 0.01

[context]
max_context_tokens = 2000
recent_window = 6
reinforcement_interval = 1
reinforcement_text = "REMEMBER: you are Sam."

[generation]
temperature = 0.3
max_tokens_greeting = 42
"#;

fn write_config(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("config.toml");
    fs::write(&path, CONFIG).unwrap();
    path
}

#[tokio::test]
async fn config_file_drives_client_and_session() {
    let server = start_chat_mock().await;
    mount_chat_response(&server, "hey yourself").await;

    let dir = TempDir::new().unwrap();
    let config = PersonaConfig::load_from(write_config(&dir))
        .unwrap()
        .expect("file exists");

    let client = GenerationClient::from_config(
        &config,
        ClientOptions {
            endpoint: Some(format!("{}{CHAT_PATH}", server.uri())),
            ..ClientOptions::default()
        },
    )
    .unwrap();
    assert_eq!(client.model().as_str(), "gpt-4.1-mini");
    assert!(client.debug());
    assert!(client.rate_limiter().is_some());

    let mut session = ChatSession::new("You are Sam.", client, &config);
    let reply = session.send("hi!").await;
    assert!(!reply.degraded, "{}", reply.text);
    assert!(reply.reinforced);

    let bodies = received_bodies(&server).await;
    let body = &bodies[0];
    assert_eq!(body["model"], "gpt-4.1-mini");
    assert_eq!(body["max_tokens"], 42);
    assert!((body["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    let system = body["messages"][0]["content"].as_str().unwrap();
    assert!(system.starts_with("You are Sam."));
    assert!(system.contains("REMEMBER: you are Sam."));
    assert_eq!(session.usage().context.budget_tokens, 2000);
}

#[tokio::test]
async fn command_line_options_override_file() {
    let server = start_chat_mock().await;
    mount_chat_response(&server, "ok").await;

    let dir = TempDir::new().unwrap();
    let config = PersonaConfig::load_from(write_config(&dir))
        .unwrap()
        .unwrap();

    let client = GenerationClient::from_config(
        &config,
        ClientOptions {
            model: Some("o3-mini".to_string()),
            requests_per_minute: Some(0),
            debug: Some(false),
            endpoint: Some(format!("{}{CHAT_PATH}", server.uri())),
        },
    )
    .unwrap();
    assert_eq!(client.model().as_str(), "o3-mini");
    assert!(client.rate_limiter().is_none());
    assert!(!client.debug());

    let mut session = ChatSession::new("You are Sam.", client, &config);
    session.send("hello").await;

    let body = &received_bodies(&server).await[0];
    assert!(body.get("temperature").is_none());
    // The greeting limit of 42 is raised to the reasoning floor.
    assert_eq!(body["max_completion_tokens"], 1000);
}

#[test]
fn missing_file_is_not_an_error() {
    let dir = TempDir::new().unwrap();
    let loaded = PersonaConfig::load_from(dir.path().join("absent.toml")).unwrap();
    assert!(loaded.is_none());
}
