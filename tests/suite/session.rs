//! Chat sessions end to end against a mock endpoint

use persona_engine::{
    AdherenceScorer, ChatSession, ContextConfig, ContextManager, MessageKind, Role,
    SessionSettings,
};

use crate::common::{client_for, mount_chat_response, mount_error, received_bodies, start_chat_mock};

const RAMBLE: &str = "so I was thinking about the weekend and whether we should drive \
up to the lake or just stay home and finally clean out the garage like we promised";

fn session_with(server: &wiremock::MockServer, config: ContextConfig) -> ChatSession {
    ChatSession::with_parts(
        "You are Sam, a laconic fisherman.",
        client_for(server, "gpt-4o-mini", None),
        ContextManager::new(config),
        AdherenceScorer::default(),
        SessionSettings::default(),
    )
}

#[tokio::test]
async fn long_conversation_stays_within_budget() {
    let server = start_chat_mock().await;
    mount_chat_response(&server, "hmm, lake sounds nice").await;

    let config = ContextConfig {
        max_context_tokens: 400,
        recent_window: 4,
        ..ContextConfig::default()
    };
    let mut session = session_with(&server, config);

    for _ in 0..12 {
        let reply = session.send(RAMBLE).await;
        assert!(!reply.degraded, "{}", reply.text);
        let usage = session.usage();
        assert!(
            usage.context.used_tokens <= usage.context.budget_tokens,
            "{}",
            usage.context.format_compact()
        );
    }

    let usage = session.usage();
    assert!(usage.context.compacted);
    assert!(session.history().has_placeholders());
    assert_eq!(usage.api.total_tokens, 12 * 15);

    // The newest exchanges are always sent verbatim.
    let bodies = received_bodies(&server).await;
    let last = bodies.last().unwrap()["messages"].as_array().unwrap().clone();
    assert_eq!(last[0]["role"], "system");
    assert_eq!(last.last().unwrap()["content"], RAMBLE);
}

#[tokio::test]
async fn failed_turn_rolls_back_and_session_recovers() {
    let server = start_chat_mock().await;
    mount_error(&server, 400, "bad request", 1).await;
    mount_chat_response(&server, "yo").await;

    let mut session = session_with(&server, ContextConfig::default());

    let first = session.send("hey there").await;
    assert!(first.degraded);
    assert!(first.text.starts_with("[no response:"), "{}", first.text);
    assert_eq!(first.kind, MessageKind::Greeting);
    assert!(first.score.is_none());
    assert!(session.history().is_empty());

    let second = session.send("hey again").await;
    assert!(!second.degraded);
    assert_eq!(second.text, "yo");
    assert!(second.score.is_some());

    let roles: Vec<Role> = session.history().turns().map(|t| t.role()).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
    assert_eq!(session.usage().degraded_replies, 1);

    // The rolled-back message never reaches the next request.
    let bodies = received_bodies(&server).await;
    let messages = bodies[1]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["content"], "hey again");
}

#[tokio::test]
async fn kind_sets_completion_limit() {
    let server = start_chat_mock().await;
    mount_chat_response(&server, "hmm, maybe").await;

    let mut session = session_with(&server, ContextConfig::default());
    assert_eq!(session.send("hello!").await.kind, MessageKind::Greeting);
    assert_eq!(
        session.send("what do you think about pineapple pizza").await.kind,
        MessageKind::Opinion
    );
    assert_eq!(
        session.send("I caught a trout this morning").await.kind,
        MessageKind::General
    );

    let limits: Vec<u64> = received_bodies(&server)
        .await
        .iter()
        .map(|body| body["max_tokens"].as_u64().unwrap())
        .collect();
    assert_eq!(limits, vec![60, 50, 300]);
}

#[tokio::test]
async fn reasoning_model_limits_start_at_reasoning_floor() {
    let server = start_chat_mock().await;
    mount_chat_response(&server, "hmm, maybe").await;

    let mut session = ChatSession::with_parts(
        "You are Sam, a laconic fisherman.",
        client_for(&server, "o3-mini", None),
        ContextManager::new(ContextConfig::default()),
        AdherenceScorer::default(),
        SessionSettings::default(),
    );
    session.send("hello!").await;
    session.send("what do you think about pineapple pizza").await;

    for body in received_bodies(&server).await {
        assert_eq!(body["max_completion_tokens"], 1000, "{body}");
        assert!(body.get("max_tokens").is_none());
    }
}
