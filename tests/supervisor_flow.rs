//! Integration tests for the bootstrap -> supervisor hand-off.
//!
//! A bootstrapped session is handed to the supervisor with the ping responder
//! registered, and a scripted sync drives it:
//! - Recovery-key verification runs once, after the first response
//! - `!ping` from another user is answered, the bot's own `!ping` is not
//! - A failed verification stops the bot before any message is handled
//! - A transport failure surfaces through `wait_for_shutdown`

use matrixbot::config::BotConfig;
use matrixbot::error::BotError;
use matrixbot::matrix::mock::{MockMatrixClient, MockOp, SyncStep};
use matrixbot::matrix::{
    wait_for_shutdown, Bootstrapper, BotSession, IncomingMessage, PingResponder, RoomId,
    Supervisor, UserId, VerificationStep,
};
use matrixbot::persistence::MemoryCredentialStore;

// === Test Fixtures ===

fn bot_config(recovery_key: Option<&str>) -> BotConfig {
    BotConfig {
        homeserver: "https://matrix.example.org".to_string(),
        display_name: "Ping Bot".to_string(),
        username: "bot".to_string(),
        password: "hunter2".to_string(),
        recovery_key: recovery_key.map(str::to_string),
    }
}

fn text(sender: &str, body: &str) -> IncomingMessage {
    IncomingMessage {
        room: RoomId("!lobby:example.org".to_string()),
        sender: UserId(sender.to_string()),
        event_id: format!("${}", body.len()),
        body: body.to_string(),
        timestamp: 1_700_000_000_000,
    }
}

async fn bootstrap(client: &MockMatrixClient, config: &BotConfig) -> BotSession<MockMatrixClient> {
    let store = MemoryCredentialStore::new();
    Bootstrapper::new(client.clone(), &store, config)
        .bootstrap()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_ping_bot_end_to_end() {
    let client = MockMatrixClient::new();
    let config = bot_config(Some("EsTc recovery"));
    let session = bootstrap(&client, &config).await;

    client.push_sync(SyncStep::Response);
    client.push_sync(SyncStep::Message(text("@alice:example.org", "!ping")));
    client.push_sync(SyncStep::Message(text("@bot:example.org", "!ping")));
    client.push_sync(SyncStep::Message(text("@alice:example.org", "hello")));
    client.push_sync(SyncStep::Failure("stream closed".to_string()));

    let supervisor = Supervisor::new(session).with_handler(PingResponder);
    let gate = supervisor.verification_gate();
    let result = supervisor.run().await;

    assert!(matches!(result, Err(BotError::Transport(_))));
    assert!(gate.has_fired());
    assert_eq!(client.last_recovery_key().as_deref(), Some("EsTc recovery"));
    assert_eq!(client.call_count(MockOp::SignOwnDevice), 1);

    let sent = client.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].body, "pong");
    assert_eq!(sent[0].room, RoomId("!lobby:example.org".to_string()));
}

#[tokio::test]
async fn test_bad_recovery_key_stops_before_messages() {
    let client = MockMatrixClient::new();
    let config = bot_config(Some("EsTc wrong"));
    let session = bootstrap(&client, &config).await;

    client.fail(MockOp::UnlockSecretStorage);
    client.push_sync(SyncStep::Response);
    client.push_sync(SyncStep::Message(text("@alice:example.org", "!ping")));

    let result = Supervisor::new(session)
        .with_handler(PingResponder)
        .run()
        .await;

    match result {
        Err(BotError::Verification { step, .. }) => {
            assert_eq!(step, VerificationStep::ValidateRecoveryKey)
        }
        other => panic!("Expected Verification error, got: {:?}", other),
    }
    assert_eq!(client.call_count(MockOp::ImportCrossSigningKeys), 0);
    assert!(client.sent_messages().is_empty());
}

#[tokio::test]
async fn test_send_failure_keeps_bot_running() {
    let client = MockMatrixClient::new();
    let config = bot_config(None);
    let session = bootstrap(&client, &config).await;

    client.fail(MockOp::SendText);
    client.push_sync(SyncStep::Message(text("@alice:example.org", "!ping")));
    client.push_sync(SyncStep::Message(text("@carol:example.org", "!ping")));
    client.push_sync(SyncStep::Failure("stream closed".to_string()));

    let result = Supervisor::new(session)
        .with_handler(PingResponder)
        .run()
        .await;

    // Both pings were attempted; only the transport ended the loop
    assert_eq!(client.call_count(MockOp::SendText), 2);
    assert!(matches!(result, Err(BotError::Transport(_))));
}

#[tokio::test]
async fn test_transport_failure_through_shutdown_wait() {
    let client = MockMatrixClient::new();
    let config = bot_config(None);
    let session = bootstrap(&client, &config).await;

    client.push_sync(SyncStep::Failure("homeserver unreachable".to_string()));

    let task = Supervisor::new(session).spawn();
    let result = wait_for_shutdown(task, futures::future::pending::<()>()).await;

    let err = result.unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("homeserver unreachable"));
}
