//! Event loop supervisor
//!
//! Owns the session after bootstrap. Runs the sync loop, performs the
//! one-time recovery-key verification on the first sync response, and hands
//! text messages to the registered handler. `wait_for_shutdown` races the sync
//! task against an interrupt; nothing in flight is drained.

use super::bootstrap::BotSession;
use super::messenger::Messenger;
use super::traits::{IncomingMessage, MatrixClient, MatrixError, MatrixResult, SyncObserver};
use super::verification::{verify_session, VerificationGate};
use crate::error::BotError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Application callback for incoming text messages.
///
/// Awaited inline on the sync path: long work here delays the next sync.
/// Spawn a task if the work should not block event delivery.
#[async_trait]
pub trait MessageHandler<C: MatrixClient>: Send + Sync {
    async fn on_message(
        &self,
        messenger: &Messenger<C>,
        message: &IncomingMessage,
    ) -> Result<(), BotError>;
}

pub struct Supervisor<C: MatrixClient> {
    session: BotSession<C>,
    handler: Option<Arc<dyn MessageHandler<C>>>,
    gate: Arc<VerificationGate>,
}

impl<C: MatrixClient> Supervisor<C> {
    pub fn new(session: BotSession<C>) -> Self {
        Self {
            session,
            handler: None,
            gate: Arc::new(VerificationGate::new()),
        }
    }

    /// Register the message callback
    pub fn with_handler(mut self, handler: impl MessageHandler<C> + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Outbound messaging bound to this session
    pub fn messenger(&self) -> Messenger<C> {
        Messenger::new(self.session.client.clone())
    }

    /// Latch recording whether post-connect verification has run
    pub fn verification_gate(&self) -> Arc<VerificationGate> {
        Arc::clone(&self.gate)
    }

    /// Run the sync loop until it terminates. Only returns on failure:
    /// `BotError::Transport` when the stream ends, `BotError::Verification`
    /// when the recovery key could not be applied.
    pub async fn run(self) -> Result<(), BotError> {
        let dispatcher = Arc::new(SyncDispatcher {
            messenger: self.messenger(),
            client: self.session.client.clone(),
            recovery_key: self.session.recovery_key.clone(),
            gate: self.gate,
            handler: self.handler,
            failure: Mutex::new(None),
        });

        info!(user_id = %self.session.identity.user_id(), "starting sync loop");
        let result = self.session.client.sync(dispatcher.clone()).await;

        let failure = dispatcher.failure.lock().ok().and_then(|mut slot| slot.take());
        if let Some(err) = failure {
            return Err(err);
        }

        // The stream never ends on its own; an end without error is still terminal
        let err = match result {
            Ok(()) => MatrixError::Network("sync stream ended".to_string()),
            Err(e) => e,
        };
        error!(error = %err, "sync loop failed");
        Err(BotError::Transport(err))
    }

    /// Run the sync loop on a background task
    pub fn spawn(self) -> JoinHandle<Result<(), BotError>> {
        tokio::spawn(self.run())
    }
}

struct SyncDispatcher<C: MatrixClient> {
    client: C,
    messenger: Messenger<C>,
    recovery_key: Option<String>,
    gate: Arc<VerificationGate>,
    handler: Option<Arc<dyn MessageHandler<C>>>,
    /// Verification error that stopped the loop, reported by `run`
    failure: Mutex<Option<BotError>>,
}

#[async_trait]
impl<C: MatrixClient> SyncObserver for SyncDispatcher<C> {
    async fn on_sync_response(&self) -> MatrixResult<()> {
        let Some(recovery_key) = self.recovery_key.as_deref() else {
            return Ok(());
        };
        if !self.gate.try_fire() {
            return Ok(());
        }

        debug!("first sync response, verifying session");
        if let Err(err) = verify_session(&self.client, recovery_key).await {
            error!(error = %err, "session verification failed");
            let reason = err.to_string();
            if let Ok(mut slot) = self.failure.lock() {
                *slot = Some(err);
            }
            return Err(MatrixError::Crypto(reason));
        }
        Ok(())
    }

    async fn on_room_message(&self, message: IncomingMessage) {
        let Some(handler) = &self.handler else {
            return;
        };

        // Handler failures are logged; the bot keeps syncing
        if let Err(e) = handler.on_message(&self.messenger, &message).await {
            warn!(
                room = %message.room,
                sender = %message.sender,
                error = %e,
                "message handler failed"
            );
        }
    }
}

/// Why the process is stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Operator interrupt (SIGINT/SIGTERM)
    Interrupted,
    /// The sync task returned without an error
    SyncStopped,
}

/// Wait for whichever comes first: the sync task ending or `interrupt`.
///
/// The sync task is not cancelled on interrupt; the process simply exits.
pub async fn wait_for_shutdown<F>(
    sync_task: JoinHandle<Result<(), BotError>>,
    interrupt: F,
) -> Result<ShutdownReason, BotError>
where
    F: Future<Output = ()>,
{
    tokio::select! {
        joined = sync_task => match joined {
            Ok(Ok(())) => Ok(ShutdownReason::SyncStopped),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(BotError::Transport(MatrixError::Network(format!(
                "sync task failed: {}",
                join_err
            )))),
        },
        _ = interrupt => {
            info!("Bot is shutting down...");
            Ok(ShutdownReason::Interrupted)
        }
    }
}

/// Resolves on SIGINT or SIGTERM (Ctrl+C on non-Unix platforms)
pub async fn interrupt_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("received Ctrl+C");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Identity, PickleKey, SessionCredentials};
    use crate::matrix::bootstrap::AuthPath;
    use crate::matrix::mock::{MockMatrixClient, MockOp, SyncStep};
    use crate::matrix::traits::{RoomId, UserId};
    use crate::matrix::verification::VerificationStep;

    fn session(client: MockMatrixClient, recovery_key: Option<&str>) -> BotSession<MockMatrixClient> {
        BotSession {
            client,
            identity: Identity::new(
                SessionCredentials::new("tok", "@bot:example.org", "DEV"),
                PickleKey::generate(),
            )
            .unwrap(),
            auth_path: AuthPath::Resumed,
            persisted: false,
            recovery_key: recovery_key.map(str::to_string),
        }
    }

    fn message(body: &str) -> IncomingMessage {
        IncomingMessage {
            room: RoomId("!room:example.org".to_string()),
            sender: UserId("@alice:example.org".to_string()),
            event_id: "$event".to_string(),
            body: body.to_string(),
            timestamp: 1_700_000_000_000,
        }
    }

    #[derive(Clone, Default)]
    struct RecordingHandler {
        seen: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl MessageHandler<MockMatrixClient> for RecordingHandler {
        async fn on_message(
            &self,
            _messenger: &Messenger<MockMatrixClient>,
            message: &IncomingMessage,
        ) -> Result<(), BotError> {
            self.seen.lock().unwrap().push(message.body.clone());
            if self.fail {
                return Err(BotError::Api(MatrixError::Api("handler failed".into())));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_verification_runs_once_across_many_responses() {
        let client = MockMatrixClient::new();
        for _ in 0..4 {
            client.push_sync(SyncStep::Response);
        }
        client.push_sync(SyncStep::Failure("connection reset".to_string()));

        let supervisor = Supervisor::new(session(client.clone(), Some("EsTc abcd")));
        let gate = supervisor.verification_gate();
        let result = supervisor.run().await;

        assert!(matches!(result, Err(BotError::Transport(_))));
        assert!(gate.has_fired());
        assert_eq!(client.call_count(MockOp::DefaultSecretStorageKey), 1);
        assert_eq!(client.call_count(MockOp::SignOwnMasterKey), 1);
    }

    #[tokio::test]
    async fn test_no_recovery_key_means_no_verification() {
        let client = MockMatrixClient::new();
        client.push_sync(SyncStep::Response);
        client.push_sync(SyncStep::Response);
        client.push_sync(SyncStep::Failure("closed".to_string()));

        let supervisor = Supervisor::new(session(client.clone(), None));
        let gate = supervisor.verification_gate();
        let _ = supervisor.run().await;

        assert!(!gate.has_fired());
        assert_eq!(client.call_count(MockOp::DefaultSecretStorageKey), 0);
        assert_eq!(client.call_count(MockOp::UnlockSecretStorage), 0);
    }

    #[tokio::test]
    async fn test_verification_failure_stops_sync() {
        let client = MockMatrixClient::new();
        client.fail(MockOp::UnlockSecretStorage);
        client.push_sync(SyncStep::Response);
        client.push_sync(SyncStep::Message(message("never delivered")));

        let handler = RecordingHandler::default();
        let seen = Arc::clone(&handler.seen);
        let result = Supervisor::new(session(client.clone(), Some("wrong")))
            .with_handler(handler)
            .run()
            .await;

        match result {
            Err(BotError::Verification { step, .. }) => {
                assert_eq!(step, VerificationStep::ValidateRecoveryKey)
            }
            other => panic!("Expected Verification error, got: {:?}", other),
        }
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_messages_reach_handler_in_order() {
        let client = MockMatrixClient::new();
        client.push_sync(SyncStep::Message(message("one")));
        client.push_sync(SyncStep::Message(message("two")));
        client.push_sync(SyncStep::Failure("closed".to_string()));

        let handler = RecordingHandler::default();
        let seen = Arc::clone(&handler.seen);
        let _ = Supervisor::new(session(client, None))
            .with_handler(handler)
            .run()
            .await;

        assert_eq!(*seen.lock().unwrap(), vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn test_handler_failure_does_not_stop_sync() {
        let client = MockMatrixClient::new();
        client.push_sync(SyncStep::Message(message("one")));
        client.push_sync(SyncStep::Message(message("two")));
        client.push_sync(SyncStep::Failure("closed".to_string()));

        let handler = RecordingHandler {
            fail: true,
            ..Default::default()
        };
        let seen = Arc::clone(&handler.seen);
        let result = Supervisor::new(session(client, None))
            .with_handler(handler)
            .run()
            .await;

        assert_eq!(seen.lock().unwrap().len(), 2);
        // Loop ended because of the transport, not the handler
        assert!(matches!(result, Err(BotError::Transport(_))));
    }

    #[tokio::test]
    async fn test_transport_failure_reaches_shutdown_wait() {
        let client = MockMatrixClient::new();
        client.push_sync(SyncStep::Response);
        client.push_sync(SyncStep::Failure("homeserver went away".to_string()));

        let task = Supervisor::new(session(client, None)).spawn();
        let result = wait_for_shutdown(task, futures::future::pending::<()>()).await;

        match result {
            Err(BotError::Transport(MatrixError::Network(reason))) => {
                assert_eq!(reason, "homeserver went away")
            }
            other => panic!("Expected Transport error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_interrupt_wins_while_sync_idle() {
        let client = MockMatrixClient::new();
        client.push_sync(SyncStep::Response);

        let task = Supervisor::new(session(client.clone(), None)).spawn();
        let reason = wait_for_shutdown(task, async {}).await.unwrap();

        assert_eq!(reason, ShutdownReason::Interrupted);
    }
}
