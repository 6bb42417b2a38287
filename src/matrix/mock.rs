//! Mock Matrix Client for Testing
//!
//! Provides MockMatrixClient for exercising bootstrap, verification and the
//! sync loop without a homeserver.

use super::traits::*;
use crate::identity::{PickleKey, SessionCredentials};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Client operations, for fault injection and call assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Login,
    ResumeSession,
    InitEncryption,
    SetDisplayName,
    DefaultSecretStorageKey,
    UnlockSecretStorage,
    ImportCrossSigningKeys,
    SignOwnDevice,
    SignOwnMasterKey,
    Sync,
    SendText,
}

/// One scripted step of the mock sync loop
#[derive(Debug, Clone)]
pub enum SyncStep {
    /// A sync response with no message events
    Response,
    /// A sync response carrying one text message
    Message(IncomingMessage),
    /// The transport fails and the loop ends
    Failure(String),
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub room: RoomId,
    pub body: String,
}

/// Mock Matrix client for testing
#[derive(Clone)]
pub struct MockMatrixClient {
    state: Arc<Mutex<MockState>>,
}

struct MockState {
    calls: Vec<MockOp>,
    failing: HashSet<MockOp>,
    issued: SessionCredentials,
    logins: usize,
    /// Encrypted state stores by device id, with the key that opened them
    stores: HashMap<String, PickleKey>,
    session: Option<SessionCredentials>,
    pickle_key: Option<PickleKey>,
    display_name: Option<String>,
    login_device_name: Option<String>,
    recovery_key: Option<String>,
    sync_script: VecDeque<SyncStep>,
    sent_messages: Vec<SentMessage>,
}

impl MockMatrixClient {
    /// Create new mock client that issues `@bot:example.org` on login
    pub fn new() -> Self {
        Self::issuing(SessionCredentials::new(
            "syt_mock_token",
            "@bot:example.org",
            "MOCKDEVICE",
        ))
    }

    /// Create a mock whose first `login` returns `credentials`. Later logins
    /// create new devices (`<device_id>2`, `<device_id>3`, ...).
    pub fn issuing(credentials: SessionCredentials) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                calls: Vec::new(),
                failing: HashSet::new(),
                issued: credentials,
                logins: 0,
                stores: HashMap::new(),
                session: None,
                pickle_key: None,
                display_name: None,
                login_device_name: None,
                recovery_key: None,
                sync_script: VecDeque::new(),
                sent_messages: Vec::new(),
            })),
        }
    }

    /// Make every future call of `op` fail
    pub fn fail(&self, op: MockOp) {
        self.state.lock().unwrap().failing.insert(op);
    }

    /// Undo `fail(op)`
    pub fn recover(&self, op: MockOp) {
        self.state.lock().unwrap().failing.remove(&op);
    }

    /// Append a step to the sync script
    pub fn push_sync(&self, step: SyncStep) {
        self.state.lock().unwrap().sync_script.push_back(step);
    }

    /// All calls so far, in order
    pub fn calls(&self) -> Vec<MockOp> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, op: MockOp) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| **c == op)
            .count()
    }

    /// Session adopted via login or resume
    pub fn session(&self) -> Option<SessionCredentials> {
        self.state.lock().unwrap().session.clone()
    }

    /// Key passed to the last successful `init_encryption`
    pub fn pickle_key(&self) -> Option<PickleKey> {
        self.state.lock().unwrap().pickle_key.clone()
    }

    pub fn display_name(&self) -> Option<String> {
        self.state.lock().unwrap().display_name.clone()
    }

    pub fn login_device_name(&self) -> Option<String> {
        self.state.lock().unwrap().login_device_name.clone()
    }

    pub fn last_recovery_key(&self) -> Option<String> {
        self.state.lock().unwrap().recovery_key.clone()
    }

    /// Get sent messages for assertions
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent_messages.clone()
    }

    /// Record the call and return the injected error, if any
    fn enter(&self, op: MockOp) -> MatrixResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(op);
        if !state.failing.contains(&op) {
            return Ok(());
        }
        let reason = format!("injected {:?} failure", op);
        Err(match op {
            MockOp::Login => MatrixError::LoginRejected(reason),
            MockOp::ResumeSession => MatrixError::NoSession(reason),
            MockOp::InitEncryption | MockOp::SignOwnDevice | MockOp::SignOwnMasterKey => {
                MatrixError::Crypto(reason)
            }
            MockOp::DefaultSecretStorageKey
            | MockOp::UnlockSecretStorage
            | MockOp::ImportCrossSigningKeys => MatrixError::SecretStorage(reason),
            MockOp::Sync => MatrixError::Network(reason),
            MockOp::SetDisplayName | MockOp::SendText => MatrixError::Api(reason),
        })
    }

    fn require_session(&self, what: &str) -> MatrixResult<()> {
        if self.state.lock().unwrap().session.is_none() {
            return Err(MatrixError::NoSession(format!("{}: not logged in", what)));
        }
        Ok(())
    }
}

impl Default for MockMatrixClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MatrixClient for MockMatrixClient {
    async fn login(
        &self,
        _username: &str,
        _password: &str,
        device_name: &str,
    ) -> MatrixResult<SessionCredentials> {
        self.enter(MockOp::Login)?;
        let mut state = self.state.lock().unwrap();
        state.logins += 1;
        let mut issued = state.issued.clone();
        if state.logins > 1 {
            issued.device_id = format!("{}{}", issued.device_id, state.logins);
        }
        state.session = Some(issued.clone());
        state.login_device_name = Some(device_name.to_string());
        Ok(issued)
    }

    async fn resume_session(&self, credentials: &SessionCredentials) -> MatrixResult<()> {
        self.enter(MockOp::ResumeSession)?;
        self.state.lock().unwrap().session = Some(credentials.clone());
        Ok(())
    }

    async fn init_encryption(&self, pickle_key: &PickleKey) -> MatrixResult<()> {
        self.enter(MockOp::InitEncryption)?;
        self.require_session("init_encryption")?;
        let mut state = self.state.lock().unwrap();
        let device_id = state
            .session
            .as_ref()
            .map(|s| s.device_id.clone())
            .unwrap_or_default();
        match state.stores.get(&device_id) {
            Some(existing) if existing != pickle_key => {
                return Err(MatrixError::Crypto(format!(
                    "state store for {} is encrypted with a different key",
                    device_id
                )));
            }
            Some(_) => {}
            None => {
                state.stores.insert(device_id, pickle_key.clone());
            }
        }
        state.pickle_key = Some(pickle_key.clone());
        Ok(())
    }

    async fn set_display_name(&self, name: &str) -> MatrixResult<()> {
        self.enter(MockOp::SetDisplayName)?;
        self.require_session("set_display_name")?;
        self.state.lock().unwrap().display_name = Some(name.to_string());
        Ok(())
    }

    async fn default_secret_storage_key(&self) -> MatrixResult<String> {
        self.enter(MockOp::DefaultSecretStorageKey)?;
        Ok("mock_ssss_key".to_string())
    }

    async fn unlock_secret_storage(&self, _key_id: &str, recovery_key: &str) -> MatrixResult<()> {
        self.enter(MockOp::UnlockSecretStorage)?;
        self.state.lock().unwrap().recovery_key = Some(recovery_key.to_string());
        Ok(())
    }

    async fn import_cross_signing_keys(&self) -> MatrixResult<()> {
        self.enter(MockOp::ImportCrossSigningKeys)
    }

    async fn sign_own_device(&self) -> MatrixResult<()> {
        self.enter(MockOp::SignOwnDevice)
    }

    async fn sign_own_master_key(&self) -> MatrixResult<()> {
        self.enter(MockOp::SignOwnMasterKey)
    }

    /// Replays the sync script, then idles like a long-poll with no traffic.
    async fn sync(&self, observer: Arc<dyn SyncObserver>) -> MatrixResult<()> {
        self.enter(MockOp::Sync)?;

        loop {
            let step = self.state.lock().unwrap().sync_script.pop_front();
            match step {
                Some(SyncStep::Response) => observer.on_sync_response().await?,
                Some(SyncStep::Message(message)) => {
                    observer.on_room_message(message).await;
                    observer.on_sync_response().await?;
                }
                Some(SyncStep::Failure(reason)) => return Err(MatrixError::Network(reason)),
                None => futures::future::pending::<()>().await,
            }
        }
    }

    async fn send_text(&self, room: &RoomId, body: &str) -> MatrixResult<()> {
        self.enter(MockOp::SendText)?;
        if !room.0.starts_with('!') {
            return Err(MatrixError::InvalidId(room.0.clone()));
        }
        self.state.lock().unwrap().sent_messages.push(SentMessage {
            room: room.clone(),
            body: body.to_string(),
        });
        Ok(())
    }

    fn user_id(&self) -> Option<UserId> {
        self.state
            .lock()
            .unwrap()
            .session
            .as_ref()
            .map(|s| UserId(s.user_id.clone()))
    }
}
