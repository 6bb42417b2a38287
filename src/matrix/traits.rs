//! Matrix Client Trait Abstractions
//!
//! The bootstrapper and supervisor only talk to the homeserver through
//! `MatrixClient`, so the SDK-backed client and `MockMatrixClient` are
//! interchangeable.

use crate::identity::{PickleKey, SessionCredentials};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Matrix room identifier (e.g. `!abc:example.org`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(pub String);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Matrix user identifier (e.g. `@bot:example.org`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incoming `m.room.message` text event
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub room: RoomId,
    pub sender: UserId,
    pub event_id: String,
    pub body: String,
    /// Origin server timestamp, milliseconds since the epoch
    pub timestamp: u64,
}

/// Result type for Matrix operations
pub type MatrixResult<T> = Result<T, MatrixError>;

/// Matrix client errors
#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Login rejected: {0}")]
    LoginRejected(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Secret storage error: {0}")]
    SecretStorage(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("No active session: {0}")]
    NoSession(String),

    #[error("Request failed: {0}")]
    Api(String),
}

/// Receives sync-loop callbacks.
///
/// Both methods are awaited inline by the sync loop, so a slow observer delays
/// the next long-poll.
#[async_trait]
pub trait SyncObserver: Send + Sync {
    /// Called after every sync response. An error stops the sync loop and is
    /// returned from `MatrixClient::sync`.
    async fn on_sync_response(&self) -> MatrixResult<()>;

    /// Called for each text message event in the response
    async fn on_room_message(&self, message: IncomingMessage);
}

/// Matrix client abstraction for testing
///
/// Session lifecycle is `login` or `resume_session`, then `init_encryption`,
/// then any other call. The five secret storage methods are the steps of
/// recovery-key verification, in order.
#[async_trait]
pub trait MatrixClient: Clone + Send + Sync + 'static {
    /// Password login. Returns the credentials of the newly created device.
    ///
    /// `device_name` becomes the initial display name of the device.
    async fn login(
        &self,
        username: &str,
        password: &str,
        device_name: &str,
    ) -> MatrixResult<SessionCredentials>;

    /// Adopt previously issued credentials instead of logging in
    async fn resume_session(&self, credentials: &SessionCredentials) -> MatrixResult<()>;

    /// Open the encrypted state store with `pickle_key` and bind the session to it
    async fn init_encryption(&self, pickle_key: &PickleKey) -> MatrixResult<()>;

    /// Set the account's public display name
    async fn set_display_name(&self, name: &str) -> MatrixResult<()>;

    /// Id of the account's default secret storage key
    async fn default_secret_storage_key(&self) -> MatrixResult<String>;

    /// Check `recovery_key` against the default key and unlock secret storage
    async fn unlock_secret_storage(&self, key_id: &str, recovery_key: &str) -> MatrixResult<()>;

    /// Pull the private cross-signing keys out of unlocked secret storage
    async fn import_cross_signing_keys(&self) -> MatrixResult<()>;

    /// Sign this device with the self-signing key
    async fn sign_own_device(&self) -> MatrixResult<()>;

    /// Sign the account's master key with this device
    async fn sign_own_master_key(&self) -> MatrixResult<()>;

    /// Run the sync loop until it fails or the observer stops it
    async fn sync(&self, observer: Arc<dyn SyncObserver>) -> MatrixResult<()>;

    /// Send a plain `m.text` message
    async fn send_text(&self, room: &RoomId, body: &str) -> MatrixResult<()>;

    /// Own user id, once a session exists
    fn user_id(&self) -> Option<UserId>;
}
