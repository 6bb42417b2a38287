//! Production Matrix Client Implementation
//!
//! Implements MatrixClient over matrix-sdk.
//!
//! ## Two clients
//!
//! The SDK binds the encrypted state store at build time, but the store
//! passphrase (the pickle key) is only known after login. Login therefore runs
//! on a store-less client using the raw login request, so no session is set and
//! no device keys are uploaded from it. `init_encryption` then builds the real
//! client over the SQLite state store and restores the session into it.
//!
//! Each device gets its own store directory under the configured state store
//! path, so a fresh login never meets a store encrypted with an older key.

use super::traits::*;
use crate::identity::{PickleKey, SessionCredentials};
use async_trait::async_trait;
use matrix_sdk::config::SyncSettings;
use matrix_sdk::encryption::secret_storage::SecretStore;
use matrix_sdk::matrix_auth::{MatrixSession, MatrixSessionTokens};
use matrix_sdk::ruma::api::client::session::login;
use matrix_sdk::ruma::api::client::uiaa::UserIdentifier;
use matrix_sdk::ruma::events::secret_storage::default_key::SecretStorageDefaultKeyEventContent;
use matrix_sdk::ruma::events::GlobalAccountDataEventType;
use matrix_sdk::ruma::events::room::message::{
    MessageType, OriginalSyncRoomMessageEvent, RoomMessageEventContent,
};
use matrix_sdk::ruma::serde::Raw;
use matrix_sdk::ruma::{OwnedDeviceId, RoomId as SdkRoomId, UserId as SdkUserId};
use matrix_sdk::{Client, LoopCtrl, Room, SessionMeta};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Production Matrix client implementation
#[derive(Clone)]
pub struct SdkClient {
    homeserver: String,
    state_store_path: PathBuf,
    /// Read synchronously by `user_id`
    credentials: Arc<StdMutex<Option<SessionCredentials>>>,
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    /// Store-backed client, set by `init_encryption`
    client: Option<Client>,
    /// Unlocked by `unlock_secret_storage`
    secret_store: Option<SecretStore>,
}

impl SdkClient {
    pub fn new(homeserver: impl Into<String>, state_store_path: impl AsRef<Path>) -> Self {
        Self {
            homeserver: homeserver.into(),
            state_store_path: state_store_path.as_ref().to_path_buf(),
            credentials: Arc::new(StdMutex::new(None)),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    fn session_credentials(&self) -> MatrixResult<SessionCredentials> {
        self.credentials
            .lock()
            .map_err(|_| MatrixError::NoSession("credential lock poisoned".to_string()))?
            .clone()
            .ok_or_else(|| MatrixError::NoSession("not logged in".to_string()))
    }

    fn adopt(&self, credentials: SessionCredentials) -> MatrixResult<()> {
        *self
            .credentials
            .lock()
            .map_err(|_| MatrixError::NoSession("credential lock poisoned".to_string()))? =
            Some(credentials);
        Ok(())
    }

    async fn client(&self) -> MatrixResult<Client> {
        self.inner
            .lock()
            .await
            .client
            .clone()
            .ok_or_else(|| MatrixError::NoSession("encryption not initialized".to_string()))
    }
}

fn to_session(credentials: &SessionCredentials) -> MatrixResult<MatrixSession> {
    let user_id = SdkUserId::parse(credentials.user_id.as_str())
        .map_err(|e| MatrixError::InvalidId(format!("{}: {}", credentials.user_id, e)))?;
    let device_id = OwnedDeviceId::from(credentials.device_id.as_str());

    Ok(MatrixSession {
        meta: SessionMeta { user_id, device_id },
        tokens: MatrixSessionTokens {
            access_token: credentials.access_token.clone(),
            refresh_token: None,
        },
    })
}

/// State store directory for one device: `<base>/<device_id>`.
///
/// Anything but ASCII alphanumerics, `-` and `_` in the device id becomes `_`.
fn device_store_path(base: &Path, device_id: &str) -> PathBuf {
    let dir: String = device_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    base.join(dir)
}

/// Key id from the content of an `m.secret_storage.default_key` account data event
fn default_key_id<T>(content: &Raw<T>) -> MatrixResult<String> {
    content
        .deserialize_as::<SecretStorageDefaultKeyEventContent>()
        .map(|c| c.key_id)
        .map_err(|e| MatrixError::SecretStorage(format!("malformed default key event: {}", e)))
}

/// Map a room message event to `IncomingMessage`; non-text messages are dropped
fn convert_message(
    room_id: &SdkRoomId,
    event: &OriginalSyncRoomMessageEvent,
) -> Option<IncomingMessage> {
    let MessageType::Text(text) = &event.content.msgtype else {
        return None;
    };

    Some(IncomingMessage {
        room: RoomId(room_id.to_string()),
        sender: UserId(event.sender.to_string()),
        event_id: event.event_id.to_string(),
        body: text.body.clone(),
        timestamp: u64::from(event.origin_server_ts.0),
    })
}

#[async_trait]
impl MatrixClient for SdkClient {
    async fn login(
        &self,
        username: &str,
        password: &str,
        device_name: &str,
    ) -> MatrixResult<SessionCredentials> {
        let client = Client::builder()
            .homeserver_url(&self.homeserver)
            .build()
            .await
            .map_err(|e| MatrixError::Network(format!("Failed to build client: {}", e)))?;

        let mut request = login::v3::Request::new(login::v3::LoginInfo::Password(
            login::v3::Password::new(
                UserIdentifier::UserIdOrLocalpart(username.to_string()),
                password.to_string(),
            ),
        ));
        request.initial_device_display_name = Some(device_name.to_string());

        let response = client
            .send(request, None)
            .await
            .map_err(|e| MatrixError::LoginRejected(e.to_string()))?;

        let credentials = SessionCredentials::new(
            response.access_token,
            response.user_id.to_string(),
            response.device_id.to_string(),
        );
        self.adopt(credentials.clone())?;
        Ok(credentials)
    }

    async fn resume_session(&self, credentials: &SessionCredentials) -> MatrixResult<()> {
        // Validate the ids now; the token is checked by the first request
        to_session(credentials)?;
        self.adopt(credentials.clone())
    }

    async fn init_encryption(&self, pickle_key: &PickleKey) -> MatrixResult<()> {
        let credentials = self.session_credentials()?;
        let passphrase = pickle_key.to_passphrase();

        let store_path = device_store_path(&self.state_store_path, &credentials.device_id);

        let client = Client::builder()
            .homeserver_url(&self.homeserver)
            .sqlite_store(&store_path, Some(passphrase.as_str()))
            .build()
            .await
            .map_err(|e| MatrixError::Crypto(format!("Failed to open state store: {}", e)))?;

        client
            .matrix_auth()
            .restore_session(to_session(&credentials)?)
            .await
            .map_err(|e| MatrixError::Crypto(format!("Failed to restore session: {}", e)))?;
        client.encryption().wait_for_e2ee_initialization_tasks().await;

        debug!(path = %store_path.display(), "state store opened");
        self.inner.lock().await.client = Some(client);
        Ok(())
    }

    async fn set_display_name(&self, name: &str) -> MatrixResult<()> {
        self.client()
            .await?
            .account()
            .set_display_name(Some(name))
            .await
            .map_err(|e| MatrixError::Api(e.to_string()))
    }

    async fn default_secret_storage_key(&self) -> MatrixResult<String> {
        let content = self
            .client()
            .await?
            .account()
            .fetch_account_data(GlobalAccountDataEventType::SecretStorageDefaultKey)
            .await
            .map_err(|e| MatrixError::SecretStorage(e.to_string()))?
            .ok_or_else(|| MatrixError::SecretStorage("no default key set".to_string()))?;
        default_key_id(&content)
    }

    async fn unlock_secret_storage(&self, key_id: &str, recovery_key: &str) -> MatrixResult<()> {
        let client = self.client().await?;
        let store = client
            .encryption()
            .secret_storage()
            .open_secret_store(recovery_key)
            .await
            .map_err(|e| MatrixError::SecretStorage(e.to_string()))?;

        debug!(key_id = %key_id, "secret storage unlocked");
        self.inner.lock().await.secret_store = Some(store);
        Ok(())
    }

    async fn import_cross_signing_keys(&self) -> MatrixResult<()> {
        let inner = self.inner.lock().await;
        let store = inner
            .secret_store
            .as_ref()
            .ok_or_else(|| MatrixError::SecretStorage("secret storage is locked".to_string()))?;
        store
            .import_secrets()
            .await
            .map_err(|e| MatrixError::SecretStorage(e.to_string()))
    }

    async fn sign_own_device(&self) -> MatrixResult<()> {
        let device = self
            .client()
            .await?
            .encryption()
            .get_own_device()
            .await
            .map_err(|e| MatrixError::Crypto(e.to_string()))?
            .ok_or_else(|| MatrixError::Crypto("own device not found".to_string()))?;
        device
            .verify()
            .await
            .map_err(|e| MatrixError::Crypto(e.to_string()))
    }

    async fn sign_own_master_key(&self) -> MatrixResult<()> {
        let client = self.client().await?;
        let user_id = client
            .user_id()
            .ok_or_else(|| MatrixError::NoSession("no user id".to_string()))?
            .to_owned();
        let identity = client
            .encryption()
            .get_user_identity(&user_id)
            .await
            .map_err(|e| MatrixError::Crypto(e.to_string()))?
            .ok_or_else(|| MatrixError::Crypto("own cross-signing identity not found".to_string()))?;
        identity
            .verify()
            .await
            .map_err(|e| MatrixError::Crypto(e.to_string()))
    }

    async fn sync(&self, observer: Arc<dyn SyncObserver>) -> MatrixResult<()> {
        let client = self.client().await?;

        let message_observer = Arc::clone(&observer);
        let handle = client.add_event_handler(
            move |event: OriginalSyncRoomMessageEvent, room: Room| {
                let observer = Arc::clone(&message_observer);
                async move {
                    if let Some(message) = convert_message(room.room_id(), &event) {
                        observer.on_room_message(message).await;
                    }
                }
            },
        );

        // Observer error that broke the loop
        let stopped: Arc<StdMutex<Option<MatrixError>>> = Arc::new(StdMutex::new(None));
        let stop_slot = Arc::clone(&stopped);

        info!("sync loop started");
        let result = client
            .sync_with_callback(SyncSettings::default(), move |_response| {
                let observer = Arc::clone(&observer);
                let stop_slot = Arc::clone(&stop_slot);
                async move {
                    match observer.on_sync_response().await {
                        Ok(()) => LoopCtrl::Continue,
                        Err(e) => {
                            if let Ok(mut slot) = stop_slot.lock() {
                                *slot = Some(e);
                            }
                            LoopCtrl::Break
                        }
                    }
                }
            })
            .await;
        client.remove_event_handler(handle);

        let stopped = stopped.lock().ok().and_then(|mut slot| slot.take());
        if let Some(e) = stopped {
            return Err(e);
        }
        result.map_err(|e| MatrixError::Network(e.to_string()))
    }

    async fn send_text(&self, room: &RoomId, body: &str) -> MatrixResult<()> {
        let room_id = SdkRoomId::parse(room.0.as_str())
            .map_err(|e| MatrixError::InvalidId(format!("{}: {}", room, e)))?;
        let joined = self
            .client()
            .await?
            .get_room(&room_id)
            .ok_or_else(|| MatrixError::RoomNotFound(room.to_string()))?;

        joined
            .send(RoomMessageEventContent::text_plain(body))
            .await
            .map_err(|e| MatrixError::Api(e.to_string()))?;
        Ok(())
    }

    fn user_id(&self) -> Option<UserId> {
        self.credentials
            .lock()
            .ok()?
            .as_ref()
            .map(|c| UserId(c.user_id.clone()))
    }
}
