//! Session bootstrap
//!
//! Single pass per process:
//! 1. Load the credential record; a complete identity with its pickle key
//!    resumes, anything else (no record, partial record, missing key) falls
//!    through to password login
//! 2. Validate that the identity triple is complete
//! 3. Resolve the pickle key: the stored one on resume, a fresh one for a new
//!    device
//! 4. Initialize encryption, then sync the display name
//! 5. Persist the identity, strictly after encryption succeeded
//!
//! Recovery-key verification needs a sync cursor, so it is deferred to the
//! supervisor's first sync response.

use super::traits::MatrixClient;
use crate::config::BotConfig;
use crate::error::BotError;
use crate::identity::{Identity, PickleKey, SessionCredentials};
use crate::persistence::CredentialStore;
use tracing::{info, warn};

/// How the session was established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPath {
    /// Resumed from the credential store
    Resumed,
    /// Fresh password login
    LoggedIn,
}

/// A live, encryption-capable session ready to be handed to the supervisor
pub struct BotSession<C: MatrixClient> {
    pub client: C,
    pub identity: Identity,
    pub auth_path: AuthPath,
    /// Whether this bootstrap wrote the credential record
    pub persisted: bool,
    pub recovery_key: Option<String>,
}

/// Drives the startup state machine
pub struct Bootstrapper<'a, C: MatrixClient, S: CredentialStore> {
    client: C,
    store: &'a S,
    config: &'a BotConfig,
}

impl<'a, C: MatrixClient, S: CredentialStore> Bootstrapper<'a, C, S> {
    pub fn new(client: C, store: &'a S, config: &'a BotConfig) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    /// Run the bootstrap. Every error returned here is fatal.
    pub async fn bootstrap(self) -> Result<BotSession<C>, BotError> {
        let record = self.store.load().await?;

        let stored = record.as_ref().and_then(|r| r.identity());

        let (credentials, pickle_key, auth_path) = match stored {
            Some(stored) => {
                info!(
                    user_id = %stored.user_id(),
                    device_id = %stored.device_id(),
                    "resuming stored session"
                );
                self.client
                    .resume_session(stored.credentials())
                    .await
                    .map_err(BotError::Auth)?;
                (
                    stored.credentials().clone(),
                    stored.pickle_key().clone(),
                    AuthPath::Resumed,
                )
            }
            None => {
                if record.is_some() {
                    warn!("stored credential record is incomplete or has no pickle key, logging in again");
                }
                let credentials = self.login().await?;
                // A new device gets a new state store, so never an older key
                info!("generating a pickle key for the new device");
                (credentials, PickleKey::generate(), AuthPath::LoggedIn)
            }
        };

        if !credentials.is_complete() {
            return Err(unusable_credentials());
        }

        self.client
            .init_encryption(&pickle_key)
            .await
            .map_err(BotError::Encryption)?;
        info!("encryption initialized");

        self.client
            .set_display_name(&self.config.display_name)
            .await
            .map_err(BotError::DisplayName)?;

        let identity = Identity::new(credentials, pickle_key).ok_or_else(unusable_credentials)?;

        let should_persist = auth_path == AuthPath::LoggedIn;
        if should_persist {
            self.store.save(&identity).await?;
            info!(
                user_id = %identity.user_id(),
                device_id = %identity.device_id(),
                "credentials persisted"
            );
        }

        if self.config.recovery_key.is_some() {
            info!("session verification deferred until the first sync response");
        }

        Ok(BotSession {
            client: self.client,
            identity,
            auth_path,
            persisted: should_persist,
            recovery_key: self.config.recovery_key.clone(),
        })
    }

    async fn login(&self) -> Result<SessionCredentials, BotError> {
        if self.config.username.is_empty() || self.config.password.is_empty() {
            return Err(unusable_credentials());
        }

        info!(
            homeserver = %self.config.homeserver,
            username = %self.config.username,
            "logging in with password"
        );
        let credentials = self
            .client
            .login(
                &self.config.username,
                &self.config.password,
                &self.config.display_name,
            )
            .await
            .map_err(BotError::Auth)?;
        info!(
            user_id = %credentials.user_id,
            device_id = %credentials.device_id,
            "logged in"
        );
        Ok(credentials)
    }
}

fn unusable_credentials() -> BotError {
    BotError::Configuration(
        "neither a stored identity nor username/password credentials were usable".to_string(),
    )
}
