//! Credential store contract and the in-memory implementation.

use crate::identity::{Identity, PickleKey, SessionCredentials};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Credential store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt credential record: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Raw credential row as persisted.
///
/// Fields may be empty when the row was written by an older or interrupted
/// run; `credentials()` filters those out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub access_token: String,
    pub user_id: String,
    pub device_id: String,
    pub pickle_key: Option<PickleKey>,
}

impl CredentialRecord {
    /// Usable session credentials, or `None` for a partial record
    pub fn credentials(&self) -> Option<SessionCredentials> {
        let creds = SessionCredentials::new(
            self.access_token.clone(),
            self.user_id.clone(),
            self.device_id.clone(),
        );
        creds.is_complete().then_some(creds)
    }

    /// The full identity: complete credentials plus a stored pickle key
    pub fn identity(&self) -> Option<Identity> {
        Identity::new(self.credentials()?, self.pickle_key.clone()?)
    }
}

impl From<&Identity> for CredentialRecord {
    fn from(identity: &Identity) -> Self {
        let creds = identity.credentials();
        Self {
            access_token: creds.access_token.clone(),
            user_id: creds.user_id.clone(),
            device_id: creds.device_id.clone(),
            pickle_key: Some(identity.pickle_key().clone()),
        }
    }
}

/// Durable single-record credential storage.
///
/// At most one record exists. `save` must be atomic: a reader observes either
/// the full new record or whatever was there before.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the stored record, `None` on first run
    async fn load(&self) -> Result<Option<CredentialRecord>, StoreError>;

    /// Persist the identity, replacing any partial record
    async fn save(&self, identity: &Identity) -> Result<(), StoreError>;
}

/// In-memory credential store with fault injection.
///
/// Clones share state, so a test can keep a handle while the bootstrapper
/// owns another.
#[derive(Clone, Default)]
pub struct MemoryCredentialStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    record: Option<CredentialRecord>,
    saves: usize,
    fail_load: bool,
    fail_save: bool,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing record (complete or partial)
    pub fn with_record(record: CredentialRecord) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().record = Some(record);
        store
    }

    /// Make subsequent `load` calls fail
    pub fn fail_loads(&self) {
        self.state.lock().unwrap().fail_load = true;
    }

    /// Make subsequent `save` calls fail
    pub fn fail_saves(&self) {
        self.state.lock().unwrap().fail_save = true;
    }

    /// Number of successful `save` calls
    pub fn save_count(&self) -> usize {
        self.state.lock().unwrap().saves
    }

    /// Current record, for assertions
    pub fn record(&self) -> Option<CredentialRecord> {
        self.state.lock().unwrap().record.clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<CredentialRecord>, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_load {
            return Err(StoreError::Unavailable("load disabled".to_string()));
        }
        Ok(state.record.clone())
    }

    async fn save(&self, identity: &Identity) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_save {
            return Err(StoreError::Unavailable("save disabled".to_string()));
        }
        state.record = Some(CredentialRecord::from(identity));
        state.saves += 1;
        Ok(())
    }
}
