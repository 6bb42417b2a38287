//! Persistence for the bot's long-lived identity.
//!
//! A single credential record (access token, user id, device id, pickle key)
//! survives restarts so the bot resumes its device instead of logging in again.
//! The SDK keeps its own encrypted state store; this module never touches it.

pub mod credentials;
pub mod sqlite;

pub use credentials::{CredentialRecord, CredentialStore, MemoryCredentialStore, StoreError};
pub use sqlite::SqliteCredentialStore;
