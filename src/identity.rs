//! Bot identity: the session triple issued by the homeserver and the pickle key
//! that protects the SDK's local encryption store.
//!
//! # Security Properties
//!
//! - **Completeness**: a session is usable only when access token, user id and
//!   device id are all non-empty. Partial sessions force a fresh login.
//! - **Zeroization**: `PickleKey` clears its bytes on drop.
//! - **No leakage**: `Debug` output never includes the access token or key bytes.

use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the encryption store pickle key in bytes
pub const PICKLE_KEY_LEN: usize = 32;

/// 32-byte secret used to encrypt the SDK's state store at rest
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PickleKey([u8; PICKLE_KEY_LEN]);

impl PickleKey {
    /// Generate a fresh key from the operating system RNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; PICKLE_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; PICKLE_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a key from a stored blob.
    ///
    /// Returns `None` unless the slice is exactly `PICKLE_KEY_LEN` bytes; a
    /// truncated key is never padded or reused.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; PICKLE_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; PICKLE_KEY_LEN] {
        &self.0
    }

    /// Hex encoding handed to the SDK as the state store passphrase
    pub fn to_passphrase(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PickleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PickleKey(<redacted>)")
    }
}

/// Access token, user id and device id for one logged-in device
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    pub access_token: String,
    pub user_id: String,
    pub device_id: String,
}

impl SessionCredentials {
    pub fn new(
        access_token: impl Into<String>,
        user_id: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            user_id: user_id.into(),
            device_id: device_id.into(),
        }
    }

    /// True only when all three fields are non-empty
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.user_id.is_empty() && !self.device_id.is_empty()
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("access_token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// A complete, established bot identity
///
/// Built once per process, either from the credential store or from a fresh
/// login plus a resolved pickle key. Never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Identity {
    credentials: SessionCredentials,
    pickle_key: PickleKey,
}

impl Identity {
    /// Returns `None` if the credentials are incomplete
    pub fn new(credentials: SessionCredentials, pickle_key: PickleKey) -> Option<Self> {
        if !credentials.is_complete() {
            return None;
        }
        Some(Self {
            credentials,
            pickle_key,
        })
    }

    pub fn credentials(&self) -> &SessionCredentials {
        &self.credentials
    }

    pub fn pickle_key(&self) -> &PickleKey {
        &self.pickle_key
    }

    pub fn user_id(&self) -> &str {
        &self.credentials.user_id
    }

    pub fn device_id(&self) -> &str {
        &self.credentials.device_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_generated_keys_are_32_bytes() {
        let key = PickleKey::generate();
        assert_eq!(key.as_bytes().len(), PICKLE_KEY_LEN);
    }

    #[test]
    fn test_generated_keys_differ() {
        let keys: Vec<PickleKey> = (0..64).map(|_| PickleKey::generate()).collect();
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b, "independent generations must not collide");
            }
        }
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert!(PickleKey::from_slice(&[7u8; 31]).is_none());
        assert!(PickleKey::from_slice(&[7u8; 33]).is_none());
        assert!(PickleKey::from_slice(&[]).is_none());

        let key = PickleKey::from_slice(&[7u8; 32]).unwrap();
        assert_eq!(key.as_bytes(), &[7u8; 32]);
    }

    #[test]
    fn test_passphrase_is_hex() {
        let key = PickleKey::from_bytes([0xab; 32]);
        let passphrase = key.to_passphrase();
        assert_eq!(passphrase.len(), 64);
        assert!(passphrase.chars().all(|c| c == 'a' || c == 'b'));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = SessionCredentials::new("syt_secret_token", "@bot:example.org", "DEV");
        let identity = Identity::new(creds, PickleKey::from_bytes([0x42; 32])).unwrap();

        let rendered = format!("{:?}", identity);
        assert!(!rendered.contains("syt_secret_token"));
        assert!(!rendered.contains("4242"));
        assert!(rendered.contains("@bot:example.org"));
    }

    #[test]
    fn test_identity_requires_complete_credentials() {
        let key = PickleKey::generate();
        assert!(Identity::new(SessionCredentials::new("", "@bot:example.org", "DEV"), key.clone()).is_none());
        assert!(Identity::new(SessionCredentials::new("tok", "", "DEV"), key.clone()).is_none());
        assert!(Identity::new(SessionCredentials::new("tok", "@bot:example.org", ""), key.clone()).is_none());
        assert!(Identity::new(SessionCredentials::new("tok", "@bot:example.org", "DEV"), key).is_some());
    }

    proptest! {
        #[test]
        fn prop_completeness_requires_every_field(
            token in "[a-zA-Z0-9_]{0,8}",
            user in "[a-z@:.]{0,8}",
            device in "[A-Z]{0,8}",
        ) {
            let creds = SessionCredentials::new(token.clone(), user.clone(), device.clone());
            let expected = !token.is_empty() && !user.is_empty() && !device.is_empty();
            prop_assert_eq!(creds.is_complete(), expected);
        }
    }
}
