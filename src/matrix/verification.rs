//! One-time session verification with a recovery key.
//!
//! Unlocks secret storage, imports the private cross-signing keys, then
//! cross-signs this device and the account's master key. Trust is binary: the
//! first failing step aborts the whole procedure.

use super::traits::{MatrixClient, MatrixError};
use crate::error::BotError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Steps of recovery-key verification, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStep {
    FetchDefaultKey,
    ValidateRecoveryKey,
    ImportCrossSigningKeys,
    SignOwnDevice,
    SignOwnMasterKey,
}

impl fmt::Display for VerificationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            VerificationStep::FetchDefaultKey => "fetching the default secret storage key",
            VerificationStep::ValidateRecoveryKey => "validating the recovery key",
            VerificationStep::ImportCrossSigningKeys => "importing cross-signing keys",
            VerificationStep::SignOwnDevice => "signing own device",
            VerificationStep::SignOwnMasterKey => "signing own master key",
        };
        f.write_str(text)
    }
}

/// Verify this device using `recovery_key`
pub async fn verify_session<C: MatrixClient>(
    client: &C,
    recovery_key: &str,
) -> Result<(), BotError> {
    let fail =
        |step: VerificationStep| move |source: MatrixError| BotError::Verification { step, source };

    let key_id = client
        .default_secret_storage_key()
        .await
        .map_err(fail(VerificationStep::FetchDefaultKey))?;

    client
        .unlock_secret_storage(&key_id, recovery_key)
        .await
        .map_err(fail(VerificationStep::ValidateRecoveryKey))?;

    client
        .import_cross_signing_keys()
        .await
        .map_err(fail(VerificationStep::ImportCrossSigningKeys))?;

    client
        .sign_own_device()
        .await
        .map_err(fail(VerificationStep::SignOwnDevice))?;

    client
        .sign_own_master_key()
        .await
        .map_err(fail(VerificationStep::SignOwnMasterKey))?;

    info!(key_id = %key_id, "session verified with recovery key");
    Ok(())
}

/// Single-fire latch guarding post-connect verification.
///
/// `try_fire` returns true exactly once over the latch's lifetime, no matter
/// how many sync responses call it.
#[derive(Debug, Default)]
pub struct VerificationGate {
    fired: AtomicBool,
}

impl VerificationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_fire(&self) -> bool {
        !self.fired.swap(true, Ordering::AcqRel)
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}
