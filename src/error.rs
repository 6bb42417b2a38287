//! Process-level error taxonomy.
//!
//! Everything except `Api` is fatal: it propagates to `main`, which prints it
//! and exits. `Api` comes back to whoever tried to send the message.

use crate::config::ConfigError;
use crate::matrix::traits::MatrixError;
use crate::matrix::verification::VerificationStep;
use crate::persistence::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Credential store error: {0}")]
    Storage(#[from] StoreError),

    #[error("Authentication failed: {0}")]
    Auth(MatrixError),

    #[error("Encryption setup failed: {0}")]
    Encryption(MatrixError),

    #[error("Display name update failed: {0}")]
    DisplayName(MatrixError),

    #[error("Session verification failed while {step}: {source}")]
    Verification {
        step: VerificationStep,
        source: MatrixError,
    },

    #[error("Sync stream terminated: {0}")]
    Transport(MatrixError),

    #[error("Message send failed: {0}")]
    Api(MatrixError),
}

impl BotError {
    /// Whether the process must stop on this error
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BotError::Api(_))
    }
}

impl From<ConfigError> for BotError {
    fn from(err: ConfigError) -> Self {
        BotError::Configuration(err.to_string())
    }
}
