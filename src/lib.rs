//! matrixbot - End-to-End Encrypted Matrix Bot
//!
//! Logs in (or resumes a cached session), opens an encrypted state store,
//! optionally cross-signs itself from a recovery key, and runs a supervised
//! sync loop that hands text messages to an application handler.
//!
//! Key principles:
//! - Credentials are persisted only after encryption is up
//! - Secrets never reach the logs
//! - Transport failures end the process; handler failures do not

pub mod config;
pub mod error;
pub mod identity;
pub mod matrix;
pub mod persistence;
