//! Matrix Integration Module
//!
//! Session bootstrap, post-connect verification, the supervised sync loop and
//! outbound messaging, all behind the `MatrixClient` trait.

pub mod bootstrap;
pub mod client;
pub mod handlers;
pub mod messenger;
pub mod mock;
pub mod supervisor;
pub mod traits;
pub mod verification;

pub use bootstrap::{AuthPath, BotSession, Bootstrapper};
pub use client::SdkClient;
pub use handlers::PingResponder;
pub use messenger::Messenger;
pub use mock::MockMatrixClient;
pub use supervisor::{
    interrupt_signal, wait_for_shutdown, MessageHandler, ShutdownReason, Supervisor,
};
pub use traits::*;
pub use verification::{verify_session, VerificationGate, VerificationStep};
