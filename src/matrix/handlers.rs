//! Built-in message handlers

use super::messenger::Messenger;
use super::supervisor::MessageHandler;
use super::traits::{IncomingMessage, MatrixClient};
use crate::error::BotError;
use async_trait::async_trait;
use tracing::debug;

pub const PING_COMMAND: &str = "!ping";
pub const PONG_REPLY: &str = "pong";

/// Answers `!ping` with `pong` in the same room. Ignores the bot's own messages.
pub struct PingResponder;

#[async_trait]
impl<C: MatrixClient> MessageHandler<C> for PingResponder {
    async fn on_message(
        &self,
        messenger: &Messenger<C>,
        message: &IncomingMessage,
    ) -> Result<(), BotError> {
        if messenger.is_own_message(message) || message.body.trim() != PING_COMMAND {
            return Ok(());
        }

        debug!(room = %message.room, sender = %message.sender, "answering ping");
        messenger.reply(message, PONG_REPLY).await
    }
}
