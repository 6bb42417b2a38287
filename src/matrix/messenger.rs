//! Outbound messaging for application handlers.
//!
//! One plain-text send per call. No retry, batching or rate limiting; a
//! rejected send comes back as `BotError::Api` and never stops the bot.

use super::traits::{IncomingMessage, MatrixClient, MatrixError, RoomId, UserId};
use crate::error::BotError;
use tracing::warn;

#[derive(Clone)]
pub struct Messenger<C: MatrixClient> {
    client: C,
}

impl<C: MatrixClient> Messenger<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Send `text` as an `m.text` message to `room`
    pub async fn send_text(&self, room: &RoomId, text: &str) -> Result<(), BotError> {
        if room.0.is_empty() {
            return Err(BotError::Api(MatrixError::InvalidId(
                "empty room id".to_string(),
            )));
        }

        self.client.send_text(room, text).await.map_err(|e| {
            warn!(room = %room, error = %e, "message send failed");
            BotError::Api(e)
        })
    }

    /// Send `text` to the room `message` came from
    pub async fn reply(&self, message: &IncomingMessage, text: &str) -> Result<(), BotError> {
        self.send_text(&message.room, text).await
    }

    pub fn own_user_id(&self) -> Option<UserId> {
        self.client.user_id()
    }

    /// True if the bot itself sent `message`
    pub fn is_own_message(&self, message: &IncomingMessage) -> bool {
        self.client.user_id().as_ref() == Some(&message.sender)
    }
}
