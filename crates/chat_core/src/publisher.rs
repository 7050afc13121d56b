use chrono::Utc;
use shared::{
    domain::{LocalIdentity, RoomId, UserId},
    protocol::OutboundChatMessage,
};
use tracing::debug;

use crate::{
    connection::{ConnectionManager, ConnectionState},
    error::{ChatError, Result, SendRejection},
    subscriptions::OUTBOUND_MESSAGE_DESTINATION,
};

/// Publishes local messages. Nothing is appended to the transcript here: a
/// sent message shows up once the server echoes it on the room destination.
pub struct OutboundPublisher {
    room_id: RoomId,
    sender_id: UserId,
    sender_name: String,
    destination: String,
}

impl OutboundPublisher {
    pub fn new(room_id: RoomId, identity: &LocalIdentity, name_fallback: &str) -> Self {
        Self {
            room_id,
            sender_id: identity.user_id.clone(),
            sender_name: identity
                .nickname
                .clone()
                .unwrap_or_else(|| name_fallback.to_string()),
            destination: OUTBOUND_MESSAGE_DESTINATION.to_string(),
        }
    }

    pub fn prepare(&self, content: &str) -> Result<OutboundChatMessage> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::Validation(SendRejection::EmptyContent));
        }
        Ok(OutboundChatMessage {
            room_id: self.room_id.clone(),
            sender_id: self.sender_id.clone(),
            sender_name: self.sender_name.clone(),
            content: content.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub async fn send(
        &self,
        connection: &mut ConnectionManager,
        content: &str,
    ) -> Result<OutboundChatMessage> {
        let envelope = self.prepare(content)?;
        if connection.state() != ConnectionState::Connected {
            return Err(ChatError::Validation(SendRejection::NotConnected));
        }
        let body = serde_json::to_string(&envelope)?;
        connection.publish(&self.destination, &[], body).await?;
        debug!(room_id = %self.room_id, "chat: message published");
        Ok(envelope)
    }
}

#[cfg(test)]
#[path = "tests/publisher_tests.rs"]
mod tests;
