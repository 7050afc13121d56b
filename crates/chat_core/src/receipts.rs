use shared::domain::{ChatMessage, RoomId, UserId};
use tracing::debug;

use crate::{
    connection::ConnectionManager,
    error::Result,
    store::MessageStore,
    subscriptions::{room_destination, READ_ACK_DESTINATION},
};

/// Read-state reconciliation between the two participants.
///
/// Acknowledgments are room-wide: any read signal means "the counterpart has
/// seen everything I sent so far"; nothing is correlated per message id.
pub struct ReadReceiptReconciler {
    room_id: RoomId,
    local_user_id: UserId,
    ack_destination: String,
}

impl ReadReceiptReconciler {
    pub fn new(room_id: RoomId, local_user_id: UserId) -> Self {
        let ack_destination = room_destination(READ_ACK_DESTINATION, &room_id);
        Self {
            room_id,
            local_user_id,
            ack_destination,
        }
    }

    pub fn ack_destination(&self) -> &str {
        &self.ack_destination
    }

    pub fn is_from_counterpart(&self, message: &ChatMessage) -> bool {
        message.sender_id != self.local_user_id
    }

    pub async fn acknowledge(&self, connection: &mut ConnectionManager) -> Result<()> {
        connection
            .publish(
                &self.ack_destination,
                &[("userId", self.local_user_id.as_str())],
                "{}",
            )
            .await?;
        debug!(room_id = %self.room_id, "chat: read acknowledgment sent");
        Ok(())
    }

    /// Acks a counterpart message. Returns whether an ack went out.
    pub async fn on_message(
        &self,
        message: &ChatMessage,
        connection: &mut ConnectionManager,
    ) -> Result<bool> {
        if !self.is_from_counterpart(message) {
            return Ok(false);
        }
        self.acknowledge(connection).await?;
        Ok(true)
    }

    pub fn on_read_signal(&self, store: &mut MessageStore) -> usize {
        let flipped = store.mark_own_as_read();
        if flipped > 0 {
            debug!(room_id = %self.room_id, flipped, "chat: own messages marked read");
        }
        flipped
    }
}

#[cfg(test)]
#[path = "tests/receipts_tests.rs"]
mod tests;
