use shared::{
    domain::{ChatMessage, RoomId},
    protocol::InboundChatMessage,
    stomp::{Command, Frame},
};
use tracing::{debug, info, warn};

use crate::{connection::ConnectionManager, error::Result};

pub const MESSAGE_DESTINATION: &str = "/sub/chat/{room_id}";
pub const OUTBOUND_MESSAGE_DESTINATION: &str = "/pub/api/v1/chat/message";
pub const READ_ACK_DESTINATION: &str = "/pub/api/v1/chat/read/{room_id}";

/// The server has not pinned down where read events go; listen on every
/// plausible name until it does.
pub const DEFAULT_READ_RECEIPT_DESTINATIONS: [&str; 6] = [
    "/sub/chat/{room_id}/read",
    "/sub/api/v1/chat/{room_id}/read",
    "/sub/chat/read/{room_id}",
    "/sub/api/v1/chat/read/{room_id}",
    "/topic/chat/{room_id}/read",
    "/queue/chat/{room_id}/read",
];

pub fn room_destination(template: &str, room_id: &RoomId) -> String {
    template.replace("{room_id}", room_id.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Messages,
    ReadReceipt { candidate: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub destination: String,
    pub route: Route,
}

/// A routed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(ChatMessage),
    /// Any frame on a receipt destination, and any unparseable frame.
    ReadSignal { route: Route, parsed: bool },
}

pub struct SubscriptionRegistry {
    room_id: RoomId,
    message_destination: String,
    receipt_destinations: Vec<String>,
    active: Vec<Subscription>,
    next_id: u64,
}

impl SubscriptionRegistry {
    pub fn new(room_id: RoomId, receipt_templates: &[String]) -> Self {
        let message_destination = room_destination(MESSAGE_DESTINATION, &room_id);
        let mut receipt_destinations: Vec<String> = Vec::with_capacity(receipt_templates.len());
        for template in receipt_templates {
            let destination = room_destination(template, &room_id);
            if destination != message_destination && !receipt_destinations.contains(&destination) {
                receipt_destinations.push(destination);
            }
        }
        Self {
            room_id,
            message_destination,
            receipt_destinations,
            active: Vec::new(),
            next_id: 0,
        }
    }

    pub fn message_destination(&self) -> &str {
        &self.message_destination
    }

    pub fn receipt_destinations(&self) -> &[String] {
        &self.receipt_destinations
    }

    pub fn active(&self) -> &[Subscription] {
        &self.active
    }

    /// Subscribes the room's destinations on a freshly established connection.
    /// Subscriptions of a previous connection are forgotten first.
    pub async fn on_connected(&mut self, connection: &mut ConnectionManager) -> Result<usize> {
        self.active.clear();

        let mut wanted = vec![(self.message_destination.clone(), Route::Messages)];
        wanted.extend(
            self.receipt_destinations
                .iter()
                .enumerate()
                .map(|(candidate, destination)| {
                    (destination.clone(), Route::ReadReceipt { candidate })
                }),
        );

        for (destination, route) in wanted {
            let id = format!("sub-{}", self.next_id);
            self.next_id += 1;
            connection
                .send_frame(
                    Frame::new(Command::Subscribe)
                        .header("id", id.as_str())
                        .header("destination", destination.as_str()),
                )
                .await?;
            self.active.push(Subscription {
                id,
                destination,
                route,
            });
        }

        info!(
            room_id = %self.room_id,
            subscriptions = self.active.len(),
            "chat: subscribed room destinations"
        );
        Ok(self.active.len())
    }

    /// Best-effort UNSUBSCRIBE of everything; the registry is empty afterwards.
    pub async fn release_all(&mut self, connection: &mut ConnectionManager) {
        for subscription in self.active.drain(..) {
            let frame = Frame::new(Command::Unsubscribe).header("id", subscription.id.as_str());
            if let Err(err) = connection.send_frame(frame).await {
                debug!(id = %subscription.id, %err, "chat: unsubscribe skipped");
            }
        }
    }

    /// Routes by `subscription` header, falling back to `destination`.
    pub fn route(&self, frame: &Frame) -> Option<Route> {
        if frame.command != Command::Message {
            return None;
        }
        if let Some(id) = frame.get("subscription") {
            if let Some(found) = self.active.iter().find(|sub| sub.id == id) {
                return Some(found.route);
            }
        }
        let destination = frame.destination()?;
        self.active
            .iter()
            .find(|sub| sub.destination == destination)
            .map(|sub| sub.route)
    }

    /// Parse failures are never dropped: they become read signals.
    pub fn classify(&self, frame: &Frame) -> Option<Inbound> {
        let route = self.route(frame)?;
        match route {
            Route::Messages => match serde_json::from_str::<InboundChatMessage>(&frame.body) {
                Ok(inbound) => Some(Inbound::Message(inbound.into_message())),
                Err(err) => {
                    warn!(
                        room_id = %self.room_id,
                        %err,
                        "chat: unparseable message frame, treating as read signal"
                    );
                    Some(Inbound::ReadSignal {
                        route,
                        parsed: false,
                    })
                }
            },
            Route::ReadReceipt { candidate } => {
                let parsed = serde_json::from_str::<serde_json::Value>(&frame.body).is_ok();
                if !parsed {
                    warn!(
                        room_id = %self.room_id,
                        candidate,
                        "chat: unparseable read receipt, applying anyway"
                    );
                }
                Some(Inbound::ReadSignal { route, parsed })
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/subscriptions_tests.rs"]
mod tests;
