use std::sync::Arc;

use async_trait::async_trait;
use shared::{
    domain::{ChatMessage, LocalIdentity, RoomId, UserId},
    protocol::HistoryEntry,
};
use tracing::info;

use crate::error::{ChatError, Result};

#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Raw transcript of a room. A denied room is [`ChatError::Authorization`].
    async fn fetch_history(
        &self,
        room_id: &RoomId,
        auth_token: Option<&str>,
    ) -> Result<Vec<HistoryEntry>>;
}

pub struct MissingHistorySource;

#[async_trait]
impl HistorySource for MissingHistorySource {
    async fn fetch_history(
        &self,
        room_id: &RoomId,
        _auth_token: Option<&str>,
    ) -> Result<Vec<HistoryEntry>> {
        Err(ChatError::Transport(format!(
            "history backend unavailable for room {room_id}"
        )))
    }
}

#[derive(Debug, Clone)]
pub struct LoadedHistory {
    pub messages: Vec<ChatMessage>,
    /// First sender that is not the local user; empty when there is none.
    pub counterpart_id: UserId,
}

pub struct HistoryLoader {
    source: Arc<dyn HistorySource>,
    local_name_fallback: String,
    counterpart_placeholder: String,
}

impl HistoryLoader {
    pub fn new(
        source: Arc<dyn HistorySource>,
        local_name_fallback: impl Into<String>,
        counterpart_placeholder: impl Into<String>,
    ) -> Self {
        Self {
            source,
            local_name_fallback: local_name_fallback.into(),
            counterpart_placeholder: counterpart_placeholder.into(),
        }
    }

    pub async fn load(&self, room_id: &RoomId, identity: &LocalIdentity) -> Result<LoadedHistory> {
        let entries = self
            .source
            .fetch_history(room_id, identity.auth_token.as_deref())
            .await?;

        let local_name = identity
            .nickname
            .clone()
            .unwrap_or_else(|| self.local_name_fallback.clone());
        let mut counterpart_id = UserId::default();
        let messages: Vec<ChatMessage> = entries
            .into_iter()
            .map(|entry| {
                let sender = entry.sender();
                if sender == identity.user_id {
                    return entry.into_message(local_name.clone());
                }
                if counterpart_id.is_empty() {
                    counterpart_id = sender;
                }
                entry.into_message(self.counterpart_placeholder.clone())
            })
            .collect();

        info!(
            room_id = %room_id,
            messages = messages.len(),
            counterpart_id = %counterpart_id,
            "chat: history loaded"
        );
        Ok(LoadedHistory {
            messages,
            counterpart_id,
        })
    }
}

#[cfg(test)]
#[path = "tests/history_tests.rs"]
mod tests;
