use std::collections::HashSet;

use shared::domain::{ChatMessage, MessageId, UserId};

/// Ordered transcript of the active room.
///
/// Owned by the session's dispatch task; readers get copies through
/// [`MessageStore::snapshot`].
#[derive(Debug, Clone)]
pub struct MessageStore {
    local_user_id: UserId,
    messages: Vec<ChatMessage>,
    ids: HashSet<MessageId>,
}

impl MessageStore {
    pub fn new(local_user_id: UserId) -> Self {
        Self {
            local_user_id,
            messages: Vec::new(),
            ids: HashSet::new(),
        }
    }

    pub fn local_user_id(&self) -> &UserId {
        &self.local_user_id
    }

    /// Appends unless the id is already present. Returns whether the log grew.
    pub fn append(&mut self, message: ChatMessage) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        true
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = ChatMessage>) -> usize {
        messages
            .into_iter()
            .map(|message| self.append(message))
            .filter(|appended| *appended)
            .count()
    }

    /// Flags every locally-authored message as read. Returns how many flipped.
    pub fn mark_own_as_read(&mut self) -> usize {
        let mut flipped = 0;
        for message in &mut self.messages {
            if message.sender_id == self.local_user_id && !message.read {
                message.read = true;
                flipped += 1;
            }
        }
        flipped
    }

    pub fn rename_sender(&mut self, sender_id: &UserId, sender_name: &str) -> usize {
        let mut renamed = 0;
        for message in &mut self.messages {
            if &message.sender_id == sender_id && message.sender_name != sender_name {
                message.sender_name = sender_name.to_string();
                renamed += 1;
            }
        }
        renamed
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
