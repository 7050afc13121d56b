use std::sync::Arc;

use async_trait::async_trait;
use shared::domain::UserId;
use tracing::{debug, warn};

use crate::error::{ChatError, Result};

#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch_nickname(&self, user_id: &UserId, auth_token: Option<&str>)
        -> Result<Option<String>>;
}

pub struct MissingProfileSource;

#[async_trait]
impl ProfileSource for MissingProfileSource {
    async fn fetch_nickname(
        &self,
        user_id: &UserId,
        _auth_token: Option<&str>,
    ) -> Result<Option<String>> {
        Err(ChatError::Transport(format!(
            "profile backend unavailable for user {user_id}"
        )))
    }
}

/// Best-effort display names: every failure degrades to the placeholder.
pub struct ProfileResolver {
    source: Arc<dyn ProfileSource>,
    placeholder: String,
}

impl ProfileResolver {
    pub fn new(source: Arc<dyn ProfileSource>, placeholder: impl Into<String>) -> Self {
        Self {
            source,
            placeholder: placeholder.into(),
        }
    }

    pub async fn resolve(&self, user_id: &UserId, auth_token: Option<&str>) -> String {
        match self.source.fetch_nickname(user_id, auth_token).await {
            Ok(Some(nickname)) if !nickname.trim().is_empty() => {
                debug!(user_id = %user_id, %nickname, "chat: counterpart profile resolved");
                nickname
            }
            Ok(_) => {
                debug!(user_id = %user_id, "chat: profile has no nickname, using placeholder");
                self.placeholder.clone()
            }
            Err(err) => {
                warn!(user_id = %user_id, %err, "chat: profile lookup failed, using placeholder");
                self.placeholder.clone()
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/profile_tests.rs"]
mod tests;
