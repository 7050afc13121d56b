use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, RequestBuilder, StatusCode};
use serde_json::Value;
use shared::{
    domain::{RoomId, UserId},
    protocol::{ApiEnvelope, HistoryEntry, ProfileResponse},
};
use tracing::warn;
use url::Url;

use crate::{
    error::{ChatError, Result},
    history::HistorySource,
    profile::ProfileSource,
};

/// REST backend for the two one-shot calls a session makes before going live.
#[derive(Debug, Clone)]
pub struct RestApi {
    http: Client,
    base_url: Url,
}

impl RestApi {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|err| ChatError::Config(format!("api_base_url: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ChatError::Config(format!(
                "api_base_url cannot carry path segments: {base_url}"
            )));
        }
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn get(&self, url: Url, auth_token: Option<&str>) -> RequestBuilder {
        let request = self
            .http
            .get(url)
            .header(CONTENT_TYPE, "application/json");
        match auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl HistorySource for RestApi {
    async fn fetch_history(
        &self,
        room_id: &RoomId,
        auth_token: Option<&str>,
    ) -> Result<Vec<HistoryEntry>> {
        let url = self.endpoint(&["chat", "room", room_id.as_str(), "messages"]);
        let res = self.get(url, auth_token).send().await?;

        let status = res.status();
        if status == StatusCode::FORBIDDEN {
            return Err(ChatError::Authorization {
                room_id: room_id.clone(),
            });
        }
        if !status.is_success() {
            return Err(ChatError::Transport(format!(
                "history request for room {room_id} failed with status {status}"
            )));
        }

        let envelope: ApiEnvelope = res.json().await?;
        let Value::Array(items) = envelope.data else {
            return Ok(Vec::new());
        };
        Ok(items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<HistoryEntry>(item) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(room_id = %room_id, %err, "chat: skipping malformed history entry");
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl ProfileSource for RestApi {
    async fn fetch_nickname(
        &self,
        user_id: &UserId,
        auth_token: Option<&str>,
    ) -> Result<Option<String>> {
        let url = self.endpoint(&["user", user_id.as_str()]);
        let res = self.get(url, auth_token).send().await?.error_for_status()?;
        let body: ProfileResponse = res.json().await?;
        Ok(body.data.and_then(|data| data.nickname))
    }
}

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
