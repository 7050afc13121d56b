use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{ChatMessage, MessageId, RoomId, UserId};

/// Identifiers arrive as JSON strings from some endpoints and as numbers from others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LooseId {
    Text(String),
    Number(serde_json::Number),
}

impl LooseId {
    pub fn into_string(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Number(number) => number.to_string(),
        }
    }
}

/// Common `{ "data": ... }` wrapper used by every REST response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiEnvelope {
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(default)]
    pub id: Option<LooseId>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub sender_id: Option<LooseId>,
    #[serde(default)]
    pub created_at: Option<Value>,
    // The backend has shipped this key misspelled; it wins when both are present.
    #[serde(default, rename = "craetedAt")]
    pub craeted_at: Option<Value>,
    #[serde(default)]
    pub is_read: Option<bool>,
}

impl HistoryEntry {
    pub fn sender(&self) -> UserId {
        UserId(
            self.sender_id
                .clone()
                .map(LooseId::into_string)
                .unwrap_or_default(),
        )
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.craeted_at
            .as_ref()
            .and_then(parse_timestamp)
            .or_else(|| self.created_at.as_ref().and_then(parse_timestamp))
    }

    /// Builds a transcript entry; `sender_name` is provisional until the profile lookup runs.
    pub fn into_message(self, sender_name: String) -> ChatMessage {
        let sender_id = self.sender();
        let timestamp = self.timestamp().unwrap_or_else(Utc::now);
        ChatMessage {
            id: self
                .id
                .map(|id| MessageId(id.into_string()))
                .unwrap_or_else(MessageId::generate),
            content: self.content.unwrap_or_default(),
            sender_id,
            sender_name,
            timestamp,
            read: self.is_read.unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileData {
    #[serde(default)]
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileResponse {
    #[serde(default)]
    pub data: Option<ProfileData>,
}

/// Payload delivered on the room's inbound message destination.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundChatMessage {
    #[serde(default)]
    pub id: Option<LooseId>,
    pub content: String,
    pub sender_id: LooseId,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub is_read: Option<bool>,
}

impl InboundChatMessage {
    /// Live messages always start unread, whatever the wire says.
    pub fn into_message(self) -> ChatMessage {
        ChatMessage {
            id: self
                .id
                .map(|id| MessageId(id.into_string()))
                .unwrap_or_else(MessageId::generate),
            content: self.content,
            sender_id: UserId(self.sender_id.into_string()),
            sender_name: self.sender_name.unwrap_or_default(),
            timestamp: self
                .timestamp
                .as_ref()
                .and_then(parse_timestamp)
                .unwrap_or_else(Utc::now),
            read: false,
        }
    }
}

/// Envelope published to the outbound message destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundChatMessage {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Accepts RFC 3339 strings, zone-less ISO strings (taken as UTC), epoch
/// milliseconds, and `[y, m, d, h, mi, s, nanos]` arrays.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => {
            let raw = raw.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
                return Some(parsed.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        Value::Number(number) => number
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        Value::Array(parts) => {
            let parts: Vec<i64> = parts.iter().filter_map(Value::as_i64).collect();
            let part = |index: usize| parts.get(index).copied().unwrap_or(0);
            if parts.len() < 3 {
                return None;
            }
            let year = i32::try_from(part(0)).ok()?;
            let field = |index: usize| u32::try_from(part(index)).ok();
            let date = NaiveDate::from_ymd_opt(year, field(1)?, field(2)?)?;
            let naive = date.and_hms_nano_opt(field(3)?, field(4)?, field(5)?, field(6)?)?;
            Some(Utc.from_utc_datetime(&naive))
        }
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
