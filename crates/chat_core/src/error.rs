use shared::{domain::RoomId, stomp::FrameError};
use thiserror::Error;

/// Why a send request never reached the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRejection {
    EmptyContent,
    NotConnected,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("access to room {room_id} was denied")]
    Authorization { room_id: RoomId },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("malformed payload: {0}")]
    Parse(String),
    #[error("send rejected: {0:?}")]
    Validation(SendRejection),
    #[error("connection is not established")]
    NotConnected,
    #[error("chat session has been closed")]
    SessionClosed,
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ChatError {
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization { .. })
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(format!("websocket: {value}"))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value.to_string())
    }
}

impl From<FrameError> for ChatError {
    fn from(value: FrameError) -> Self {
        Self::Parse(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
