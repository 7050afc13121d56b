use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::stomp::Frame;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};
use url::Url;

use crate::{
    connection::{Connector, FrameTransport},
    error::{ChatError, Result},
};

/// Opens STOMP-over-WebSocket links with `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint: &Url) -> Result<Box<dyn FrameTransport>> {
        let (stream, _) = connect_async(endpoint.as_str()).await.map_err(|err| {
            ChatError::Transport(format!("failed to connect websocket {endpoint}: {err}"))
        })?;
        debug!(%endpoint, "chat: websocket opened");
        Ok(Box::new(WebSocketTransport { stream }))
    }
}

pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameTransport for WebSocketTransport {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.stream.send(Message::Text(frame.encode())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        loop {
            let text = match self.stream.next().await? {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(%err, "chat: skipping non-UTF-8 binary frame");
                        continue;
                    }
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(err) => return Some(Err(err.into())),
            };
            match Frame::decode(&text) {
                Ok(Some(frame)) => {
                    debug!(
                        command = %frame.command,
                        destination = ?frame.destination(),
                        "chat: frame in"
                    );
                    return Some(Ok(frame));
                }
                Ok(None) => continue,
                Err(err) => warn!(%err, "chat: skipping undecodable STOMP frame"),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
