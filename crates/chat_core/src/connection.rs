use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use shared::{
    domain::RoomId,
    stomp::{Command, Frame},
};
use tokio::{sync::watch, time::Instant};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{ChatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Authorizing,
    Connected,
    Disconnected,
    Failed,
}

/// Capped exponential backoff applied to consecutive connection failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    /// Consecutive failures after which the connection is `Failed`. A link
    /// lost before it proved stable counts as a failure too.
    pub max_attempts: u32,
    /// Uptime after which a link counts as stable even without traffic.
    pub stable_after: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2,
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            stable_after: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(retry);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// A live, frame-oriented duplex link.
#[async_trait]
pub trait FrameTransport: Send {
    async fn send(&mut self, frame: Frame) -> Result<()>;
    /// `None` once the peer has gone away. Must be cancel-safe.
    async fn recv(&mut self) -> Option<Result<Frame>>;
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &Url) -> Result<Box<dyn FrameTransport>>;
}

type StateObserver = Box<dyn Fn(ConnectionState) + Send + Sync>;

/// Owns the single persistent connection of a session.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    endpoint: Url,
    room_id: RoomId,
    auth_token: Option<String>,
    policy: ReconnectPolicy,
    handshake_timeout: Duration,
    transport: Option<Box<dyn FrameTransport>>,
    state: watch::Sender<ConnectionState>,
    observer: Option<StateObserver>,
    failures: u32,
    connected_at: Option<Instant>,
    healthy: bool,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, endpoint: Url, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            connector,
            endpoint,
            room_id: RoomId::default(),
            auth_token: None,
            policy,
            handshake_timeout: Duration::from_secs(10),
            transport: None,
            state,
            observer: None,
            failures: 0,
            connected_at: None,
            healthy: false,
        }
    }

    #[must_use]
    pub fn with_room(mut self, room_id: RoomId) -> Self {
        self.room_id = room_id;
        self
    }

    #[must_use]
    pub fn with_auth_token(mut self, auth_token: Option<String>) -> Self {
        self.auth_token = auth_token;
        self
    }

    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_state_observer(
        mut self,
        observer: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Failures since the last link that proved healthy.
    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    /// Records that the current link carries traffic; clears the failure streak.
    pub fn mark_healthy(&mut self) {
        if self.healthy || self.transport.is_none() {
            return;
        }
        self.healthy = true;
        if self.failures > 0 {
            debug!(
                room_id = %self.room_id,
                failures = self.failures,
                "chat: link healthy, failure streak cleared"
            );
        }
        self.failures = 0;
    }

    pub(crate) fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            info!(room_id = %self.room_id, state = ?next, "chat: connection state changed");
            if let Some(observer) = &self.observer {
                observer(next);
            }
        }
    }

    /// One attempt: open the socket and complete the STOMP handshake.
    pub async fn connect(&mut self) -> Result<()> {
        let mut transport = self.connector.open(&self.endpoint).await?;

        let mut connect = Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", self.endpoint.host_str().unwrap_or("localhost"))
            .header("heart-beat", "0,0");
        if let Some(token) = &self.auth_token {
            connect = connect.header("Authorization", format!("Bearer {token}"));
        }
        transport.send(connect).await?;

        let reply = tokio::time::timeout(self.handshake_timeout, transport.recv())
            .await
            .map_err(|_| ChatError::Transport("timed out waiting for CONNECTED".into()))?;
        match reply {
            Some(Ok(frame)) if frame.command == Command::Connected => {
                debug!(
                    room_id = %self.room_id,
                    version = frame.get("version").unwrap_or("unknown"),
                    "chat: STOMP session established"
                );
                self.transport = Some(transport);
                self.connected_at = Some(Instant::now());
                self.healthy = false;
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Some(Ok(frame)) if frame.command == Command::Error => {
                let _ = transport.close().await;
                Err(ChatError::Transport(format!(
                    "broker rejected connection: {}",
                    frame.get("message").unwrap_or(&frame.body)
                )))
            }
            Some(Ok(frame)) => {
                let _ = transport.close().await;
                Err(ChatError::Transport(format!(
                    "unexpected {} frame during handshake",
                    frame.command
                )))
            }
            Some(Err(err)) => Err(err),
            None => Err(ChatError::Transport(
                "connection closed during handshake".into(),
            )),
        }
    }

    /// Retries [`connect`](Self::connect) under the policy. The failure streak
    /// carries over from earlier calls until a link proves healthy, so a link
    /// that keeps dropping right after the handshake still ends `Failed`.
    /// Coming from `Disconnected`, the first attempt also waits.
    pub async fn connect_with_backoff(&mut self) -> Result<()> {
        let reconnecting = self.state() == ConnectionState::Disconnected;
        loop {
            if self.failures >= self.policy.max_attempts {
                error!(
                    room_id = %self.room_id,
                    failures = self.failures,
                    "chat: giving up on connection"
                );
                self.set_state(ConnectionState::Failed);
                return Err(ChatError::Transport(format!(
                    "connection failed after {} consecutive attempts",
                    self.failures
                )));
            }

            let retry = if reconnecting {
                Some(self.failures)
            } else {
                self.failures.checked_sub(1)
            };
            if let Some(retry) = retry {
                let delay = self.policy.delay_for(retry);
                info!(
                    room_id = %self.room_id,
                    attempt = self.failures + 1,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "chat: reconnecting"
                );
                tokio::time::sleep(delay).await;
            }

            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    self.failures = self.failures.saturating_add(1);
                    warn!(
                        room_id = %self.room_id,
                        attempt = self.failures,
                        max_attempts = self.policy.max_attempts,
                        %err,
                        "chat: connection attempt failed"
                    );
                }
            }
        }
    }

    pub async fn send_frame(&mut self, frame: Frame) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(ChatError::NotConnected);
        }
        let Some(transport) = self.transport.as_mut() else {
            return Err(ChatError::NotConnected);
        };
        debug!(command = %frame.command, destination = ?frame.destination(), "chat: frame out");
        if let Err(err) = transport.send(frame).await {
            warn!(room_id = %self.room_id, %err, "chat: send failed, dropping connection");
            self.mark_lost();
            return Err(err);
        }
        Ok(())
    }

    pub async fn publish(
        &mut self,
        destination: &str,
        headers: &[(&str, &str)],
        body: impl Into<String>,
    ) -> Result<()> {
        let mut frame = Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json");
        for (name, value) in headers {
            frame = frame.header(*name, *value);
        }
        self.send_frame(frame.with_body(body)).await
    }

    /// Next inbound frame, or `None` when there is no live transport.
    pub async fn next_frame(&mut self) -> Option<Result<Frame>> {
        match self.transport.as_mut() {
            Some(transport) => transport.recv().await,
            None => None,
        }
    }

    /// Drops the transport after an unexpected loss. Losing a link that never
    /// proved healthy counts toward the failure streak.
    pub fn mark_lost(&mut self) {
        if self.transport.take().is_some() {
            let stable = self.healthy
                || self
                    .connected_at
                    .is_some_and(|at| at.elapsed() >= self.policy.stable_after);
            if stable {
                self.failures = 0;
            } else {
                self.failures = self.failures.saturating_add(1);
                warn!(
                    room_id = %self.room_id,
                    failures = self.failures,
                    "chat: link lost before it became stable"
                );
            }
        }
        self.connected_at = None;
        self.healthy = false;
        if self.state() == ConnectionState::Connected {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Graceful release. A `Failed` state is kept; anything else ends `Disconnected`.
    pub async fn disconnect(&mut self) {
        self.connected_at = None;
        self.healthy = false;
        if let Some(mut transport) = self.transport.take() {
            if self.state() == ConnectionState::Connected {
                let _ = transport
                    .send(Frame::new(Command::Disconnect).header("receipt", "disconnect"))
                    .await;
            }
            if let Err(err) = transport.close().await {
                debug!(room_id = %self.room_id, %err, "chat: transport close reported an error");
            }
        }
        if self.state() != ConnectionState::Failed {
            self.set_state(ConnectionState::Disconnected);
        }
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
