//! In-memory broker standing in for the STOMP endpoint.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use shared::stomp::{Command, Frame};
use tokio::sync::mpsc;
use url::Url;

use crate::{
    connection::{Connector, FrameTransport},
    error::{ChatError, Result},
};

type Link = mpsc::UnboundedSender<Option<Frame>>;

#[derive(Default)]
struct BrokerState {
    sent: Vec<Frame>,
    link: Option<Link>,
    subscriptions: Vec<(String, String)>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeBroker {
    state: Arc<Mutex<BrokerState>>,
    attempts: Arc<AtomicU32>,
    refuse_next: Arc<AtomicU32>,
    refuse_all: Arc<AtomicBool>,
    reject_handshake: Arc<AtomicBool>,
    drop_after_handshake: Arc<AtomicBool>,
    deny_subscriptions: Arc<AtomicBool>,
}

impl FakeBroker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(FakeConnector {
            broker: self.clone(),
        })
    }

    pub(crate) fn endpoint() -> Url {
        Url::parse("ws://broker.test/ws-stomp").expect("endpoint")
    }

    pub(crate) fn refuse_all(&self, refuse: bool) {
        self.refuse_all.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn refuse_next(&self, count: u32) {
        self.refuse_next.store(count, Ordering::SeqCst);
    }

    pub(crate) fn reject_handshake(&self, reject: bool) {
        self.reject_handshake.store(reject, Ordering::SeqCst);
    }

    /// Every link closes right after `CONNECTED`.
    pub(crate) fn drop_after_handshake(&self, drop: bool) {
        self.drop_after_handshake.store(drop, Ordering::SeqCst);
    }

    /// Every `SUBSCRIBE` is answered with an `ERROR` frame.
    pub(crate) fn deny_subscriptions(&self, deny: bool) {
        self.deny_subscriptions.store(deny, Ordering::SeqCst);
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn sent(&self) -> Vec<Frame> {
        self.state.lock().expect("broker lock").sent.clone()
    }

    pub(crate) fn sent_with(&self, command: Command) -> Vec<Frame> {
        self.sent()
            .into_iter()
            .filter(|frame| frame.command == command)
            .collect()
    }

    pub(crate) fn published_to(&self, destination: &str) -> Vec<Frame> {
        self.sent_with(Command::Send)
            .into_iter()
            .filter(|frame| frame.destination() == Some(destination))
            .collect()
    }

    /// Destinations subscribed on the current link.
    pub(crate) fn subscribed(&self) -> Vec<String> {
        self.state
            .lock()
            .expect("broker lock")
            .subscriptions
            .iter()
            .map(|(_, destination)| destination.clone())
            .collect()
    }

    /// Delivers a MESSAGE the way a broker would: tagged with the subscription id.
    pub(crate) fn deliver(&self, destination: &str, body: &str) -> bool {
        let guard = self.state.lock().expect("broker lock");
        let Some(link) = guard.link.as_ref() else {
            return false;
        };
        let Some((id, _)) = guard
            .subscriptions
            .iter()
            .find(|(_, subscribed)| subscribed == destination)
        else {
            return false;
        };
        let frame = Frame::new(Command::Message)
            .header("destination", destination)
            .header("subscription", id.as_str())
            .header("message-id", format!("m-{}", guard.sent.len()))
            .with_body(body);
        link.send(Some(frame)).is_ok()
    }

    pub(crate) fn push(&self, frame: Frame) -> bool {
        let guard = self.state.lock().expect("broker lock");
        guard
            .link
            .as_ref()
            .is_some_and(|link| link.send(Some(frame)).is_ok())
    }

    /// Simulates the server dropping the socket.
    pub(crate) fn drop_link(&self) {
        let mut guard = self.state.lock().expect("broker lock");
        if let Some(link) = guard.link.take() {
            let _ = link.send(None);
        }
        guard.subscriptions.clear();
    }
}

struct FakeConnector {
    broker: FakeBroker,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, _endpoint: &Url) -> Result<Box<dyn FrameTransport>> {
        self.broker.attempts.fetch_add(1, Ordering::SeqCst);
        let refused_once = self
            .broker
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused_once || self.broker.refuse_all.load(Ordering::SeqCst) {
            return Err(ChatError::Transport("connection refused".into()));
        }

        let (link, inbound) = mpsc::unbounded_channel();
        {
            let mut guard = self.broker.state.lock().expect("broker lock");
            guard.link = Some(link.clone());
            guard.subscriptions.clear();
        }
        Ok(Box::new(FakeTransport {
            broker: self.broker.clone(),
            link,
            inbound,
        }))
    }
}

struct FakeTransport {
    broker: FakeBroker,
    link: Link,
    inbound: mpsc::UnboundedReceiver<Option<Frame>>,
}

#[async_trait]
impl FrameTransport for FakeTransport {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let mut guard = self.broker.state.lock().expect("broker lock");
        match frame.command {
            Command::Connect => {
                let reply = if self.broker.reject_handshake.load(Ordering::SeqCst) {
                    Frame::new(Command::Error).header("message", "access denied")
                } else {
                    Frame::new(Command::Connected).header("version", "1.2")
                };
                let _ = self.link.send(Some(reply));
                if self.broker.drop_after_handshake.load(Ordering::SeqCst) {
                    let _ = self.link.send(None);
                }
            }
            Command::Subscribe => {
                let id = frame.get("id").unwrap_or_default().to_string();
                let destination = frame.destination().unwrap_or_default().to_string();
                if self.broker.deny_subscriptions.load(Ordering::SeqCst) {
                    let denied = Frame::new(Command::Error)
                        .header("message", format!("subscription to {destination} denied"));
                    let _ = self.link.send(Some(denied));
                }
                guard.subscriptions.push((id, destination));
            }
            Command::Unsubscribe => {
                let id = frame.get("id").unwrap_or_default();
                guard.subscriptions.retain(|(known, _)| known != id);
            }
            _ => {}
        }
        guard.sent.push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        match self.inbound.recv().await {
            Some(Some(frame)) => Some(Ok(frame)),
            _ => None,
        }
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Polls `check` until it holds, failing the test after two seconds.
pub(crate) async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
