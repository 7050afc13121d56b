use std::{sync::Arc, time::Duration};

use shared::{
    domain::{ChatMessage, LocalIdentity, RoomId, UserId},
    protocol::OutboundChatMessage,
    stomp::{Command as FrameCommand, Frame},
};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::ChatSettings,
    connection::{ConnectionManager, ConnectionState, Connector},
    error::{ChatError, Result, SendRejection},
    history::{HistoryLoader, HistorySource, MissingHistorySource},
    profile::{MissingProfileSource, ProfileResolver, ProfileSource},
    publisher::OutboundPublisher,
    receipts::ReadReceiptReconciler,
    rest::RestApi,
    store::MessageStore,
    subscriptions::{Inbound, SubscriptionRegistry},
    transport::WebSocketConnector,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// External collaborators a session calls into.
#[derive(Clone)]
pub struct SessionDeps {
    pub history: Arc<dyn HistorySource>,
    pub profiles: Arc<dyn ProfileSource>,
    pub connector: Arc<dyn Connector>,
}

impl SessionDeps {
    /// Backends that are not supplied report themselves unavailable.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            history: Arc::new(MissingHistorySource),
            profiles: Arc::new(MissingProfileSource),
            connector,
        }
    }

    #[must_use]
    pub fn with_history(mut self, history: Arc<dyn HistorySource>) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn with_profiles(mut self, profiles: Arc<dyn ProfileSource>) -> Self {
        self.profiles = profiles;
        self
    }

    /// REST calls through `reqwest`, live traffic through `tokio-tungstenite`.
    pub fn from_settings(settings: &ChatSettings) -> Result<Self> {
        let api = Arc::new(RestApi::new(&settings.api_base_url, settings.request_timeout)?);
        Ok(Self::new(Arc::new(WebSocketConnector))
            .with_history(api.clone())
            .with_profiles(api))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counterpart {
    pub id: Option<UserId>,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Closed,
    ReconnectExhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    MessageAppended(ChatMessage),
    MessagesRead { count: usize },
    CounterpartResolved(Counterpart),
    Terminated(ExitReason),
}

enum SessionCommand {
    Send {
        content: String,
        reply: oneshot::Sender<Result<OutboundChatMessage>>,
    },
    Close,
}

/// Handle to the one live conversation of a room view.
///
/// Dropping the handle tears the session down as well; [`ChatSession::close`]
/// additionally waits for the teardown to finish.
pub struct ChatSession {
    room_id: RoomId,
    local_user_id: UserId,
    commands: mpsc::UnboundedSender<SessionCommand>,
    state: watch::Receiver<ConnectionState>,
    transcript: watch::Receiver<Arc<Vec<ChatMessage>>>,
    counterpart: watch::Receiver<Counterpart>,
    events: broadcast::Sender<SessionEvent>,
    first_events: Option<broadcast::Receiver<SessionEvent>>,
    task: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl ChatSession {
    /// Loads history, resolves the counterpart, connects, and starts dispatching.
    pub async fn open(
        settings: &ChatSettings,
        identity: LocalIdentity,
        room_id: RoomId,
        deps: SessionDeps,
    ) -> Result<Self> {
        settings.validate()?;
        if room_id.is_empty() {
            return Err(ChatError::Config("room id must not be empty".into()));
        }

        let (events, first_events) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let state_events = events.clone();
        let mut connection = ConnectionManager::new(
            deps.connector,
            settings.ws_url()?,
            settings.reconnect.clone(),
        )
        .with_room(room_id.clone())
        .with_auth_token(identity.auth_token.clone())
        .with_handshake_timeout(settings.request_timeout)
        .with_state_observer(move |state| {
            let _ = state_events.send(SessionEvent::StateChanged(state));
        });

        info!(room_id = %room_id, user_id = %identity.user_id, "chat: opening session");
        connection.set_state(ConnectionState::Authorizing);

        let loader = HistoryLoader::new(
            deps.history,
            settings.local_name_fallback.clone(),
            settings.counterpart_placeholder.clone(),
        );
        let history = match loader.load(&room_id, &identity).await {
            Ok(history) => history,
            Err(err) => {
                error!(room_id = %room_id, %err, "chat: history load failed");
                connection.set_state(ConnectionState::Failed);
                return Err(err);
            }
        };

        let mut store = MessageStore::new(identity.user_id.clone());
        store.extend(history.messages);

        let mut counterpart = Counterpart {
            id: None,
            name: settings.counterpart_placeholder.clone(),
        };
        if !history.counterpart_id.is_empty() {
            let resolver =
                ProfileResolver::new(deps.profiles, settings.counterpart_placeholder.clone());
            let name = resolver
                .resolve(&history.counterpart_id, identity.auth_token.as_deref())
                .await;
            store.rename_sender(&history.counterpart_id, &name);
            counterpart = Counterpart {
                id: Some(history.counterpart_id),
                name,
            };
        }

        connection.connect_with_backoff().await?;

        let mut registry =
            SubscriptionRegistry::new(room_id.clone(), &settings.read_receipt_destinations);
        if let Err(err) = registry.on_connected(&mut connection).await {
            warn!(room_id = %room_id, %err, "chat: initial subscribe failed, will reconnect");
            connection.mark_lost();
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (transcript_tx, transcript_rx) = watch::channel(Arc::new(store.snapshot()));
        let (counterpart_tx, counterpart_rx) = watch::channel(counterpart);
        let state_rx = connection.watch_state();

        let driver = SessionDriver {
            room_id: room_id.clone(),
            publisher: OutboundPublisher::new(
                room_id.clone(),
                &identity,
                &settings.local_name_fallback,
            ),
            reconciler: ReadReceiptReconciler::new(room_id.clone(), identity.user_id.clone()),
            connection,
            registry,
            store,
            transcript: transcript_tx,
            counterpart: counterpart_tx,
            events: events.clone(),
            commands: commands_rx,
        };
        let task = tokio::spawn(driver.run());

        Ok(Self {
            room_id,
            local_user_id: identity.user_id,
            commands: commands_tx,
            state: state_rx,
            transcript: transcript_rx,
            counterpart: counterpart_rx,
            events,
            first_events: Some(first_events),
            task: Some(task),
            shutdown_timeout: settings.shutdown_timeout,
        })
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn local_user_id(&self) -> &UserId {
        &self.local_user_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn messages(&self) -> Arc<Vec<ChatMessage>> {
        self.transcript.borrow().clone()
    }

    pub fn counterpart(&self) -> Counterpart {
        self.counterpart.borrow().clone()
    }

    /// The first call also yields events emitted before anyone subscribed.
    pub fn subscribe_events(&mut self) -> broadcast::Receiver<SessionEvent> {
        self.first_events
            .take()
            .unwrap_or_else(|| self.events.subscribe())
    }

    /// Publishes `content`. Rejections never touch the transport; the message
    /// becomes visible in [`messages`](Self::messages) once the server echoes it.
    pub async fn send(&self, content: &str) -> Result<OutboundChatMessage> {
        if content.trim().is_empty() {
            return Err(ChatError::Validation(SendRejection::EmptyContent));
        }
        if self.state() != ConnectionState::Connected {
            return Err(ChatError::Validation(SendRejection::NotConnected));
        }
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionCommand::Send {
                content: content.to_string(),
                reply,
            })
            .map_err(|_| ChatError::SessionClosed)?;
        response.await.map_err(|_| ChatError::SessionClosed)?
    }

    pub async fn close(mut self) {
        let _ = self.commands.send(SessionCommand::Close);
        let Some(mut task) = self.task.take() else {
            return;
        };
        match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(room_id = %self.room_id, %err, "chat: session task failed"),
            Err(_) => {
                warn!(room_id = %self.room_id, "chat: session teardown timed out, aborting");
                task.abort();
            }
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if self.task.take().is_some() {
            let _ = self.commands.send(SessionCommand::Close);
        }
    }
}

enum Recovery {
    Reconnected,
    Closed,
    Exhausted,
}

/// Owns the store and the connection; every mutation happens on this task.
struct SessionDriver {
    room_id: RoomId,
    connection: ConnectionManager,
    registry: SubscriptionRegistry,
    publisher: OutboundPublisher,
    reconciler: ReadReceiptReconciler,
    store: MessageStore,
    transcript: watch::Sender<Arc<Vec<ChatMessage>>>,
    counterpart: watch::Sender<Counterpart>,
    events: broadcast::Sender<SessionEvent>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
}

impl SessionDriver {
    async fn run(mut self) {
        let reason = loop {
            if self.connection.state() != ConnectionState::Connected {
                match self.recover().await {
                    Recovery::Reconnected => {}
                    Recovery::Closed => break ExitReason::Closed,
                    Recovery::Exhausted => break ExitReason::ReconnectExhausted,
                }
                continue;
            }

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Send { content, reply }) => {
                        let result = self.publisher.send(&mut self.connection, &content).await;
                        let _ = reply.send(result);
                    }
                    Some(SessionCommand::Close) | None => break ExitReason::Closed,
                },
                frame = self.connection.next_frame() => match frame {
                    Some(Ok(frame)) => self.dispatch(frame).await,
                    Some(Err(err)) => {
                        warn!(room_id = %self.room_id, %err, "chat: connection lost");
                        self.connection.mark_lost();
                    }
                    None => {
                        info!(room_id = %self.room_id, "chat: connection closed by server");
                        self.connection.mark_lost();
                    }
                },
            }
        };

        self.teardown(reason).await;
    }

    async fn recover(&mut self) -> Recovery {
        let outcome = {
            let reconnect = self.connection.connect_with_backoff();
            tokio::pin!(reconnect);
            loop {
                tokio::select! {
                    result = &mut reconnect => break Some(result),
                    command = self.commands.recv() => match command {
                        Some(SessionCommand::Send { reply, .. }) => {
                            let rejection = ChatError::Validation(SendRejection::NotConnected);
                            let _ = reply.send(Err(rejection));
                        }
                        Some(SessionCommand::Close) | None => break None,
                    },
                }
            }
        };

        match outcome {
            None => Recovery::Closed,
            Some(Err(_)) => Recovery::Exhausted,
            Some(Ok(())) => {
                if let Err(err) = self.registry.on_connected(&mut self.connection).await {
                    warn!(room_id = %self.room_id, %err, "chat: resubscribe failed");
                    self.connection.mark_lost();
                }
                Recovery::Reconnected
            }
        }
    }

    async fn dispatch(&mut self, frame: Frame) {
        match frame.command {
            FrameCommand::Message => match self.registry.classify(&frame) {
                Some(Inbound::Message(message)) => {
                    self.connection.mark_healthy();
                    self.on_message(message).await;
                }
                Some(Inbound::ReadSignal { .. }) => {
                    self.connection.mark_healthy();
                    self.on_read_signal();
                }
                None => debug!(
                    room_id = %self.room_id,
                    destination = ?frame.destination(),
                    "chat: frame for unknown subscription"
                ),
            },
            FrameCommand::Error => {
                warn!(
                    room_id = %self.room_id,
                    message = frame.get("message").unwrap_or_default(),
                    "chat: broker reported an error"
                );
                self.connection.mark_lost();
            }
            other => debug!(room_id = %self.room_id, command = %other, "chat: ignoring frame"),
        }
    }

    async fn on_message(&mut self, message: ChatMessage) {
        let from_counterpart = self.reconciler.is_from_counterpart(&message);
        if from_counterpart {
            self.learn_counterpart(&message);
        }

        if !self.store.append(message.clone()) {
            debug!(room_id = %self.room_id, id = %message.id, "chat: duplicate message ignored");
            return;
        }
        self.publish_transcript();
        let _ = self.events.send(SessionEvent::MessageAppended(message.clone()));

        if from_counterpart {
            if let Err(err) = self.reconciler.on_message(&message, &mut self.connection).await {
                warn!(room_id = %self.room_id, %err, "chat: read acknowledgment failed");
            }
        }
    }

    fn learn_counterpart(&mut self, message: &ChatMessage) {
        let mut resolved = None;
        self.counterpart.send_if_modified(|current| {
            if current.id.is_some() {
                return false;
            }
            current.id = Some(message.sender_id.clone());
            if !message.sender_name.trim().is_empty() {
                current.name = message.sender_name.clone();
            }
            resolved = Some(current.clone());
            true
        });
        if let Some(counterpart) = resolved {
            info!(
                room_id = %self.room_id,
                counterpart_id = %message.sender_id,
                "chat: counterpart discovered"
            );
            let _ = self.events.send(SessionEvent::CounterpartResolved(counterpart));
        }
    }

    fn on_read_signal(&mut self) {
        let count = self.reconciler.on_read_signal(&mut self.store);
        if count > 0 {
            self.publish_transcript();
            let _ = self.events.send(SessionEvent::MessagesRead { count });
        }
    }

    fn publish_transcript(&self) {
        self.transcript.send_replace(Arc::new(self.store.snapshot()));
    }

    async fn teardown(&mut self, reason: ExitReason) {
        self.registry.release_all(&mut self.connection).await;
        self.connection.disconnect().await;
        self.store.clear();
        self.publish_transcript();
        info!(room_id = %self.room_id, ?reason, "chat: session ended");
        let _ = self.events.send(SessionEvent::Terminated(reason));
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
