//! Realtime transport lifecycle.
//!
//! A [`ConnectionManager`] owns at most one websocket session at a time. The
//! session moves `Disconnected -> Connecting -> Registered` and falls back to
//! `Disconnected` on handshake failure, teardown or loss of the socket. The
//! identity is announced with a `register-user` frame as the first frame after
//! the handshake, so every (re)connect registers again.
//!
//! Inbound events fan out to [`Subscription`] handles in arrival order with no
//! deduplication. Dropping a handle unsubscribes it; `teardown` releases all of
//! them together with the socket.

use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use shared::{
    domain::{ChatMessage, Identity, MessageOrigin},
    protocol::{ClientFrame, ServerFrame},
};
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
    time::timeout,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ClientError, SendFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Registered,
}

#[derive(Debug, Clone)]
pub enum InboundEvent {
    Connected,
    MessageReceived(ChatMessage),
    RegistrationAcknowledged(Value),
    ConnectionError(String),
    Disconnected { reason: String },
}

pub struct Subscription {
    id: u64,
    events: mpsc::UnboundedReceiver<InboundEvent>,
}

impl Subscription {
    /// `None` once the manager has been torn down.
    pub async fn recv(&mut self) -> Option<InboundEvent> {
        self.events.recv().await
    }
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    senders: Vec<(u64, mpsc::UnboundedSender<InboundEvent>)>,
}

struct ActiveConnection {
    identity: Identity,
    generation: u64,
    outbound: mpsc::UnboundedSender<ClientFrame>,
    reader: JoinHandle<()>,
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        // Dropping `outbound` ends the writer task, which closes the socket.
        self.reader.abort();
    }
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    subscribers: Mutex<Subscribers>,
    active: Mutex<Option<ActiveConnection>>,
    generation: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(?previous, ?state, "connection state changed");
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn dispatch(&self, event: InboundEvent) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers
            .senders
            .retain(|(_, sender)| sender.send(event.clone()).is_ok());
    }

    async fn handle_text(&self, text: &str) {
        let frame = match ServerFrame::decode(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "ignoring undecodable realtime frame");
                return;
            }
        };

        match frame {
            ServerFrame::ReceiveMessage(wire) => match wire.normalize(MessageOrigin::Live) {
                Ok(message) => {
                    debug!(
                        sender = %message.sender,
                        recipient = %message.recipient,
                        "live message received"
                    );
                    self.dispatch(InboundEvent::MessageReceived(message)).await;
                }
                Err(err) => warn!(error = %err, "dropping live message"),
            },
            ServerFrame::UserRegistered(ack) => {
                info!(%ack, "registration acknowledged");
                self.dispatch(InboundEvent::RegistrationAcknowledged(ack))
                    .await;
            }
            ServerFrame::ConnectionError(err) => {
                warn!(message = %err.message, "server reported connection error");
                self.dispatch(InboundEvent::ConnectionError(err.message))
                    .await;
            }
            ServerFrame::Unknown { event } => {
                debug!(%event, "ignoring unhandled realtime event");
            }
        }
    }

    async fn connection_lost(&self, generation: u64, reason: String) {
        let released = {
            let mut active = self.active.lock().await;
            let owned = active
                .as_ref()
                .is_some_and(|connection| connection.generation == generation);
            if !owned {
                return;
            }
            active.take()
        };

        self.set_state(ConnectionState::Disconnected);
        if let Some(connection) = &released {
            warn!(identity = %connection.identity, reason = %reason, "realtime transport disconnected");
        }
        self.dispatch(InboundEvent::Disconnected { reason }).await;
        // Aborts this reader task's own handle; nothing is awaited after it.
        drop(released);
    }
}

pub struct ConnectionManager {
    endpoint: Url,
    handshake_timeout: Duration,
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(endpoint: Url, handshake_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            endpoint,
            handshake_timeout,
            shared: Arc::new(Shared {
                state,
                subscribers: Mutex::new(Subscribers::default()),
                active: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.shared
            .active
            .lock()
            .await
            .as_ref()
            .map(|connection| connection.identity.clone())
    }

    pub async fn subscribe(&self) -> Subscription {
        let (sender, events) = mpsc::unbounded_channel();
        let mut subscribers = self.shared.subscribers.lock().await;
        subscribers.next_id += 1;
        let id = subscribers.next_id;
        subscribers.senders.push((id, sender));
        Subscription { id, events }
    }

    pub async fn unsubscribe(&self, subscription: Subscription) {
        self.shared
            .subscribers
            .lock()
            .await
            .senders
            .retain(|(id, _)| *id != subscription.id);
    }

    /// Opens the session for `identity`, replacing any existing one. Without
    /// an identity this only makes sure nothing is connected. Failures are
    /// logged, leave the manager `Disconnected` and are returned for callers
    /// that want to surface them.
    pub async fn connect(&self, identity: Option<&Identity>) -> Result<(), ClientError> {
        self.release_transport("replaced by a new connection").await;
        let Some(identity) = identity else {
            debug!("no identity available; realtime transport stays disconnected");
            return Ok(());
        };

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.set_state(ConnectionState::Connecting);
        info!(identity = %identity, endpoint = %self.endpoint, "connecting realtime transport");

        let stream = match timeout(self.handshake_timeout, connect_async(self.endpoint.as_str()))
            .await
        {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(err)) => {
                let err = ClientError::Connection {
                    url: self.endpoint.to_string(),
                    reason: err.to_string(),
                };
                return Err(self.handshake_failed(generation, err).await);
            }
            Err(_) => {
                let err = ClientError::HandshakeTimeout {
                    url: self.endpoint.to_string(),
                    timeout: self.handshake_timeout,
                };
                return Err(self.handshake_failed(generation, err).await);
            }
        };

        if !self.shared.is_current(generation) {
            debug!(identity = %identity, "handshake finished after teardown; dropping transport");
            return Ok(());
        }

        let (mut writer, reader) = stream.split();
        let register = match ClientFrame::RegisterUser(identity.clone()).encode() {
            Ok(text) => text,
            Err(err) => return Err(self.handshake_failed(generation, err.into()).await),
        };
        if let Err(err) = writer.send(Message::Text(register)).await {
            let err = ClientError::Connection {
                url: self.endpoint.to_string(),
                reason: format!("failed to register identity: {err}"),
            };
            return Err(self.handshake_failed(generation, err).await);
        }

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_frames(writer, outbound_rx));

        let mut active = self.shared.active.lock().await;
        if !self.shared.is_current(generation) {
            debug!(identity = %identity, "registration finished after teardown; dropping transport");
            return Ok(());
        }
        self.shared.set_state(ConnectionState::Registered);
        info!(identity = %identity, "registered with realtime transport");
        self.shared.dispatch(InboundEvent::Connected).await;

        let reader = tokio::spawn(read_frames(Arc::clone(&self.shared), reader, generation));
        *active = Some(ActiveConnection {
            identity: identity.clone(),
            generation,
            outbound,
            reader,
        });
        Ok(())
    }

    /// Fire-and-forget. Only defined while `Registered`; anything sent in
    /// another state is dropped and reported.
    pub async fn send(&self, frame: ClientFrame) -> Result<(), SendFailure> {
        let state = self.state();
        if state != ConnectionState::Registered {
            warn!(event = frame.event_name(), ?state, "dropping frame: not registered");
            return Err(SendFailure::NotRegistered(state));
        }

        let active = self.shared.active.lock().await;
        let Some(connection) = active.as_ref() else {
            return Err(SendFailure::NotRegistered(ConnectionState::Disconnected));
        };
        connection
            .outbound
            .send(frame)
            .map_err(|_| SendFailure::TransportClosed)
    }

    /// Closes the transport and releases every subscription. Safe to call
    /// any number of times.
    pub async fn teardown(&self) {
        self.release_transport("torn down").await;
        self.shared.subscribers.lock().await.senders.clear();
    }

    async fn release_transport(&self, reason: &str) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let released = self.shared.active.lock().await.take();
        self.shared.set_state(ConnectionState::Disconnected);

        if let Some(connection) = released {
            info!(identity = %connection.identity, reason, "closing realtime transport");
            drop(connection);
            self.shared
                .dispatch(InboundEvent::Disconnected {
                    reason: reason.to_string(),
                })
                .await;
        }
    }

    async fn handshake_failed(&self, generation: u64, err: ClientError) -> ClientError {
        if self.shared.is_current(generation) {
            self.shared.set_state(ConnectionState::Disconnected);
            warn!(error = %err, "realtime handshake failed");
            self.shared
                .dispatch(InboundEvent::ConnectionError(err.to_string()))
                .await;
        }
        err
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut active) = self.shared.active.try_lock() {
            active.take();
        }
    }
}

async fn write_frames<S>(mut sink: S, mut outbound: mpsc::UnboundedReceiver<ClientFrame>)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(frame) = outbound.recv().await {
        let text = match frame.encode() {
            Ok(text) => text,
            Err(err) => {
                warn!(event = frame.event_name(), error = %err, "failed to encode realtime frame");
                continue;
            }
        };
        if let Err(err) = sink.send(Message::Text(text)).await {
            warn!(event = frame.event_name(), error = %err, "failed to write realtime frame");
            break;
        }
        debug!(event = frame.event_name(), "realtime frame sent");
    }
    let _ = sink.close().await;
}

async fn read_frames<S>(shared: Arc<Shared>, mut stream: S, generation: u64)
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let reason = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => shared.handle_text(&text).await,
            Some(Ok(Message::Close(frame))) => {
                break frame
                    .map(|frame| frame.reason.to_string())
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or_else(|| "closed by server".to_string());
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => break format!("transport error: {err}"),
            None => break "transport stream ended".to_string(),
        }
    };
    shared.connection_lost(generation, reason).await;
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
