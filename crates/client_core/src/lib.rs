use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use shared::{
    domain::{ChatMessage, Identity, PeerEntry},
    protocol::{ClientFrame, Credentials, OutgoingMessage},
};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod api;
pub mod backlog;
pub mod composer;
pub mod config;
pub mod connection;
pub mod directory;
pub mod error;
pub mod filter;
pub mod session;
pub mod transcript;

pub use api::{ChatApi, HttpChatApi};
pub use config::{load_settings, load_settings_from, ClientSettings};
pub use connection::{ConnectionManager, ConnectionState, InboundEvent, Subscription};
pub use error::{ClientError, SendFailure};
pub use session::{IdentityProvider, Session};
pub use transcript::RenderRow;

use backlog::{Append, LiveBacklog};
use composer::Composer;
use directory::PeerDirectory;
use transcript::Transcript;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    ConnectionChanged(ConnectionState),
    PeersUpdated(Vec<PeerEntry>),
    /// The rendered transcript may differ from the last one read.
    TranscriptChanged,
    MessageReceived(ChatMessage),
    Registered(Value),
    Error(String),
}

/// Everything tied to one mounted session. Replaced wholesale on mount and
/// unmount so nothing leaks between identities.
struct ConversationState {
    session: Option<Session>,
    transcript: Transcript,
    backlog: LiveBacklog,
    composer: Composer,
}

impl ConversationState {
    fn new(session: Option<Session>, backlog_capacity: Option<usize>) -> Self {
        Self {
            session,
            transcript: Transcript::default(),
            backlog: LiveBacklog::new(backlog_capacity),
            composer: Composer::default(),
        }
    }

    fn me(&self) -> Option<&Identity> {
        self.session.as_ref().map(Session::identity)
    }
}

/// Direct-message client: one realtime connection, the live backlog it
/// feeds, the selected conversation and the peer roster.
///
/// Inbound events are applied by a single pump task. Readers take the same
/// lock, so a transcript is always rendered from a complete snapshot.
pub struct ChatClient {
    settings: ClientSettings,
    api: Arc<dyn ChatApi>,
    connection: ConnectionManager,
    directory: PeerDirectory,
    state: Mutex<ConversationState>,
    /// Outlives every `ConversationState` so history tickets never repeat.
    selections: AtomicU64,
    pump: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<ClientEvent>,
}

impl ChatClient {
    pub fn new(settings: ClientSettings) -> Result<Arc<Self>, ClientError> {
        let api = HttpChatApi::new(&settings.api_url)?;
        Self::new_with_api(settings, Arc::new(api))
    }

    pub fn new_with_api(
        settings: ClientSettings,
        api: Arc<dyn ChatApi>,
    ) -> Result<Arc<Self>, ClientError> {
        let endpoint = config::websocket_url(&settings.socket_url)?;
        let (events, _) = broadcast::channel(1024);
        Ok(Arc::new(Self {
            connection: ConnectionManager::new(endpoint, settings.handshake_timeout),
            directory: PeerDirectory::new(Arc::clone(&api)),
            state: Mutex::new(ConversationState::new(None, settings.backlog_capacity)),
            selections: AtomicU64::new(0),
            pump: Mutex::new(None),
            settings,
            api,
            events,
        }))
    }

    pub fn api(&self) -> &Arc<dyn ChatApi> {
        &self.api
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Starts over for `session`: fresh backlog and selection, a new realtime
    /// connection and a roster refresh. Without a session the client stays
    /// disconnected but the roster is still refreshed. A failed connection is
    /// returned, but the roster is loaded regardless.
    pub async fn mount(self: &Arc<Self>, session: Option<Session>) -> Result<(), ClientError> {
        self.stop_pump().await;
        self.connection.teardown().await;
        *self.state.lock().await =
            ConversationState::new(session.clone(), self.settings.backlog_capacity);
        self.emit(ClientEvent::TranscriptChanged);

        let Some(session) = session else {
            debug!("mounted without a session");
            self.emit(ClientEvent::ConnectionChanged(ConnectionState::Disconnected));
            self.refresh_peers().await;
            return Ok(());
        };

        info!(identity = %session.identity(), "mounting chat client");
        let subscription = self.connection.subscribe().await;
        *self.pump.lock().await = Some(self.spawn_pump(subscription));

        let connected = self.connection.connect(Some(session.identity())).await;
        self.refresh_peers().await;
        connected
    }

    /// Closes the connection and forgets the session. Idempotent.
    pub async fn unmount(&self) {
        self.stop_pump().await;
        self.connection.teardown().await;
        self.directory.clear().await;
        *self.state.lock().await = ConversationState::new(None, self.settings.backlog_capacity);
        self.emit(ClientEvent::ConnectionChanged(ConnectionState::Disconnected));
        self.emit(ClientEvent::TranscriptChanged);
    }

    /// Mounts and unmounts as the published session changes. A different
    /// identity reconnects; the same identity published again is ignored.
    pub fn follow(
        self: &Arc<Self>,
        mut sessions: watch::Receiver<Option<Session>>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut mounted: Option<Identity> = None;
            loop {
                let session = sessions.borrow_and_update().clone();
                let identity = session.as_ref().map(|session| session.identity().clone());
                if identity != mounted {
                    let Some(client) = weak.upgrade() else {
                        break;
                    };
                    match session {
                        Some(session) => {
                            if let Err(err) = client.mount(Some(session)).await {
                                warn!(error = %err, "mounted after sign-in without a connection");
                            }
                        }
                        None => client.unmount().await,
                    }
                    mounted = identity;
                }
                if sessions.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    pub async fn refresh_peers(&self) -> Vec<PeerEntry> {
        let peers = self.directory.refresh().await;
        self.emit(ClientEvent::PeersUpdated(peers.clone()));
        peers
    }

    pub async fn peers(&self) -> Vec<PeerEntry> {
        self.directory.peers().await
    }

    /// Switches the conversation and loads its history. The live backlog is
    /// kept and simply re-filtered. History that arrives after another switch
    /// is discarded, as is history fetched for a session that has since been
    /// replaced.
    pub async fn select_peer(&self, peer: Identity) -> Result<(), ClientError> {
        let ticket = {
            let mut state = self.state.lock().await;
            let me = state.me().cloned().ok_or(ClientError::NotSignedIn)?;
            let generation = self.selections.fetch_add(1, Ordering::Relaxed) + 1;
            state.transcript.select(me, peer, generation)
        };
        info!(peer = %ticket.peer(), "conversation selected");
        self.emit(ClientEvent::TranscriptChanged);

        let fetched = self.api.fetch_history(ticket.owner(), ticket.peer()).await;
        let mut state = self.state.lock().await;
        let same_session = state.me() == Some(ticket.owner());
        match fetched {
            Ok(history) => {
                let count = history.len();
                let applied = same_session && state.transcript.apply_history(&ticket, history);
                drop(state);
                if applied {
                    debug!(peer = %ticket.peer(), count, "history loaded");
                    self.emit(ClientEvent::TranscriptChanged);
                } else {
                    debug!(peer = %ticket.peer(), "discarding history for a stale selection");
                }
                Ok(())
            }
            Err(err) => {
                let current = same_session && state.transcript.is_current(&ticket);
                drop(state);
                warn!(peer = %ticket.peer(), error = %err, "failed to fetch history");
                if current {
                    self.emit(ClientEvent::Error(format!(
                        "failed to load history with {}: {err}",
                        ticket.peer()
                    )));
                }
                Err(ClientError::fetch(
                    format!("history with {}", ticket.peer()),
                    err,
                ))
            }
        }
    }

    pub async fn clear_selection(&self) {
        self.state.lock().await.transcript.clear_selection();
        self.emit(ClientEvent::TranscriptChanged);
    }

    pub async fn selected_peer(&self) -> Option<Identity> {
        self.state.lock().await.transcript.selected().cloned()
    }

    pub async fn session(&self) -> Option<Session> {
        self.state.lock().await.session.clone()
    }

    pub async fn set_draft(&self, text: impl Into<String>) {
        self.state.lock().await.composer.set_draft(text);
    }

    pub async fn draft(&self) -> String {
        self.state.lock().await.composer.draft().to_string()
    }

    /// Sends the draft to the selected peer and appends its local echo, all
    /// under one lock. Returns `Ok(None)` when there was nothing to send.
    /// A send the connection refuses still leaves the echo in place.
    pub async fn submit(&self) -> Result<Option<ChatMessage>, ClientError> {
        let mut state = self.state.lock().await;
        let me = state.me().cloned().ok_or(ClientError::NotSignedIn)?;
        let recipient = state.transcript.selected().cloned();
        let Some(echo) = state.composer.take_outgoing(&me, recipient.as_ref()) else {
            return Ok(None);
        };

        let sent = self
            .connection
            .send(ClientFrame::SendMessage(OutgoingMessage::from(&echo)))
            .await;
        state.backlog.append(echo.clone());
        drop(state);
        self.emit(ClientEvent::TranscriptChanged);

        match sent {
            Ok(()) => Ok(Some(echo)),
            Err(failure) => {
                warn!(recipient = %echo.recipient, error = %failure, "message kept locally but not sent");
                self.emit(ClientEvent::Error(failure.to_string()));
                Err(failure.into())
            }
        }
    }

    pub async fn send_text(
        &self,
        text: impl Into<String>,
    ) -> Result<Option<ChatMessage>, ClientError> {
        self.set_draft(text).await;
        self.submit().await
    }

    /// Persisted history for the selected peer followed by the matching live
    /// messages. Empty without a session or a selection.
    pub async fn transcript(&self) -> Vec<RenderRow> {
        let state = self.state.lock().await;
        let Some(me) = state.me() else {
            return Vec::new();
        };
        let live =
            filter::conversation_messages(state.backlog.iter(), me, state.transcript.selected());
        transcript::render(state.transcript.persisted(), live, me)
    }

    pub async fn backlog_len(&self) -> usize {
        self.state.lock().await.backlog.len()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    async fn stop_pump(&self) {
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
    }

    fn spawn_pump(self: &Arc<Self>, mut subscription: Subscription) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let Some(client) = weak.upgrade() else {
                    break;
                };
                client.apply_inbound(event).await;
            }
        })
    }

    async fn apply_inbound(&self, event: InboundEvent) {
        match event {
            InboundEvent::Connected => {
                self.emit(ClientEvent::ConnectionChanged(ConnectionState::Registered));
            }
            InboundEvent::MessageReceived(message) => {
                let appended = self.state.lock().await.backlog.append(message.clone());
                match appended {
                    Append::Appended => {
                        self.emit(ClientEvent::MessageReceived(message));
                        self.emit(ClientEvent::TranscriptChanged);
                    }
                    Append::Duplicate(client_id) => {
                        debug!(%client_id, "dropping already delivered message");
                    }
                }
            }
            InboundEvent::RegistrationAcknowledged(ack) => {
                self.emit(ClientEvent::Registered(ack));
            }
            InboundEvent::ConnectionError(message) => {
                self.emit(ClientEvent::Error(message));
            }
            InboundEvent::Disconnected { reason } => {
                debug!(%reason, "realtime transport gone");
                self.emit(ClientEvent::ConnectionChanged(ConnectionState::Disconnected));
            }
        }
    }
}

/// Front-end facing surface. Errors are flattened to `anyhow` for callers
/// that only report them.
#[async_trait]
pub trait ChatHandle: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<Session>;
    async fn sign_up(&self, username: &str, password: &str) -> Result<()>;
    async fn logout(&self) -> Result<()>;
    async fn list_peers(&self) -> Result<Vec<PeerEntry>>;
    async fn open_conversation(&self, peer: &str) -> Result<()>;
    async fn send_message(&self, text: &str) -> Result<()>;
    async fn rendered_transcript(&self) -> Vec<RenderRow>;
    fn events(&self) -> broadcast::Receiver<ClientEvent>;
}

#[async_trait]
impl ChatHandle for Arc<ChatClient> {
    async fn login(&self, username: &str, password: &str) -> Result<Session> {
        let credentials = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        let session = self.api.login(&credentials).await?;
        info!(identity = %session.identity(), "logged in");
        if let Err(err) = self.mount(Some(session.clone())).await {
            warn!(error = %err, "logged in without a realtime connection");
        }
        Ok(session)
    }

    async fn sign_up(&self, username: &str, password: &str) -> Result<()> {
        let credentials = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        self.api.sign_up(&credentials).await?;
        info!(username, "account created");
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.unmount().await;
        Ok(())
    }

    async fn list_peers(&self) -> Result<Vec<PeerEntry>> {
        Ok(self.refresh_peers().await)
    }

    async fn open_conversation(&self, peer: &str) -> Result<()> {
        self.select_peer(Identity::from(peer)).await?;
        Ok(())
    }

    async fn send_message(&self, text: &str) -> Result<()> {
        self.send_text(text).await?;
        Ok(())
    }

    async fn rendered_transcript(&self) -> Vec<RenderRow> {
        ChatClient::transcript(self).await
    }

    fn events(&self) -> broadcast::Receiver<ClientEvent> {
        ChatClient::subscribe_events(self)
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
