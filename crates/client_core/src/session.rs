use std::sync::Arc;

use shared::domain::Identity;
use tokio::sync::watch;

/// The signed-in user. Handed explicitly to the client; there is no global
/// identity state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    identity: Identity,
}

impl Session {
    pub fn new(identity: impl Into<Identity>) -> Self {
        Self {
            identity: identity.into(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

/// Publishes the current session. Login stores one, logout clears it, and
/// `ChatClient::follow` connects or tears down accordingly.
#[derive(Clone)]
pub struct IdentityProvider {
    current: Arc<watch::Sender<Option<Session>>>,
}

impl IdentityProvider {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            current: Arc::new(current),
        }
    }

    pub fn sign_in(&self, session: Session) {
        tracing::info!(identity = %session.identity(), "session started");
        self.current.send_replace(Some(session));
    }

    pub fn sign_out(&self) {
        if self.current.send_replace(None).is_some() {
            tracing::info!("session ended");
        }
    }

    pub fn watch(&self) -> watch::Receiver<Option<Session>> {
        self.current.subscribe()
    }
}

impl Default for IdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}
