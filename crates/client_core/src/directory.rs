use std::sync::Arc;

use shared::domain::PeerEntry;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::api::ChatApi;

/// Snapshot of addressable users. Each refresh replaces the roster
/// wholesale.
pub struct PeerDirectory {
    api: Arc<dyn ChatApi>,
    roster: RwLock<Vec<PeerEntry>>,
}

impl PeerDirectory {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        Self {
            api,
            roster: RwLock::new(Vec::new()),
        }
    }

    /// A failed fetch is logged and leaves the roster empty.
    pub async fn refresh(&self) -> Vec<PeerEntry> {
        let peers = match self.api.list_users().await {
            Ok(peers) => {
                info!(count = peers.len(), "peer roster refreshed");
                peers
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch peer roster");
                Vec::new()
            }
        };
        *self.roster.write().await = peers.clone();
        peers
    }

    pub async fn peers(&self) -> Vec<PeerEntry> {
        self.roster.read().await.clone()
    }

    pub async fn clear(&self) {
        self.roster.write().await.clear();
    }
}
