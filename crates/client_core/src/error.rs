use std::time::Duration;

use shared::error::WireError;
use thiserror::Error;

use crate::connection::ConnectionState;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect realtime transport {url}: {reason}")]
    Connection { url: String, reason: String },
    #[error("realtime handshake with {url} timed out after {timeout:?}")]
    HandshakeTimeout { url: String, timeout: Duration },
    #[error("failed to fetch {what}: {source}")]
    Fetch {
        what: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("message not sent: {0}")]
    Send(#[from] SendFailure),
    #[error("no signed-in identity")]
    NotSignedIn,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl ClientError {
    pub fn fetch(what: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Fetch {
            what: what.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendFailure {
    #[error("connection is {0:?}, not registered")]
    NotRegistered(ConnectionState),
    #[error("realtime transport already closed")]
    TransportClosed,
}
