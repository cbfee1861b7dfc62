use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_newtype!(Identity);

/// Client-generated id attached to outgoing messages so the sender's own
/// echo can be recognised when the server relays it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    #[serde(rename = "username", alias = "identity")]
    pub identity: Identity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    Persisted,
    Live,
}

/// Canonical message shape. Every inbound spelling is normalized into this
/// before it reaches the backlog or the history buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub content: String,
    pub sender: Identity,
    pub recipient: Identity,
    pub origin: MessageOrigin,
    pub local_echo: bool,
    pub client_id: Option<CorrelationId>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn local_echo(
        content: impl Into<String>,
        sender: Identity,
        recipient: Identity,
        client_id: CorrelationId,
    ) -> Self {
        Self {
            content: content.into(),
            sender,
            recipient,
            origin: MessageOrigin::Live,
            local_echo: true,
            client_id: Some(client_id),
            sent_at: Some(Utc::now()),
        }
    }
}

/// Unordered pair of identities. `{a, b}` and `{b, a}` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    low: Identity,
    high: Identity,
}

impl ConversationKey {
    pub fn new(a: Identity, b: Identity) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn contains(&self, message: &ChatMessage) -> bool {
        self.matches(&message.sender, &message.recipient)
    }

    pub fn matches(&self, sender: &Identity, recipient: &Identity) -> bool {
        (sender == &self.low && recipient == &self.high)
            || (sender == &self.high && recipient == &self.low)
    }
}
