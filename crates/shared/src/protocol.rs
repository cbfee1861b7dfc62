use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{
    domain::{ChatMessage, CorrelationId, Identity, MessageOrigin},
    error::{ApiError, WireError},
};

pub const REGISTER_USER_EVENT: &str = "register-user";
pub const SEND_MESSAGE_EVENT: &str = "send-message";
pub const RECEIVE_MESSAGE_EVENT: &str = "receive-message";
pub const USER_REGISTERED_EVENT: &str = "user-registered";
pub const CONNECTION_ERROR_EVENT: &str = "connection-error";

/// Every realtime frame is `{"event": <name>, "data": <payload>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub content: String,
    pub by: Identity,
    pub to: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<CorrelationId>,
}

impl From<&ChatMessage> for OutgoingMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            content: message.content.clone(),
            by: message.sender.clone(),
            to: message.recipient.clone(),
            client_id: message.client_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientFrame {
    RegisterUser(Identity),
    SendMessage(OutgoingMessage),
}

impl ClientFrame {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientFrame::RegisterUser(_) => REGISTER_USER_EVENT,
            ClientFrame::SendMessage(_) => SEND_MESSAGE_EVENT,
        }
    }

    pub fn encode(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone)]
pub enum ServerFrame {
    ReceiveMessage(WireMessage),
    UserRegistered(Value),
    ConnectionError(ApiError),
    Unknown { event: String },
}

impl ServerFrame {
    pub fn decode(text: &str) -> Result<Self, WireError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let frame = match envelope.event.as_str() {
            RECEIVE_MESSAGE_EVENT => {
                ServerFrame::ReceiveMessage(serde_json::from_value(envelope.data)?)
            }
            USER_REGISTERED_EVENT => ServerFrame::UserRegistered(envelope.data),
            CONNECTION_ERROR_EVENT => {
                let error = match serde_json::from_value::<ApiError>(envelope.data.clone()) {
                    Ok(error) => error,
                    Err(_) => ApiError::new(envelope.data.to_string()),
                };
                ServerFrame::ConnectionError(error)
            }
            _ => ServerFrame::Unknown {
                event: envelope.event,
            },
        };
        Ok(frame)
    }
}

/// Message as it appears on the wire. Older servers spell the sender `by` or
/// `from` and the body `content` or `data`; all of them are accepted here and
/// nowhere else. Timestamps that cannot be read are dropped rather than
/// failing the message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Identity>,
    #[serde(default, alias = "clientId", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<CorrelationId>,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        rename = "createdAt",
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

/// RFC 3339 text or epoch milliseconds; anything else reads as absent.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let parsed = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => DateTime::parse_from_rfc3339(&text)
            .ok()
            .map(|sent_at| sent_at.with_timezone(&Utc)),
        Some(Value::Number(millis)) => millis.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    };
    Ok(parsed)
}

impl WireMessage {
    pub fn normalize(self, origin: MessageOrigin) -> Result<ChatMessage, WireError> {
        let sender = self
            .by
            .or(self.from)
            .or(self.sender)
            .ok_or(WireError::MissingField("sender"))?;
        let recipient = self
            .to
            .or(self.recipient)
            .ok_or(WireError::MissingField("recipient"))?;
        Ok(ChatMessage {
            content: self.content.or(self.data).unwrap_or_default(),
            sender,
            recipient,
            origin,
            local_echo: false,
            client_id: self.client_id,
            sent_at: self.sent_at.or(self.created_at).or(self.timestamp),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user: LoginUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginUser {
    pub username: Identity,
}
