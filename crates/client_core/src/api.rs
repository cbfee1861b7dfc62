use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use shared::{
    domain::{ChatMessage, Identity, MessageOrigin, PeerEntry},
    error::WireError,
    protocol::{Credentials, LoginResponse, WireMessage},
};
use tracing::warn;
use url::Url;

use crate::{config::api_base_url, error::ClientError, session::Session};

/// HTTP side of the chat service: authentication, the peer registry and
/// conversation history. Every call is credentialed through the cookie store
/// populated by `login`.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<Session>;
    async fn sign_up(&self, credentials: &Credentials) -> Result<()>;
    async fn list_users(&self) -> Result<Vec<PeerEntry>>;
    /// Persisted messages between `me` and `peer`, in the order the service
    /// returned them.
    async fn fetch_history(&self, me: &Identity, peer: &Identity) -> Result<Vec<ChatMessage>>;
}

pub struct HttpChatApi {
    http: Client,
    api_url: Url,
}

impl HttpChatApi {
    pub fn new(api_url: &str) -> Result<Self, ClientError> {
        let api_url = api_base_url(api_url)?;
        let http = Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|err| ClientError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self { http, api_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("api url {} cannot carry a path", self.api_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn login(&self, credentials: &Credentials) -> Result<Session> {
        let url = self.endpoint(&["main", "login"])?;
        let body: LoginResponse = self
            .http
            .post(url)
            .json(credentials)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("unexpected login response")?;
        Ok(Session::new(body.user.username))
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<()> {
        let url = self.endpoint(&["main", "register-user"])?;
        self.http
            .post(url)
            .json(credentials)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<PeerEntry>> {
        let url = self.endpoint(&["users"])?;
        let peers = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(peers)
    }

    async fn fetch_history(&self, me: &Identity, peer: &Identity) -> Result<Vec<ChatMessage>> {
        let url = self.endpoint(&["messages", me.as_str(), peer.as_str()])?;
        let raw: Vec<Value> = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let messages = raw
            .into_iter()
            .filter_map(|entry| {
                let normalized = serde_json::from_value::<WireMessage>(entry)
                    .map_err(WireError::from)
                    .and_then(|wire| wire.normalize(MessageOrigin::Persisted));
                match normalized {
                    Ok(message) => Some(message),
                    Err(err) => {
                        warn!(peer = %peer, error = %err, "skipping malformed history entry");
                        None
                    }
                }
            })
            .collect();
        Ok(messages)
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
