use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use url::Url;

use crate::error::ClientError;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:3000";
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);
const SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_url: String,
    pub socket_url: String,
    pub handshake_timeout: Duration,
    /// `None` keeps every live message for the lifetime of the connection.
    pub backlog_capacity: Option<usize>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_ENDPOINT.into(),
            socket_url: DEFAULT_ENDPOINT.into(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            backlog_capacity: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_url: Option<String>,
    socket_url: Option<String>,
    handshake_timeout_secs: Option<u64>,
    backlog_capacity: Option<usize>,
}

pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(SETTINGS_FILE))
}

pub fn load_settings_from(path: &Path) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        if let Err(err) = apply_file_overrides(&mut settings, &raw) {
            tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable settings file");
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file_overrides(settings: &mut ClientSettings, raw: &str) -> Result<(), toml::de::Error> {
    let file_cfg: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file_cfg.api_url {
        settings.api_url = v;
    }
    if let Some(v) = file_cfg.socket_url {
        settings.socket_url = v;
    }
    if let Some(v) = file_cfg.handshake_timeout_secs {
        settings.handshake_timeout = Duration::from_secs(v);
    }
    if let Some(v) = file_cfg.backlog_capacity {
        settings.backlog_capacity = (v > 0).then_some(v);
    }
    Ok(())
}

fn apply_env_overrides(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    for key in ["CHAT_API_URL", "APP__API_URL"] {
        if let Some(v) = lookup(key) {
            settings.api_url = v;
        }
    }

    for key in ["CHAT_SOCKET_URL", "APP__SOCKET_URL"] {
        if let Some(v) = lookup(key) {
            settings.socket_url = v;
        }
    }

    if let Some(v) = lookup("APP__HANDSHAKE_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.handshake_timeout = Duration::from_secs(parsed);
        }
    }

    if let Some(v) = lookup("APP__BACKLOG_CAPACITY") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.backlog_capacity = (parsed > 0).then_some(parsed);
        }
    }
}

pub fn api_base_url(api_url: &str) -> Result<Url, ClientError> {
    let url = parse_endpoint(api_url)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ClientError::Config(format!(
            "api url must use http or https, got {other}://"
        ))),
    }
}

/// Maps the configured socket endpoint to the websocket URL of the realtime
/// route: `http://host:3000` becomes `ws://host:3000/ws`.
pub fn websocket_url(socket_url: &str) -> Result<Url, ClientError> {
    let mut url = parse_endpoint(socket_url)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ClientError::Config(format!(
                "socket url must start with http://, https://, ws:// or wss://, got {other}://"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| ClientError::Config(format!("cannot use {scheme} for {socket_url}")))?;

    let already_routed = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .is_some_and(|last| last == "ws");
    if !already_routed {
        url.path_segments_mut()
            .map_err(|()| ClientError::Config(format!("socket url {socket_url} has no path")))?
            .pop_if_empty()
            .push("ws");
    }
    Ok(url)
}

fn parse_endpoint(raw: &str) -> Result<Url, ClientError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ClientError::Config("endpoint must not be empty".into()));
    }
    Url::parse(raw).map_err(|err| ClientError::Config(format!("invalid endpoint '{raw}': {err}")))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
