use super::*;

use std::{
    collections::HashMap,
    env,
    time::{SystemTime, UNIX_EPOCH},
};

#[test]
fn maps_http_endpoint_to_websocket_route() {
    assert_eq!(
        websocket_url("http://localhost:3000").expect("ws url").as_str(),
        "ws://localhost:3000/ws"
    );
    assert_eq!(
        websocket_url("https://chat.example.com/realtime/")
            .expect("ws url")
            .as_str(),
        "wss://chat.example.com/realtime/ws"
    );
}

#[test]
fn keeps_explicit_websocket_route() {
    assert_eq!(
        websocket_url("ws://127.0.0.1:4000/ws").expect("ws url").as_str(),
        "ws://127.0.0.1:4000/ws"
    );
}

#[test]
fn rejects_unsupported_socket_scheme() {
    assert!(matches!(
        websocket_url("ftp://localhost:3000"),
        Err(ClientError::Config(_))
    ));
    assert!(matches!(websocket_url("   "), Err(ClientError::Config(_))));
}

#[test]
fn api_base_requires_http() {
    assert!(api_base_url("https://api.example.com").is_ok());
    assert!(matches!(
        api_base_url("ws://api.example.com"),
        Err(ClientError::Config(_))
    ));
}

#[test]
fn file_overrides_replace_defaults() {
    let mut settings = ClientSettings::default();
    apply_file_overrides(
        &mut settings,
        r#"
api_url = "http://api.local:8000"
socket_url = "http://socket.local:3001"
handshake_timeout_secs = 5
backlog_capacity = 500
"#,
    )
    .expect("parse settings");

    assert_eq!(settings.api_url, "http://api.local:8000");
    assert_eq!(settings.socket_url, "http://socket.local:3001");
    assert_eq!(settings.handshake_timeout, Duration::from_secs(5));
    assert_eq!(settings.backlog_capacity, Some(500));
}

#[test]
fn zero_backlog_capacity_means_unbounded() {
    let mut settings = ClientSettings::default();
    apply_file_overrides(&mut settings, "backlog_capacity = 0").expect("parse settings");
    assert_eq!(settings.backlog_capacity, None);
}

#[test]
fn app_prefixed_env_wins_over_plain_env() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("CHAT_API_URL", "http://plain:1"),
        ("APP__API_URL", "http://prefixed:2"),
        ("CHAT_SOCKET_URL", "http://socket:3"),
        ("APP__HANDSHAKE_TIMEOUT_SECS", "not-a-number"),
        ("APP__BACKLOG_CAPACITY", "64"),
    ]);
    let mut settings = ClientSettings::default();
    apply_env_overrides(&mut settings, |key| vars.get(key).map(|v| v.to_string()));

    assert_eq!(settings.api_url, "http://prefixed:2");
    assert_eq!(settings.socket_url, "http://socket:3");
    assert_eq!(settings.handshake_timeout, DEFAULT_HANDSHAKE_TIMEOUT);
    assert_eq!(settings.backlog_capacity, Some(64));
}

#[test]
fn missing_settings_file_falls_back_to_defaults() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("dm_client_missing_{suffix}.toml"));

    let settings = load_settings_from(&path);
    assert_eq!(settings.handshake_timeout, DEFAULT_HANDSHAKE_TIMEOUT);
}
