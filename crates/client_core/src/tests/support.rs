//! In-process realtime server used by the connection and client tests.

use std::{future::Future, time::Duration};

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use shared::protocol::ClientFrame;
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc, oneshot},
};

pub const WAIT: Duration = Duration::from_secs(5);

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("operation finished in time")
}

#[derive(Debug, Clone)]
enum ServerPush {
    Text(String),
    Close(String),
}

#[derive(Clone)]
struct RealtimeState {
    frames: mpsc::UnboundedSender<ClientFrame>,
    pushes: broadcast::Sender<ServerPush>,
}

pub struct RealtimeServer {
    pub url: String,
    frames: mpsc::UnboundedReceiver<ClientFrame>,
    pushes: broadcast::Sender<ServerPush>,
}

impl RealtimeServer {
    pub async fn next_frame(&mut self) -> ClientFrame {
        within(self.frames.recv()).await.expect("server alive")
    }

    pub fn push(&self, event: &str, data: Value) {
        let text = json!({"event": event, "data": data}).to_string();
        let _ = self.pushes.send(ServerPush::Text(text));
    }

    pub fn push_message(&self, content: &str, by: &str, to: &str) {
        self.push(
            "receive-message",
            json!({"content": content, "by": by, "to": to}),
        );
    }

    pub fn close_all(&self, reason: &str) {
        let _ = self.pushes.send(ServerPush::Close(reason.to_string()));
    }
}

pub async fn spawn_realtime_server() -> RealtimeServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (frames_tx, frames) = mpsc::unbounded_channel();
    let (pushes, _) = broadcast::channel(64);
    let state = RealtimeState {
        frames: frames_tx,
        pushes: pushes.clone(),
    };
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    RealtimeServer {
        url: format!("http://{addr}"),
        frames,
        pushes,
    }
}

/// Accepts TCP connections and never answers the websocket upgrade.
pub async fn spawn_silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{addr}")
}

/// Answers the upgrade of its first connection only after `release` fires,
/// then reports the first text frame that client sends, if any.
pub struct HeldServer {
    pub url: String,
    pub accepted: oneshot::Receiver<()>,
    pub release: oneshot::Sender<()>,
    pub first_text: oneshot::Receiver<Option<String>>,
}

pub async fn spawn_held_server() -> HeldServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (accepted_tx, accepted) = oneshot::channel();
    let (release, released) = oneshot::channel::<()>();
    let (first_text_tx, first_text) = oneshot::channel();
    tokio::spawn(async move {
        let Ok((socket, _)) = listener.accept().await else {
            return;
        };
        let _ = accepted_tx.send(());
        let _ = released.await;
        let Ok(mut socket) = tokio_tungstenite::accept_async(socket).await else {
            return;
        };
        let mut text = None;
        while let Some(Ok(message)) = socket.next().await {
            if let tokio_tungstenite::tungstenite::Message::Text(body) = message {
                text = Some(body);
                break;
            }
        }
        let _ = first_text_tx.send(text);
    });
    HeldServer {
        url: format!("http://{addr}"),
        accepted,
        release,
        first_text,
    }
}

pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}")
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RealtimeState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(state, socket))
}

async fn serve_socket(state: RealtimeState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let mut pushes = state.pushes.subscribe();

    let forward = tokio::spawn(async move {
        while let Ok(push) = pushes.recv().await {
            match push {
                ServerPush::Text(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                ServerPush::Close(reason) => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::NORMAL,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        if let Message::Text(text) = message {
            if let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) {
                let _ = state.frames.send(frame);
            }
        }
    }

    forward.abort();
}
