use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use client_core::{load_settings_from, ChatClient, ChatHandle, ClientEvent, RenderRow};
use shared::domain::{Identity, MessageOrigin};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast,
};
use tokio_stream::{wrappers::LinesStream, StreamExt};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dm-terminal", about = "Direct messages from the terminal")]
struct Args {
    #[arg(long)]
    username: String,
    #[arg(long)]
    password: String,
    /// Create the account before logging in.
    #[arg(long)]
    sign_up: bool,
    /// Conversation to open right after login.
    #[arg(long)]
    peer: Option<String>,
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    socket_url: Option<String>,
    #[arg(long, default_value = "client.toml")]
    config: PathBuf,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Quit,
    Peers,
    Show,
    Open(String),
    Unknown(String),
    Say(String),
}

impl Command {
    fn parse(line: &str) -> Self {
        let Some(command) = line.trim().strip_prefix('/') else {
            return Self::Say(line.to_string());
        };
        let mut parts = command.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("quit"), None) => Self::Quit,
            (Some("peers"), None) => Self::Peers,
            (Some("show"), None) => Self::Show,
            (Some("open"), Some(peer)) => Self::Open(peer.to_string()),
            _ => Self::Unknown(command.to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings_from(&args.config);
    if let Some(api_url) = args.api_url {
        settings.api_url = api_url;
    }
    if let Some(socket_url) = args.socket_url {
        settings.socket_url = socket_url;
    }

    let client = ChatClient::new(settings)?;
    if args.sign_up {
        client.sign_up(&args.username, &args.password).await?;
    }
    let session = client.login(&args.username, &args.password).await?;
    let me = session.identity().clone();
    println!("signed in as {me}; /peers, /open <peer>, /show, /quit");

    let printer = tokio::spawn(print_events(client.events(), me));
    if let Some(peer) = &args.peer {
        open(&client, peer).await;
    }

    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    while let Some(line) = lines.next().await {
        match Command::parse(&line?) {
            Command::Quit => break,
            Command::Peers => match client.list_peers().await {
                Ok(peers) if peers.is_empty() => println!("no peers"),
                Ok(peers) => {
                    for peer in peers {
                        println!("  {}", peer.identity);
                    }
                }
                Err(err) => eprintln!("! {err}"),
            },
            Command::Show => show(&client).await,
            Command::Open(peer) => open(&client, &peer).await,
            Command::Unknown(command) => eprintln!("! unknown command /{command}"),
            Command::Say(text) => {
                if let Err(err) = client.send_message(&text).await {
                    eprintln!("! {err}");
                }
            }
        }
    }

    client.logout().await?;
    printer.abort();
    Ok(())
}

async fn open(client: &Arc<ChatClient>, peer: &str) {
    if let Err(err) = client.open_conversation(peer).await {
        warn!(peer, error = %err, "could not load conversation history");
    }
    show(client).await;
}

async fn show(client: &Arc<ChatClient>) {
    let rows = client.rendered_transcript().await;
    if rows.is_empty() {
        println!("(no messages)");
    }
    for row in &rows {
        println!("{}", format_row(row));
    }
}

fn format_row(row: &RenderRow) -> String {
    let source = match row.origin {
        MessageOrigin::Persisted => "db",
        MessageOrigin::Live => "rt",
    };
    let time = row
        .sent_at
        .map(|sent_at| sent_at.with_timezone(&Local).format("%H:%M ").to_string())
        .unwrap_or_default();
    let marker = if row.is_self { ">" } else { " " };
    format!("[{source}] {time}{marker} {}: {}", row.sender, row.content)
}

async fn print_events(mut events: broadcast::Receiver<ClientEvent>, me: Identity) {
    loop {
        match events.recv().await {
            Ok(ClientEvent::MessageReceived(message)) if message.sender != me => {
                println!("<< {} -> {}: {}", message.sender, message.recipient, message.content);
            }
            Ok(ClientEvent::ConnectionChanged(state)) => println!("-- connection {state:?}"),
            Ok(ClientEvent::Error(err)) => eprintln!("! {err}"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event printer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_messages() {
        assert_eq!(Command::parse("hello /there"), Command::Say("hello /there".into()));
        assert_eq!(Command::parse("   "), Command::Say("   ".into()));
    }

    #[test]
    fn slash_commands_are_recognised() {
        assert_eq!(Command::parse("/quit"), Command::Quit);
        assert_eq!(Command::parse(" /peers "), Command::Peers);
        assert_eq!(Command::parse("/open bob"), Command::Open("bob".into()));
        assert_eq!(Command::parse("/open"), Command::Unknown("open".into()));
        assert_eq!(Command::parse("/show all"), Command::Unknown("show all".into()));
    }

    #[test]
    fn rows_are_tagged_by_source_and_author() {
        let row = RenderRow {
            content: "yo".into(),
            sender: Identity::from("alice"),
            is_self: true,
            origin: MessageOrigin::Live,
            local_echo: true,
            sent_at: None,
        };

        assert_eq!(format_row(&row), "[rt] > alice: yo");
    }
}
