use std::path::PathBuf;

use anyhow::{Context, Result};
use chat_core::{
    load_settings, load_settings_from, ChatError, ChatSession, ConnectionState, ExitReason,
    SessionDeps, SessionEvent,
};
use clap::Parser;
use shared::domain::{ChatMessage, LocalIdentity, RoomId};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Terminal client for a single chat room.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    room: String,
    #[arg(long)]
    user_id: String,
    #[arg(long)]
    nickname: Option<String>,
    #[arg(long, env = "CHAT_AUTH_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// Settings file; defaults to ./chat.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => load_settings_from(path),
        None => load_settings(),
    };
    let mut identity = LocalIdentity::new(args.user_id.as_str());
    if let Some(nickname) = args.nickname {
        identity = identity.with_nickname(nickname);
    }
    if let Some(token) = args.token {
        identity = identity.with_auth_token(token);
    }

    let deps = SessionDeps::from_settings(&settings)?;
    let mut session = match ChatSession::open(&settings, identity, RoomId::new(args.room), deps)
        .await
    {
        Ok(session) => session,
        Err(err @ ChatError::Authorization { .. }) => {
            eprintln!("{err}; leaving the room");
            std::process::exit(2);
        }
        Err(err) => return Err(err).context("failed to open chat session"),
    };

    let counterpart = session.counterpart();
    println!("-- room {} with {} --", session.room_id(), counterpart.name);
    for message in session.messages().iter() {
        print_message(message);
    }

    let mut events = session.subscribe_events();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim() == "/quit" => break,
                Some(line) => match session.send(&line).await {
                    Ok(_) => {}
                    Err(ChatError::Validation(rejection)) => {
                        warn!(?rejection, "message not sent");
                    }
                    Err(err) => warn!(%err, "message not sent"),
                },
                None => break,
            },
            event = events.recv() => match event {
                Ok(SessionEvent::MessageAppended(message)) => print_message(&message),
                Ok(SessionEvent::MessagesRead { count }) => println!("-- {count} message(s) read --"),
                Ok(SessionEvent::CounterpartResolved(counterpart)) => {
                    println!("-- chatting with {} --", counterpart.name);
                }
                Ok(SessionEvent::StateChanged(ConnectionState::Disconnected)) => {
                    println!("-- connection lost, reconnecting --");
                }
                Ok(SessionEvent::StateChanged(state)) => info!(?state, "connection state"),
                Ok(SessionEvent::Terminated(ExitReason::ReconnectExhausted)) => {
                    eprintln!("connection could not be re-established; leaving the room");
                    break;
                }
                Ok(SessionEvent::Terminated(ExitReason::Closed)) | Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close().await;
    Ok(())
}

fn print_message(message: &ChatMessage) {
    let read = if message.read { " ✓" } else { "" };
    println!(
        "[{}] {}: {}{read}",
        message.timestamp.format("%H:%M"),
        message.sender_name,
        message.content
    );
}
