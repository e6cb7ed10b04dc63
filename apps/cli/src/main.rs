use std::{collections::HashSet, sync::Arc};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use client_core::{
    load_client_settings, ContentState, DisplayMessage, FeedEvent, FeedOptions, FeedState,
    HttpBackend, LiveFeed, RoomDirectory, SendError, WsNotifier,
};
use shared::domain::{MessageId, RoomId};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::{self, error::RecvError},
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Overrides `server_url` from client.toml / ENCHAT_SERVER_URL.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    username: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Rooms,
    CreateRoom {
        name: String,
        #[arg(long)]
        encrypted: bool,
    },
    DeleteRoom {
        room_id: i64,
    },
    /// Joins a room and chats over stdin. `/refresh`, `/encrypt on|off` and
    /// `/quit` are handled locally.
    Chat {
        room_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_client_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }

    let backend = Arc::new(HttpBackend::new(&settings.server_url)?);
    let session = backend.login(&args.username).await?;
    println!("Logged in as {} (user_id={})", session.username, session.user_id);

    let rooms = RoomDirectory::new(backend.clone());
    match args.command {
        Command::Rooms => {
            for room in rooms.list_rooms().await? {
                let marker = if room.is_encrypted() { "🔒" } else { "  " };
                println!("{marker} {:>5}  {}", room.room_id.0, room.name);
            }
        }
        Command::CreateRoom { name, encrypted } => {
            let room = rooms.create_room(&name, encrypted).await?;
            println!("created room {} ({})", room.room_id.0, room.name);
        }
        Command::DeleteRoom { room_id } => {
            rooms.delete_room(RoomId(room_id)).await?;
            println!("deleted room {room_id}");
        }
        Command::Chat { room_id } => {
            let room = rooms
                .list_rooms()
                .await?
                .into_iter()
                .find(|room| room.room_id.0 == room_id)
                .ok_or_else(|| anyhow!("room {room_id} not found"))?;
            let feed = LiveFeed::new(
                backend.clone(),
                backend.clone(),
                Arc::new(WsNotifier::new(&settings.server_url)?),
                FeedOptions::from(&settings),
            );
            chat(&feed, room).await?;
            feed.close().await;
            backend.logout();
        }
    }

    Ok(())
}

async fn chat(feed: &LiveFeed, room: shared::protocol::Room) -> Result<()> {
    let mut events = feed.subscribe_events();
    let printer = tokio::spawn(async move {
        let mut printed: HashSet<MessageId> = HashSet::new();
        while let Some(event) = next_event(&mut events).await {
            match event {
                FeedEvent::MessagesUpdated(messages) => {
                    for message in messages {
                        if printed.insert(message.message_id) {
                            print_message(&message);
                        }
                    }
                }
                FeedEvent::StateChanged(FeedState::Closed) => break,
                FeedEvent::StateChanged(_) => {}
                FeedEvent::Error(message) => eprintln!("! {message}"),
            }
        }
    });

    println!(
        "Joined {} ({})",
        room.name,
        if room.is_encrypted() {
            "encrypted"
        } else {
            "unencrypted"
        }
    );
    feed.enter_room(room).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" => break,
            "/refresh" => {
                if let Err(err) = feed.refresh_now().await {
                    eprintln!("! refresh failed: {err}");
                }
            }
            "/encrypt on" | "/encrypt off" => {
                let enabled = line.trim().ends_with("on");
                match feed.set_encryption(enabled).await {
                    Ok(()) => println!("encryption {}", if enabled { "on" } else { "off" }),
                    Err(err) => eprintln!("! {err}"),
                }
            }
            _ => match feed.send_message(&line).await {
                Ok(_) | Err(SendError::Empty) => {}
                Err(err) => {
                    warn!(%err, "send failed");
                    if let Some(draft) = err.draft() {
                        eprintln!("! not sent, your message was: {draft}");
                    }
                }
            },
        }
    }

    printer.abort();
    Ok(())
}

/// Next feed event, skipping over a lag. Every `MessagesUpdated` carries the
/// whole feed, so the next one received makes up for anything dropped.
async fn next_event(events: &mut broadcast::Receiver<FeedEvent>) -> Option<FeedEvent> {
    loop {
        match events.recv().await {
            Ok(event) => return Some(event),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "chat display fell behind"),
            Err(RecvError::Closed) => return None,
        }
    }
}

fn print_message(message: &DisplayMessage) {
    let badge = match message.content_state {
        ContentState::Plain => "",
        ContentState::Decrypted => "[e2e] ",
        ContentState::Undecryptable => "[undecryptable] ",
        ContentState::Locked => "[locked] ",
    };
    let who = if message.is_own {
        "you"
    } else {
        message.sender_display_name.as_str()
    };
    println!(
        "{} {who}: {badge}{}",
        message.timestamp.format("%H:%M"),
        message.content
    );
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
