use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use client_core::generate_room_key;
use shared::domain::RoomId;
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/enchat.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateUser {
        username: String,
    },
    CreateRoom {
        name: String,
        #[arg(long)]
        encrypted: bool,
    },
    ListRooms,
    DeleteRoom {
        room_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateUser { username } => {
            let user_id = storage.create_user(username.trim()).await?;
            println!("user_id={}", user_id.0);
        }
        Command::CreateRoom { name, encrypted } => {
            let name = name.trim();
            if name.is_empty() {
                bail!("room name must not be empty");
            }
            let key = encrypted.then(generate_room_key);
            let room = storage
                .create_room(name, key.as_ref().map(|k| k.expose_secret()))
                .await?;
            println!(
                "created room_id={} encrypted={}",
                room.room_id.0,
                room.is_encrypted()
            );
        }
        Command::ListRooms => {
            for room in storage.list_rooms().await? {
                let lock = if room.is_encrypted() { "locked" } else { "open" };
                println!(
                    "{}\t{}\t{}\t{}",
                    room.room_id.0,
                    lock,
                    room.created_at.to_rfc3339(),
                    room.name
                );
            }
        }
        Command::DeleteRoom { room_id } => {
            if !storage.delete_room(RoomId(room_id)).await? {
                bail!("room {room_id} not found");
            }
            println!("deleted room_id={room_id}");
        }
    }

    Ok(())
}
