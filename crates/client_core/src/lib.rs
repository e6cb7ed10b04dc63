//! Client side of the room chat: per-room message encryption and a live,
//! self-healing message feed.

pub mod backend;
pub mod cipher;
pub mod config;
pub mod feed;
pub mod http;
pub mod keys;
pub mod normalizer;
pub mod reconciler;
pub mod rooms;
pub mod types;
pub mod ws;

pub use backend::{AuthProvider, ChatStore, LiveNotifier, Subscription};
pub use cipher::{CipherEngine, CipherError};
pub use config::{load_client_settings, ClientSettings};
pub use feed::MessageFeed;
pub use http::HttpBackend;
pub use keys::{generate_room_key, room_key, RoomKey};
pub use normalizer::{normalize, NormalizeContext};
pub use reconciler::{FeedError, FeedEvent, FeedOptions, FeedState, LiveFeed, SendError};
pub use rooms::{RoomDirectory, RoomError};
pub use types::{ContentState, DisplayMessage, SenderDirectory};
pub use ws::WsNotifier;
