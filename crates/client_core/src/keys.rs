use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chacha20poly1305::aead::{rand_core::RngCore, OsRng};
use shared::protocol::Room;
use zeroize::{Zeroize, Zeroizing};

const ROOM_KEY_BYTES: usize = 32;

/// Opaque per-room secret as stored on the room record.
#[derive(Clone, PartialEq, Eq)]
pub struct RoomKey(String);

impl RoomKey {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RoomKey(<redacted>)")
    }
}

impl Drop for RoomKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Returns the room's key when it has a non-empty one.
pub fn room_key(room: &Room) -> Option<RoomKey> {
    room.encryption_key
        .as_deref()
        .filter(|key| !key.is_empty())
        .map(RoomKey::new)
}

/// Fresh 256-bit key from the OS CSPRNG, encoded as URL-safe base64.
pub fn generate_room_key() -> RoomKey {
    let mut bytes = Zeroizing::new([0u8; ROOM_KEY_BYTES]);
    OsRng.fill_bytes(&mut bytes[..]);
    RoomKey(URL_SAFE_NO_PAD.encode(&bytes[..]))
}

#[cfg(test)]
#[path = "tests/keys_tests.rs"]
mod tests;
