use shared::{
    domain::{UserId, UNKNOWN_SENDER},
    protocol::StoredMessage,
};
use tracing::debug;

use crate::{
    cipher::CipherEngine,
    types::{ContentState, DisplayMessage, SenderDirectory},
};

pub struct NormalizeContext<'a> {
    pub current_user_id: UserId,
    pub directory: &'a SenderDirectory,
}

/// Turns a stored record into what the viewer sees.
///
/// A record that fails to decrypt still renders, carrying its raw
/// ciphertext and [`ContentState::Undecryptable`].
pub fn normalize(
    message: &StoredMessage,
    ctx: &NormalizeContext<'_>,
    engine: Option<&CipherEngine>,
) -> DisplayMessage {
    let (content, content_state) = match (message.encrypted, engine) {
        (true, Some(engine)) => match engine.decrypt(&message.content) {
            Ok(plaintext) => (plaintext, ContentState::Decrypted),
            Err(err) => {
                debug!(
                    message_id = message.message_id.0,
                    room_id = message.room_id.0,
                    %err,
                    "message did not decrypt; showing ciphertext"
                );
                (message.content.clone(), ContentState::Undecryptable)
            }
        },
        (true, None) => (message.content.clone(), ContentState::Locked),
        (false, _) => (message.content.clone(), ContentState::Plain),
    };

    DisplayMessage {
        message_id: message.message_id,
        content,
        sender_id: message.sender_id,
        sender_display_name: display_name(message, ctx.directory),
        timestamp: message.created_at,
        was_encrypted: message.encrypted,
        is_own: message.sender_id == ctx.current_user_id,
        content_state,
    }
}

fn display_name(message: &StoredMessage, directory: &SenderDirectory) -> String {
    message
        .sender_username
        .as_deref()
        .filter(|name| !name.is_empty())
        .or_else(|| directory.get(message.sender_id))
        .unwrap_or(UNKNOWN_SENDER)
        .to_string()
}

#[cfg(test)]
#[path = "tests/normalizer_tests.rs"]
mod tests;
