use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    ChaCha20Poly1305, Key, Nonce,
};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::keys::RoomKey;

const ENVELOPE_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + SALT_LEN + NONCE_LEN;
const MESSAGE_KEY_LEN: usize = 32;
const MESSAGE_KEY_INFO: &[u8] = b"enchat/room-message/v1";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("ciphertext is malformed: {0}")]
    Malformed(&'static str),
    #[error("ciphertext failed authentication")]
    Authentication,
    #[error("decrypted content is not valid UTF-8")]
    InvalidUtf8,
}

/// Symmetric cipher bound to a single room key.
///
/// Each message gets its own random salt and nonce. The message key is
/// HKDF-SHA256 over the room key with that salt, so two encryptions of the
/// same text never produce the same output. The wire form is standard
/// base64 of `version || salt || nonce || ciphertext+tag`.
pub struct CipherEngine {
    key: RoomKey,
}

impl CipherEngine {
    pub fn new(key: &RoomKey) -> Self {
        Self { key: key.clone() }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let cipher = self.message_cipher(&salt)?;
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CipherError::Authentication)?;

        let mut envelope = Vec::with_capacity(HEADER_LEN + sealed.len());
        envelope.push(ENVELOPE_VERSION);
        envelope.extend_from_slice(&salt);
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&sealed);
        Ok(STANDARD.encode(envelope))
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError> {
        let envelope = STANDARD
            .decode(ciphertext.trim())
            .map_err(|_| CipherError::Malformed("not base64"))?;
        if envelope.len() < HEADER_LEN + TAG_LEN {
            return Err(CipherError::Malformed("too short"));
        }
        if envelope[0] != ENVELOPE_VERSION {
            return Err(CipherError::Malformed("unknown version"));
        }

        let salt = &envelope[1..1 + SALT_LEN];
        let nonce = &envelope[1 + SALT_LEN..HEADER_LEN];
        let cipher = self.message_cipher(salt)?;
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(nonce), &envelope[HEADER_LEN..])
                .map_err(|_| CipherError::Authentication)?,
        );

        String::from_utf8(plaintext.to_vec()).map_err(|_| CipherError::InvalidUtf8)
    }

    fn message_cipher(&self, salt: &[u8]) -> Result<ChaCha20Poly1305, CipherError> {
        let hk = hkdf::Hkdf::<sha2::Sha256>::new(Some(salt), self.key.expose_secret().as_bytes());
        let mut okm = Zeroizing::new([0u8; MESSAGE_KEY_LEN]);
        hk.expand(MESSAGE_KEY_INFO, &mut okm[..])
            .map_err(|_| CipherError::Malformed("key expansion failed"))?;
        Ok(ChaCha20Poly1305::new(Key::from_slice(&okm[..])))
    }
}

#[cfg(test)]
#[path = "tests/cipher_tests.rs"]
mod tests;
