use super::*;
use base64::Engine as _;
use chrono::Utc;
use shared::domain::RoomId;

fn room_with_key(key: Option<&str>) -> Room {
    Room {
        room_id: RoomId(1),
        name: "lobby".to_string(),
        created_at: Utc::now(),
        encryption_key: key.map(str::to_string),
    }
}

#[test]
fn room_key_present_only_for_non_empty_keys() {
    assert!(room_key(&room_with_key(None)).is_none());
    assert!(room_key(&room_with_key(Some(""))).is_none());

    let key = room_key(&room_with_key(Some("opaque"))).expect("key");
    assert_eq!(key.expose_secret(), "opaque");
}

#[test]
fn generated_keys_are_256_bit_and_unique() {
    let first = generate_room_key();
    let second = generate_room_key();
    assert_ne!(first, second);

    let decoded = URL_SAFE_NO_PAD
        .decode(first.expose_secret())
        .expect("url-safe base64");
    assert_eq!(decoded.len(), 32);
}

#[test]
fn debug_output_redacts_secret() {
    let key = RoomKey::new("super-secret-value");
    let rendered = format!("{key:?}");
    assert!(!rendered.contains("super-secret-value"));
}
