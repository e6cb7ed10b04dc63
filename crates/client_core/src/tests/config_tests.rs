use super::*;

use std::collections::HashMap;

#[test]
fn defaults_reconcile_every_ten_seconds() {
    let settings = ClientSettings::default();
    assert_eq!(settings.reconcile_interval, Duration::from_secs(10));
    assert_eq!(settings.server_url, "http://127.0.0.1:8443");
}

#[test]
fn file_settings_override_defaults() {
    let settings = apply_file_overrides(
        ClientSettings::default(),
        r#"
        server_url = "https://chat.example.org"
        reconcile_secs = 0
        "#,
    );
    assert_eq!(settings.server_url, "https://chat.example.org");
    assert_eq!(settings.reconcile_interval, Duration::from_secs(1));
    assert_eq!(settings.event_capacity, ClientSettings::default().event_capacity);
}

#[test]
fn unreadable_settings_file_keeps_defaults() {
    let settings = apply_file_overrides(ClientSettings::default(), "server_url = [");
    assert_eq!(settings, ClientSettings::default());
}

#[test]
fn env_overrides_win_and_ignore_garbage() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("ENCHAT_SERVER_URL", "http://10.0.0.2:9000"),
        ("ENCHAT_RECONCILE_SECS", "3"),
        ("ENCHAT_EVENT_CAPACITY", "lots"),
    ]);
    let settings = apply_env_overrides(ClientSettings::default(), |key| {
        vars.get(key).map(|v| v.to_string())
    });
    assert_eq!(settings.server_url, "http://10.0.0.2:9000");
    assert_eq!(settings.reconcile_interval, Duration::from_secs(3));
    assert_eq!(settings.event_capacity, ClientSettings::default().event_capacity);
}
