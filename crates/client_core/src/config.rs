use std::{fs, time::Duration};

use serde::Deserialize;
use tracing::warn;

use crate::reconciler::{DEFAULT_EVENT_CAPACITY, DEFAULT_RECONCILE_INTERVAL};

const SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: String,
    pub reconcile_interval: Duration,
    pub event_capacity: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8443".into(),
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    reconcile_secs: Option<u64>,
    event_capacity: Option<usize>,
}

/// Defaults, then `client.toml` in the working directory, then `ENCHAT_*`
/// environment variables.
pub fn load_client_settings() -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        settings = apply_file_overrides(settings, &raw);
    }

    apply_env_overrides(settings, |key| std::env::var(key).ok())
}

pub(crate) fn apply_file_overrides(mut settings: ClientSettings, raw: &str) -> ClientSettings {
    let file_cfg = match toml::from_str::<FileSettings>(raw) {
        Ok(cfg) => cfg,
        Err(error) => {
            warn!(%error, file = SETTINGS_FILE, "ignoring unreadable settings file");
            return settings;
        }
    };

    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file_cfg.reconcile_secs {
        settings.reconcile_interval = Duration::from_secs(v.max(1));
    }
    if let Some(v) = file_cfg.event_capacity {
        settings.event_capacity = v.max(1);
    }
    settings
}

pub(crate) fn apply_env_overrides<F>(mut settings: ClientSettings, lookup: F) -> ClientSettings
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("ENCHAT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = lookup("ENCHAT_RECONCILE_SECS").and_then(|v| v.parse::<u64>().ok()) {
        settings.reconcile_interval = Duration::from_secs(v.max(1));
    }
    if let Some(v) = lookup("ENCHAT_EVENT_CAPACITY").and_then(|v| v.parse::<usize>().ok()) {
        settings.event_capacity = v.max(1);
    }
    settings
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
