use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_SETTINGS_FILE: &str = "cart_sync.toml";
const ENV_PREFIX: &str = "CART_SYNC__";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub max_quantity_per_item: u32,
    pub persist_debounce_ms: u64,
    pub max_snapshot_bytes: usize,
    pub max_snapshot_items: usize,
    pub trim_to_items: usize,
    pub quota_retry_items: usize,
    pub max_queue_attempts: u32,
    pub snapshot_key: String,
    pub queue_key: String,
    pub low_value_keys: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_quantity_per_item: 99,
            persist_debounce_ms: 500,
            max_snapshot_bytes: 100 * 1024,
            max_snapshot_items: 50,
            trim_to_items: 20,
            quota_retry_items: 10,
            max_queue_attempts: 5,
            snapshot_key: "cart.snapshot".into(),
            queue_key: "cart.offline_queue".into(),
            low_value_keys: vec![
                "analytics.events".into(),
                "analytics.session".into(),
                "error_log".into(),
                "crash_reports".into(),
            ],
        }
    }
}

impl SyncSettings {
    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }
}

/// Defaults, then `cart_sync.toml` in the working directory, then environment.
pub fn load_settings() -> SyncSettings {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE), std::env::vars())
}

pub fn load_settings_from(
    path: &Path,
    env: impl IntoIterator<Item = (String, String)>,
) -> SyncSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => match toml::from_str::<SyncSettings>(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("config: ignoring unparsable {}: {err}", path.display());
                SyncSettings::default()
            }
        },
        Err(_) => SyncSettings::default(),
    };

    for (key, value) in env {
        let Some(name) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        apply_env_override(&mut settings, &name.to_ascii_lowercase(), &value);
    }

    settings
}

fn apply_env_override(settings: &mut SyncSettings, name: &str, value: &str) {
    fn parse<T: std::str::FromStr>(name: &str, value: &str, slot: &mut T) {
        match value.trim().parse::<T>() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!("config: ignoring invalid value for {name}: {value}"),
        }
    }

    match name {
        "max_quantity_per_item" => parse(name, value, &mut settings.max_quantity_per_item),
        "persist_debounce_ms" => parse(name, value, &mut settings.persist_debounce_ms),
        "max_snapshot_bytes" => parse(name, value, &mut settings.max_snapshot_bytes),
        "max_snapshot_items" => parse(name, value, &mut settings.max_snapshot_items),
        "trim_to_items" => parse(name, value, &mut settings.trim_to_items),
        "quota_retry_items" => parse(name, value, &mut settings.quota_retry_items),
        "max_queue_attempts" => parse(name, value, &mut settings.max_queue_attempts),
        "snapshot_key" => settings.snapshot_key = value.to_string(),
        "queue_key" => settings.queue_key = value.to_string(),
        "low_value_keys" => {
            settings.low_value_keys = value
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect();
        }
        other => warn!("config: unknown setting {other}"),
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
