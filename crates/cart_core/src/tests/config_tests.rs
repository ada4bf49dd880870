use super::*;

use std::{
    env,
    time::{SystemTime, UNIX_EPOCH},
};

fn temp_file(label: &str, contents: &str) -> std::path::PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("cart_sync_config_{label}_{suffix}.toml"));
    fs::write(&path, contents).expect("write config");
    path
}

#[test]
fn missing_file_yields_defaults() {
    let settings = load_settings_from(Path::new("/nonexistent/cart_sync.toml"), Vec::new());
    assert_eq!(settings, SyncSettings::default());
    assert_eq!(settings.persist_debounce(), Duration::from_millis(500));
}

#[test]
fn file_values_override_defaults_and_keep_the_rest() {
    let path = temp_file("file", "max_quantity_per_item = 10\ntrim_to_items = 5\n");
    let settings = load_settings_from(&path, Vec::new());
    assert_eq!(settings.max_quantity_per_item, 10);
    assert_eq!(settings.trim_to_items, 5);
    assert_eq!(settings.persist_debounce_ms, 500);
    fs::remove_file(path).expect("cleanup");
}

#[test]
fn environment_wins_over_file() {
    let path = temp_file("env", "persist_debounce_ms = 900\n");
    let settings = load_settings_from(
        &path,
        vec![
            ("CART_SYNC__PERSIST_DEBOUNCE_MS".to_string(), "250".to_string()),
            (
                "CART_SYNC__LOW_VALUE_KEYS".to_string(),
                "metrics, logs".to_string(),
            ),
            ("UNRELATED".to_string(), "1".to_string()),
        ],
    );
    assert_eq!(settings.persist_debounce_ms, 250);
    assert_eq!(settings.low_value_keys, vec!["metrics", "logs"]);
    fs::remove_file(path).expect("cleanup");
}

#[test]
fn invalid_values_are_ignored() {
    let path = temp_file("invalid", "this is not toml = = =");
    let settings = load_settings_from(
        &path,
        vec![("CART_SYNC__MAX_QUEUE_ATTEMPTS".to_string(), "many".to_string())],
    );
    assert_eq!(settings, SyncSettings::default());
    fs::remove_file(path).expect("cleanup");
}
