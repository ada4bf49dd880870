use super::*;

#[tokio::test]
async fn stores_and_reads_back_values() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.set("cart.snapshot", b"payload").await.expect("set");
    let value = storage.get("cart.snapshot").await.expect("get");
    assert_eq!(value.as_deref(), Some(&b"payload"[..]));
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn overwrites_existing_key() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.set("k", b"first").await.expect("first");
    storage.set("k", b"second").await.expect("second");
    assert_eq!(
        storage.get("k").await.expect("get").as_deref(),
        Some(&b"second"[..])
    );
    assert_eq!(storage.keys().await.expect("keys"), vec!["k".to_string()]);
}

#[tokio::test]
async fn missing_key_reads_as_none_and_remove_is_idempotent() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    assert!(storage.get("absent").await.expect("get").is_none());
    storage.remove("absent").await.expect("remove");
}

#[tokio::test]
async fn rejects_writes_beyond_quota() {
    let storage = Storage::with_quota("sqlite::memory:", Some(16))
        .await
        .expect("db");
    storage.set("a", &[0u8; 10]).await.expect("fits");

    let err = storage
        .set("b", &[0u8; 10])
        .await
        .expect_err("over quota");
    assert!(err.is_quota_exceeded());

    // Replacing a key only counts the new value against the quota.
    storage.set("a", &[0u8; 16]).await.expect("replace fits");
    assert_eq!(storage.used_bytes().await.expect("used"), 16);
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("cart_sync_storage_test_{suffix}"));
    let db_path = temp_root.join("nested").join("storage.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}

#[tokio::test]
async fn memory_store_enforces_quota_and_counts_writes() {
    let store = MemoryStore::with_quota(8);
    store.set("a", b"1234").await.expect("fits");
    let err = store.set("b", b"123456").await.expect_err("over quota");
    assert!(matches!(
        err,
        StoreError::QuotaExceeded {
            requested: 6,
            available: 4,
            ..
        }
    ));
    assert_eq!(store.write_count(), 1);

    store.remove("a").await.expect("remove");
    store.set("b", b"123456").await.expect("fits after cleanup");
    assert_eq!(store.used_bytes().await, 6);

    store.set_quota(None).await;
    store.set("c", &[0u8; 64]).await.expect("unbounded");
    assert!(store.contains("c").await);
}

#[test]
fn memory_urls_have_no_filesystem_path() {
    assert!(sqlite_path("sqlite::memory:").is_none());
    assert_eq!(
        sqlite_path("sqlite://./data/cart.db?mode=rwc"),
        Some(PathBuf::from("./data/cart.db"))
    );
}
