//! Idle-TTL expiry: reaping after the configured idle duration, the
//! `expired`-before-`remove` event order, and life extension on read.

mod common;

use common::*;
use std::time::Duration;
use typed_map_cache::{BackingStore, MapOptions};

fn reaping_options(ttl_secs: u64) -> MapOptions {
    MapOptions {
        item_ttl: Some(Duration::from_secs(ttl_secs)),
        reap_tick: Duration::from_millis(50),
        ..fast_options()
    }
}

#[tokio::test]
async fn idle_entry_expires_with_ordered_events() {
    let (registry, store) = registry_with_store();
    let name = test_map_name("sessions");
    let map = registry
        .create_with_options::<String, String>(
            &name,
            std::sync::Arc::new(typed_map_cache::JsonCodec),
            reaping_options(2),
        )
        .await
        .unwrap();

    let log = EventLog::new();
    let l = log.clone();
    map.on_expired(move |key, value| {
        let l = l.clone();
        async move {
            l.push(format!("expired:{key}={value}"));
            Ok(())
        }
    });
    let l = log.clone();
    map.on_remove(move |key, value| {
        let l = l.clone();
        async move {
            l.push(format!("removed:{key}={value}"));
            Ok(())
        }
    });

    map.set(&"a".to_string(), &"v".to_string()).await.unwrap();
    assert_eq!(map.get(&"a".to_string()).await.unwrap(), Some("v".to_string()));

    assert!(
        wait_until(|| log.count_prefix("removed:") == 1, Duration::from_secs(5)).await,
        "entry never expired"
    );

    // `expired` precedes `remove`, each exactly once.
    assert_eq!(log.snapshot(), vec!["expired:a=v", "removed:a=v"]);
    assert_eq!(map.get(&"a".to_string()).await.unwrap(), None);
    assert_eq!(map.stats().expired_removals, 1);

    // Value, version, and both timestamp rows are gone.
    assert_eq!(store.hash_len(&format!("map:{name}")).await.unwrap(), 0);
    assert_eq!(
        store
            .hash_len(&format!("map:{name}:__meta:versions"))
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        store
            .hash_len(&format!("map:{name}:__meta:timestamps"))
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        store
            .sorted_set_len(&format!("map:{name}:__meta:timestamps-sorted"))
            .await
            .unwrap(),
        0
    );

    registry.shutdown();
}

#[tokio::test]
async fn reads_extend_an_entrys_life() {
    let (registry, store) = registry_with_store();
    let name = test_map_name("refresh");
    let map = registry
        .create_with_options::<String, String>(
            &name,
            std::sync::Arc::new(typed_map_cache::JsonCodec),
            reaping_options(2),
        )
        .await
        .unwrap();
    let values_key = format!("map:{name}");

    map.set(&"a".to_string(), &"v".to_string()).await.unwrap();

    // Refresh before the idle deadline; without the read the entry would be
    // reaped shortly after the two-second mark.
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(map.get(&"a".to_string()).await.unwrap(), Some("v".to_string()));
    tokio::time::sleep(Duration::from_millis(1_000)).await;

    // Presence checked through the store, so the probe itself cannot refresh
    // the access time.
    assert_eq!(store.hash_len(&values_key).await.unwrap(), 1);

    // With reads stopped, the entry ages out.
    assert!(
        wait_until_store_empty(&store, &values_key, Duration::from_secs(5)).await,
        "entry never expired after reads stopped"
    );

    registry.shutdown();
}

async fn wait_until_store_empty(
    store: &std::sync::Arc<typed_map_cache::MemoryStore>,
    key: &str,
    timeout: Duration,
) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if store.hash_len(key).await.unwrap() == 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

#[tokio::test]
async fn without_ttl_nothing_is_reaped() {
    let registry = registry();
    let map = registry
        .create_with_options::<String, String>(
            "immortal",
            std::sync::Arc::new(typed_map_cache::JsonCodec),
            fast_options(),
        )
        .await
        .unwrap();

    map.set(&"a".to_string(), &"v".to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(map.get(&"a".to_string()).await.unwrap(), Some("v".to_string()));
    assert_eq!(map.stats().expired_removals, 0);

    registry.shutdown();
}

#[tokio::test]
async fn stray_access_rows_are_cleaned_without_events() {
    let (registry, store) = registry_with_store();
    let name = test_map_name("stray");
    let map = registry
        .create_with_options::<String, String>(
            &name,
            std::sync::Arc::new(typed_map_cache::JsonCodec),
            reaping_options(1),
        )
        .await
        .unwrap();

    let log = EventLog::new();
    let l = log.clone();
    map.on_remove(move |key, _| {
        let l = l.clone();
        async move {
            l.push(format!("removed:{key}"));
            Ok(())
        }
    });

    // An access-time row whose value vanished: the sweep drops the row and
    // announces nothing.
    store
        .sorted_set_add(&format!("map:{name}:access-time"), "\"ghost\"", 1.0)
        .await
        .unwrap();

    let access_key = format!("map:{name}:access-time");
    assert!(
        wait_until_zset_empty(&store, &access_key, Duration::from_secs(5)).await,
        "stray row never cleaned"
    );
    assert_eq!(log.len(), 0);

    registry.shutdown();
}

async fn wait_until_zset_empty(
    store: &std::sync::Arc<typed_map_cache::MemoryStore>,
    key: &str,
    timeout: Duration,
) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if store.sorted_set_len(key).await.unwrap() == 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}
