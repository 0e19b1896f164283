//! Core map operations: get/set/clear semantics, event emission, handler
//! isolation, TTL configuration, and registry behaviour.

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use typed_map_cache::{BackingStore, MapError};

#[tokio::test]
async fn create_read_update_fires_add_then_update() {
    let registry = registry();
    let map = registry
        .create_json::<String, String>("u", None)
        .await
        .unwrap();

    let log = EventLog::new();
    let l = log.clone();
    map.on_add(move |key, value| {
        let l = l.clone();
        async move {
            l.push(format!("add:{key}={value}"));
            Ok(())
        }
    });
    let l = log.clone();
    map.on_update(move |key, value| {
        let l = l.clone();
        async move {
            l.push(format!("update:{key}={value}"));
            Ok(())
        }
    });

    map.set(&"a".to_string(), &"x".to_string()).await.unwrap();
    assert_eq!(map.get(&"a".to_string()).await.unwrap(), Some("x".to_string()));
    assert_eq!(log.count_prefix("add:"), 1);
    assert_eq!(log.count_prefix("update:"), 0);

    let first_version = map.all_entries().await.unwrap().remove(0).version;

    map.set(&"a".to_string(), &"y".to_string()).await.unwrap();
    assert_eq!(map.get(&"a".to_string()).await.unwrap(), Some("y".to_string()));
    assert_eq!(log.count_prefix("add:"), 1);
    assert_eq!(log.count_prefix("update:"), 1);

    let second_version = map.all_entries().await.unwrap().remove(0).version;
    assert_ne!(first_version, second_version);

    registry.shutdown();
}

#[tokio::test]
async fn get_on_missing_key_is_a_miss() {
    let registry = registry();
    let map = registry
        .create_json::<String, u64>("counts", None)
        .await
        .unwrap();

    assert_eq!(map.get(&"missing".to_string()).await.unwrap(), None);
    let stats = map.stats();
    assert_eq!(stats.reads, 1);
    assert_eq!(stats.read_hits, 0);

    registry.shutdown();
}

#[tokio::test]
async fn failing_middle_handler_is_invisible_to_the_writer() {
    let registry = registry();
    let map = registry
        .create_json::<String, String>("orders", None)
        .await
        .unwrap();

    let log = EventLog::new();
    let l = log.clone();
    map.on_update(move |_, _| {
        let l = l.clone();
        async move {
            l.push("first");
            Ok(())
        }
    });
    map.on_update(|_, _| async { anyhow::bail!("subscriber exploded") });
    let l = log.clone();
    map.on_update(move |_, _| {
        let l = l.clone();
        async move {
            l.push("third");
            Ok(())
        }
    });

    map.set(&"k".to_string(), &"v1".to_string()).await.unwrap();
    // The second write is the update; it must succeed despite the throw.
    map.set(&"k".to_string(), &"v2".to_string()).await.unwrap();

    assert_eq!(log.snapshot(), vec!["first", "third"]);
    assert_eq!(map.stats().handler_errors, 1);

    registry.shutdown();
}

#[tokio::test]
async fn clear_removes_all_four_metadata_families() {
    let (registry, store) = registry_with_store();
    let name = test_map_name("clearable");
    let map = registry
        .create_json::<String, String>(&name, Some(Duration::from_secs(300)))
        .await
        .unwrap();

    let log = EventLog::new();
    let l = log.clone();
    map.on_clear(move || {
        let l = l.clone();
        async move {
            l.push("clear");
            Ok(())
        }
    });

    for i in 0..3 {
        map.set(&format!("k{i}"), &format!("v{i}")).await.unwrap();
    }
    // Seed a last-batch marker so its survival is observable.
    store
        .string_set(&format!("map:{name}:__meta:timestamps:last-batch"), b"12345")
        .await
        .unwrap();

    map.clear().await.unwrap();

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
    assert_eq!(
        store
            .sorted_set_len(&format!("map:{name}:access-time"))
            .await
            .unwrap(),
        0
    );

    // TTL configuration and the last-batch marker survive a clear.
    assert_eq!(map.item_ttl().await.unwrap(), Some(Duration::from_secs(300)));
    assert_eq!(
        store
            .string_get(&format!("map:{name}:__meta:timestamps:last-batch"))
            .await
            .unwrap(),
        Some(b"12345".to_vec())
    );

    // Clearing again is a no-op apart from the event.
    map.clear().await.unwrap();
    assert_eq!(log.count_prefix("clear"), 2);

    registry.shutdown();
}

#[tokio::test]
async fn ttl_config_round_trips_through_the_handle() {
    let registry = registry();
    let map = registry
        .create_json::<String, String>("sessions", None)
        .await
        .unwrap();

    assert_eq!(map.item_ttl().await.unwrap(), None);
    map.set_item_ttl(Some(Duration::from_secs(120))).await.unwrap();
    assert_eq!(map.item_ttl().await.unwrap(), Some(Duration::from_secs(120)));
    map.set_item_ttl(None).await.unwrap();
    assert_eq!(map.item_ttl().await.unwrap(), None);

    registry.shutdown();
}

#[tokio::test]
async fn registry_enforces_names_and_types() {
    let registry = registry();
    let _map = registry
        .create_json::<String, String>("accounts", None)
        .await
        .unwrap();

    // Unknown names are rejected.
    assert!(matches!(
        registry.get::<String, String>("nope"),
        Err(MapError::MapNotRegistered(_))
    ));

    // Type conflicts are rejected, on retrieval and on re-registration.
    assert!(matches!(
        registry.get::<String, u64>("accounts"),
        Err(MapError::MapTypeMismatch { .. })
    ));
    assert!(matches!(
        registry.create_json::<u64, String>("accounts", None).await,
        Err(MapError::MapTypeMismatch { .. })
    ));

    // Names must be non-empty ASCII.
    assert!(matches!(
        registry.create_json::<String, String>("", None).await,
        Err(MapError::InvalidMapName(_))
    ));
    assert!(matches!(
        registry.create_json::<String, String>("ключ", None).await,
        Err(MapError::InvalidMapName(_))
    ));

    registry.shutdown();
}

#[tokio::test]
async fn same_name_same_types_shares_one_engine() {
    let registry = registry();
    let first = registry
        .create_json::<String, String>("shared", None)
        .await
        .unwrap();
    let second = registry
        .create_json::<String, String>("shared", None)
        .await
        .unwrap();
    let third = registry.get::<String, String>("shared").unwrap();

    first.set(&"k".to_string(), &"v".to_string()).await.unwrap();
    assert_eq!(second.get(&"k".to_string()).await.unwrap(), Some("v".to_string()));
    assert_eq!(third.get(&"k".to_string()).await.unwrap(), Some("v".to_string()));

    registry.shutdown();
}

#[tokio::test]
async fn shutdown_cancels_subsequent_operations() {
    let registry = registry();
    let map = registry
        .create_json::<String, String>("doomed", None)
        .await
        .unwrap();

    map.set(&"k".to_string(), &"v".to_string()).await.unwrap();
    registry.shutdown();

    assert!(matches!(
        map.get(&"k".to_string()).await,
        Err(MapError::Cancelled)
    ));
    assert!(matches!(
        map.set(&"k".to_string(), &"v".to_string()).await,
        Err(MapError::Cancelled)
    ));
}

#[tokio::test]
async fn buckets_hold_a_single_value() {
    let registry = registry();
    let bucket = registry
        .create_bucket::<String>("banner", Arc::new(typed_map_cache::JsonCodec))
        .unwrap();

    assert_eq!(bucket.get().await.unwrap(), None);
    bucket.set(&"maintenance at noon".to_string()).await.unwrap();
    assert_eq!(
        bucket.get().await.unwrap(),
        Some("maintenance at noon".to_string())
    );
    bucket.clear().await.unwrap();
    assert_eq!(bucket.get().await.unwrap(), None);

    // Re-registration with another value type is a mismatch.
    assert!(matches!(
        registry.create_bucket::<u64>("banner", Arc::new(typed_map_cache::JsonCodec)),
        Err(MapError::MapTypeMismatch { .. })
    ));

    // A bucket name cannot collide with a map name.
    let _map = registry
        .create_json::<String, String>("taken", None)
        .await
        .unwrap();
    assert!(matches!(
        registry.create_bucket::<String>("taken", Arc::new(typed_map_cache::JsonCodec)),
        Err(MapError::MapTypeMismatch { .. })
    ));

    registry.shutdown();
}
