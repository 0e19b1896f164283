//! Idle-Entry Expiration
//!
//! A per-map timer that sweeps entries whose last access aged past the
//! configured idle TTL. Each victim loses its value, access-time row,
//! version, and both timestamp rows, then `expired` and `remove` fire in
//! that order. The timer runs until the engine shuts down; failures end a
//! tick after one log line, never the timer.

use crate::clock;
use crate::error::Result;
use crate::events::EntryEvent;
use crate::map::MapInner;
use crate::traits::RangeOrder;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Start the expiration timer for one map.
pub(crate) fn spawn_reaper<K, V>(
    map: Arc<MapInner<K, V>>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = sweep_once(&map).await {
                        // A store failure ends the tick, never the timer.
                        debug!(map = %map.name, "expiration sweep aborted: {error}");
                    }
                }
                _ = shutdown.recv() => {
                    debug!(map = %map.name, "expiration timer stopped");
                    break;
                }
            }
        }
    })
}

/// One sweep: collect candidates past the idle threshold and reap each one,
/// tolerating per-candidate failures.
async fn sweep_once<K, V>(map: &MapInner<K, V>) -> Result<()>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let Some(ttl) = map.meta.item_ttl().await? else {
        return Ok(());
    };

    #[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
    let threshold = (clock::now_unix_secs() - ttl.as_secs() as i64) as f64;
    let keys = map.meta.keys();
    let candidates = map
        .store
        .sorted_set_range_by_score(
            &keys.access_time,
            f64::NEG_INFINITY,
            threshold,
            false,
            RangeOrder::Ascending,
        )
        .await?;

    if candidates.is_empty() {
        return Ok(());
    }
    debug!(map = %map.name, count = candidates.len(), "reaping idle entries");

    for field in candidates {
        if let Err(error) = reap_candidate(map, &field).await {
            warn!(map = %map.name, field = %field, "failed to reap idle entry: {error}");
        }
    }
    Ok(())
}

/// Reap one candidate field, if it still holds a value.
async fn reap_candidate<K, V>(map: &MapInner<K, V>, field: &str) -> Result<()>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let keys = map.meta.keys();

    let Some(raw) = map.store.hash_get(&keys.values, field).await? else {
        // Value already gone: drop the stray access-time row.
        map.store.sorted_set_remove(&keys.access_time, field).await?;
        return Ok(());
    };

    // An undecodable key cannot be announced to handlers; leave it alone.
    let Ok(key) = map.key_codec.decode(field) else {
        warn!(map = %map.name, field = %field, "key failed to round-trip, not reaping");
        return Ok(());
    };

    map.store.hash_delete(&keys.values, field).await?;
    map.store.sorted_set_remove(&keys.access_time, field).await?;
    map.meta.remove_entry(field).await?;
    map.stats.expired_removals.fetch_add(1, Ordering::Relaxed);

    match map.value_codec.deserialize(&raw) {
        Ok(value) => {
            map.events.emit_entry(EntryEvent::Expired, &key, &value).await;
            map.events.emit_entry(EntryEvent::Removed, &key, &value).await;
            map.recycle(value);
        }
        Err(error) => {
            // Entry is past its TTL either way; it is gone, just unannounced.
            warn!(map = %map.name, field = %field, "expired value failed to decode, events skipped: {error}");
        }
    }
    Ok(())
}
