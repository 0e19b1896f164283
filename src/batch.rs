//! Deferred Batch-Update Notifications
//!
//! A per-map timer that coalesces frequent writes: an entry joins a batch
//! once its last write has rested a full batch window, and downstream
//! consumers see one notification per window instead of one per mutation.
//!
//! Two algorithms coexist. The optimised one runs a score-range sweep over
//! the timestamp sorted set and is selected whenever that set exists; the
//! legacy one loads the whole timestamp hash and filters it, and keeps old
//! deployments working until they migrate.

use crate::clock;
use crate::error::Result;
use crate::map::MapInner;
use crate::traits::RangeOrder;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Start the batch-update timer for one map.
pub(crate) fn spawn_notifier<K, V>(
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
                    if let Err(error) = emit_due_batch(&map).await {
                        debug!(map = %map.name, "batch tick aborted: {error}");
                    }
                }
                _ = shutdown.recv() => {
                    debug!(map = %map.name, "batch timer stopped");
                    break;
                }
            }
        }
    })
}

/// One tick: find entries whose last write aged past the batch window,
/// advance the last-batch marker, and notify subscribers once.
async fn emit_due_batch<K, V>(map: &MapInner<K, V>) -> Result<()>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let keys = map.meta.keys();
    let now = clock::now_ticks();
    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    let cutoff = now - map.batch_window.as_millis() as i64;

    let optimised = map.store.key_exists(&keys.timestamps_sorted).await?;
    let due_fields = if optimised {
        due_fields_sorted(map, cutoff).await?
    } else {
        due_fields_legacy(map, cutoff).await?
    };
    if due_fields.is_empty() {
        return Ok(());
    }

    let mut entries: Vec<(K, V)> = Vec::with_capacity(due_fields.len());
    for field in due_fields {
        let Ok(key) = map.key_codec.decode(&field) else {
            warn!(map = %map.name, field = %field, "key failed to round-trip, dropped from batch");
            continue;
        };
        // Entries removed since their write simply drop out of the batch.
        let Some(raw) = map.store.hash_get(&keys.values, &field).await? else {
            continue;
        };
        match map.value_codec.deserialize(&raw) {
            Ok(value) => entries.push((key, value)),
            Err(error) => {
                warn!(map = %map.name, field = %field, "value failed to decode, dropped from batch: {error}");
            }
        }
    }
    if entries.is_empty() {
        return Ok(());
    }

    // Marker first: an entry must never appear in two batches, and the
    // marker only ever moves forward.
    map.meta.set_last_batch(now).await?;
    map.stats.batch_emissions.fetch_add(1, Ordering::Relaxed);
    debug!(map = %map.name, count = entries.len(), algorithm = if optimised { "sorted" } else { "legacy" }, "emitting batch update");

    map.events.emit_batch(Arc::new(entries)).await;
    Ok(())
}

/// Optimised path: one score-range query over `(last_batch, cutoff]`,
/// already in ascending timestamp order.
async fn due_fields_sorted<K, V>(map: &MapInner<K, V>, cutoff: i64) -> Result<Vec<String>> {
    let keys = map.meta.keys();
    let last_batch = map.meta.last_batch().await?;
    #[allow(clippy::cast_precision_loss)]
    let (min, max) = (last_batch as f64, cutoff as f64);
    map.store
        .sorted_set_range_by_score(&keys.timestamps_sorted, min, max, true, RangeOrder::Ascending)
        .await
}

/// Legacy path: load the whole timestamp hash and filter client-side.
///
/// `ts <= cutoff` is the hash-side spelling of "the write has rested a full
/// batch window".
async fn due_fields_legacy<K, V>(map: &MapInner<K, V>, cutoff: i64) -> Result<Vec<String>> {
    let keys = map.meta.keys();
    let last_batch = map.meta.last_batch().await?;
    let rows = map.store.hash_get_all(&keys.timestamps).await?;

    let mut due: Vec<(i64, String)> = rows
        .into_iter()
        .filter_map(|(field, raw)| {
            let ticks: i64 = std::str::from_utf8(&raw).ok()?.trim().parse().ok()?;
            (ticks > last_batch && ticks <= cutoff).then_some((ticks, field))
        })
        .collect();
    due.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    Ok(due.into_iter().map(|(_, field)| field).collect())
}
