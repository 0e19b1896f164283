//! Typed Map Engine
//!
//! `TypedMap<K, V>` binds a backing store, codecs, metadata co-ordination,
//! event dispatch, and the two background timers into one named map. Handles
//! are cheap to clone (everything lives behind one `Arc`); the registry keeps
//! one per name and hands out clones.
//!
//! # Consistency
//!
//! A write touches the value hash, the access-time index, both timestamp
//! representations, and the version hash in separate commands. Readers may
//! therefore briefly observe a new value with a stale version or timestamp;
//! none of the read paths rely on cross-field consistency, and neither should
//! consumers.

use crate::clock;
use crate::error::{MapError, Result};
use crate::events::{EntryEvent, MapEvents};
use crate::meta::{MetaStore, MigrationStatus};
use crate::traits::{BackingStore, KeyCodec, ValueCodec};
use futures_util::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default duration an entry must rest unmutated before it joins a batch
/// notification.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_secs(5);

/// Default period of the batch-update timer.
pub const DEFAULT_BATCH_TICK: Duration = Duration::from_secs(1);

/// Default period of the idle-expiration timer.
pub const DEFAULT_REAP_TICK: Duration = Duration::from_secs(10);

/// Server page size for unfiltered dashboard scans.
const UNFILTERED_SCAN_PAGE: usize = 100;

/// Server page size for filtered dashboard scans, which always walk the
/// whole hash.
const FILTERED_SCAN_PAGE: usize = 1000;

/// Per-map timer and window configuration.
#[derive(Debug, Clone)]
pub struct MapOptions {
    /// Idle TTL written to the store on creation; `None` leaves the stored
    /// configuration untouched.
    pub item_ttl: Option<Duration>,
    /// Batch-update window.
    pub batch_window: Duration,
    /// Batch-update timer period.
    pub batch_tick: Duration,
    /// Idle-expiration timer period.
    pub reap_tick: Duration,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            item_ttl: None,
            batch_window: DEFAULT_BATCH_WINDOW,
            batch_tick: DEFAULT_BATCH_TICK,
            reap_tick: DEFAULT_REAP_TICK,
        }
    }
}

/// One dashboard row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntryRow {
    /// The serialized key, as stored in the hash field.
    pub key: String,
    /// Codec rendering of the value.
    pub value: String,
    /// First 8 hex characters of the entry version.
    pub version: String,
    /// Human-readable age of the last write, e.g. `3m ago`.
    pub last_modified: String,
    /// Tick count of the last write; zero when unknown.
    pub last_modified_ticks: i64,
}

/// One page of dashboard rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedResult {
    /// Rows of the requested page.
    pub items: Vec<MapEntryRow>,
    /// Total matching entries (hash length when unfiltered).
    pub total_count: u64,
    /// 1-based page number served.
    pub page: usize,
    /// Requested page size.
    pub page_size: usize,
    /// Total pages at this page size.
    pub total_pages: u64,
    /// Whether a later page exists.
    pub has_next: bool,
}

fn paged(items: Vec<MapEntryRow>, total_count: u64, page: usize, page_size: usize) -> PagedResult {
    let total_pages = total_count.div_ceil(page_size as u64);
    PagedResult {
        items,
        total_count,
        page,
        page_size,
        total_pages,
        has_next: (page as u64) < total_pages,
    }
}

/// Counter snapshot of one map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapStats {
    pub reads: u64,
    pub read_hits: u64,
    pub writes: u64,
    pub expired_removals: u64,
    pub batch_emissions: u64,
    pub clears: u64,
    pub handler_errors: u64,
}

#[derive(Debug, Default)]
pub(crate) struct EngineCounters {
    pub(crate) reads: AtomicU64,
    pub(crate) read_hits: AtomicU64,
    pub(crate) writes: AtomicU64,
    pub(crate) expired_removals: AtomicU64,
    pub(crate) batch_emissions: AtomicU64,
    pub(crate) clears: AtomicU64,
}

/// Shared state of one map, referenced by handles and both timers.
pub(crate) struct MapInner<K, V> {
    pub(crate) name: String,
    pub(crate) store: Arc<dyn BackingStore>,
    pub(crate) meta: MetaStore,
    pub(crate) key_codec: Arc<dyn KeyCodec<K>>,
    pub(crate) value_codec: Arc<dyn ValueCodec<V>>,
    pub(crate) events: MapEvents<K, V>,
    pub(crate) batch_window: Duration,
    pub(crate) stats: EngineCounters,
    shut_down: AtomicBool,
}

impl<K, V> MapInner<K, V> {
    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(MapError::Cancelled);
        }
        Ok(())
    }

    /// Hand a deserialised value back to a pooling codec.
    pub(crate) fn recycle(&self, value: V) {
        if self.value_codec.supports_pooling() {
            self.value_codec.return_to_pool(value);
        }
    }
}

/// Handle to one typed named map.
///
/// Obtained from [`MapRegistry`](crate::registry::MapRegistry); clones share
/// the same engine, timers, and handler registry.
pub struct TypedMap<K, V> {
    inner: Arc<MapInner<K, V>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl<K, V> Clone for TypedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }
}

impl<K, V> TypedMap<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Materialise the engine and start its two timers.
    pub(crate) fn spawn(
        name: &str,
        store: Arc<dyn BackingStore>,
        key_codec: Arc<dyn KeyCodec<K>>,
        value_codec: Arc<dyn ValueCodec<V>>,
        options: &MapOptions,
    ) -> Self {
        let inner = Arc::new(MapInner {
            name: name.to_string(),
            meta: MetaStore::new(Arc::clone(&store), name),
            store,
            key_codec,
            value_codec,
            events: MapEvents::new(name),
            batch_window: options.batch_window,
            stats: EngineCounters::default(),
            shut_down: AtomicBool::new(false),
        });

        let (shutdown_tx, _) = broadcast::channel(1);
        let _reaper = crate::expiry::spawn_reaper(
            Arc::clone(&inner),
            options.reap_tick,
            shutdown_tx.subscribe(),
        );
        let _notifier = crate::batch::spawn_notifier(
            Arc::clone(&inner),
            options.batch_tick,
            shutdown_tx.subscribe(),
        );
        debug!(map = %name, "map engine materialised, timers running");

        Self { inner, shutdown_tx }
    }

    /// Name of this map.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Read the value stored under `key`.
    ///
    /// A hit refreshes the access-time index (extending idle-TTL life) but
    /// not the last-write timestamp. A value that fails to decode is logged
    /// and reported as a miss.
    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        self.inner.ensure_live()?;
        self.inner.stats.reads.fetch_add(1, Ordering::Relaxed);

        let field = self.inner.key_codec.encode(key)?;
        let keys = self.inner.meta.keys();
        let Some(raw) = self.inner.store.hash_get(&keys.values, &field).await? else {
            return Ok(None);
        };

        self.inner
            .meta
            .touch_access(&field, clock::now_unix_secs())
            .await?;

        match self.inner.value_codec.deserialize(&raw) {
            Ok(value) => {
                self.inner.stats.read_hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            Err(error) => {
                warn!(map = %self.inner.name, field = %field, "stored value failed to decode, treating as miss: {error}");
                Ok(None)
            }
        }
    }

    /// Write `value` under `key`, rotating its version and refreshing both
    /// timestamp representations.
    ///
    /// Emits `add` when the pre-existence check saw no entry, `update`
    /// otherwise. Two concurrent first writes may both observe "absent" and
    /// each emit `add`; subscribers deduplicate by version. Store errors
    /// surface to the caller, handler errors never do.
    pub async fn set(&self, key: &K, value: &V) -> Result<()> {
        self.inner.ensure_live()?;

        let field = self.inner.key_codec.encode(key)?;
        let payload = self.inner.value_codec.serialize(value)?;
        let keys = self.inner.meta.keys();

        let existed = self
            .inner
            .store
            .hash_get(&keys.values, &field)
            .await?
            .is_some();
        self.inner
            .store
            .hash_set(&keys.values, &field, payload.as_bytes())
            .await?;
        drop(payload);

        self.inner
            .meta
            .touch_access(&field, clock::now_unix_secs())
            .await?;
        self.inner
            .meta
            .write_timestamp(&field, clock::now_ticks())
            .await?;
        self.inner.meta.rotate_version(&field).await?;
        self.inner.stats.writes.fetch_add(1, Ordering::Relaxed);

        let event = if existed {
            EntryEvent::Updated
        } else {
            EntryEvent::Added
        };
        self.inner.events.emit_entry(event, key, value).await;
        Ok(())
    }

    /// Remove every entry and its metadata.
    ///
    /// Deletes the value hash, the access-time index, the version hash, and
    /// both timestamp representations; the TTL configuration and the
    /// last-batch marker survive. Emits `clear`. Clearing an empty map is a
    /// no-op apart from the event.
    pub async fn clear(&self) -> Result<()> {
        self.inner.ensure_live()?;
        let keys = self.inner.meta.keys();

        self.inner.store.key_delete(&keys.values).await?;
        self.inner.store.key_delete(&keys.access_time).await?;
        self.inner.store.key_delete(&keys.versions).await?;
        self.inner.store.key_delete(&keys.timestamps).await?;
        self.inner.store.key_delete(&keys.timestamps_sorted).await?;
        self.inner.stats.clears.fetch_add(1, Ordering::Relaxed);

        self.inner.events.emit_clear().await;
        Ok(())
    }

    /// Subscribe to `add` events. Treat them as advisory: a key may very
    /// occasionally announce itself twice under concurrent first writes.
    pub fn on_add<F, Fut>(&self, handler: F)
    where
        F: Fn(K, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.events.subscribe_entry(EntryEvent::Added, handler);
    }

    /// Subscribe to `update` events.
    pub fn on_update<F, Fut>(&self, handler: F)
    where
        F: Fn(K, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner
            .events
            .subscribe_entry(EntryEvent::Updated, handler);
    }

    /// Subscribe to `remove` events. A TTL eviction emits `expired` first,
    /// then `remove`.
    pub fn on_remove<F, Fut>(&self, handler: F)
    where
        F: Fn(K, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner
            .events
            .subscribe_entry(EntryEvent::Removed, handler);
    }

    /// Subscribe to `clear` events.
    pub fn on_clear<F, Fut>(&self, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.events.subscribe_clear(handler);
    }

    /// Subscribe to `expired` events.
    pub fn on_expired<F, Fut>(&self, handler: F)
    where
        F: Fn(K, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner
            .events
            .subscribe_entry(EntryEvent::Expired, handler);
    }

    /// Subscribe to batch-update notifications: one call per elapsed batch
    /// window, carrying every entry whose last write aged past the window.
    pub fn on_batch_update<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<Vec<(K, V)>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.events.subscribe_batch(handler);
    }

    /// One page of dashboard rows.
    ///
    /// Without a search pattern the value hash is cursor-scanned and
    /// `total_count` is its length. With a pattern, every entry whose key
    /// string contains it (case-insensitive) is materialised and paginated
    /// in memory. Entries whose key or value fail to decode are skipped with
    /// a logged warning.
    pub async fn entries_paged(
        &self,
        page: usize,
        page_size: usize,
        search: Option<&str>,
    ) -> Result<PagedResult> {
        self.inner.ensure_live()?;
        let page = page.max(1);
        let page_size = page_size.max(1);

        match search.map(str::trim).filter(|pattern| !pattern.is_empty()) {
            Some(pattern) => self.entries_paged_filtered(page, page_size, pattern).await,
            None => self.entries_paged_unfiltered(page, page_size).await,
        }
    }

    async fn entries_paged_unfiltered(&self, page: usize, page_size: usize) -> Result<PagedResult> {
        let keys = self.inner.meta.keys();
        let total_count = self.inner.store.hash_len(&keys.values).await?;
        let skip = (page - 1) * page_size;

        let mut scan = self
            .inner
            .store
            .hash_scan(&keys.values, "*", UNFILTERED_SCAN_PAGE);
        let mut decodable_seen = 0usize;
        let mut items = Vec::new();

        while let Some(next) = scan.next().await {
            let (field, raw) = next?;
            let Some(value) = self.decode_entry(&field, &raw) else {
                continue;
            };
            let position = decodable_seen;
            decodable_seen += 1;
            if position < skip {
                self.inner.recycle(value);
                continue;
            }
            items.push(self.build_row(field, value).await?);
            if items.len() == page_size {
                break;
            }
        }

        Ok(paged(items, total_count, page, page_size))
    }

    async fn entries_paged_filtered(
        &self,
        page: usize,
        page_size: usize,
        pattern: &str,
    ) -> Result<PagedResult> {
        let keys = self.inner.meta.keys();
        let needle = pattern.to_lowercase();

        let mut scan = self
            .inner
            .store
            .hash_scan(&keys.values, "*", FILTERED_SCAN_PAGE);
        let mut rows = Vec::new();

        while let Some(next) = scan.next().await {
            let (field, raw) = next?;
            if !field.to_lowercase().contains(&needle) {
                continue;
            }
            let Some(value) = self.decode_entry(&field, &raw) else {
                continue;
            };
            rows.push(self.build_row(field, value).await?);
        }

        let total_count = rows.len() as u64;
        let items: Vec<MapEntryRow> = rows
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();
        Ok(paged(items, total_count, page, page_size))
    }

    /// Every dashboard row, unpaginated.
    pub async fn all_entries(&self) -> Result<Vec<MapEntryRow>> {
        self.inner.ensure_live()?;
        let keys = self.inner.meta.keys();

        let mut scan = self
            .inner
            .store
            .hash_scan(&keys.values, "*", UNFILTERED_SCAN_PAGE);
        let mut rows = Vec::new();
        while let Some(next) = scan.next().await {
            let (field, raw) = next?;
            let Some(value) = self.decode_entry(&field, &raw) else {
                continue;
            };
            rows.push(self.build_row(field, value).await?);
        }
        Ok(rows)
    }

    fn decode_entry(&self, field: &str, raw: &[u8]) -> Option<V> {
        if let Err(error) = self.inner.key_codec.decode(field) {
            warn!(map = %self.inner.name, field = %field, "key failed to round-trip, skipping entry: {error}");
            return None;
        }
        match self.inner.value_codec.deserialize(raw) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(map = %self.inner.name, field = %field, "value failed to decode, skipping entry: {error}");
                None
            }
        }
    }

    async fn build_row(&self, field: String, value: V) -> Result<MapEntryRow> {
        let display = self.inner.value_codec.display(&value);
        self.inner.recycle(value);

        let version = self.inner.meta.version(&field).await?.unwrap_or_default();
        let short_version: String = version.chars().take(8).collect();
        let ticks = self.inner.meta.timestamp(&field).await?.unwrap_or(0);

        Ok(MapEntryRow {
            key: field,
            value: display,
            version: short_version,
            last_modified: clock::format_age(ticks, clock::now_ticks()),
            last_modified_ticks: ticks,
        })
    }

    /// Configured idle TTL, if any.
    pub async fn item_ttl(&self) -> Result<Option<Duration>> {
        self.inner.ensure_live()?;
        self.inner.meta.item_ttl().await
    }

    /// Configure the idle TTL; `None` disables expiry.
    pub async fn set_item_ttl(&self, ttl: Option<Duration>) -> Result<()> {
        self.inner.ensure_live()?;
        self.inner.meta.set_item_ttl(ttl).await
    }

    /// Copy the legacy timestamp hash into the sorted set, once.
    pub async fn migrate_timestamps_to_sorted_set(&self) -> Result<()> {
        self.inner.ensure_live()?;
        self.inner.meta.migrate_timestamps_to_sorted_set().await
    }

    /// Progress of the timestamp migration.
    pub async fn migration_status(&self) -> Result<MigrationStatus> {
        self.inner.ensure_live()?;
        self.inner.meta.migration_status().await
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> MapStats {
        let counters = &self.inner.stats;
        MapStats {
            reads: counters.reads.load(Ordering::Relaxed),
            read_hits: counters.read_hits.load(Ordering::Relaxed),
            writes: counters.writes.load(Ordering::Relaxed),
            expired_removals: counters.expired_removals.load(Ordering::Relaxed),
            batch_emissions: counters.batch_emissions.load(Ordering::Relaxed),
            clears: counters.clears.load(Ordering::Relaxed),
            handler_errors: self.inner.events.handler_error_count(),
        }
    }

    /// Stop both timers and fail subsequent operations with `Cancelled`.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(());
        debug!(map = %self.inner.name, "map engine shut down");
    }
}
