//! Per-map key-space layout and metadata co-ordination
//!
//! Every named map spreads its state over six backing-store keys: the value
//! hash, the access-time index, and four `__meta` keys for versions,
//! last-write timestamps (in two representations), idle-TTL configuration,
//! and the last-batch marker. The literals here are the on-disk format and
//! must match existing deployments bit-for-bit.

use crate::error::Result;
use crate::traits::BackingStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Backing-store keys of one named map.
#[derive(Debug, Clone)]
pub struct MapKeySpace {
    /// `map:<name>` — hash of serialized key → serialized value.
    pub values: String,
    /// `map:<name>:access-time` — sorted set scored by unix seconds of the
    /// last read or write, consulted only by idle-TTL expiry.
    pub access_time: String,
    /// `map:<name>:__meta:versions` — hash of field → version string.
    pub versions: String,
    /// `map:<name>:__meta:timestamps` — legacy hash of field → tick count.
    pub timestamps: String,
    /// `map:<name>:__meta:timestamps-sorted` — sorted set scored by ticks,
    /// the source of truth for range queries once migrated.
    pub timestamps_sorted: String,
    /// `map:<name>:__meta:ttl-config` — idle TTL in decimal seconds.
    pub ttl_config: String,
    /// `map:<name>:__meta:timestamps:last-batch` — ticks of the most recent
    /// successful batch emission.
    pub last_batch: String,
}

impl MapKeySpace {
    #[must_use]
    pub fn new(name: &str) -> Self {
        let base = format!("map:{name}");
        Self {
            access_time: format!("{base}:access-time"),
            versions: format!("{base}:__meta:versions"),
            timestamps: format!("{base}:__meta:timestamps"),
            timestamps_sorted: format!("{base}:__meta:timestamps-sorted"),
            ttl_config: format!("{base}:__meta:ttl-config"),
            last_batch: format!("{base}:__meta:timestamps:last-batch"),
            values: base,
        }
    }
}

/// Progress of the legacy-hash → sorted-set timestamp migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Entries in the legacy timestamp hash.
    pub hash_count: u64,
    /// Members of the timestamp sorted set.
    pub sorted_set_count: u64,
    /// The sorted set exists, so the optimised batch path is active.
    pub is_migrated: bool,
    /// The sorted set covers at least every legacy entry.
    pub is_complete: bool,
}

/// Metadata reads and writes for one map.
pub(crate) struct MetaStore {
    store: Arc<dyn BackingStore>,
    keys: MapKeySpace,
}

impl MetaStore {
    pub(crate) fn new(store: Arc<dyn BackingStore>, map_name: &str) -> Self {
        Self {
            store,
            keys: MapKeySpace::new(map_name),
        }
    }

    pub(crate) fn keys(&self) -> &MapKeySpace {
        &self.keys
    }

    /// Generate and store a fresh version for `field`, returning its
    /// lowercase-hex rendering.
    pub(crate) async fn rotate_version(&self, field: &str) -> Result<String> {
        let version = Uuid::new_v4().simple().to_string();
        self.store
            .hash_set(&self.keys.versions, field, version.as_bytes())
            .await?;
        Ok(version)
    }

    pub(crate) async fn version(&self, field: &str) -> Result<Option<String>> {
        let raw = self.store.hash_get(&self.keys.versions, field).await?;
        Ok(raw.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Record a last-write timestamp in both representations.
    ///
    /// The legacy hash keeps being written until a future version drops it,
    /// so a rollback of the library still finds its data.
    pub(crate) async fn write_timestamp(&self, field: &str, ticks: i64) -> Result<()> {
        self.store
            .hash_set(&self.keys.timestamps, field, ticks.to_string().as_bytes())
            .await?;
        #[allow(clippy::cast_precision_loss)]
        let score = ticks as f64;
        self.store
            .sorted_set_add(&self.keys.timestamps_sorted, field, score)
            .await
    }

    pub(crate) async fn timestamp(&self, field: &str) -> Result<Option<i64>> {
        let raw = self.store.hash_get(&self.keys.timestamps, field).await?;
        Ok(raw.as_deref().and_then(parse_ticks))
    }

    /// Refresh the access-time index for `field`.
    pub(crate) async fn touch_access(&self, field: &str, unix_secs: i64) -> Result<()> {
        #[allow(clippy::cast_precision_loss)]
        let score = unix_secs as f64;
        self.store
            .sorted_set_add(&self.keys.access_time, field, score)
            .await
    }

    /// Drop the version and both timestamp rows of one entry.
    pub(crate) async fn remove_entry(&self, field: &str) -> Result<()> {
        self.store.hash_delete(&self.keys.versions, field).await?;
        self.store.hash_delete(&self.keys.timestamps, field).await?;
        self.store
            .sorted_set_remove(&self.keys.timestamps_sorted, field)
            .await?;
        Ok(())
    }

    /// Configured idle TTL, if any. An unparseable value is treated as unset
    /// after a logged warning.
    pub(crate) async fn item_ttl(&self) -> Result<Option<Duration>> {
        let Some(raw) = self.store.string_get(&self.keys.ttl_config).await? else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&raw);
        match text.trim().parse::<u64>() {
            Ok(secs) => Ok(Some(Duration::from_secs(secs))),
            Err(_) => {
                warn!(key = %self.keys.ttl_config, value = %text, "unparseable ttl-config, treating as unset");
                Ok(None)
            }
        }
    }

    /// Write the idle TTL; `None` removes the configuration key.
    pub(crate) async fn set_item_ttl(&self, ttl: Option<Duration>) -> Result<()> {
        match ttl {
            Some(ttl) => {
                self.store
                    .string_set(&self.keys.ttl_config, ttl.as_secs().to_string().as_bytes())
                    .await
            }
            None => {
                self.store.key_delete(&self.keys.ttl_config).await?;
                Ok(())
            }
        }
    }

    /// Ticks of the most recent batch emission; zero before the first one.
    pub(crate) async fn last_batch(&self) -> Result<i64> {
        let Some(raw) = self.store.string_get(&self.keys.last_batch).await? else {
            return Ok(0);
        };
        Ok(parse_ticks(&raw).unwrap_or(0))
    }

    pub(crate) async fn set_last_batch(&self, ticks: i64) -> Result<()> {
        self.store
            .string_set(&self.keys.last_batch, ticks.to_string().as_bytes())
            .await
    }

    /// One-shot migration of the legacy timestamp hash into the sorted set.
    ///
    /// A no-op when the sorted set already exists; otherwise every legacy
    /// entry is inserted with its stored tick count as score. Safe to re-run.
    pub(crate) async fn migrate_timestamps_to_sorted_set(&self) -> Result<()> {
        if self.store.key_exists(&self.keys.timestamps_sorted).await? {
            debug!(key = %self.keys.timestamps_sorted, "timestamp sorted set already present, skipping migration");
            return Ok(());
        }

        let rows = self.store.hash_get_all(&self.keys.timestamps).await?;
        let mut migrated = 0u64;
        for (field, raw) in rows {
            let Some(ticks) = parse_ticks(&raw) else {
                warn!(field = %field, "unparseable legacy timestamp, skipping");
                continue;
            };
            #[allow(clippy::cast_precision_loss)]
            let score = ticks as f64;
            self.store
                .sorted_set_add(&self.keys.timestamps_sorted, &field, score)
                .await?;
            migrated += 1;
        }

        info!(key = %self.keys.timestamps_sorted, count = migrated, "migrated legacy timestamps to sorted set");
        Ok(())
    }

    pub(crate) async fn migration_status(&self) -> Result<MigrationStatus> {
        let hash_count = self.store.hash_len(&self.keys.timestamps).await?;
        let sorted_set_count = self
            .store
            .sorted_set_len(&self.keys.timestamps_sorted)
            .await?;
        Ok(MigrationStatus {
            hash_count,
            sorted_set_count,
            is_migrated: sorted_set_count > 0,
            is_complete: sorted_set_count >= hash_count,
        })
    }

}

/// Parses a stored tick count (decimal i64 bytes).
fn parse_ticks(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.trim().parse().ok()
}
