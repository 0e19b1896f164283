//! Trait seams of the map engine
//!
//! This module defines the abstractions that allow users to plug in custom
//! backing stores and serialization codecs.
//!
//! # Architecture
//!
//! - `BackingStore`: hash / sorted-set / string primitives of the underlying
//!   key-value server
//! - `ValueCodec`: pluggable value serialization, with optional instance
//!   pooling for message-based codecs
//! - `KeyCodec`: serialization of strongly-typed keys to hash field names
//! - `PoolReset`: field reset hook required of pooled message types
//!
//! # Example: Custom Backing Store
//!
//! ```rust,ignore
//! use typed_map_cache::{BackingStore, async_trait};
//! use typed_map_cache::error::Result;
//!
//! struct MyStore {
//!     // Your implementation
//! }
//!
//! #[async_trait]
//! impl BackingStore for MyStore {
//!     async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
//!         // Your implementation
//!     }
//!
//!     // ... remaining primitives
//! }
//! ```

use crate::error::Result;
use crate::pool::PooledValue;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::fmt::Debug;

/// Sort order for sorted-set score-range queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOrder {
    /// Lowest score first.
    Ascending,
    /// Highest score first.
    Descending,
}

/// Hash, sorted-set, and string primitives of the underlying key-value server
///
/// Any store providing these primitives with atomicity per command suffices;
/// no multi-key transaction is assumed. Every method reports transport
/// failures as [`MapError::BackendUnavailable`](crate::MapError::BackendUnavailable).
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to support concurrent access across
/// async tasks; the engine shares one store instance between caller-initiated
/// operations and its background timers.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Read one field of a hash. `None` when the key or field is absent.
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>>;

    /// Write one field of a hash, creating the hash if needed.
    async fn hash_set(&self, key: &str, field: &str, value: &[u8]) -> Result<()>;

    /// Delete one field of a hash. Returns whether the field existed.
    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool>;

    /// Read every field of a hash. Empty when the key is absent.
    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Number of fields in a hash. Zero when the key is absent.
    async fn hash_len(&self, key: &str) -> Result<u64>;

    /// Lazily iterate the fields of a hash in server pages of `page_size`.
    ///
    /// `pattern` is a glob (`*`, `?`) matched against field names server-side.
    /// The stream issues no further commands once the consumer stops polling,
    /// which is what makes skip/take pagination cheap.
    fn hash_scan(
        &self,
        key: &str,
        pattern: &str,
        page_size: usize,
    ) -> BoxStream<'static, Result<(String, Vec<u8>)>>;

    /// All field names of a hash.
    async fn hash_keys(&self, key: &str) -> Result<Vec<String>>;

    /// Add a member to a sorted set, or update its score in place.
    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> Result<()>;

    /// Remove a member from a sorted set. Returns whether it was present.
    async fn sorted_set_remove(&self, key: &str, member: &str) -> Result<bool>;

    /// Number of members in a sorted set. Zero when the key is absent.
    async fn sorted_set_len(&self, key: &str) -> Result<u64>;

    /// Members whose score lies in `[min, max]` (or `(min, max]` when
    /// `exclude_min` is set), in the given score order.
    ///
    /// `f64::NEG_INFINITY` / `f64::INFINITY` express unbounded ends.
    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        exclude_min: bool,
        order: RangeOrder,
    ) -> Result<Vec<String>>;

    /// Whether a key of any shape exists.
    async fn key_exists(&self, key: &str) -> Result<bool>;

    /// Delete a key of any shape. Returns whether it existed.
    async fn key_delete(&self, key: &str) -> Result<bool>;

    /// Read a plain string key.
    async fn string_get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a plain string key.
    async fn string_set(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// Pluggable value serialization for one map
///
/// A codec turns values into the bytes stored in the value hash and back, and
/// renders them for the dashboard. Message-based codecs may additionally pool
/// deserialised instances; callers hand instances back through
/// [`return_to_pool`](ValueCodec::return_to_pool) when they are done with
/// them. The engine never retains a value past the call that produced it.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync + Debug`; one codec instance is
/// shared by every operation and timer of its map.
pub trait ValueCodec<T>: Send + Sync + Debug {
    /// Serialize a value to bytes.
    ///
    /// Pooling codecs return a buffer rented from their shared byte pool; the
    /// [`PooledValue`] hands it back on drop.
    fn serialize(&self, value: &T) -> Result<PooledValue>;

    /// Deserialize bytes to a value.
    fn deserialize(&self, bytes: &[u8]) -> Result<T>;

    /// Human-readable rendering for the dashboard.
    fn display(&self, value: &T) -> String;

    /// Whether [`return_to_pool`](ValueCodec::return_to_pool) recycles
    /// instances. Codecs that allocate fresh values return `false`.
    fn supports_pooling(&self) -> bool {
        false
    }

    /// Hand a deserialised instance back for reuse. The default drops it.
    fn return_to_pool(&self, value: T) {
        drop(value);
    }

    /// Name of the codec, for logging and debugging.
    fn name(&self) -> &'static str;
}

/// Serialization of strongly-typed keys to hash field names
///
/// Field names double as the dashboard's key column, so the encoding must be
/// stable and human-inspectable. Keys that fail to round-trip are skipped
/// with a logged warning during enumeration and ignored by the expiration and
/// batch timers.
pub trait KeyCodec<K>: Send + Sync + Debug {
    /// Serialize a key to its hash field name.
    fn encode(&self, key: &K) -> Result<String>;

    /// Recover a key from a hash field name.
    fn decode(&self, field: &str) -> Result<K>;

    /// Name of the codec, for logging and debugging.
    fn name(&self) -> &'static str;
}

/// Field reset for pooled message instances.
///
/// Pooled codecs call [`reset`](PoolReset::reset) before an instance re-enters
/// the idle pool; implementations must clear every field back to its default
/// so no data leaks between unrelated deserialisations. Schema code
/// generators normally emit this.
pub trait PoolReset {
    /// Clear every field back to its default value.
    fn reset(&mut self);
}
