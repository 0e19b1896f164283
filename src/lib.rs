//! Typed Map Cache
//!
//! Typed named maps over a Redis-like key-value store, featuring:
//! - **Per-entry versioning**: an opaque 128-bit id rotated on every mutation
//! - **Last-modified timestamps**: kept in a legacy hash and a sorted set,
//!   with a one-shot migration between them
//! - **Idle-TTL expiry**: a per-map reaper removes entries nobody touches
//! - **Mutation events**: `add` / `update` / `remove` / `clear` / `expired`
//!   handlers with per-map serialised dispatch and fault isolation
//! - **Deferred batch updates**: one notification per batch window instead of
//!   one per write
//! - **Dashboard enumeration**: paginated, searchable rows with short
//!   versions and human-readable ages
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use typed_map_cache::{MapRegistry, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> typed_map_cache::Result<()> {
//!     let registry = MapRegistry::new(Arc::new(MemoryStore::new()));
//!     let users = registry.create_json::<String, String>("users", None).await?;
//!
//!     users.on_add(|key, _value| async move {
//!         println!("added {key}");
//!         Ok(())
//!     });
//!
//!     users.set(&"u1".to_string(), &"alice".to_string()).await?;
//!     assert_eq!(users.get(&"u1".to_string()).await?, Some("alice".to_string()));
//!
//!     registry.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Registry ── name ──► TypedMap ──► BackingStore (hash / zset / string)
//!                        │ ├── MetaStore (versions, timestamps, ttl, marker)
//!                        │ ├── expiration timer (idle TTL)
//!                        │ └── batch timer (deferred notifications)
//!                        └── events (serialised per-map dispatch)
//! ```
//!
//! Multiple processes pointing the same store at the same map names observe
//! consistent views; all per-map state lives in the store under the
//! `map:<name>` key family.

pub mod backends;
pub mod codecs;
pub mod error;
pub mod map;
pub mod meta;
pub mod pool;
pub mod registry;
pub mod traits;

mod batch;
mod clock;
mod events;
mod expiry;

pub use backends::MemoryStore;
#[cfg(feature = "redis")]
pub use backends::RedisStore;
pub use codecs::{JsonCodec, JsonKeyCodec};
#[cfg(feature = "bincode")]
pub use codecs::MessageCodec;
pub use error::{MapError, Result};
pub use map::{MapEntryRow, MapOptions, MapStats, PagedResult, TypedMap};
pub use meta::{MapKeySpace, MigrationStatus};
pub use pool::PooledValue;
pub use registry::{Bucket, MapRegistry, MapRegistryBuilder, RegistryDefaults};
pub use traits::{BackingStore, KeyCodec, PoolReset, RangeOrder, ValueCodec};

// Re-export async_trait for custom BackingStore implementations.
pub use async_trait::async_trait;
