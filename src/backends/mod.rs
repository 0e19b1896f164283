//! Backing Store Implementations
//!
//! Implementations of the [`BackingStore`](crate::traits::BackingStore)
//! contract the map engine is written against.
//!
//! # Available Backends
//!
//! - **Redis** — shared multi-process deployments (feature `redis`, default)
//! - **`MemoryStore`** — in-process store for tests and embedded use

pub mod memory_store;

#[cfg(feature = "redis")]
pub mod redis_store;

pub use memory_store::MemoryStore;

#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
