//! Error surface of map operations.
//!
//! Caller-initiated operations surface [`MapError`]; background timers
//! (expiration sweeps, batch emission) log and swallow their failures instead.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MapError>;

/// Errors surfaced by map, bucket, and registry operations.
#[derive(Debug, Error)]
pub enum MapError {
    /// Transport-level failure talking to the backing store.
    #[error("backing store unavailable: {0}")]
    BackendUnavailable(String),

    /// The map (or its registry) was shut down before the operation ran.
    #[error("operation cancelled: map engine is shut down")]
    Cancelled,

    /// The requested name is unknown to the registry.
    #[error("map '{0}' is not registered")]
    MapNotRegistered(String),

    /// Map names must be non-empty ASCII.
    #[error("invalid map name '{0}': names must be non-empty ASCII")]
    InvalidMapName(String),

    /// A name was re-registered with different key or value types.
    #[error("map '{name}' is already registered with different key/value types")]
    MapTypeMismatch {
        /// The conflicting map name.
        name: String,
    },

    /// Key bytes that do not round-trip through the key codec.
    ///
    /// Only enumeration reports this; read/write paths and the background
    /// timers treat an undecodable key as a miss and skip it.
    #[error("key failed to round-trip through the codec: {0}")]
    KeyDecode(String),

    /// Value bytes that do not round-trip through the value codec.
    ///
    /// Reads log the failure and report a miss instead of surfacing this.
    #[error("value failed to decode: {0}")]
    ValueDecode(String),

    /// An empty payload was handed to a codec that needs at least one byte.
    #[error("empty payload where a value is required")]
    ValueRequired,
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for MapError {
    fn from(err: redis::RedisError) -> Self {
        Self::BackendUnavailable(err.to_string())
    }
}
