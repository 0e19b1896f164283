//! Fixed-schema binary codec with instance and buffer pooling
//!
//! `MessageCodec` serialises one declared schema type into buffers rented
//! from a shared power-of-two byte pool and recycles deserialised instances
//! through a bounded per-type pool. Pooled types implement
//! [`PoolReset`](crate::traits::PoolReset) so every field is cleared before
//! an instance is reused; this replaces the reflection probing some runtimes
//! resort to.

use crate::error::{MapError, Result};
use crate::pool::{BufferPool, InstancePool, PooledValue};
use crate::traits::{PoolReset, ValueCodec};
use bincode::Options;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;

/// Wire options shared by both directions so payloads stay self-consistent.
fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

/// Message codec for one schema type `T`
///
/// Share one instance per map (via `Arc`) so all operations and timers of
/// that map draw from the same pools.
pub struct MessageCodec<T> {
    instances: InstancePool<T>,
    buffers: Arc<BufferPool>,
}

impl<T> MessageCodec<T>
where
    T: Default + PoolReset,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            instances: InstancePool::new(),
            buffers: Arc::new(BufferPool::new()),
        }
    }

    /// Idle instances currently held, mainly for tests and diagnostics.
    #[must_use]
    pub fn idle_instances(&self) -> usize {
        self.instances.idle_count()
    }
}

impl<T> Default for MessageCodec<T>
where
    T: Default + PoolReset,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for MessageCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageCodec")
            .field("instances", &self.instances)
            .finish_non_exhaustive()
    }
}

impl<T> ValueCodec<T> for MessageCodec<T>
where
    T: Serialize + DeserializeOwned + Default + PoolReset + Debug + Send + Sync,
{
    fn serialize(&self, value: &T) -> Result<PooledValue> {
        let size = wire_options()
            .serialized_size(value)
            .map_err(|err| MapError::ValueDecode(err.to_string()))?;
        #[allow(clippy::cast_possible_truncation)]
        let mut buf = self.buffers.rent(size as usize);
        wire_options()
            .serialize_into(&mut buf, value)
            .map_err(|err| MapError::ValueDecode(err.to_string()))?;
        Ok(PooledValue::pooled(buf, Arc::clone(&self.buffers)))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        if bytes.is_empty() {
            // Zero-byte payloads decode to the schema default, served from
            // the instance pool.
            return Ok(self.instances.acquire());
        }
        wire_options()
            .deserialize(bytes)
            .map_err(|err| MapError::ValueDecode(err.to_string()))
    }

    fn display(&self, value: &T) -> String {
        format!("{value:?}")
    }

    fn supports_pooling(&self) -> bool {
        true
    }

    fn return_to_pool(&self, value: T) {
        self.instances.release(value);
    }

    fn name(&self) -> &'static str {
        "bincode"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
    struct Reading {
        sensor: u32,
        celsius: f64,
        tags: Vec<String>,
    }

    impl PoolReset for Reading {
        fn reset(&mut self) {
            self.sensor = 0;
            self.celsius = 0.0;
            self.tags.clear();
        }
    }

    fn sample() -> Reading {
        Reading {
            sensor: 9,
            celsius: 21.5,
            tags: vec!["roof".to_string()],
        }
    }

    #[test]
    fn round_trip() {
        let codec = MessageCodec::<Reading>::new();
        let bytes = codec.serialize(&sample()).unwrap();
        let back: Reading = codec.deserialize(&bytes).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn empty_payload_yields_pooled_default() {
        let codec = MessageCodec::<Reading>::new();
        let value = codec.deserialize(&[]).unwrap();
        assert_eq!(value, Reading::default());
    }

    #[test]
    fn returned_instances_come_back_cleared() {
        let codec = MessageCodec::<Reading>::new();
        codec.return_to_pool(sample());
        assert_eq!(codec.idle_instances(), 1);

        // The recycled instance must carry nothing over.
        let value = codec.deserialize(&[]).unwrap();
        assert_eq!(value, Reading::default());
        assert_eq!(codec.idle_instances(), 0);
    }

    #[test]
    fn pooling_is_advertised() {
        let codec = MessageCodec::<Reading>::new();
        assert!(ValueCodec::<Reading>::supports_pooling(&codec));
    }

    #[test]
    fn truncated_payload_is_a_decode_error() {
        let codec = MessageCodec::<Reading>::new();
        let bytes = codec.serialize(&sample()).unwrap();
        let truncated = bytes.as_bytes().get(..2).unwrap();
        let result: Result<Reading> = codec.deserialize(truncated);
        assert!(matches!(result, Err(MapError::ValueDecode(_))));
    }
}
