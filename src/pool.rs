//! Instance and buffer pools backing the message codec.
//!
//! Two pools cooperate: [`InstancePool`] recycles deserialised message
//! instances (bounded idle count, reset-on-release), and [`BufferPool`]
//! recycles serialization buffers in power-of-two size classes. Serialized
//! bytes travel as a [`PooledValue`], whose drop hands the buffer back.

use crate::traits::PoolReset;
use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Idle instances retained per pooled type.
pub(crate) const MAX_IDLE_INSTANCES: usize = 100;

/// Idle buffers retained per size class.
const MAX_IDLE_BUFFERS: usize = 32;

/// Smallest size class, 2^4 bytes.
const MIN_CLASS_SHIFT: u32 = 4;

/// Largest size class, 2^26 bytes (64 MiB). Larger payloads are not pooled.
const MAX_CLASS_SHIFT: u32 = 26;

const CLASS_COUNT: usize = (MAX_CLASS_SHIFT - MIN_CLASS_SHIFT + 1) as usize;

/// Bounded pool of reusable message instances.
///
/// `acquire` hands out an idle instance or a default-constructed one;
/// `release` resets every field and keeps the instance unless the pool
/// already holds its bound of idle instances.
pub struct InstancePool<T> {
    idle: Mutex<Vec<T>>,
    max_idle: usize,
}

impl<T: Default + PoolReset> InstancePool<T> {
    /// Pool with the standard idle bound.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_idle(MAX_IDLE_INSTANCES)
    }

    /// Pool with a custom idle bound.
    #[must_use]
    pub fn with_max_idle(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Take an instance out of the pool, or default-construct one.
    pub fn acquire(&self) -> T {
        self.idle.lock().pop().unwrap_or_default()
    }

    /// Reset an instance and return it to the pool; excess instances drop.
    pub fn release(&self, mut instance: T) {
        instance.reset();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(instance);
        }
    }

    /// Current number of idle instances.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}

impl<T: Default + PoolReset> Default for InstancePool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for InstancePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstancePool")
            .field("idle", &self.idle.lock().len())
            .field("max_idle", &self.max_idle)
            .finish()
    }
}

/// Recycles `Vec<u8>` serialization buffers in power-of-two size classes.
#[derive(Debug)]
pub struct BufferPool {
    classes: [Mutex<Vec<Vec<u8>>>; CLASS_COUNT],
}

impl Default for BufferPool {
    fn default() -> Self {
        Self {
            classes: std::array::from_fn(|_| Mutex::new(Vec::new())),
        }
    }
}

impl BufferPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Size-class index for a payload of `len` bytes, or `None` when the
    /// payload is too large to pool.
    fn class_for(len: usize) -> Option<usize> {
        let shift = usize::BITS - len.saturating_sub(1).leading_zeros();
        let shift = shift.max(MIN_CLASS_SHIFT);
        if shift > MAX_CLASS_SHIFT {
            return None;
        }
        Some((shift - MIN_CLASS_SHIFT) as usize)
    }

    /// Rent an empty buffer with capacity for at least `len` bytes.
    pub fn rent(&self, len: usize) -> Vec<u8> {
        let Some(class) = Self::class_for(len) else {
            return Vec::with_capacity(len);
        };
        if let Some(buf) = self.classes.get(class).and_then(|c| c.lock().pop()) {
            return buf;
        }
        Vec::with_capacity(1 << (class as u32 + MIN_CLASS_SHIFT))
    }

    /// Return a buffer to its size class; oversized or surplus buffers drop.
    fn give_back(&self, mut buf: Vec<u8>) {
        let Some(class) = Self::class_for(buf.capacity()) else {
            return;
        };
        // Only cache buffers that actually fill their class, so a rent never
        // hands out less capacity than the class promises.
        if buf.capacity() < (1 << (class as u32 + MIN_CLASS_SHIFT)) {
            return;
        }
        buf.clear();
        if let Some(slot) = self.classes.get(class) {
            let mut idle = slot.lock();
            if idle.len() < MAX_IDLE_BUFFERS {
                idle.push(buf);
            }
        }
    }

    #[cfg(test)]
    fn idle_in_class(&self, class: usize) -> usize {
        self.classes.get(class).map_or(0, |c| c.lock().len())
    }
}

/// Serialized bytes, possibly borrowing a pooled buffer.
///
/// Flows out of [`ValueCodec::serialize`](crate::traits::ValueCodec::serialize);
/// dropping it returns the underlying buffer to its pool. Dereferences to the
/// payload bytes.
pub struct PooledValue {
    buf: Vec<u8>,
    pool: Option<Arc<BufferPool>>,
}

impl PooledValue {
    /// Wrap bytes that belong to no pool (plain allocation).
    #[must_use]
    pub fn unpooled(buf: Vec<u8>) -> Self {
        Self { buf, pool: None }
    }

    /// Wrap a buffer rented from `pool`; drop returns it there.
    pub(crate) fn pooled(buf: Vec<u8>, pool: Arc<BufferPool>) -> Self {
        Self {
            buf,
            pool: Some(pool),
        }
    }

    /// The payload bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl Deref for PooledValue {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl AsRef<[u8]> for PooledValue {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl fmt::Debug for PooledValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledValue")
            .field("len", &self.buf.len())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl Drop for PooledValue {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.give_back(std::mem::take(&mut self.buf));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Sample {
        id: u64,
        label: String,
    }

    impl PoolReset for Sample {
        fn reset(&mut self) {
            self.id = 0;
            self.label.clear();
        }
    }

    #[test]
    fn acquire_from_empty_pool_yields_default() {
        let pool: InstancePool<Sample> = InstancePool::new();
        assert_eq!(pool.acquire(), Sample::default());
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn release_resets_fields_before_reuse() {
        let pool: InstancePool<Sample> = InstancePool::new();
        pool.release(Sample {
            id: 7,
            label: "leftover".to_string(),
        });
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.acquire(), Sample::default());
    }

    #[test]
    fn idle_instances_are_bounded() {
        let pool: InstancePool<Sample> = InstancePool::with_max_idle(3);
        for id in 0..10 {
            pool.release(Sample {
                id,
                label: String::new(),
            });
        }
        assert_eq!(pool.idle_count(), 3);
    }

    #[test]
    fn buffer_classes_round_up_to_power_of_two() {
        assert_eq!(BufferPool::class_for(0), Some(0));
        assert_eq!(BufferPool::class_for(16), Some(0));
        assert_eq!(BufferPool::class_for(17), Some(1));
        assert_eq!(BufferPool::class_for(1 << 26), Some(CLASS_COUNT - 1));
        assert_eq!(BufferPool::class_for((1 << 26) + 1), None);
    }

    #[test]
    fn dropped_pooled_value_returns_buffer() {
        let pool = Arc::new(BufferPool::new());
        let mut buf = pool.rent(100);
        buf.extend_from_slice(&[1, 2, 3]);
        let class = BufferPool::class_for(buf.capacity()).unwrap();

        let value = PooledValue::pooled(buf, Arc::clone(&pool));
        assert_eq!(&*value, &[1, 2, 3]);
        drop(value);

        assert_eq!(pool.idle_in_class(class), 1);
        // The recycled buffer comes back empty.
        assert!(pool.rent(100).is_empty());
    }

    #[test]
    fn unpooled_value_is_plain_bytes() {
        let value = PooledValue::unpooled(vec![9, 9]);
        assert_eq!(value.as_bytes(), &[9, 9]);
    }
}
