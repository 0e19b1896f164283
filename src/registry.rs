//! Named-Map Registry
//!
//! The entry point of the library: maps and buckets are created and
//! retrieved by name, each carrying its declared key and value types. A name
//! registered once keeps its types; re-registration with the same types
//! returns the existing handle, anything else is a type mismatch.

use crate::codecs::JsonKeyCodec;
use crate::error::{MapError, Result};
use crate::map::{MapOptions, TypedMap};
use crate::traits::{BackingStore, ValueCodec};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

struct RegisteredMap {
    key_type: TypeId,
    value_type: TypeId,
    /// A `TypedMap<K, V>` behind `Any`; the typed accessors downcast it.
    handle: Box<dyn Any + Send + Sync>,
    /// Type-erased shutdown hook for registry-wide teardown.
    stop: Box<dyn Fn() + Send + Sync>,
}

struct RegisteredBucket {
    value_type: TypeId,
    handle: Box<dyn Any + Send + Sync>,
}

/// Timer and window defaults applied to every map the registry creates.
#[derive(Debug, Clone)]
pub struct RegistryDefaults {
    /// Batch-update window (default 5 s).
    pub batch_window: Duration,
    /// Batch-update timer period (default 1 s).
    pub batch_tick: Duration,
    /// Idle-expiration timer period (default 10 s).
    pub reap_tick: Duration,
}

impl Default for RegistryDefaults {
    fn default() -> Self {
        let options = MapOptions::default();
        Self {
            batch_window: options.batch_window,
            batch_tick: options.batch_tick,
            reap_tick: options.reap_tick,
        }
    }
}

/// Builder for a [`MapRegistry`] with custom defaults
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use typed_map_cache::{MapRegistry, MemoryStore};
///
/// let registry = MapRegistry::builder()
///     .batch_window(Duration::from_secs(10))
///     .build(Arc::new(MemoryStore::new()));
/// ```
#[derive(Debug, Default)]
pub struct MapRegistryBuilder {
    defaults: RegistryDefaults,
}

impl MapRegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default batch-update window for maps created by this registry.
    #[must_use]
    pub fn batch_window(mut self, window: Duration) -> Self {
        self.defaults.batch_window = window;
        self
    }

    /// Default batch-update timer period.
    #[must_use]
    pub fn batch_tick(mut self, period: Duration) -> Self {
        self.defaults.batch_tick = period;
        self
    }

    /// Default idle-expiration timer period.
    #[must_use]
    pub fn reap_tick(mut self, period: Duration) -> Self {
        self.defaults.reap_tick = period;
        self
    }

    /// Build the registry over the given backing store.
    #[must_use]
    pub fn build(self, store: Arc<dyn BackingStore>) -> MapRegistry {
        MapRegistry {
            store,
            maps: DashMap::new(),
            buckets: DashMap::new(),
            defaults: self.defaults,
        }
    }
}

/// Creates and retrieves named maps and buckets over one backing store.
pub struct MapRegistry {
    store: Arc<dyn BackingStore>,
    maps: DashMap<String, RegisteredMap>,
    buckets: DashMap<String, RegisteredBucket>,
    defaults: RegistryDefaults,
}

impl MapRegistry {
    /// Registry with default timer settings.
    #[must_use]
    pub fn new(store: Arc<dyn BackingStore>) -> Self {
        Self::builder().build(store)
    }

    #[must_use]
    pub fn builder() -> MapRegistryBuilder {
        MapRegistryBuilder::new()
    }

    /// The backing store this registry was built over.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() || !name.is_ascii() {
            return Err(MapError::InvalidMapName(name.to_string()));
        }
        Ok(())
    }

    /// Create (or retrieve) the map called `name` with the given value codec,
    /// using the registry's timer defaults.
    ///
    /// `item_ttl` is written to the store when given; `None` leaves any
    /// previously configured TTL in place. Keys are encoded with the JSON key
    /// codec so field names stay dashboard-readable.
    ///
    /// # Errors
    ///
    /// [`MapError::MapTypeMismatch`] when `name` is already registered with
    /// different key/value types.
    pub async fn create<K, V>(
        &self,
        name: &str,
        value_codec: Arc<dyn ValueCodec<V>>,
        item_ttl: Option<Duration>,
    ) -> Result<TypedMap<K, V>>
    where
        K: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let options = MapOptions {
            item_ttl,
            batch_window: self.defaults.batch_window,
            batch_tick: self.defaults.batch_tick,
            reap_tick: self.defaults.reap_tick,
        };
        self.create_with_options(name, value_codec, options).await
    }

    /// Create (or retrieve) a map with explicit per-map options.
    pub async fn create_with_options<K, V>(
        &self,
        name: &str,
        value_codec: Arc<dyn ValueCodec<V>>,
        options: MapOptions,
    ) -> Result<TypedMap<K, V>>
    where
        K: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        Self::validate_name(name)?;
        if self.buckets.contains_key(name) {
            warn!(name = %name, "name already registered as a bucket");
            return Err(MapError::MapTypeMismatch {
                name: name.to_string(),
            });
        }

        let map = match self.maps.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                return Self::existing_map(name, entry.get());
            }
            Entry::Vacant(entry) => {
                let map = TypedMap::<K, V>::spawn(
                    name,
                    Arc::clone(&self.store),
                    Arc::new(JsonKeyCodec),
                    value_codec,
                    &options,
                );
                let stop_handle = map.clone();
                entry.insert(RegisteredMap {
                    key_type: TypeId::of::<K>(),
                    value_type: TypeId::of::<V>(),
                    handle: Box::new(map.clone()),
                    stop: Box::new(move || stop_handle.shutdown()),
                });
                debug!(name = %name, "registered map");
                map
            }
        };

        if let Some(ttl) = options.item_ttl {
            map.set_item_ttl(Some(ttl)).await?;
        }
        Ok(map)
    }

    /// Create (or retrieve) a JSON-codec map; the common case.
    pub async fn create_json<K, V>(
        &self,
        name: &str,
        item_ttl: Option<Duration>,
    ) -> Result<TypedMap<K, V>>
    where
        K: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.create(name, Arc::new(crate::codecs::JsonCodec), item_ttl)
            .await
    }

    /// Retrieve a previously registered map.
    ///
    /// # Errors
    ///
    /// [`MapError::MapNotRegistered`] for an unknown name,
    /// [`MapError::MapTypeMismatch`] when the requested types differ from the
    /// registered ones.
    pub fn get<K, V>(&self, name: &str) -> Result<TypedMap<K, V>>
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let entry = self
            .maps
            .get(name)
            .ok_or_else(|| MapError::MapNotRegistered(name.to_string()))?;
        Self::existing_map(name, entry.value())
    }

    fn existing_map<K, V>(name: &str, registered: &RegisteredMap) -> Result<TypedMap<K, V>>
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        if registered.key_type != TypeId::of::<K>() || registered.value_type != TypeId::of::<V>() {
            return Err(MapError::MapTypeMismatch {
                name: name.to_string(),
            });
        }
        registered
            .handle
            .downcast_ref::<TypedMap<K, V>>()
            .cloned()
            .ok_or_else(|| MapError::MapTypeMismatch {
                name: name.to_string(),
            })
    }

    /// Create (or retrieve) a single-value bucket.
    ///
    /// A bucket is a degenerate map with one implicit key, stored through the
    /// string primitives at `map:<name>`; it carries no per-entry metadata
    /// and runs no timers.
    pub fn create_bucket<V>(
        &self,
        name: &str,
        codec: Arc<dyn ValueCodec<V>>,
    ) -> Result<Bucket<V>>
    where
        V: Send + Sync + 'static,
    {
        Self::validate_name(name)?;
        if self.maps.contains_key(name) {
            warn!(name = %name, "name already registered as a map");
            return Err(MapError::MapTypeMismatch {
                name: name.to_string(),
            });
        }

        match self.buckets.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                let registered = entry.get();
                if registered.value_type != TypeId::of::<V>() {
                    return Err(MapError::MapTypeMismatch {
                        name: name.to_string(),
                    });
                }
                registered
                    .handle
                    .downcast_ref::<Bucket<V>>()
                    .cloned()
                    .ok_or_else(|| MapError::MapTypeMismatch {
                        name: name.to_string(),
                    })
            }
            Entry::Vacant(entry) => {
                let bucket = Bucket {
                    name: name.to_string(),
                    key: format!("map:{name}"),
                    store: Arc::clone(&self.store),
                    codec,
                };
                entry.insert(RegisteredBucket {
                    value_type: TypeId::of::<V>(),
                    handle: Box::new(bucket.clone()),
                });
                debug!(name = %name, "registered bucket");
                Ok(bucket)
            }
        }
    }

    /// Stop the timers of every registered map. Handles remain usable for
    /// retrieval but their operations report `Cancelled`.
    pub fn shutdown(&self) {
        for entry in &self.maps {
            (entry.value().stop)();
        }
        info!(maps = self.maps.len(), "map registry shut down");
    }
}

/// Single-value namespace: a degenerate map with one implicit key.
pub struct Bucket<V> {
    name: String,
    key: String,
    store: Arc<dyn BackingStore>,
    codec: Arc<dyn ValueCodec<V>>,
}

impl<V> Clone for Bucket<V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            key: self.key.clone(),
            store: Arc::clone(&self.store),
            codec: Arc::clone(&self.codec),
        }
    }
}

impl<V> Bucket<V>
where
    V: Send + Sync + 'static,
{
    /// Name of this bucket.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read the bucket value. An undecodable stored value is logged and
    /// reported as a miss.
    pub async fn get(&self) -> Result<Option<V>> {
        let Some(raw) = self.store.string_get(&self.key).await? else {
            return Ok(None);
        };
        match self.codec.deserialize(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                warn!(bucket = %self.name, "stored value failed to decode, treating as miss: {error}");
                Ok(None)
            }
        }
    }

    /// Write the bucket value.
    pub async fn set(&self, value: &V) -> Result<()> {
        let payload = self.codec.serialize(value)?;
        self.store.string_set(&self.key, payload.as_bytes()).await
    }

    /// Remove the bucket value.
    pub async fn clear(&self) -> Result<()> {
        self.store.key_delete(&self.key).await?;
        Ok(())
    }
}
