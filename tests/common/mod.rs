//! Common utilities for integration tests
//!
//! Shared infrastructure: registry setup over the in-process store,
//! millisecond-scale timer options, an event recorder, and polling helpers.

use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use typed_map_cache::{MapOptions, MapRegistry, MemoryStore};

static TRACING: Once = Once::new();

/// Initialise test logging once; honours `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Registry over a fresh in-process store.
pub fn registry() -> MapRegistry {
    init_tracing();
    MapRegistry::new(Arc::new(MemoryStore::new()))
}

/// Registry plus a handle on its store for direct seeding and inspection.
pub fn registry_with_store() -> (MapRegistry, Arc<MemoryStore>) {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    (MapRegistry::new(store.clone()), store)
}

/// Millisecond-scale timers so suites finish fast.
pub fn fast_options() -> MapOptions {
    MapOptions {
        item_ttl: None,
        batch_window: Duration::from_millis(400),
        batch_tick: Duration::from_millis(50),
        reap_tick: Duration::from_millis(50),
    }
}

/// Unique map name so suites never collide on store keys.
pub fn test_map_name(name: &str) -> String {
    format!("test_{}_{}", name, rand::random::<u32>())
}

/// Collects event occurrences for ordering and count assertions.
#[derive(Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// Poll a condition until it holds or the timeout elapses.
pub async fn wait_until<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Current milliseconds since the Unix epoch, for seeding timestamp rows.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
