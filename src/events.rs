//! Map event registration and dispatch
//!
//! Each map carries one handler registry per event kind (`add`, `update`,
//! `remove`, `clear`, `expired`, `batch-update`). Handlers run in
//! registration order, each awaited, under a per-map dispatch lock so a
//! subscriber observes at most one event at a time for its map. A failing
//! handler is logged and counted, never propagated, so one bad subscriber
//! cannot stall dispatch or starve the subscribers after it.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::warn;

pub(crate) type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

type EntryHandler<K, V> = Arc<dyn Fn(K, V) -> HandlerFuture + Send + Sync>;
type ClearHandler = Arc<dyn Fn() -> HandlerFuture + Send + Sync>;
type BatchHandler<K, V> = Arc<dyn Fn(Arc<Vec<(K, V)>>) -> HandlerFuture + Send + Sync>;

/// Per-entry event kinds carrying a key and value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryEvent {
    Added,
    Updated,
    Removed,
    Expired,
}

struct HandlerSet<K, V> {
    added: Vec<EntryHandler<K, V>>,
    updated: Vec<EntryHandler<K, V>>,
    removed: Vec<EntryHandler<K, V>>,
    expired: Vec<EntryHandler<K, V>>,
    cleared: Vec<ClearHandler>,
    batch: Vec<BatchHandler<K, V>>,
}

impl<K, V> Default for HandlerSet<K, V> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
            expired: Vec::new(),
            cleared: Vec::new(),
            batch: Vec::new(),
        }
    }
}

/// Handler registry and serialised dispatcher of one map.
pub(crate) struct MapEvents<K, V> {
    map_name: String,
    handlers: RwLock<HandlerSet<K, V>>,
    /// Serialises dispatch across every event kind of this map.
    dispatch: Mutex<()>,
    handler_errors: AtomicU64,
}

impl<K, V> MapEvents<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(map_name: &str) -> Self {
        Self {
            map_name: map_name.to_string(),
            handlers: RwLock::new(HandlerSet::default()),
            dispatch: Mutex::new(()),
            handler_errors: AtomicU64::new(0),
        }
    }

    pub(crate) fn subscribe_entry<F, Fut>(&self, event: EntryEvent, handler: F)
    where
        F: Fn(K, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: EntryHandler<K, V> = Arc::new(move |key, value| handler(key, value).boxed());
        let mut set = self.handlers.write();
        match event {
            EntryEvent::Added => set.added.push(boxed),
            EntryEvent::Updated => set.updated.push(boxed),
            EntryEvent::Removed => set.removed.push(boxed),
            EntryEvent::Expired => set.expired.push(boxed),
        }
    }

    pub(crate) fn subscribe_clear<F, Fut>(&self, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: ClearHandler = Arc::new(move || handler().boxed());
        self.handlers.write().cleared.push(boxed);
    }

    pub(crate) fn subscribe_batch<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<Vec<(K, V)>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: BatchHandler<K, V> = Arc::new(move |entries| handler(entries).boxed());
        self.handlers.write().batch.push(boxed);
    }

    /// Dispatch one per-entry event to its subscribers in registration order.
    pub(crate) async fn emit_entry(&self, event: EntryEvent, key: &K, value: &V) {
        let handlers = {
            let set = self.handlers.read();
            match event {
                EntryEvent::Added => set.added.clone(),
                EntryEvent::Updated => set.updated.clone(),
                EntryEvent::Removed => set.removed.clone(),
                EntryEvent::Expired => set.expired.clone(),
            }
        };
        if handlers.is_empty() {
            return;
        }

        let _guard = self.dispatch.lock().await;
        for handler in handlers {
            if let Err(error) = handler(key.clone(), value.clone()).await {
                self.record_handler_error(&format!("{event:?}"), &error);
            }
        }
    }

    pub(crate) async fn emit_clear(&self) {
        let handlers = self.handlers.read().cleared.clone();
        if handlers.is_empty() {
            return;
        }

        let _guard = self.dispatch.lock().await;
        for handler in handlers {
            if let Err(error) = handler().await {
                self.record_handler_error("Clear", &error);
            }
        }
    }

    /// Dispatch one batch notification; every subscriber receives the same
    /// snapshot, which stays alive for the whole dispatch.
    pub(crate) async fn emit_batch(&self, entries: Arc<Vec<(K, V)>>) {
        let handlers = self.handlers.read().batch.clone();
        if handlers.is_empty() {
            return;
        }

        let _guard = self.dispatch.lock().await;
        for handler in handlers {
            if let Err(error) = handler(Arc::clone(&entries)).await {
                self.record_handler_error("BatchUpdate", &error);
            }
        }
    }

    pub(crate) fn handler_error_count(&self) -> u64 {
        self.handler_errors.load(Ordering::Relaxed)
    }

    fn record_handler_error(&self, event: &str, error: &anyhow::Error) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
        warn!(map = %self.map_name, event = %event, "event handler failed: {error:#}");
    }
}
