//! In-Process Backing Store
//!
//! A single-process implementation of the backing-store contract, covering
//! the same hash / sorted-set / string primitives a Redis-like server offers.
//! It backs the integration test-suite and embedded use where no external
//! server is wanted; semantics mirror the server ones, including the removal
//! of container keys once their last member is gone.

use crate::error::{MapError, Result};
use crate::traits::{BackingStore, RangeOrder};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// One keyed datum; a key holds exactly one shape at a time.
#[derive(Debug, Clone)]
enum Slot {
    Hash(HashMap<String, Vec<u8>>),
    SortedSet(HashMap<String, f64>),
    Text(Vec<u8>),
}

/// In-process backing store over a single guarded keyspace.
///
/// A sorted set needs ordered range reads across members, so one lock over
/// the keyspace replaces per-entry sharding; every operation locks, works,
/// and releases without suspending.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        debug!("Initializing in-process backing store");
        Self::default()
    }

    fn wrong_type(key: &str) -> MapError {
        MapError::BackendUnavailable(format!(
            "WRONGTYPE operation against key '{key}' holding another shape"
        ))
    }
}

/// Glob match supporting `*` and `?`, as the server-side scan commands do.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => {
            glob_match(rest, text)
                || text.split_first().is_some_and(|(_, t)| glob_match(pattern, t))
        }
        Some((b'?', rest)) => text.split_first().is_some_and(|(_, t)| glob_match(rest, t)),
        Some((c, rest)) => text
            .split_first()
            .is_some_and(|(t, tt)| t == c && glob_match(rest, tt)),
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        match self.slots.lock().get(key) {
            None => Ok(None),
            Some(Slot::Hash(hash)) => Ok(hash.get(field).cloned()),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    async fn hash_set(&self, key: &str, field: &str, value: &[u8]) -> Result<()> {
        let mut slots = self.slots.lock();
        let slot = slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::Hash(HashMap::new()));
        match slot {
            Slot::Hash(hash) => {
                hash.insert(field.to_string(), value.to_vec());
                Ok(())
            }
            _ => Err(Self::wrong_type(key)),
        }
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool> {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(key) else {
            return Ok(false);
        };
        match slot {
            Slot::Hash(hash) => {
                let existed = hash.remove(field).is_some();
                if hash.is_empty() {
                    slots.remove(key);
                }
                Ok(existed)
            }
            _ => Err(Self::wrong_type(key)),
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, Vec<u8>)>> {
        match self.slots.lock().get(key) {
            None => Ok(Vec::new()),
            Some(Slot::Hash(hash)) => Ok(hash
                .iter()
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect()),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    async fn hash_len(&self, key: &str) -> Result<u64> {
        match self.slots.lock().get(key) {
            None => Ok(0),
            Some(Slot::Hash(hash)) => Ok(hash.len() as u64),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    fn hash_scan(
        &self,
        key: &str,
        pattern: &str,
        _page_size: usize,
    ) -> BoxStream<'static, Result<(String, Vec<u8>)>> {
        // Snapshot under the lock, then stream without it. Field order is
        // unspecified by the contract; sorting keeps pages deterministic.
        let snapshot = match self.slots.lock().get(key) {
            None => Ok(Vec::new()),
            Some(Slot::Hash(hash)) => {
                let mut pairs: Vec<(String, Vec<u8>)> = hash
                    .iter()
                    .filter(|(field, _)| glob_match(pattern.as_bytes(), field.as_bytes()))
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect();
                pairs.sort_by(|a, b| a.0.cmp(&b.0));
                Ok(pairs)
            }
            Some(_) => Err(Self::wrong_type(key)),
        };
        match snapshot {
            Ok(pairs) => Box::pin(stream::iter(pairs.into_iter().map(Ok))),
            Err(err) => Box::pin(stream::iter(std::iter::once(Err(err)))),
        }
    }

    async fn hash_keys(&self, key: &str) -> Result<Vec<String>> {
        match self.slots.lock().get(key) {
            None => Ok(Vec::new()),
            Some(Slot::Hash(hash)) => Ok(hash.keys().cloned().collect()),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut slots = self.slots.lock();
        let slot = slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::SortedSet(HashMap::new()));
        match slot {
            Slot::SortedSet(set) => {
                set.insert(member.to_string(), score);
                Ok(())
            }
            _ => Err(Self::wrong_type(key)),
        }
    }

    async fn sorted_set_remove(&self, key: &str, member: &str) -> Result<bool> {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(key) else {
            return Ok(false);
        };
        match slot {
            Slot::SortedSet(set) => {
                let existed = set.remove(member).is_some();
                if set.is_empty() {
                    slots.remove(key);
                }
                Ok(existed)
            }
            _ => Err(Self::wrong_type(key)),
        }
    }

    async fn sorted_set_len(&self, key: &str) -> Result<u64> {
        match self.slots.lock().get(key) {
            None => Ok(0),
            Some(Slot::SortedSet(set)) => Ok(set.len() as u64),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        exclude_min: bool,
        order: RangeOrder,
    ) -> Result<Vec<String>> {
        let mut scored: Vec<(f64, String)> = match self.slots.lock().get(key) {
            None => return Ok(Vec::new()),
            Some(Slot::SortedSet(set)) => set
                .iter()
                .filter(|&(_, &score)| {
                    let lower_ok = if exclude_min { score > min } else { score >= min };
                    lower_ok && score <= max
                })
                .map(|(member, &score)| (score, member.clone()))
                .collect(),
            Some(_) => return Err(Self::wrong_type(key)),
        };
        // Ties break on member, matching server lexicographic ordering.
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        if order == RangeOrder::Descending {
            scored.reverse();
        }
        Ok(scored.into_iter().map(|(_, member)| member).collect())
    }

    async fn key_exists(&self, key: &str) -> Result<bool> {
        Ok(self.slots.lock().contains_key(key))
    }

    async fn key_delete(&self, key: &str) -> Result<bool> {
        Ok(self.slots.lock().remove(key).is_some())
    }

    async fn string_get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.slots.lock().get(key) {
            None => Ok(None),
            Some(Slot::Text(value)) => Ok(Some(value.clone())),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    async fn string_set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.slots
            .lock()
            .insert(key.to_string(), Slot::Text(value.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn hash_set_get_delete() {
        let store = MemoryStore::new();
        store.hash_set("h", "a", b"1").await.unwrap();
        store.hash_set("h", "b", b"2").await.unwrap();

        assert_eq!(store.hash_get("h", "a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.hash_get("h", "missing").await.unwrap(), None);
        assert_eq!(store.hash_len("h").await.unwrap(), 2);

        assert!(store.hash_delete("h", "a").await.unwrap());
        assert!(!store.hash_delete("h", "a").await.unwrap());
        assert_eq!(store.hash_len("h").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn container_keys_vanish_when_emptied() {
        let store = MemoryStore::new();
        store.hash_set("h", "a", b"1").await.unwrap();
        assert!(store.key_exists("h").await.unwrap());
        store.hash_delete("h", "a").await.unwrap();
        assert!(!store.key_exists("h").await.unwrap());

        store.sorted_set_add("z", "m", 1.0).await.unwrap();
        store.sorted_set_remove("z", "m").await.unwrap();
        assert!(!store.key_exists("z").await.unwrap());
    }

    #[tokio::test]
    async fn range_by_score_orders_and_filters() {
        let store = MemoryStore::new();
        for (member, score) in [("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 3.0)] {
            store.sorted_set_add("z", member, score).await.unwrap();
        }

        let all = store
            .sorted_set_range_by_score("z", f64::NEG_INFINITY, f64::INFINITY, false, RangeOrder::Ascending)
            .await
            .unwrap();
        assert_eq!(all, vec!["a", "b", "c", "d"]);

        // Exclusive lower bound drops the boundary score.
        let above_two = store
            .sorted_set_range_by_score("z", 2.0, f64::INFINITY, true, RangeOrder::Ascending)
            .await
            .unwrap();
        assert_eq!(above_two, vec!["c", "d"]);

        let descending = store
            .sorted_set_range_by_score("z", 1.0, 3.0, false, RangeOrder::Descending)
            .await
            .unwrap();
        assert_eq!(descending, vec!["d", "c", "b", "a"]);
    }

    #[tokio::test]
    async fn scan_honours_glob_pattern() {
        let store = MemoryStore::new();
        store.hash_set("h", "user:1", b"x").await.unwrap();
        store.hash_set("h", "user:2", b"y").await.unwrap();
        store.hash_set("h", "order:1", b"z").await.unwrap();

        let fields: Vec<String> = store
            .hash_scan("h", "user:*", 100)
            .map(|item| item.unwrap().0)
            .collect()
            .await;
        assert_eq!(fields, vec!["user:1", "user:2"]);
    }

    #[tokio::test]
    async fn shape_conflicts_are_reported() {
        let store = MemoryStore::new();
        store.hash_set("k", "f", b"v").await.unwrap();
        assert!(store.sorted_set_add("k", "m", 1.0).await.is_err());
        assert!(store.string_get("k").await.is_err());
    }

    #[tokio::test]
    async fn string_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.string_get("s").await.unwrap(), None);
        store.string_set("s", b"300").await.unwrap();
        assert_eq!(store.string_get("s").await.unwrap(), Some(b"300".to_vec()));
        assert!(store.key_delete("s").await.unwrap());
        assert_eq!(store.string_get("s").await.unwrap(), None);
    }

    #[test]
    fn glob_basics() {
        assert!(glob_match(b"*", b"anything"));
        assert!(glob_match(b"user:*", b"user:17"));
        assert!(!glob_match(b"user:*", b"order:17"));
        assert!(glob_match(b"h?t", b"hat"));
        assert!(!glob_match(b"h?t", b"heat"));
    }
}
