//! Redis Backing Store
//!
//! Redis-based implementation of the backing-store contract with
//! `ConnectionManager` for automatic reconnection. This is the default store
//! for shared deployments where several processes must observe the same maps.

use crate::error::Result;
use crate::traits::{BackingStore, RangeOrder};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Redis backing store with `ConnectionManager` for automatic reconnection
///
/// The manager is cloned per call; clones share the underlying multiplexed
/// connection, so this is cheap and keeps every method `&self`.
#[derive(Clone)]
pub struct RedisStore {
    conn_manager: ConnectionManager,
}

impl RedisStore {
    /// Connect using the `REDIS_URL` environment variable, defaulting to
    /// `redis://127.0.0.1:6379`.
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis client cannot be created or the
    /// connection fails.
    pub async fn new() -> Result<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        Self::with_url(&redis_url).await
    }

    /// Connect to a specific Redis URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis client cannot be created or the
    /// connection fails.
    pub async fn with_url(redis_url: &str) -> Result<Self> {
        info!(redis_url = %redis_url, "Initializing Redis backing store with ConnectionManager");

        let client = Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await?;

        // Test connection
        let mut conn = conn_manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!(redis_url = %redis_url, "Redis backing store connected (ConnectionManager enabled)");

        Ok(Self { conn_manager })
    }

    /// Verify the store round-trips data: write a probe key, read it back,
    /// remove it.
    pub async fn health_check(&self) -> bool {
        let test_key = "health_check_map_store";
        let test_value = b"health_check_value";

        match self.string_set(test_key, test_value).await {
            Ok(()) => match self.string_get(test_key).await {
                Ok(Some(retrieved)) => {
                    let _ = self.key_delete(test_key).await;
                    retrieved == test_value
                }
                _ => false,
            },
            Err(_) => false,
        }
    }
}

/// Renders a range bound for ZRANGEBYSCORE, with `(` marking exclusivity.
fn score_bound(score: f64, exclusive: bool) -> String {
    if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else if score == f64::INFINITY {
        "+inf".to_string()
    } else if exclusive {
        format!("({score}")
    } else {
        format!("{score}")
    }
}

/// Cursor state for the lazy HSCAN stream.
struct ScanState {
    conn: ConnectionManager,
    key: String,
    pattern: String,
    page_size: usize,
    cursor: u64,
    buffered: VecDeque<(String, Vec<u8>)>,
    exhausted: bool,
}

#[async_trait]
impl BackingStore for RedisStore {
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn_manager.clone();
        Ok(conn.hget(key, field).await?)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let removed: i64 = conn.hdel(key, field).await?;
        Ok(removed > 0)
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut conn = self.conn_manager.clone();
        Ok(conn.hgetall(key).await?)
    }

    async fn hash_len(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn_manager.clone();
        Ok(conn.hlen(key).await?)
    }

    fn hash_scan(
        &self,
        key: &str,
        pattern: &str,
        page_size: usize,
    ) -> BoxStream<'static, Result<(String, Vec<u8>)>> {
        let state = ScanState {
            conn: self.conn_manager.clone(),
            key: key.to_string(),
            pattern: pattern.to_string(),
            page_size,
            cursor: 0,
            buffered: VecDeque::new(),
            exhausted: false,
        };

        // HSCAN cursor MATCH pattern COUNT page_size, one server page per
        // poll; cursor 0 ends the iteration.
        Box::pin(stream::try_unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.buffered.pop_front() {
                    return Ok(Some((item, state)));
                }
                if state.exhausted {
                    return Ok(None);
                }
                let (next_cursor, page): (u64, Vec<(String, Vec<u8>)>) = redis::cmd("HSCAN")
                    .arg(&state.key)
                    .arg(state.cursor)
                    .arg("MATCH")
                    .arg(&state.pattern)
                    .arg("COUNT")
                    .arg(state.page_size)
                    .query_async(&mut state.conn)
                    .await?;
                state.cursor = next_cursor;
                if next_cursor == 0 {
                    state.exhausted = true;
                }
                state.buffered.extend(page);
            }
        }))
    }

    async fn hash_keys(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn_manager.clone();
        Ok(conn.hkeys(key).await?)
    }

    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn sorted_set_remove(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let removed: i64 = conn.zrem(key, member).await?;
        Ok(removed > 0)
    }

    async fn sorted_set_len(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn_manager.clone();
        Ok(conn.zcard(key).await?)
    }

    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        exclude_min: bool,
        order: RangeOrder,
    ) -> Result<Vec<String>> {
        let mut conn = self.conn_manager.clone();
        let min_arg = score_bound(min, exclude_min);
        let max_arg = score_bound(max, false);
        let members: Vec<String> = match order {
            RangeOrder::Ascending => {
                redis::cmd("ZRANGEBYSCORE")
                    .arg(key)
                    .arg(&min_arg)
                    .arg(&max_arg)
                    .query_async(&mut conn)
                    .await?
            }
            RangeOrder::Descending => {
                redis::cmd("ZREVRANGEBYSCORE")
                    .arg(key)
                    .arg(&max_arg)
                    .arg(&min_arg)
                    .query_async(&mut conn)
                    .await?
            }
        };
        debug!(key = %key, count = members.len(), "[Redis] Range-by-score query");
        Ok(members)
    }

    async fn key_exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        Ok(conn.exists(key).await?)
    }

    async fn key_delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn string_get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn_manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn string_set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_bounds_render_like_the_server_expects() {
        assert_eq!(score_bound(f64::NEG_INFINITY, false), "-inf");
        assert_eq!(score_bound(f64::INFINITY, false), "+inf");
        assert_eq!(score_bound(1500.0, false), "1500");
        assert_eq!(score_bound(1500.0, true), "(1500");
    }
}
