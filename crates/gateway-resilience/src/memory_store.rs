//! In-process cache store.
//!
//! Bounded map with per-entry TTL. When full, expired entries are dropped first, then
//! the least-hit ones.

use crate::cache::{CacheError, CacheStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    created_at: Instant,
    ttl: Duration,
    hits: u64,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= self.ttl
    }
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    /// Reads that found a live entry
    pub hits: u64,
    /// Reads that found nothing or an expired entry
    pub misses: u64,
    /// Current number of entries
    pub entries: usize,
    /// Entries dropped to make room or because they expired
    pub evictions: u64,
}

impl MemoryStoreStats {
    /// Hit rate in percent
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<String, MemoryEntry>,
    stats: MemoryStoreStats,
}

/// Bounded in-memory [`CacheStore`]
#[derive(Debug)]
pub struct InMemoryCacheStore {
    max_entries: usize,
    state: Mutex<MemoryState>,
}

impl InMemoryCacheStore {
    /// Create a store holding at most `max_entries` values
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Statistics snapshot
    #[must_use]
    pub fn stats(&self) -> MemoryStoreStats {
        let state = self.state.lock();
        MemoryStoreStats {
            entries: state.entries.len(),
            ..state.stats.clone()
        }
    }

    /// Drop expired entries
    pub fn cleanup_expired(&self) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired());
        let removed = before - state.entries.len();
        state.stats.evictions += removed as u64;
        if removed > 0 {
            debug!(removed, "Expired cache entries removed");
        }
        removed
    }

    fn make_room(&self, state: &mut MemoryState) {
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired());
        let removed_expired = before - state.entries.len();

        if state.entries.len() >= self.max_entries {
            let to_remove = state.entries.len() - self.max_entries + 1;
            let mut by_hits: Vec<(String, u64)> = state
                .entries
                .iter()
                .map(|(key, entry)| (key.clone(), entry.hits))
                .collect();
            by_hits.sort_by_key(|(_, hits)| *hits);
            for (key, _) in by_hits.into_iter().take(to_remove) {
                state.entries.remove(&key);
            }
        }

        let removed = before - state.entries.len();
        state.stats.evictions += removed as u64;
        if removed > 0 {
            info!(removed_expired, removed_total = removed, "Cache eviction completed");
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let live = match state.entries.get(key).map(MemoryEntry::is_expired) {
            Some(false) => state.entries.get_mut(key).map(|entry| {
                entry.hits += 1;
                entry.value.clone()
            }),
            Some(true) => {
                state.entries.remove(key);
                state.stats.evictions += 1;
                None
            }
            None => None,
        };
        if live.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        Ok(live)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        if !state.entries.contains_key(key) && state.entries.len() >= self.max_entries {
            self.make_room(&mut state);
        }
        state.entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                created_at: Instant::now(),
                ttl,
                hits: 0,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.state.lock().entries.remove(key).is_some())
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - state.entries.len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = InMemoryCacheStore::new(10);
        store.set("k", b"v".to_vec(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_overwrite() {
        let store = InMemoryCacheStore::new(10);
        store.set("k", b"1".to_vec(), Duration::from_secs(60)).await.unwrap();
        store.set("k", b"2".to_vec(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_eviction_prefers_cold_entries() {
        let store = InMemoryCacheStore::new(2);
        store.set("hot", b"h".to_vec(), Duration::from_secs(60)).await.unwrap();
        store.set("cold", b"c".to_vec(), Duration::from_secs(60)).await.unwrap();
        store.get("hot").await.unwrap();

        store.set("new", b"n".to_vec(), Duration::from_secs(60)).await.unwrap();
        assert!(store.get("hot").await.unwrap().is_some());
        assert!(store.get("cold").await.unwrap().is_none());
        assert!(store.get("new").await.unwrap().is_some());
        assert_eq!(store.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_prefix_removal() {
        let store = InMemoryCacheStore::new(10);
        for key in ["c:users:1", "c:users:2", "c:orders:1"] {
            store.set(key, Vec::new(), Duration::from_secs(60)).await.unwrap();
        }
        assert_eq!(store.remove_prefix("c:users:").await.unwrap(), 2);
        assert!(store.remove("c:orders:1").await.unwrap());
        assert!(!store.remove("c:orders:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_hit_rate() {
        let store = InMemoryCacheStore::new(10);
        store.set("k", Vec::new(), Duration::from_secs(60)).await.unwrap();
        store.get("k").await.unwrap();
        store.get("missing").await.unwrap();
        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expired() {
        let store = InMemoryCacheStore::new(10);
        store.set("short", Vec::new(), Duration::from_secs(1)).await.unwrap();
        store.set("long", Vec::new(), Duration::from_secs(100)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.cleanup_expired(), 1);
        assert_eq!(store.stats().entries, 1);
    }
}
