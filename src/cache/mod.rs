//! The sharded response cache (spec.md §4.4): TTL map with a background
//! sweeper, generalized from the teacher's `DashMap`-backed local cache
//! (`RoeeJ-heimdall/src/cache/mod.rs`'s `CacheKey`/`CacheEntry` pairing)
//! into a generic keyed store so the cache plugin owns the DNS-specific
//! policy and this module owns only storage.

pub mod dump;
pub mod single_flight;

use crate::dns::Message;
use crate::error::Result;
use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const SHARD_COUNT: usize = 32;
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);
/// spec.md §4.4 "miss" path: replies with zero answers get this default.
pub const NEGATIVE_DEFAULT_TTL: u32 = 300;

pub(crate) fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Builds the cache key from the query's wire encoding with the DNS id
/// zeroed, optionally namespaced by a per-branch salt (spec.md §3 "cache
/// key").
pub fn cache_key(query: &Message, salt: &[u8]) -> Result<Vec<u8>> {
    let mut m = query.clone();
    m.header.id = 0;
    let mut key = m.to_wire()?;
    key.extend_from_slice(salt);
    Ok(key)
}

#[derive(Clone)]
pub struct Entry<V> {
    pub value: V,
    pub stored_unix: u64,
    pub expiration_unix: u64,
}

struct Shard<V> {
    map: DashMap<Vec<u8>, Entry<V>>,
    capacity: Option<usize>,
    /// FIFO insertion order, used for "evict oldest on overflow" — an
    /// approximation of LRU that avoids a touch-on-read bookkeeping cost
    /// for the common case of a capacity safety valve rather than a
    /// precise working-set cache.
    order: Mutex<VecDeque<Vec<u8>>>,
}

impl<V> Shard<V> {
    fn new(capacity: Option<usize>) -> Self {
        Self { map: DashMap::new(), capacity, order: Mutex::new(VecDeque::new()) }
    }
}

/// A sharded, TTL-aware, optionally capacity-bounded key/value store.
pub struct ShardedCache<V> {
    shards: Vec<Shard<V>>,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
    close_tx: broadcast::Sender<()>,
}

impl<V: Clone + Send + Sync + 'static> ShardedCache<V> {
    pub fn new(per_shard_capacity: Option<usize>, sweep_interval: Duration) -> Arc<Self> {
        let shards = (0..SHARD_COUNT).map(|_| Shard::new(per_shard_capacity)).collect();
        let (close_tx, _) = broadcast::channel(1);
        let cache = Arc::new(Self { shards, sweep_handle: Mutex::new(None), close_tx });

        let sweeper = Arc::clone(&cache);
        let mut close_rx = cache.close_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => sweeper.sweep(),
                    _ = close_rx.recv() => break,
                }
            }
        });
        *cache.sweep_handle.lock() = Some(handle);
        cache
    }

    fn shard_for(&self, key: &[u8]) -> usize {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % SHARD_COUNT
    }

    pub fn get(&self, key: &[u8]) -> Option<V> {
        let shard = &self.shards[self.shard_for(key)];
        let now = now_unix();
        let hit = shard
            .map
            .get(key)
            .filter(|e| e.expiration_unix > now)
            .map(|e| e.value.clone());
        if hit.is_none() {
            shard.map.remove(key);
        }
        hit
    }

    /// Like `get`, but returns an expired entry instead of treating it as
    /// a miss and evicting it — the cache executable's lazy-refresh path
    /// (spec.md §4.4 "hit but expired") needs to read a stale entry
    /// without losing it before the background refresh completes.
    pub fn get_stale(&self, key: &[u8]) -> Option<Entry<V>> {
        let shard = &self.shards[self.shard_for(key)];
        shard.map.get(key).map(|e| e.clone())
    }

    /// No-op if `expiration_unix` is already in the past (spec.md §4.4
    /// `Store` semantics).
    pub fn store(&self, key: Vec<u8>, value: V, expiration_unix: u64) {
        let now = now_unix();
        if expiration_unix <= now {
            return;
        }
        let shard = &self.shards[self.shard_for(&key)];
        let is_new = shard
            .map
            .insert(key.clone(), Entry { value, stored_unix: now, expiration_unix })
            .is_none();

        if let Some(cap) = shard.capacity {
            let mut order = shard.order.lock();
            if is_new {
                order.push_back(key);
            }
            while order.len() > cap {
                if let Some(oldest) = order.pop_front() {
                    shard.map.remove(&oldest);
                }
            }
        }
    }

    /// Visits every entry under shard lock; `f` returns `true` to delete
    /// the entry it was just shown.
    pub fn range(&self, mut f: impl FnMut(&[u8], &Entry<V>) -> bool) {
        for shard in &self.shards {
            let mut to_delete = Vec::new();
            for item in shard.map.iter() {
                if f(item.key(), item.value()) {
                    to_delete.push(item.key().clone());
                }
            }
            for k in to_delete {
                shard.map.remove(&k);
            }
        }
    }

    pub fn flush(&self) {
        for shard in &self.shards {
            shard.map.clear();
            shard.order.lock().clear();
        }
    }

    fn sweep(&self) {
        let now = now_unix();
        self.range(|_, e| e.expiration_unix <= now);
    }

    /// Idempotent: stops the sweeper and drains it. A second call is a
    /// no-op since the handle is already taken.
    pub async fn close(&self) {
        let _ = self.close_tx.send(());
        let handle = self.sweep_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.map.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_after_expiration_returns_none_and_deletes() {
        let cache: Arc<ShardedCache<u32>> = ShardedCache::new(None, Duration::from_secs(3600));
        let now = now_unix();
        cache.store(b"k".to_vec(), 42, now + 1);
        assert_eq!(cache.get(b"k"), Some(42));
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(cache.get(b"k"), None);
        assert_eq!(cache.len(), 0);
        cache.close().await;
    }

    #[tokio::test]
    async fn store_no_ops_when_expiration_already_past() {
        let cache: Arc<ShardedCache<u32>> = ShardedCache::new(None, Duration::from_secs(3600));
        cache.store(b"k".to_vec(), 1, now_unix().saturating_sub(5));
        assert_eq!(cache.get(b"k"), None);
        cache.close().await;
    }

    #[tokio::test]
    async fn capacity_evicts_oldest_first() {
        let cache: Arc<ShardedCache<u32>> = ShardedCache::new(Some(1), Duration::from_secs(3600));
        let now = now_unix();
        // Force both keys into the same shard path is not guaranteed, so
        // exercise capacity at the Shard level indirectly: insert many
        // keys and assert total count never exceeds shard*capacity.
        for i in 0..64u32 {
            cache.store(format!("k{i}").into_bytes(), i, now + 60);
        }
        assert!(cache.len() <= SHARD_COUNT);
        cache.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let cache: Arc<ShardedCache<u32>> = ShardedCache::new(None, Duration::from_secs(3600));
        cache.close().await;
        cache.close().await;
    }
}
