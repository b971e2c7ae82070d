pub mod lru;

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
};

use parking_lot::Mutex;

pub use self::lru::LruShard;

pub const DEFAULT_SHARDS: usize = 4;

// Called exactly once per node, with the node's key and value, when its last
// reference goes away. It runs under the shard lock and must not call back
// into the cache.
pub type CleanHandle<K, V> = Arc<dyn Fn(&K, V) + Send + Sync>;

// A reference to a cached value. The node behind it is not reclaimed until
// the handle is passed back to `Cache::release`, even if the key is erased or
// evicted in the meantime.
#[derive(Debug)]
#[must_use = "cache handles must be released"]
pub struct CacheHandle<K, V> {
    id: u64,
    key: K,
    value: V,
}

impl<K, V> CacheHandle<K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }
}

pub trait Cache<K, V>: Send + Sync {
    fn name(&self) -> &'static str;

    // Replaces any node already cached under `key`. `ttl` is in seconds, 0
    // for none.
    fn insert(&self, key: K, value: V, ttl: u64);

    // Every handle returned must be released exactly once.
    fn get(&self, key: &K) -> Option<CacheHandle<K, V>>;

    fn release(&self, handle: CacheHandle<K, V>);

    fn erase(&self, key: &K);

    fn prune(&self);

    fn register_clean_handle(&self, cleaner: CleanHandle<K, V>);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pending_len(&self) -> usize;
}

// Keys are spread over independently locked LRU shards by hash. Each shard
// gets the full capacity.
pub struct ShardedCache<K, V> {
    shards: Vec<Mutex<LruShard<K, V>>>,
}

impl<K, V> ShardedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self::with_shards(capacity, DEFAULT_SHARDS)
    }

    pub fn with_shards(capacity: usize, shards: usize) -> Self {
        ShardedCache {
            shards: (0..shards.max(1))
                .map(|_| Mutex::new(LruShard::new(capacity)))
                .collect(),
        }
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, key: &K) -> &Mutex<LruShard<K, V>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() % self.shards.len() as u64) as usize]
    }
}

impl<K, V> Cache<K, V> for ShardedCache<K, V>
where
    K: Hash + Eq + Clone + Send,
    V: Clone + Send,
{
    fn name(&self) -> &'static str {
        "shard.cache"
    }

    fn insert(&self, key: K, value: V, ttl: u64) {
        self.shard(&key).lock().insert(key, value, ttl)
    }

    fn get(&self, key: &K) -> Option<CacheHandle<K, V>> {
        self.shard(key).lock().get(key)
    }

    fn release(&self, handle: CacheHandle<K, V>) {
        self.shard(&handle.key).lock().release(handle)
    }

    fn erase(&self, key: &K) {
        self.shard(key).lock().erase(key)
    }

    fn prune(&self) {
        for shard in &self.shards {
            shard.lock().prune();
        }
    }

    fn register_clean_handle(&self, cleaner: CleanHandle<K, V>) {
        for shard in &self.shards {
            shard.lock().set_cleaner(cleaner.clone());
        }
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    fn pending_len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().pending_len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
        thread,
    };

    use super::*;

    type Cleaned = Arc<Mutex<HashMap<u64, usize>>>;

    fn counting_cache(capacity: usize) -> (Arc<ShardedCache<u64, Arc<String>>>, Cleaned) {
        let cache = Arc::new(ShardedCache::new(capacity));
        let cleaned = Arc::new(Mutex::new(HashMap::new()));
        let sink = cleaned.clone();
        cache.register_clean_handle(Arc::new(move |k: &u64, _v: Arc<String>| {
            *sink.lock().entry(*k).or_insert(0) += 1;
        }));
        (cache, cleaned)
    }

    #[test]
    fn test_handle_outlives_erase() {
        let (cache, cleaned) = counting_cache(16);
        cache.insert(7, Arc::new("seven".to_owned()), 0);

        let a = cache.get(&7).unwrap();
        let b = cache.get(&7).unwrap();
        cache.erase(&7);

        assert!(cache.get(&7).is_none());
        assert_eq!(cache.pending_len(), 1);
        assert_eq!(a.value().as_str(), "seven");

        cache.release(a);
        assert!(cleaned.lock().is_empty());
        assert_eq!(b.value().as_str(), "seven");

        cache.release(b);
        assert_eq!(cleaned.lock().get(&7), Some(&1));
        assert_eq!(cache.pending_len(), 0);
    }

    #[test]
    fn test_replace_keeps_old_value_alive() {
        let (cache, cleaned) = counting_cache(16);
        cache.insert(1, Arc::new("old".to_owned()), 0);
        let old = cache.get(&1).unwrap();
        cache.insert(1, Arc::new("new".to_owned()), 0);

        let new = cache.get(&1).unwrap();
        assert_eq!(new.value().as_str(), "new");
        assert_eq!(old.value().as_str(), "old");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.pending_len(), 1);

        cache.release(old);
        cache.release(new);
        assert_eq!(cleaned.lock().get(&1), Some(&1));
        cache.erase(&1);
        assert_eq!(cleaned.lock().get(&1), Some(&2));
    }

    #[test]
    fn test_prune_reclaims_stragglers() {
        let (cache, cleaned) = counting_cache(16);
        cache.insert(3, Arc::new("three".to_owned()), 0);
        let h = cache.get(&3).unwrap();
        cache.erase(&3);
        assert_eq!(cache.pending_len(), 1);

        cache.prune();
        assert_eq!(cache.pending_len(), 0);
        assert_eq!(cleaned.lock().get(&3), Some(&1));

        // The node is already gone; this is logged and ignored.
        cache.release(h);
        assert_eq!(cleaned.lock().get(&3), Some(&1));
    }

    #[test]
    fn test_single_shard_eviction() {
        let cache: ShardedCache<u32, u32> = ShardedCache::with_shards(3, 1);
        for k in 0..3 {
            cache.insert(k, k * 10, 0);
        }
        // Touch 0 so that 1 becomes the least recently used.
        let h = cache.get(&0).unwrap();
        cache.release(h);

        cache.insert(3, 30, 0);
        assert_eq!(cache.len(), 3);
        assert!(cache.get(&1).is_none());
        for k in [0, 2, 3] {
            let h = cache.get(&k).unwrap();
            assert_eq!(*h.value(), k * 10);
            cache.release(h);
        }
    }

    #[test]
    fn test_keys_spread_over_shards() {
        let cache: ShardedCache<u64, u64> = ShardedCache::new(1000);
        assert_eq!(cache.num_shards(), DEFAULT_SHARDS);
        for k in 0..400 {
            cache.insert(k, k, 0);
        }
        assert_eq!(cache.len(), 400);
        let per_shard: Vec<usize> = cache.shards.iter().map(|s| s.lock().len()).collect();
        assert!(per_shard.iter().all(|n| *n > 0), "{:?}", per_shard);
    }

    #[test]
    fn test_concurrent_get_release() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let cache: Arc<ShardedCache<u64, Arc<Vec<u8>>>> = Arc::new(ShardedCache::new(8));
        let counter = destroyed.clone();
        cache.register_clean_handle(Arc::new(move |_: &u64, _: Arc<Vec<u8>>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let threads: Vec<_> = (0..4_u64)
            .map(|t| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for i in 0..500_u64 {
                        let key = (i + t) % 32;
                        cache.insert(key, Arc::new(vec![key as u8; 16]), 0);
                        if let Some(h) = cache.get(&((i * 7) % 32)) {
                            assert!(h.value().iter().all(|b| *b as u64 == *h.key()));
                            cache.release(h);
                        }
                        if i % 50 == 0 {
                            cache.erase(&key);
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let live = cache.len();
        assert_eq!(cache.pending_len(), 0);
        // Every insert produced exactly one node; each is either live or was
        // destroyed exactly once.
        assert_eq!(destroyed.load(Ordering::SeqCst) + live, 4 * 500);
    }
}
