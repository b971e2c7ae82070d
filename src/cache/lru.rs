use std::{
    collections::{HashMap, HashSet},
    hash::Hash,
    time::{Duration, Instant},
};

use lru::LruCache;

use super::{CacheHandle, CleanHandle};

struct CacheNode<K, V> {
    key: K,
    value: V,
    // One reference belongs to the cache while the node is linked in `lru`,
    // plus one per outstanding handle.
    refs: u32,
    in_cache: bool,
    last_access: Instant,
    // Seconds of idleness after which `get` treats the node as gone; 0 never
    // expires.
    ttl: u64,
}

impl<K, V> CacheNode<K, V> {
    fn expired(&self, now: Instant) -> bool {
        self.ttl > 0 && now.duration_since(self.last_access) >= Duration::from_secs(self.ttl)
    }
}

// A single, unlocked LRU partition. Nodes are addressed by id so that a
// detached node and its replacement under the same key never collide.
pub struct LruShard<K, V> {
    capacity: usize,
    // Key -> id of the node currently in the cache, least recently used first
    // out.
    lru: LruCache<K, u64>,
    nodes: HashMap<u64, CacheNode<K, V>>,
    // Detached (erased, evicted, replaced or expired) nodes that are still
    // referenced by some handle.
    pending: HashSet<u64>,
    next_id: u64,
    cleaner: Option<CleanHandle<K, V>>,
}

impl<K, V> LruShard<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        LruShard {
            capacity: capacity.max(1),
            lru: LruCache::unbounded(),
            nodes: HashMap::new(),
            pending: HashSet::new(),
            next_id: 0,
            cleaner: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_cleaner(&mut self, cleaner: CleanHandle<K, V>) {
        self.cleaner = Some(cleaner);
    }

    pub fn insert(&mut self, key: K, value: V, ttl: u64) {
        if let Some(old) = self.lru.pop(&key) {
            self.finish_erase(old);
        } else if self.lru.len() >= self.capacity {
            if let Some((_, victim)) = self.lru.pop_lru() {
                self.finish_erase(victim);
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(
            id,
            CacheNode {
                key: key.clone(),
                value,
                refs: 1,
                in_cache: true,
                last_access: Instant::now(),
                ttl,
            },
        );
        self.lru.put(key, id);
    }

    pub fn get(&mut self, key: &K) -> Option<CacheHandle<K, V>> {
        let id = *self.lru.get(key)?;
        let now = Instant::now();
        let node = self.nodes.get_mut(&id)?;
        if node.expired(now) {
            self.lru.pop(key);
            self.finish_erase(id);
            return None;
        }
        node.refs += 1;
        node.last_access = now;
        Some(CacheHandle {
            id,
            key: node.key.clone(),
            value: node.value.clone(),
        })
    }

    pub fn release(&mut self, handle: CacheHandle<K, V>) {
        self.unref(handle.id);
    }

    pub fn erase(&mut self, key: &K) {
        if let Some(id) = self.lru.pop(key) {
            self.finish_erase(id);
        }
    }

    // Drops one reference from every detached node.
    pub fn prune(&mut self) {
        let ids: Vec<u64> = self.pending.iter().copied().collect();
        for id in ids {
            self.unref(id);
        }
    }

    pub fn len(&self) -> usize {
        self.lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    // Keys in the cache, most recently used first.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.lru.iter().map(|(k, _)| k)
    }

    // The caller has already unlinked `id` from `lru`.
    fn finish_erase(&mut self, id: u64) {
        if let Some(node) = self.nodes.get_mut(&id) {
            debug_assert!(node.in_cache);
            node.in_cache = false;
            self.pending.insert(id);
            self.unref(id);
        }
    }

    fn unref(&mut self, id: u64) {
        let node = match self.nodes.get_mut(&id) {
            Some(node) => node,
            None => {
                tracing::warn!(node = id, "cache: release of reclaimed node ignored");
                return;
            }
        };
        debug_assert!(node.refs > 0);
        node.refs -= 1;
        if node.refs > 0 {
            return;
        }
        if let Some(node) = self.nodes.remove(&id) {
            debug_assert!(!node.in_cache);
            self.pending.remove(&id);
            if let Some(cleaner) = &self.cleaner {
                cleaner(&node.key, node.value);
            }
        }
    }
}
