use std::{
    cmp::Ordering as CmpOrdering,
    marker::PhantomData,
    ptr,
    sync::atomic::{AtomicPtr, AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use rand::Rng;

use super::arena::Arena;

pub const MAX_HEIGHT: usize = 20;
const BRANCHING: u32 = 4;

pub trait KeyComparator<K>: Send + Sync {
    fn compare(&self, a: &K, b: &K) -> CmpOrdering;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OrdComparator;

impl<K: Ord> KeyComparator<K> for OrdComparator {
    fn compare(&self, a: &K, b: &K) -> CmpOrdering {
        a.cmp(b)
    }
}

struct Node<K> {
    key: K,
    // One successor link per level the node participates in.
    tower: Box<[AtomicPtr<Node<K>>]>,
}

// An ordered set of keys without duplicates.
//
// Readers never lock: a node is fully built before the release store that
// links it in, and every traversal loads links with acquire, so a reader that
// can see a node can see all of it. Inserts are serialized by `write_lock`.
// There is no delete; nodes live in the arena until the list is dropped.
pub struct SkipList<K, C> {
    // A null link in `head` (or a null `prev` slot below) stands for the head
    // sentinel itself.
    head: Box<[AtomicPtr<Node<K>>]>,
    max_height: AtomicUsize,
    len: AtomicUsize,
    arena: Arena<Node<K>>,
    write_lock: Mutex<()>,
    cmp: C,
}

fn random_height() -> usize {
    let mut rng = rand::thread_rng();
    let mut height = 1;
    while height < MAX_HEIGHT && rng.gen_ratio(1, BRANCHING) {
        height += 1;
    }
    height
}

fn empty_tower<K>(height: usize) -> Box<[AtomicPtr<Node<K>>]> {
    (0..height)
        .map(|_| AtomicPtr::new(ptr::null_mut()))
        .collect()
}

impl<K, C> SkipList<K, C>
where
    C: KeyComparator<K>,
{
    pub fn new(cmp: C) -> Self {
        SkipList {
            head: empty_tower(MAX_HEIGHT),
            max_height: AtomicUsize::new(1),
            len: AtomicUsize::new(0),
            arena: Arena::new(),
            write_lock: Mutex::new(()),
            cmp,
        }
    }

    fn max_height(&self) -> usize {
        self.max_height.load(Ordering::Relaxed)
    }

    fn next(&self, node: *mut Node<K>, level: usize) -> *mut Node<K> {
        if node.is_null() {
            self.head[level].load(Ordering::Acquire)
        } else {
            // SAFETY: non-null nodes are owned by the arena and outlive &self.
            unsafe { (*node).tower[level].load(Ordering::Acquire) }
        }
    }

    fn set_next(&self, node: *mut Node<K>, level: usize, next: *mut Node<K>) {
        if node.is_null() {
            self.head[level].store(next, Ordering::Release)
        } else {
            unsafe { (*node).tower[level].store(next, Ordering::Release) }
        }
    }

    fn key_is_after_node(&self, key: &K, node: *mut Node<K>) -> bool {
        !node.is_null() && self.cmp.compare(unsafe { &(*node).key }, key) == CmpOrdering::Less
    }

    // Returns the first node whose key is >= `key` (null if there is none),
    // recording the last node before it on every level in `prev`.
    fn find_greater_or_equal(
        &self,
        key: &K,
        mut prev: Option<&mut [*mut Node<K>; MAX_HEIGHT]>,
    ) -> *mut Node<K> {
        let mut x: *mut Node<K> = ptr::null_mut();
        let mut level = self.max_height() - 1;
        loop {
            let next = self.next(x, level);
            if self.key_is_after_node(key, next) {
                x = next;
            } else {
                if let Some(p) = prev.as_deref_mut() {
                    p[level] = x;
                }
                if level == 0 {
                    return next;
                }
                level -= 1;
            }
        }
    }

    // Returns false, leaving the list untouched, if `key` is already present.
    pub fn insert(&self, key: K) -> bool {
        let _guard = self.write_lock.lock();

        let mut prev = [ptr::null_mut(); MAX_HEIGHT];
        let x = self.find_greater_or_equal(&key, Some(&mut prev));
        if !x.is_null() && self.cmp.compare(&key, unsafe { &(*x).key }) == CmpOrdering::Equal {
            tracing::warn!("skiplist: duplicate key, insert ignored");
            return false;
        }

        let height = random_height();
        if height > self.max_height() {
            // prev[old_max..height] are already the head sentinel. Readers
            // that see the new height before the links just find null there
            // and drop a level.
            self.max_height.store(height, Ordering::Relaxed);
        }

        let tower_bytes = height * std::mem::size_of::<AtomicPtr<Node<K>>>();
        let node = self
            .arena
            .alloc(
                Node {
                    key,
                    tower: empty_tower(height),
                },
                tower_bytes,
            )
            .as_ptr();

        for (level, p) in prev.iter().enumerate().take(height) {
            // The node isn't reachable yet, so its own links can be relaxed.
            unsafe {
                (*node).tower[level].store(self.next(*p, level), Ordering::Relaxed);
            }
            self.set_next(*p, level, node);
        }

        self.len.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn contains(&self, key: &K) -> bool {
        let x = self.find_greater_or_equal(key, None);
        !x.is_null() && self.cmp.compare(key, unsafe { &(*x).key }) == CmpOrdering::Equal
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn memory_usage(&self) -> usize {
        self.arena.memory_usage()
    }

    pub fn iter(&self) -> Iter<'_, K, C> {
        Iter {
            list: self,
            node: self.next(ptr::null_mut(), 0),
            _marker: PhantomData,
        }
    }

    // Iterates from the first key >= `key`.
    pub fn iter_from(&self, key: &K) -> Iter<'_, K, C> {
        let mut it = self.iter();
        it.seek(key);
        it
    }
}

// Level-0 traversal in comparator order.
pub struct Iter<'a, K, C> {
    list: &'a SkipList<K, C>,
    node: *mut Node<K>,
    _marker: PhantomData<&'a K>,
}

impl<'a, K, C> Iter<'a, K, C>
where
    C: KeyComparator<K>,
{
    pub fn seek(&mut self, key: &K) {
        self.node = self.list.find_greater_or_equal(key, None);
    }

    pub fn seek_to_first(&mut self) {
        self.node = self.list.next(ptr::null_mut(), 0);
    }

    pub fn peek(&self) -> Option<&'a K> {
        if self.node.is_null() {
            None
        } else {
            Some(unsafe { &(*self.node).key })
        }
    }
}

impl<'a, K, C> Iterator for Iter<'a, K, C>
where
    C: KeyComparator<K>,
{
    type Item = &'a K;

    fn next(&mut self) -> Option<&'a K> {
        let key = self.peek()?;
        self.node = self.list.next(self.node, 0);
        Some(key)
    }
}
