pub mod arena;
pub mod skiplist;

use std::{cmp::Ordering, sync::Arc};

use crate::comparator::{BytewiseComparator, Comparator};

use self::skiplist::{Iter, KeyComparator, SkipList};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

pub struct EntryComparator(Arc<dyn Comparator>);

impl KeyComparator<MemEntry> for EntryComparator {
    fn compare(&self, a: &MemEntry, b: &MemEntry) -> Ordering {
        self.0.compare(&a.key, &b.key)
    }
}

// The in-memory write buffer. Keys are unique: the first write of a key wins
// and later writes of the same key are rejected, so a flush sees exactly one
// value per key in comparator order.
pub struct Memtable {
    list: SkipList<MemEntry, EntryComparator>,
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new(Arc::new(BytewiseComparator))
    }
}

impl Memtable {
    pub fn new(comparator: Arc<dyn Comparator>) -> Self {
        Memtable {
            list: SkipList::new(EntryComparator(comparator)),
        }
    }

    fn probe(key: &[u8]) -> MemEntry {
        MemEntry {
            key: key.to_vec(),
            value: Vec::new(),
        }
    }

    // Returns false for an empty key or one that is already present.
    pub fn add(&self, key: &[u8], value: &[u8]) -> bool {
        if key.is_empty() {
            return false;
        }
        self.list.insert(MemEntry {
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let entry = self.list.iter_from(&Self::probe(key)).next()?;
        if entry.key == key {
            Some(&entry.value)
        } else {
            None
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.list.contains(&Self::probe(key))
    }

    pub fn iter(&self) -> Iter<'_, MemEntry, EntryComparator> {
        self.list.iter()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn approximate_memory_usage(&self) -> usize {
        self.list.memory_usage()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_memtable() {
        let mem = Memtable::default();
        assert!(mem.is_empty());

        assert!(mem.add(b"banana", b"yellow"));
        assert!(mem.add(b"apple", b"red"));
        assert!(mem.add(b"cherry", b""));
        assert!(!mem.add(b"apple", b"green"));
        assert!(!mem.add(b"", b"nothing"));

        assert_eq!(mem.len(), 3);
        assert_eq!(mem.get(b"apple"), Some(&b"red"[..]));
        assert_eq!(mem.get(b"cherry"), Some(&b""[..]));
        assert_eq!(mem.get(b"app"), None);
        assert_eq!(mem.get(b"zebra"), None);
        assert!(mem.contains(b"banana"));
        assert!(!mem.contains(b"bananas"));

        let keys: Vec<&[u8]> = mem.iter().map(|e| e.key.as_slice()).collect();
        assert_eq!(keys, vec![&b"apple"[..], b"banana", b"cherry"]);
        assert!(mem.approximate_memory_usage() > 0);
    }

    #[test]
    fn test_shared_readers() {
        let mem = Arc::new(Memtable::default());
        for i in 0..100_u32 {
            mem.add(format!("k{:03}", i).as_bytes(), &i.to_le_bytes());
        }
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mem = mem.clone();
                thread::spawn(move || {
                    for i in 0..100_u32 {
                        let v = mem.get(format!("k{:03}", i).as_bytes()).unwrap();
                        assert_eq!(v, i.to_le_bytes());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
