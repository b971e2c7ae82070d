use std::cmp::Ordering;

pub trait Comparator: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    // If `start < limit`, shortens `start` to some key in [start, limit).
    // Used to keep index block keys small.
    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]);

    // Changes `key` to a short key >= key.
    fn find_short_successor(&self, key: &mut Vec<u8>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn name(&self) -> &'static str {
        "lsm.BytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let min_len = std::cmp::min(start.len(), limit.len());
        let diff_index = start
            .iter()
            .zip(limit.iter())
            .position(|(a, b)| a != b)
            .unwrap_or(min_len);

        if diff_index >= min_len {
            // One is a prefix of the other.
            return;
        }

        let diff_byte = start[diff_index];
        if diff_byte < 0xff && diff_byte + 1 < limit[diff_index] {
            start[diff_index] += 1;
            start.truncate(diff_index + 1);
            debug_assert!(self.compare(start, limit) == Ordering::Less);
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        if let Some(idx) = key.iter().position(|b| *b != 0xff) {
            key[idx] += 1;
            key.truncate(idx + 1);
        }
        // Otherwise key is a run of 0xff bytes; leave it alone.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separator(start: &str, limit: &str) -> String {
        let mut s = start.as_bytes().to_vec();
        BytewiseComparator.find_shortest_separator(&mut s, limit.as_bytes());
        String::from_utf8(s).unwrap()
    }

    #[test]
    fn test_shortest_separator() {
        assert_eq!(separator("abcdefg", "abzzz"), "abd");
        assert_eq!(separator("apple", "banana"), "apple");
        assert_eq!(separator("abc", "abcd"), "abc");
        assert_eq!(separator("abc1", "abc2"), "abc1");
        assert_eq!(separator("foo", "foo"), "foo");
        assert_eq!(separator("a", "c"), "b");
    }

    #[test]
    fn test_short_successor() {
        let mut k = b"abc".to_vec();
        BytewiseComparator.find_short_successor(&mut k);
        assert_eq!(k, b"b");

        let mut k = vec![0xff, 0xff, 0x10, 0x20];
        BytewiseComparator.find_short_successor(&mut k);
        assert_eq!(k, vec![0xff, 0xff, 0x11]);

        let mut k = vec![0xff, 0xff];
        BytewiseComparator.find_short_successor(&mut k);
        assert_eq!(k, vec![0xff, 0xff]);
    }
}
