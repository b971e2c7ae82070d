use crate::encoding::{decode_fixed32, hash::bloom_hash};

use super::FilterPolicy;

const LN_2: f64 = std::f64::consts::LN_2;
const MIN_FILTER_BITS: usize = 64;
const MAX_HASH_COUNT: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomFilter {
    bits_per_key: u32,
    hash_count: u32,
}

impl BloomFilter {
    pub fn new(bits_per_key: u32) -> Self {
        BloomFilter {
            bits_per_key,
            hash_count: Self::optimal_hash_count(bits_per_key),
        }
    }

    // Sizes the filter for `entries` keys at a target false-positive rate.
    pub fn with_false_positive_rate(entries: usize, rate: f64) -> Self {
        let n = entries.max(1) as f64;
        let rate = rate.clamp(1e-9, 0.999_999);
        let total_bits = -n * rate.ln() / (LN_2 * LN_2);
        Self::new((total_bits / n).ceil() as u32)
    }

    fn optimal_hash_count(bits_per_key: u32) -> u32 {
        let k = (bits_per_key as f64 * LN_2).round() as u32;
        k.clamp(1, MAX_HASH_COUNT)
    }

    pub fn bits_per_key(&self) -> u32 {
        self.bits_per_key
    }

    // Expected false-positive rate once `entries` keys are in a filter of
    // `bits` bits: (1 - e^(-kn/m))^k.
    pub fn expected_false_positive_rate(&self, entries: usize, bits: usize) -> f64 {
        let k = self.hash_count as f64;
        (1.0 - (-k * entries as f64 / bits as f64).exp()).powf(k)
    }
}

// Double hashing: k probes derived from a single hash [Kirsch, Mitzenmacher 2006].
fn probe(key: &[u8], hash_count: u32, array: &[u8]) -> bool {
    let bits = (array.len() * 8) as u32;
    if bits == 0 {
        return false;
    }
    let mut h = bloom_hash(key);
    let delta = h.rotate_right(17);
    for _ in 0..hash_count {
        let bitpos = h % bits;
        if array[(bitpos / 8) as usize] & (1 << (bitpos % 8)) == 0 {
            return false;
        }
        h = h.wrapping_add(delta);
    }
    true
}

impl FilterPolicy for BloomFilter {
    fn name(&self) -> &'static str {
        "lsm.BuiltinBloomFilter"
    }

    fn hash_count(&self) -> u32 {
        self.hash_count
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        if keys.is_empty() {
            return;
        }

        let bits = std::cmp::max(MIN_FILTER_BITS, keys.len() * self.bits_per_key as usize);
        let bytes = (bits + 7) / 8;
        let bits = (bytes * 8) as u32;

        let init_len = dst.len();
        dst.resize(init_len + bytes, 0);
        let array = &mut dst[init_len..];

        for key in keys {
            let mut h = bloom_hash(key);
            let delta = h.rotate_right(17);
            for _ in 0..self.hash_count {
                let bitpos = h % bits;
                array[(bitpos / 8) as usize] |= 1 << (bitpos % 8);
                h = h.wrapping_add(delta);
            }
        }
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        if key.is_empty() || filter.is_empty() {
            return false;
        }
        if self.hash_count > MAX_HASH_COUNT {
            return true;
        }
        probe(key, self.hash_count, filter)
    }

    fn key_may_match_encoded(&self, key: &[u8], block: &[u8]) -> bool {
        if key.is_empty() || block.len() < 4 {
            return false;
        }
        let (array, k) = block.split_at(block.len() - 4);
        let k = decode_fixed32(k);
        // Reserved for encodings we don't understand; don't filter anything out.
        if k > MAX_HASH_COUNT || array.is_empty() {
            return true;
        }
        probe(key, k, array)
    }
}
