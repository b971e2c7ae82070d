use super::decode_fixed32;

const BLOOM_SEED: u32 = 0xbc9f_1d34;

// Murmur-style 32-bit hash. Filters written to disk depend on this exact
// function, so it must never change.
pub fn hash(data: &[u8], seed: u32) -> u32 {
    const M: u32 = 0xc6a4_a793;
    const R: u32 = 24;

    let mut h = seed ^ (data.len() as u32).wrapping_mul(M);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        h = h.wrapping_add(decode_fixed32(chunk));
        h = h.wrapping_mul(M);
        h ^= h >> 16;
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        if tail.len() == 3 {
            h = h.wrapping_add((tail[2] as u32) << 16);
        }
        if tail.len() >= 2 {
            h = h.wrapping_add((tail[1] as u32) << 8);
        }
        h = h.wrapping_add(tail[0] as u32);
        h = h.wrapping_mul(M);
        h ^= h >> R;
    }
    h
}

pub fn bloom_hash(key: &[u8]) -> u32 {
    hash(key, BLOOM_SEED)
}
