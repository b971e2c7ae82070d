pub mod bloom;

pub use bloom::BloomFilter;

// A probabilistic membership test over a batch of keys. The serialized filter
// written into a table is the policy's raw filter bytes followed by a fixed32
// holding `hash_count()`, so readers can probe it without knowing how it was
// configured.
pub trait FilterPolicy: Send + Sync + std::fmt::Debug {
    // Recorded in the table's meta block; changing it orphans existing filters.
    fn name(&self) -> &'static str;

    fn hash_count(&self) -> u32;

    // Appends a filter for `keys` to `dst`. Existing contents of `dst` are
    // left untouched, so several filters can share one buffer as disjoint
    // segments.
    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>);

    // Probes one filter segment produced by `create_filter`.
    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;

    // Probes a serialized filter block (filter bytes + fixed32 hash count).
    fn key_may_match_encoded(&self, key: &[u8], block: &[u8]) -> bool;
}
