use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    cache::{Cache, ShardedCache, DEFAULT_SHARDS},
    comparator::{BytewiseComparator, Comparator},
    error::Result,
    filter::{BloomFilter, FilterPolicy},
    sst::{block::Block, BlockCacheKey},
};

pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024;
pub const DEFAULT_BLOCK_RESTART_INTERVAL: usize = 16;

pub type BlockCache = dyn Cache<BlockCacheKey, Arc<Block>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    #[default]
    None,
    // Reserved: the tag is written, but payloads are stored as-is.
    Snappy,
}

impl CompressionType {
    pub fn tag(self) -> u8 {
        match self {
            CompressionType::None => 0x0,
            CompressionType::Snappy => 0x1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x0 => Some(CompressionType::None),
            0x1 => Some(CompressionType::Snappy),
            _ => None,
        }
    }

    // Write path: anything we can't produce degrades to no compression.
    pub fn from_requested_tag(tag: u8) -> Self {
        Self::from_tag(tag).unwrap_or(CompressionType::None)
    }

    pub fn compress(self, raw: &[u8]) -> &[u8] {
        // TODO: plug a real snappy codec in here once the read path can
        // decompress; both types pass the payload through for now.
        raw
    }
}

// Read-only configuration shared by reference for a table builder's lifetime.
#[derive(Clone)]
pub struct Options {
    pub block_size: usize,
    pub block_restart_interval: usize,
    // Reserved for compaction; unused by the write path.
    pub max_level_num: u32,
    // Reserved for key/value separation; unused by the write path.
    pub max_key_value_split_threshold: usize,
    pub block_compress_type: CompressionType,
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
    // Without a comparator no index block entries are produced.
    pub comparator: Option<Arc<dyn Comparator>>,
    pub block_cache: Option<Arc<BlockCache>>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            block_size: DEFAULT_BLOCK_SIZE,
            block_restart_interval: DEFAULT_BLOCK_RESTART_INTERVAL,
            max_level_num: 7,
            max_key_value_split_threshold: 1024,
            block_compress_type: CompressionType::None,
            filter_policy: None,
            comparator: Some(Arc::new(BytewiseComparator)),
            block_cache: None,
        }
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("block_size", &self.block_size)
            .field("block_restart_interval", &self.block_restart_interval)
            .field("max_level_num", &self.max_level_num)
            .field(
                "max_key_value_split_threshold",
                &self.max_key_value_split_threshold,
            )
            .field("block_compress_type", &self.block_compress_type)
            .field("filter_policy", &self.filter_policy.as_ref().map(|p| p.name()))
            .field("comparator", &self.comparator.as_ref().map(|c| c.name()))
            .field("block_cache", &self.block_cache.as_ref().map(|c| c.name()))
            .finish()
    }
}

impl Options {
    pub fn comparator(&self) -> Arc<dyn Comparator> {
        self.comparator
            .clone()
            .unwrap_or_else(|| Arc::new(BytewiseComparator))
    }
}

// On-disk / user-facing form of `Options`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub block_size: usize,
    pub block_restart_interval: usize,
    pub max_level_num: u32,
    pub max_key_value_split_threshold: usize,
    pub compression: CompressionType,
    pub bloom_bits_per_key: Option<u32>,
    pub block_cache_capacity: Option<usize>,
    pub block_cache_shards: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        TableConfig {
            block_size: DEFAULT_BLOCK_SIZE,
            block_restart_interval: DEFAULT_BLOCK_RESTART_INTERVAL,
            max_level_num: 7,
            max_key_value_split_threshold: 1024,
            compression: CompressionType::None,
            bloom_bits_per_key: None,
            block_cache_capacity: None,
            block_cache_shards: DEFAULT_SHARDS,
        }
    }
}

impl TableConfig {
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn into_options(self) -> Options {
        let filter_policy = self
            .bloom_bits_per_key
            .map(|bits| Arc::new(BloomFilter::new(bits)) as Arc<dyn FilterPolicy>);
        let block_cache = self.block_cache_capacity.map(|capacity| {
            Arc::new(ShardedCache::with_shards(capacity, self.block_cache_shards))
                as Arc<BlockCache>
        });
        Options {
            block_size: self.block_size,
            block_restart_interval: self.block_restart_interval.max(1),
            max_level_num: self.max_level_num,
            max_key_value_split_threshold: self.max_key_value_split_threshold,
            block_compress_type: self.compression,
            filter_policy,
            comparator: Some(Arc::new(BytewiseComparator)),
            block_cache,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = Options::default();
        assert_eq!(opts.block_size, 4096);
        assert_eq!(opts.block_restart_interval, 16);
        assert_eq!(opts.max_level_num, 7);
        assert_eq!(opts.max_key_value_split_threshold, 1024);
        assert_eq!(opts.block_compress_type, CompressionType::None);
        assert!(opts.filter_policy.is_none());
        assert!(opts.block_cache.is_none());
    }

    #[test]
    fn test_config_from_json() -> anyhow::Result<()> {
        let cfg = TableConfig::from_json(
            r#"{"block_size": 1024, "compression": "snappy", "bloom_bits_per_key": 10, "block_cache_capacity": 64}"#,
        )?;
        assert_eq!(cfg.block_size, 1024);
        assert_eq!(cfg.block_restart_interval, 16);
        assert_eq!(cfg.compression, CompressionType::Snappy);

        let opts = cfg.into_options();
        assert_eq!(opts.block_size, 1024);
        assert_eq!(opts.filter_policy.as_ref().unwrap().hash_count(), 7);
        assert_eq!(opts.block_cache.as_ref().unwrap().name(), "shard.cache");
        Ok(())
    }

    #[test]
    fn test_config_rejects_unknown_compression() {
        let err = TableConfig::from_json(r#"{"compression": "zstd"}"#).unwrap_err();
        assert!(matches!(err, crate::error::Error::Config(_)));
    }

    #[test]
    fn test_config_json_roundtrip() -> anyhow::Result<()> {
        let cfg = TableConfig {
            bloom_bits_per_key: Some(12),
            ..TableConfig::default()
        };
        assert_eq!(TableConfig::from_json(&cfg.to_json()?)?, cfg);
        Ok(())
    }

    #[test]
    fn test_compression_tags() {
        assert_eq!(CompressionType::from_tag(0), Some(CompressionType::None));
        assert_eq!(CompressionType::from_tag(1), Some(CompressionType::Snappy));
        assert_eq!(CompressionType::from_tag(7), None);
        assert_eq!(CompressionType::from_requested_tag(7), CompressionType::None);
    }
}
