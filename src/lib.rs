//! The write path of a log-structured merge storage engine: a concurrent
//! skiplist memtable, a sorted table encoder with bloom filters and
//! checksummed blocks, and a sharded reference-counted LRU cache for decoded
//! blocks.

pub mod cache;
pub mod comparator;
pub mod db;
pub mod encoding;
pub mod error;
pub mod filter;
pub mod fs;
pub mod logging;
pub mod manifest;
pub mod memtable;
pub mod options;
pub mod sst;

pub use crate::{
    cache::{Cache, CacheHandle, ShardedCache},
    comparator::{BytewiseComparator, Comparator},
    error::{Error, Result},
    filter::{BloomFilter, FilterPolicy},
    memtable::Memtable,
    options::{CompressionType, Options, TableConfig},
    sst::{reader::TableReader, writer::TableBuilder},
};
