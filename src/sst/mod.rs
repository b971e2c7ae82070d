pub mod block;
pub mod filter_block;
pub mod reader;
pub mod writer;

// This package provides facilities to both write and read back Sorted-String
// Tables (SSTs).
//
// An SST is an indexed, immutable, durable data structure, produced by
// flushing a memtable to disk. Logically it holds a set of key-value pairs,
// ordered on keys.
//
// Physically, an SST is a sequence of _blocks_ followed by a footer:
//
//   [data block]*  [filter block]?  [meta block]  [index block]  [footer]
//
// Every block is stored as its payload followed by a 5-byte trailer: a 1-byte
// compression tag and a masked CRC-32C of payload + tag.
//
// Data blocks hold the key-value pairs. Each key is written as the length of
// the prefix it shares with the previous key plus the remaining suffix, which
// is what keeps long hierarchical keys cheap. Every `block_restart_interval`
// entries the prefix compression starts over; those _restart points_ are
// listed at the end of the block so readers can binary search them.
//
// The filter block is a bloom filter over every key in the table. The meta
// block maps the filter policy's name to the filter block's handle.
//
// The index block has one entry per data block: a key that is >= every key in
// that block and < every key in the next one, mapping to the block's handle.
//
// The footer is fixed-size: the meta block handle, the index block handle,
// and a magic number.

use crate::{
    encoding::{decode_fixed64, put_fixed64},
    error::{Error, Result},
};

pub const BLOCK_TRAILER_SIZE: usize = 5;
pub const FOOTER_SIZE: usize = 2 * OffsetSize::ENCODED_LEN + 8;
pub const TABLE_MAGIC: u64 = 0x6c73_6d74_6162_6c65;

// Locates a block payload within a table file. `size` excludes the trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OffsetSize {
    pub offset: u64,
    pub size: u64,
}

impl OffsetSize {
    pub const ENCODED_LEN: usize = 16;

    pub fn new(offset: u64, size: u64) -> Self {
        OffsetSize { offset, size }
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_fixed64(dst, self.offset);
        put_fixed64(dst, self.size);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LEN);
        self.encode_to(&mut buf);
        buf
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < Self::ENCODED_LEN {
            return Err(Error::corruption("truncated block handle"));
        }
        Ok(OffsetSize {
            offset: decode_fixed64(src),
            size: decode_fixed64(&src[8..]),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub meta_handle: OffsetSize,
    pub index_handle: OffsetSize,
}

impl Footer {
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        self.meta_handle.encode_to(dst);
        self.index_handle.encode_to(dst);
        put_fixed64(dst, TABLE_MAGIC);
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() != FOOTER_SIZE {
            return Err(Error::corruption(format!(
                "footer is {} bytes, want {}",
                src.len(),
                FOOTER_SIZE
            )));
        }
        if decode_fixed64(&src[2 * OffsetSize::ENCODED_LEN..]) != TABLE_MAGIC {
            return Err(Error::corruption("bad table magic number"));
        }
        Ok(Footer {
            meta_handle: OffsetSize::decode(src)?,
            index_handle: OffsetSize::decode(&src[OffsetSize::ENCODED_LEN..])?,
        })
    }
}

// Identifies a decoded data block in the block cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockCacheKey {
    pub file_id: u64,
    pub offset: u64,
}
