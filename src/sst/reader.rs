use std::sync::Arc;

use crate::{
    encoding::{crc, decode_fixed32},
    error::{Error, Result},
    fs::RandomAccessFile,
    options::{CompressionType, Options},
};

use super::{
    block::Block, filter_block::FilterBlockReader, BlockCacheKey, Footer, OffsetSize,
    BLOCK_TRAILER_SIZE, FOOTER_SIZE,
};

// Reads a block and verifies its trailer, returning the payload.
pub fn read_block<R: RandomAccessFile>(file: &R, handle: OffsetSize) -> Result<Vec<u8>> {
    let n = handle.size as usize;
    let len = n.checked_add(BLOCK_TRAILER_SIZE).ok_or_else(|| {
        Error::corruption(format!("block size {} out of range", handle.size))
    })?;
    let mut buf = file.read_at(handle.offset, len)?;

    let tag = buf[n];
    let stored = crc::unmask(decode_fixed32(&buf[n + 1..]));
    let actual = crc::block_value(&buf[..n], tag);
    if stored != actual {
        return Err(Error::corruption(format!(
            "block checksum mismatch at offset {}",
            handle.offset
        )));
    }
    if CompressionType::from_tag(tag).is_none() {
        return Err(Error::corruption(format!(
            "unknown compression type {} at offset {}",
            tag, handle.offset
        )));
    }

    buf.truncate(n);
    Ok(buf)
}

// Point lookups and full scans over a finished table.
pub struct TableReader<R: RandomAccessFile> {
    file: R,
    // Distinguishes this table's blocks in a shared block cache.
    file_id: u64,
    options: Options,
    index: Block,
    filter: Option<FilterBlockReader>,
}

impl<R> TableReader<R>
where
    R: RandomAccessFile,
{
    pub fn open(file: R, file_id: u64, options: &Options) -> Result<Self> {
        let size = file.size()?;
        if size < FOOTER_SIZE as u64 {
            return Err(Error::corruption(format!(
                "file of {} bytes is too short to be a table",
                size
            )));
        }
        let footer = Footer::decode(&file.read_at(size - FOOTER_SIZE as u64, FOOTER_SIZE)?)?;
        let index = Block::new(read_block(&file, footer.index_handle)?)?;

        let mut filter = None;
        if let Some(policy) = &options.filter_policy {
            let meta = Block::new(read_block(&file, footer.meta_handle)?)?;
            let name = policy.name().as_bytes();
            // Meta keys are compared bytewise whatever the table's comparator.
            for entry in meta.iter() {
                let (key, value) = entry?;
                if key == name {
                    let handle = OffsetSize::decode(&value)?;
                    filter = Some(FilterBlockReader::new(
                        policy.clone(),
                        read_block(&file, handle)?,
                    ));
                    break;
                }
            }
            if filter.is_none() {
                tracing::debug!(policy = policy.name(), "table has no matching filter");
            }
        }

        Ok(TableReader {
            file,
            file_id,
            options: options.clone(),
            index,
            filter,
        })
    }

    // False only if the key is definitely absent.
    pub fn key_may_match(&self, key: &[u8]) -> bool {
        match &self.filter {
            Some(filter) => filter.key_may_match(key),
            None => true,
        }
    }

    // Runs `f` on the data block at `handle`, going through the block cache
    // when there is one.
    fn with_data_block<T, F>(&self, handle: OffsetSize, f: F) -> Result<T>
    where
        F: FnOnce(&Block) -> Result<T>,
    {
        let cache = match &self.options.block_cache {
            Some(cache) => cache,
            None => return f(&Block::new(read_block(&self.file, handle)?)?),
        };

        let key = BlockCacheKey {
            file_id: self.file_id,
            offset: handle.offset,
        };
        let cached = match cache.get(&key) {
            Some(h) => h,
            None => {
                let block = Arc::new(Block::new(read_block(&self.file, handle)?)?);
                cache.insert(key, block.clone(), 0);
                match cache.get(&key) {
                    Some(h) => h,
                    // Already evicted by a concurrent insert.
                    None => return f(block.as_ref()),
                }
            }
        };
        let result = f(cached.value().as_ref());
        cache.release(cached);
        result
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if !self.key_may_match(key) {
            return Ok(None);
        }
        let cmp = self.options.comparator();
        let handle = match self.index.seek(key, cmp.as_ref())? {
            Some((_, value)) => OffsetSize::decode(&value)?,
            None => return Ok(None),
        };
        self.with_data_block(handle, |block| {
            Ok(match block.seek(key, cmp.as_ref())? {
                Some((found, value)) if found == key => Some(value),
                _ => None,
            })
        })
    }

    pub fn index_entries(&self) -> Result<Vec<(Vec<u8>, OffsetSize)>> {
        self.index
            .iter()
            .map(|entry| {
                let (key, value) = entry?;
                Ok((key, OffsetSize::decode(&value)?))
            })
            .collect()
    }

    // Every entry in the table, in order.
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for (_, handle) in self.index_entries()? {
            let block = self.with_data_block(handle, |block| block.entries())?;
            out.extend(block);
        }
        Ok(out)
    }
}
