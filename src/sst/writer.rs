use crate::{
    encoding::{crc, put_fixed32},
    error::{Error, Result},
    fs::WritableFile,
    options::{CompressionType, Options},
};

use super::{
    block::BlockBuilder, filter_block::FilterBlockBuilder, Footer, OffsetSize, BLOCK_TRAILER_SIZE,
    FOOTER_SIZE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Finishing,
    Closed,
}

// Streams sorted key-value pairs into one table file.
//
// Callers serialize access; one builder per file. Once any write fails the
// builder stops writing, `success()` turns false for good and the file must
// be thrown away.
pub struct TableBuilder<'a, W: WritableFile> {
    options: &'a Options,
    file: &'a mut W,
    // End of everything written so far.
    offset: u64,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    filter_block: Option<FilterBlockBuilder>,
    last_key: Vec<u8>,
    num_entries: u64,
    // Set after a data block is flushed. Its index entry waits for the next
    // key so that the separator can be shortened against it.
    pending_index_entry: bool,
    pending_handle: OffsetSize,
    state: State,
    failed: bool,
}

impl<'a, W> TableBuilder<'a, W>
where
    W: WritableFile,
{
    pub fn new(options: &'a Options, file: &'a mut W) -> Self {
        TableBuilder {
            options,
            file,
            offset: 0,
            data_block: BlockBuilder::new(options.block_restart_interval),
            index_block: BlockBuilder::new(1),
            filter_block: options.filter_policy.clone().map(FilterBlockBuilder::new),
            last_key: Vec::new(),
            num_entries: 0,
            pending_index_entry: false,
            pending_handle: OffsetSize::default(),
            state: State::Open,
            failed: false,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.state != State::Open {
            return Err(Error::Interrupt("table builder is finished"));
        }
        if self.failed {
            return Err(Error::Interrupt("table builder has failed"));
        }
        Ok(())
    }

    fn latch<T>(&mut self, r: Result<T>) -> Result<T> {
        if r.is_err() {
            self.failed = true;
        }
        r
    }

    // Keys must be added in ascending comparator order. An empty key is
    // ignored.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_writable()?;
        if key.is_empty() {
            return Ok(());
        }
        let options = self.options;
        if let Some(cmp) = &options.comparator {
            debug_assert!(
                self.num_entries == 0 || cmp.compare(&self.last_key, key).is_lt(),
                "keys added out of order"
            );
        }

        if self.pending_index_entry {
            debug_assert!(self.data_block.is_empty());
            if let Some(cmp) = &options.comparator {
                cmp.find_shortest_separator(&mut self.last_key, key);
                self.index_block
                    .add(&self.last_key, &self.pending_handle.encode());
            }
            self.pending_index_entry = false;
        }

        if let Some(filter) = self.filter_block.as_mut() {
            filter.add_key(key);
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.current_size_estimate() >= options.block_size {
            self.flush()?;
        }
        Ok(())
    }

    // Writes out the current data block, if it has anything in it.
    pub fn flush(&mut self) -> Result<()> {
        self.check_writable()?;
        if self.data_block.is_empty() {
            return Ok(());
        }
        debug_assert!(!self.pending_index_entry);

        let compression = self.options.block_compress_type;
        let r = Self::emit_block(
            self.file,
            &mut self.offset,
            self.data_block.finish(),
            compression,
        );
        let handle = self.latch(r)?;
        tracing::trace!(
            offset = handle.offset,
            size = handle.size,
            entries = self.data_block.num_entries(),
            "flushed data block"
        );
        self.data_block.reset();
        self.pending_handle = handle;
        self.pending_index_entry = true;

        let r = self.file.flush_buffer();
        self.latch(r)
    }

    // Writes `contents` plus its trailer at `offset`, advancing it.
    fn emit_block(
        file: &mut W,
        offset: &mut u64,
        contents: &[u8],
        compression: CompressionType,
    ) -> Result<OffsetSize> {
        let payload = compression.compress(contents);
        let tag = compression.tag();

        let mut trailer = Vec::with_capacity(BLOCK_TRAILER_SIZE);
        trailer.push(tag);
        put_fixed32(&mut trailer, crc::mask(crc::block_value(payload, tag)));

        file.append(payload)?;
        file.append(&trailer)?;

        let handle = OffsetSize::new(*offset, payload.len() as u64);
        *offset += (payload.len() + BLOCK_TRAILER_SIZE) as u64;
        Ok(handle)
    }

    // Writes the remaining blocks and the footer, then closes the file. The
    // file is closed even if an earlier write failed.
    pub fn finish(&mut self) -> Result<()> {
        if self.state != State::Open {
            return Err(Error::Interrupt("table builder is finished"));
        }
        let result = self.finish_blocks();
        self.state = State::Closed;

        let r = self.file.close();
        let closed = self.latch(r);
        match (&result, &closed) {
            (Ok(()), Ok(())) => tracing::debug!(
                entries = self.num_entries,
                file_size = self.offset,
                "table finished"
            ),
            _ => tracing::error!(entries = self.num_entries, "table build failed"),
        }
        result.and(closed)
    }

    fn finish_blocks(&mut self) -> Result<()> {
        self.flush()?;
        self.check_writable()?;
        self.state = State::Finishing;
        let options = self.options;

        let mut meta_block = BlockBuilder::new(1);
        if let Some(filter) = self.filter_block.as_mut() {
            let name = filter.policy().name();
            let r = Self::emit_block(
                self.file,
                &mut self.offset,
                filter.finish(),
                CompressionType::None,
            );
            let handle = self.latch(r)?;
            meta_block.add(name.as_bytes(), &handle.encode());
        }
        let r = Self::emit_block(
            self.file,
            &mut self.offset,
            meta_block.finish(),
            options.block_compress_type,
        );
        let meta_handle = self.latch(r)?;

        if self.pending_index_entry {
            if let Some(cmp) = &options.comparator {
                cmp.find_short_successor(&mut self.last_key);
                self.index_block
                    .add(&self.last_key, &self.pending_handle.encode());
            }
            self.pending_index_entry = false;
        }
        let r = Self::emit_block(
            self.file,
            &mut self.offset,
            self.index_block.finish(),
            options.block_compress_type,
        );
        let index_handle = self.latch(r)?;

        let mut footer = Vec::with_capacity(FOOTER_SIZE);
        Footer {
            meta_handle,
            index_handle,
        }
        .encode_to(&mut footer);
        let r = self.file.append(&footer);
        self.latch(r)?;
        self.offset += FOOTER_SIZE as u64;
        Ok(())
    }

    // False once any write has failed.
    pub fn success(&self) -> bool {
        !self.failed
    }

    pub fn file_size(&self) -> u64 {
        self.offset
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        cache::Cache,
        encoding::{crc, decode_fixed32, decode_fixed64},
        filter::BloomFilter,
        fs::{mock::MockDir, Dir},
        options::TableConfig,
        sst::{reader::TableReader, TABLE_MAGIC},
    };

    use super::*;

    fn kv(i: usize) -> (Vec<u8>, Vec<u8>) {
        (
            format!("user/{:06}/name", i).into_bytes(),
            format!("value-{}-{}", i, "x".repeat(i % 17)).into_bytes(),
        )
    }

    fn small_blocks() -> Options {
        Options {
            block_size: 256,
            filter_policy: Some(Arc::new(BloomFilter::new(10))),
            ..Options::default()
        }
    }

    fn write_table(options: &Options, entries: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
        let mut file = Vec::new();
        let mut builder = TableBuilder::new(options, &mut file);
        for (k, v) in entries {
            builder.add(k, v).unwrap();
        }
        builder.finish().unwrap();
        assert!(builder.success());
        assert_eq!(builder.num_entries(), entries.len() as u64);
        assert_eq!(builder.file_size(), file.len() as u64);
        file
    }

    #[test]
    fn test_table_roundtrip() -> anyhow::Result<()> {
        let options = small_blocks();
        let entries: Vec<_> = (0..1000).map(kv).collect();
        let file = write_table(&options, &entries);

        let table = TableReader::open(file, 1, &options)?;
        assert!(table.index_entries()?.len() > 10);
        assert_eq!(table.entries()?, entries);

        for (k, v) in &entries {
            assert!(table.key_may_match(k));
            assert_eq!(table.get(k)?.as_ref(), Some(v));
        }
        assert_eq!(table.get(b"user/000010/nam")?, None);
        assert_eq!(table.get(b"user/999999/name")?, None);
        assert_eq!(table.get(b"a")?, None);
        Ok(())
    }

    #[test]
    fn test_index_separators() -> anyhow::Result<()> {
        let options = small_blocks();
        let entries: Vec<_> = (0..300).map(kv).collect();
        let file = write_table(&options, &entries);
        let table = TableReader::open(file, 1, &options)?;

        let index = table.index_entries()?;
        let mut prev_end = 0;
        for (sep, handle) in &index {
            assert_eq!(handle.offset, prev_end);
            prev_end = handle.offset + handle.size + BLOCK_TRAILER_SIZE as u64;
            // The separator bounds its own block from above.
            let last_in_block = entries
                .iter()
                .map(|(k, _)| k)
                .filter(|k| k.as_slice() <= sep.as_slice())
                .last()
                .unwrap();
            assert!(last_in_block.as_slice() <= sep.as_slice());
        }
        // Shortened separators are no longer than the keys they replace.
        assert!(index.iter().all(|(sep, _)| sep.len() <= entries[0].0.len()));
        Ok(())
    }

    #[test]
    fn test_empty_table() -> anyhow::Result<()> {
        let options = Options::default();
        let file = write_table(&options, &[]);
        // Empty meta and index blocks, then the footer.
        assert_eq!(file.len(), 2 * (8 + BLOCK_TRAILER_SIZE) + FOOTER_SIZE);
        assert_eq!(
            decode_fixed64(&file[file.len() - 8..]),
            TABLE_MAGIC
        );

        let table = TableReader::open(file, 1, &options)?;
        assert!(table.entries()?.is_empty());
        assert_eq!(table.get(b"anything")?, None);
        Ok(())
    }

    #[test]
    fn test_single_block_layout() -> anyhow::Result<()> {
        let options = Options::default();
        let mut file = Vec::new();
        let mut builder = TableBuilder::new(&options, &mut file);
        builder.add(b"k", b"v")?;
        // An empty key is a no-op.
        builder.add(b"", b"ignored")?;
        assert_eq!(builder.num_entries(), 1);
        builder.finish()?;

        // shared, unshared, value_len, "k", "v", restart 0, count 1.
        assert_eq!(&file[..13], &[0, 1, 1, b'k', b'v', 0, 0, 0, 0, 1, 0, 0, 0]);
        assert_eq!(file[13], CompressionType::None.tag());
        let stored = decode_fixed32(&file[14..18]);
        assert_eq!(crc::unmask(stored), crc::value(&file[..14]));
        Ok(())
    }

    #[test]
    fn test_checksum_detects_bit_flips() -> anyhow::Result<()> {
        let options = Options {
            block_size: 64,
            ..Options::default()
        };
        let entries: Vec<_> = (0..20).map(kv).collect();
        let file = write_table(&options, &entries);

        let clean = TableReader::open(file.clone(), 1, &options)?;
        let first = clean.index_entries()?[0].1;
        let end = (first.size as usize) + BLOCK_TRAILER_SIZE;

        for byte in 0..end {
            for bit in 0..8 {
                let mut corrupt = file.clone();
                corrupt[byte] ^= 1 << bit;
                let table = TableReader::open(corrupt, 1, &options)?;
                let err = table.get(&entries[0].0).unwrap_err();
                assert!(err.is_corruption(), "byte {} bit {}: {}", byte, bit, err);
            }
        }
        Ok(())
    }

    #[test]
    fn test_no_comparator_skips_index() -> anyhow::Result<()> {
        let options = Options {
            block_size: 64,
            comparator: None,
            ..Options::default()
        };
        let entries: Vec<_> = (0..20).map(kv).collect();
        let file = write_table(&options, &entries);
        let table = TableReader::open(file, 1, &options)?;
        assert!(table.index_entries()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_add_after_finish() -> anyhow::Result<()> {
        let options = Options::default();
        let mut file = Vec::new();
        let mut builder = TableBuilder::new(&options, &mut file);
        builder.add(b"a", b"1")?;
        builder.finish()?;
        assert!(matches!(builder.add(b"b", b"2"), Err(Error::Interrupt(_))));
        assert!(matches!(builder.finish(), Err(Error::Interrupt(_))));
        assert!(builder.success());
        Ok(())
    }

    #[test]
    fn test_write_failure_latches() -> anyhow::Result<()> {
        let options = small_blocks();
        let mut dir = MockDir::new();
        let mut file = dir.create("000001.sst")?;
        // Allow the first few block writes, then take the filesystem down.
        dir.fs.borrow_mut().schedule_crash(4);

        let mut builder = TableBuilder::new(&options, &mut file);
        let mut failed_at = None;
        for (i, (k, v)) in (0..1000).map(kv).enumerate() {
            if builder.add(&k, &v).is_err() {
                failed_at = Some(i);
                break;
            }
        }
        assert!(failed_at.is_some());
        assert!(!builder.success());

        let size = builder.file_size();
        assert!(matches!(
            builder.add(b"zzzz", b""),
            Err(Error::Interrupt(_))
        ));
        assert!(builder.finish().is_err());
        assert!(!builder.success());
        assert_eq!(builder.file_size(), size);
        Ok(())
    }

    #[test]
    fn test_config_driven_table_with_cache() -> anyhow::Result<()> {
        let options = TableConfig::from_json(
            r#"{"block_size": 512, "bloom_bits_per_key": 10, "block_cache_capacity": 100}"#,
        )?
        .into_options();
        let entries: Vec<_> = (0..500).map(kv).collect();
        let file = write_table(&options, &entries);

        let table = TableReader::open(file, 7, &options)?;
        let cache = options.block_cache.clone().unwrap();
        assert_eq!(cache.len(), 0);

        for (k, v) in &entries {
            assert_eq!(table.get(k)?.as_ref(), Some(v));
        }
        let blocks = table.index_entries()?.len();
        assert_eq!(cache.len(), blocks);

        // Everything is served from the cache now and every handle went back.
        for (k, v) in entries.iter().rev() {
            assert_eq!(table.get(k)?.as_ref(), Some(v));
        }
        assert_eq!(cache.len(), blocks);
        assert_eq!(cache.pending_len(), 0);
        Ok(())
    }
}
