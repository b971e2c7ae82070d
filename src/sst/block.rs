use std::cmp::Ordering;

use crate::{
    comparator::Comparator,
    encoding::{decode_fixed32, get_varint32, put_fixed32, put_varint32},
    error::{Error, Result},
};

// Serializes sorted key-value pairs into one block payload.
//
// Each entry is
//   varint32 shared_len | varint32 unshared_len | varint32 value_len |
//   key[shared_len..] | value
// and the block ends with every restart offset as a fixed32, then the restart
// count as a fixed32.
pub struct BlockBuilder {
    restart_interval: usize,
    buf: Vec<u8>,
    restarts: Vec<u32>,
    // Entries since the last restart point.
    counter: usize,
    num_entries: usize,
    finished: bool,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        BlockBuilder {
            restart_interval: restart_interval.max(1),
            buf: Vec::new(),
            restarts: vec![0],
            counter: 0,
            num_entries: 0,
            finished: false,
            last_key: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.num_entries = 0;
        self.finished = false;
        self.last_key.clear();
    }

    // Keys must arrive in ascending order. Returns false, adding nothing, for
    // an empty key or once the block is finished.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> bool {
        if self.finished || key.is_empty() {
            return false;
        }

        let shared = if self.counter < self.restart_interval {
            self.last_key
                .iter()
                .zip(key.iter())
                .take_while(|(a, b)| a == b)
                .count()
        } else {
            self.restarts.push(self.buf.len() as u32);
            self.counter = 0;
            0
        };
        let unshared = key.len() - shared;

        put_varint32(&mut self.buf, shared as u32);
        put_varint32(&mut self.buf, unshared as u32);
        put_varint32(&mut self.buf, value.len() as u32);
        self.buf.extend_from_slice(&key[shared..]);
        self.buf.extend_from_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        self.counter += 1;
        self.num_entries += 1;
        true
    }

    // Size of the payload `finish` would produce right now.
    pub fn current_size_estimate(&self) -> usize {
        if self.finished {
            self.buf.len()
        } else {
            self.buf.len() + self.restarts.len() * 4 + 4
        }
    }

    // Appends the restart trailer. The builder rejects further adds until
    // `reset`.
    pub fn finish(&mut self) -> &[u8] {
        if !self.finished {
            for r in &self.restarts {
                put_fixed32(&mut self.buf, *r);
            }
            put_fixed32(&mut self.buf, self.restarts.len() as u32);
            self.finished = true;
        }
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }
}

// A decoded block payload (trailer already stripped and verified).
#[derive(Debug)]
pub struct Block {
    data: Vec<u8>,
    restarts_offset: usize,
    num_restarts: usize,
}

impl Block {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::corruption("block too short for restart count"));
        }
        let num_restarts = decode_fixed32(&data[data.len() - 4..]) as usize;
        let max_restarts = (data.len() - 4) / 4;
        if num_restarts > max_restarts {
            return Err(Error::corruption(format!(
                "block claims {} restarts, room for {}",
                num_restarts, max_restarts
            )));
        }
        let restarts_offset = data.len() - 4 - 4 * num_restarts;
        Ok(Block {
            data,
            restarts_offset,
            num_restarts,
        })
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn restart_point(&self, i: usize) -> usize {
        decode_fixed32(&self.data[self.restarts_offset + 4 * i..]) as usize
    }

    pub fn iter(&self) -> BlockIter<'_> {
        BlockIter {
            block: self,
            offset: 0,
            key: Vec::new(),
        }
    }

    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.iter().collect()
    }

    // Returns the first entry whose key is >= `target`.
    pub fn seek(
        &self,
        target: &[u8],
        cmp: &dyn Comparator,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if self.num_restarts == 0 {
            return Ok(None);
        }

        // Find the last restart point whose key is < target.
        let mut left = 0;
        let mut right = self.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            let mut it = self.iter_at_restart(mid);
            let (key, _) = it
                .next_entry()?
                .ok_or_else(|| Error::corruption("restart point past end of block"))?;
            if cmp.compare(&key, target) == Ordering::Less {
                left = mid;
            } else {
                right = mid - 1;
            }
        }

        let mut it = self.iter_at_restart(left);
        while let Some((key, value)) = it.next_entry()? {
            if cmp.compare(&key, target) != Ordering::Less {
                return Ok(Some((key, value.to_vec())));
            }
        }
        Ok(None)
    }

    fn iter_at_restart(&self, i: usize) -> BlockIter<'_> {
        BlockIter {
            block: self,
            offset: self.restart_point(i),
            key: Vec::new(),
        }
    }
}

pub struct BlockIter<'a> {
    block: &'a Block,
    offset: usize,
    key: Vec<u8>,
}

impl<'a> BlockIter<'a> {
    fn corrupt(&mut self, what: &str) -> Error {
        // Nothing past a bad entry can be trusted.
        self.offset = self.block.restarts_offset;
        Error::corruption(format!("bad block entry: {}", what))
    }

    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, &'a [u8])>> {
        let block: &'a Block = self.block;
        let data = &block.data[..block.restarts_offset];
        if self.offset >= data.len() {
            return Ok(None);
        }

        let mut p = self.offset;
        let mut header = [0_usize; 3];
        for field in header.iter_mut() {
            match get_varint32(&data[p..]) {
                Some((v, n)) => {
                    *field = v as usize;
                    p += n;
                }
                None => return Err(self.corrupt("truncated header")),
            }
        }
        let [shared, unshared, value_len] = header;
        if shared > self.key.len() {
            return Err(self.corrupt("shared prefix longer than previous key"));
        }
        if data.len() - p < unshared + value_len {
            return Err(self.corrupt("entry overruns block"));
        }

        self.key.truncate(shared);
        self.key.extend_from_slice(&data[p..p + unshared]);
        p += unshared;
        let value = &data[p..p + value_len];
        self.offset = p + value_len;
        Ok(Some((self.key.clone(), value)))
    }
}

impl<'a> Iterator for BlockIter<'a> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry()
            .map(|e| e.map(|(k, v)| (k, v.to_vec())))
            .transpose()
    }
}
