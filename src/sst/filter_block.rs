use std::sync::Arc;

use crate::{encoding::put_fixed32, filter::FilterPolicy};

// Collects every key of a table and turns them into one filter when the table
// is finished. The block is the policy's filter bytes followed by its hash
// count as a fixed32.
pub struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    // Flattened key contents; `starts[i]` is where key i begins.
    keys: Vec<u8>,
    starts: Vec<usize>,
    result: Vec<u8>,
}

impl FilterBlockBuilder {
    pub fn new(policy: Arc<dyn FilterPolicy>) -> Self {
        FilterBlockBuilder {
            policy,
            keys: Vec::new(),
            starts: Vec::new(),
            result: Vec::new(),
        }
    }

    pub fn policy(&self) -> &Arc<dyn FilterPolicy> {
        &self.policy
    }

    pub fn add_key(&mut self, key: &[u8]) {
        self.starts.push(self.keys.len());
        self.keys.extend_from_slice(key);
    }

    pub fn num_keys(&self) -> usize {
        self.starts.len()
    }

    pub fn finish(&mut self) -> &[u8] {
        self.result.clear();
        let ends = self.starts.iter().skip(1).copied().chain(Some(self.keys.len()));
        let keys: Vec<&[u8]> = self
            .starts
            .iter()
            .zip(ends)
            .map(|(start, end)| &self.keys[*start..end])
            .collect();
        self.policy.create_filter(&keys, &mut self.result);
        put_fixed32(&mut self.result, self.policy.hash_count());
        &self.result
    }
}

pub struct FilterBlockReader {
    policy: Arc<dyn FilterPolicy>,
    contents: Vec<u8>,
}

impl FilterBlockReader {
    pub fn new(policy: Arc<dyn FilterPolicy>, contents: Vec<u8>) -> Self {
        FilterBlockReader { policy, contents }
    }

    pub fn key_may_match(&self, key: &[u8]) -> bool {
        self.policy.key_may_match_encoded(key, &self.contents)
    }
}
