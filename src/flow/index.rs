//! Flow Index: an open-chained hash map keyed by [`FlowId`] (spec §4.2).
//!
//! Grounded on `examples/original_source/lib/hashtable.c`: a fixed prime
//! bucket count (`ARRAY_SIZE 2_000_003`), insertion prepends to the bucket
//! chain, and a tombstone-free iterator walks buckets in index order and
//! within a bucket in chain order, able to unlink the node it is currently
//! on without invalidating the rest of the walk. `retina-core` doesn't have
//! an analog of this — its conntrack table is a `HashMap` over `ConnId` —
//! so this module is original code built directly from the C reference
//! rather than adapted retina source, kept in the teacher's spirit of a
//! plain, allocation-light std data structure (no external hashmap crate).

use std::collections::VecDeque;

use super::{FlowId, FlowRecord};

/// Open-chained hash map from [`FlowId`] to [`FlowRecord`].
pub struct FlowIndex {
    buckets: Vec<VecDeque<(FlowId, FlowRecord)>>,
    bucket_count: usize,
    len: usize,
}

impl FlowIndex {
    /// Creates an index with `bucket_count` buckets. The spec recommends a
    /// fixed prime near 2·10⁶ (2_000_003, matching the C reference); any
    /// positive value works.
    pub fn new(bucket_count: usize) -> FlowIndex {
        let bucket_count = bucket_count.max(1);
        let mut buckets = Vec::with_capacity(bucket_count);
        buckets.resize_with(bucket_count, VecDeque::new);
        FlowIndex {
            buckets,
            bucket_count,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bucket_index(&self, id: &FlowId) -> usize {
        hash_flow_id(id) % self.bucket_count
    }

    /// Inserts `record`, prepending it to its bucket's chain (newest
    /// entries are most likely to be accessed again soon). Callers must
    /// ensure no record with the same ID is already present.
    pub fn insert(&mut self, record: FlowRecord) {
        let idx = self.bucket_index(&record.id);
        self.buckets[idx].push_front((record.id, record));
        self.len += 1;
    }

    /// Returns the record matching `id`, if any.
    pub fn retrieve(&self, id: &FlowId) -> Option<&FlowRecord> {
        let idx = self.bucket_index(id);
        self.buckets[idx]
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, record)| record)
    }

    /// Returns a mutable reference to the record matching `id`, if any.
    pub fn retrieve_mut(&mut self, id: &FlowId) -> Option<&mut FlowRecord> {
        let idx = self.bucket_index(id);
        self.buckets[idx]
            .iter_mut()
            .find(|(key, _)| key == id)
            .map(|(_, record)| record)
    }

    /// Unlinks and returns the record matching `id`, if present.
    ///
    /// Calling this while a walk started with [`FlowIndex::extract_if`] is
    /// in progress is a programmer error (spec §4.2's "undefined" clause,
    /// §7 "Fatal programmer error") — there is nothing to enforce this at
    /// the type level here since `extract_if` does not hold a live borrow
    /// across calls, so the constraint is documentation only, same as the
    /// source it's grounded on.
    pub fn remove(&mut self, id: &FlowId) -> Option<FlowRecord> {
        let idx = self.bucket_index(id);
        let bucket = &mut self.buckets[idx];
        let pos = bucket.iter().position(|(key, _)| key == id)?;
        let (_, record) = bucket.remove(pos)?;
        self.len -= 1;
        Some(record)
    }

    /// Read-only walk over every record, buckets in index order, chain
    /// order within a bucket.
    pub fn iter(&self) -> impl Iterator<Item = &FlowRecord> {
        self.buckets.iter().flat_map(|bucket| bucket.iter().map(|(_, record)| record))
    }

    /// Removes and returns every record for which `pred` returns `true`,
    /// walking buckets in index order and a bucket's chain in order. This
    /// is the Rust shape of spec §4.2's "tombstone-free iterator... its
    /// `remove` unlinks the current node in O(1) without invalidating
    /// further traversal": rather than a pointer-stateful iterator object,
    /// the removal decision and the walk are fused into one pass.
    pub fn extract_if<F>(&mut self, mut pred: F) -> Vec<FlowRecord>
    where
        F: FnMut(&FlowId, &FlowRecord) -> bool,
    {
        let mut extracted = Vec::new();
        for bucket in self.buckets.iter_mut() {
            let mut i = 0;
            while i < bucket.len() {
                if pred(&bucket[i].0, &bucket[i].1) {
                    let (_, record) = bucket.remove(i).expect("index in bounds");
                    extracted.push(record);
                } else {
                    i += 1;
                }
            }
        }
        self.len -= extracted.len();
        extracted
    }

    /// Removes and returns every record, in bucket/chain order.
    pub fn drain_all(&mut self) -> Vec<FlowRecord> {
        self.extract_if(|_, _| true)
    }
}

/// Combines the four ID components with XOR of rotated constants. Per spec
/// §4.2, "any mixing function suffices if it distributes evenly — the
/// value lies in the fixed table size and chaining, not the function."
fn hash_flow_id(id: &FlowId) -> usize {
    let ip_a = u32::from(id.ip_a);
    let ip_b = u32::from(id.ip_b);
    let port_a = id.port_a as u32;
    let port_b = id.port_b as u32;
    let mixed = ip_a.rotate_left(7)
        ^ ip_b.rotate_left(13)
        ^ port_a.rotate_left(3)
        ^ port_b.rotate_left(19);
    mixed as usize
}
