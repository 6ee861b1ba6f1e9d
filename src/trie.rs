//! The two-level direct index: a D-bits first level of leaf indices over
//! a deduplicated X-bits second level of direct entries.
//!
//! Many D-buckets resolve to identical leaves (contiguous unrouted or
//! uniformly routed space), so leaves are interned like range fragments:
//! hashed, shared by reference count, and recycled. A leaf whose count
//! drops to zero is popped only when it is the last one, keeping leaf
//! indices dense; otherwise it is parked and handed out again by the
//! next allocation.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use log::trace;

use crate::range_arena::ChunkRef;
use crate::types::errors::FibError;

//------------ ChunkEntry ----------------------------------------------------

/// One chunk's build-time direct entry: either the whole chunk resolves
/// to a single next-hop index, or it points at an interned fragment.
/// Packed into its compact form only when a snapshot is assembled.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ChunkEntry {
    Hit { nh: u32 },
    Frag { chunk: ChunkRef },
}

impl Default for ChunkEntry {
    fn default() -> Self {
        Self::Hit { nh: 0 }
    }
}

#[derive(Debug, Clone)]
struct LeafDesc {
    refs: u32,
    hash: u64,
    parked: bool,
}

//------------ TrieTables ----------------------------------------------------

#[derive(Debug)]
pub(crate) struct TrieTables {
    d_bits: u32,
    x_bits: u32,
    d: Vec<u16>,
    x: Vec<ChunkEntry>,
    leaves: Vec<LeafDesc>,
    by_hash: HashMap<u64, Vec<u16>>,
    unused: Vec<u16>,
}

impl TrieTables {
    /// Builds both levels from the master chunk table for one candidate
    /// split. `chunks.len()` must be `1 << (d_bits + x_bits)`.
    pub(crate) fn build(
        chunks: &[ChunkEntry],
        d_bits: u32,
        x_bits: u32,
    ) -> Result<Self, FibError> {
        debug_assert_eq!(chunks.len(), 1usize << (d_bits + x_bits));
        let mut t = Self {
            d_bits,
            x_bits,
            d: Vec::with_capacity(1 << d_bits),
            x: Vec::new(),
            leaves: Vec::new(),
            by_hash: HashMap::new(),
            unused: Vec::new(),
        };
        for slice in chunks.chunks(1 << x_bits) {
            let id = t.intern_leaf(slice)?;
            t.d.push(id);
        }
        trace!(
            "trie built: d {} / x {}, {} leaves",
            d_bits,
            x_bits,
            t.leaves.len()
        );
        Ok(t)
    }

    /// Re-derives one D-bucket's leaf after its chunks changed.
    pub(crate) fn patch_bucket(
        &mut self,
        chunks: &[ChunkEntry],
        bucket: usize,
    ) -> Result<(), FibError> {
        let start = bucket << self.x_bits;
        let Some(slice) = chunks.get(start..start + (1 << self.x_bits))
        else {
            return Ok(());
        };
        // Intern before releasing: an unchanged or re-shared leaf then
        // keeps its descriptor alive across the swap.
        let new = self.intern_leaf(slice)?;
        let old = self.d.get(bucket).copied().unwrap_or(new);
        if let Some(slot) = self.d.get_mut(bucket) {
            *slot = new;
        }
        self.release_leaf(old);
        Ok(())
    }

    pub(crate) fn d(&self) -> &[u16] {
        &self.d
    }

    pub(crate) fn x(&self) -> &[ChunkEntry] {
        &self.x
    }

    pub(crate) fn d_bits(&self) -> u32 {
        self.d_bits
    }

    pub(crate) fn x_bits(&self) -> u32 {
        self.x_bits
    }

    /// Bytes the two levels will occupy in a packed snapshot.
    pub(crate) fn memory_bytes(&self) -> usize {
        self.d.len() * 2 + self.x.len() * 4
    }

    fn intern_leaf(&mut self, slice: &[ChunkEntry]) -> Result<u16, FibError> {
        let hash = hash_slice(slice);
        let mut found = None;
        if let Some(bucket) = self.by_hash.get(&hash) {
            for &id in bucket {
                if self.leaf_eq(id, slice) {
                    found = Some(id);
                    break;
                }
            }
        }
        if let Some(id) = found {
            if let Some(l) = self.leaves.get_mut(id as usize) {
                l.refs += 1;
            }
            return Ok(id);
        }

        // a parked leaf keeps its slot; stale ids (truncated away) are
        // skipped
        while let Some(id) = self.unused.pop() {
            let idx = id as usize;
            if !self.leaves.get(idx).map(|l| l.parked).unwrap_or(false) {
                continue;
            }
            let start = idx << self.x_bits;
            if let Some(dst) = self.x.get_mut(start..start + slice.len()) {
                dst.copy_from_slice(slice);
            }
            if let Some(l) = self.leaves.get_mut(idx) {
                *l = LeafDesc { refs: 1, hash, parked: false };
            }
            self.by_hash.entry(hash).or_default().push(id);
            return Ok(id);
        }

        let id = self.leaves.len();
        if id > u16::MAX as usize {
            return Err(FibError::TrieLimitExceeded);
        }
        self.x
            .try_reserve(slice.len())
            .map_err(|_| FibError::OutOfMemory)?;
        self.x.extend_from_slice(slice);
        self.leaves.push(LeafDesc { refs: 1, hash, parked: false });
        self.by_hash.entry(hash).or_default().push(id as u16);
        Ok(id as u16)
    }

    fn release_leaf(&mut self, id: u16) {
        let hash = {
            let Some(l) = self.leaves.get_mut(id as usize) else {
                return;
            };
            debug_assert!(l.refs > 0);
            l.refs -= 1;
            if l.refs > 0 {
                return;
            }
            l.hash
        };
        self.unhash(id, hash);
        if id as usize + 1 == self.leaves.len() {
            // last-in: shrink, then pull back any parked leaves that are
            // now trailing
            self.leaves.pop();
            while self.leaves.last().map(|l| l.parked).unwrap_or(false) {
                self.leaves.pop();
            }
            self.x.truncate(self.leaves.len() << self.x_bits);
        } else if let Some(l) = self.leaves.get_mut(id as usize) {
            l.parked = true;
            self.unused.push(id);
        }
    }

    fn leaf_eq(&self, id: u16, slice: &[ChunkEntry]) -> bool {
        let start = (id as usize) << self.x_bits;
        self.x.get(start..start + slice.len()) == Some(slice)
    }

    fn unhash(&mut self, id: u16, hash: u64) {
        let mut remove_key = false;
        if let Some(v) = self.by_hash.get_mut(&hash) {
            v.retain(|&x| x != id);
            remove_key = v.is_empty();
        }
        if remove_key {
            self.by_hash.remove(&hash);
        }
    }
}

fn hash_slice(slice: &[ChunkEntry]) -> u64 {
    let mut h = DefaultHasher::new();
    slice.hash(&mut h);
    h.finish()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn hit(nh: u32) -> ChunkEntry {
        ChunkEntry::Hit { nh }
    }

    #[test]
    fn identical_leaves_are_shared() {
        let chunks = vec![hit(1), hit(1), hit(1), hit(1)];
        let t = TrieTables::build(&chunks, 1, 1).unwrap();
        assert_eq!(t.d(), &[0, 0]);
        assert_eq!(t.x().len(), 2);
        assert_eq!(t.memory_bytes(), 2 * 2 + 2 * 4);
    }

    #[test]
    fn patch_appends_then_reshares() {
        let mut chunks = vec![hit(1), hit(1), hit(1), hit(1)];
        let mut t = TrieTables::build(&chunks, 1, 1).unwrap();

        chunks[3] = hit(2);
        t.patch_bucket(&chunks, 1).unwrap();
        assert_eq!(t.d(), &[0, 1]);
        assert_eq!(t.x().len(), 4);

        chunks[3] = hit(1);
        t.patch_bucket(&chunks, 1).unwrap();
        assert_eq!(t.d(), &[0, 0]);
        // the replacement leaf was last-in and got popped
        assert_eq!(t.x().len(), 2);
    }

    #[test]
    fn interior_leaf_is_parked_and_reused() {
        let mut chunks = vec![
            hit(1), hit(1), // bucket 0 -> leaf 0
            hit(2), hit(2), // bucket 1 -> leaf 1
            hit(3), hit(3), // bucket 2 -> leaf 2
            hit(1), hit(1), // bucket 3 -> leaf 0
        ];
        let mut t = TrieTables::build(&chunks, 2, 1).unwrap();
        assert_eq!(t.d(), &[0, 1, 2, 0]);

        // bucket 1 joins the shared leaf; leaf 1 is interior, so parked
        chunks[2] = hit(1);
        chunks[3] = hit(1);
        t.patch_bucket(&chunks, 1).unwrap();
        assert_eq!(t.d(), &[0, 0, 2, 0]);
        assert_eq!(t.x().len(), 6);

        // the next distinct leaf reuses the parked slot
        chunks[4] = hit(4);
        chunks[5] = hit(4);
        t.patch_bucket(&chunks, 2).unwrap();
        assert_eq!(t.d(), &[0, 0, 1, 0]);
        assert_eq!(t.x().len(), 4);
        assert_eq!(t.x()[2], hit(4));
    }
}
