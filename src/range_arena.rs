//! The shared arena of range-table fragments.
//!
//! Fragments are content-addressed: interning an encoded fragment either
//! bumps the reference count of an identical existing one, or places the
//! new content in a recycled free span (splitting oversized spans) or at
//! the arena frontier. Releasing the last reference merges the freed
//! span with free neighbors and pulls the frontier back when the span
//! touches it, so holes never accumulate at the top.

use std::collections::{BTreeMap, HashMap};
use std::hash::{DefaultHasher, Hash, Hasher};

use log::trace;

use crate::snapshot::{EncodedFragment, BASE_MASK};
use crate::types::errors::FibError;

//------------ ChunkRef ------------------------------------------------------

/// Handle to one interned fragment's descriptor. Only minted by
/// [`RangeArena::intern`] and only valid for the arena that minted it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ChunkRef(u32);

#[derive(Debug, Clone)]
struct ChunkDesc {
    base: u32,
    size: u32,
    refs: u32,
    hash: u64,
    frags: u16,
}

//------------ RangeArena ----------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct RangeArena {
    words: Vec<u32>,
    descs: Vec<ChunkDesc>,
    free_desc_slots: Vec<u32>,
    // live descriptors by content hash
    by_hash: HashMap<u64, Vec<ChunkRef>>,
    // every descriptor, live or free, in arena order
    by_base: BTreeMap<u32, ChunkRef>,
    // free descriptors bucketed by span size
    free_by_size: BTreeMap<u32, Vec<ChunkRef>>,
    live: usize,
    holes: usize,
    free_words: usize,
}

impl RangeArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn clear(&mut self) {
        self.words.clear();
        self.descs.clear();
        self.free_desc_slots.clear();
        self.by_hash.clear();
        self.by_base.clear();
        self.free_by_size.clear();
        self.live = 0;
        self.holes = 0;
        self.free_words = 0;
    }

    /// Interns an encoded fragment, sharing identical content.
    pub(crate) fn intern(
        &mut self,
        enc: &EncodedFragment,
    ) -> Result<ChunkRef, FibError> {
        let hash = content_hash(&enc.words);
        let mut found = None;
        if let Some(bucket) = self.by_hash.get(&hash) {
            for &r in bucket {
                if self.desc(r).frags == enc.frags
                    && self.content_eq(r, &enc.words)
                {
                    found = Some(r);
                    break;
                }
            }
        }
        if let Some(r) = found {
            self.desc_mut(r).refs += 1;
            trace!(
                "sharing fragment at {} ({} refs)",
                self.desc(r).base,
                self.desc(r).refs
            );
            return Ok(r);
        }

        let size = enc.words.len() as u32;
        let r = if let Some((r, span)) = self.take_free(size) {
            if span > size {
                // keep the tail of the span as a smaller hole
                let rem_base = self.desc(r).base + size;
                let rem = self.alloc_desc(ChunkDesc {
                    base: rem_base,
                    size: span - size,
                    refs: 0,
                    hash: 0,
                    frags: 0,
                });
                self.by_base.insert(rem_base, rem);
                self.push_free(rem, span - size);
            }
            let d = self.desc_mut(r);
            d.size = size;
            d.refs = 1;
            d.hash = hash;
            d.frags = enc.frags;
            let base = d.base as usize;
            if let Some(dst) = self.words.get_mut(base..base + enc.words.len())
            {
                dst.copy_from_slice(&enc.words);
            }
            r
        } else {
            let base = self.words.len() as u32;
            if base + size > BASE_MASK + 1 {
                return Err(FibError::ArenaLimitExceeded);
            }
            self.words
                .try_reserve(enc.words.len())
                .map_err(|_| FibError::OutOfMemory)?;
            self.words.extend_from_slice(&enc.words);
            let r = self.alloc_desc(ChunkDesc {
                base,
                size,
                refs: 1,
                hash,
                frags: enc.frags,
            });
            self.by_base.insert(base, r);
            r
        };
        self.by_hash.entry(hash).or_default().push(r);
        self.live += 1;
        Ok(r)
    }

    /// Drops one reference. At zero the span is merged with free
    /// neighbors and either becomes a hole or, at the frontier, shrinks
    /// the arena.
    pub(crate) fn release(&mut self, r: ChunkRef) {
        {
            let d = self.desc_mut(r);
            debug_assert!(d.refs > 0);
            d.refs -= 1;
            if d.refs > 0 {
                return;
            }
        }
        self.live -= 1;
        let (mut base, mut size, hash) = {
            let d = self.desc(r);
            (d.base, d.size, d.hash)
        };
        self.unhash(r, hash);
        let mut r = r;

        // absorb a free successor
        if let Some(&s) = self.by_base.range(base + 1..).next().map(|(_, s)| s)
        {
            let sd = self.desc(s).clone();
            if sd.refs == 0 && sd.base == base + size {
                self.remove_free(s, sd.size);
                self.by_base.remove(&sd.base);
                self.free_desc_slot(s);
                size += sd.size;
            }
        }
        // merge into a free predecessor
        if let Some(&p) = self.by_base.range(..base).next_back().map(|(_, p)| p)
        {
            let pd = self.desc(p).clone();
            if pd.refs == 0 && pd.base + pd.size == base {
                self.remove_free(p, pd.size);
                self.by_base.remove(&base);
                self.free_desc_slot(r);
                base = pd.base;
                size += pd.size;
                r = p;
            }
        }

        if base as usize + size as usize == self.words.len() {
            // Touching the frontier: truncate instead of leaving a hole.
            // Adjacent holes are merged eagerly, so the new trailing
            // descriptor is always live.
            self.words.truncate(base as usize);
            self.by_base.remove(&base);
            self.free_desc_slot(r);
            trace!("arena truncated to {} words", base);
        } else {
            let d = self.desc_mut(r);
            d.base = base;
            d.size = size;
            d.refs = 0;
            d.hash = 0;
            self.push_free(r, size);
        }
    }

    pub(crate) fn base_and_frags(&self, r: ChunkRef) -> (u32, u16) {
        let d = self.desc(r);
        (d.base, d.frags)
    }

    pub(crate) fn words(&self) -> &[u32] {
        &self.words
    }

    pub(crate) fn live_chunks(&self) -> usize {
        self.live
    }

    pub(crate) fn shared_chunks(&self) -> usize {
        self.descs.iter().filter(|d| d.refs >= 2).count()
    }

    pub(crate) fn holes(&self) -> usize {
        self.holes
    }

    pub(crate) fn free_words(&self) -> usize {
        self.free_words
    }

    #[cfg(test)]
    fn refs(&self, r: ChunkRef) -> u32 {
        self.desc(r).refs
    }

    // ChunkRefs are only minted by this arena, so the slot exists.
    #[allow(clippy::indexing_slicing)]
    fn desc(&self, r: ChunkRef) -> &ChunkDesc {
        &self.descs[r.0 as usize]
    }

    #[allow(clippy::indexing_slicing)]
    fn desc_mut(&mut self, r: ChunkRef) -> &mut ChunkDesc {
        &mut self.descs[r.0 as usize]
    }

    fn content_eq(&self, r: ChunkRef, words: &[u32]) -> bool {
        let d = self.desc(r);
        d.size as usize == words.len()
            && self
                .words
                .get(d.base as usize..(d.base + d.size) as usize)
                == Some(words)
    }

    fn alloc_desc(&mut self, d: ChunkDesc) -> ChunkRef {
        if let Some(slot) = self.free_desc_slots.pop() {
            if let Some(old) = self.descs.get_mut(slot as usize) {
                *old = d;
                return ChunkRef(slot);
            }
        }
        self.descs.push(d);
        ChunkRef(self.descs.len() as u32 - 1)
    }

    fn free_desc_slot(&mut self, r: ChunkRef) {
        let d = self.desc_mut(r);
        d.refs = 0;
        d.size = 0;
        self.free_desc_slots.push(r.0);
    }

    fn unhash(&mut self, r: ChunkRef, hash: u64) {
        let mut remove_key = false;
        if let Some(v) = self.by_hash.get_mut(&hash) {
            v.retain(|&x| x != r);
            remove_key = v.is_empty();
        }
        if remove_key {
            self.by_hash.remove(&hash);
        }
    }

    /// Takes the smallest free span of at least `size` words out of the
    /// free buckets, returning it with its span size.
    fn take_free(&mut self, size: u32) -> Option<(ChunkRef, u32)> {
        let key = self.free_by_size.range(size..).next().map(|(&k, _)| k)?;
        let mut remove_key = false;
        let r = if let Some(v) = self.free_by_size.get_mut(&key) {
            let r = v.pop();
            remove_key = v.is_empty();
            r
        } else {
            None
        };
        if remove_key {
            self.free_by_size.remove(&key);
        }
        let r = r?;
        self.holes -= 1;
        self.free_words -= key as usize;
        Some((r, key))
    }

    fn remove_free(&mut self, r: ChunkRef, size: u32) {
        let mut remove_key = false;
        if let Some(v) = self.free_by_size.get_mut(&size) {
            v.retain(|&x| x != r);
            remove_key = v.is_empty();
        }
        if remove_key {
            self.free_by_size.remove(&size);
        }
        self.holes -= 1;
        self.free_words -= size as usize;
    }

    fn push_free(&mut self, r: ChunkRef, size: u32) {
        self.free_by_size.entry(size).or_default().push(r);
        self.holes += 1;
        self.free_words += size as usize;
    }
}

fn content_hash(words: &[u32]) -> u64 {
    let mut h = DefaultHasher::new();
    words.hash(&mut h);
    h.finish()
}
