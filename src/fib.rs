//! The build half of the FIB and the handles the forwarding path uses.
//!
//! All working tables live inside [`Fib`], owned by the single
//! control-plane thread that calls [`Fib::apply`]. Readers never see
//! them: after every build pass the working state is packed into a fresh
//! [`Snapshot`] and published with one atomic pointer swap. The previous
//! snapshot is retired through the epoch facility and freed only once no
//! reader can still hold a reference to it.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_epoch::{Atomic, Owned, Shared};
use crossbeam_utils::CachePadded;
use log::{debug, error};
use roaring::RoaringBitmap;

use crate::config::FibConfig;
use crate::range_arena::RangeArena;
use crate::snapshot::{encode_fragment, pack_direct, Snapshot, FRAGS_HIT};
use crate::sweep::{sweep_chunk, Boundary, CoverStack};
use crate::trie::{ChunkEntry, TrieTables};
use crate::types::errors::FibError;
use crate::types::nexthop::{NexthopMap, NhId};
use crate::types::route::{RouteSource, RouteUpdate};
use crate::types::stats::FibStats;
use crate::{epoch, Guard};

//------------ DataPath ------------------------------------------------------

// The published pointer shared between the builder and all readers. The
// padding keeps the hot cache line away from whatever the allocator puts
// next to it.
#[derive(Debug)]
struct DataPath {
    snapshot: CachePadded<Atomic<Snapshot>>,
    default: NhId,
}

impl DataPath {
    fn new(default: NhId) -> Self {
        Self {
            snapshot: CachePadded::new(Atomic::null()),
            default,
        }
    }

    fn lookup(&self, key: u32, guard: &Guard) -> NhId {
        let s = self.snapshot.load(Ordering::Acquire, guard);
        // The guard keeps the snapshot alive for the duration of the
        // reference.
        match unsafe { s.as_ref() } {
            Some(snap) => snap.lookup(key),
            None => self.default,
        }
    }

    fn publish(&self, snap: Snapshot, guard: &Guard) {
        let old = self.snapshot.swap(Owned::new(snap), Ordering::AcqRel, guard);
        if !old.is_null() {
            // Readers may still be walking the old snapshot; it is freed
            // after they have all quiesced, never synchronously.
            unsafe { guard.defer_destroy(old) };
        }
    }
}

impl Drop for DataPath {
    fn drop(&mut self) {
        // The last handle is gone, so no reader can hold a guard into
        // this snapshot anymore.
        unsafe {
            let s = self.snapshot.swap(
                Shared::null(),
                Ordering::Relaxed,
                epoch::unprotected(),
            );
            if !s.is_null() {
                drop(s.into_owned());
            }
        }
    }
}

//------------ FibReader -----------------------------------------------------

/// A cheaply clonable handle for forwarding threads.
///
/// [`lookup`](FibReader::lookup) is lock-free and bounded: one or two
/// table reads plus, for a non-hit chunk, a binary search over that
/// chunk's fragment. A lookup started after a publish observes either
/// entirely the old or entirely the new structure.
#[derive(Debug, Clone)]
pub struct FibReader {
    dp: Arc<DataPath>,
}

impl FibReader {
    pub fn lookup(&self, key: u32, guard: &Guard) -> NhId {
        self.dp.lookup(key, guard)
    }
}

//------------ Fib -----------------------------------------------------------

/// The compressed forwarding table.
///
/// One `Fib` is driven by one control-plane thread; the route source's
/// own locking serializes calls to [`apply`](Fib::apply). Any number of
/// [`FibReader`]s may look up concurrently at any time, including while
/// a build is running.
#[derive(Debug)]
pub struct Fib {
    cfg: FibConfig,
    d_bits: u32,
    nexthops: NexthopMap,
    // master direct entry per chunk; the trie's leaves are derived views
    chunks: Vec<ChunkEntry>,
    arena: RangeArena,
    trie: TrieTables,
    dirty: RoaringBitmap,
    published: bool,
    force_full: bool,
    routes_at_full: usize,
    routes: usize,
    rebuilds: u64,
    patches: u64,
    last_build: Duration,
    snapshot_bytes: usize,
    dp: Arc<DataPath>,
}

impl Fib {
    pub fn new(cfg: FibConfig) -> Result<Self, FibError> {
        cfg.validate()?;
        let d_bits = cfg.initial_d_bits();
        let chunks =
            vec![ChunkEntry::default(); 1usize << cfg.trie_bits];
        let trie =
            TrieTables::build(&chunks, d_bits, cfg.trie_bits - d_bits)?;
        Ok(Self {
            cfg,
            d_bits,
            nexthops: NexthopMap::new(cfg.default_nexthop),
            chunks,
            arena: RangeArena::new(),
            trie,
            dirty: RoaringBitmap::new(),
            published: false,
            force_full: false,
            routes_at_full: 0,
            routes: 0,
            rebuilds: 0,
            patches: 0,
            last_build: Duration::ZERO,
            snapshot_bytes: 0,
            dp: Arc::new(DataPath::new(cfg.default_nexthop)),
        })
    }

    pub fn reader(&self) -> FibReader {
        FibReader {
            dp: Arc::clone(&self.dp),
        }
    }

    /// Looks up against the currently published snapshot. Before the
    /// first successful [`apply`](Fib::apply) every key resolves to the
    /// configured default handle.
    pub fn lookup(&self, key: u32, guard: &Guard) -> NhId {
        self.dp.lookup(key, guard)
    }

    /// Absorbs one batch of route changes and publishes a new snapshot.
    ///
    /// The batch must describe changes already applied to `source`.
    /// Chunks touched by the batch are marked dirty; depending on
    /// fragmentation and route-count drift the engine then either
    /// rebuilds everything (re-searching the D/X split) or re-sweeps
    /// only the dirty chunks. On error the previously published
    /// snapshot stays authoritative and the next batch forces a full
    /// rebuild.
    pub fn apply<RS: RouteSource + ?Sized>(
        &mut self,
        source: &RS,
        batch: &[RouteUpdate],
    ) -> Result<(), FibError> {
        let t0 = Instant::now();
        let shift = 32 - self.cfg.trie_bits;
        for u in batch {
            let (lo, hi) = u.prefix.span();
            self.dirty.insert_range(lo >> shift..=hi >> shift);
        }

        let n = source.route_count();
        let full = self.force_full
            || !self.published
            || self.arena.holes() > self.cfg.max_holes
            || n > self.routes_at_full.saturating_mul(2)
            || n.saturating_mul(2) < self.routes_at_full;

        let res = if full {
            self.full_rebuild(source)
        } else {
            self.patch(source)
        };
        match res {
            Ok(()) => {
                self.routes = n;
                self.dirty.clear();
                self.force_full = false;
                self.publish();
                self.last_build = t0.elapsed();
                debug!(
                    "{} for a batch of {}: {}",
                    if full { "full rebuild" } else { "patch" },
                    batch.len(),
                    self.stats()
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    "build failed ({}); last published snapshot stays \
                    authoritative",
                    e
                );
                self.force_full = true;
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> FibStats {
        FibStats {
            routes: self.routes,
            chunks: self.arena.live_chunks(),
            shared_chunks: self.arena.shared_chunks(),
            holes: self.arena.holes(),
            free_words: self.arena.free_words(),
            range_words: self.arena.words().len(),
            d_entries: self.trie.d().len(),
            x_entries: self.trie.x().len(),
            nexthops: self.nexthops.handles().len(),
            snapshot_bytes: self.snapshot_bytes,
            rebuilds: self.rebuilds,
            patches: self.patches,
            last_build: self.last_build,
        }
    }

    fn full_rebuild<RS: RouteSource + ?Sized>(
        &mut self,
        source: &RS,
    ) -> Result<(), FibError> {
        let trie_bits = self.cfg.trie_bits;
        self.arena.clear();
        self.nexthops.reset(self.cfg.default_nexthop);
        self.chunks.clear();
        self.chunks
            .resize(1usize << trie_bits, ChunkEntry::default());

        let mut stack = CoverStack::new();
        let mut bounds = Vec::new();
        for chunk in 0..(1u32 << trie_bits) {
            let entry =
                self.build_chunk(source, chunk, &mut stack, &mut bounds)?;
            if let Some(slot) = self.chunks.get_mut(chunk as usize) {
                *slot = entry;
            }
        }

        // Local split search: the previous split and its neighbors. A
        // candidate that would need more leaves than the index can
        // address is simply unusable, not an error.
        let lo = self.d_bits.saturating_sub(1).max(self.cfg.d_min);
        let hi = (self.d_bits + 1).min(trie_bits);
        let mut best: Option<(usize, u32, TrieTables)> = None;
        for d_bits in lo..=hi {
            match TrieTables::build(&self.chunks, d_bits, trie_bits - d_bits)
            {
                Ok(t) => {
                    let cost =
                        t.memory_bytes() + self.arena.words().len() * 4;
                    if best.as_ref().map(|(c, _, _)| cost < *c).unwrap_or(true)
                    {
                        best = Some((cost, d_bits, t));
                    }
                }
                Err(FibError::TrieLimitExceeded) => continue,
                Err(e) => return Err(e),
            }
        }
        let Some((cost, d_bits, trie)) = best else {
            return Err(FibError::TrieLimitExceeded);
        };
        debug!(
            "full rebuild chose split d{}/x{} ({} bytes total)",
            d_bits,
            trie_bits - d_bits,
            cost
        );
        self.d_bits = d_bits;
        self.trie = trie;
        self.routes_at_full = source.route_count();
        self.rebuilds += 1;
        Ok(())
    }

    fn patch<RS: RouteSource + ?Sized>(
        &mut self,
        source: &RS,
    ) -> Result<(), FibError> {
        let mut stack = CoverStack::new();
        let mut bounds = Vec::new();
        let x_bits = self.trie.x_bits();
        let mut buckets = RoaringBitmap::new();
        let dirty: Vec<u32> = self.dirty.iter().collect();
        for chunk in dirty {
            let entry =
                self.build_chunk(source, chunk, &mut stack, &mut bounds)?;
            let old = self
                .chunks
                .get(chunk as usize)
                .copied()
                .unwrap_or_default();
            if let Some(slot) = self.chunks.get_mut(chunk as usize) {
                *slot = entry;
            }
            // Release after interning the replacement, so an unchanged
            // chunk keeps its shared fragment alive throughout.
            if let ChunkEntry::Frag { chunk: r } = old {
                self.arena.release(r);
            }
            buckets.insert(chunk >> x_bits);
        }
        for bucket in buckets.iter() {
            self.trie.patch_bucket(&self.chunks, bucket as usize)?;
        }
        self.patches += 1;
        Ok(())
    }

    fn build_chunk<RS: RouteSource + ?Sized>(
        &mut self,
        source: &RS,
        chunk: u32,
        stack: &mut CoverStack,
        bounds: &mut Vec<Boundary>,
    ) -> Result<ChunkEntry, FibError> {
        sweep_chunk(
            source,
            &mut self.nexthops,
            chunk,
            self.cfg.trie_bits,
            stack,
            bounds,
        )?;
        if let [only] = bounds.as_slice() {
            return Ok(ChunkEntry::Hit { nh: only.nh });
        }
        let enc = encode_fragment(bounds, self.cfg.trie_bits)?;
        Ok(ChunkEntry::Frag {
            chunk: self.arena.intern(&enc)?,
        })
    }

    fn publish(&mut self) {
        let x: Vec<u32> = self
            .trie
            .x()
            .iter()
            .map(|e| match *e {
                ChunkEntry::Hit { nh } => pack_direct(nh, FRAGS_HIT),
                ChunkEntry::Frag { chunk } => {
                    let (base, frags) = self.arena.base_and_frags(chunk);
                    pack_direct(base, frags)
                }
            })
            .collect();
        let snap = Snapshot::new(
            self.cfg.trie_bits,
            self.trie.d_bits(),
            self.trie.d().to_vec().into_boxed_slice(),
            x.into_boxed_slice(),
            self.arena.words().to_vec().into_boxed_slice(),
            self.nexthops.handles().to_vec().into_boxed_slice(),
            self.cfg.default_nexthop,
        );
        self.snapshot_bytes = snap.size_bytes();
        let guard = &epoch::pin();
        self.dp.publish(snap, guard);
        self.published = true;
    }
}
