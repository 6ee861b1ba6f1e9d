//------------ FibStats ------------------------------------------------------

/// A point-in-time view of table sizes, sharing and build activity,
/// exposed for operational tooling. Nothing in here is part of the
/// algorithmic contract; it is what the engine logs after every build
/// pass.
#[derive(Debug, Copy, Clone, Default)]
pub struct FibStats {
    /// Routes in the source table at the last build.
    pub routes: usize,
    /// Distinct (deduplicated) range fragments currently interned.
    pub chunks: usize,
    /// Fragments with a reference count of two or more.
    pub shared_chunks: usize,
    /// Free spans inside the range arena.
    pub holes: usize,
    /// Words inside those free spans.
    pub free_words: usize,
    /// Words in the range arena, including holes.
    pub range_words: usize,
    /// Entries in the first-level (D) table.
    pub d_entries: usize,
    /// Entries in the second-level (X) leaf table.
    pub x_entries: usize,
    /// Interned next-hop handles, including the default.
    pub nexthops: usize,
    /// Size of the last published snapshot in bytes.
    pub snapshot_bytes: usize,
    /// Full rebuilds performed so far.
    pub rebuilds: u64,
    /// Incremental patch passes performed so far.
    pub patches: u64,
    /// Wall-clock duration of the last build pass.
    pub last_build: std::time::Duration,
}

impl FibStats {
    /// Free words as a fraction of the arena, zero for an empty arena.
    pub fn fragmentation(&self) -> f64 {
        if self.range_words == 0 {
            return 0.0;
        }
        self.free_words as f64 / self.range_words as f64
    }
}

impl std::fmt::Display for FibStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} routes, {} chunks ({} shared), {} holes, {} range words, \
            d {} x {}, {} nexthops, snapshot {} bytes, \
            {} rebuilds / {} patches, last build {:?}",
            self.routes,
            self.chunks,
            self.shared_chunks,
            self.holes,
            self.range_words,
            self.d_entries,
            self.x_entries,
            self.nexthops,
            self.snapshot_bytes,
            self.rebuilds,
            self.patches,
            self.last_build
        )
    }
}
