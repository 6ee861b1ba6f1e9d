//! Tunables for a [`Fib`](crate::Fib).
//!
//! All knobs are plain numbers with defaults that match a full internet
//! table; tests shrink `trie_bits` to keep full rebuilds cheap. A config
//! is validated once, when it is handed to [`Fib::new`](crate::Fib::new).

use crate::snapshot::BASE_BITS;
use crate::types::errors::FibError;
use crate::types::nexthop::NhId;

//------------ FibConfig -----------------------------------------------------

#[derive(Copy, Clone, Debug)]
pub struct FibConfig {
    /// Total direct-index width T. The top T bits of an address select a
    /// chunk; one chunk covers `2^(32-T)` addresses. Wider tries mean
    /// smaller chunks, fewer range fragments and a larger direct table.
    pub trie_bits: u32,
    /// Initial split of the direct index into a D-bits first level and an
    /// X = T - D bits second level. Re-searched locally on every full
    /// rebuild; clamped to `trie_bits` when that is smaller.
    pub d_bits: u32,
    /// Lower clamp for the split search.
    pub d_min: u32,
    /// Number of free arena spans above which the next update triggers a
    /// full rebuild instead of a patch.
    pub max_holes: usize,
    /// Handle returned by lookups when no prefix covers the key.
    pub default_nexthop: NhId,
}

impl Default for FibConfig {
    fn default() -> Self {
        Self {
            trie_bits: 20,
            d_bits: 16,
            d_min: 8,
            max_holes: 16,
            default_nexthop: NhId(0),
        }
    }
}

impl FibConfig {
    pub(crate) fn validate(&self) -> Result<(), FibError> {
        // The packed base field bounds the trie width; eight bits keeps
        // the low-bits side wide enough for the short encoding's 8-bit
        // offset granularity.
        if self.trie_bits < 8 || self.trie_bits > BASE_BITS {
            return Err(FibError::InvalidConfig);
        }
        if self.d_min < 1
            || self.d_min > self.trie_bits
            || self.d_bits < self.d_min
        {
            return Err(FibError::InvalidConfig);
        }
        Ok(())
    }

    /// The D split to start from, clamped into the valid range.
    pub(crate) fn initial_d_bits(&self) -> u32 {
        self.d_bits.min(self.trie_bits)
    }
}
