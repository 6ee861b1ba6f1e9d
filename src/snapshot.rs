//! Packed encodings and the immutable lookup structure.
//!
//! Build-time state keeps fragments as tagged values; only here, when a
//! snapshot is assembled, is everything packed into the compact
//! on-the-wire form the lookup decodes with plain shifts and masks.
//!
//! A packed direct entry is one `u32`, `fragments:12 | base:20`:
//!
//! * `0xfff` — HIT: the whole chunk resolves to one next-hop, whose
//!   dense index is in the base field.
//! * `0xffe` — XL: the chunk has more boundaries than the count field
//!   can hold; `range[base]` is the explicit count, long entries follow.
//! * bit `0x800` set — short format, count in the low 11 bits.
//! * otherwise — long format, count is the field value.
//!
//! A long range entry is one word, `start << trie_bits | nh`, where
//! `start` occupies the chunk's `32 - trie_bits` low bits. A short entry
//! is a halfword, `start8 << 8 | nh8`, with the start quantized to an
//! 8-bit granularity; two entries per word, an odd tail repeats the last
//! entry.

use zerocopy::IntoBytes;

use crate::sweep::Boundary;
use crate::types::errors::FibError;
use crate::types::nexthop::NhId;

//------------ Packed layout constants ---------------------------------------

pub(crate) const FRAG_BITS: u32 = 12;
pub(crate) const BASE_BITS: u32 = 32 - FRAG_BITS;
pub(crate) const BASE_MASK: u32 = (1 << BASE_BITS) - 1;

pub(crate) const FRAGS_HIT: u16 = 0xfff;
pub(crate) const FRAGS_XL: u16 = 0xffe;
pub(crate) const FRAGS_SHORT: u16 = 0x800;
pub(crate) const FRAGS_COUNT_MASK: u16 = 0x7ff;

pub(crate) fn pack_direct(base: u32, frags: u16) -> u32 {
    debug_assert!(base <= BASE_MASK);
    ((frags as u32) << BASE_BITS) | base
}

//------------ EncodedFragment -----------------------------------------------

/// One chunk's boundary list in its final arena form, plus the fragments
/// field that tells the lookup how to decode it.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct EncodedFragment {
    pub words: Vec<u32>,
    pub frags: u16,
}

/// Picks the smallest encoding the boundary list fits in: short if every
/// offset sits on the quantized granularity and every next-hop index is
/// below 256, long otherwise, and XL when the count outgrows the in-band
/// count field.
pub(crate) fn encode_fragment(
    bounds: &[Boundary],
    trie_bits: u32,
) -> Result<EncodedFragment, FibError> {
    let low_bits = 32 - trie_bits;
    let n = bounds.len();
    debug_assert!(n >= 2);

    let align_mask = (1u32 << (low_bits - 8)) - 1;
    let short_ok = n <= FRAGS_COUNT_MASK as usize
        && bounds
            .iter()
            .all(|b| b.nh < 0x100 && b.off & align_mask == 0);
    if short_ok {
        let enc = |b: &Boundary| ((b.off >> (low_bits - 8)) << 8) | b.nh;
        let mut words = Vec::with_capacity(n.div_ceil(2));
        for pair in bounds.chunks(2) {
            let e0 = pair.first().map(enc).unwrap_or(0);
            let e1 = pair.get(1).or(pair.first()).map(enc).unwrap_or(0);
            words.push(e0 | (e1 << 16));
        }
        return Ok(EncodedFragment {
            words,
            frags: FRAGS_SHORT | n as u16,
        });
    }

    let nh_limit = 1u32 << trie_bits;
    if bounds.iter().any(|b| b.nh >= nh_limit) {
        return Err(FibError::TooManyNexthops);
    }
    let long = bounds.iter().map(|b| (b.off << trie_bits) | b.nh);
    if n <= FRAGS_COUNT_MASK as usize {
        Ok(EncodedFragment {
            words: long.collect(),
            frags: n as u16,
        })
    } else {
        Ok(EncodedFragment {
            words: std::iter::once(n as u32).chain(long).collect(),
            frags: FRAGS_XL,
        })
    }
}

//------------ Snapshot ------------------------------------------------------

/// The immutable lookup structure.
///
/// Exactly one snapshot is published at a time; readers reach it through
/// [`FibReader`](crate::FibReader). [`lookup`](Snapshot::lookup) never
/// allocates, blocks or mutates anything: it decodes the two-level index
/// analytically from the split constants and, for a non-hit chunk,
/// binary-searches the chunk's range fragment.
#[derive(Debug)]
pub struct Snapshot {
    d_shift: u32,
    range_shift: u32,
    x_bits: u32,
    x_mask: usize,
    range_mask: u32,
    nh_bits: u32,
    d: Box<[u16]>,
    x: Box<[u32]>,
    range: Box<[u32]>,
    nexthops: Box<[NhId]>,
    default: NhId,
}

impl Snapshot {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        trie_bits: u32,
        d_bits: u32,
        d: Box<[u16]>,
        x: Box<[u32]>,
        range: Box<[u32]>,
        nexthops: Box<[NhId]>,
        default: NhId,
    ) -> Self {
        let x_bits = trie_bits - d_bits;
        Self {
            d_shift: 32 - d_bits,
            range_shift: 32 - trie_bits,
            x_bits,
            x_mask: (1usize << x_bits) - 1,
            range_mask: u32::MAX >> trie_bits,
            nh_bits: trie_bits,
            d,
            x,
            range,
            nexthops,
            default,
        }
    }

    /// Resolves a 32-bit key to its next-hop handle.
    pub fn lookup(&self, key: u32) -> NhId {
        let leaf = self
            .d
            .get((key >> self.d_shift) as usize)
            .copied()
            .unwrap_or(0) as usize;
        let xi = (leaf << self.x_bits)
            | ((key >> self.range_shift) as usize & self.x_mask);
        let de = self
            .x
            .get(xi)
            .copied()
            .unwrap_or(pack_direct(0, FRAGS_HIT));
        let frags = (de >> BASE_BITS) as u16;
        let base = (de & BASE_MASK) as usize;
        if frags == FRAGS_HIT {
            return self.nexthop(base as u32);
        }
        let off = key & self.range_mask;
        let idx = if frags == FRAGS_XL {
            let n = self.word(base) as usize;
            self.search_long(base + 1, n, off)
        } else if frags & FRAGS_SHORT != 0 {
            self.search_short(base, (frags & FRAGS_COUNT_MASK) as usize, off)
        } else {
            self.search_long(base, frags as usize, off)
        };
        self.nexthop(idx)
    }

    /// Total size of the published tables in bytes.
    pub fn size_bytes(&self) -> usize {
        self.d.as_bytes().len()
            + self.x.as_bytes().len()
            + self.range.as_bytes().len()
            + self.nexthops.as_bytes().len()
    }

    fn nexthop(&self, idx: u32) -> NhId {
        self.nexthops
            .get(idx as usize)
            .copied()
            .unwrap_or(self.default)
    }

    fn word(&self, i: usize) -> u32 {
        self.range.get(i).copied().unwrap_or(0)
    }

    // Finds the last entry whose start is <= off. The first entry of any
    // fragment starts at 0, so the searches cannot miss.
    fn search_long(&self, base: usize, n: usize, off: u32) -> u32 {
        if n == 0 {
            return 0;
        }
        let (mut lo, mut hi) = (0usize, n - 1);
        while lo < hi {
            let mid = (lo + hi + 1) >> 1;
            if self.word(base + mid) >> self.nh_bits <= off {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        self.word(base + lo) & ((1 << self.nh_bits) - 1)
    }

    fn search_short(&self, base: usize, n: usize, off: u32) -> u32 {
        if n == 0 {
            return 0;
        }
        let q = off >> (self.range_shift - 8);
        let (mut lo, mut hi) = (0usize, n - 1);
        while lo < hi {
            let mid = (lo + hi + 1) >> 1;
            if self.half(base, mid) >> 8 <= q {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        self.half(base, lo) & 0xff
    }

    fn half(&self, base: usize, i: usize) -> u32 {
        let w = self.word(base + (i >> 1));
        if i & 1 == 0 {
            w & 0xffff
        } else {
            w >> 16
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn b(off: u32, nh: u32) -> Boundary {
        Boundary { off, nh }
    }

    #[test]
    fn short_encoding_is_chosen_for_aligned_small_fragments() {
        // T = 16: quantum is 1 << 8
        let bounds = vec![b(0, 1), b(0x100, 2), b(0x4200, 1)];
        let enc = encode_fragment(&bounds, 16).unwrap();
        assert_eq!(enc.frags, FRAGS_SHORT | 3);
        // 3 entries packed into 2 words, tail repeated
        assert_eq!(enc.words.len(), 2);
        assert_eq!(enc.words[0], ((0x1 << 8) | 2) << 16 | 1);
        assert_eq!(enc.words[1], ((0x42 << 8) | 1) << 16 | ((0x42 << 8) | 1));
    }

    #[test]
    fn unaligned_offset_or_wide_nexthop_forces_long() {
        let enc = encode_fragment(&[b(0, 1), b(0x101, 2)], 16).unwrap();
        assert_eq!(enc.frags, 2);
        assert_eq!(enc.words, vec![1, (0x101 << 16) | 2]);

        let enc = encode_fragment(&[b(0, 1), b(0x100, 0x100)], 16).unwrap();
        assert_eq!(enc.frags, 2);
    }

    #[test]
    fn oversized_fragment_gets_an_explicit_count() {
        let bounds: Vec<_> =
            (0..3000).map(|i| b(i * 3 + 1, 1 + (i & 1)) ).collect();
        let mut bounds = bounds;
        bounds[0].off = 0;
        let enc = encode_fragment(&bounds, 16).unwrap();
        assert_eq!(enc.frags, FRAGS_XL);
        assert_eq!(enc.words.len(), 3001);
        assert_eq!(enc.words[0], 3000);
    }

    #[test]
    fn nexthop_index_wider_than_the_long_field_is_an_error() {
        assert_eq!(
            encode_fragment(&[b(0, 1), b(0x101, 1 << 16)], 16),
            Err(FibError::TooManyNexthops)
        );
    }

    // A hand-packed snapshot with T = 8, D = 8, X = 0: chunk 0 is a hit,
    // chunk 1 a long fragment, chunk 2 a short fragment.
    #[test]
    fn lookup_decodes_all_three_direct_entry_forms() {
        let trie_bits = 8;
        let long = encode_fragment(
            &[b(0, 1), b(0x0000_1001, 2), b(0x0080_0000, 1)],
            trie_bits,
        )
        .unwrap();
        assert_eq!(long.frags, 3);
        let short = encode_fragment(
            &[b(0, 2), b(0x0080_0000, 3)],
            trie_bits,
        )
        .unwrap();
        assert_eq!(short.frags, FRAGS_SHORT | 2);

        let mut range = long.words.clone();
        let short_base = range.len() as u32;
        range.extend_from_slice(&short.words);

        let mut d: Vec<u16> = (0..256).map(|i| i as u16).collect();
        d[3] = 0; // leaf sharing: chunk 3 reuses chunk 0's entry
        let mut x = vec![pack_direct(0, FRAGS_HIT); 256];
        x[0] = pack_direct(4, FRAGS_HIT); // nh index 4
        x[1] = pack_direct(0, long.frags);
        x[2] = pack_direct(short_base, short.frags);

        let nexthops: Vec<NhId> =
            (0..5).map(|i| NhId(100 + i)).collect();
        let snap = Snapshot::new(
            trie_bits,
            8,
            d.into_boxed_slice(),
            x.into_boxed_slice(),
            range.into_boxed_slice(),
            nexthops.into_boxed_slice(),
            NhId(0),
        );

        // chunk 0: hit
        assert_eq!(snap.lookup(0x0000_0000), NhId(104));
        assert_eq!(snap.lookup(0x00ff_ffff), NhId(104));
        // chunk 3 shares chunk 0's leaf
        assert_eq!(snap.lookup(0x0300_0000), NhId(104));
        // chunk 1: long fragment
        assert_eq!(snap.lookup(0x0100_0000), NhId(101));
        assert_eq!(snap.lookup(0x0100_1000), NhId(101));
        assert_eq!(snap.lookup(0x0100_1001), NhId(102));
        assert_eq!(snap.lookup(0x017f_ffff), NhId(102));
        assert_eq!(snap.lookup(0x0180_0000), NhId(101));
        assert_eq!(snap.lookup(0x01ff_ffff), NhId(101));
        // chunk 2: short fragment
        assert_eq!(snap.lookup(0x0200_0000), NhId(102));
        assert_eq!(snap.lookup(0x027f_ffff), NhId(102));
        assert_eq!(snap.lookup(0x0280_0000), NhId(103));
        assert_eq!(snap.lookup(0x02ff_ffff), NhId(103));
    }
}
