//! The sweep-line chunk builder.
//!
//! For one top-level chunk this derives the minimal sorted sequence of
//! (sub-range, next-hop) boundaries from all covering prefixes, by
//! walking the chunk's routes in address order while keeping the current
//! chain of covering prefixes on a small stack, most specific on top.
//! One boundary means the whole chunk resolves to a single next-hop and
//! the caller stores it as a direct hit instead of a fragment.

use crate::types::errors::FibError;
use crate::types::nexthop::NexthopMap;
use crate::types::route::RouteSource;

//------------ Boundary ------------------------------------------------------

/// The sub-range starting at `off` (relative to the chunk base) resolves
/// to the dense next-hop index `nh`, until the next boundary.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Boundary {
    pub off: u32,
    pub nh: u32,
}

//------------ CoverStack ----------------------------------------------------

// One slot per possible prefix length. Distinct prefixes of equal length
// cannot overlap, so no two live entries ever share a length and the
// stack is bounded without allocating.
const COVER_STACK_CAP: usize = 33;

#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct CoverEntry {
    pub start: u32,
    pub end: u32,
    pub len: u8,
    pub nh: u32,
}

/// The chain of prefixes covering the sweep position, sorted by
/// ascending prefix length with the most specific on top.
#[derive(Debug)]
pub(crate) struct CoverStack {
    entries: [CoverEntry; COVER_STACK_CAP],
    len: usize,
}

impl CoverStack {
    pub(crate) fn new() -> Self {
        Self {
            entries: [CoverEntry::default(); COVER_STACK_CAP],
            len: 0,
        }
    }

    fn clear(&mut self) {
        self.len = 0;
    }

    fn push(&mut self, e: CoverEntry) {
        // A real default route replaces the implicit sentinel; everything
        // else nests strictly inside the current top.
        if let Some(top) = self.top().copied() {
            if top.len == e.len {
                if let Some(slot) = self.entries.get_mut(self.len - 1) {
                    *slot = e;
                }
                return;
            }
            debug_assert!(e.len > top.len);
        }
        debug_assert!(self.len < COVER_STACK_CAP);
        if let Some(slot) = self.entries.get_mut(self.len) {
            *slot = e;
            self.len += 1;
        }
    }

    fn top(&self) -> Option<&CoverEntry> {
        self.len.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    fn top_nh(&self) -> u32 {
        self.top().map(|e| e.nh).unwrap_or(0)
    }

    fn pop(&mut self) -> Option<CoverEntry> {
        let e = *self.top()?;
        self.len -= 1;
        Some(e)
    }
}

//------------ Emitter -------------------------------------------------------

// Collects boundaries, maximally coalesced: a boundary is only recorded
// when the covering next-hop actually changes, and two pops expiring at
// the same address collapse into one.
struct Emitter<'a> {
    out: &'a mut Vec<Boundary>,
    first: u32,
    cur: u32,
}

impl<'a> Emitter<'a> {
    fn new(out: &'a mut Vec<Boundary>, first: u32, nh: u32) -> Self {
        out.clear();
        out.push(Boundary { off: 0, nh });
        Self { out, first, cur: nh }
    }

    fn emit(&mut self, addr: u32, nh: u32) {
        if nh == self.cur {
            return;
        }
        let off = addr - self.first;
        if let Some(last) = self.out.last_mut() {
            if last.off == off {
                last.nh = nh;
                self.cur = nh;
                // The rewrite may have joined two runs.
                let n = self.out.len();
                if n >= 2 && self.out.get(n - 2).map(|b| b.nh) == Some(nh) {
                    self.out.pop();
                }
                return;
            }
        }
        self.out.push(Boundary { off, nh });
        self.cur = nh;
    }
}

// Pops every covering prefix whose range ends before `upto`, emitting a
// boundary at each expiry with the next-hop of the prefix that becomes
// the cover there.
fn expire(stack: &mut CoverStack, upto: u32, em: &mut Emitter) {
    while let Some(top) = stack.top() {
        if top.end >= upto {
            break;
        }
        let e = match stack.pop() {
            Some(e) => e,
            None => break,
        };
        // e.end < upto <= u32::MAX, so the increment cannot wrap.
        em.emit(e.end + 1, stack.top_nh());
    }
}

//------------ sweep_chunk ---------------------------------------------------

/// Sweeps one chunk and leaves its coalesced boundary list in `out`.
///
/// The stack is seeded with the longest-match chain at the chunk's first
/// address, below an implicit default-route sentinel spanning the whole
/// address space (dense next-hop index 0). Prefixes starting inside the
/// chunk then arrive in `(address, length)` order: each one is pushed
/// after expiring every cover that ends before it.
pub(crate) fn sweep_chunk<RS: RouteSource + ?Sized>(
    source: &RS,
    nexthops: &mut NexthopMap,
    chunk: u32,
    trie_bits: u32,
    stack: &mut CoverStack,
    out: &mut Vec<Boundary>,
) -> Result<(), FibError> {
    let first = chunk << (32 - trie_bits);
    let last = first | (u32::MAX >> trie_bits);

    stack.clear();
    stack.push(CoverEntry {
        start: 0,
        end: u32::MAX,
        len: 0,
        nh: 0,
    });

    let mut err = None;
    source.covering_chain(first, &mut |r| {
        if err.is_some() {
            return;
        }
        match nexthops.intern(r.nexthop) {
            Ok(nh) => {
                let (start, end) = r.prefix.span();
                stack.push(CoverEntry {
                    start,
                    end,
                    len: r.prefix.get_len(),
                    nh,
                });
            }
            Err(e) => err = Some(e),
        }
    });
    if let Some(e) = err {
        return Err(e);
    }

    let mut em = Emitter::new(out, first, stack.top_nh());

    // Everything with a network address of exactly `first` covers the
    // first address and is already on the stack, so the walk starts one
    // past it.
    source.for_each_in(first + 1, last, &mut |r| {
        if err.is_some() {
            return;
        }
        let nh = match nexthops.intern(r.nexthop) {
            Ok(nh) => nh,
            Err(e) => {
                err = Some(e);
                return;
            }
        };
        let (start, end) = r.prefix.span();
        debug_assert!(end <= last);
        expire(stack, start, &mut em);
        em.emit(start, nh);
        stack.push(CoverEntry {
            start,
            end,
            len: r.prefix.get_len(),
            nh,
        });
    });
    if let Some(e) = err {
        return Err(e);
    }

    // Covers ending exactly at the chunk end need no boundary; the next
    // chunk reseeds its own chain.
    expire(stack, last, &mut em);
    Ok(())
}
