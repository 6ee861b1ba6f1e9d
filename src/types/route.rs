use std::collections::BTreeMap;

use log::warn;

use crate::types::errors::FibError;
use crate::types::nexthop::NhId;
use crate::types::prefix_id::{hostmask, PrefixId};

//------------ RouteEntry ----------------------------------------------------

/// One route as observed by the FIB builder: a prefix bound to a next-hop
/// handle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub prefix: PrefixId,
    pub nexthop: NhId,
}

//------------ RouteUpdate ---------------------------------------------------

/// One element of the change feed: a prefix with the next-hop that was
/// added, the one that was removed, or both (a replacement).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RouteUpdate {
    pub prefix: PrefixId,
    pub added: Option<NhId>,
    pub removed: Option<NhId>,
}

//------------ RouteSource ---------------------------------------------------

/// Read access to the routing table that owns the route records.
///
/// The FIB never stores prefixes itself; it derives its lookup structure
/// from these three queries. Builds are serialized by whatever locking the
/// route source applies around [`Fib::apply`](crate::Fib::apply).
pub trait RouteSource {
    /// Visits every prefix covering `addr`, shortest prefix first. Used
    /// to seed a chunk sweep with the longest-match chain of ancestors.
    fn covering_chain(&self, addr: u32, visit: &mut dyn FnMut(RouteEntry));

    /// Visits every prefix whose network address lies in `[lo, hi]`, in
    /// ascending `(address, length)` order.
    fn for_each_in(&self, lo: u32, hi: u32, visit: &mut dyn FnMut(RouteEntry));

    /// Total number of routes currently in the table.
    fn route_count(&self) -> usize;
}

//------------ RouteTable ----------------------------------------------------

/// A `BTreeMap`-backed [`RouteSource`].
///
/// In production the route source is the host's routing table; this
/// implementation is the reference collaborator and the one the tests
/// drive. Mutations return the [`RouteUpdate`] events to feed into
/// [`Fib::apply`](crate::Fib::apply).
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: BTreeMap<PrefixId, NhId>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route, replacing any previous next-hop for the same prefix.
    pub fn announce(&mut self, prefix: PrefixId, nexthop: NhId) -> RouteUpdate {
        let removed = self.routes.insert(prefix, nexthop);
        RouteUpdate {
            prefix,
            added: Some(nexthop),
            removed,
        }
    }

    /// Removes a route. Withdrawing a prefix that was never announced is
    /// an inconsistency in the caller's feed and fails defensively.
    pub fn withdraw(&mut self, prefix: PrefixId) -> Result<RouteUpdate, FibError> {
        match self.routes.remove(&prefix) {
            Some(nh) => Ok(RouteUpdate {
                prefix,
                added: None,
                removed: Some(nh),
            }),
            None => {
                warn!("withdrawal for unknown prefix {}", prefix);
                Err(FibError::PrefixNotFound)
            }
        }
    }

    /// Longest-prefix match by linear probe over the possible lengths.
    /// This is the reference the engine's lookups are tested against.
    pub fn best_match(&self, addr: u32) -> Option<RouteEntry> {
        (0..=32u8).rev().find_map(|len| {
            let p = PrefixId::new_unchecked(addr & !hostmask(len), len);
            self.routes
                .get(&p)
                .map(|&nexthop| RouteEntry { prefix: p, nexthop })
        })
    }
}

impl RouteSource for RouteTable {
    fn covering_chain(&self, addr: u32, visit: &mut dyn FnMut(RouteEntry)) {
        for len in 0..=32u8 {
            let p = PrefixId::new_unchecked(addr & !hostmask(len), len);
            if let Some(&nexthop) = self.routes.get(&p) {
                visit(RouteEntry { prefix: p, nexthop });
            }
        }
    }

    fn for_each_in(&self, lo: u32, hi: u32, visit: &mut dyn FnMut(RouteEntry)) {
        let lo = PrefixId::new_unchecked(lo, 0);
        let hi = PrefixId::new_unchecked(hi, 32);
        for (&prefix, &nexthop) in self.routes.range(lo..=hi) {
            visit(RouteEntry { prefix, nexthop });
        }
    }

    fn route_count(&self) -> usize {
        self.routes.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pfx(net: u32, len: u8) -> PrefixId {
        PrefixId::new(net, len).unwrap()
    }

    #[test]
    fn withdraw_unknown_fails() {
        let mut t = RouteTable::new();
        t.announce(pfx(0x0a000000, 8), NhId(1));
        assert_eq!(
            t.withdraw(pfx(0x0b000000, 8)),
            Err(FibError::PrefixNotFound)
        );
        assert!(t.withdraw(pfx(0x0a000000, 8)).is_ok());
        assert_eq!(t.route_count(), 0);
    }

    #[test]
    fn chain_is_shortest_first() {
        let mut t = RouteTable::new();
        t.announce(pfx(0, 0), NhId(1));
        t.announce(pfx(0x0a000000, 8), NhId(2));
        t.announce(pfx(0x0a010000, 16), NhId(3));
        let mut seen = vec![];
        t.covering_chain(0x0a010203, &mut |r| seen.push(r.prefix.get_len()));
        assert_eq!(seen, vec![0, 8, 16]);
    }

    #[test]
    fn best_match_picks_longest() {
        let mut t = RouteTable::new();
        t.announce(pfx(0, 0), NhId(1));
        t.announce(pfx(0x0a000000, 8), NhId(2));
        t.announce(pfx(0x0a010000, 16), NhId(3));
        assert_eq!(t.best_match(0x0a010203).unwrap().nexthop, NhId(3));
        assert_eq!(t.best_match(0x0a020000).unwrap().nexthop, NhId(2));
        assert_eq!(t.best_match(0xc0a80001).unwrap().nexthop, NhId(1));
    }

    #[test]
    fn span_iteration_is_address_ordered() {
        let mut t = RouteTable::new();
        t.announce(pfx(0x0a000000, 8), NhId(1));
        t.announce(pfx(0x0a000000, 16), NhId(2));
        t.announce(pfx(0x0a800000, 9), NhId(3));
        t.announce(pfx(0x0b000000, 8), NhId(4));
        let mut seen = vec![];
        t.for_each_in(0x0a000000, 0x0affffff, &mut |r| seen.push(r.prefix));
        assert_eq!(
            seen,
            vec![pfx(0x0a000000, 8), pfx(0x0a000000, 16), pfx(0x0a800000, 9)]
        );
    }
}
