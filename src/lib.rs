#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

//! A compressed IPv4 longest-prefix-match forwarding table (FIB).
//!
//! This crate builds, incrementally updates and queries a two-level
//! direct-indexed lookup structure over a dynamic set of IPv4 prefixes,
//! each bound to an opaque next-hop handle. The design follows the DXR
//! family of range-based lookup structures: the top `T` bits of an
//! address index a (deduplicated, two-level) direct table whose entries
//! either resolve the whole chunk to a single next-hop, or point into a
//! shared arena of sorted range fragments that a small binary search
//! resolves.
//!
//! The structure is read-mostly and write-rare. All building happens on
//! a single control-plane thread through [`Fib`]; lookups run lock-free
//! on any number of threads through [`FibReader`], which only ever
//! dereferences the currently published immutable [`Snapshot`].
//! Publication is a single atomic pointer swap and superseded snapshots
//! are reclaimed through an epoch guard, so a reader observes either
//! entirely the old or entirely the new structure.

mod config;
mod fib;
mod range_arena;
mod snapshot;
mod sweep;
mod trie;
mod types;

// re-exports
pub use crossbeam_epoch::{self as epoch, Guard};
pub use inetnum::addr;

/// Numeric tunables for a [`Fib`]
pub use config::FibConfig;

/// The build half (single writer) and the read half (many readers)
pub use fib::{Fib, FibReader};

/// The immutable, atomically published lookup structure
pub use snapshot::Snapshot;

/// Error types returned by build-path methods
pub use types::errors::FibError;

/// Opaque next-hop handle, owned by the external next-hop registry
pub use types::nexthop::NhId;

/// Internal IPv4 prefix key, convertible from `inetnum::addr::Prefix`
pub use types::prefix_id::PrefixId;

/// The route source seam and the provided `BTreeMap`-backed table
pub use types::route::{RouteEntry, RouteSource, RouteTable, RouteUpdate};

/// Introspection counters for operational tooling
pub use types::stats::FibStats;
