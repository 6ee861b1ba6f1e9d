use std::collections::HashMap;

use crate::snapshot::BASE_MASK;
use crate::types::errors::FibError;

//------------ NhId ----------------------------------------------------------

/// An opaque next-hop handle.
///
/// Handles are allocated and owned by an external next-hop registry; the
/// FIB never interprets them, it only stores them and hands them back from
/// lookups. Internally every handle is interned to a small dense index by
/// [`NexthopMap`], since the packed range encodings only have room for a
/// narrow next-hop field.
#[derive(
    Hash,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Debug,
    Copy,
    Clone,
    zerocopy::FromBytes,
    zerocopy::IntoBytes,
    zerocopy::KnownLayout,
    zerocopy::Immutable,
)]
#[repr(transparent)]
pub struct NhId(pub u32);

impl std::fmt::Display for NhId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "nh{}", self.0)
    }
}

//------------ NexthopMap ----------------------------------------------------

/// Interns next-hop handles to dense indices.
///
/// Index 0 is always the configured default (no-route) handle, so a chunk
/// with no covering prefix encodes like any other hit. Indices grow
/// monotonically between full rebuilds; a full rebuild resets the map and
/// re-interns only the handles still in use.
#[derive(Debug)]
pub(crate) struct NexthopMap {
    by_handle: HashMap<NhId, u32>,
    handles: Vec<NhId>,
}

impl NexthopMap {
    pub(crate) fn new(default: NhId) -> Self {
        let mut m = Self {
            by_handle: HashMap::new(),
            handles: Vec::new(),
        };
        m.reset(default);
        m
    }

    pub(crate) fn reset(&mut self, default: NhId) {
        self.by_handle.clear();
        self.handles.clear();
        self.handles.push(default);
        self.by_handle.insert(default, 0);
    }

    pub(crate) fn intern(&mut self, nh: NhId) -> Result<u32, FibError> {
        if let Some(&idx) = self.by_handle.get(&nh) {
            return Ok(idx);
        }
        let idx = self.handles.len() as u32;
        // The packed hit entry stores the index in the base field; an
        // index beyond that cannot be represented in any snapshot.
        if idx > BASE_MASK {
            return Err(FibError::TooManyNexthops);
        }
        self.handles.push(nh);
        self.by_handle.insert(nh, idx);
        Ok(idx)
    }

    pub(crate) fn handles(&self) -> &[NhId] {
        &self.handles
    }
}
