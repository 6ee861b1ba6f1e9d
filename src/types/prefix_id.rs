use log::trace;

use crate::types::errors::FibError;

//------------ PrefixId ------------------------------------------------------

/// An IPv4 prefix as the FIB sees it: a network address and a length.
///
/// Field order matters: deriving `Ord` with `net` first gives exactly the
/// address-order, then length-order iteration that the sweep consumes from
/// a `BTreeMap` keyed by `PrefixId`.
#[derive(Hash, Eq, PartialEq, Ord, PartialOrd, Debug, Copy, Clone)]
pub struct PrefixId {
    net: u32,
    len: u8,
}

impl PrefixId {
    /// Validates the length and that no bits are set below the mask.
    pub fn new(net: u32, len: u8) -> Result<Self, FibError> {
        if len > 32 || net & hostmask(len) != 0 {
            trace!("rejecting malformed prefix {:08x}/{}", net, len);
            return Err(FibError::InvalidPrefix);
        }
        Ok(Self { net, len })
    }

    // Used for map bounds and internally derived prefixes, where the
    // invariant is held by construction.
    pub(crate) fn new_unchecked(net: u32, len: u8) -> Self {
        Self { net, len }
    }

    pub fn get_net(&self) -> u32 {
        self.net
    }

    pub fn get_len(&self) -> u8 {
        self.len
    }

    /// The inclusive address span `[net, net | hostmask]` this prefix
    /// covers.
    pub(crate) fn span(&self) -> (u32, u32) {
        (self.net, self.net | hostmask(self.len))
    }
}

/// All-ones below the prefix length; the whole address space for len 0.
pub(crate) fn hostmask(len: u8) -> u32 {
    u32::MAX.checked_shr(len as u32).unwrap_or(0)
}

impl std::fmt::Display for PrefixId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}",
            std::net::Ipv4Addr::from(self.net),
            self.len
        )
    }
}

impl TryFrom<inetnum::addr::Prefix> for PrefixId {
    type Error = FibError;

    fn try_from(value: inetnum::addr::Prefix) -> Result<Self, FibError> {
        match value.addr() {
            std::net::IpAddr::V4(addr) => {
                PrefixId::new(addr.into(), value.len())
            }
            std::net::IpAddr::V6(_) => Err(FibError::InvalidPrefix),
        }
    }
}

// A PrefixId is valid by construction, so this conversion cannot fail.
#[allow(clippy::unwrap_used)]
impl From<PrefixId> for inetnum::addr::Prefix {
    fn from(value: PrefixId) -> Self {
        Self::new(
            std::net::Ipv4Addr::from(value.net).into(),
            value.len,
        )
        .unwrap()
    }
}
