use std::fmt;

/// Possible errors returned by build-path methods on a FIB. The read path
/// has no error conditions: every 32-bit key has a defined lookup result.
/// Most of these errors are recoverable; the structural-limit variants
/// are not, and require a configuration change.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum FibError {
    /// A prefix had a length above 32, bits set below its mask, or was
    /// not an IPv4 prefix. The whole update batch carrying it is
    /// rejected and no state was changed.
    InvalidPrefix,
    /// A withdrawal named a prefix that was never announced. The batch
    /// is rejected defensively rather than risking an inconsistent
    /// table.
    PrefixNotFound,
    /// The tunables passed in are out of range or mutually inconsistent
    /// (e.g. a D split wider than the trie itself).
    InvalidConfig,
    /// The range arena grew past the addressable range of the packed
    /// base field, even after compaction. Not retryable: increase the
    /// trie width or reduce the number of prefixes.
    ArenaLimitExceeded,
    /// No usable D/X split exists because every candidate needs more
    /// distinct leaves than the leaf index can address. Not retryable.
    TrieLimitExceeded,
    /// More distinct next-hops than the packed next-hop field can hold.
    /// Not retryable with the current trie width.
    TooManyNexthops,
    /// A working table could not grow. The previously published
    /// snapshot remains authoritative; the build is retried on the next
    /// update batch.
    OutOfMemory,
}

impl std::error::Error for FibError {}

impl fmt::Display for FibError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            FibError::InvalidPrefix => {
                write!(f, "Error: The prefix is malformed.")
            }
            FibError::PrefixNotFound => {
                write!(
                    f,
                    "Error: A withdrawal was received for a prefix that \
                    was never announced."
                )
            }
            FibError::InvalidConfig => {
                write!(f, "Error: The FIB configuration is invalid.")
            }
            FibError::ArenaLimitExceeded => {
                write!(
                    f,
                    "Error: The range arena exceeds the addressable base \
                    range. Increase the trie width or reduce the prefix \
                    count."
                )
            }
            FibError::TrieLimitExceeded => {
                write!(
                    f,
                    "Error: No D/X split can address the number of \
                    distinct trie leaves."
                )
            }
            FibError::TooManyNexthops => {
                write!(
                    f,
                    "Error: More distinct next-hops than the packed \
                    next-hop field can hold."
                )
            }
            FibError::OutOfMemory => {
                write!(
                    f,
                    "Error: A working table could not be grown. The last \
                    published snapshot remains in use."
                )
            }
        }
    }
}
