//! Error codes returned at the arena's public boundary.
//!
//! `slitter` returns plain C-style result codes (`Result<T, &'static str>`,
//! `Result<T, i32>`) rather than reaching for an error-handling crate. We
//! keep that idiom but give the boundary a real enum instead of strings, one
//! variant per code at this boundary. `Limit` is deliberately absent: it is
//! an internal signal between `free_land`, `cbs_pool` and `arena` and must
//! never cross this boundary.
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaError {
    /// No suitable address range exists even after Plans A-E.
    Resource,
    /// Backing store could not be acquired (`pages_mark_allocated` failed).
    Memory,
    /// The allocation would exceed `commit_limit`.
    CommitLimit,
    /// A structural precondition was violated (e.g. commit limit too low).
    Fail,
    /// The operation is not implemented by this arena class.
    Unimpl,
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ArenaError::Resource => "no address space available",
            ArenaError::Memory => "could not back address space with memory",
            ArenaError::CommitLimit => "would exceed commit limit",
            ArenaError::Fail => "precondition violated",
            ArenaError::Unimpl => "operation not implemented by this arena class",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ArenaError {}

pub type ArenaResult<T> = Result<T, ArenaError>;

/// Internal-only signal: the CBS block pool ran out of node storage.
/// Recovered locally by `arena.rs`; must never be surfaced as an
/// `ArenaError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Limit;

pub(crate) type LandResult<T> = Result<T, Limit>;
