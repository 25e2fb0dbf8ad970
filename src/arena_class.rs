//! The arena class vtable: the back-end operations an [`Arena`] delegates
//! to in order to acquire, commit, and release address space.
//!
//! Grounded on `mapper.rs`'s `Mapper` trait (`#[contract_trait]`, one
//! `&'static dyn` implementation per back-end, a `page_size` precondition
//! every other method inherits) generalized with the reserve/commit split
//! arena.c's VM arena class needs: a VM-backed arena reserves address space
//! with no physical backing and commits pages individually as it grows,
//! while a client-supplied arena is handed already-backed memory up front
//! and the commit step is a no-op (arena.c's `ArenaTrivCompact` /
//! `ArenaNoPurgeSpare` / `ArenaNoGrow` stubs, mirrored here as default trait
//! methods instead of separate free functions).
//!
//! [`Arena`]: crate::arena::Arena
#[cfg(any(all(test, feature = "check_contracts_in_tests"), feature = "check_contracts"))]
use contracts::*;
#[cfg(not(any(all(test, feature = "check_contracts_in_tests"), feature = "check_contracts")))]
use disabled_contracts::*;

use crate::error::ArenaResult;
use crate::range::{Addr, Size};

#[allow(clippy::inline_fn_without_body)]
#[contract_trait]
pub trait ArenaClass: std::fmt::Debug + Sync {
    /// The granularity every address and size this class is given must be
    /// aligned to.
    #[ensures(ret > 0 && ret & (ret - 1) == 0, "page size must be a power of 2")]
    fn page_size(&self) -> Size;

    /// Reserves at least `desired_size` bytes of address space, with no
    /// obligation that it be readable or writable yet. Returns the actual
    /// base and size reserved, both page-aligned.
    #[requires(desired_size % self.page_size() == 0)]
    #[requires(desired_size > 0)]
    fn reserve(&self, desired_size: Size) -> ArenaResult<(Addr, Size)>;

    /// Releases a page-aligned range previously returned by a single
    /// `reserve` call (or a whole-chunk range this class was handed at
    /// creation, for a client-supplied class).
    #[requires(size % self.page_size() == 0)]
    fn release(&self, base: Addr, size: Size) -> ArenaResult<()>;

    /// Makes `[base, base + size)` readable and writable. For a
    /// client-supplied class the memory is already usable, so this
    /// defaults to a no-op (arena.c's trivial commit stubs).
    #[requires(size % self.page_size() == 0)]
    fn commit(&self, _base: Addr, _size: Size) -> ArenaResult<()> {
        Ok(())
    }

    /// Returns spare (committed-but-unused) memory to the operating system.
    /// Defaults to a no-op, matching `ArenaNoPurgeSpare`.
    #[requires(size % self.page_size() == 0)]
    fn purge_spare(&self, _base: Addr, _size: Size) -> ArenaResult<()> {
        Ok(())
    }

    /// Attempts to reserve additional address space of roughly `size`
    /// bytes for a new chunk, growing the arena in place. Defaults to
    /// `Resource`, matching `ArenaNoGrow`: a client-supplied arena has a
    /// fixed set of chunks and cannot be extended after creation, which
    /// looks to a caller exactly like having run out of address space.
    fn grow(&self, _size: Size) -> ArenaResult<(Addr, Size)> {
        Err(crate::error::ArenaError::Resource)
    }

    /// Whether this class can ever grow (used to decide whether Plan E's
    /// chunk-creation fallback is worth attempting).
    fn can_grow(&self) -> bool {
        false
    }
}
