//! The CBS block pool: a fixed-size-block allocator dedicated to storing
//! `free_land` tree nodes.
//!
//! It refuses to self-extend: it must be fed pages explicitly (via
//! `arena::arena_extend_cbs_block_pool`), and returns [`crate::error::Limit`]
//! on exhaustion instead of growing itself, breaking the bootstrap cycle
//! where the free land would otherwise need to ask the arena (and hence the
//! free land) for its own storage.
//!
//! Grounded on `rack.rs`'s `Rack` (allocates/recycles fixed-size units with
//! `#[ensures]`-annotated contracts) -- the same "dedicated pool of
//! identically-sized things, with a strict empty/non-empty discipline"
//! shape, generalized from magazines to free-land nodes. We don't need
//! `magazine_stack.rs`'s lock-free intrusive stack here: this core is
//! single-threaded cooperative throughout.
#[cfg(any(all(test, feature = "check_contracts_in_tests"), feature = "check_contracts"))]
use contracts::*;
#[cfg(not(any(all(test, feature = "check_contracts_in_tests"), feature = "check_contracts")))]
use disabled_contracts::*;

use crate::error::{LandResult, Limit};
use crate::range::Size;

/// Nominal size, in bytes, of one free-land tree node. This is a
/// bookkeeping constant, not a real `size_of`: `free_land.rs` keeps its
/// nodes in ordinary `Box`-owned memory (see DESIGN.md, "Free-land node
/// storage placement") and only uses this pool to account for how many
/// nodes the pages fed to it could have backed, so the `Limit`/bootstrap
/// control flow matches the real thing exactly.
const NODE_SIZE: Size = 48;

/// A fixed-size-block pool, accounted for in node-sized units. It never
/// grows on its own; `extend` must be called with a page the caller
/// obtained from `arena::arena_alloc_page`.
#[derive(Debug, Default)]
pub struct CbsBlockPool {
    capacity: usize,
    allocated: usize,
}

impl CbsBlockPool {
    pub fn new() -> Self {
        CbsBlockPool {
            capacity: 0,
            allocated: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn allocated(&self) -> usize {
        self.allocated
    }

    pub fn available(&self) -> usize {
        self.capacity - self.allocated
    }

    /// Adds one page's worth of node storage. Must be followed by excluding
    /// that page's range from the free land -- this pool has no opinion on
    /// that; it's the arena's job.
    #[ensures(self.capacity >= old(self.capacity), "extending never shrinks capacity")]
    pub fn extend(&mut self, page_size: Size) {
        let blocks = (page_size / NODE_SIZE).max(1);
        self.capacity += blocks;
    }

    /// Reserves `count` nodes' worth of capacity, or returns `Limit` if the
    /// pool doesn't have that many free.
    #[requires(count > 0)]
    pub(crate) fn try_reserve(&mut self, count: usize) -> LandResult<()> {
        if self.available() < count {
            return Err(Limit);
        }
        self.allocated += count;
        Ok(())
    }

    /// Returns `count` nodes' worth of capacity to the pool, e.g. after a
    /// coalesce reduces the number of live free-land entries.
    pub(crate) fn release(&mut self, count: usize) {
        assert!(count <= self.allocated, "releasing more nodes than allocated");
        self.allocated -= count;
    }
}

#[test]
fn exhaustion_and_extend() {
    let mut pool = CbsBlockPool::new();
    assert_eq!(pool.try_reserve(1), Err(Limit));

    pool.extend(4096);
    assert!(pool.capacity() > 0);

    let cap = pool.capacity();
    assert!(pool.try_reserve(cap).is_ok());
    assert_eq!(pool.try_reserve(1), Err(Limit));

    pool.release(cap);
    assert_eq!(pool.allocated(), 0);
}
