//! The control pool: the arena's allocator for its own bookkeeping memory
//! (arena.c's `ControlAlloc`/`ControlFree`).
//!
//! Tract descriptors, chunk headers that don't fit in a chunk's own
//! header grains, and similar small, variable-sized, arena-internal
//! allocations come from here rather than from the client-facing
//! CBS/free-land path: this pool is fed whole pages the same way
//! `cbs_pool.rs` is (via `Arena::arena_alloc_page`), and is never visible
//! to pool clients.
//!
//! Grounded on reusing `free_land.rs`'s coalescing machinery at a smaller
//! granularity: zones don't matter for the arena's own memory, so this
//! wraps a [`FreeLand`] and always searches the whole universe of zones.
use crate::cbs_pool::CbsBlockPool;
use crate::error::LandResult;
use crate::free_land::FreeLand;
use crate::range::{Addr, Range, Size, ZONE_SET_UNIV};

#[derive(Default)]
pub struct ControlPool {
    free: FreeLand,
    nodes: CbsBlockPool,
}

impl ControlPool {
    pub fn new() -> Self {
        ControlPool {
            free: FreeLand::new(),
            nodes: CbsBlockPool::new(),
        }
    }

    /// Adds a freshly obtained page to the pool's free space. `chunk_base`
    /// identifies the owning chunk, so this page's range never coalesces
    /// with a control-pool page belonging to a different chunk.
    pub fn extend(&mut self, page: Range, chunk_base: Addr) -> LandResult<()> {
        self.nodes.extend(page.size());
        self.free.insert(page, chunk_base, &mut self.nodes)?;
        Ok(())
    }

    /// Allocates `size` bytes aligned to `align` from the pool's free
    /// space. Returns `Ok(None)` if no free range is large enough (the
    /// caller should then extend the pool with another page and retry).
    pub fn alloc(&mut self, size: Size, align: Size) -> LandResult<Option<Addr>> {
        let found = self
            .free
            .find_in_zones(size, ZONE_SET_UNIV, 0, align, false, &mut self.nodes)?;
        Ok(found.map(|(range, _)| range.base()))
    }

    /// Returns a previously allocated range to the pool.
    pub fn free(&mut self, base: Addr, size: Size, chunk_base: Addr) -> LandResult<()> {
        self.free.insert(Range::new(base, base + size), chunk_base, &mut self.nodes)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn alloc_and_free_round_trip() {
        let mut pool = ControlPool::new();
        pool.extend(Range::new(0x1000, 0x2000), 0x1000).unwrap();

        let a = pool.alloc(0x100, 16).unwrap().expect("should fit");
        let b = pool.alloc(0x100, 16).unwrap().expect("should fit");
        assert_ne!(a, b);

        pool.free(a, 0x100, 0x1000).unwrap();
        pool.free(b, 0x100, 0x1000).unwrap();

        // Freed space should have coalesced back into one whole-page range.
        let c = pool.alloc(0x1000, 16).unwrap();
        assert!(c.is_some());
    }

    #[test]
    fn alloc_fails_when_exhausted() {
        let mut pool = ControlPool::new();
        pool.extend(Range::new(0x1000, 0x1100), 0x1000).unwrap();
        assert!(pool.alloc(0x1000, 16).unwrap().is_none());
    }
}
