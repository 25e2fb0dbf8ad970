//! `Tract`: the per-grain descriptor of client-owned memory (arena.c's
//! `Tract`).
//!
//! A tract records which pool owns a grain and an opaque word the pool is
//! free to use however it likes (arena.c's `Tract` carries a generation
//! summary and colour for the tracing collector; this core has no
//! tracer, so only the pool linkage and the opaque payload survive).
//! Grounded on `linear_ref.rs`'s ownership discipline -- a tract is
//! claimed exactly once by `Arena::alloc` and released exactly once by
//! `Arena::free` -- and on `mill.rs`'s `ChunkMetadata` for the
//! per-chunk, index-addressed table shape.
use crate::chunk::Index;
use crate::pool_id::PoolId;

/// One grain's worth of bookkeeping: which pool owns it, and a payload
/// word the pool may use for whatever it needs (object headers, a
/// generation tag, ...). Only the grain at a tract's base carries a
/// `Tract`; the rest of a multi-grain allocation has no descriptor of its
/// own (arena.c locates them the same way, via `TRACT_OF_TRACTS`-style
/// base lookup rather than a fully populated table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tract {
    pool: PoolId,
    p: usize,
}

impl Tract {
    pub fn new(pool: PoolId) -> Self {
        Tract { pool, p: 0 }
    }

    pub fn pool(&self) -> PoolId {
        self.pool
    }

    pub fn p(&self) -> usize {
        self.p
    }

    pub fn set_p(&mut self, p: usize) {
        self.p = p;
    }
}

/// A sparse, index-addressed table of tracts, one slot per grain in a
/// chunk. Only base grains of live allocations are `Some`.
#[derive(Debug, Clone, Default)]
pub struct TractTable {
    slots: Vec<Option<Tract>>,
}

impl TractTable {
    pub fn new(grains: usize) -> Self {
        TractTable {
            slots: vec![None; grains],
        }
    }

    pub fn get(&self, index: Index) -> Option<&Tract> {
        self.slots[index].as_ref()
    }

    /// Installs a tract at `index`. Asserts the slot was empty: a grain
    /// can't be claimed twice without an intervening free.
    pub fn set(&mut self, index: Index, tract: Tract) {
        assert!(self.slots[index].is_none(), "grain is already claimed by a tract");
        self.slots[index] = Some(tract);
    }

    /// Clears the tract at `index`. Asserts one was actually present.
    pub fn clear(&mut self, index: Index) -> Tract {
        self.slots[index].take().expect("grain has no tract to release")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn claim_and_release() {
        let mut table = TractTable::new(4);
        let pool = PoolId::new(1).unwrap();

        assert!(table.get(0).is_none());
        table.set(0, Tract::new(pool));
        assert_eq!(table.get(0).unwrap().pool(), pool);

        let released = table.clear(0);
        assert_eq!(released.pool(), pool);
        assert!(table.get(0).is_none());
    }

    #[test]
    #[should_panic(expected = "already claimed")]
    fn double_claim_panics() {
        let mut table = TractTable::new(1);
        let pool = PoolId::new(1).unwrap();
        table.set(0, Tract::new(pool));
        table.set(0, Tract::new(pool));
    }
}
