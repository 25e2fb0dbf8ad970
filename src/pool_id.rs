//! `PoolId`: an opaque handle a caller attaches to the tracts it owns
//! (`ArenaAddrObject`'s object identity).
//!
//! Unlike `class.rs`'s `Class`, there is no registry here: pools live
//! outside this crate entirely (the arena never allocates objects itself,
//! only address space), so a `PoolId` is nothing more than a typed,
//! non-zero caller-supplied tag with a round-trippable `NonZeroU32`
//! representation. Grounded on `class.rs`'s `Class` for the `#[repr(C)]
//! NonZeroU32` shape and the `new`/`get` round trip, minus the `lazy_static`
//! registry and `Info` struct (nothing here for it to index).
use std::num::NonZeroU32;

/// A caller-chosen identifier for the pool that owns a tract. The arena
/// stores one of these per allocated tract and hands it back unchanged from
/// `arena_addr_object`; it never interprets the value.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct PoolId {
    id: NonZeroU32,
}

impl PoolId {
    pub fn new(id: u32) -> Option<PoolId> {
        NonZeroU32::new(id).map(|id| PoolId { id })
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.id.get()
    }
}

impl From<NonZeroU32> for PoolId {
    fn from(id: NonZeroU32) -> Self {
        PoolId { id }
    }
}

#[test]
fn zero_is_not_a_pool_id() {
    assert!(PoolId::new(0).is_none());
}

#[test]
fn round_trips_through_u32() {
    let id = PoolId::new(7).unwrap();
    assert_eq!(id.get(), 7);
}
