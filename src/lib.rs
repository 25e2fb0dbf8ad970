//! `arenacore`: a zoned arena allocator core, providing address-space
//! reservation and allocation policy to pool-based memory managers.
//!
//! An [`Arena`] owns one or more [`Chunk`]s of address space, tracks free
//! client space in a [`FreeLand`] (a zoned coalescing block set), and
//! hands out ranges to pools via a five-plan placement policy that tries
//! to keep each pool's memory within a consistent set of address zones
//! (useful for write barriers in a generational collector, though this
//! crate has no collector of its own). Two [`ArenaClass`] back-ends are
//! provided: [`VmArenaClass`], which reserves and commits address space
//! from the operating system, and [`ClientArenaClass`], for arenas built
//! entirely out of memory the caller already owns.
pub mod arena;
pub mod arena_class;
pub mod cbs_pool;
pub mod chunk;
pub mod chunk_tree;
pub mod client_class;
pub mod control_pool;
pub mod error;
pub mod free_land;
pub mod pool_id;
pub mod range;
pub mod tract;
pub mod vm_class;

pub use arena::{Arena, ArenaConfig};
pub use arena_class::ArenaClass;
pub use client_class::ClientArenaClass;
pub use error::{ArenaError, ArenaResult};
pub use pool_id::PoolId;
pub use range::{Addr, Align, Size, ZoneSet, ZONE_SET_EMPTY, ZONE_SET_UNIV};
pub use vm_class::VmArenaClass;
