//! The arena core: two-phase create/destroy, chunk management, and the
//! five-plan allocation policy, grounded on arena.c's
//! `ArenaCreate`/`ArenaDestroy`/`ArenaAlloc`/`ArenaFree`/`arenaAllocPolicy`.
//!
//! This core is single-threaded and cooperative: nothing in `Arena` takes
//! a lock. Concurrent access is the caller's problem, the same way
//! `mill.rs`'s `Mill` assumes its caller serializes access to a given mill
//! instance.
use crate::arena_class::ArenaClass;
use crate::chunk::Chunk;
use crate::chunk_tree::ChunkTree;
use crate::cbs_pool::CbsBlockPool;
use crate::control_pool::ControlPool;
use crate::error::{ArenaError, ArenaResult};
use crate::free_land::FreeLand;
use crate::pool_id::PoolId;
use crate::range::{self, Addr, Align, Range, Size, ZoneSet, ZONE_SET_UNIV};

/// Default size, in grains, of a new chunk's header reserve. One grain
/// seeds the CBS block pool immediately (see `register_chunk`); the rest
/// stay free as a standing supply `steal_reserve_page` draws from as
/// `cbs_pool`/`control` need more capacity.
const DEFAULT_RESERVE_PAGES: usize = 4;

/// Configuration for a new [`Arena`]. Grounded on `class.rs`'s
/// `ClassConfig` (a plain, owned struct of everything a constructor
/// needs, no `Default` magic hiding required fields).
pub struct ArenaConfig {
    /// The address-space granularity everything in this arena is
    /// allocated in multiples of.
    pub grain_size: Size,
    /// `log2` of the zone stripe width.
    pub zone_shift: u32,
    /// Size of the first chunk this arena reserves at creation time.
    pub initial_chunk_size: Size,
    /// Upper bound on total committed memory. `None` means no limit
    /// (`ArenaSetCommitLimit` with `COMMIT_LIMIT_MAX`).
    pub commit_limit: Option<Size>,
}

impl ArenaConfig {
    pub fn new(grain_size: Size, zone_shift: u32, initial_chunk_size: Size) -> Self {
        ArenaConfig {
            grain_size,
            zone_shift,
            initial_chunk_size,
            commit_limit: None,
        }
    }
}

/// A lightweight cache of the most recently touched tract's chunk, mirroring
/// arena.c's `lastTract`: repeated `has_addr`/`addr_object` calls in the
/// same chunk skip the tree lookup.
#[derive(Default, Clone, Copy)]
struct LastChunk {
    base: Option<Addr>,
}

pub struct Arena {
    class: Box<dyn ArenaClass>,
    grain_size: Size,
    zone_shift: u32,
    chunks: ChunkTree,
    free_land: FreeLand,
    cbs_pool: CbsBlockPool,
    control: ControlPool,
    next_chunk_serial: u64,

    reserved: Size,
    committed: Size,
    commit_limit: Size,
    spare_committed: Size,
    spare_commit_limit: Size,

    last_chunk: LastChunk,
}

impl Arena {
    /// Creates an arena with one initial chunk, and seeds its CBS and
    /// control pools from that chunk's header reserve (arena.c's
    /// `ArenaCreate`).
    pub fn create(class: Box<dyn ArenaClass>, config: ArenaConfig) -> ArenaResult<Arena> {
        assert!(config.initial_chunk_size % config.grain_size == 0);
        let mut arena = Arena::empty(class, &config);
        arena.create_chunk(config.initial_chunk_size)?;
        log::info!(
            "arena created: grain_size={} zone_shift={} initial_chunk_size={}",
            config.grain_size,
            config.zone_shift,
            config.initial_chunk_size
        );
        Ok(arena)
    }

    /// Creates an arena whose first chunk is memory the caller already
    /// owns (arena.c's client arena class): `[base, base + size)` must be
    /// readable and writable already, since a [`ClientArenaClass`] never
    /// commits anything on its own.
    ///
    /// [`ClientArenaClass`]: crate::client_class::ClientArenaClass
    pub fn create_client(class: Box<dyn ArenaClass>, config: ArenaConfig, base: Addr, size: Size) -> ArenaResult<Arena> {
        let mut arena = Arena::empty(class, &config);
        arena.extend_with(base, size)?;
        log::info!("client arena created: base={:#x} size={}", base, size);
        Ok(arena)
    }

    fn empty(class: Box<dyn ArenaClass>, config: &ArenaConfig) -> Arena {
        assert!(range::is_power_of_two(config.grain_size));
        Arena {
            class,
            grain_size: config.grain_size,
            zone_shift: config.zone_shift,
            chunks: ChunkTree::new(),
            free_land: FreeLand::new(),
            cbs_pool: CbsBlockPool::new(),
            control: ControlPool::new(),
            next_chunk_serial: 0,
            reserved: 0,
            committed: 0,
            commit_limit: config.commit_limit.unwrap_or(usize::MAX),
            spare_committed: 0,
            spare_commit_limit: 0,
            last_chunk: LastChunk::default(),
        }
    }

    /// Releases every chunk back to the arena class (arena.c's
    /// `ArenaFinish`/`ArenaDestroy`). Consumes the arena: there is nothing
    /// meaningful to do with it afterwards.
    pub fn destroy(mut self) {
        let bases: Vec<Addr> = self.chunks.iter().map(Chunk::base).collect();
        for base in bases {
            if let Some(chunk) = self.chunks.remove(base) {
                if let Err(err) = self.class.release(chunk.base(), chunk.limit() - chunk.base()) {
                    log::error!("arena destroy: failed to release chunk at {:#x}: {}", chunk.base(), err);
                }
            }
        }
    }

    pub fn grain_size(&self) -> Size {
        self.grain_size
    }

    pub fn reserved(&self) -> Size {
        self.reserved
    }

    pub fn committed(&self) -> Size {
        self.committed
    }

    pub fn spare_committed(&self) -> Size {
        self.spare_committed
    }

    pub fn commit_limit(&self) -> Size {
        self.commit_limit
    }

    /// `ArenaAvail`: the committed memory an allocation could still use,
    /// after subtracting spare memory the arena is holding onto as slack.
    pub fn avail(&self) -> Size {
        self.commit_limit.saturating_sub(self.committed - self.spare_committed)
    }

    /// `ArenaSetCommitLimit`: lowering the limit is only allowed down to
    /// what's currently committed minus whatever spare memory can be
    /// purged to make room.
    pub fn set_commit_limit(&mut self, limit: Size) -> ArenaResult<()> {
        if limit >= self.commit_limit {
            self.commit_limit = limit;
            return Ok(());
        }

        let in_use = self.committed - self.spare_committed;
        if limit < in_use {
            return Err(ArenaError::CommitLimit);
        }

        // Purge enough spare memory to fit under the new limit.
        let deficit = self.committed.saturating_sub(limit);
        if deficit > 0 {
            self.purge_spare(deficit.min(self.spare_committed));
        }

        self.commit_limit = limit;
        Ok(())
    }

    pub fn set_spare_commit_limit(&mut self, limit: Size) {
        if limit < self.spare_commit_limit && self.spare_committed > limit {
            self.purge_spare(self.spare_committed - limit);
        }
        self.spare_commit_limit = limit;
    }

    /// Releases up to `want` bytes of spare-committed backing store via the
    /// class's `purge_spare` hook (arena.c's `ArenaSetCommitLimit`/
    /// `ArenaSetSpareCommitLimit`, which call `class->purgeSpare` directly
    /// rather than only adjusting accounting). We don't track which
    /// free-land ranges are spare at sub-chunk granularity, so this walks
    /// the free land from the low end and purges whole ranges (or a prefix
    /// of one) until `want` bytes have actually been released; `committed`/
    /// `spare_committed` are only decremented by what the class confirms it
    /// purged.
    fn purge_spare(&mut self, want: Size) {
        let mut remaining = want.min(self.spare_committed);
        if remaining == 0 {
            return;
        }

        let ranges: Vec<Range> = self.free_land.iter().collect();
        for range in ranges {
            if remaining == 0 {
                break;
            }

            let chunk_size = range::align_down(range.size().min(remaining), self.grain_size);
            if chunk_size == 0 {
                continue;
            }

            match self.class.purge_spare(range.base(), chunk_size) {
                Ok(()) => {
                    self.committed -= chunk_size;
                    self.spare_committed -= chunk_size;
                    remaining -= chunk_size;
                }
                Err(err) => {
                    log::warn!("purge_spare: class purge failed for {:#x}+{}: {}", range.base(), chunk_size, err);
                }
            }
        }
    }

    /// Reserves and registers a new chunk, seeding its header reserve into
    /// the CBS and control pools and its client space into the free land.
    fn create_chunk(&mut self, size: Size) -> ArenaResult<Addr> {
        let page_size = self.class.page_size();
        let size = range::align_up(size.max(page_size), page_size);

        let (base, reserved_size) = self.class.reserve(size)?;
        self.reserved += reserved_size;

        self.register_chunk(base, reserved_size)
    }

    /// Registers caller-supplied memory as a new chunk, without asking the
    /// arena class to reserve it first (arena.c's client arena path,
    /// `Arena::extend_with`): the caller already owns `[base, base +
    /// size)` and guarantees it is usable.
    pub fn extend_with(&mut self, base: Addr, size: Size) -> ArenaResult<Addr> {
        assert!(size % self.grain_size == 0);
        self.reserved += size;
        self.register_chunk(base, size)
    }

    fn register_chunk(&mut self, base: Addr, reserved_size: Size) -> ArenaResult<Addr> {
        let pages = reserved_size / self.grain_size;
        let reserve_pages = DEFAULT_RESERVE_PAGES.min(pages.saturating_sub(1)).max(0);

        let serial = self.next_chunk_serial;
        self.next_chunk_serial += 1;

        let mut chunk = Chunk::new(base, base + reserved_size, self.grain_size, reserve_pages, serial);

        // Commit and hand over exactly one header-reserve grain to the CBS
        // block pool -- just enough node capacity for the client-range
        // insert below. The rest of the header reserve, `[1, reserve_pages)`,
        // is left free in the bitmap: it is the chunk's standing supply for
        // future `steal_reserve_page` calls, which is how `cbs_pool` and
        // `control` grow from here on (including on *this* chunk). Seeding
        // the whole reserve up front would permanently exhaust it -- a
        // freshly created chunk would never again have a free reserve page
        // for `find_free_reserve_page` to find.
        if reserve_pages > 0 {
            let addr = chunk.page_index_base(0);
            self.class.commit(addr, self.grain_size)?;
            self.committed += self.grain_size;
            chunk.mark_allocated(0, 1);
            self.cbs_pool.extend(self.grain_size);
        }

        let client_range = chunk.client_range();
        self.chunks.insert(chunk);

        if !client_range.is_empty() {
            self.free_land
                .insert(client_range, base, &mut self.cbs_pool)
                .map_err(|_| ArenaError::Fail)?;
        }

        Ok(base)
    }

    /// `arenaExtendCBSBlockPool`: steals one header-reserve grain from an
    /// existing chunk (or creates a new chunk if none has room) and feeds
    /// it to the CBS block pool.
    fn extend_cbs_block_pool(&mut self) -> ArenaResult<()> {
        if let Some((_addr, grain_size)) = self.steal_reserve_page()? {
            self.cbs_pool.extend(grain_size);
            return Ok(());
        }
        let _ = self.create_chunk(self.default_growth_size())?;
        self.steal_reserve_page()?
            .map(|(_, grain_size)| self.cbs_pool.extend(grain_size))
            .ok_or(ArenaError::Resource)
    }

    fn extend_control_pool(&mut self) -> ArenaResult<()> {
        if let Some((addr, _)) = self.steal_reserve_page()? {
            let chunk_base = self.chunks.find_containing(addr).map(Chunk::base).expect("stolen page must belong to a chunk");
            return self.control.extend(Range::new(addr, addr + self.grain_size), chunk_base).map_err(|_| ArenaError::Fail);
        }
        let base = self.create_chunk(self.default_growth_size())?;
        let (addr, _) = self.steal_reserve_page()?.ok_or(ArenaError::Resource)?;
        self.control.extend(Range::new(addr, addr + self.grain_size), base).map_err(|_| ArenaError::Fail)
    }

    fn steal_reserve_page(&mut self) -> ArenaResult<Option<(Addr, Size)>> {
        let grain_size = self.grain_size;
        for chunk in self.chunks.iter_mut() {
            if let Some(index) = chunk.find_free_reserve_page() {
                chunk.mark_allocated(index, 1);
                let addr = chunk.page_index_base(index);
                self.class.commit(addr, grain_size)?;
                self.committed += grain_size;
                return Ok(Some((addr, grain_size)));
            }
        }
        Ok(None)
    }

    fn default_growth_size(&self) -> Size {
        (self.grain_size * (DEFAULT_RESERVE_PAGES as Size + 1)).max(self.class.page_size())
    }

    /// Allocates `size` bytes on behalf of `pool`, preferring zones in
    /// `zones` and steering away from `avoid` (an empty or universal
    /// `zones` means "no preference"). `high` requests the highest-address
    /// fit instead of the lowest, as pools that grow downward do.
    pub fn alloc(&mut self, size: Size, align: Align, pool: PoolId, zones: ZoneSet, avoid: ZoneSet, high: bool) -> ArenaResult<Addr> {
        assert!(size > 0);
        let size = range::align_up(size, self.grain_size);
        let align = align.max(self.grain_size);

        if self.committed + size > self.commit_limit {
            return Err(ArenaError::CommitLimit);
        }

        let base = self.alloc_policy(size, align, zones, avoid, high)?;

        let chunk = self.chunks.find_containing_mut(base).expect("allocated range must belong to a chunk");
        let base_index = chunk.index_of_addr(base);
        let count = size / self.grain_size;
        chunk.mark_allocated(base_index, count);
        chunk.claim_tract(base_index, pool);

        self.class.commit(base, size)?;
        self.committed += size;

        Ok(base)
    }

    /// The five-plan policy from arena.c's `arenaAllocPolicy`, in the
    /// original's exact order -- spec.md §9 explicitly asks a rewrite not to
    /// silently "fix" this ordering, in particular the relationship between
    /// Plan C and Plans D/E:
    ///
    /// - Plan A: satisfy the request from already-free memory, restricted
    ///   to the caller's preferred zones minus `avoid`.
    /// - Plan B: satisfy it from free memory in zones no other allocation
    ///   currently occupies either, still minus `avoid` (avoids future
    ///   blending without being picky about which specific zones).
    /// - Plan C: ask the class to grow the arena, then retry Plans A and B
    ///   (in that order) against the newly available address space.
    /// - Plan D: try every zone except `avoid`, accepting zone blending.
    /// - Plan E (last resort): try every zone, ignoring `avoid` entirely.
    fn alloc_policy(&mut self, size: Size, align: Align, zones: ZoneSet, avoid: ZoneSet, high: bool) -> ArenaResult<Addr> {
        let zones = if zones == 0 { ZONE_SET_UNIV } else { zones };

        let plan_a = zones & !avoid;
        if plan_a != 0 {
            if let Some(addr) = self.try_find(size, align, plan_a, high)? {
                return Ok(addr);
            }
        }

        let plan_b = (plan_a | !self.zones_in_use()) & !avoid;
        if plan_b != 0 {
            if let Some(addr) = self.try_find(size, align, plan_b, high)? {
                return Ok(addr);
            }
        }

        if self.class.can_grow() {
            self.create_chunk(size.max(self.default_growth_size()))?;

            if plan_a != 0 {
                if let Some(addr) = self.try_find(size, align, plan_a, high)? {
                    return Ok(addr);
                }
            }
            if plan_b != 0 {
                if let Some(addr) = self.try_find(size, align, plan_b, high)? {
                    return Ok(addr);
                }
            }
        }

        let plan_d = ZONE_SET_UNIV & !avoid;
        if plan_d != 0 {
            if let Some(addr) = self.try_find(size, align, plan_d, high)? {
                return Ok(addr);
            }
        }

        if let Some(addr) = self.try_find(size, align, ZONE_SET_UNIV, high)? {
            return Ok(addr);
        }

        Err(ArenaError::Resource)
    }

    /// Searches the free land for a fit, transparently extending the CBS
    /// block pool and retrying if the land ran out of node storage.
    fn try_find(&mut self, size: Size, align: Align, zones: ZoneSet, high: bool) -> ArenaResult<Option<Addr>> {
        loop {
            match self
                .free_land
                .find_in_zones(size, zones, self.zone_shift, align, high, &mut self.cbs_pool)
            {
                Ok(found) => return Ok(found.map(|(range, _)| range.base())),
                Err(_limit) => self.extend_cbs_block_pool()?,
            }
        }
    }

    /// The set of zones any currently allocated tract occupies. Used by
    /// Plan B to prefer zones nothing else is using yet (a simplification
    /// of arena.c's per-pool zone blacklist: we track it for the arena as
    /// a whole rather than per requesting pool).
    fn zones_in_use(&self) -> ZoneSet {
        let mut used = 0u64;
        for chunk in self.chunks.iter() {
            let client = chunk.client_range();
            if client.is_empty() {
                continue;
            }
            // Conservatively: anything not currently free counts as "in
            // use". We approximate by subtracting the free land's zone
            // coverage for this chunk from the chunk's own zone coverage.
            used |= range::zone_set_of_range(self.zone_shift, client.base(), client.limit());
        }
        let mut free = 0u64;
        for range in self.free_land.iter() {
            free |= range::zone_set_of_range(self.zone_shift, range.base(), range.limit());
        }
        used & !free
    }

    /// Frees a previously allocated range back to the arena (arena.c's
    /// `ArenaFree`).
    pub fn free(&mut self, base: Addr, size: Size) -> ArenaResult<()> {
        let size = range::align_up(size, self.grain_size);
        let chunk_base = self
            .chunks
            .find_containing(base)
            .map(Chunk::base)
            .ok_or(ArenaError::Fail)?;

        {
            let chunk = self.chunks.get_mut(chunk_base).expect("chunk vanished");
            let base_index = chunk.index_of_addr(base);
            let count = size / self.grain_size;
            chunk.release_tract(base_index);
            chunk.mark_free(base_index, count);
        }

        loop {
            match self.free_land.insert(Range::new(base, base + size), chunk_base, &mut self.cbs_pool) {
                Ok(_) => break,
                Err(_limit) => self.extend_cbs_block_pool()?,
            }
        }

        self.spare_committed += size;
        if self.spare_committed > self.spare_commit_limit {
            let excess = self.spare_committed - self.spare_commit_limit;
            self.purge_spare(excess);
        }

        Ok(())
    }

    /// `ArenaHasAddr`: whether `addr` falls within any chunk this arena
    /// manages, regardless of whether it's currently allocated.
    pub fn has_addr(&mut self, addr: Addr) -> bool {
        if let Some(base) = self.last_chunk.base {
            if let Some(chunk) = self.chunks.get(base) {
                if chunk.contains_addr(addr) {
                    return true;
                }
            }
        }

        match self.chunks.find_containing(addr) {
            Some(chunk) => {
                self.last_chunk.base = Some(chunk.base());
                true
            }
            None => false,
        }
    }

    /// `ArenaAddrObject`: finds the pool owning the tract at `addr`'s base
    /// grain, via a caller-supplied callback that maps a tract's opaque
    /// payload word back to an object address (the arena itself has no
    /// notion of object layout within a tract).
    pub fn addr_object(&mut self, addr: Addr, locate: impl FnOnce(PoolId, usize, Addr) -> ArenaResult<Addr>) -> ArenaResult<Addr> {
        let chunk = self.chunks.find_containing_mut(addr).ok_or(ArenaError::Fail)?;
        let index = chunk.index_of_addr(addr);
        let base_index = {
            let mut i = index;
            loop {
                if chunk.tract_at(i).is_some() || i == 0 {
                    break i;
                }
                i -= 1;
            }
        };
        let tract = chunk.tract_at(base_index).ok_or(ArenaError::Fail)?;
        locate(tract.pool(), tract.p(), addr)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Allocates from the control pool: the arena's own bookkeeping
    /// memory, never visible to clients (arena.c's `ControlAlloc`).
    /// Extends the control pool from a chunk's header reserve on demand.
    pub fn control_alloc(&mut self, size: Size, align: Align) -> ArenaResult<Addr> {
        loop {
            match self.control.alloc(size, align) {
                Ok(Some(addr)) => return Ok(addr),
                Ok(None) | Err(_) => self.extend_control_pool()?,
            }
        }
    }

    /// `ControlFree`: returns a control-pool allocation. `chunk_base`
    /// identifies the chunk the memory came from (the control pool keys
    /// its coalescing on it the same way the free land does).
    pub fn control_free(&mut self, base: Addr, size: Size, chunk_base: Addr) -> ArenaResult<()> {
        loop {
            match self.control.free(base, size, chunk_base) {
                Ok(()) => return Ok(()),
                Err(_limit) => self.extend_control_pool()?,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::client_class::ClientArenaClass;
    use crate::range::ZONE_SET_EMPTY;
    use crate::vm_class::VmArenaClass;

    fn small_config() -> ArenaConfig {
        let mut config = ArenaConfig::new(4096, 20, 4096 * 64);
        config.commit_limit = None;
        config
    }

    #[test]
    fn create_and_destroy_empty_arena() {
        let arena = Arena::create(Box::new(VmArenaClass::new()), small_config()).unwrap();
        assert_eq!(arena.chunk_count(), 1);
        arena.destroy();
    }

    #[test]
    fn alloc_free_round_trip() {
        let mut arena = Arena::create(Box::new(VmArenaClass::new()), small_config()).unwrap();
        let pool = PoolId::new(1).unwrap();

        let addr = arena.alloc(4096, 4096, pool, ZONE_SET_UNIV, ZONE_SET_EMPTY, false).unwrap();
        assert!(arena.has_addr(addr));
        assert_eq!(arena.committed() % 4096, 0);

        arena.free(addr, 4096).unwrap();
        arena.destroy();
    }

    #[test]
    fn many_interleaved_allocs_and_frees() {
        let mut arena = Arena::create(Box::new(VmArenaClass::new()), small_config()).unwrap();
        let pool = PoolId::new(1).unwrap();

        let mut addrs = Vec::new();
        for round in 0..8 {
            for _ in 0..8 {
                addrs.push(arena.alloc(4096, 4096, pool, ZONE_SET_UNIV, ZONE_SET_EMPTY, false).unwrap());
            }
            if round % 2 == 1 {
                for addr in addrs.drain(..) {
                    arena.free(addr, 4096).unwrap();
                }
            }
        }
        for addr in addrs {
            arena.free(addr, 4096).unwrap();
        }
        arena.destroy();
    }

    #[test]
    fn commit_limit_rejects_oversized_request() {
        let mut config = small_config();
        config.commit_limit = Some(8192);
        let mut arena = Arena::create(Box::new(VmArenaClass::new()), config).unwrap();
        let pool = PoolId::new(1).unwrap();

        let result = arena.alloc(4096 * 16, 4096, pool, ZONE_SET_UNIV, ZONE_SET_EMPTY, false);
        assert_eq!(result, Err(ArenaError::CommitLimit));
        arena.destroy();
    }

    #[test]
    fn client_arena_uses_caller_supplied_memory() {
        // Use a heap-backed stand-in for the "already-mapped" region a
        // real caller would provide (e.g. a static buffer or a mapping it
        // owns); leaked here since the arena never releases client memory.
        let grain_size = 4096;
        let pages = 16;
        let layout = std::alloc::Layout::from_size_align(grain_size * pages, grain_size).unwrap();
        let base = unsafe { std::alloc::alloc_zeroed(layout) } as usize;

        let config = ArenaConfig::new(grain_size, 20, grain_size * pages);
        let mut arena = Arena::create_client(Box::new(ClientArenaClass::new(grain_size)), config, base, grain_size * pages).unwrap();

        let pool = PoolId::new(1).unwrap();
        let addr = arena.alloc(grain_size, grain_size, pool, ZONE_SET_UNIV, ZONE_SET_EMPTY, false).unwrap();
        assert!(arena.has_addr(addr));

        arena.free(addr, grain_size).unwrap();
        arena.destroy();

        unsafe { std::alloc::dealloc(base as *mut u8, layout) };
    }
}
