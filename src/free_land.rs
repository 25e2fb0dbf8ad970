//! The free land: a zoned CBS (Coalescing Block Set), the arena's index of
//! currently-free address ranges.
//!
//! Invariants maintained here:
//! - (F1) adjacent free ranges within the same chunk are always coalesced;
//! - (F2) no free range crosses a chunk boundary (enforced by only ever
//!   coalescing entries tagged with the same `chunk_base`).
//!
//! Node storage is a bootstrap problem: it's accounted against a
//! [`CbsBlockPool`] capacity counter rather than literally placed in
//! arena-owned pages; see DESIGN.md, "Free-land node storage placement",
//! for why. `insert`/`delete`/`find_in_zones` all return
//! [`crate::error::Limit`] exactly when the real CBS would have needed a
//! fresh tree node and none was available, preserving the bootstrap
//! control flow this design relies on.
//!
//! Grounded on `debug_arange_map.rs`'s coalescing `reserve_range`/
//! `release_range` (BTreeMap-keyed, predecessor-lookup, merge-on-insert /
//! split-on-release), generalized here from one whole-process range to a
//! multiset of zone-tagged ranges.
use std::collections::BTreeMap;

use crate::cbs_pool::CbsBlockPool;
use crate::error::LandResult;
use crate::range::{self, Addr, Align, Range, Size, ZoneSet, ZONE_SET_UNIV};

#[derive(Debug, Clone, Copy)]
struct Entry {
    limit: Addr,
    chunk_base: Addr,
}

#[derive(Default)]
pub struct FreeLand {
    ranges: BTreeMap<Addr, Entry>,
}

impl FreeLand {
    pub fn new() -> Self {
        FreeLand {
            ranges: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Iterates free ranges in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = Range> + '_ {
        self.ranges.iter().map(|(&base, e)| Range::new(base, e.limit))
    }

    fn entry_range(base: Addr, entry: &Entry) -> Range {
        Range::new(base, entry.limit)
    }

    /// Finds the entry whose `[base, limit)` contains `addr`, if any.
    fn containing(&self, addr: Addr) -> Option<(Addr, Entry)> {
        self.ranges
            .range(..=addr)
            .next_back()
            .map(|(&b, &e)| (b, e))
            .filter(|(b, e)| Self::entry_range(*b, e).contains_addr(addr))
    }

    fn left_neighbor(&self, base: Addr) -> Option<(Addr, Entry)> {
        self.ranges.range(..base).next_back().map(|(&b, &e)| (b, e))
    }

    /// Inserts `range`, tagged as belonging to `chunk_base`. Coalesces with
    /// an adjacent free range if (and only if) that neighbor belongs to the
    /// same chunk. Returns the resulting (possibly coalesced) range.
    pub fn insert(
        &mut self,
        range: Range,
        chunk_base: Addr,
        cbs_pool: &mut CbsBlockPool,
    ) -> LandResult<Range> {
        assert!(!range.is_empty());

        let left = self
            .left_neighbor(range.base())
            .filter(|(_, e)| e.limit == range.base() && e.chunk_base == chunk_base)
            .map(|(b, _)| b);
        let right = self
            .ranges
            .get(&range.limit())
            .filter(|e| e.chunk_base == chunk_base)
            .map(|&e| (range.limit(), e));

        match (left, right) {
            (Some(left_base), Some((right_base, right_entry))) => {
                // Coalesce on both sides: two entries collapse into one.
                cbs_pool.release(1);
                let new_limit = right_entry.limit;
                self.ranges.remove(&right_base);
                let entry = self.ranges.get_mut(&left_base).expect("left neighbor vanished");
                entry.limit = new_limit;
                Ok(Range::new(left_base, new_limit))
            }
            (Some(left_base), None) => {
                // Coalesce with the left neighbor only: entry count unchanged.
                let entry = self.ranges.get_mut(&left_base).expect("left neighbor vanished");
                entry.limit = range.limit();
                Ok(Range::new(left_base, range.limit()))
            }
            (None, Some((right_base, right_entry))) => {
                // Coalesce with the right neighbor only: remove + reinsert
                // under a new key, entry count unchanged.
                self.ranges.remove(&right_base);
                self.ranges.insert(
                    range.base(),
                    Entry {
                        limit: right_entry.limit,
                        chunk_base,
                    },
                );
                Ok(Range::new(range.base(), right_entry.limit))
            }
            (None, None) => {
                // Brand new entry: needs a fresh node.
                cbs_pool.try_reserve(1)?;
                self.ranges.insert(
                    range.base(),
                    Entry {
                        limit: range.limit(),
                        chunk_base,
                    },
                );
                Ok(range)
            }
        }
    }

    /// Removes the portion `[removed.base, removed.limit)` from the
    /// existing entry at `entry_base`, splitting or shrinking it as
    /// necessary. Returns the full range the entry covered before removal.
    fn split_remove(
        &mut self,
        entry_base: Addr,
        removed: Range,
        cbs_pool: &mut CbsBlockPool,
    ) -> LandResult<Range> {
        let entry = *self.ranges.get(&entry_base).expect("entry must exist");
        let old_range = Self::entry_range(entry_base, &entry);

        assert!(old_range.contains_range(&removed), "range not covered by a single free range");

        let trims_left = removed.base() == old_range.base();
        let trims_right = removed.limit() == old_range.limit();

        if trims_left && trims_right {
            // Exact match: the whole entry disappears.
            self.ranges.remove(&entry_base);
            cbs_pool.release(1);
        } else if trims_left {
            // Shrink from the left: re-key under the new base.
            self.ranges.remove(&entry_base);
            self.ranges.insert(
                removed.limit(),
                Entry {
                    limit: old_range.limit(),
                    chunk_base: entry.chunk_base,
                },
            );
        } else if trims_right {
            // Shrink from the right: key is unchanged.
            self.ranges.get_mut(&entry_base).unwrap().limit = removed.base();
        } else {
            // Interior removal: split into two entries. Needs a fresh node.
            cbs_pool.try_reserve(1)?;
            self.ranges.get_mut(&entry_base).unwrap().limit = removed.base();
            self.ranges.insert(
                removed.limit(),
                Entry {
                    limit: old_range.limit(),
                    chunk_base: entry.chunk_base,
                },
            );
        }

        Ok(old_range)
    }

    /// Removes `range`, which must be entirely covered by one existing free
    /// range. Returns the pre-existing range that contained it.
    pub fn delete(&mut self, range: Range, cbs_pool: &mut CbsBlockPool) -> LandResult<Range> {
        assert!(!range.is_empty());
        let (entry_base, _) = self
            .containing(range.base())
            .filter(|(b, e)| Self::entry_range(*b, e).contains_range(&range))
            .expect("ArenaFreeLand::delete: range must be covered by a single free range");

        self.split_remove(entry_base, range, cbs_pool)
    }

    /// Removes exactly a whole chunk's free range. Per DESIGN.md's Open
    /// Questions, we keep the original restriction as a hard precondition:
    /// this may only be called when `range` matches an existing free-land
    /// entry exactly (no coalesced neighbors to worry about splitting).
    pub fn delete_whole_chunk_range(&mut self, range: Range, cbs_pool: &mut CbsBlockPool) -> Range {
        let entry = self
            .ranges
            .get(&range.base())
            .copied()
            .expect("delete_whole_chunk_range: no free range at chunk base");
        assert_eq!(entry.limit, range.limit(), "delete_whole_chunk_range: range is not a whole free range");

        self.ranges.remove(&range.base());
        cbs_pool.release(1);
        range
    }

    /// Within `range`, finds the smallest (`high == false`) or largest
    /// (`high == true`) aligned start address for a block of `size` bytes
    /// whose every address's zone lies in `zones`.
    fn candidate_in(range: Range, zones: ZoneSet, zone_shift: u32, align: Align, size: Size, high: bool) -> Option<Range> {
        if range.size() < size {
            return None;
        }

        let subranges = eligible_subranges(range, zones, zone_shift);
        if high {
            subranges
                .into_iter()
                .rev()
                .find_map(|sub| largest_fit(sub, size, align))
        } else {
            subranges.into_iter().find_map(|sub| smallest_fit(sub, size, align))
        }
    }

    /// Finds an aligned range of `size` bytes whose every address lies in
    /// `zones`, removes it from the land, and returns `(found_range,
    /// containing_range)`. `high` selects the highest-address fit instead
    /// of the lowest. Returns `Ok(None)` if no such range exists (never a
    /// `Limit`: "not found" and "out of node storage" are distinct
    /// outcomes).
    pub fn find_in_zones(
        &mut self,
        size: Size,
        zones: ZoneSet,
        zone_shift: u32,
        align: Align,
        high: bool,
        cbs_pool: &mut CbsBlockPool,
    ) -> LandResult<Option<(Range, Range)>> {
        assert!(size > 0);
        if zones == 0 {
            return Ok(None);
        }

        let candidate = if high {
            self.ranges.iter().rev().find_map(|(&base, e)| {
                Self::candidate_in(Self::entry_range(base, e), zones, zone_shift, align, size, true).map(|c| (base, c))
            })
        } else {
            self.ranges.iter().find_map(|(&base, e)| {
                Self::candidate_in(Self::entry_range(base, e), zones, zone_shift, align, size, false).map(|c| (base, c))
            })
        };

        let (entry_base, found) = match candidate {
            Some(x) => x,
            None => return Ok(None),
        };

        let old_range = self.split_remove(entry_base, found, cbs_pool)?;
        Ok(Some((found, old_range)))
    }
}

/// Decomposes `range` into maximal contiguous sub-ranges whose addresses all
/// lie in `zones`. Since every address within a `1 << zone_shift`-aligned
/// stride block shares one zone, this only needs to walk
/// block boundaries rather than individual addresses.
fn eligible_subranges(range: Range, zones: ZoneSet, zone_shift: u32) -> Vec<Range> {
    if zones == ZONE_SET_UNIV {
        return vec![range];
    }

    let stride: Size = 1usize << zone_shift;
    let mut result = Vec::new();
    let mut run_start: Option<Addr> = None;

    let mut block = range::align_down(range.base(), stride);
    while block < range.limit() {
        let zone_eligible = zones & range::zone_bit(range::zone_of(block, zone_shift)) != 0;
        let block_start = block.max(range.base());

        if zone_eligible {
            if run_start.is_none() {
                run_start = Some(block_start);
            }
        } else if let Some(start) = run_start.take() {
            result.push(Range::new(start, block_start));
        }

        block += stride;
    }

    if let Some(start) = run_start {
        result.push(Range::new(start, range.limit()));
    }

    result
}

fn smallest_fit(range: Range, size: Size, align: Align) -> Option<Range> {
    let start = range::align_up(range.base(), align);
    if start < range.base() || start + size > range.limit() {
        return None;
    }
    Some(Range::new(start, start + size))
}

fn largest_fit(range: Range, size: Size, align: Align) -> Option<Range> {
    if range.size() < size {
        return None;
    }
    let start = range::align_down(range.limit() - size, align);
    if start < range.base() {
        return None;
    }
    Some(Range::new(start, start + size))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Limit;
    use crate::range::ZONE_SET_EMPTY;

    fn pool_with_capacity(n: usize) -> CbsBlockPool {
        let mut pool = CbsBlockPool::new();
        pool.extend(n * 48);
        pool
    }

    #[test]
    fn insert_coalesces_within_chunk() {
        let mut land = FreeLand::new();
        let mut pool = pool_with_capacity(8);

        land.insert(Range::new(0x1000, 0x2000), 0x1000, &mut pool).unwrap();
        land.insert(Range::new(0x2000, 0x3000), 0x1000, &mut pool).unwrap();
        assert_eq!(land.len(), 1);
        assert_eq!(land.iter().next().unwrap(), Range::new(0x1000, 0x3000));

        land.insert(Range::new(0x3000, 0x4000), 0x1000, &mut pool).unwrap();
        assert_eq!(land.len(), 1);
        assert_eq!(land.iter().next().unwrap(), Range::new(0x1000, 0x4000));
    }

    #[test]
    fn insert_does_not_coalesce_across_chunks() {
        let mut land = FreeLand::new();
        let mut pool = pool_with_capacity(8);

        land.insert(Range::new(0x1000, 0x2000), 0x1000, &mut pool).unwrap();
        land.insert(Range::new(0x2000, 0x3000), 0x2000, &mut pool).unwrap();
        assert_eq!(land.len(), 2);
    }

    #[test]
    fn delete_splits_interior() {
        let mut land = FreeLand::new();
        let mut pool = pool_with_capacity(8);
        land.insert(Range::new(0x1000, 0x4000), 0x1000, &mut pool).unwrap();

        let old = land.delete(Range::new(0x2000, 0x3000), &mut pool).unwrap();
        assert_eq!(old, Range::new(0x1000, 0x4000));
        assert_eq!(land.len(), 2);

        let remaining: Vec<_> = land.iter().collect();
        assert_eq!(remaining, vec![Range::new(0x1000, 0x2000), Range::new(0x3000, 0x4000)]);
    }

    #[test]
    fn delete_exact_releases_node() {
        let mut land = FreeLand::new();
        let mut pool = pool_with_capacity(8);
        land.insert(Range::new(0x1000, 0x2000), 0x1000, &mut pool).unwrap();
        assert_eq!(pool.allocated(), 1);

        land.delete(Range::new(0x1000, 0x2000), &mut pool).unwrap();
        assert!(land.is_empty());
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn interior_delete_returns_limit_when_pool_exhausted() {
        let mut land = FreeLand::new();
        let mut pool = pool_with_capacity(1);
        land.insert(Range::new(0x1000, 0x4000), 0x1000, &mut pool).unwrap();
        assert_eq!(pool.available(), 0);

        let err = land.delete(Range::new(0x2000, 0x3000), &mut pool);
        assert_eq!(err, Err(Limit));
        // No mutation on failure: still one whole range.
        assert_eq!(land.len(), 1);
    }

    #[test]
    fn find_in_zones_univ_picks_lowest_and_highest() {
        let mut land = FreeLand::new();
        let mut pool = pool_with_capacity(8);
        land.insert(Range::new(0x1000, 0x5000), 0x1000, &mut pool).unwrap();

        let (found, old) = land
            .find_in_zones(0x1000, ZONE_SET_UNIV, 20, 0x1000, false, &mut pool)
            .unwrap()
            .unwrap();
        assert_eq!(found, Range::new(0x1000, 0x2000));
        assert_eq!(old, Range::new(0x1000, 0x5000));

        land.insert(found, 0x1000, &mut pool).unwrap();
        let (found_high, _) = land
            .find_in_zones(0x1000, ZONE_SET_UNIV, 20, 0x1000, true, &mut pool)
            .unwrap()
            .unwrap();
        assert_eq!(found_high, Range::new(0x4000, 0x5000));
    }

    #[test]
    fn find_in_zones_respects_zone_restriction() {
        let mut land = FreeLand::new();
        let mut pool = pool_with_capacity(8);
        // zone_shift = 12 -> one zone per 0x1000-byte block.
        land.insert(Range::new(0, 0x4000), 0, &mut pool).unwrap();

        let only_zone_2 = range::zone_bit(2);
        let (found, _) = land
            .find_in_zones(0x1000, only_zone_2, 12, 0x1000, false, &mut pool)
            .unwrap()
            .unwrap();
        assert_eq!(found, Range::new(0x2000, 0x3000));
    }

    #[test]
    fn find_in_zones_no_fit_returns_none_not_limit() {
        let mut land = FreeLand::new();
        let mut pool = pool_with_capacity(8);
        land.insert(Range::new(0x1000, 0x1800), 0x1000, &mut pool).unwrap();

        let result = land.find_in_zones(0x1000, ZONE_SET_UNIV, 20, 0x100, false, &mut pool).unwrap();
        assert!(result.is_none());
        assert_eq!(land.len(), 1);
    }

    #[test]
    fn zone_set_empty_never_matches() {
        let mut land = FreeLand::new();
        let mut pool = pool_with_capacity(8);
        land.insert(Range::new(0x1000, 0x5000), 0x1000, &mut pool).unwrap();
        assert!(land
            .find_in_zones(0x1000, ZONE_SET_EMPTY, 12, 0x1000, false, &mut pool)
            .unwrap()
            .is_none());
    }
}
