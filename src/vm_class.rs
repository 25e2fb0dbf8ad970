//! `VmArenaClass`: the ordinary arena back-end, which reserves address
//! space directly from the operating system via `mmap` and commits pages
//! on demand (arena.c's VM arena class).
//!
//! Grounded on `map.rs`'s `reserve_region`/`release_region`/
//! `allocate_region` (same page-aligned pre/postconditions, same
//! reserve-then-commit split) but calling `libc` directly rather than
//! through a C shim: `slitter`'s `c/map.c` glue isn't available to this
//! crate (see DESIGN.md, "Dependency changes"), and `libc` is the crate
//! `theseus-os-Theseus` reaches for to make the same raw `mmap`/`mprotect`
//! calls.
#[cfg(any(all(test, feature = "check_contracts_in_tests"), feature = "check_contracts"))]
use contracts::*;
#[cfg(not(any(all(test, feature = "check_contracts_in_tests"), feature = "check_contracts")))]
use disabled_contracts::*;

use std::ffi::c_void;
use std::ptr;

use crate::arena_class::ArenaClass;
use crate::error::{ArenaError, ArenaResult};
use crate::range::{Addr, Size};

fn os_page_size() -> Size {
    let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    assert!(ret > 0, "could not determine page size");
    ret as Size
}

fn errno_to_arena_error(context: &str) -> ArenaError {
    let errno = std::io::Error::last_os_error();
    log::error!("vm arena class: {} failed: {}", context, errno);
    match errno.raw_os_error() {
        Some(libc::ENOMEM) => ArenaError::Memory,
        _ => ArenaError::Resource,
    }
}

#[derive(Debug)]
pub struct VmArenaClass {
    page_size: Size,
}

impl VmArenaClass {
    pub fn new() -> Self {
        VmArenaClass {
            page_size: os_page_size(),
        }
    }
}

impl Default for VmArenaClass {
    fn default() -> Self {
        Self::new()
    }
}

#[contract_trait]
impl ArenaClass for VmArenaClass {
    fn page_size(&self) -> Size {
        self.page_size
    }

    fn reserve(&self, desired_size: Size) -> ArenaResult<(Addr, Size)> {
        assert_eq!(desired_size % self.page_size, 0);
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                desired_size,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(errno_to_arena_error("mmap reserve"));
        }

        Ok((ptr as Addr, desired_size))
    }

    fn release(&self, base: Addr, size: Size) -> ArenaResult<()> {
        if size == 0 {
            return Ok(());
        }
        assert_eq!(size % self.page_size, 0);

        let ret = unsafe { libc::munmap(base as *mut c_void, size) };
        if ret != 0 {
            return Err(errno_to_arena_error("munmap release"));
        }
        Ok(())
    }

    fn commit(&self, base: Addr, size: Size) -> ArenaResult<()> {
        if size == 0 {
            return Ok(());
        }
        assert_eq!(size % self.page_size, 0);

        let ret = unsafe { libc::mprotect(base as *mut c_void, size, libc::PROT_READ | libc::PROT_WRITE) };
        if ret != 0 {
            return Err(errno_to_arena_error("mprotect commit"));
        }
        Ok(())
    }

    fn purge_spare(&self, base: Addr, size: Size) -> ArenaResult<()> {
        if size == 0 {
            return Ok(());
        }
        assert_eq!(size % self.page_size, 0);

        let protect = unsafe { libc::mprotect(base as *mut c_void, size, libc::PROT_NONE) };
        if protect != 0 {
            return Err(errno_to_arena_error("mprotect purge_spare"));
        }

        // Best-effort: tell the OS it can reclaim the physical pages behind
        // this range. A failure here doesn't make the range unusable, just
        // slower to reclaim, so we log rather than propagate it.
        let advise = unsafe { libc::madvise(base as *mut c_void, size, libc::MADV_DONTNEED) };
        if advise != 0 {
            log::warn!("vm arena class: madvise(MADV_DONTNEED) failed: {}", std::io::Error::last_os_error());
        }

        Ok(())
    }

    fn grow(&self, size: Size) -> ArenaResult<(Addr, Size)> {
        self.reserve(size)
    }

    fn can_grow(&self) -> bool {
        true
    }
}

#[test]
fn reserve_commit_release_round_trip() {
    let class = VmArenaClass::new();
    let page = class.page_size();
    let (base, size) = class.reserve(page * 4).expect("reserve should succeed");
    assert_eq!(size, page * 4);

    class.commit(base, page * 2).expect("commit should succeed");
    unsafe {
        std::ptr::write_bytes(base as *mut u8, 0xab, page);
    }

    class.purge_spare(base, page).expect("purge should succeed");
    class.release(base, size).expect("release should succeed");
}
