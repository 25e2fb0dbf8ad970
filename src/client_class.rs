//! `ClientArenaClass`: a back-end for an arena whose chunks are memory the
//! caller already owns and hands in directly, rather than address space
//! the arena reserves for itself (arena.c's client arena class).
//!
//! There is no `mmap` here at all: `reserve` always fails (a client arena
//! can only grow by the caller handing it another chunk through
//! `Arena::extend_with`, not by this class acquiring address space on its
//! own), and `release`/`commit`/`purge_spare` are the trivial stubs
//! arena.c calls `ArenaTrivCompact`/`ArenaNoPurgeSpare`: the memory's
//! lifetime is the caller's to manage. Grounded on `mapper.rs`'s shape (one
//! small `Debug`-only struct implementing the back-end trait) without a
//! `file_backed_mapper.rs`-style real transport, since there's nothing for
//! this class to transport.
#[cfg(any(all(test, feature = "check_contracts_in_tests"), feature = "check_contracts"))]
use contracts::*;
#[cfg(not(any(all(test, feature = "check_contracts_in_tests"), feature = "check_contracts")))]
use disabled_contracts::*;

use crate::arena_class::ArenaClass;
use crate::error::{ArenaError, ArenaResult};
use crate::range::{Addr, Size};

#[derive(Debug)]
pub struct ClientArenaClass {
    page_size: Size,
}

impl ClientArenaClass {
    /// `page_size` is the alignment the caller's chunks are guaranteed to
    /// respect; it need not match the OS page size.
    pub fn new(page_size: Size) -> Self {
        assert!(page_size > 0 && page_size & (page_size - 1) == 0);
        ClientArenaClass { page_size }
    }
}

#[contract_trait]
impl ArenaClass for ClientArenaClass {
    fn page_size(&self) -> Size {
        self.page_size
    }

    fn reserve(&self, _desired_size: Size) -> ArenaResult<(Addr, Size)> {
        Err(ArenaError::Unimpl)
    }

    fn release(&self, _base: Addr, _size: Size) -> ArenaResult<()> {
        Ok(())
    }
}

#[test]
fn reserve_is_unimplemented() {
    let class = ClientArenaClass::new(4096);
    assert_eq!(class.reserve(4096), Err(ArenaError::Unimpl));
}

#[test]
fn release_is_a_no_op() {
    let class = ClientArenaClass::new(4096);
    assert!(class.release(0x1000, 4096).is_ok());
}
