//! Bump arenas with three lifetime scopes.
//!
//! The engine owns three of these: an app arena (process lifetime), a frame
//! arena (reset at the top of every frame), and a swapchain arena (reset on
//! every swapchain recreation). Storage is chained fixed blocks; exhausting
//! a block chains a new one. Allocation failure after startup is non-fatal:
//! the caller gets a zero-length slice and carries on (ZII). Only the
//! initial reserve can fail.

use std::cell::UnsafeCell;

/// Every allocation is aligned to this. Covers the module state block and
/// any Pod slice the engine stages through an arena.
pub const ARENA_ALIGN: usize = 16;

const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

struct Block {
    buf: Box<[u8]>,
    used: usize,
}

impl Block {
    fn with_capacity(cap: usize) -> Option<Block> {
        let mut v: Vec<u8> = Vec::new();
        v.try_reserve_exact(cap).ok()?;
        v.resize(cap, 0);
        Some(Block {
            buf: v.into_boxed_slice(),
            used: 0,
        })
    }
}

/// A chained-block bump arena.
///
/// Not `Sync`: arenas are lane-0-owned. Interior mutability lets callers
/// allocate through a shared reference; `reset` requires exclusive access,
/// which ends all outstanding borrows.
pub struct Arena {
    blocks: UnsafeCell<Vec<Block>>,
    block_size: usize,
}

impl Arena {
    /// Reserve the initial block. This is the only allocation whose failure
    /// is surfaced; everything later degrades to the ZII stub.
    pub fn new(initial: usize) -> Result<Arena, String> {
        let cap = initial.max(DEFAULT_BLOCK_SIZE);
        let first = Block::with_capacity(cap)
            .ok_or_else(|| format!("arena: initial reserve of {} bytes failed", cap))?;
        Ok(Arena {
            blocks: UnsafeCell::new(vec![first]),
            block_size: DEFAULT_BLOCK_SIZE,
        })
    }

    /// Allocate `len` zeroed bytes. Returns an empty slice if the arena
    /// cannot grow.
    pub fn alloc_bytes(&self, len: usize) -> &mut [u8] {
        if len == 0 {
            return &mut [];
        }

        // SAFETY: the arena is not Sync, every allocation hands out a
        // disjoint region of a heap block whose address is stable even when
        // the block list grows, and reset() takes &mut self which ends all
        // outstanding borrows first.
        let blocks = unsafe { &mut *self.blocks.get() };

        let need_new = match blocks.last() {
            Some(block) => {
                let cursor = align_up(block.used, ARENA_ALIGN);
                cursor + len > block.buf.len()
            }
            None => true,
        };

        if need_new {
            let cap = self.block_size.max(len + ARENA_ALIGN);
            match Block::with_capacity(cap) {
                Some(block) => blocks.push(block),
                None => {
                    log::warn!("arena: failed to chain a {} byte block", cap);
                    return &mut [];
                }
            }
        }

        let block = blocks.last_mut().unwrap();
        let cursor = align_up(block.used, ARENA_ALIGN);
        block.used = cursor + len;

        let region = &mut block.buf[cursor..cursor + len];
        region.fill(0);
        // SAFETY: region points into a boxed slice that outlives &self and
        // is never handed out twice before a reset.
        unsafe { std::slice::from_raw_parts_mut(region.as_mut_ptr(), len) }
    }

    /// Drop all chained blocks and rewind the first. Requires exclusive
    /// access, so no allocation handed out earlier can still be alive.
    pub fn reset(&mut self) {
        let blocks = self.blocks.get_mut();
        blocks.truncate(1);
        if let Some(first) = blocks.first_mut() {
            first.used = 0;
        }
    }

    /// Total bytes handed out since the last reset.
    pub fn allocated(&self) -> usize {
        // SAFETY: read-only walk; not Sync, so no concurrent mutation.
        let blocks = unsafe { &*self.blocks.get() };
        blocks.iter().map(|b| b.used).sum()
    }
}

fn align_up(v: usize, align: usize) -> usize {
    (v + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_zeroed_and_aligned() {
        let arena = Arena::new(4096).unwrap();
        let a = arena.alloc_bytes(100);
        assert_eq!(a.len(), 100);
        assert!(a.iter().all(|&b| b == 0));
        assert_eq!(a.as_ptr() as usize % ARENA_ALIGN, 0);

        a[0] = 0xAB;
        let b = arena.alloc_bytes(100);
        assert_eq!(b.as_ptr() as usize % ARENA_ALIGN, 0);
        assert!(b.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_allocations_are_disjoint() {
        let arena = Arena::new(4096).unwrap();
        let a = arena.alloc_bytes(32);
        let b = arena.alloc_bytes(32);
        let (ap, bp) = (a.as_ptr() as usize, b.as_ptr() as usize);
        assert!(ap + 32 <= bp || bp + 32 <= ap);
    }

    #[test]
    fn test_chains_past_first_block() {
        let arena = Arena::new(1024).unwrap();
        // Larger than any single block boundary we started with.
        let big = arena.alloc_bytes(2 * 1024 * 1024);
        assert_eq!(big.len(), 2 * 1024 * 1024);
    }

    #[test]
    fn test_reset_rewinds() {
        let mut arena = Arena::new(4096).unwrap();
        arena.alloc_bytes(1000);
        arena.alloc_bytes(1000);
        assert!(arena.allocated() >= 2000);
        arena.reset();
        assert_eq!(arena.allocated(), 0);
        let a = arena.alloc_bytes(64);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_zero_len() {
        let arena = Arena::new(4096).unwrap();
        assert!(arena.alloc_bytes(0).is_empty());
    }
}
