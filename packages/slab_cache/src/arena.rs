use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;
use std::rc::Rc;

use crate::Quota;

/// The smallest arena block size. Blocks below this leave too few buddy orders
/// to be worth splitting.
const SLAB_SIZE_MIN: usize = 64 * 1024;

/// A source of large, uniformly sized memory blocks.
///
/// Every block has the same power-of-two size and is allocated with alignment
/// equal to that size. This alignment is what the rest of the tier relies on:
/// masking the low bits off any pointer into a block yields the block base, and
/// the same holds for every power-of-two sub-block carved from it.
///
/// Blocks returned with [`unmap()`](Self::unmap) are cached for reuse and only
/// handed back to the system allocator when the arena is dropped. Fresh blocks
/// are charged against the arena's [`Quota`]; a refused charge surfaces as
/// `None` from [`map()`](Self::map).
#[derive(Debug)]
pub struct SlabArena {
    quota: Rc<Quota>,
    slab_size: usize,

    /// Every block this arena has ever mapped. The arena owns these allocations
    /// and frees them all on drop, whether or not they are currently in use.
    all: Vec<NonNull<u8>>,

    /// Blocks that have been unmapped and are available for reuse.
    free: Vec<NonNull<u8>>,
}

impl SlabArena {
    /// Creates an arena of `slab_size`-byte blocks drawing on `quota`.
    ///
    /// # Panics
    ///
    /// Panics if `slab_size` is not a power of two or is smaller than 64 KiB.
    #[must_use]
    pub fn new(quota: Rc<Quota>, slab_size: usize) -> Self {
        assert!(
            slab_size.is_power_of_two() && slab_size >= SLAB_SIZE_MIN,
            "arena slab size must be a power of two of at least {SLAB_SIZE_MIN} bytes, got {slab_size}"
        );

        Self {
            quota,
            slab_size,
            all: Vec::new(),
            free: Vec::new(),
        }
    }

    /// The size (and alignment) of every block this arena hands out.
    #[must_use]
    pub fn slab_size(&self) -> usize {
        self.slab_size
    }

    /// The quota this arena draws on.
    #[must_use]
    pub fn quota(&self) -> &Rc<Quota> {
        &self.quota
    }

    /// Bytes held in blocks that are currently mapped out.
    #[must_use]
    pub fn used(&self) -> usize {
        // Cannot underflow: every free block is also in `all`.
        self.all
            .len()
            .wrapping_sub(self.free.len())
            .wrapping_mul(self.slab_size)
    }

    /// Bytes held in blocks this arena has obtained from the system allocator,
    /// mapped out or not.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.all.len().wrapping_mul(self.slab_size)
    }

    /// Hands out one block, reusing a previously unmapped one when possible.
    ///
    /// Returns `None` when the quota refuses the charge or the system allocator
    /// fails; neither case has side effects.
    pub(crate) fn map(&mut self) -> Option<NonNull<u8>> {
        if let Some(block) = self.free.pop() {
            return Some(block);
        }

        if !self.quota.charge(self.slab_size) {
            return None;
        }

        let layout = self.block_layout();

        // SAFETY: the layout has non-zero size (at least SLAB_SIZE_MIN bytes).
        let raw = unsafe { alloc(layout) };

        let Some(block) = NonNull::new(raw) else {
            self.quota.release(self.slab_size);
            return None;
        };

        self.all.push(block);
        Some(block)
    }

    /// Returns a block previously handed out by [`map()`](Self::map).
    pub(crate) fn unmap(&mut self, block: NonNull<u8>) {
        debug_assert!(
            self.all.contains(&block),
            "block {block:p} does not belong to this arena"
        );
        debug_assert!(
            !self.free.contains(&block),
            "block {block:p} returned to the arena twice"
        );

        self.free.push(block);
    }

    fn block_layout(&self) -> Layout {
        Layout::from_size_align(self.slab_size, self.slab_size)
            .expect("a power-of-two size is always a valid layout with itself as alignment")
    }
}

impl Drop for SlabArena {
    fn drop(&mut self) {
        let layout = self.block_layout();

        for block in &self.all {
            // SAFETY: every pointer in `all` came from `alloc` with this exact
            // layout and is freed exactly once, here.
            unsafe { dealloc(block.as_ptr(), layout) };
        }

        self.quota.release(self.allocated());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena(limit: usize) -> SlabArena {
        SlabArena::new(Rc::new(Quota::new(limit)), SLAB_SIZE_MIN)
    }

    #[test]
    fn blocks_are_self_aligned() {
        let mut arena = arena(usize::MAX);

        let block = arena.map().unwrap();
        assert_eq!(block.as_ptr() as usize % SLAB_SIZE_MIN, 0);

        arena.unmap(block);
    }

    #[test]
    fn unmapped_blocks_are_reused() {
        let mut arena = arena(usize::MAX);

        let first = arena.map().unwrap();
        arena.unmap(first);

        let second = arena.map().unwrap();
        assert_eq!(first, second);
        assert_eq!(arena.allocated(), SLAB_SIZE_MIN);

        arena.unmap(second);
    }

    #[test]
    fn quota_bounds_mapping() {
        let mut arena = arena(2 * SLAB_SIZE_MIN);

        let a = arena.map().unwrap();
        let b = arena.map().unwrap();
        assert!(arena.map().is_none());

        // Returning a block makes room again without touching the quota.
        arena.unmap(a);
        assert!(arena.map().is_some());

        arena.unmap(b);
    }

    #[test]
    fn drop_releases_the_quota() {
        let quota = Rc::new(Quota::new(usize::MAX));

        {
            let mut arena = SlabArena::new(Rc::clone(&quota), SLAB_SIZE_MIN);
            let _ = arena.map().unwrap();
            assert_eq!(quota.used(), SLAB_SIZE_MIN);
        }

        assert_eq!(quota.used(), 0);
    }

    #[test]
    #[should_panic]
    fn non_power_of_two_size_is_rejected() {
        drop(SlabArena::new(
            Rc::new(Quota::unlimited()),
            SLAB_SIZE_MIN + 4096,
        ));
    }
}
