use std::ops::ControlFlow;
use std::ptr::NonNull;

use slab_cache::{Mempool, MempoolStats, Slab, SlabCache, mslab_from_ptr};

use crate::pool::{PoolGroup, SmallPool, activate, build_pools};
use crate::{SizeClasses, SmallAllocBuilder, SmallStats};

/// Items reclaimed per garbage-collection step, bounding the work any single
/// allocation performs while a quarantine is draining.
const GC_BATCH: usize = 100;

/// How frees behave; see [`SmallAlloc::set_delayed_free_mode()`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum FreeMode {
    /// Frees release memory immediately.
    Free,

    /// Delayed frees are quarantined instead of released.
    Delayed,

    /// Frees release immediately again, and every allocation first drains a
    /// bounded batch of the quarantine. Reverts to [`FreeMode::Free`] once the
    /// quarantine is empty.
    CollectGarbage,
}

/// A size-classed allocator for small objects over a [`SlabCache`].
///
/// Requests are classified by [`SizeClasses`] and served from one fixed-size
/// [`Mempool`] per class. Pools sharing a slab order form groups: a fresh
/// group serves every request from its largest pool, and a narrower pool takes
/// over its own class only after the redirection has wasted a quarter of a
/// slab — so rarely used classes never pin a slab of their own, while hot
/// classes converge to exact-fit pools. Requests larger than the biggest class
/// fall through to direct slab-cache allocations.
///
/// Frees can be quarantined: while delayed-free mode is on, objects released
/// through [`free_delayed()`](Self::free_delayed) accumulate on per-pool LIFO
/// lists, and when the mode is switched off the backlog drains incrementally,
/// a bounded batch per subsequent allocation.
///
/// The allocator is single-threaded and hands out raw [`NonNull<u8>`]
/// pointers; freeing requires the original request size, which is how the
/// class (and with it the object's pool) is found again.
///
/// # Example
///
/// ```rust
/// use std::rc::Rc;
///
/// use slab_cache::{Quota, SlabArena, SlabCache};
/// use small_alloc::SmallAlloc;
///
/// let arena = SlabArena::new(Rc::new(Quota::unlimited()), 4 << 20);
/// let cache = SlabCache::new(arena);
///
/// let mut alloc = SmallAlloc::builder().slab_cache(cache).build();
///
/// let ptr = alloc.alloc(40).expect("quota is unlimited");
///
/// // SAFETY: freeing the pointer we just received, with the size we asked for.
/// unsafe { alloc.free(ptr, 40) };
///
/// let totals = alloc.stats(|_| std::ops::ControlFlow::Continue(()));
/// assert_eq!(totals.used, 0);
/// ```
#[derive(Debug)]
pub struct SmallAlloc {
    cache: SlabCache,
    classes: SizeClasses,
    pools: Vec<SmallPool>,
    groups: Vec<PoolGroup>,

    /// Largest request served from a pool; anything bigger goes to the
    /// slab cache directly.
    objsize_max: u32,

    free_mode: FreeMode,

    /// Pools with a non-empty quarantine, in registration order; drained from
    /// the back.
    delayed_pools: Vec<u32>,

    /// Quarantined direct allocations; drained before any pool quarantine.
    delayed_large: Vec<NonNull<u8>>,
}

impl SmallAlloc {
    /// Creates a builder for configuring and constructing a [`SmallAlloc`].
    ///
    /// The slab cache is mandatory; the smallest object size, granularity and
    /// growth factor have defaults. See [`SmallAllocBuilder`].
    #[inline]
    pub fn builder() -> SmallAllocBuilder {
        SmallAllocBuilder::new()
    }

    pub(crate) fn new_inner(
        cache: SlabCache,
        min_objsize: u32,
        granularity: u32,
        factor: f32,
    ) -> Self {
        assert!(
            granularity.is_power_of_two()
                && granularity as usize >= size_of::<usize>()
                && granularity <= 64,
            "granularity must be a power of two between the pointer size and 64, got {granularity}"
        );

        let min_alloc = min_objsize
            .max(granularity)
            .next_multiple_of(granularity);

        // The largest class: the biggest object a mempool accepts over the
        // largest slab, aligned down so it stays a valid class size.
        let limit = Mempool::objsize_max(cache.order_size(cache.order_max()));
        let objsize_max = limit - limit % granularity;

        let classes = SizeClasses::new(granularity, factor, min_alloc);
        let (pools, groups, objsize_max) = build_pools(&cache, &classes, objsize_max);

        Self {
            cache,
            classes,
            pools,
            groups,
            objsize_max,
            free_mode: FreeMode::Free,
            delayed_pools: Vec::new(),
            delayed_large: Vec::new(),
        }
    }

    /// The realised geometric growth factor of the size classes.
    #[must_use]
    pub fn actual_factor(&self) -> f32 {
        self.classes.actual_factor()
    }

    /// The largest request size served from a pool. Larger requests are
    /// direct slab-cache allocations.
    #[must_use]
    pub fn objsize_max(&self) -> usize {
        self.objsize_max as usize
    }

    /// The slab cache backing this allocator.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Plain accessor; nothing to observe when mutated away.
    pub fn cache(&self) -> &SlabCache {
        &self.cache
    }

    /// Allocates `size` bytes.
    ///
    /// While a quarantine drain is pending, a bounded batch of it is
    /// reclaimed first. Returns `None` when the slab cache cannot provide the
    /// memory; a failed allocation has no side effects beyond that drain step.
    pub fn alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.collect_garbage();

        if size > self.objsize_max as usize {
            let slab = self.cache.take_large(size)?;
            return Some(Slab::data(slab));
        }

        let class = self.classes.class_for(size as u32) as usize;
        debug_assert!(class < self.pools.len());

        let target = self.pools[class].used_pool as usize;
        debug_assert!(size <= self.pools[target].pool.objsize() as usize);

        let ptr = self.pools[target].pool.alloc(&mut self.cache)?;

        if target != class {
            // The redirection cost of this allocation: the gap between the
            // serving pool's object size and the best fit.
            let delta =
                (self.pools[target].pool.objsize() - self.pools[class].pool.objsize()) as usize;
            self.pools[class].waste += delta;

            let group = self.pools[class].group as usize;
            if self.pools[class].waste >= self.groups[group].waste_max {
                activate(&mut self.pools, &mut self.groups, class as u32);
            }
        }

        Some(ptr)
    }

    /// Frees an allocation.
    ///
    /// The object is returned to the pool that actually carved it — which may
    /// be a larger sibling of the class pool if the request was redirected —
    /// and the class pool's waste account is credited back accordingly.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`alloc()`](Self::alloc) on this
    /// allocator and not freed since, and `size` must map to the same size
    /// class as the size originally requested. Freeing with a size from a
    /// different class is undefined behavior, as is a double free.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>, size: usize) {
        if size > self.objsize_max as usize {
            // SAFETY: sizes in this class range are served by take_large, so
            // per the caller contract the pointer is a live large payload.
            let slab = unsafe { Slab::from_data(ptr) };
            self.cache.put_large(slab);
            return;
        }

        let class = self.classes.class_for(size as u32) as usize;
        debug_assert!(size as u32 >= self.pools[class].objsize_min);

        // SAFETY: pools of one group share a slab order, so the class pool's
        // mask recovers the slab no matter which group member carved the
        // object.
        let slab = unsafe { mslab_from_ptr(ptr, self.pools[class].pool.slab_ptr_mask()) };

        // SAFETY: the slab header is live while its pool holds the slab.
        let actual = unsafe { slab.as_ref() }.cookie() as usize;

        let delta = (self.pools[actual].pool.objsize() - self.pools[class].pool.objsize()) as usize;
        debug_assert!(
            self.pools[class].waste >= delta,
            "waste accounting underflow: freeing more redirection than was recorded"
        );
        self.pools[class].waste = self.pools[class].waste.wrapping_sub(delta);

        // SAFETY: `ptr` is an object of `slab`, owned by the pool the cookie
        // names, per the caller contract.
        unsafe { self.pools[actual].pool.free(&mut self.cache, slab, ptr) };
    }

    /// Frees an allocation, quarantining it while delayed-free mode is on.
    ///
    /// Outside delayed-free mode this is exactly [`free()`](Self::free).
    /// Quarantined objects keep their memory until the backlog drains; see
    /// [`set_delayed_free_mode()`](Self::set_delayed_free_mode).
    ///
    /// # Safety
    ///
    /// Same contract as [`free()`](Self::free).
    pub unsafe fn free_delayed(&mut self, ptr: NonNull<u8>, size: usize) {
        if self.free_mode != FreeMode::Delayed {
            // SAFETY: forwarded caller contract.
            unsafe { self.free(ptr, size) };
            return;
        }

        if size > self.objsize_max as usize {
            self.delayed_large.push(ptr);
            return;
        }

        let class = self.classes.class_for(size as u32) as usize;
        debug_assert!(size as u32 >= self.pools[class].objsize_min);

        if self.pools[class].delayed.is_empty() {
            self.delayed_pools.push(class as u32);
        }
        self.pools[class].delayed.push(ptr);
    }

    /// Turns delayed-free mode on or off.
    ///
    /// While on, [`free_delayed()`](Self::free_delayed) quarantines instead of
    /// releasing — the discipline needed while a consistent snapshot of
    /// allocator-managed data is being read. Turning the mode off does not
    /// release the backlog at once: subsequent allocations drain it in
    /// bounded steps of 100 objects until it is empty.
    pub fn set_delayed_free_mode(&mut self, enabled: bool) {
        self.free_mode = if enabled {
            FreeMode::Delayed
        } else {
            FreeMode::CollectGarbage
        };
    }

    /// Aggregates pool statistics.
    ///
    /// Walks the pools in class order, invoking `callback` with each pool's
    /// [`MempoolStats`]; `ControlFlow::Break` stops the walk early. The
    /// returned totals cover the pools visited.
    pub fn stats<F>(&self, mut callback: F) -> SmallStats
    where
        F: FnMut(&MempoolStats) -> ControlFlow<()>,
    {
        let mut totals = SmallStats::default();

        for pool in &self.pools {
            let stats = pool.pool.stats();
            totals.used += stats.used;
            totals.total += stats.total;

            if callback(&stats).is_break() {
                break;
            }
        }

        totals
    }

    /// Reclaims one bounded batch of the quarantine, if one is pending.
    ///
    /// Priority: quarantined direct allocations first, then pool quarantines
    /// in most-recently-registered order. Once everything is empty the mode
    /// flips back to [`FreeMode::Free`].
    fn collect_garbage(&mut self) {
        if self.free_mode != FreeMode::CollectGarbage {
            return;
        }

        if !self.delayed_large.is_empty() {
            for _ in 0..GC_BATCH {
                let Some(ptr) = self.delayed_large.pop() else {
                    break;
                };

                // SAFETY: only live large payloads are pushed onto
                // delayed_large, and each is popped exactly once.
                let slab = unsafe { Slab::from_data(ptr) };
                self.cache.put_large(slab);
            }
        } else if let Some(&top) = self.delayed_pools.last() {
            let mut class = top as usize;

            // An exhausted pool costs one iteration of the budget, exactly
            // like a reclaimed object.
            for _ in 0..GC_BATCH {
                let Some(ptr) = self.pools[class].delayed.pop() else {
                    self.delayed_pools.pop();
                    match self.delayed_pools.last() {
                        Some(&next) => {
                            class = next as usize;
                            continue;
                        }
                        None => break,
                    }
                };

                // SAFETY: quarantined pointers were live objects of this
                // class when pushed, and pools of one group share a slab
                // order, so the class pool's mask recovers the slab.
                let slab = unsafe { mslab_from_ptr(ptr, self.pools[class].pool.slab_ptr_mask()) };

                // SAFETY: the slab header is live while its pool holds it.
                let actual = unsafe { slab.as_ref() }.cookie() as usize;

                let delta = (self.pools[actual].pool.objsize()
                    - self.pools[class].pool.objsize()) as usize;
                debug_assert!(self.pools[class].waste >= delta);
                self.pools[class].waste = self.pools[class].waste.wrapping_sub(delta);

                // SAFETY: `ptr` is a live quarantined object of `slab`, owned
                // by the pool the cookie names.
                unsafe { self.pools[actual].pool.free(&mut self.cache, slab, ptr) };
            }
        } else {
            self.free_mode = FreeMode::Free;
        }
    }

    #[cfg(test)]
    pub(crate) fn free_mode(&self) -> FreeMode {
        self.free_mode
    }

    #[cfg(test)]
    pub(crate) fn pools(&self) -> &[SmallPool] {
        &self.pools
    }

    #[cfg(test)]
    pub(crate) fn groups(&self) -> &[PoolGroup] {
        &self.groups
    }
}

impl Drop for SmallAlloc {
    fn drop(&mut self) {
        // Pools release their slabs wholesale; anything still quarantined on
        // them goes with the slabs.
        for pool in &mut self.pools {
            pool.pool.destroy(&mut self.cache);
        }

        while let Some(ptr) = self.delayed_large.pop() {
            // SAFETY: only live large payloads are pushed onto delayed_large.
            let slab = unsafe { Slab::from_data(ptr) };
            self.cache.put_large(slab);
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::rc::Rc;

    use slab_cache::{Quota, SlabArena};
    use static_assertions::assert_not_impl_any;

    use super::*;

    assert_not_impl_any!(SmallAlloc: Send, Sync);

    const ARENA_SLAB: usize = 1 << 20;

    fn small_alloc() -> SmallAlloc {
        let arena = SlabArena::new(Rc::new(Quota::unlimited()), ARENA_SLAB);
        SmallAlloc::builder()
            .slab_cache(SlabCache::new(arena))
            .factor(1.05)
            .build()
    }

    /// The first pool of the first group whose group has at least two members
    /// and whose own bit is not active: allocations for it are redirected.
    fn redirected_pool(alloc: &SmallAlloc) -> usize {
        alloc
            .groups()
            .iter()
            .find(|g| g.last > g.first)
            .map(|g| g.first as usize)
            .expect("a 1.05 factor always yields multi-pool groups")
    }

    #[test]
    fn pools_cover_contiguous_size_ranges() {
        let alloc = small_alloc();
        let pools = alloc.pools();

        assert_eq!(pools[0].objsize_min, 1);

        for pair in pools.windows(2) {
            assert_eq!(pair[1].objsize_min, pair[0].pool.objsize() + 1);
            assert!(pair[0].pool.objsize() < pair[1].pool.objsize());
        }

        assert_eq!(
            pools.last().unwrap().pool.objsize() as usize,
            alloc.objsize_max()
        );
    }

    #[test]
    fn groups_partition_pools_by_slab_order() {
        let alloc = small_alloc();
        let (pools, groups) = (alloc.pools(), alloc.groups());

        assert!(groups.len() > 1, "expected several slab orders");

        let mut next = 0_u32;
        for (index, group) in groups.iter().enumerate() {
            assert_eq!(group.first, next, "groups must tile the pool array");
            assert!(group.last >= group.first);
            assert!(group.last - group.first < 32);

            let order = pools[group.first as usize].pool.slab_order();
            for member in group.first..=group.last {
                assert_eq!(pools[member as usize].group as usize, index);
                assert_eq!(pools[member as usize].pool.slab_order(), order);
            }

            next = group.last + 1;
        }
        assert_eq!(next as usize, pools.len());
    }

    #[test]
    fn fresh_groups_route_everything_to_their_largest_pool() {
        let alloc = small_alloc();
        let (pools, groups) = (alloc.pools(), alloc.groups());

        for group in groups {
            let size = group.last - group.first + 1;
            assert_eq!(group.active_mask, 1 << (size - 1));

            for (bit, member) in (group.first..=group.last).enumerate() {
                let pool = &pools[member as usize];
                assert_eq!(pool.used_pool, group.last);
                assert_eq!(
                    pool.appropriate_mask,
                    (u32::MAX << bit) & (u32::MAX >> (32 - size))
                );
            }
        }
    }

    #[test]
    fn redirected_alloc_records_waste_and_free_reverses_it() {
        let mut alloc = small_alloc();
        let class = redirected_pool(&alloc);

        let size = alloc.pools()[class].pool.objsize() as usize;
        let target = alloc.pools()[class].used_pool as usize;
        assert_ne!(target, class);

        let expected_waste =
            (alloc.pools()[target].pool.objsize() - alloc.pools()[class].pool.objsize()) as usize;

        let ptr = alloc.alloc(size).unwrap();
        assert_eq!(alloc.pools()[class].waste, expected_waste);

        // The object really came from the sibling pool.
        let slab = unsafe { mslab_from_ptr(ptr, alloc.pools()[class].pool.slab_ptr_mask()) };
        assert_eq!(unsafe { slab.as_ref() }.cookie() as usize, target);

        unsafe { alloc.free(ptr, size) };
        assert_eq!(alloc.pools()[class].waste, 0);
    }

    #[test]
    fn balanced_alloc_free_always_returns_waste_to_zero() {
        let mut alloc = small_alloc();
        let class = redirected_pool(&alloc);
        let size = alloc.pools()[class].pool.objsize() as usize;

        let ptrs: Vec<_> = (0..50).map(|_| alloc.alloc(size).unwrap()).collect();
        assert!(alloc.pools()[class].waste > 0);

        for ptr in ptrs {
            unsafe { alloc.free(ptr, size) };
        }
        assert_eq!(alloc.pools()[class].waste, 0);
    }

    #[test]
    fn waste_threshold_activates_the_pool() {
        let mut alloc = small_alloc();
        let class = redirected_pool(&alloc);

        let size = alloc.pools()[class].pool.objsize() as usize;
        let group = alloc.pools()[class].group as usize;
        let waste_max = alloc.groups()[group].waste_max;
        let bit = class as u32 - alloc.groups()[group].first;

        let delta =
            (alloc.pools()[alloc.pools()[class].used_pool as usize].pool.objsize()
                - alloc.pools()[class].pool.objsize()) as usize;

        let mut ptrs = Vec::new();
        while alloc.pools()[class].waste < waste_max {
            assert_eq!(alloc.groups()[group].active_mask & (1 << bit), 0);
            ptrs.push(alloc.alloc(size).unwrap());
            assert!(alloc.pools()[class].waste <= waste_max + delta);
        }

        // Crossing the threshold activated the pool: it now routes to itself
        // and the group mask gained its bit, with the old bits intact.
        assert_ne!(alloc.groups()[group].active_mask & (1 << bit), 0);
        assert_eq!(alloc.pools()[class].used_pool as usize, class);

        // Further allocations of this class are exact fits and add no waste.
        let waste_after = alloc.pools()[class].waste;
        let exact = alloc.alloc(size).unwrap();
        assert_eq!(alloc.pools()[class].waste, waste_after);

        let slab = unsafe { mslab_from_ptr(exact, alloc.pools()[class].pool.slab_ptr_mask()) };
        assert_eq!(unsafe { slab.as_ref() }.cookie() as usize, class);

        unsafe { alloc.free(exact, size) };
        for ptr in ptrs {
            unsafe { alloc.free(ptr, size) };
        }
        assert_eq!(alloc.pools()[class].waste, 0);
    }

    #[test]
    fn activation_tightens_routing_for_smaller_pools_only() {
        let mut alloc = small_alloc();

        // Pick a group with at least three members and activate its middle.
        let group_index = alloc
            .groups()
            .iter()
            .position(|g| g.last - g.first >= 2)
            .expect("a 1.05 factor always yields wide groups");
        let (first, last) = {
            let g = &alloc.groups()[group_index];
            (g.first, g.last)
        };
        let middle = (first + last) / 2;

        activate(&mut alloc.pools, &mut alloc.groups, middle);

        for member in first..=last {
            let expected = if member <= middle { middle } else { last };
            assert_eq!(alloc.pools()[member as usize].used_pool, expected);
        }
    }

    #[test]
    fn delayed_free_quarantines_until_the_drain_finishes() {
        let mut alloc = small_alloc();

        // A group's largest pool routes to itself, so every object is an
        // exact fit and the byte accounting below stays simple.
        let class = alloc.groups()[0].last as usize;
        let objsize = alloc.pools()[class].pool.objsize() as usize;
        let size = objsize;

        alloc.set_delayed_free_mode(true);
        assert_eq!(alloc.free_mode(), FreeMode::Delayed);

        let live = alloc.alloc(size).unwrap();
        let count = 250_usize;
        for _ in 0..count {
            let ptr = alloc.alloc(size).unwrap();
            unsafe { alloc.free_delayed(ptr, size) };
        }

        // Quarantined objects still count as used.
        let totals = alloc.stats(|_| ControlFlow::Continue(()));
        assert_eq!(totals.used, (count + 1) * objsize);

        alloc.set_delayed_free_mode(false);
        assert_eq!(alloc.free_mode(), FreeMode::CollectGarbage);

        // Each allocation drains at most one batch, so the backlog takes
        // ceil(count / batch) allocations, plus one to notice it is done.
        let mut drains = 0;
        while alloc.free_mode() != FreeMode::Free {
            let ptr = alloc.alloc(size).unwrap();
            unsafe { alloc.free(ptr, size) };
            drains += 1;
            assert!(drains < 20, "drain did not converge");
        }
        assert!(drains >= count.div_ceil(GC_BATCH));

        let totals = alloc.stats(|_| ControlFlow::Continue(()));
        assert_eq!(totals.used, objsize);

        unsafe { alloc.free(live, size) };
    }

    #[test]
    fn quarantined_large_allocations_drain_first() {
        let mut alloc = small_alloc();
        let large = alloc.objsize_max() * 2;

        alloc.set_delayed_free_mode(true);

        let big = alloc.alloc(large).unwrap();
        unsafe { alloc.free_delayed(big, large) };

        let small = alloc.alloc(40).unwrap();
        unsafe { alloc.free_delayed(small, 40) };

        let large_bytes_before = alloc.cache().used();
        alloc.set_delayed_free_mode(false);

        // The first drain step takes the large backlog and only that.
        let ptr = alloc.alloc(40).unwrap();
        assert!(alloc.cache().used() < large_bytes_before - large);
        assert!(!alloc.pools().iter().all(|p| p.delayed.is_empty()));

        // The next steps take the pool backlog and finish.
        unsafe { alloc.free(ptr, 40) };
        let ptr = alloc.alloc(40).unwrap();
        assert!(alloc.pools().iter().all(|p| p.delayed.is_empty()));

        unsafe { alloc.free(ptr, 40) };
        let _ = alloc.alloc(40).map(|p| unsafe { alloc.free(p, 40) });
        assert_eq!(alloc.free_mode(), FreeMode::Free);
    }

    #[test]
    fn delayed_free_mode_off_behaves_like_free() {
        let mut alloc = small_alloc();

        let ptr = alloc.alloc(64).unwrap();
        unsafe { alloc.free_delayed(ptr, 64) };

        let totals = alloc.stats(|_| ControlFlow::Continue(()));
        assert_eq!(totals.used, 0);
    }

    #[test]
    fn quarantine_reconciles_waste_of_redirected_objects() {
        let mut alloc = small_alloc();
        let class = redirected_pool(&alloc);
        let size = alloc.pools()[class].pool.objsize() as usize;

        alloc.set_delayed_free_mode(true);

        let ptr = alloc.alloc(size).unwrap();
        assert!(alloc.pools()[class].waste > 0);
        unsafe { alloc.free_delayed(ptr, size) };

        // Still outstanding while quarantined.
        assert!(alloc.pools()[class].waste > 0);

        alloc.set_delayed_free_mode(false);
        let probe = alloc.alloc(size).unwrap();

        // The drain returned the redirected object and its waste with it; the
        // probe allocation re-added exactly one redirection.
        let delta =
            (alloc.pools()[alloc.pools()[class].used_pool as usize].pool.objsize()
                - alloc.pools()[class].pool.objsize()) as usize;
        assert_eq!(alloc.pools()[class].waste, delta);

        unsafe { alloc.free(probe, size) };
        assert_eq!(alloc.pools()[class].waste, 0);
    }

    #[test]
    fn stats_callback_can_stop_the_walk() {
        let mut alloc = small_alloc();
        let ptr = alloc.alloc(200).unwrap();

        let mut visited = 0;
        alloc.stats(|_| {
            visited += 1;
            if visited == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(visited, 3);

        unsafe { alloc.free(ptr, 200) };
    }

    #[test]
    fn alloc_failure_leaves_no_trace() {
        let quota = Rc::new(Quota::new(ARENA_SLAB));
        let arena = SlabArena::new(Rc::clone(&quota), ARENA_SLAB);
        let mut alloc = SmallAlloc::builder()
            .slab_cache(SlabCache::new(arena))
            .build();

        // Exhaust the quota with one arena block...
        let held = alloc.alloc(64).unwrap();
        let class = redirected_pool(&alloc);
        let size = alloc.pools()[class].pool.objsize() as usize;
        let waste_before = alloc.pools()[class].waste;

        // ...so a redirected request that needs a fresh slab must fail, and
        // failure must not move the waste account.
        let mut exhausted = Vec::new();
        loop {
            match alloc.alloc(size) {
                Some(ptr) => exhausted.push(ptr),
                None => break,
            }
        }
        let waste_after_failure = alloc.pools()[class].waste;

        assert!(waste_after_failure >= waste_before);
        for ptr in exhausted {
            unsafe { alloc.free(ptr, size) };
        }
        assert_eq!(alloc.pools()[class].waste, 0);

        unsafe { alloc.free(held, 64) };
    }

    #[test]
    fn large_requests_bypass_the_pools() {
        let mut alloc = small_alloc();
        let size = alloc.objsize_max() + 1;

        let ptr = alloc.alloc(size).unwrap();

        let totals = alloc.stats(|_| ControlFlow::Continue(()));
        assert_eq!(totals.used, 0, "large allocations are not pool objects");
        assert!(alloc.cache().used() > size);

        unsafe { alloc.free(ptr, size) };
        assert_eq!(alloc.cache().used(), 0);
    }

    #[test]
    fn reported_factor_matches_the_classifier() {
        let alloc = small_alloc();
        assert!((alloc.actual_factor() - 2_f32.powf(1.0 / 16.0)).abs() < 1e-6);
    }
}
