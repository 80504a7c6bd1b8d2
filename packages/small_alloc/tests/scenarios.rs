//! End-to-end scenarios over the public allocator API.

use std::ops::ControlFlow;
use std::ptr::NonNull;
use std::rc::Rc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use slab_cache::{Quota, SlabArena, SlabCache};
use small_alloc::{SmallAlloc, SmallStats};

const ARENA_SLAB: usize = 4 << 20;

fn small_alloc(factor: f32) -> SmallAlloc {
    let arena = SlabArena::new(Rc::new(Quota::unlimited()), ARENA_SLAB);
    SmallAlloc::builder()
        .slab_cache(SlabCache::new(arena))
        .min_objsize(12)
        .granularity(8)
        .factor(factor)
        .build()
}

fn totals(alloc: &SmallAlloc) -> SmallStats {
    alloc.stats(|_| ControlFlow::Continue(()))
}

/// The leak check the allocator's users run after tearing a workload down:
/// no object bytes outstanding, and every byte the cache has handed out is
/// accounted for by the pools.
fn assert_unused(alloc: &SmallAlloc) {
    let mut slab_bytes = 0_usize;
    let totals = alloc.stats(|stats| {
        slab_bytes += stats.slabsize * stats.slabcount;
        ControlFlow::Continue(())
    });

    assert_eq!(totals.used, 0, "object bytes leaked");
    assert_eq!(
        alloc.cache().used(),
        slab_bytes,
        "the cache holds bytes no pool accounts for"
    );
    assert_eq!(alloc.cache().used(), 0, "slabs were not returned");
}

#[test]
fn bulk_alloc_free_leaves_nothing_behind() {
    let mut alloc = small_alloc(1.1);

    let count = 10_000;
    let size = 40_usize;

    let ptrs: Vec<_> = (0..count)
        .map(|_| alloc.alloc(size).expect("quota is unlimited"))
        .collect();

    let mid_totals = totals(&alloc);
    assert!(mid_totals.used >= count * size);
    assert!(mid_totals.total >= mid_totals.used);

    for ptr in ptrs {
        // SAFETY: each pointer came from alloc(size) above and is freed once.
        unsafe { alloc.free(ptr, size) };
    }

    assert_unused(&alloc);
}

#[test]
fn pool_bytes_match_cache_bytes_while_objects_live() {
    let mut alloc = small_alloc(1.05);

    let sizes = [16_usize, 40, 100, 1000, 4096, 30_000];
    let ptrs: Vec<_> = sizes
        .iter()
        .map(|&size| (alloc.alloc(size).expect("quota is unlimited"), size))
        .collect();

    let mut slab_bytes = 0_usize;
    alloc.stats(|stats| {
        slab_bytes += stats.slabsize * stats.slabcount;
        ControlFlow::Continue(())
    });
    assert_eq!(alloc.cache().used(), slab_bytes);

    for (ptr, size) in ptrs {
        // SAFETY: freeing each pointer once, with its original size.
        unsafe { alloc.free(ptr, size) };
    }

    assert_unused(&alloc);
}

#[test]
fn requests_beyond_the_largest_class_fall_through_to_the_cache() {
    let mut alloc = small_alloc(1.05);

    let size = 2 * ARENA_SLAB;
    assert!(size > alloc.objsize_max());

    let ptr = alloc.alloc(size).expect("quota is unlimited");

    // Large allocations are not pool objects, but the cache accounts for them.
    assert_eq!(totals(&alloc).used, 0);
    assert!(alloc.cache().used() >= size);

    // SAFETY: freeing the large allocation once, with its original size.
    unsafe { alloc.free(ptr, size) };

    assert_unused(&alloc);
}

#[test]
fn delayed_free_backlog_drains_incrementally() {
    let mut alloc = small_alloc(1.05);
    let mut rng = SmallRng::seed_from_u64(7);

    alloc.set_delayed_free_mode(true);

    // Five objects stay live across the whole cycle.
    let live: Vec<_> = (0..5)
        .map(|_| {
            let size = rng.random_range(20..1000);
            (alloc.alloc(size).expect("quota is unlimited"), size)
        })
        .collect();
    let live_bytes = totals(&alloc).used;

    // Quarantine a mixed backlog, including one large allocation.
    for _ in 0..500 {
        let size = rng.random_range(20..1000);
        let ptr = alloc.alloc(size).expect("quota is unlimited");
        // SAFETY: freeing the pointer we just received, with its size.
        unsafe { alloc.free_delayed(ptr, size) };
    }
    let big = alloc.alloc(2 * ARENA_SLAB).expect("quota is unlimited");
    // SAFETY: freeing the pointer we just received, with its size.
    unsafe { alloc.free_delayed(big, 2 * ARENA_SLAB) };

    // Nothing is reclaimed while the mode is on.
    assert!(totals(&alloc).used >= live_bytes);
    assert!(alloc.cache().used() > 2 * ARENA_SLAB);

    alloc.set_delayed_free_mode(false);

    // Each allocation reclaims a bounded batch; a dozen cycles clears a
    // 501-item backlog with room to spare.
    for _ in 0..12 {
        let probe = alloc.alloc(64).expect("quota is unlimited");
        // SAFETY: freeing the probe with its own size.
        unsafe { alloc.free(probe, 64) };
    }

    assert_eq!(totals(&alloc).used, live_bytes);
    assert!(alloc.cache().used() < 2 * ARENA_SLAB);

    for (ptr, size) in live {
        // SAFETY: freeing each live pointer once, with its original size.
        unsafe { alloc.free(ptr, size) };
    }

    assert_unused(&alloc);
}

#[test]
fn mixed_random_workload_is_leak_free() {
    let mut alloc = small_alloc(1.03);
    let mut rng = SmallRng::seed_from_u64(42);

    let mut live: Vec<(NonNull<u8>, usize)> = Vec::new();

    for round in 0..20_000 {
        let grow = live.is_empty() || (live.len() < 2000 && rng.random_range(0..100) < 55);

        if grow {
            let size = rng.random_range(16..8000);
            let ptr = alloc.alloc(size).expect("quota is unlimited");

            // Objects must be writable over their full requested size.
            // SAFETY: the allocator promises at least `size` usable bytes.
            unsafe { ptr.as_ptr().write_bytes(0xa5, size) };

            live.push((ptr, size));
        } else {
            let index = rng.random_range(0..live.len());
            let (ptr, size) = live.swap_remove(index);
            // SAFETY: each tracked pointer is freed exactly once, with the
            // size it was allocated with.
            unsafe { alloc.free(ptr, size) };
        }

        if round % 5000 == 0 {
            let mut slab_bytes = 0_usize;
            alloc.stats(|stats| {
                slab_bytes += stats.slabsize * stats.slabcount;
                ControlFlow::Continue(())
            });
            assert_eq!(alloc.cache().used(), slab_bytes);
        }
    }

    for (ptr, size) in live.drain(..) {
        // SAFETY: each tracked pointer is freed exactly once.
        unsafe { alloc.free(ptr, size) };
    }

    assert_unused(&alloc);
}

#[test]
fn two_allocators_share_one_quota() {
    let quota = Rc::new(Quota::new(8 * ARENA_SLAB));

    let mut first = SmallAlloc::builder()
        .slab_cache(SlabCache::new(SlabArena::new(
            Rc::clone(&quota),
            ARENA_SLAB,
        )))
        .build();
    let mut second = SmallAlloc::builder()
        .slab_cache(SlabCache::new(SlabArena::new(
            Rc::clone(&quota),
            ARENA_SLAB,
        )))
        .build();

    let a = first.alloc(100).expect("budget is free");
    let b = second.alloc(100).expect("budget is free");

    assert_eq!(quota.used(), 2 * ARENA_SLAB);

    // SAFETY: freeing each allocator's pointer once, with its size.
    unsafe {
        first.free(a, 100);
        second.free(b, 100);
    }

    drop(first);
    drop(second);
    assert_eq!(quota.used(), 0);
}

#[test]
fn exhausted_quota_surfaces_as_none() {
    let quota = Rc::new(Quota::new(ARENA_SLAB));
    let arena = SlabArena::new(Rc::clone(&quota), ARENA_SLAB);
    let mut alloc = SmallAlloc::builder()
        .slab_cache(SlabCache::new(arena))
        .build();

    // Large requests above the budget fail cleanly...
    assert!(alloc.alloc(2 * ARENA_SLAB).is_none());

    // ...and pool allocations keep succeeding until the budget is truly gone.
    let mut held = Vec::new();
    loop {
        match alloc.alloc(1024) {
            Some(ptr) => held.push(ptr),
            None => break,
        }
    }
    assert!(!held.is_empty());

    for ptr in held {
        // SAFETY: freeing each pointer once, with its original size.
        unsafe { alloc.free(ptr, 1024) };
    }

    assert_unused(&alloc);
}
