//! Object pools and the slab-order groups that route requests between them.
//!
//! Pools sharing a slab order form groups of up to 32, addressed by bit masks.
//! A fresh group serves every request from its largest pool; a pool starts
//! serving its own size class only once the bytes wasted by that redirection
//! reach a quarter of the group's slab size. Activation only ever adds pools,
//! so routing tightens monotonically over the allocator's lifetime.

use std::ptr::NonNull;

use slab_cache::{Mempool, SlabCache};

use crate::SizeClasses;

/// Upper bound on pools per group, set by the width of the routing masks.
const POOLS_PER_GROUP_MAX: u32 = 32;

/// Hard cap on the number of pools. When a very small growth factor would
/// produce more classes than this, the allocator stops here and serves larger
/// requests through the large-slab path instead.
const POOLS_MAX: usize = 1024;

/// A run of up to 32 pools sharing one slab order.
#[derive(Debug)]
pub(crate) struct PoolGroup {
    /// Index of the first pool of this group in the allocator's pool array.
    pub(crate) first: u32,
    /// Index of the last pool of this group.
    pub(crate) last: u32,

    /// Bit `i` set: pool `first + i` serves requests itself. Never loses bits.
    pub(crate) active_mask: u32,

    /// Redirection waste, in bytes, at which a pool starts serving itself:
    /// a quarter of this group's slab size.
    pub(crate) waste_max: usize,
}

/// One size-class pool plus its routing state.
#[derive(Debug)]
pub(crate) struct SmallPool {
    pub(crate) pool: Mempool,

    /// One past the previous pool's object size: the smallest request size
    /// this class covers.
    pub(crate) objsize_min: u32,

    /// Index of this pool's group in the allocator's group array.
    pub(crate) group: u32,

    /// Index of the pool requests classified here are currently served from.
    /// Always a pool of the same group with an object size at least ours.
    pub(crate) used_pool: u32,

    /// Bit `i` set: pool `group.first + i` is large enough to serve requests
    /// classified here.
    pub(crate) appropriate_mask: u32,

    /// Bytes lost to serving this class from a larger pool. Grows on
    /// redirected allocations, shrinks as those objects are freed.
    pub(crate) waste: usize,

    /// Quarantined objects of this class awaiting the garbage-collection
    /// drain, most recently freed last.
    pub(crate) delayed: Vec<NonNull<u8>>,
}

/// Builds the pool array and its groups for every size class up to
/// `objsize_max`, and returns them along with the realised maximum (the last
/// pool's object size, which the class cap may pull below the target).
pub(crate) fn build_pools(
    cache: &SlabCache,
    classes: &SizeClasses,
    objsize_max: u32,
) -> (Vec<SmallPool>, Vec<PoolGroup>, u32) {
    let mut pools: Vec<SmallPool> = Vec::new();
    let mut objsize = 0_u32;

    while pools.len() < POOLS_MAX && objsize < objsize_max {
        let previous = objsize;
        objsize = classes.size_for(pools.len() as u32).min(objsize_max);

        pools.push(SmallPool {
            pool: Mempool::new(cache, objsize, pools.len() as u32),
            objsize_min: previous + 1,
            group: 0,
            used_pool: 0,
            appropriate_mask: 0,
            waste: 0,
            delayed: Vec::new(),
        });
    }

    assert!(!pools.is_empty(), "no size class fits below {objsize_max}");

    let mut groups = Vec::new();

    // Partition the array into runs of equal slab order, then chunk each run
    // to the mask width.
    let mut first = 0;
    while first < pools.len() {
        let order = pools[first].pool.slab_order();

        let mut last = first;
        while last + 1 < pools.len() && pools[last + 1].pool.slab_order() == order {
            last += 1;
        }

        let mut chunk_first = first;
        while chunk_first <= last {
            let chunk_last = last.min(chunk_first + POOLS_PER_GROUP_MAX as usize - 1);
            create_group(cache, &mut pools, &mut groups, chunk_first, chunk_last);
            chunk_first = chunk_last + 1;
        }

        first = last + 1;
    }

    let realised_max = pools
        .last()
        .expect("at least one pool exists")
        .pool
        .objsize();

    (pools, groups, realised_max)
}

/// Creates one group over `pools[first..=last]` and activates its largest
/// pool, the initial routing target for the whole group.
fn create_group(
    cache: &SlabCache,
    pools: &mut [SmallPool],
    groups: &mut Vec<PoolGroup>,
    first: usize,
    last: usize,
) {
    let group_index = groups.len() as u32;
    let group_size = (last - first + 1) as u32;
    debug_assert!(group_size <= POOLS_PER_GROUP_MAX);

    let member_bits = u32::MAX >> (POOLS_PER_GROUP_MAX - group_size);

    for (bit, pool) in pools[first..=last].iter_mut().enumerate() {
        pool.group = group_index;
        pool.appropriate_mask = (u32::MAX << bit) & member_bits;
    }

    let slab_order = pools[last].pool.slab_order();

    groups.push(PoolGroup {
        first: first as u32,
        last: last as u32,
        active_mask: 0,
        waste_max: cache.order_size(slab_order) / 4,
    });

    activate(pools, groups, last as u32);
}

/// Marks `pool_index` as serving requests itself and re-routes every pool of
/// its group with an object size up to its own through the tightest active
/// pool that can serve it. Pools with larger object sizes are unaffected.
pub(crate) fn activate(pools: &mut [SmallPool], groups: &mut [PoolGroup], pool_index: u32) {
    let group = &mut groups[pools[pool_index as usize].group as usize];
    debug_assert!(group.first <= pool_index && pool_index <= group.last);

    let bit = pool_index - group.first;
    debug_assert_eq!(
        group.active_mask & (1 << bit),
        0,
        "pool {pool_index} activated twice"
    );
    group.active_mask |= 1 << bit;

    for member in group.first..=pool_index {
        let pool = &pools[member as usize];
        let usable = group.active_mask & pool.appropriate_mask;
        debug_assert_ne!(usable, 0, "no active pool can serve pool {member}");

        let target = group.first + usable.trailing_zeros();
        debug_assert!(
            pools[member as usize].pool.objsize() <= pools[target as usize].pool.objsize()
        );

        pools[member as usize].used_pool = target;
    }
}
