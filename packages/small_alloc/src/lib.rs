//! A size-classed allocator for small objects, built on a slab cache.
//!
//! This crate provides [`SmallAlloc`], which serves `alloc(size)` /
//! `free(ptr, size)` requests from a battery of fixed-size pools — one per
//! size class — backed by the `slab_cache` tier.
//!
//! # Key ideas
//!
//! - **Hybrid size classes**: [`SizeClasses`] grows class sizes linearly at
//!   first and geometrically after, with a realised factor of the form
//!   `2^(1/2^k)` so classification is pure shift arithmetic.
//! - **Waste-bounded routing**: pools sharing a slab order form groups of up
//!   to 32. A fresh group serves every request from its largest pool; a
//!   narrower pool is activated only once that redirection has wasted a
//!   quarter of a slab. Rarely used classes never pin a slab of their own,
//!   and activation is monotone.
//! - **Exact free routing**: slabs are aligned to their own size and stamped
//!   with their pool's index, so a free finds the pool that actually carved
//!   the object — even when the allocation was redirected — and settles the
//!   requesting class's waste account.
//! - **Delayed free with incremental reclaim**: while delayed-free mode is
//!   on, frees are quarantined on per-pool LIFO lists. Switching the mode off
//!   drains the backlog in bounded batches, one batch per subsequent
//!   allocation, so no single call pays for the whole backlog.
//! - **Large fallthrough**: requests beyond the largest class become direct
//!   slab-cache allocations.
//!
//! # Example
//!
//! ```rust
//! use std::ops::ControlFlow;
//! use std::rc::Rc;
//!
//! use slab_cache::{Quota, SlabArena, SlabCache};
//! use small_alloc::SmallAlloc;
//!
//! let arena = SlabArena::new(Rc::new(Quota::unlimited()), 4 << 20);
//! let cache = SlabCache::new(arena);
//!
//! let mut alloc = SmallAlloc::builder()
//!     .slab_cache(cache)
//!     .min_objsize(12)
//!     .factor(1.05)
//!     .build();
//!
//! let a = alloc.alloc(40).expect("quota is unlimited");
//! let b = alloc.alloc(4000).expect("quota is unlimited");
//!
//! // SAFETY: freeing the pointers we received, with the sizes we asked for.
//! unsafe {
//!     alloc.free(a, 40);
//!     alloc.free(b, 4000);
//! }
//!
//! let totals = alloc.stats(|_| ControlFlow::Continue(()));
//! assert_eq!(totals.used, 0);
//! ```
//!
//! # Thread safety
//!
//! An allocator instance is single-threaded: it is not [`Sync`], performs no
//! locking, and all calls must come from the context that owns it. Multiple
//! instances may coexist, each owning its own cache, sharing one
//! [`Quota`](slab_cache::Quota).

mod alloc;
mod builder;
mod pool;
mod size_class;
mod stats;

pub use alloc::SmallAlloc;
pub use builder::SmallAllocBuilder;
pub use size_class::SizeClasses;
pub use stats::SmallStats;

// The per-pool statistics type handed to the stats callback lives in the
// storage tier; re-export it so callers need only this crate.
pub use slab_cache::MempoolStats;
