//! Quota-bounded slab memory, from raw arena blocks down to fixed-size object pools.
//!
//! This crate provides the storage tier that size-classed allocators are built on:
//!
//! - [`Quota`] — a shared byte budget that bounds how much memory the tier may hold.
//! - [`SlabArena`] — a source of large power-of-two blocks whose alignment equals
//!   their size, so any interior pointer can be masked down to the block base.
//! - [`SlabCache`] — a binary-buddy cache that carves arena blocks into power-of-two
//!   slabs of several orders, plus a direct path for allocations too large for any
//!   slab order.
//! - [`Mempool`] — a fixed-size object allocator over slabs of a single order, with
//!   an intrusive freed-object chain inside each slab.
//!
//! All types are single-threaded: they can be moved between threads where their
//! contents allow it, but they are never [`Sync`] and perform no locking.
//!
//! # Example
//!
//! ```rust
//! use std::rc::Rc;
//!
//! use slab_cache::{Mempool, Quota, SlabArena, SlabCache, mslab_from_ptr};
//!
//! let quota = Rc::new(Quota::unlimited());
//! let arena = SlabArena::new(Rc::clone(&quota), 1 << 20);
//! let mut cache = SlabCache::new(arena);
//!
//! // A pool of 64-byte objects, tagged with owner cookie 0.
//! let mut pool = Mempool::new(&cache, 64, 0);
//!
//! let ptr = pool.alloc(&mut cache).expect("quota is unlimited");
//!
//! // The slab that carved an object is recoverable from the object pointer alone.
//! // SAFETY: `ptr` was returned by `pool` and is still allocated.
//! let slab = unsafe { mslab_from_ptr(ptr, pool.slab_ptr_mask()) };
//!
//! // SAFETY: `ptr` belongs to `slab`, which belongs to `pool`.
//! unsafe { pool.free(&mut cache, slab, ptr) };
//!
//! pool.destroy(&mut cache);
//! assert_eq!(cache.used(), 0);
//! ```

mod arena;
mod cache;
mod mempool;
mod quota;

pub use arena::SlabArena;
pub use cache::{ORDER0_SIZE, Slab, SlabCache};
pub use mempool::{Mempool, MempoolStats, Mslab, mslab_from_ptr};
pub use quota::Quota;
