use slab_cache::SlabCache;

use crate::SmallAlloc;

/// Builder for configuring and constructing a [`SmallAlloc`].
///
/// The slab cache is mandatory; everything else has a default:
///
/// - smallest object size: 8 bytes
/// - granularity: 8 bytes
/// - growth factor: 1.05
///
/// # Examples
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
/// let alloc = SmallAlloc::builder()
///     .slab_cache(cache)
///     .min_objsize(12)
///     .granularity(8)
///     .factor(1.1)
///     .build();
///
/// // The realised factor is the closest representable one.
/// assert!(alloc.actual_factor() > 1.0 && alloc.actual_factor() <= 1.2);
/// ```
#[derive(Debug)]
#[must_use]
pub struct SmallAllocBuilder {
    cache: Option<SlabCache>,
    min_objsize: u32,
    granularity: u32,
    factor: f32,
}

impl SmallAllocBuilder {
    pub(crate) fn new() -> Self {
        Self {
            cache: None,
            min_objsize: 8,
            granularity: 8,
            factor: 1.05,
        }
    }

    /// Sets the slab cache the allocator draws its memory from.
    ///
    /// The allocator takes ownership of the cache; it remains inspectable
    /// through [`SmallAlloc::cache()`].
    pub fn slab_cache(mut self, cache: SlabCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the smallest object size the allocator distinguishes. Smaller
    /// requests are served by the smallest class.
    pub fn min_objsize(mut self, min_objsize: u32) -> Self {
        self.min_objsize = min_objsize;
        self
    }

    /// Sets the alignment unit of class sizes. Must be a power of two between
    /// the pointer size and 64.
    pub fn granularity(mut self, granularity: u32) -> Self {
        self.granularity = granularity;
        self
    }

    /// Sets the desired geometric growth factor of class sizes, in `(1, 2]`.
    ///
    /// The realised factor is the closest one of the form `2^(1/2^k)`;
    /// [`SmallAlloc::actual_factor()`] reports it.
    pub fn factor(mut self, factor: f32) -> Self {
        self.factor = factor;
        self
    }

    /// Builds the allocator with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if no slab cache has been set, or if the granularity or factor
    /// is out of range.
    #[must_use]
    pub fn build(self) -> SmallAlloc {
        let cache = self
            .cache
            .expect("a slab cache must be set with .slab_cache() before calling .build()");

        SmallAlloc::new_inner(cache, self.min_objsize, self.granularity, self.factor)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use slab_cache::{Quota, SlabArena};

    use super::*;

    fn cache() -> SlabCache {
        SlabCache::new(SlabArena::new(Rc::new(Quota::unlimited()), 1 << 20))
    }

    #[test]
    #[should_panic]
    fn build_without_cache_panics() {
        drop(SmallAlloc::builder().build());
    }

    #[test]
    #[should_panic]
    fn granularity_below_pointer_size_is_rejected() {
        drop(SmallAlloc::builder().slab_cache(cache()).granularity(2).build());
    }

    #[test]
    #[should_panic]
    fn factor_of_one_is_rejected() {
        drop(SmallAlloc::builder().slab_cache(cache()).factor(1.0).build());
    }

    #[test]
    fn defaults_build_a_working_allocator() {
        let mut alloc = SmallAlloc::builder().slab_cache(cache()).build();

        let ptr = alloc.alloc(100).expect("quota is unlimited");
        // SAFETY: freeing the pointer we just received, with the same size.
        unsafe { alloc.free(ptr, 100) };
    }

    #[test]
    fn min_objsize_is_aligned_up_to_the_granularity() {
        let alloc = SmallAlloc::builder()
            .slab_cache(cache())
            .min_objsize(12)
            .granularity(8)
            .build();

        // 12 rounds up to 16: the smallest class serves 1..=16.
        let stats = {
            let mut first = None;
            alloc.stats(|s| {
                first.get_or_insert(*s);
                std::ops::ControlFlow::Break(())
            });
            first.unwrap()
        };
        assert_eq!(stats.objsize, 16);
    }
}
