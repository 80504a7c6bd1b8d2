/// Aggregate statistics over all pools of a
/// [`SmallAlloc`](crate::SmallAlloc).
///
/// Totals cover pool objects only; direct large allocations are visible
/// through the slab cache's own accounting.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SmallStats {
    /// Bytes in allocated objects, summed over all pools.
    pub used: usize,

    /// Bytes in slabs held by pools, allocated or not.
    pub total: usize,
}
