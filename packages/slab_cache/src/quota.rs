use std::cell::Cell;

/// A byte budget shared by everything that maps memory in one storage tier.
///
/// Arenas charge the quota when they map fresh blocks and caches charge it for
/// oversized direct allocations. A charge that would exceed the limit is refused
/// outright; the caller surfaces that as an out-of-memory condition.
///
/// The quota is a single-threaded type: counters are plain [`Cell`]s and sharing
/// happens through [`std::rc::Rc`].
///
/// # Example
///
/// ```rust
/// use slab_cache::Quota;
///
/// let quota = Quota::new(1024);
///
/// assert!(quota.charge(1000));
/// assert!(!quota.charge(100)); // would exceed the limit
///
/// quota.release(1000);
/// assert_eq!(quota.used(), 0);
/// ```
#[derive(Debug)]
pub struct Quota {
    limit: usize,
    used: Cell<usize>,
}

impl Quota {
    /// Creates a quota with the given byte limit.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            used: Cell::new(0),
        }
    }

    /// Creates a quota that never refuses a charge.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(usize::MAX)
    }

    /// The byte limit of this quota.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes currently charged against this quota.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Mutating an accessor to a constant is not observable here.
    pub fn used(&self) -> usize {
        self.used.get()
    }

    /// Charges `bytes` against the quota.
    ///
    /// Returns `false` without any effect when the charge would exceed the limit.
    #[must_use]
    pub fn charge(&self, bytes: usize) -> bool {
        let used = self.used.get();

        match used.checked_add(bytes) {
            Some(total) if total <= self.limit => {
                self.used.set(total);
                true
            }
            _ => false,
        }
    }

    /// Returns `bytes` previously charged with [`charge()`](Self::charge).
    pub fn release(&self, bytes: usize) {
        let used = self.used.get();
        debug_assert!(
            used >= bytes,
            "quota release of {bytes} bytes exceeds the {used} bytes charged"
        );

        self.used.set(used.wrapping_sub(bytes));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_up_to_limit() {
        let quota = Quota::new(100);

        assert!(quota.charge(60));
        assert!(quota.charge(40));
        assert_eq!(quota.used(), 100);
        assert!(!quota.charge(1));
    }

    #[test]
    fn refused_charge_has_no_effect() {
        let quota = Quota::new(10);

        assert!(!quota.charge(11));
        assert_eq!(quota.used(), 0);
    }

    #[test]
    fn release_restores_budget() {
        let quota = Quota::new(100);

        assert!(quota.charge(100));
        quota.release(100);
        assert!(quota.charge(100));
    }

    #[test]
    fn unlimited_accepts_everything() {
        let quota = Quota::unlimited();

        assert!(quota.charge(usize::MAX / 2));
        assert!(quota.charge(usize::MAX / 2));
    }
}
