//! The size-to-class mapping used to pick an object pool for a request.
//!
//! Class sizes grow in two regimes. The first `effective_size` classes grow by
//! `granularity` each (the incremental region). From there on growth is
//! geometric with a realised factor of the form `2^(1/2^k)`: within each run of
//! `effective_size` classes the additive step is constant, and the step doubles
//! from one run to the next, so class sizes double every `effective_size`
//! classes. Keeping the factor a power-of-two root makes both directions of
//! the mapping pure shift-and-mask arithmetic with no tables.

/// Maps object sizes to size-class indices and back.
///
/// Construction picks the representable factor closest to the requested one in
/// the log domain; [`actual_factor()`](Self::actual_factor) reports it. Both
/// [`class_for()`](Self::class_for) and [`size_for()`](Self::size_for) are
/// constant-time.
///
/// # Example
///
/// ```rust
/// use small_alloc::SizeClasses;
///
/// let classes = SizeClasses::new(8, 1.05, 16);
///
/// // The smallest class serves everything up to its size.
/// assert_eq!(classes.class_for(1), 0);
/// assert_eq!(classes.class_for(16), 0);
/// assert_eq!(classes.size_for(0), 16);
///
/// // A class always covers the request that mapped to it.
/// let class = classes.class_for(100);
/// assert!(classes.size_for(class) >= 100);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct SizeClasses {
    granularity: u32,

    /// `log2(granularity)`: low bits that never affect the class.
    ignore_bits: u32,

    /// `log2(effective_size)`.
    effective_bits: u32,

    /// Number of classes in the incremental region and in each geometric run.
    effective_size: u32,
    effective_mask: u32,

    /// Subtracted from sizes (and added back to class sizes) so that the
    /// smallest class lands on `min_alloc`: `min_alloc - granularity`.
    size_shift: u32,
    size_shift_plus_1: u32,

    min_alloc: u32,
    requested_factor: f32,
    actual_factor: f32,
}

impl SizeClasses {
    /// Creates a mapping with the given granularity, growth factor and
    /// smallest class size.
    ///
    /// The realised factor is `2^(1/2^k)` with `k` chosen to minimise the
    /// log-domain distance to `desired_factor`; it never deviates from the
    /// request by more than a factor of `sqrt(desired_factor)`.
    ///
    /// # Panics
    ///
    /// Panics if `granularity` is not a power of two, if `min_alloc` is
    /// smaller than `granularity`, or if `desired_factor` is outside `(1, 2]`.
    #[must_use]
    pub fn new(granularity: u32, desired_factor: f32, min_alloc: u32) -> Self {
        assert!(
            granularity.is_power_of_two(),
            "granularity must be a power of two, got {granularity}"
        );
        assert!(
            min_alloc >= granularity,
            "the smallest class size {min_alloc} must be at least the granularity {granularity}"
        );
        assert!(
            desired_factor > 1.0 && desired_factor <= 2.0,
            "growth factor must lie in (1, 2], got {desired_factor}"
        );

        let ln2 = std::f32::consts::LN_2;

        // Round log2(log 2 / log factor) to the nearest integer: the exponent
        // k for which 2^(1/2^k) is log-closest to the requested factor.
        let effective_bits = ((ln2 / desired_factor.ln()).ln() / ln2 + 0.5) as u32;
        let effective_size = 1_u32 << effective_bits;

        let actual_factor = 2_f32.powf(1.0 / effective_size as f32);

        Self {
            granularity,
            ignore_bits: granularity.trailing_zeros(),
            effective_bits,
            effective_size,
            effective_mask: effective_size - 1,
            size_shift: min_alloc - granularity,
            size_shift_plus_1: min_alloc - granularity + 1,
            min_alloc,
            requested_factor: desired_factor,
            actual_factor,
        }
    }

    /// The alignment unit of class sizes.
    #[must_use]
    pub fn granularity(&self) -> u32 {
        self.granularity
    }

    /// The size of the smallest class.
    #[must_use]
    pub fn min_alloc(&self) -> u32 {
        self.min_alloc
    }

    /// The factor the caller asked for.
    #[must_use]
    pub fn requested_factor(&self) -> f32 {
        self.requested_factor
    }

    /// The realised geometric growth factor, of the form `2^(1/2^k)`.
    #[must_use]
    pub fn actual_factor(&self) -> f32 {
        self.actual_factor
    }

    /// Number of classes in the incremental region; class sizes double every
    /// this many classes in the geometric region.
    #[must_use]
    pub fn effective_size(&self) -> u32 {
        self.effective_size
    }

    /// The smallest class whose size covers `size`.
    ///
    /// Sizes up to the smallest class size map to class 0.
    #[must_use]
    pub fn class_for(&self, size: u32) -> u32 {
        // Rebase so that class 0 covers (0, min_alloc] and round up to the
        // granularity grid; a lone wrapping comparison stands in for an
        // underflow branch.
        let rebased = size.wrapping_sub(self.size_shift_plus_1);
        let rebased = if rebased > size { 0 } else { rebased };
        let units = rebased >> self.ignore_bits;

        // Position of the highest significant bit, floored at effective_bits
        // so the incremental region falls out of the same formula.
        let log2 = 31 - (units | self.effective_size).leading_zeros();

        let linear_part = units >> (log2 - self.effective_bits);
        let log2_part = (log2 - self.effective_bits) << self.effective_bits;

        linear_part + log2_part
    }

    /// The object size of class `class`: the largest size that maps to it.
    #[must_use]
    pub fn size_for(&self, class: u32) -> u32 {
        let class = class + 1;

        let linear_part = class & self.effective_mask;
        let pow = class >> self.effective_bits;

        // In the geometric region the implicit leading bit joins the linear
        // part and the run index scales it; the incremental region is the
        // linear part alone.
        let units = if pow == 0 {
            linear_part
        } else {
            (self.effective_size | linear_part) << (pow - 1)
        };

        (units << self.ignore_bits) + self.size_shift
    }
}
