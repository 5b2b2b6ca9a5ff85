//! Probing and sizing rules shared by the registry table and the
//! per-referent referrer sets.
//!
//! Both levels are open addressed with linear probing and wraparound.
//! Deletion overwrites with a nil/free marker instead of a tombstone, and
//! every resize rehashes from scratch, so lookups must keep probing past
//! holes; the recorded worst-case displacement lets them give up after
//! `max_displacement + 1` slots instead of scanning the whole array.

#[inline]
pub(crate) fn home_index(hash: usize, mask: usize) -> usize {
    hash & mask
}

// grow before an insert would push occupancy above 3/4 of capacity
#[inline]
pub(crate) fn over_high_water(len: usize, capacity: usize) -> bool {
    (len + 1) * 4 > capacity * 3
}

// shrink after a removal drops occupancy below 1/4 of capacity,
// never below `floor`
#[inline]
pub(crate) fn under_low_water(len: usize, capacity: usize, floor: usize) -> bool {
    capacity > floor && len * 4 < capacity
}

#[cfg(test)]
mod tests {
    use super::{over_high_water, under_low_water};

    #[test]
    fn high_water_is_three_quarters() {
        assert!(!over_high_water(5, 8), "6/8 occupancy is allowed");
        assert!(over_high_water(6, 8), "7/8 occupancy must trigger a grow");
    }

    #[test]
    fn low_water_respects_floor() {
        assert!(under_low_water(3, 16, 8));
        assert!(!under_low_water(4, 16, 8), "4/16 is exactly 1/4, no shrink");
        assert!(!under_low_water(0, 8, 8), "never shrink below the floor");
    }
}
