//! Integer helpers for packed-layout and work-group arithmetic.

/// Integer division rounding up. `b` must be non-zero.
#[inline]
pub const fn ceil_div(a: usize, b: usize) -> usize {
    a.div_ceil(b)
}

/// Largest power of two that is `<= n`.
///
/// Doubles a lane count until it exceeds `n` and steps back once, so
/// `floor_pow2(0)` is 1 (a work-group always has at least one lane).
pub fn floor_pow2(n: u32) -> u32 {
    let limit = u64::from(n);
    let mut size: u64 = 1;
    loop {
        size <<= 1;
        if size > limit {
            break;
        }
    }
    (size >> 1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn highest_set_bit(n: u32) -> u32 {
        1 << (u32::BITS - 1 - n.leading_zeros())
    }

    #[test]
    fn ceil_div_rounds_up() {
        assert_eq!(ceil_div(0, 4), 0);
        assert_eq!(ceil_div(1, 4), 1);
        assert_eq!(ceil_div(4, 4), 1);
        assert_eq!(ceil_div(5, 4), 2);
        assert_eq!(ceil_div(512, 4), 128);
    }

    #[test]
    fn floor_pow2_small_values() {
        assert_eq!(floor_pow2(0), 1);
        assert_eq!(floor_pow2(1), 1);
        assert_eq!(floor_pow2(2), 2);
        assert_eq!(floor_pow2(3), 2);
        assert_eq!(floor_pow2(127), 64);
        assert_eq!(floor_pow2(128), 128);
        assert_eq!(floor_pow2(1000), 512);
    }

    #[test]
    fn floor_pow2_matches_highest_set_bit() {
        for n in 1..=65_536u32 {
            assert_eq!(floor_pow2(n), highest_set_bit(n), "n={n}");
        }
    }

    #[test]
    fn floor_pow2_does_not_overflow_at_top_of_range() {
        assert_eq!(floor_pow2(u32::MAX), 1 << 31);
        assert_eq!(floor_pow2(1 << 31), 1 << 31);
    }
}
