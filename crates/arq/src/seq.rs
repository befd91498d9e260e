//! Wraparound-safe arithmetic for sequence numbers and millisecond timestamps.
//!
//! Both live in `u32` space and are expected to wrap on long-lived
//! connections. Ordering is decided by the signed distance between two
//! values, never by their raw magnitude:
//!
//! ```text
//!        1          2          3
//!   ----------|----------|----------
//!          RCV.NXT    RCV.NXT
//!                    +RCV.WND
//!
//! 1 - already delivered, re-acknowledged but otherwise dropped
//! 2 - accepted into the receive ring
//! 3 - beyond current capacity, dropped
//! ```

/// Signed distance from `b` to `a`, i.e. `a - b` interpreted modulo 2^32.
#[inline]
pub(crate) fn diff(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

/// `a` comes strictly before `b`.
#[inline]
pub(crate) fn before(a: u32, b: u32) -> bool {
    diff(a, b) < 0
}

/// `a` comes at or after `b`.
#[inline]
pub(crate) fn at_or_after(a: u32, b: u32) -> bool {
    diff(a, b) >= 0
}

/// `value` lies in the half open range `[start, start + len)`.
#[inline]
pub(crate) fn in_window(value: u32, start: u32, len: u32) -> bool {
    value.wrapping_sub(start) < len
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ordering_across_wrap() {
        assert!(before(u32::MAX, 0));
        assert!(before(u32::MAX - 5, 3));
        assert!(at_or_after(2, u32::MAX));
        assert_eq!(diff(1, u32::MAX), 2);
        assert_eq!(diff(u32::MAX, 1), -2);
    }

    #[test]
    fn test_window_membership() {
        assert!(in_window(10, 10, 1));
        assert!(!in_window(11, 10, 1));
        assert!(!in_window(9, 10, 32));
        assert!(in_window(3, u32::MAX - 2, 8));
        assert!(!in_window(5, u32::MAX - 2, 8));
    }

    proptest! {
        #[test]
        fn distance_is_translation_invariant(base: u32, offset in 0u32..1 << 30, shift: u32) {
            let a = base.wrapping_add(offset);
            prop_assert_eq!(diff(a, base), offset as i32);
            prop_assert_eq!(
                diff(a.wrapping_add(shift), base.wrapping_add(shift)),
                offset as i32
            );
            prop_assert!(at_or_after(a, base));
        }
    }
}
