// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

/// Index of the highest set bit. `value` must be non-zero.
#[inline]
pub fn floor_log2(value: u32) -> u32 {
    debug_assert!(value != 0);
    31 - value.leading_zeros()
}

#[inline]
pub fn ceil_log2(value: u32) -> u32 {
    if value < 2 { 0 } else { floor_log2(value - 1) + 1 }
}

#[inline]
pub fn clip3<T: PartialOrd>(low: T, high: T, value: T) -> T {
    if value < low {
        low
    } else if value > high {
        high
    } else {
        value
    }
}

#[inline]
pub fn right_shift_with_rounding(value: i32, bits: u32) -> i32 {
    if bits == 0 {
        value
    } else {
        (value + (1 << (bits - 1))) >> bits
    }
}

#[inline]
pub fn right_shift_with_rounding_signed(value: i32, bits: u32) -> i32 {
    if value >= 0 {
        right_shift_with_rounding(value, bits)
    } else {
        -right_shift_with_rounding(-value, bits)
    }
}

/// Rounds `value` down to a multiple of `1 << subsampling`.
#[inline]
pub fn align_down_to_subsampling(value: usize, subsampling: u8) -> usize {
    (value >> subsampling) << subsampling
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn logs() {
        assert_eq!(floor_log2(1), 0);
        assert_eq!(floor_log2(32768), 15);
        assert_eq!(floor_log2(65535), 15);
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(5), 3);
        assert_eq!(ceil_log2(8), 3);
    }

    #[test]
    fn rounding() {
        assert_eq!(right_shift_with_rounding(5, 1), 3);
        assert_eq!(right_shift_with_rounding(5, 0), 5);
        assert_eq!(right_shift_with_rounding_signed(-5, 1), -3);
        assert_eq!(clip3(0, 255, 300), 255);
        assert_eq!(clip3(0, 255, -4), 0);
    }
}
