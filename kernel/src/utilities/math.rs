// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Helper functions for common mathematical operations.

/// Get log base 2 of a number.
///
/// Returns 0 for an input of 0. For numbers that are not a power of two the
/// result is rounded down. 64 bits wide so the 4 GiB address space fits.
pub fn log_base_two_u64(num: u64) -> u32 {
    if num == 0 {
        0
    } else {
        63 - num.leading_zeros()
    }
}

/// `2^n` as a 64-bit value. `n` must be below 64.
pub const fn power_of_two(n: u32) -> u64 {
    1_u64 << n
}

/// Whether `start` is a multiple of `size`. `size` must be non-zero.
pub const fn is_aligned(start: u64, size: u64) -> bool {
    start % size == 0
}

/// Subregion disable mask that leaves exactly the subregions in the inclusive
/// range `[min_subregion, max_subregion]` enabled.
///
/// A `1` bit disables the corresponding eighth of a region.
pub fn subregion_mask(min_subregion: usize, max_subregion: usize) -> u8 {
    // Start with all subregions disabled and enable the requested ones bit by
    // bit (1 ^ 1 == 0).
    (min_subregion..=max_subregion.min(7)).fold(u8::MAX, |mask, i| mask ^ (1 << i))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_base_two_rounds_down() {
        assert_eq!(log_base_two_u64(0), 0);
        assert_eq!(log_base_two_u64(1), 0);
        assert_eq!(log_base_two_u64(32), 5);
        assert_eq!(log_base_two_u64(33), 5);
        assert_eq!(log_base_two_u64(0x8000_0000), 31);
        assert_eq!(log_base_two_u64(1 << 32), 32);
    }

    #[test]
    fn subregion_masks() {
        assert_eq!(subregion_mask(0, 7), 0x00);
        assert_eq!(subregion_mask(0, 6), 0x80);
        assert_eq!(subregion_mask(1, 7), 0x01);
        assert_eq!(subregion_mask(2, 3), 0xF3);
    }

    #[test]
    fn alignment() {
        assert!(is_aligned(0x2000_0000, power_of_two(13)));
        assert!(!is_aligned(0x2000_1000, power_of_two(13)));
        assert!(is_aligned(0, power_of_two(32)));
    }
}
