// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! Miscellaneous utility functions

use core::ops::{Add, BitAnd, Div, Not, Sub};

/// Aligns an integer type to a power of two.
pub(crate) fn align<T>(a: T, b: T) -> T
where
    T: Copy
        + Default
        + BitAnd<Output = T>
        + Not<Output = T>
        + Add<Output = T>
        + Sub<Output = T>
        + Div<Output = T>
        + core::cmp::PartialEq,
{
    let def: T = Default::default();
    #[allow(clippy::eq_op)]
    let one: T = !def / !def;

    assert!((b & (b - one)) == def);

    (a + b - one) & !(b - one)
}

/// Integer division rounding up.
pub(crate) fn div_ceil<T>(a: T, b: T) -> T
where
    T: Copy
        + Default
        + BitAnd<Output = T>
        + Not<Output = T>
        + Add<Output = T>
        + Sub<Output = T>
        + Div<Output = T>,
{
    let def: T = Default::default();
    #[allow(clippy::eq_op)]
    let one: T = !def / !def;

    (a + b - one) / b
}

/// Rounds up to the next power of two, or `None` on overflow.
pub(crate) fn roundup_pow_of_two(a: u32) -> Option<u32> {
    a.max(1).checked_next_power_of_two()
}

/// Lower 32 bits of a 64-bit value.
#[inline(always)]
pub(crate) fn lo32(v: u64) -> u32 {
    v as u32
}

/// Upper 32 bits of a 64-bit value.
#[inline(always)]
pub(crate) fn hi32(v: u64) -> u32 {
    (v >> 32) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(align(0x1001u64, 0x1000), 0x2000);
        assert_eq!(div_ceil(200u32, 50), 4);
        assert_eq!(div_ceil(201u32, 50), 5);
        assert_eq!(roundup_pow_of_two(6), Some(8));
        assert_eq!(roundup_pow_of_two(8), Some(8));
        assert_eq!(roundup_pow_of_two(0), Some(1));
        assert_eq!(roundup_pow_of_two(u32::MAX), None);
    }
}
