//! Flag-word helpers. OpenFlow 1.0 packs every bitmap into a `u32`.

/// Return `x` with bit `bit` switched on if `toggle` is true, otherwise off.
pub fn set_bit(bit: u32, x: u32, toggle: bool) -> u32 {
    if toggle {
        x | (1 << bit)
    } else {
        x & !(1 << bit)
    }
}

/// Test whether bit `bit` of `x` is set.
pub fn test_bit(bit: u32, x: u32) -> bool {
    (x >> bit) & 1 == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear() {
        assert_eq!(set_bit(3, 0, true), 0b1000);
        assert_eq!(set_bit(3, 0b1010, false), 0b0010);
        assert!(test_bit(1, 0b10));
        assert!(!test_bit(0, 0b10));
    }
}
