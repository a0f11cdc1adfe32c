//! Bit-flag packer: single booleans stored as bits 0..=7 of a byte.

use crate::error::{CodecError, Result};

fn check_index(bit: u8) -> Result<()> {
    if bit > 7 {
        return Err(CodecError::Range(format!("bit index {} outside [0, 7]", bit)));
    }
    Ok(())
}

/// Read bit `bit` of `byte`.
pub fn get_flag(byte: u8, bit: u8) -> Result<bool> {
    check_index(bit)?;
    Ok(byte & (1 << bit) != 0)
}

/// Return `byte` with bit `bit` set to `value`.
pub fn set_flag(byte: u8, bit: u8, value: bool) -> Result<u8> {
    check_index(bit)?;
    let mask = 1 << bit;
    Ok(if value { byte | mask } else { byte & !mask })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_each_bit() {
        for bit in 0..8 {
            let b = set_flag(0, bit, true).unwrap();
            assert_eq!(b, 1 << bit);
            assert!(get_flag(b, bit).unwrap());
            assert_eq!(set_flag(b, bit, false).unwrap(), 0);
        }
    }

    #[test]
    fn clearing_keeps_other_bits() {
        assert_eq!(set_flag(0xFF, 2, false).unwrap(), 0xFB);
        assert!(!get_flag(0xFB, 2).unwrap());
        assert!(get_flag(0xFB, 3).unwrap());
    }

    #[test]
    fn index_out_of_range() {
        assert!(matches!(get_flag(0, 8), Err(CodecError::Range(_))));
        assert!(matches!(set_flag(0, 9, true), Err(CodecError::Range(_))));
    }
}
