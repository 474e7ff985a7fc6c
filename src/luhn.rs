//! Mod-10 (Luhn) checksum used to accept order numbers.

/// Returns `true` when `number` is at least two ASCII digits long and its
/// Luhn checksum is a multiple of 10.
pub fn validate(number: &str) -> bool {
    if number.len() < 2 {
        return false;
    }

    let mut sum = 0u32;
    for (position, byte) in number.bytes().rev().enumerate() {
        if !byte.is_ascii_digit() {
            return false;
        }
        let mut digit = u32::from(byte - b'0');
        if position % 2 == 1 {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
    }

    sum % 10 == 0
}
