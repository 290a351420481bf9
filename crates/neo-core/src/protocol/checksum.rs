//! Additive checksums used on the wire.

/// Sum of all bytes, modulo 2^16. Used for block transfers.
pub fn checksum16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |acc, &b| acc.wrapping_add(b as u16))
}

/// Sum of all bytes, modulo 256. Used for message frames.
pub fn checksum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum16_wraps() {
        let data = vec![0xffu8; 300];
        assert_eq!(checksum16(&data), ((300u32 * 0xff) & 0xffff) as u16);
        assert_eq!(checksum16(&[]), 0);
    }

    #[test]
    fn test_checksum8() {
        assert_eq!(checksum8(&[0x80, 0x80, 0x01]), 0x01);
    }
}
