//! CRC16 used by TI transponders: reflected CCITT polynomial (0x8408), seed 0.

/// Folds one byte into the running CRC.
pub(crate) fn crc16_update(crc: u16, data: u8) -> u16 {
    let mut d = data as u16;
    d ^= lo8(crc);
    d ^= d << 4;
    d = (d as u8) as u16;

    ((d << 8) | hi8(crc)) ^ (((d >> 4) as u8) as u16) ^ (d << 3)
}

/// CRC16 over `bytes` starting from a zero seed.
pub(crate) fn crc16(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0, |crc, &b| crc16_update(crc, b))
}

fn lo8(x: u16) -> u16 {
    x & 0xff
}

fn hi8(x: u16) -> u16 {
    x >> 8
}

#[cfg(test)]
mod tests {
    use super::*;

    // Bitwise form of the same polynomial, processed LSB first.
    fn crc16_bitwise(bytes: &[u8]) -> u16 {
        let mut crc: u16 = 0;
        for &b in bytes {
            crc ^= b as u16;
            for _ in 0..8 {
                crc = if crc & 1 != 0 { (crc >> 1) ^ 0x8408 } else { crc >> 1 };
            }
        }
        crc
    }

    #[test]
    fn test_table_free_update_matches_bitwise_form() {
        let id: u64 = 0x0000_0000_1234_5678;
        let bytes = id.to_le_bytes();
        assert_eq!(crc16(&bytes), crc16_bitwise(&bytes));
    }

    #[test]
    fn test_kermit_check_value() {
        // CRC-16/KERMIT check value for "123456789".
        assert_eq!(crc16(b"123456789"), 0x2189);
    }

    #[test]
    fn test_zero_input_keeps_zero_crc() {
        assert_eq!(crc16(&[0u8; 8]), 0);
    }
}
