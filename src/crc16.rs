/// Initial value of every CRC16 computation.
pub const CRC16_INIT: u16 = 0xFFFF;

/// Feed a single byte into a running CRC16 (reflected polynomial 0xA001).
///
/// This is the incremental form used when data is streamed from the device byte by byte.
#[inline]
pub const fn crc16_update(mut crc: u16, byte: u8) -> u16 {
    crc ^= byte as u16;
    let mut i = 0;
    while i < 8 {
        if crc & 1 != 0 {
            crc = (crc >> 1) ^ 0xA001;
        } else {
            crc >>= 1;
        }
        i += 1;
    }
    crc
}

/// CRC-16/MODBUS over `data`: polynomial 0x8005 (bit-reversed 0xA001), init 0xFFFF, no final xor.
///
/// Every checksum on the device uses it.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(CRC16_INIT, |crc, &byte| crc16_update(crc, byte))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(crc16(b"123456789"), 0x4B37);
    }

    #[test]
    fn tag_with_terminator() {
        assert_eq!(crc16(b"SUPLA\0"), 62432);
    }

    #[test]
    fn empty_input_is_init() {
        assert_eq!(crc16(&[]), CRC16_INIT);
    }

    #[test]
    fn incremental_matches_oneshot() {
        let data = b"state storage";
        let crc = data.iter().fold(CRC16_INIT, |crc, &b| crc16_update(crc, b));
        assert_eq!(crc, crc16(data));
    }
}
