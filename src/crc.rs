//! Half-byte table CRCs. All three variants are reflected and chainable: feeding the result of one
//! call as `prev` into the next yields the CRC of the concatenated input.

const CRC8_TABLE: [u8; 16] = [
    0x00, 0x9D, 0x23, 0xBE, 0x46, 0xDB, 0x65, 0xF8, 0x8C, 0x11, 0xAF, 0x32, 0xCA, 0x57, 0xE9, 0x74,
];

const CRC16_TABLE: [u16; 16] = [
    0x0000, 0xCC01, 0xD801, 0x1400, 0xF001, 0x3C00, 0x2800, 0xE401, 0xA001, 0x6C00, 0x7800, 0xB401,
    0x5000, 0x9C01, 0x8801, 0x4400,
];

const CRC32_TABLE: [u32; 16] = [
    0x0000_0000, 0x1DB7_1064, 0x3B6E_20C8, 0x26D9_30AC, 0x76DC_4190, 0x6B6B_51F4, 0x4DB2_6158,
    0x5005_713C, 0xEDB8_8320, 0xF00F_9344, 0xD6D6_A3E8, 0xCB61_B38C, 0x9B64_C2B0, 0x86D3_D2D4,
    0xA00A_E278, 0xBDBD_F21C,
];

/// CRC-8/MAXIM (poly 0x31 reflected, init 0, no final xor).
pub fn crc8(prev: u8, data: &[u8]) -> u8 {
    data.iter().fold(prev, |crc, &byte| {
        let crc = (crc >> 4) ^ CRC8_TABLE[((crc ^ byte) & 0x0F) as usize];
        (crc >> 4) ^ CRC8_TABLE[((crc ^ (byte >> 4)) & 0x0F) as usize]
    })
}

/// CRC-16/ARC (poly 0x8005 reflected, init 0, no final xor).
pub fn crc16(prev: u16, data: &[u8]) -> u16 {
    data.iter().fold(prev, |crc, &byte| {
        let crc = (crc >> 4) ^ CRC16_TABLE[((crc ^ byte as u16) & 0x0F) as usize];
        (crc >> 4) ^ CRC16_TABLE[((crc ^ (byte >> 4) as u16) & 0x0F) as usize]
    })
}

/// CRC-32/ISO-HDLC. Start a new checksum with `prev = 0`.
pub fn crc32(prev: u32, data: &[u8]) -> u32 {
    !data.iter().fold(!prev, |crc, &byte| {
        let crc = (crc >> 4) ^ CRC32_TABLE[((crc ^ byte as u32) & 0x0F) as usize];
        (crc >> 4) ^ CRC32_TABLE[((crc ^ (byte >> 4) as u32) & 0x0F) as usize]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK: &[u8] = b"123456789";

    #[test]
    fn check_values() {
        assert_eq!(crc8(0, CHECK), 0xA1);
        assert_eq!(crc16(0, CHECK), 0xBB3D);
        assert_eq!(crc32(0, CHECK), 0xCBF4_3926);
    }

    #[test]
    fn empty_input_keeps_prev() {
        assert_eq!(crc8(0x5A, &[]), 0x5A);
        assert_eq!(crc16(0x1234, &[]), 0x1234);
        assert_eq!(crc32(0xDEAD_BEEF, &[]), 0xDEAD_BEEF);
    }

    #[test]
    fn chaining() {
        let (head, tail) = CHECK.split_at(4);
        assert_eq!(crc8(crc8(0, head), tail), crc8(0, CHECK));
        assert_eq!(crc16(crc16(0, head), tail), crc16(0, CHECK));
        assert_eq!(crc32(crc32(0, head), tail), crc32(0, CHECK));
    }
}
