//! CRC-16/XMODEM checksum.
//!
//! Polynomial 0x1021, initial value 0, no reflection, no final XOR.
//! The bootROM validates every frame with this exact parameterization,
//! so a frame followed by its big-endian CRC sums to a zero residual.

/// Compute the CRC-16/XMODEM checksum of `data`.
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
