//! CRC-64/Jones checksum used in `DUMP` payload trailers.
//!
//! Reflected polynomial `0xad93d23594c935a9` (stored bit-reversed), zero
//! initial value, no final xor. Matches the `crc64()` shipped with Redis.

const POLY_REFLECTED: u64 = 0x95AC_9329_AC4B_C9B5;

static CRC64_TABLE: [u64; 256] = build_table();

const fn build_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u64;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 == 1 {
                (crc >> 1) ^ POLY_REFLECTED
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Continue a checksum over `data` starting from a previous value.
pub fn crc64_update(mut crc: u64, data: &[u8]) -> u64 {
    for &byte in data {
        crc = CRC64_TABLE[((crc ^ byte as u64) & 0xFF) as usize] ^ (crc >> 8);
    }
    crc
}

/// Checksum of `data`.
pub fn crc64(data: &[u8]) -> u64 {
    crc64_update(0, data)
}
