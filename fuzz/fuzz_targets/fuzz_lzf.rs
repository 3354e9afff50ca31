#![no_main]

use ferrite_import::rdb::lzf_decompress;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // First two bytes pick the expected length, the rest is the block.
    if data.len() < 2 {
        return;
    }
    let expected = u16::from_le_bytes([data[0], data[1]]) as usize;
    if let Ok(out) = lzf_decompress(&data[2..], expected) {
        assert_eq!(out.len(), expected);
    }
});
