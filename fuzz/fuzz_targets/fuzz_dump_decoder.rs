#![no_main]

use ferrite_import::rdb::DumpDecoder;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary snapshot bytes must decode to entries or an error, never a panic.
    if let Ok(decoder) = DumpDecoder::new(data) {
        for entry in decoder.with_now_ms(0) {
            if entry.is_err() {
                break;
            }
        }
    }
});
