#![no_main]

use ferrite_import::pattern::KeyPattern;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Split at the first NUL: pattern before, key after.
    let split = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    let (pattern, key) = data.split_at(split);
    let Ok(pattern) = std::str::from_utf8(pattern) else {
        return;
    };
    if let Ok(pattern) = KeyPattern::parse(Some(pattern)) {
        let _ = pattern.matches(key);
    }
});
