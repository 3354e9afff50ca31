//! LZF decompression.
//!
//! LZF is the byte-oriented scheme Redis uses for compressed strings in
//! snapshots. Control bytes below 32 start a literal run; anything else is a
//! back-reference into output that has already been produced.

use super::{RdbError, Result};

/// Control bytes below this value introduce a literal run.
const LITERAL_THRESHOLD: usize = 32;

/// Expand `input` into exactly `expected_len` bytes.
///
/// Fails if a run or reference reaches past either buffer, or if the
/// expanded size differs from `expected_len`.
pub fn lzf_decompress(input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    // A back-reference expands 3 input bytes to at most 264 output bytes.
    let mut output = Vec::with_capacity(expected_len.min(input.len().saturating_mul(88)));
    let mut ip = 0;

    while ip < input.len() {
        let ctrl = input[ip] as usize;
        ip += 1;

        if ctrl < LITERAL_THRESHOLD {
            // Literal run: copy ctrl + 1 bytes verbatim
            let count = ctrl + 1;
            if ip + count > input.len() {
                return Err(RdbError::Compression(format!(
                    "literal run of {} bytes overruns input at offset {}",
                    count, ip
                )));
            }
            output.extend_from_slice(&input[ip..ip + count]);
            ip += count;
        } else {
            let mut len = ctrl >> 5;
            if len == 7 {
                let ext = *input
                    .get(ip)
                    .ok_or_else(|| RdbError::Compression("truncated length byte".into()))?;
                len += ext as usize;
                ip += 1;
            }
            len += 2;

            let low = *input
                .get(ip)
                .ok_or_else(|| RdbError::Compression("truncated offset byte".into()))?;
            ip += 1;
            let offset = ((ctrl & 0x1f) << 8) | low as usize;

            let start = output.len().checked_sub(offset + 1).ok_or_else(|| {
                RdbError::Compression(format!(
                    "back-reference {} bytes before start of output",
                    offset + 1
                ))
            })?;

            // Byte-by-byte: the source range may overlap what this copy writes.
            for i in 0..len {
                let byte = output[start + i];
                output.push(byte);
            }
        }

        if output.len() > expected_len {
            return Err(RdbError::Compression(format!(
                "output exceeds declared length {}",
                expected_len
            )));
        }
    }

    if output.len() != expected_len {
        return Err(RdbError::Compression(format!(
            "expanded to {} bytes, expected {}",
            output.len(),
            expected_len
        )));
    }

    Ok(output)
}
