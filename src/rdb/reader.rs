//! Low-level snapshot reads.
//!
//! [`RdbReader`] wraps any [`Read`] and understands the RDB length and
//! string encodings. While a capture is active every byte consumed is also
//! appended to a buffer, which is how value bodies are copied through
//! verbatim into `DUMP` payloads.

use std::io::{self, Read};

use super::lzf::lzf_decompress;
use super::{
    RdbError, Result, RDB_14BITLEN, RDB_32BITLEN, RDB_64BITLEN, RDB_6BITLEN, RDB_ENCVAL,
    RDB_ENC_INT16, RDB_ENC_INT32, RDB_ENC_INT8, RDB_ENC_LZF,
};

/// A decoded length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    /// A plain length.
    Len(u64),
    /// The object is specially encoded; carries the `RDB_ENC_*` selector.
    Encoded(u8),
}

/// Streaming reader over an RDB byte source.
#[derive(Debug)]
pub struct RdbReader<R> {
    inner: R,
    offset: u64,
    capture: Option<Vec<u8>>,
}

impl<R: Read> RdbReader<R> {
    /// Wrap a byte source.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            capture: None,
        }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Start recording consumed bytes, seeded with `prefix`.
    pub fn begin_capture(&mut self, prefix: &[u8]) {
        self.capture = Some(prefix.to_vec());
    }

    /// Stop recording and return everything recorded.
    pub fn take_capture(&mut self) -> Vec<u8> {
        self.capture.take().unwrap_or_default()
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf)?;
        self.record(buf);
        Ok(())
    }

    fn record(&mut self, buf: &[u8]) {
        self.offset += buf.len() as u64;
        if let Some(capture) = self.capture.as_mut() {
            capture.extend_from_slice(buf);
        }
    }

    /// One byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.fill(&mut buf)?;
        Ok(buf[0])
    }

    /// Little-endian `u32`.
    pub fn read_u32_le(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Little-endian `u64`.
    pub fn read_u64_le(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_u32_be(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    fn read_u64_be(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    /// Read exactly `n` bytes.
    ///
    /// Grows the buffer as data arrives rather than trusting `n` up front,
    /// so a corrupt length cannot force a huge allocation.
    pub fn read_bytes(&mut self, n: u64) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let got = (&mut self.inner).take(n).read_to_end(&mut buf)?;
        if (got as u64) < n {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short read").into());
        }
        self.record(&buf);
        Ok(buf)
    }

    /// Decode an RDB length prefix.
    pub fn read_length_with_encoding(&mut self) -> Result<Length> {
        let byte = self.read_u8()?;
        let enc_type = (byte & 0xC0) >> 6;

        match enc_type {
            RDB_6BITLEN => Ok(Length::Len((byte & 0x3F) as u64)),
            RDB_14BITLEN => {
                let next = self.read_u8()?;
                Ok(Length::Len((((byte & 0x3F) as u64) << 8) | next as u64))
            }
            RDB_ENCVAL => Ok(Length::Encoded(byte & 0x3F)),
            _ if byte == RDB_32BITLEN => Ok(Length::Len(self.read_u32_be()? as u64)),
            _ if byte == RDB_64BITLEN => Ok(Length::Len(self.read_u64_be()?)),
            _ => Err(RdbError::decode(format!("invalid length prefix 0x{:02x}", byte))),
        }
    }

    /// Decode a plain length; a special encoding here is malformed input.
    pub fn read_length(&mut self) -> Result<u64> {
        match self.read_length_with_encoding()? {
            Length::Len(len) => Ok(len),
            Length::Encoded(enc) => Err(RdbError::decode(format!(
                "expected a length, found string encoding {}",
                enc
            ))),
        }
    }

    /// Decode an RDB string.
    ///
    /// Integer encodings come back as their decimal text. LZF blocks are
    /// expanded only when `decompress` is set; otherwise the compressed
    /// bytes are returned untouched.
    pub fn read_string(&mut self, decompress: bool) -> Result<Vec<u8>> {
        let enc = match self.read_length_with_encoding()? {
            Length::Len(len) => return self.read_bytes(len),
            Length::Encoded(enc) => enc,
        };

        match enc {
            RDB_ENC_INT8 => Ok((self.read_u8()? as i8).to_string().into_bytes()),
            RDB_ENC_INT16 => {
                let mut buf = [0u8; 2];
                self.fill(&mut buf)?;
                Ok(i16::from_le_bytes(buf).to_string().into_bytes())
            }
            RDB_ENC_INT32 => Ok((self.read_u32_le()? as i32).to_string().into_bytes()),
            RDB_ENC_LZF => {
                let compressed_len = self.read_length()?;
                let original_len = self.read_length()?;
                let compressed = self.read_bytes(compressed_len)?;
                if decompress {
                    let original_len = usize::try_from(original_len).map_err(|_| {
                        RdbError::Compression(format!("declared length {} too large", original_len))
                    })?;
                    lzf_decompress(&compressed, original_len)
                } else {
                    Ok(compressed)
                }
            }
            other => Err(RdbError::decode(format!("invalid string encoding {}", other))),
        }
    }
}
