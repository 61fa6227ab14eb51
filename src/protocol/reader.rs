//! Bounds-checked byte reader for fixed-layout protocol structures.
//!
//! Every manual length/offset computation in the crate (SMB2 bodies, DER
//! tokens, NTLM messages, directory-entry chains) goes through this cursor
//! so an out-of-range read becomes a typed error instead of a slice panic.

use crate::error::{Error, Result};

/// Forward-only reader over a byte slice.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn short(&self, need: usize) -> Error {
        Error::Wire(format!(
            "buffer too short: need {} bytes at offset {}, have {}",
            need,
            self.pos,
            self.remaining()
        ))
    }

    /// Take `n` bytes or fail without touching the cursor.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(self.short(n));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Slice `len` bytes at an absolute offset, independent of the cursor.
    /// Used for offset/length field pairs that point elsewhere in the
    /// message.
    pub fn slice_at(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| Error::Wire("offset arithmetic overflow".into()))?;
        if end > self.buf.len() {
            return Err(Error::Wire(format!(
                "field at {}..{} extends beyond {}-byte buffer",
                offset,
                end,
                self.buf.len()
            )));
        }
        Ok(&self.buf[offset..end])
    }
}

/// Decode a UTF-16LE byte run into a `String`, dropping a trailing odd byte.
pub fn utf16_le_to_string(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Encode a string as UTF-16LE bytes.
pub fn string_to_utf16_le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_advance() {
        let data = [0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0xFF];
        let mut r = ByteReader::new(&data);
        assert_eq!(r.read_u16_le().unwrap(), 1);
        assert_eq!(r.read_u32_le().unwrap(), 2);
        assert_eq!(r.read_u8().unwrap(), 0xFF);
        assert!(r.is_empty());
    }

    #[test]
    fn test_short_read_is_error() {
        let mut r = ByteReader::new(&[0x01]);
        assert!(r.read_u32_le().is_err());
        // Cursor unchanged after the failed read
        assert_eq!(r.read_u8().unwrap(), 0x01);
    }

    #[test]
    fn test_slice_at_bounds() {
        let r = ByteReader::new(&[0, 1, 2, 3]);
        assert_eq!(r.slice_at(1, 2).unwrap(), &[1, 2]);
        assert!(r.slice_at(2, 3).is_err());
        assert!(r.slice_at(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_utf16_roundtrip() {
        let bytes = string_to_utf16_le("IPC$");
        assert_eq!(bytes.len(), 8);
        assert_eq!(utf16_le_to_string(&bytes), "IPC$");
    }
}
