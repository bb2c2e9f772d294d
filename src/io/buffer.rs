//! In-memory reader and the all-zeros reader used by the `all_zeros` recipe.

use crate::error::Result;
use crate::io::reader::Reader;

/// A reader over an owned `Vec<u8>`, used for inline assets, the remainder
/// blob and anything else materialized fully in memory.
pub struct BufferReader {
    data: Vec<u8>,
}

impl BufferReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl Reader for BufferReader {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_some(&self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Ok(0);
        }
        let available = &self.data[offset..];
        let n = buffer.len().min(available.len());
        buffer[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }
}

/// Yields `length` zero bytes without allocating them up front.
pub struct ZeroReader {
    length: u64,
}

impl ZeroReader {
    pub fn new(length: u64) -> Self {
        Self { length }
    }
}

impl Reader for ZeroReader {
    fn size(&self) -> u64 {
        self.length
    }

    fn read_some(&self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        if offset >= self.length {
            return Ok(0);
        }
        let remaining = (self.length - offset) as usize;
        let n = buffer.len().min(remaining);
        buffer[..n].fill(0);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::reader::ReaderExt;

    #[test]
    fn buffer_reader_roundtrips() {
        let r = BufferReader::new(b"hello".to_vec());
        assert_eq!(r.read_all().unwrap(), b"hello");
    }

    #[test]
    fn zero_reader_yields_zeros() {
        let r = ZeroReader::new(1000);
        let bytes = r.read_all().unwrap();
        assert_eq!(bytes.len(), 1000);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_reader_partial_read_past_end() {
        let r = ZeroReader::new(4);
        let mut buf = [0xFFu8; 8];
        let n = r.read_some(2, &mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], &[0, 0]);
    }
}
