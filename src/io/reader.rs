//! Random-access byte sources and the slice/chain combinators over them.

use std::sync::Arc;

use crate::error::{DiffError, ErrorKind, Result};

/// Random-access read of a fixed-size byte range.
///
/// `read_some` may return fewer bytes than `buffer.len()` even before the
/// end of the reader (mirrors `std::io::Read::read`); callers that need an
/// exact fill use [`Reader::read_exact`].
pub trait Reader: Send + Sync {
    fn size(&self) -> u64;
    fn read_some(&self, offset: u64, buffer: &mut [u8]) -> Result<usize>;
}

/// Object-safe reader handle, cheap to clone and share across threads.
pub type SharedReader = Arc<dyn Reader>;

pub trait ReaderExt: Reader {
    fn read_exact(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buffer.len() {
            let n = self.read_some(offset + filled as u64, &mut buffer[filled..])?;
            if n == 0 {
                return Err(DiffError::new(
                    ErrorKind::IoReaderReadFailure,
                    format!(
                        "short read at offset {}: wanted {} more bytes, got 0",
                        offset + filled as u64,
                        buffer.len() - filled
                    ),
                ));
            }
            filled += n;
        }
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.size() as usize];
        self.read_exact(0, &mut out)?;
        Ok(out)
    }
}

impl<T: Reader + ?Sized> ReaderExt for T {}

/// A view into `[offset, offset+length)` of a parent reader, without copying.
pub struct SliceReader {
    parent: SharedReader,
    offset: u64,
    length: u64,
}

impl SliceReader {
    pub fn new(parent: SharedReader, offset: u64, length: u64) -> Result<Self> {
        let end = offset.checked_add(length).ok_or_else(|| {
            DiffError::new(
                ErrorKind::IoDeviceNewEndPastSize,
                format!("slice offset {} + length {} overflows", offset, length),
            )
        })?;
        if end > parent.size() {
            return Err(DiffError::new(
                ErrorKind::IoDeviceNewEndPastSize,
                format!("slice [{}, {}) exceeds parent size {}", offset, end, parent.size()),
            ));
        }
        Ok(Self {
            parent,
            offset,
            length,
        })
    }
}

impl Reader for SliceReader {
    fn size(&self) -> u64 {
        self.length
    }

    fn read_some(&self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        if offset > self.length {
            return Err(DiffError::new(
                ErrorKind::IoReaderSliceBoundError,
                format!("read offset {} past slice length {}", offset, self.length),
            ));
        }
        let remaining = (self.length - offset) as usize;
        let want = buffer.len().min(remaining);
        if want == 0 {
            return Ok(0);
        }
        self.parent
            .read_some(self.offset + offset, &mut buffer[..want])
    }
}

/// Concatenation of several readers, addressed as one contiguous range.
///
/// Segments are kept as a sorted `(cumulative_offset, reader)` array; reads
/// binary-search the starting segment and continue across boundaries.
pub struct ChainReader {
    segments: Vec<(u64, SharedReader)>,
    total: u64,
}

impl ChainReader {
    pub fn new(readers: Vec<SharedReader>) -> Self {
        let mut segments = Vec::with_capacity(readers.len());
        let mut cumulative = 0u64;
        for r in readers {
            segments.push((cumulative, r.clone()));
            cumulative += r.size();
        }
        Self {
            segments,
            total: cumulative,
        }
    }

    /// Index of the segment that contains `offset`, or the last segment if
    /// `offset == total` (used only by callers that already checked bounds).
    fn segment_at(&self, offset: u64) -> usize {
        match self
            .segments
            .binary_search_by(|(start, _)| start.cmp(&offset))
        {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        }
    }
}

impl Reader for ChainReader {
    fn size(&self) -> u64 {
        self.total
    }

    fn read_some(&self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        if buffer.is_empty() || offset >= self.total {
            return Ok(0);
        }
        let idx = self.segment_at(offset);
        let (start, reader) = &self.segments[idx];
        let local_offset = offset - start;
        reader.read_some(local_offset, buffer)
    }
}

/// Convenience constructors for `reader.slice(...)` / `reader.chain(...)`
/// style composition.
pub trait ReaderCompose: Reader {}

pub fn slice(parent: SharedReader, offset: u64, length: u64) -> Result<SharedReader> {
    Ok(Arc::new(SliceReader::new(parent, offset, length)?))
}

pub fn chain(readers: Vec<SharedReader>) -> SharedReader {
    Arc::new(ChainReader::new(readers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::buffer::BufferReader;

    fn reader(bytes: &[u8]) -> SharedReader {
        Arc::new(BufferReader::new(bytes.to_vec()))
    }

    #[test]
    fn slice_matches_direct_read() {
        let data = b"abcdefghijklmnopqrstuvwxyz";
        let r = reader(data);
        let sliced = slice(r.clone(), 5, 10).unwrap();
        assert_eq!(sliced.read_all().unwrap(), &data[5..15]);
    }

    #[test]
    fn chain_is_concatenation() {
        let a = reader(b"abc");
        let b = reader(b"def");
        let joined = chain(vec![a, b]);
        assert_eq!(joined.size(), 6);
        assert_eq!(joined.read_all().unwrap(), b"abcdef");
    }

    #[test]
    fn chain_read_crosses_segment_boundary() {
        let a = reader(b"ab");
        let b = reader(b"cde");
        let c = reader(b"f");
        let joined = chain(vec![a, b, c]);
        let mut buf = [0u8; 4];
        let n = joined.read_some(1, &mut buf).unwrap();
        // single segment reads don't span boundaries; caller loops via read_exact
        assert!(n >= 1);
        let mut out = vec![0u8; 6];
        joined.read_exact(0, &mut out).unwrap();
        assert_eq!(out, b"abcdef");
    }

    #[test]
    fn slice_out_of_bounds_rejected() {
        let r = reader(b"abc");
        assert!(slice(r, 2, 5).is_err());
    }

    #[test]
    fn slice_offset_plus_length_overflow_rejected() {
        let r = reader(b"abc");
        let err = match slice(r, u64::MAX - 1, 10) {
            Ok(_) => panic!("expected an overflowing slice range to be rejected"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), ErrorKind::IoDeviceNewEndPastSize);
    }
}
