//! Forward-only byte streams: the other half of the random-access/sequential
//! capability split.

use std::sync::Mutex;

use crate::error::Result;
use crate::io::reader::SharedReader;

/// Forward-only read cursor. `skip` has no default fast path; implementors
/// that can seek cheaply should override it.
pub trait SequentialReader: Send {
    fn read_some(&mut self, buffer: &mut [u8]) -> Result<usize>;
    fn tellg(&self) -> u64;
    fn size(&self) -> u64;

    fn skip(&mut self, mut to_skip: u64) -> Result<()> {
        let mut sink = [0u8; 8192];
        while to_skip > 0 {
            let want = sink.len().min(to_skip as usize);
            let n = self.read_some(&mut sink[..want])?;
            if n == 0 {
                break;
            }
            to_skip -= n as u64;
        }
        Ok(())
    }

    fn read_exact(&mut self, buffer: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buffer.len() {
            let n = self.read_some(&mut buffer[filled..])?;
            if n == 0 {
                return Err(crate::error::DiffError::new(
                    crate::error::ErrorKind::IoReaderReadFailure,
                    format!(
                        "sequential short read: wanted {} more bytes, got 0",
                        buffer.len() - filled
                    ),
                ));
            }
            filled += n;
        }
        Ok(())
    }

    fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = self.read_some(&mut buf)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }
}

pub type BoxedSequentialReader = Box<dyn SequentialReader>;

/// Forward-only sink.
pub trait SequentialWriter: Send {
    fn write(&mut self, buffer: &[u8]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    fn tellp(&self) -> u64;
}

pub type BoxedSequentialWriter = Box<dyn SequentialWriter>;

/// Produces `Box<dyn SequentialReader>` instances on demand. Sequential-kind
/// prepared items hold one of these rather than a stream itself, so the
/// same item can be read more than once (e.g. once per pending slice pass).
pub trait SequentialReaderFactory: Send + Sync {
    fn make_sequential_reader(&self) -> Result<BoxedSequentialReader>;
}

/// Adapts a random-access [`Reader`](crate::io::reader::Reader) into a
/// forward-only stream by tracking a cursor.
pub struct ReaderAsSequential {
    reader: SharedReader,
    position: u64,
}

impl ReaderAsSequential {
    pub fn new(reader: SharedReader) -> Self {
        Self {
            reader,
            position: 0,
        }
    }
}

impl SequentialReader for ReaderAsSequential {
    fn read_some(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let n = self.reader.read_some(self.position, buffer)?;
        self.position += n as u64;
        Ok(n)
    }

    fn tellg(&self) -> u64 {
        self.position
    }

    fn size(&self) -> u64 {
        self.reader.size()
    }

    fn skip(&mut self, to_skip: u64) -> Result<()> {
        self.position = self.position.checked_add(to_skip).ok_or_else(|| {
            crate::error::DiffError::new(
                crate::error::ErrorKind::IoReaderReadFailure,
                format!("skip overflows past current position {}", self.position),
            )
        })?;
        Ok(())
    }
}

/// Accumulates everything written to it in memory; used by `write(writer)`
/// helpers and by tests that need a materialized copy of a stream.
pub struct VecWriter {
    data: Mutex<Vec<u8>>,
}

impl VecWriter {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(Vec::new()),
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data.into_inner().expect("writer mutex poisoned")
    }
}

impl Default for VecWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl SequentialWriter for VecWriter {
    fn write(&mut self, buffer: &[u8]) -> Result<()> {
        self.data.get_mut().expect("writer mutex poisoned").extend_from_slice(buffer);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn tellp(&self) -> u64 {
        self.data.lock().expect("writer mutex poisoned").len() as u64
    }
}

/// Exposes a [`SequentialReader`] as `std::io::Read`, so codec crates that
/// only know the standard `Read` trait (flate2, zstd) can sit on top of one.
pub struct StdReadAdapter {
    inner: BoxedSequentialReader,
}

impl StdReadAdapter {
    pub fn new(inner: BoxedSequentialReader) -> Self {
        Self { inner }
    }
}

impl std::io::Read for StdReadAdapter {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner
            .read_some(buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }
}

/// The inverse: exposes a `std::io::Read` (typically a codec's decoder or
/// encoder, itself wrapping a [`StdReadAdapter`]) as a [`SequentialReader`]
/// with a declared total size.
pub struct StdReadAsSequential<R> {
    inner: R,
    position: u64,
    size: u64,
}

impl<R: std::io::Read + Send> StdReadAsSequential<R> {
    pub fn new(inner: R, size: u64) -> Self {
        Self {
            inner,
            position: 0,
            size,
        }
    }
}

impl<R: std::io::Read + Send> SequentialReader for StdReadAsSequential<R> {
    fn read_some(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let n = self.inner.read(buffer)?;
        self.position += n as u64;
        Ok(n)
    }

    fn tellg(&self) -> u64 {
        self.position
    }

    fn size(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::buffer::BufferReader;
    use std::sync::Arc;

    #[test]
    fn reader_as_sequential_reads_in_order() {
        let r: SharedReader = Arc::new(BufferReader::new(b"hello world".to_vec()));
        let mut seq = ReaderAsSequential::new(r);
        let all = seq.read_to_end().unwrap();
        assert_eq!(all, b"hello world");
    }

    #[test]
    fn skip_advances_cursor() {
        let r: SharedReader = Arc::new(BufferReader::new(b"hello world".to_vec()));
        let mut seq = ReaderAsSequential::new(r);
        seq.skip(6).unwrap();
        let rest = seq.read_to_end().unwrap();
        assert_eq!(rest, b"world");
    }

    #[test]
    fn skip_overflow_is_rejected() {
        let r: SharedReader = Arc::new(BufferReader::new(b"hello world".to_vec()));
        let mut seq = ReaderAsSequential::new(r);
        seq.skip(5).unwrap();
        let err = seq.skip(u64::MAX).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::IoReaderReadFailure);
    }

    #[test]
    fn vec_writer_accumulates() {
        let mut w = VecWriter::new();
        w.write(b"ab").unwrap();
        w.write(b"cd").unwrap();
        assert_eq!(w.tellp(), 4);
        assert_eq!(w.into_inner(), b"abcd");
    }
}
