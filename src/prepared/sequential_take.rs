//! Bounds a forward-only stream to its first `length` bytes, used to give
//! a sequential view of a slice of a sequential-only parent without
//! involving the streaming-slice machinery (single-pass reads never need
//! the random-access arbitration that machinery exists for).

use crate::error::Result;
use crate::io::{BoxedSequentialReader, SequentialReader};

pub struct SequentialTake {
    inner: BoxedSequentialReader,
    remaining: u64,
    total: u64,
}

impl SequentialTake {
    pub fn new(inner: BoxedSequentialReader, length: u64) -> Self {
        Self {
            inner,
            remaining: length,
            total: length,
        }
    }
}

impl SequentialReader for SequentialTake {
    fn read_some(&mut self, buffer: &mut [u8]) -> Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let want = (buffer.len() as u64).min(self.remaining) as usize;
        let n = self.inner.read_some(&mut buffer[..want])?;
        self.remaining -= n as u64;
        Ok(n)
    }

    fn tellg(&self) -> u64 {
        self.total - self.remaining
    }

    fn size(&self) -> u64 {
        self.total
    }
}
