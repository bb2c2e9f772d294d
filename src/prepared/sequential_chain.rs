//! Sequential view of a `chain` prepared item: reads each ingredient
//! stream to completion before moving to the next, mirroring
//! `ChainReader`'s random-access segment walk.

use crate::error::Result;
use crate::io::{BoxedSequentialReader, SequentialReader};

pub struct SequentialChain {
    streams: Vec<BoxedSequentialReader>,
    current: usize,
    position: u64,
    total: u64,
}

impl SequentialChain {
    pub fn new(streams: Vec<BoxedSequentialReader>, total: u64) -> Self {
        Self {
            streams,
            current: 0,
            position: 0,
            total,
        }
    }
}

impl SequentialReader for SequentialChain {
    fn read_some(&mut self, buffer: &mut [u8]) -> Result<usize> {
        while self.current < self.streams.len() {
            let n = self.streams[self.current].read_some(buffer)?;
            if n > 0 {
                self.position += n as u64;
                return Ok(n);
            }
            self.current += 1;
        }
        Ok(0)
    }

    fn tellg(&self) -> u64 {
        self.position
    }

    fn size(&self) -> u64 {
        self.total
    }
}
