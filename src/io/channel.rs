//! The writer-to-reader channel: the single concurrency primitive
//! in the system. A bounded ring buffer shared by exactly one producer
//! thread and one consumer, synchronized with a `Mutex` + `Condvar` pair
//! rather than a higher-level channel crate, since the contract is
//! byte-level (partial writes/reads, a pledged total length, explicit
//! cancellation) rather than message-based.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{DiffError, ErrorKind, Result};
use crate::io::sequential::{SequentialReader, SequentialWriter};

/// 64 KiB of buffered, unconsumed bytes before a writer blocks.
pub const DEFAULT_RING_CAPACITY: usize = 64 * 1024;

struct State {
    ring: VecDeque<u8>,
    total_written: u64,
    total_read: u64,
    cancelled: bool,
    failure: Option<String>,
}

/// Shared state behind a [`ChannelWriter`] / [`ChannelReader`] pair.
pub struct WriterToReaderChannel {
    state: Mutex<State>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
    expected_total_read: u64,
}

impl WriterToReaderChannel {
    pub fn new(expected_total_read: u64) -> Arc<Self> {
        Self::with_capacity(expected_total_read, DEFAULT_RING_CAPACITY)
    }

    pub fn with_capacity(expected_total_read: u64, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                ring: VecDeque::with_capacity(capacity.min(1 << 20)),
                total_written: 0,
                total_read: 0,
                cancelled: false,
                failure: None,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
            expected_total_read,
        })
    }

    pub fn cancel(&self) {
        let mut state = self.state.lock().expect("channel mutex poisoned");
        state.cancelled = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Like `cancel`, but records `reason` so the consumer's next
    /// `read_some` surfaces it as an error once the ring drains, instead of
    /// reporting a clean end-of-stream for what was actually a producer
    /// failure.
    pub fn fail(&self, reason: impl Into<String>) {
        let mut state = self.state.lock().expect("channel mutex poisoned");
        state.failure = Some(reason.into());
        state.cancelled = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    fn write(&self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            let mut state = self.state.lock().expect("channel mutex poisoned");
            loop {
                if state.cancelled {
                    return Err(DiffError::new(
                        ErrorKind::IoProducerConsumerReaderWriterWritingWhenDone,
                        "write attempted on a cancelled channel",
                    ));
                }
                if state.total_written >= self.expected_total_read {
                    return Err(DiffError::new(
                        ErrorKind::IoProducerConsumerReaderWriterWritingWhenDone,
                        format!(
                            "producer wrote past pledged length {}",
                            self.expected_total_read
                        ),
                    ));
                }
                if state.ring.len() < self.capacity {
                    break;
                }
                state = self.not_full.wait(state).expect("channel mutex poisoned");
            }

            let room = self.capacity - state.ring.len();
            let remaining_pledge = (self.expected_total_read - state.total_written) as usize;
            let n = room.min(bytes.len()).min(remaining_pledge);
            state.ring.extend(bytes[..n].iter().copied());
            state.total_written += n as u64;
            bytes = &bytes[n..];
            self.not_empty.notify_all();
        }
        Ok(())
    }

    fn read_some(&self, buffer: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock().expect("channel mutex poisoned");
        loop {
            if !state.ring.is_empty() {
                let n = buffer.len().min(state.ring.len());
                for slot in buffer[..n].iter_mut() {
                    *slot = state.ring.pop_front().expect("checked non-empty above");
                }
                state.total_read += n as u64;
                self.not_full.notify_all();
                return Ok(n);
            }
            if let Some(reason) = state.failure.clone() {
                return Err(DiffError::new(
                    ErrorKind::IoProducerConsumerReaderWriterProducerFailed,
                    reason,
                ));
            }
            if state.total_read >= self.expected_total_read {
                return Ok(0);
            }
            if state.cancelled {
                return Ok(0);
            }
            state = self.not_empty.wait(state).expect("channel mutex poisoned");
        }
    }

    fn tellg(&self) -> u64 {
        self.state.lock().expect("channel mutex poisoned").total_read
    }
}

/// Producer-side handle: the only type that may call `write`.
pub struct ChannelWriter {
    channel: Arc<WriterToReaderChannel>,
}

impl ChannelWriter {
    pub fn new(channel: Arc<WriterToReaderChannel>) -> Self {
        Self { channel }
    }
}

impl SequentialWriter for ChannelWriter {
    fn write(&mut self, buffer: &[u8]) -> Result<()> {
        self.channel.write(buffer)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn tellp(&self) -> u64 {
        self.channel
            .state
            .lock()
            .expect("channel mutex poisoned")
            .total_written
    }
}

/// Consumer-side handle: the only type that may call `read_some`.
pub struct ChannelReader {
    channel: Arc<WriterToReaderChannel>,
}

impl ChannelReader {
    pub fn new(channel: Arc<WriterToReaderChannel>) -> Self {
        Self { channel }
    }
}

impl SequentialReader for ChannelReader {
    fn read_some(&mut self, buffer: &mut [u8]) -> Result<usize> {
        self.channel.read_some(buffer)
    }

    fn tellg(&self) -> u64 {
        self.channel.tellg()
    }

    fn size(&self) -> u64 {
        self.channel.expected_total_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn delivers_all_bytes_in_blocks_larger_than_capacity() {
        let total = 500_000u64;
        let channel = WriterToReaderChannel::with_capacity(total, 4096);
        let mut writer = ChannelWriter::new(channel.clone());
        let mut reader = ChannelReader::new(channel);

        let producer = thread::spawn(move || {
            let chunk = vec![0xABu8; 10_000];
            let mut remaining = total as usize;
            while remaining > 0 {
                let n = remaining.min(chunk.len());
                writer.write(&chunk[..n]).unwrap();
                remaining -= n;
            }
        });

        let mut received = Vec::new();
        let mut buf = [0u8; 7000];
        loop {
            let n = reader.read_some(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }

        producer.join().unwrap();
        assert_eq!(received.len(), total as usize);
        assert!(received.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn cancel_unblocks_both_sides() {
        let channel = WriterToReaderChannel::with_capacity(1_000_000, 16);
        let mut writer = ChannelWriter::new(channel.clone());
        let reader_channel = channel.clone();

        let producer = thread::spawn(move || {
            let chunk = [0u8; 64];
            // Keep writing until cancellation unblocks/rejects us.
            loop {
                if writer.write(&chunk).is_err() {
                    break;
                }
            }
        });

        // Give the producer a moment to fill the ring and block.
        thread::sleep(std::time::Duration::from_millis(20));
        channel.cancel();
        producer.join().unwrap();

        let mut reader = ChannelReader::new(reader_channel);
        let mut buf = [0u8; 8];
        // Draining after cancel eventually reaches EOF rather than hanging.
        loop {
            match reader.read_some(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    }

    #[test]
    fn read_after_pledge_reached_returns_eof() {
        let channel = WriterToReaderChannel::with_capacity(4, 16);
        let mut writer = ChannelWriter::new(channel.clone());
        let mut reader = ChannelReader::new(channel);

        writer.write(b"abcd").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(reader.read_some(&mut buf).unwrap(), 4);
        assert_eq!(reader.read_some(&mut buf).unwrap(), 0);
    }

    #[test]
    fn fail_surfaces_as_an_error_once_drained_instead_of_eof() {
        let channel = WriterToReaderChannel::with_capacity(100, 16);
        let mut writer = ChannelWriter::new(channel.clone());
        let mut reader = ChannelReader::new(channel.clone());

        writer.write(b"ab").unwrap();
        channel.fail("producer crashed midway");

        let mut buf = [0u8; 2];
        assert_eq!(reader.read_some(&mut buf).unwrap(), 2);
        let err = match reader.read_some(&mut buf) {
            Ok(_) => panic!("expected a failed channel to surface an error, not more data or EOF"),
            Err(e) => e,
        };
        assert_eq!(
            err.kind(),
            ErrorKind::IoProducerConsumerReaderWriterProducerFailed
        );
    }

    #[test]
    fn single_write_cannot_overshoot_the_pledged_length() {
        let channel = WriterToReaderChannel::with_capacity(10, 4096);
        let mut writer = ChannelWriter::new(channel.clone());

        let err = writer.write(&[0u8; 20]).unwrap_err();
        assert_eq!(
            err.kind(),
            ErrorKind::IoProducerConsumerReaderWriterWritingWhenDone
        );
        assert_eq!(
            channel.state.lock().expect("channel mutex poisoned").total_written,
            10
        );
    }
}
