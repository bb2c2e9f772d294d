//! File-backed readers and writers: random-access source blobs and
//! sequential target output, implemented directly rather than left abstract.

use std::fs::{File, OpenOptions};
use std::io::Write as StdWrite;
use std::path::Path;

use memmap::Mmap;

use crate::error::{DiffError, ErrorKind, Result};
use crate::io::reader::Reader;
use crate::io::sequential::SequentialWriter;

/// Random-access reader over a memory-mapped file.
///
/// `memmap` refuses to map a zero-length file, so an empty file is kept
/// unmapped and served out of a zero-length slice instead.
pub struct BinaryFileReader {
    _file: File,
    mmap: Option<Mmap>,
}

impl BinaryFileReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            DiffError::from_io(
                ErrorKind::IoBinaryFileReaderFailedOpen,
                format!("failed to open {}", path.as_ref().display()),
                e,
            )
        })?;
        let mmap = if file.metadata()?.len() == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(Self { _file: file, mmap })
    }

    fn bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }
}

impl Reader for BinaryFileReader {
    fn size(&self) -> u64 {
        self.bytes().len() as u64
    }

    fn read_some(&self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        let offset = offset as usize;
        let bytes = self.bytes();
        if offset >= bytes.len() {
            return Ok(0);
        }
        let available = &bytes[offset..];
        let n = buffer.len().min(available.len());
        buffer[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }
}

/// Plain sequential writer over a freshly created file.
pub struct BinaryFileWriter {
    file: File,
    written: u64,
}

impl BinaryFileWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path.as_ref())
            .map_err(|e| {
                DiffError::from_io(
                    ErrorKind::IoBinaryFileWriterFailedOpen,
                    format!("failed to create {}", path.as_ref().display()),
                    e,
                )
            })?;
        Ok(Self { file, written: 0 })
    }
}

impl SequentialWriter for BinaryFileWriter {
    fn write(&mut self, buffer: &[u8]) -> Result<()> {
        self.file.write_all(buffer)?;
        self.written += buffer.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    fn tellp(&self) -> u64 {
        self.written
    }
}
