//! Byte I/O abstractions: random-access readers,
//! forward-only sequential readers/writers, and their composition.

pub mod buffer;
pub mod channel;
pub mod file;
pub mod reader;
pub mod sequential;

pub use reader::{chain, slice, ChainReader, Reader, ReaderExt, SharedReader, SliceReader};
pub use sequential::{
    BoxedSequentialReader, BoxedSequentialWriter, ReaderAsSequential, SequentialReader,
    SequentialReaderFactory, SequentialWriter, StdReadAdapter, StdReadAsSequential, VecWriter,
};
