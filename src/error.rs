//! The flat error taxonomy every public entry point returns.

use std::fmt;
use std::io;

use thiserror::Error;

/// One tag per distinct failure mode. Kept flat (no nested enums) so callers
/// can match on a single `match err.kind() { ... }` rather than downcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // Container
    DiffMagicHeaderWrong,
    DiffVersionWrong,
    DiffReadDiffSizeMismatch,
    DiffBadHashType,
    DiffRecipeParameterReadInvalidType,
    DiffUnrecognizedContainer,

    // Recipe construction
    DiffRecipeInvalidParameterCount,
    RecipeSelfReferential,
    RecipeChainItemAndRecipeMismatch,
    RecipeChainTotalItemLengthMismatch,
    RecipeZlibCompressionLevelInvalid,
    RecipeZstdCompressionNotSupported,

    // Resolution
    DiffItemNotAvailable,
    DiffSlicingInvalidState,
    DiffSlicingRequestSliceOverlap,

    // Verification
    DiffVerifyHashFailure,

    // I/O
    IoReaderReadFailure,
    IoReaderSliceBoundError,
    IoDeviceNewEndPastSize,
    IoBinaryFileReaderFailedOpen,
    IoBinaryFileWriterFailedOpen,
    IoProducerConsumerReaderWriterWritingWhenDone,
    IoProducerConsumerReaderWriterReadingTooMuchAvailable,
    IoProducerConsumerReaderWriterProducerFailed,

    // Codec
    DiffBspatchFailure,
    IoZstdDecompressStreamFailed,
    IoZstdDecompressCannotFinish,
    IoZstdCompressStreamFailed,
    IoZstdCompressFinishedEarly,
    IoZstdCompressCannotFinish,
    IoZstdTooMuchDataProcessed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Every failure carries a kind and a message; I/O failures also keep
/// the underlying `std::io::Error` as the source.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct DiffError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<io::Error>,
}

impl DiffError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn from_io(kind: ErrorKind, message: impl Into<String>, source: io::Error) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<io::Error> for DiffError {
    fn from(err: io::Error) -> Self {
        DiffError::from_io(ErrorKind::IoReaderReadFailure, err.to_string(), err)
    }
}

pub type Result<T> = std::result::Result<T, DiffError>;
