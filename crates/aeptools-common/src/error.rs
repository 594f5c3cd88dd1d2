//! Error types for aeptools-common.

use thiserror::Error;

/// Common error type for aeptools primitive operations.
#[derive(Debug, Error)]
pub enum Error {
    /// End of buffer reached while reading.
    #[error("unexpected end of buffer at offset {position:#x}: needed {needed} bytes but only {available} available")]
    UnexpectedEof {
        position: usize,
        needed: usize,
        available: usize,
    },

    /// Missing null terminator in string.
    #[error("string at offset {position:#x} missing null terminator")]
    MissingNullTerminator { position: usize },

    /// Pointer value does not fit the target pointer width.
    #[error("pointer value {value:#x} does not fit in {width} bytes")]
    PointerOverflow { value: u64, width: usize },

    /// Padding requested to a position the writer has already passed.
    #[error("cannot pad to offset {target:#x}: writer already at {position:#x}")]
    PaddingOverrun { target: usize, position: usize },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 decoding error.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
