//! Error types for AEP decoding, encoding and text conversion.

use aeptools_common::PointerWidth;
use thiserror::Error;

/// Errors that can occur while converting AEP files.
///
/// Every error aborts the conversion it occurred in; no partial output is
/// produced.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Buffer is shorter than a field or structure requires.
    #[error("truncated data at offset {offset:#x}: needed {needed} bytes but only {available} available")]
    TruncatedData {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A pointer resolves outside the buffer.
    #[error("dangling pointer {pointer:#x} read at offset {at:#x} (buffer size: {size:#x})")]
    DanglingPointer { pointer: u64, at: usize, size: usize },

    /// Schema lookup miss.
    #[error("unknown structure kind: {0}")]
    UnknownStructureKind(String),

    /// A logical node does not match its declared schema.
    #[error("schema mismatch at {path}: {reason}")]
    SchemaMismatch { path: String, reason: String },

    /// Malformed or inconsistent textual input.
    #[error("invalid text document at {path}: {reason}")]
    TextSchema { path: String, reason: String },

    /// Invalid magic bytes (not an AEP file).
    #[error("invalid AEP magic: expected 'AEP\\0', got {actual:?}")]
    InvalidMagic { actual: Vec<u8> },

    /// Unsupported container version.
    #[error("unsupported AEP version: {0} (expected 1)")]
    UnsupportedVersion(u16),

    /// Header pointer width disagrees with the requested encoding.
    #[error("pointer width mismatch: expected {expected} ({} bytes), file declares {actual} bytes", expected.bytes())]
    PointerWidthMismatch { expected: PointerWidth, actual: u8 },

    /// The same offset was referenced as two different structure kinds.
    #[error("offset {offset:#x} referenced as both {first} and {second}")]
    AliasKindMismatch {
        offset: u64,
        first: String,
        second: String,
    },

    /// A variable-length array's count field is missing or unusable.
    #[error("invalid count field {kind}.{field}: {reason}")]
    InvalidCountField {
        kind: String,
        field: String,
        reason: String,
    },

    /// The schema catalog itself is inconsistent.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// A pooled string is not valid UTF-8.
    #[error("invalid string data: {0}")]
    InvalidString(#[from] std::str::Utf8Error),

    /// A pointer does not fit the output pointer width.
    #[error("pointer value {value:#x} does not fit in {width} bytes")]
    PointerOverflow { value: u64, width: usize },

    /// Internal layout invariant violated while encoding.
    #[error("layout error: {0}")]
    Layout(String),

    /// Unrecognized format name.
    #[error("unknown format '{0}' (expected x86, x64 or json)")]
    UnknownFormat(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<aeptools_common::Error> for Error {
    fn from(err: aeptools_common::Error) -> Self {
        use aeptools_common::Error as Common;

        match err {
            Common::UnexpectedEof {
                position,
                needed,
                available,
            } => Self::TruncatedData {
                offset: position,
                needed,
                available,
            },
            Common::MissingNullTerminator { position } => Self::TruncatedData {
                offset: position,
                needed: 1,
                available: 0,
            },
            Common::PointerOverflow { value, width } => Self::PointerOverflow { value, width },
            e @ Common::PaddingOverrun { .. } => Self::Layout(e.to_string()),
            Common::Io(e) => Self::Io(e),
            Common::Utf8(e) => Self::InvalidString(e),
        }
    }
}

/// Result type for AEP operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use aeptools_common::{BinaryReader, BinaryWriter};

    #[test]
    fn test_common_errors_map_onto_taxonomy() {
        let eof: Error = BinaryReader::new(&[1, 2]).read_u32().unwrap_err().into();
        assert!(matches!(eof, Error::TruncatedData { offset: 0, needed: 4, available: 2 }));

        let unterminated: Error = BinaryReader::new_at(b"ab", 1).read_cstring().unwrap_err().into();
        assert!(matches!(unterminated, Error::TruncatedData { offset: 1, .. }));

        let overflow: Error = BinaryWriter::new()
            .write_pointer(PointerWidth::X86, u64::MAX)
            .unwrap_err()
            .into();
        assert!(matches!(overflow, Error::PointerOverflow { width: 4, .. }));

        let overrun: Error = {
            let mut writer = BinaryWriter::new();
            writer.write_u32(0).unwrap();
            writer.pad_to(2).unwrap_err().into()
        };
        assert!(matches!(overrun, Error::Layout(_)));
    }
}
