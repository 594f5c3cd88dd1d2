//! Binary file header.

use aeptools_common::{BinaryReader, PointerWidth};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{Error, Result};

/// AEP magic bytes.
pub const AEP_MAGIC: [u8; 4] = *b"AEP\0";

/// Supported container version.
pub const AEP_VERSION: u16 = 1;

/// Position of `root_offset` inside the header.
const ROOT_OFFSET_FIELD: usize = 16;

/// Fixed-size header at the start of every binary file.
///
/// The shape is identical for both pointer widths; `pointer_width` records
/// which one the body uses. All fields are little-endian.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct AepHeader {
    magic: [u8; 4],
    version: u16,
    pointer_width: u8,
    reserved: u8,
    root_kind: u32,
    file_size: u32,
    root_offset: u64,
}

impl AepHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Create a header for a file body of the given width.
    pub fn new(width: PointerWidth, root_kind: u32, file_size: u32, root_offset: u64) -> Self {
        Self {
            magic: AEP_MAGIC,
            version: AEP_VERSION.to_le(),
            pointer_width: width.bytes() as u8,
            reserved: 0,
            root_kind: root_kind.to_le(),
            file_size: file_size.to_le(),
            root_offset: root_offset.to_le(),
        }
    }

    /// Read a header from the start of `data`, checking only the magic.
    pub fn read(data: &[u8]) -> Result<Self> {
        let mut reader = BinaryReader::new(data);
        let magic = reader.peek_bytes(AEP_MAGIC.len().min(data.len()))?;
        if magic != AEP_MAGIC {
            return Err(Error::InvalidMagic {
                actual: magic.to_vec(),
            });
        }
        Ok(reader.read_struct::<Self>()?)
    }

    pub fn magic(&self) -> [u8; 4] {
        self.magic
    }

    pub fn version(&self) -> u16 {
        u16::from_le(self.version)
    }

    /// Declared pointer width in bytes.
    pub fn pointer_width_bytes(&self) -> u8 {
        self.pointer_width
    }

    /// Declared pointer width, if it is one we know.
    pub fn pointer_width(&self) -> Option<PointerWidth> {
        PointerWidth::from_bytes(self.pointer_width)
    }

    /// Catalog id of the root structure kind.
    pub fn root_kind(&self) -> u32 {
        u32::from_le(self.root_kind)
    }

    pub fn file_size(&self) -> u32 {
        u32::from_le(self.file_size)
    }

    pub fn root_offset(&self) -> u64 {
        u64::from_le(self.root_offset)
    }

    /// Check version, width and bounds against a buffer of `len` bytes.
    ///
    /// Checks run in order: version, pointer width, declared size, root offset.
    pub fn validate(&self, expected: PointerWidth, len: usize) -> Result<()> {
        if self.version() != AEP_VERSION {
            return Err(Error::UnsupportedVersion(self.version()));
        }
        if self.pointer_width != expected.bytes() as u8 {
            return Err(Error::PointerWidthMismatch {
                expected,
                actual: self.pointer_width,
            });
        }
        let file_size = self.file_size() as usize;
        if file_size > len {
            return Err(Error::TruncatedData {
                offset: 0,
                needed: file_size,
                available: len,
            });
        }
        let root = self.root_offset();
        if root < Self::SIZE as u64 || root >= file_size as u64 {
            return Err(Error::DanglingPointer {
                pointer: root,
                at: ROOT_OFFSET_FIELD,
                size: file_size,
            });
        }
        Ok(())
    }
}
