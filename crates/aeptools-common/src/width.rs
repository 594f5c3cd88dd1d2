//! Pointer width selection for the two binary AEP encodings.

use std::fmt;

/// Byte size of on-disk pointers.
///
/// The x86 and x64 encodings of an AEP file share every structure definition;
/// the only difference is the width of embedded pointers, which also shifts the
/// alignment and size of any structure containing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PointerWidth {
    /// 4-byte pointers.
    X86,
    /// 8-byte pointers.
    X64,
}

impl PointerWidth {
    /// Size of a pointer in bytes.
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            Self::X86 => 4,
            Self::X64 => 8,
        }
    }

    /// Parse the width byte stored in a file header.
    pub const fn from_bytes(bytes: u8) -> Option<Self> {
        match bytes {
            4 => Some(Self::X86),
            8 => Some(Self::X64),
            _ => None,
        }
    }

    /// Largest pointer value representable at this width.
    #[inline]
    pub const fn max_value(self) -> u64 {
        match self {
            Self::X86 => u32::MAX as u64,
            Self::X64 => u64::MAX,
        }
    }

    /// Short architecture name (`x86` / `x64`).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::X86 => "x86",
            Self::X64 => "x64",
        }
    }
}

impl fmt::Display for PointerWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
