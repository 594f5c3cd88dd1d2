//! Binary writer producing little-endian output buffers.
//!
//! [`BinaryWriter`] is the write-side counterpart of [`crate::BinaryReader`].
//! Besides sequential writes it supports zero padding up to a planned offset
//! and in-place patching of pointer slots written earlier as placeholders.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::{Error, PointerWidth, Result};

/// A growable little-endian output buffer.
///
/// # Example
///
/// ```
/// use aeptools_common::{BinaryWriter, PointerWidth};
///
/// let mut writer = BinaryWriter::new();
/// writer.write_u16(0xBEEF).unwrap();
/// writer.pad_to(4).unwrap();
/// writer.write_pointer(PointerWidth::X86, 0).unwrap();
/// writer.patch_pointer(4, PointerWidth::X86, 0x40).unwrap();
///
/// assert_eq!(writer.as_bytes(), &[0xEF, 0xBE, 0, 0, 0x40, 0, 0, 0]);
/// ```
#[derive(Debug, Default, Clone)]
pub struct BinaryWriter {
    data: Vec<u8>,
}

impl BinaryWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty writer with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Current write position (the number of bytes written so far).
    #[inline]
    pub fn position(&self) -> usize {
        self.data.len()
    }

    /// The bytes written so far.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the writer and return the output buffer.
    #[inline]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Append raw bytes.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Write a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        Ok(self.data.write_u8(value)?)
    }

    /// Write a signed byte.
    #[inline]
    pub fn write_i8(&mut self, value: i8) -> Result<()> {
        Ok(self.data.write_i8(value)?)
    }

    /// Write a boolean as a single byte (1 = true).
    #[inline]
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(u8::from(value))
    }

    /// Write a little-endian u16.
    #[inline]
    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        Ok(self.data.write_u16::<LittleEndian>(value)?)
    }

    /// Write a little-endian i16.
    #[inline]
    pub fn write_i16(&mut self, value: i16) -> Result<()> {
        Ok(self.data.write_i16::<LittleEndian>(value)?)
    }

    /// Write a little-endian u32.
    #[inline]
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        Ok(self.data.write_u32::<LittleEndian>(value)?)
    }

    /// Write a little-endian i32.
    #[inline]
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        Ok(self.data.write_i32::<LittleEndian>(value)?)
    }

    /// Write a little-endian u64.
    #[inline]
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        Ok(self.data.write_u64::<LittleEndian>(value)?)
    }

    /// Write a little-endian i64.
    #[inline]
    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        Ok(self.data.write_i64::<LittleEndian>(value)?)
    }

    /// Write a little-endian f32.
    #[inline]
    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        Ok(self.data.write_f32::<LittleEndian>(value)?)
    }

    /// Write a little-endian f64.
    #[inline]
    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        Ok(self.data.write_f64::<LittleEndian>(value)?)
    }

    /// Write a pointer of the given width.
    ///
    /// Fails with [`Error::PointerOverflow`] if the value does not fit.
    pub fn write_pointer(&mut self, width: PointerWidth, value: u64) -> Result<()> {
        check_pointer(width, value)?;
        match width {
            PointerWidth::X86 => self.write_u32(value as u32),
            PointerWidth::X64 => self.write_u64(value),
        }
    }

    /// Write a string followed by a null terminator.
    pub fn write_cstring(&mut self, value: &str) {
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
    }

    /// Zero-fill up to an absolute offset.
    pub fn pad_to(&mut self, offset: usize) -> Result<()> {
        if offset < self.data.len() {
            return Err(Error::PaddingOverrun {
                target: offset,
                position: self.data.len(),
            });
        }
        self.data.resize(offset, 0);
        Ok(())
    }

    /// Zero-fill until the position is a multiple of `align`.
    pub fn align_to(&mut self, align: usize) {
        let aligned = align_up(self.data.len(), align);
        self.data.resize(aligned, 0);
    }

    /// Overwrite a previously written pointer slot in place.
    pub fn patch_pointer(&mut self, at: usize, width: PointerWidth, value: u64) -> Result<()> {
        check_pointer(width, value)?;
        let size = width.bytes();
        let len = self.data.len();
        let slot = self.data.get_mut(at..at + size).ok_or(Error::UnexpectedEof {
            position: at,
            needed: size,
            available: len.saturating_sub(at),
        })?;
        match width {
            PointerWidth::X86 => slot.copy_from_slice(&(value as u32).to_le_bytes()),
            PointerWidth::X64 => slot.copy_from_slice(&value.to_le_bytes()),
        }
        Ok(())
    }
}

/// Round `value` up to the next multiple of `align` (`align` of 0 or 1 is a no-op).
#[inline]
pub fn align_up(value: usize, align: usize) -> usize {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

fn check_pointer(width: PointerWidth, value: u64) -> Result<()> {
    if value > width.max_value() {
        return Err(Error::PointerOverflow {
            value,
            width: width.bytes(),
        });
    }
    Ok(())
}
