//! Conversion between the binary and text formats.
//!
//! Every conversion goes through a [`Document`], so converting x86 to x64
//! is a decode followed by an encode at the other width.

use std::fmt;
use std::str::FromStr;

use aeptools_common::PointerWidth;
use tracing::debug;
use zerocopy::IntoBytes;

use crate::decoder::decode;
use crate::document::Document;
use crate::encoder::Encoder;
use crate::header::{AepHeader, AEP_MAGIC};
use crate::schema::SchemaCatalog;
use crate::text::{from_text, to_text};
use crate::{Error, Result};

/// A file format handled by the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Binary with 4-byte pointers.
    X86,
    /// Binary with 8-byte pointers.
    X64,
    /// JSON text.
    Json,
}

impl Format {
    pub const ALL: [Format; 3] = [Self::X86, Self::X64, Self::Json];

    /// Pointer width of a binary format.
    pub fn width(self) -> Option<PointerWidth> {
        match self {
            Self::X86 => Some(PointerWidth::X86),
            Self::X64 => Some(PointerWidth::X64),
            Self::Json => None,
        }
    }

    pub fn is_binary(self) -> bool {
        self.width().is_some()
    }

    /// Conventional file extension.
    pub fn extension(self) -> &'static str {
        match self {
            Self::X86 | Self::X64 => "aep",
            Self::Json => "json",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::X86 => "x86",
            Self::X64 => "x64",
            Self::Json => "json",
        }
    }

    /// Guess the format of a buffer from its first bytes.
    pub fn detect(data: &[u8]) -> Option<Format> {
        if data.starts_with(&AEP_MAGIC) {
            return match data.get(6).copied().and_then(PointerWidth::from_bytes) {
                Some(PointerWidth::X86) => Some(Self::X86),
                Some(PointerWidth::X64) => Some(Self::X64),
                None => None,
            };
        }
        match data.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => Some(Self::Json),
            _ => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownFormat(s.to_string()))
    }
}

/// Read and validate the header of a binary file without decoding the body.
pub fn read_header(data: &[u8]) -> Result<AepHeader> {
    AepHeader::read(data)
}

/// Decode a complete binary file of the given width.
pub fn decode_binary(data: &[u8], width: PointerWidth, catalog: &SchemaCatalog) -> Result<Document> {
    let header = AepHeader::read(data)?;
    header.validate(width, data.len())?;

    let root = catalog.by_id(header.root_kind())?;
    let body = &data[..header.file_size() as usize];
    decode(body, header.root_offset(), &root.name, width, catalog)
}

/// Encode a document as a complete binary file of the given width.
pub fn encode_binary(document: &Document, width: PointerWidth, catalog: &SchemaCatalog) -> Result<Vec<u8>> {
    let root_kind = catalog.get(&document.root_node().kind)?.id;
    let encoded = Encoder::new(catalog, width).encode(document, AepHeader::SIZE)?;
    let mut bytes = encoded.bytes;

    let file_size = u32::try_from(bytes.len())
        .map_err(|_| Error::Layout(format!("file size {} exceeds the 32-bit header field", bytes.len())))?;
    let header = AepHeader::new(width, root_kind, file_size, encoded.root_offset);
    bytes[..AepHeader::SIZE].copy_from_slice(header.as_bytes());

    debug!(
        width = %width,
        size = bytes.len(),
        structures = encoded.structures,
        strings = encoded.strings,
        "wrote binary file"
    );
    Ok(bytes)
}

/// Read a document in the given format.
///
/// Text input is checked against the catalog as well, so a text file that
/// reads successfully can always be encoded.
pub fn read_document(data: &[u8], format: Format, catalog: &SchemaCatalog) -> Result<Document> {
    match format.width() {
        Some(width) => decode_binary(data, width, catalog),
        None => {
            let document = from_text(std::str::from_utf8(data)?)?;
            Encoder::new(catalog, PointerWidth::X64).validate(&document)?;
            Ok(document)
        }
    }
}

/// Write a document in the given format.
pub fn write_document(document: &Document, format: Format, catalog: &SchemaCatalog) -> Result<Vec<u8>> {
    match format.width() {
        Some(width) => encode_binary(document, width, catalog),
        None => Ok(to_text(document)?.into_bytes()),
    }
}

/// Convert a buffer from one format to another.
pub fn convert(input: &[u8], from: Format, to: Format, catalog: &SchemaCatalog) -> Result<Vec<u8>> {
    let document = read_document(input, from, catalog)?;
    debug!(%from, %to, nodes = document.len(), "converting");
    write_document(&document, to, catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Node, Value};
    use crate::schema::{FieldType, ScalarType, StructSchema};

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::from_structs([StructSchema::new("Node", 9)
            .field("id", FieldType::scalar(ScalarType::I32))
            .field("name", FieldType::string())
            .field("next", FieldType::pointer("Node"))])
        .unwrap()
    }

    fn single() -> Document {
        Document::new(
            Node::new("Node")
                .with("id", Value::I32(1))
                .with("name", Value::string("a"))
                .with("next", Value::Pointer(None)),
        )
    }

    #[test]
    fn test_format_names() {
        assert_eq!("X64".parse::<Format>().unwrap(), Format::X64);
        assert_eq!("json".parse::<Format>().unwrap(), Format::Json);
        assert!(matches!("arm".parse::<Format>(), Err(Error::UnknownFormat(_))));
        assert_eq!(Format::X86.to_string(), "x86");
        assert_eq!(Format::X86.extension(), "aep");
    }

    #[test]
    fn test_detect() {
        let catalog = catalog();
        let x86 = encode_binary(&single(), PointerWidth::X86, &catalog).unwrap();
        let x64 = encode_binary(&single(), PointerWidth::X64, &catalog).unwrap();

        assert_eq!(Format::detect(&x86), Some(Format::X86));
        assert_eq!(Format::detect(&x64), Some(Format::X64));
        assert_eq!(Format::detect(b"  \n{\"format\":1}"), Some(Format::Json));
        assert_eq!(Format::detect(b"garbage"), None);
    }

    #[test]
    fn test_binary_file_layout() {
        let bytes = encode_binary(&single(), PointerWidth::X86, &catalog()).unwrap();

        // header(24) | Node{id, name, next}(12) | "a\0"
        assert_eq!(bytes.len(), 24 + 12 + 2);
        let header = read_header(&bytes).unwrap();
        assert_eq!(header.root_kind(), 9);
        assert_eq!(header.root_offset(), 24);
        assert_eq!(header.file_size() as usize, bytes.len());
        assert_eq!(&bytes[24..28], &1i32.to_le_bytes());
        assert_eq!(&bytes[28..32], &36u32.to_le_bytes());
        assert_eq!(&bytes[32..36], &[0; 4]);
        assert_eq!(&bytes[36..], b"a\0");
    }

    #[test]
    fn test_width_mismatch() {
        let catalog = catalog();
        let x86 = encode_binary(&single(), PointerWidth::X86, &catalog).unwrap();
        assert!(matches!(
            decode_binary(&x86, PointerWidth::X64, &catalog),
            Err(Error::PointerWidthMismatch { actual: 4, .. })
        ));
    }

    #[test]
    fn test_bad_version_is_checked_before_width() {
        let catalog = catalog();
        let mut bytes = encode_binary(&single(), PointerWidth::X86, &catalog).unwrap();
        bytes[4] = 7;
        assert!(matches!(
            decode_binary(&bytes, PointerWidth::X64, &catalog),
            Err(Error::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn test_json_input_is_checked_against_catalog() {
        let doc = Document::new(Node::new("Node").with("id", Value::I32(1)));
        let text = to_text(&doc).unwrap();
        assert!(matches!(
            read_document(text.as_bytes(), Format::Json, &catalog()),
            Err(Error::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_convert_across_widths() {
        let catalog = catalog();
        let x86 = encode_binary(&single(), PointerWidth::X86, &catalog).unwrap();
        let x64 = convert(&x86, Format::X86, Format::X64, &catalog).unwrap();
        let back = convert(&x64, Format::X64, Format::X86, &catalog).unwrap();
        assert_eq!(back, x86);
    }
}
