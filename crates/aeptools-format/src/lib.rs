//! AEP project file codec.
//!
//! AEP files exist in three interchangeable encodings: two binary layouts
//! that differ only in pointer width (x86 with 4-byte pointers, x64 with
//! 8-byte pointers) and a JSON text form. This crate converts between them
//! losslessly through a pointer-free logical tree.
//!
//! # Quick Start
//!
//! ```no_run
//! use aeptools_format::{convert, project, Format};
//!
//! let catalog = project::catalog()?;
//! let binary = std::fs::read("effect.aep")?;
//! let json = convert(&binary, Format::X86, Format::Json, &catalog)?;
//! let x64 = convert(&json, Format::Json, Format::X64, &catalog)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Architecture
//!
//! - **Schema** ([`SchemaCatalog`]): field descriptors per structure kind
//! - **Layout** ([`Layouts`]): field offsets per pointer width
//! - **Document** ([`Document`]): arena of decoded nodes, pointers as [`NodeId`]s
//! - **Decoder** ([`Decoder`]): binary to document, aliasing preserved
//! - **Encoder** ([`Encoder`]): document to binary, two-pass with back-patching
//! - **Text** ([`to_text`], [`from_text`]): document to and from JSON
//! - **Driver** ([`convert`]): headers, format selection and the full pipeline
//!
//! # Binary Layout
//!
//! ```text
//! [header][root][child structures in preorder][array runs][string pool]
//! ```
//!
//! Pointers are absolute file offsets and 0 is null. Strings are stored once
//! each, null-terminated, at the end of the file.

pub mod codec;
pub mod decoder;
pub mod document;
pub mod driver;
pub mod encoder;
mod error;
pub mod header;
pub mod layout;
pub mod project;
pub mod resolver;
pub mod schema;
pub mod string_pool;
pub mod text;

pub use decoder::{decode, Decoder};
pub use document::{ArrayValue, Document, Field, Node, NodeId, Value, ValueKind};
pub use driver::{convert, decode_binary, encode_binary, read_document, read_header, write_document, Format};
pub use encoder::{Encoded, Encoder};
pub use error::{Error, Result};
pub use header::AepHeader;
pub use layout::{Layouts, StructLayout};
pub use schema::{ElementType, FieldDef, FieldType, ScalarType, SchemaCatalog, StructSchema};
pub use text::{from_text, to_text};

pub use aeptools_common::PointerWidth;
