//! aeptools - AEP animation project conversion library.
//!
//! This crate provides a unified interface to the aeptools crates.
//!
//! # Crates
//!
//! - [`aeptools_common`] - Common utilities (binary reading/writing, pointer widths)
//! - [`aeptools_format`] - Schema-driven x86/x64 binary and JSON text codec
//!
//! # Example
//!
//! ```no_run
//! use aeptools::prelude::*;
//!
//! let catalog = project::catalog()?;
//! let data = std::fs::read("effect.aep")?;
//!
//! let document = read_document(&data, Format::X86, &catalog)?;
//! println!("{}", project::summarize(&document)?);
//!
//! let json = write_document(&document, Format::Json, &catalog)?;
//! std::fs::write("effect.json", json)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Re-export all sub-crates
pub use aeptools_common as common;
pub use aeptools_format as format;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use aeptools_common::{BinaryReader, BinaryWriter, PointerWidth};
    pub use aeptools_format::project;
    pub use aeptools_format::{
        convert, read_document, read_header, write_document, AepHeader, Document, Format, Node, NodeId, SchemaCatalog,
        Value,
    };
}

// Re-export commonly used types at the crate root
pub use aeptools_format::{Error, Result};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
