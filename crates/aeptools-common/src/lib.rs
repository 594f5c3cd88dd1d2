//! Common utilities for aeptools.
//!
//! This crate provides the primitive layer shared by the AEP codec crates:
//!
//! - [`BinaryReader`] - Zero-copy little-endian reading from byte slices
//! - [`BinaryWriter`] - Little-endian writing with padding and pointer back-patching
//! - [`PointerWidth`] - The x86 (4 byte) / x64 (8 byte) pointer width switch

mod error;
mod reader;
mod width;
mod writer;

pub use error::{Error, Result};
pub use reader::BinaryReader;
pub use width::PointerWidth;
pub use writer::{align_up, BinaryWriter};

/// Re-export zerocopy traits for convenience
pub use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Re-export memchr for SIMD-accelerated byte searching
pub use memchr;
