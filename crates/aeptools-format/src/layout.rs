//! Structure layout per pointer width.
//!
//! Field offsets follow natural C alignment: every slot is aligned to its own
//! size (pointers to the pointer width), and a structure's size is rounded up
//! to its largest alignment. The same catalog therefore yields different
//! layouts for x86 and x64 whenever a structure contains pointers.

use aeptools_common::{align_up, PointerWidth};
use hashbrown::HashMap as FastHashMap;
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;

use crate::schema::{ElementType, FieldType, SchemaCatalog, StructSchema};
use crate::{Error, Result};

type FxHashMap<K, V> = FastHashMap<K, V, BuildHasherDefault<FxHasher>>;

/// Position and size of one field inside a structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    /// Offset from the start of the structure.
    pub offset: usize,
    /// Size of the field's inline storage.
    pub size: usize,
}

/// Computed layout of one structure kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    /// Total size including trailing padding (never zero).
    pub size: usize,
    /// Alignment of the structure.
    pub align: usize,
    /// Per-field layout, parallel to the schema's field list.
    pub fields: Vec<FieldLayout>,
}

impl StructLayout {
    /// Compute the layout of a structure for the given pointer width.
    pub fn compute(schema: &StructSchema, width: PointerWidth) -> Self {
        let mut cursor = 0;
        let mut align = 1;
        let mut fields = Vec::with_capacity(schema.fields.len());

        for field in &schema.fields {
            let (size, field_align) = field_size_align(&field.ty, width);
            cursor = align_up(cursor, field_align);
            fields.push(FieldLayout {
                offset: cursor,
                size,
            });
            cursor += size;
            align = align.max(field_align);
        }

        // Empty structures still occupy a byte so distinct nodes get distinct offsets.
        let size = align_up(cursor.max(1), align);
        Self {
            size,
            align,
            fields,
        }
    }
}

/// Size (and alignment) of one element slot.
pub fn element_size(element: &ElementType, width: PointerWidth) -> usize {
    match element {
        ElementType::Scalar(ty) => ty.size(),
        ElementType::String | ElementType::Pointer(_) => width.bytes(),
    }
}

fn field_size_align(ty: &FieldType, width: PointerWidth) -> (usize, usize) {
    match ty {
        FieldType::Element(element) => {
            let size = element_size(element, width);
            (size, size)
        }
        FieldType::FixedArray { element, len } => {
            let size = element_size(element, width);
            (size * len, size)
        }
        FieldType::Array { .. } => (width.bytes(), width.bytes()),
    }
}

/// Layouts of every structure in a catalog, for one pointer width.
#[derive(Debug, Clone)]
pub struct Layouts {
    width: PointerWidth,
    layouts: FxHashMap<String, StructLayout>,
}

impl Layouts {
    /// Compute layouts for every structure kind in the catalog.
    pub fn new(catalog: &SchemaCatalog, width: PointerWidth) -> Self {
        let layouts = catalog
            .iter()
            .map(|schema| (schema.name.clone(), StructLayout::compute(schema, width)))
            .collect();
        Self { width, layouts }
    }

    /// The pointer width these layouts were computed for.
    pub fn width(&self) -> PointerWidth {
        self.width
    }

    /// Layout of a structure kind.
    pub fn get(&self, kind: &str) -> Result<&StructLayout> {
        self.layouts
            .get(kind)
            .ok_or_else(|| Error::UnknownStructureKind(kind.to_string()))
    }
}
