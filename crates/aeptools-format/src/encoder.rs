//! Binary structure encoder.
//!
//! Encoding is two-pass. The first pass validates every reachable node
//! against the catalog and assigns offsets: structures in canonical preorder,
//! then counted-array runs, then the deduplicated string pool. The second pass
//! writes the bytes, leaving node pointers as zero placeholders that are
//! back-patched once everything is written.
//!
//! ```text
//! [base][root][children in preorder][array runs][string pool]
//! ```

use aeptools_common::{align_up, BinaryWriter, PointerWidth};
use hashbrown::HashMap as FastHashMap;
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;
use tracing::{debug, warn};

use crate::codec::write_scalar;
use crate::document::{Document, Node, NodeId, Value, ValueKind};
use crate::layout::{element_size, Layouts};
use crate::resolver::PointerTable;
use crate::schema::{ElementType, FieldType, SchemaCatalog, StructSchema};
use crate::string_pool::StringPool;
use crate::{Error, Result};

type FxHashMap<K, V> = FastHashMap<K, V, BuildHasherDefault<FxHasher>>;

/// Output of [`Encoder::encode`].
#[derive(Debug, Clone)]
pub struct Encoded {
    /// Encoded bytes; the first `base` bytes are zero and reserved for a header.
    pub bytes: Vec<u8>,
    /// Offset of the root structure.
    pub root_offset: u64,
    /// Number of structures written.
    pub structures: usize,
    /// Number of distinct pooled strings.
    pub strings: usize,
}

/// Lays out and writes documents according to a catalog.
pub struct Encoder<'a> {
    catalog: &'a SchemaCatalog,
    layouts: Layouts,
}

/// The string pool together with its absolute start offset.
struct PoolRef<'p> {
    pool: &'p StringPool,
    base: u64,
}

/// Placement decided in the first pass.
struct Plan {
    order: Vec<NodeId>,
    table: PointerTable,
    runs: FxHashMap<(NodeId, usize), u64>,
    run_order: Vec<(NodeId, usize)>,
    pool: StringPool,
    pool_base: usize,
}

impl<'a> Encoder<'a> {
    /// Create an encoder for the given pointer width.
    pub fn new(catalog: &'a SchemaCatalog, width: PointerWidth) -> Self {
        Self {
            catalog,
            layouts: Layouts::new(catalog, width),
        }
    }

    /// Pointer width this encoder writes.
    pub fn width(&self) -> PointerWidth {
        self.layouts.width()
    }

    /// Encode a document, placing the root after `base` reserved bytes.
    ///
    /// `base` must be non-zero since offset 0 encodes a null pointer.
    pub fn encode(&self, document: &Document, base: usize) -> Result<Encoded> {
        if base == 0 {
            return Err(Error::Layout("structures cannot start at offset 0".to_string()));
        }

        let order = self.validated_order(document)?;
        if order.len() < document.len() {
            warn!(
                dropped = document.len() - order.len(),
                "skipping nodes unreachable from the root"
            );
        }

        let mut plan = self.plan(document, order, base)?;
        let bytes = self.write(document, &mut plan, base)?;
        let root_offset = plan.table.offset_of(document.root())?;

        debug!(
            structures = plan.order.len(),
            runs = plan.run_order.len(),
            strings = plan.pool.count(),
            fixups = plan.table.fixup_count(),
            size = bytes.len(),
            width = %self.width(),
            "encoded document"
        );

        Ok(Encoded {
            bytes,
            root_offset,
            structures: plan.order.len(),
            strings: plan.pool.count(),
        })
    }

    /// Check every node reachable from the root against the catalog.
    pub fn validate(&self, document: &Document) -> Result<()> {
        self.validated_order(document).map(|_| ())
    }

    fn validated_order(&self, document: &Document) -> Result<Vec<NodeId>> {
        let order = document.preorder()?;
        for &id in &order {
            self.validate_node(document, id)?;
        }
        Ok(order)
    }

    /// First pass: assign every structure, run and string its offset.
    fn plan(&self, document: &Document, order: Vec<NodeId>, base: usize) -> Result<Plan> {
        let width = self.width();
        let mut table = PointerTable::new();
        let mut cursor = base;

        for &id in &order {
            let layout = self.layouts.get(&node(document, id)?.kind)?;
            cursor = align_up(cursor, layout.align);
            table.reserve(id)?;
            table.commit(id, cursor as u64)?;
            cursor += layout.size;
        }

        let mut runs = FxHashMap::default();
        let mut run_order = Vec::new();
        for &id in &order {
            let node = node(document, id)?;
            let schema = self.catalog.get(&node.kind)?;
            for (index, (def, field)) in schema.fields.iter().zip(&node.fields).enumerate() {
                let (FieldType::Array { element, .. }, Value::Array(array)) = (&def.ty, &field.value) else {
                    continue;
                };
                if array.items.is_empty() {
                    continue;
                }
                let size = element_size(element, width);
                cursor = align_up(cursor, size);
                runs.insert((id, index), cursor as u64);
                run_order.push((id, index));
                cursor += size * array.items.len();
            }
        }

        let mut pool = StringPool::new();
        for &id in &order {
            for field in &node(document, id)?.fields {
                for s in field.value.strings() {
                    pool.intern(s);
                }
            }
        }

        Ok(Plan {
            order,
            table,
            runs,
            run_order,
            pool,
            pool_base: cursor,
        })
    }

    /// Second pass: write bytes, then patch node pointers.
    fn write(&self, document: &Document, plan: &mut Plan, base: usize) -> Result<Vec<u8>> {
        let width = self.width();
        let Plan {
            order,
            table,
            runs,
            run_order,
            pool,
            pool_base,
        } = plan;
        let strings = PoolRef {
            pool,
            base: *pool_base as u64,
        };

        let mut writer = BinaryWriter::with_capacity(*pool_base + pool.len());
        writer.pad_to(base)?;

        for &id in order.iter() {
            let node = node(document, id)?;
            let layout = self.layouts.get(&node.kind)?;
            let start = table.offset_of(id)? as usize;

            for (index, (field, slot)) in node.fields.iter().zip(&layout.fields).enumerate() {
                writer.pad_to(start + slot.offset)?;
                match &field.value {
                    Value::FixedArray(array) => {
                        for item in &array.items {
                            self.write_element(&mut writer, &strings, table, item)?;
                        }
                    }
                    Value::Array(_) => {
                        let run = runs.get(&(id, index)).copied().unwrap_or(0);
                        writer.write_pointer(width, run)?;
                    }
                    value => self.write_element(&mut writer, &strings, table, value)?,
                }
            }
            writer.pad_to(start + layout.size)?;
        }

        for &(id, index) in run_order.iter() {
            let offset = runs.get(&(id, index)).copied().unwrap_or(0);
            writer.pad_to(offset as usize)?;
            if let Some(array) = node(document, id)?.fields[index].value.as_array() {
                for item in &array.items {
                    self.write_element(&mut writer, &strings, table, item)?;
                }
            }
        }

        writer.pad_to(*pool_base)?;
        pool.write(&mut writer);
        table.apply_fixups(&mut writer, width)?;

        Ok(writer.into_inner())
    }

    fn write_element(
        &self,
        writer: &mut BinaryWriter,
        strings: &PoolRef<'_>,
        table: &mut PointerTable,
        value: &Value,
    ) -> Result<()> {
        let width = self.width();
        match value {
            Value::String(None) | Value::Pointer(None) => writer.write_pointer(width, 0)?,
            Value::String(Some(s)) => {
                let offset = strings
                    .pool
                    .get(s)
                    .ok_or_else(|| Error::Layout(format!("string {:?} missing from pool", s)))?;
                writer.write_pointer(width, strings.base + offset)?;
            }
            Value::Pointer(Some(target)) => {
                table.record_fixup(writer.position(), *target);
                writer.write_pointer(width, 0)?;
            }
            scalar => write_scalar(writer, scalar)?,
        }
        Ok(())
    }

    /// Check a node's fields against its schema.
    fn validate_node(&self, document: &Document, id: NodeId) -> Result<()> {
        let node = node(document, id)?;
        let schema = self.catalog.get(&node.kind)?;
        let mismatch = |field: Option<&str>, reason: String| Error::SchemaMismatch {
            path: match field {
                Some(name) => format!("{}{}.{}", node.kind, id, name),
                None => format!("{}{}", node.kind, id),
            },
            reason,
        };

        if node.fields.len() != schema.fields.len() {
            return Err(mismatch(
                None,
                format!("expected {} fields, found {}", schema.fields.len(), node.fields.len()),
            ));
        }

        for (def, field) in schema.fields.iter().zip(&node.fields) {
            if def.name != field.name {
                return Err(mismatch(
                    None,
                    format!("expected field '{}', found '{}'", def.name, field.name),
                ));
            }
            let check = |element: &ElementType, value: &Value| {
                check_element(document, element, value).map_err(|reason| mismatch(Some(def.name.as_str()), reason))
            };

            match (&def.ty, &field.value) {
                (FieldType::Element(element), value) => check(element, value)?,
                (FieldType::FixedArray { element, len }, Value::FixedArray(array)) => {
                    if array.items.len() != *len {
                        return Err(mismatch(
                            Some(def.name.as_str()),
                            format!("expected {} elements, found {}", len, array.items.len()),
                        ));
                    }
                    check_array_kind(element, array.element).map_err(|r| mismatch(Some(def.name.as_str()), r))?;
                    array.items.iter().try_for_each(|item| check(element, item))?;
                }
                (
                    FieldType::Array {
                        element,
                        count_field,
                    },
                    Value::Array(array),
                ) => {
                    check_array_kind(element, array.element).map_err(|r| mismatch(Some(def.name.as_str()), r))?;
                    array.items.iter().try_for_each(|item| check(element, item))?;
                    check_count(schema, node, count_field, array.items.len())
                        .map_err(|r| mismatch(Some(def.name.as_str()), r))?;
                }
                (ty, value) => {
                    return Err(mismatch(
                        Some(def.name.as_str()),
                        format!("expected {}, found {}", ty, value.type_tag()),
                    ))
                }
            }
        }
        Ok(())
    }
}

fn node(document: &Document, id: NodeId) -> Result<&Node> {
    document.node(id).ok_or_else(|| Error::SchemaMismatch {
        path: id.to_string(),
        reason: "node does not exist".to_string(),
    })
}

fn check_element(document: &Document, element: &ElementType, value: &Value) -> std::result::Result<(), String> {
    match (element, value) {
        (ElementType::Scalar(ty), value) if value.scalar_type() == Some(*ty) => Ok(()),
        (ElementType::String, Value::String(None)) => Ok(()),
        (ElementType::String, Value::String(Some(s))) if s.contains('\0') => {
            Err("string contains a NUL byte".to_string())
        }
        (ElementType::String, Value::String(Some(_))) => Ok(()),
        (ElementType::Pointer(_), Value::Pointer(None)) => Ok(()),
        (ElementType::Pointer(kind), Value::Pointer(Some(target))) => match document.node(*target) {
            Some(node) if &node.kind == kind => Ok(()),
            Some(node) => Err(format!("pointer to {}{} where {} was expected", node.kind, target, kind)),
            None => Err(format!("pointer to missing node {}", target)),
        },
        (element, value) => Err(format!("expected {}, found {}", element, value.type_tag())),
    }
}

fn check_array_kind(element: &ElementType, kind: ValueKind) -> std::result::Result<(), String> {
    if ValueKind::from(element) == kind {
        Ok(())
    } else {
        Err(format!("expected elements of {}, found {}", element, kind))
    }
}

fn check_count(schema: &StructSchema, node: &Node, count_field: &str, len: usize) -> std::result::Result<(), String> {
    let count = schema
        .field_index(count_field)
        .and_then(|index| node.fields.get(index))
        .and_then(|field| field.value.as_integer())
        .ok_or_else(|| format!("count field '{}' is not an integer", count_field))?;
    if count != len as i128 {
        return Err(format!("count field '{}' is {} but the array has {} elements", count_field, count, len));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ArrayValue;
    use crate::schema::ScalarType;

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::from_structs([
            StructSchema::new("Root", 1)
                .field("name", FieldType::string())
                .field("count", FieldType::scalar(ScalarType::U8))
                .field("items", FieldType::array(ElementType::Pointer("Leaf".into()), "count")),
            StructSchema::new("Leaf", 2)
                .field("value", FieldType::scalar(ScalarType::U16))
                .field("label", FieldType::string()),
        ])
        .unwrap()
    }

    fn document(count: u8) -> Document {
        let mut doc = Document::new(Node::new("Root"));
        let leaf = doc.add(
            Node::new("Leaf")
                .with("value", Value::U16(7))
                .with("label", Value::string("shared")),
        );
        let root = doc.node_mut(NodeId(0)).unwrap();
        *root = Node::new("Root")
            .with("name", Value::string("shared"))
            .with("count", Value::U8(count))
            .with(
                "items",
                Value::Array(ArrayValue::new(
                    ValueKind::Pointer,
                    vec![Value::Pointer(Some(leaf)), Value::Pointer(Some(leaf))],
                )),
            );
        doc
    }

    #[test]
    fn test_layout_and_backpatching() {
        let catalog = catalog();
        let encoded = Encoder::new(&catalog, PointerWidth::X86).encode(&document(2), 4).unwrap();
        let bytes = &encoded.bytes;

        // base 4 | Root @4 (12 bytes) | Leaf @16 (8 bytes) | run @24 (2 ptrs) | pool @32
        assert_eq!(encoded.root_offset, 4);
        assert_eq!(&bytes[..4], &[0; 4]);
        assert_eq!(&bytes[4..8], &32u32.to_le_bytes());
        assert_eq!(bytes[8], 2);
        assert_eq!(&bytes[12..16], &24u32.to_le_bytes());
        assert_eq!(&bytes[16..18], &7u16.to_le_bytes());
        assert_eq!(&bytes[20..24], &32u32.to_le_bytes());
        assert_eq!(&bytes[24..28], &16u32.to_le_bytes());
        assert_eq!(&bytes[28..32], &16u32.to_le_bytes());
        assert_eq!(&bytes[32..], b"shared\0");
        assert_eq!(encoded.strings, 1);
        assert_eq!(encoded.structures, 2);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let catalog = catalog();
        let encoder = Encoder::new(&catalog, PointerWidth::X64);
        let a = encoder.encode(&document(2), 8).unwrap();
        let b = encoder.encode(&document(2), 8).unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn test_count_mismatch_is_rejected() {
        let catalog = catalog();
        let err = Encoder::new(&catalog, PointerWidth::X86)
            .encode(&document(3), 4)
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { ref path, .. } if path == "Root#0.items"));
    }

    #[test]
    fn test_wrong_scalar_type_is_rejected() {
        let catalog = catalog();
        let mut doc = document(2);
        doc.node_mut(NodeId(1)).unwrap().set("value", Value::U32(7));
        assert!(matches!(
            Encoder::new(&catalog, PointerWidth::X86).encode(&doc, 4),
            Err(Error::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_wrong_pointer_kind_is_rejected() {
        let catalog = catalog();
        let mut doc = document(2);
        doc.node_mut(NodeId(0)).unwrap().set(
            "items",
            Value::Array(ArrayValue::new(
                ValueKind::Pointer,
                vec![Value::Pointer(Some(NodeId(0))), Value::Pointer(Some(NodeId(1)))],
            )),
        );
        assert!(matches!(
            Encoder::new(&catalog, PointerWidth::X86).encode(&doc, 4),
            Err(Error::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let catalog = catalog();
        let doc = Document::new(Node::new("Leaf").with("value", Value::U16(1)));
        assert!(matches!(
            Encoder::new(&catalog, PointerWidth::X86).encode(&doc, 4),
            Err(Error::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_zero_base_is_rejected() {
        let catalog = catalog();
        assert!(matches!(
            Encoder::new(&catalog, PointerWidth::X86).encode(&document(2), 0),
            Err(Error::Layout(_))
        ));
    }
}
