//! Binary structure decoder.
//!
//! Decoding starts at one structure and follows pointers through an explicit
//! worklist, so arbitrarily long pointer chains never recurse. Every offset
//! is decoded at most once; later pointers to the same offset become aliasing
//! references to the same [`NodeId`].

use aeptools_common::{BinaryReader, PointerWidth};
use tracing::debug;

use crate::codec::{read_cstring_at, read_scalar};
use crate::document::{ArrayValue, Document, Field, Node, NodeId, Value, ValueKind};
use crate::layout::{element_size, Layouts};
use crate::resolver::PointerResolver;
use crate::schema::{ElementType, FieldType, SchemaCatalog};
use crate::{Error, Result};

/// Decodes structures from a binary buffer according to a catalog.
pub struct Decoder<'a> {
    data: &'a [u8],
    catalog: &'a SchemaCatalog,
    layouts: Layouts,
}

impl<'a> Decoder<'a> {
    /// Create a decoder over `data` for the given pointer width.
    pub fn new(data: &'a [u8], catalog: &'a SchemaCatalog, width: PointerWidth) -> Self {
        Self {
            data,
            catalog,
            layouts: Layouts::new(catalog, width),
        }
    }

    /// Pointer width this decoder reads.
    pub fn width(&self) -> PointerWidth {
        self.layouts.width()
    }

    /// Decode the structure of `kind` at `offset` and everything it references.
    ///
    /// The returned document is canonical.
    pub fn decode_at(&self, offset: u64, kind: &str) -> Result<Document> {
        self.catalog.get(kind)?;
        if offset >= self.data.len() as u64 {
            return Err(Error::DanglingPointer {
                pointer: offset,
                at: 0,
                size: self.data.len(),
            });
        }

        let mut state = DecodeState {
            resolver: PointerResolver::new(self.data.len()),
            nodes: Vec::new(),
            pending: Vec::new(),
        };
        state.visit(offset, kind)?;

        while let Some((id, offset)) = state.pending.pop() {
            let kind = state.nodes[id.index()].kind.clone();
            let fields = self.decode_fields(&mut state, &kind, offset)?;
            state.nodes[id.index()].fields = fields;
        }

        debug!(
            kind,
            offset,
            nodes = state.nodes.len(),
            width = %self.width(),
            "decoded structure graph"
        );
        Document::from_parts(state.nodes, NodeId(0)).canonicalize()
    }

    fn decode_fields(&self, state: &mut DecodeState, kind: &str, base: u64) -> Result<Vec<Field>> {
        let schema = self.catalog.get(kind)?;
        let layout = self.layouts.get(kind)?;
        let mut fields: Vec<Field> = Vec::with_capacity(schema.fields.len());

        for (def, slot) in schema.fields.iter().zip(&layout.fields) {
            let at = base as usize + slot.offset;
            let value = match &def.ty {
                FieldType::Element(element) => self.read_element(state, element, at)?,
                FieldType::FixedArray { element, len } => {
                    let size = element_size(element, self.width());
                    let items = (0..*len)
                        .map(|i| self.read_element(state, element, at + i * size))
                        .collect::<Result<Vec<_>>>()?;
                    Value::FixedArray(ArrayValue::new(ValueKind::from(element), items))
                }
                FieldType::Array {
                    element,
                    count_field,
                } => {
                    let count = count_value(&fields, kind, &def.name, count_field)?;
                    let items = self.read_run(state, element, at, count)?;
                    Value::Array(ArrayValue::new(ValueKind::from(element), items))
                }
            };
            fields.push(Field {
                name: def.name.clone(),
                value,
            });
        }

        Ok(fields)
    }

    /// Read the out-of-line run of a counted array whose pointer lives at `at`.
    fn read_run(&self, state: &mut DecodeState, element: &ElementType, at: usize, count: usize) -> Result<Vec<Value>> {
        let raw = BinaryReader::new_at(self.data, at).read_pointer(self.width())?;
        let Some(start) = state.resolver.resolve(raw, at)? else {
            if count == 0 {
                return Ok(Vec::new());
            }
            return Err(Error::DanglingPointer {
                pointer: 0,
                at,
                size: self.data.len(),
            });
        };

        let start = start as usize;
        let size = element_size(element, self.width());
        let available = self.data.len() - start;
        match count.checked_mul(size) {
            Some(needed) if needed <= available => {}
            needed => {
                return Err(Error::TruncatedData {
                    offset: start,
                    needed: needed.unwrap_or(usize::MAX),
                    available,
                })
            }
        }

        (0..count)
            .map(|i| self.read_element(state, element, start + i * size))
            .collect()
    }

    fn read_element(&self, state: &mut DecodeState, element: &ElementType, at: usize) -> Result<Value> {
        let mut reader = BinaryReader::new_at(self.data, at);
        match element {
            ElementType::Scalar(ty) => read_scalar(&mut reader, *ty),
            ElementType::String => {
                let raw = reader.read_pointer(self.width())?;
                match state.resolver.resolve(raw, at)? {
                    Some(offset) => Ok(Value::String(Some(read_cstring_at(self.data, offset as usize)?))),
                    None => Ok(Value::String(None)),
                }
            }
            ElementType::Pointer(kind) => {
                let raw = reader.read_pointer(self.width())?;
                match state.resolver.resolve(raw, at)? {
                    Some(offset) => Ok(Value::Pointer(Some(state.visit(offset, kind)?))),
                    None => Ok(Value::Pointer(None)),
                }
            }
        }
    }
}

struct DecodeState {
    resolver: PointerResolver,
    nodes: Vec<Node>,
    pending: Vec<(NodeId, u64)>,
}

impl DecodeState {
    /// Node for the structure at `offset`, queueing it on first sight.
    fn visit(&mut self, offset: u64, kind: &str) -> Result<NodeId> {
        let (id, fresh) = self.resolver.lookup_or_insert(offset, kind)?;
        if fresh {
            debug_assert_eq!(id.index(), self.nodes.len());
            self.nodes.push(Node::new(kind));
            self.pending.push((id, offset));
        }
        Ok(id)
    }
}

/// Length of a counted array, taken from an already decoded sibling field.
fn count_value(fields: &[Field], kind: &str, field: &str, count_field: &str) -> Result<usize> {
    let invalid = |reason: String| Error::InvalidCountField {
        kind: kind.to_string(),
        field: field.to_string(),
        reason,
    };

    let value = fields
        .iter()
        .find(|f| f.name == count_field)
        .map(|f| &f.value)
        .ok_or_else(|| invalid(format!("count field '{}' not decoded before the array", count_field)))?;
    let count = value
        .as_integer()
        .ok_or_else(|| invalid(format!("count field '{}' is not an integer", count_field)))?;

    usize::try_from(count).map_err(|_| invalid(format!("count field '{}' is {}", count_field, count)))
}

/// Decode the structure of `kind` at `offset` in `data`.
pub fn decode(data: &[u8], offset: u64, kind: &str, width: PointerWidth, catalog: &SchemaCatalog) -> Result<Document> {
    Decoder::new(data, catalog, width).decode_at(offset, kind)
}
