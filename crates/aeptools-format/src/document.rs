//! Pointer-free logical tree of decoded structures.
//!
//! A [`Document`] is an arena of [`Node`]s addressed by [`NodeId`]. Pointer
//! fields hold node ids rather than offsets, so a node referenced from two
//! places (an aliasing edge) is simply the same id appearing twice.
//!
//! Documents returned by the decoders are *canonical*: node ids follow a
//! depth-first preorder walk from the root (field order, first occurrence),
//! which is also the order the encoder lays structures out in.

use std::fmt;

use hashbrown::HashMap as FastHashMap;
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;

use crate::schema::{ElementType, ScalarType};
use crate::{Error, Result};

type FxHashMap<K, V> = FastHashMap<K, V, BuildHasherDefault<FxHasher>>;

/// Index of a node inside its [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Arena index of this node.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Element type carried by array values.
///
/// Unlike the schema's element type, pointers carry no target kind here; the
/// target node knows its own kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Scalar(ScalarType),
    String,
    Pointer,
}

impl From<&ElementType> for ValueKind {
    fn from(element: &ElementType) -> Self {
        match element {
            ElementType::Scalar(ty) => Self::Scalar(*ty),
            ElementType::String => Self::String,
            ElementType::Pointer(_) => Self::Pointer,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(ty) => write!(f, "{}", ty),
            Self::String => f.write_str("string"),
            Self::Pointer => f.write_str("ptr"),
        }
    }
}

/// An array value together with its element type.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    pub element: ValueKind,
    pub items: Vec<Value>,
}

impl ArrayValue {
    pub fn new(element: ValueKind, items: Vec<Value>) -> Self {
        Self { element, items }
    }
}

/// A field value.
#[derive(Debug, Clone)]
pub enum Value {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    /// String contents, `None` for a null string pointer.
    String(Option<String>),
    /// Referenced node, `None` for a null pointer.
    Pointer(Option<NodeId>),
    /// Inline array with a schema-fixed length.
    FixedArray(ArrayValue),
    /// Counted array stored out of line.
    Array(ArrayValue),
}

impl Value {
    /// Convenience constructor for a non-null string.
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(Some(value.into()))
    }

    /// The scalar type of this value, if it is a scalar.
    pub fn scalar_type(&self) -> Option<ScalarType> {
        Some(match self {
            Self::I8(_) => ScalarType::I8,
            Self::U8(_) => ScalarType::U8,
            Self::I16(_) => ScalarType::I16,
            Self::U16(_) => ScalarType::U16,
            Self::I32(_) => ScalarType::I32,
            Self::U32(_) => ScalarType::U32,
            Self::I64(_) => ScalarType::I64,
            Self::U64(_) => ScalarType::U64,
            Self::F32(_) => ScalarType::F32,
            Self::F64(_) => ScalarType::F64,
            Self::Bool(_) => ScalarType::Bool,
            _ => return None,
        })
    }

    /// Element kind of a non-array value.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Self::String(_) => Some(ValueKind::String),
            Self::Pointer(_) => Some(ValueKind::Pointer),
            Self::FixedArray(_) | Self::Array(_) => None,
            scalar => scalar.scalar_type().map(ValueKind::Scalar),
        }
    }

    /// Type tag as used by the text form: `u32`, `string`, `ptr`, `f32[3]`, `u8[]`.
    pub fn type_tag(&self) -> String {
        match self {
            Self::FixedArray(array) => format!("{}[{}]", array.element, array.items.len()),
            Self::Array(array) => format!("{}[]", array.element),
            other => other.kind().map(|kind| kind.to_string()).unwrap_or_default(),
        }
    }

    /// Integer value widened to i128.
    pub fn as_integer(&self) -> Option<i128> {
        match *self {
            Self::I8(v) => Some(v.into()),
            Self::U8(v) => Some(v.into()),
            Self::I16(v) => Some(v.into()),
            Self::U16(v) => Some(v.into()),
            Self::I32(v) => Some(v.into()),
            Self::U32(v) => Some(v.into()),
            Self::I64(v) => Some(v.into()),
            Self::U64(v) => Some(v.into()),
            _ => None,
        }
    }

    /// String contents, if this is a non-null string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(Some(s)) => Some(s),
            _ => None,
        }
    }

    /// Pointer target, if this is a non-null pointer.
    pub fn as_pointer(&self) -> Option<NodeId> {
        match self {
            Self::Pointer(target) => *target,
            _ => None,
        }
    }

    /// Items of a fixed or counted array.
    pub fn as_array(&self) -> Option<&ArrayValue> {
        match self {
            Self::FixedArray(array) | Self::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Every node referenced by this value, in element order.
    pub fn pointers(&self) -> impl Iterator<Item = NodeId> + '_ {
        let (single, items): (Option<NodeId>, &[Value]) = match self {
            Self::Pointer(target) => (*target, &[]),
            Self::FixedArray(array) | Self::Array(array) => (None, &array.items),
            _ => (None, &[]),
        };
        single
            .into_iter()
            .chain(items.iter().filter_map(Value::as_pointer))
    }

    /// Every string referenced by this value, in element order.
    pub fn strings(&self) -> impl Iterator<Item = &str> + '_ {
        let (single, items): (Option<&str>, &[Value]) = match self {
            Self::String(s) => (s.as_deref(), &[]),
            Self::FixedArray(array) | Self::Array(array) => (None, &array.items),
            _ => (None, &[]),
        };
        single.into_iter().chain(items.iter().filter_map(Value::as_str))
    }

    fn map_pointers(&self, remap: &impl Fn(NodeId) -> NodeId) -> Value {
        match self {
            Self::Pointer(target) => Self::Pointer(target.map(remap)),
            Self::FixedArray(array) => Self::FixedArray(array.map_pointers(remap)),
            Self::Array(array) => Self::Array(array.map_pointers(remap)),
            other => other.clone(),
        }
    }
}

impl ArrayValue {
    fn map_pointers(&self, remap: &impl Fn(NodeId) -> NodeId) -> ArrayValue {
        ArrayValue {
            element: self.element,
            items: self.items.iter().map(|v| v.map_pointers(remap)).collect(),
        }
    }
}

/// Compares floats by bit pattern so NaN payloads survive round-trip checks.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::F32(a), Self::F32(b)) => a.to_bits() == b.to_bits(),
            (Self::F64(a), Self::F64(b)) => a.to_bits() == b.to_bits(),
            (Self::I8(a), Self::I8(b)) => a == b,
            (Self::U8(a), Self::U8(b)) => a == b,
            (Self::I16(a), Self::I16(b)) => a == b,
            (Self::U16(a), Self::U16(b)) => a == b,
            (Self::I32(a), Self::I32(b)) => a == b,
            (Self::U32(a), Self::U32(b)) => a == b,
            (Self::I64(a), Self::I64(b)) => a == b,
            (Self::U64(a), Self::U64(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Pointer(a), Self::Pointer(b)) => a == b,
            (Self::FixedArray(a), Self::FixedArray(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            _ => false,
        }
    }
}

/// A named field value.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: Value,
}

/// One decoded structure instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Structure kind (schema name).
    pub kind: String,
    /// Fields in schema order.
    pub fields: Vec<Field>,
}

impl Node {
    /// Create a node with no fields.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field (builder style).
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.push(Field {
            name: name.into(),
            value,
        });
        self
    }

    /// Look up a field value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    /// Replace a field value, or append it if absent.
    pub fn set(&mut self, name: &str, value: Value) {
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(field) => field.value = value,
            None => self.fields.push(Field {
                name: name.to_string(),
                value,
            }),
        }
    }

    /// Referenced nodes in field order.
    pub fn pointers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.fields.iter().flat_map(|f| f.value.pointers())
    }
}

/// A logical tree: an arena of nodes plus the root id.
///
/// Equality is structural: two documents are equal when their graphs match
/// under a one-to-one node correspondence, independent of numbering.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Document {
    /// Create a document whose root is `root` (id `#0`).
    pub fn new(root: Node) -> Self {
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    pub(crate) fn from_parts(nodes: Vec<Node>, root: NodeId) -> Self {
        Self { nodes, root }
    }

    /// Add a node to the arena.
    pub fn add(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Root node.
    pub fn root_node(&self) -> &Node {
        &self.nodes[self.root.index()]
    }

    /// Node by id.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Mutable node by id.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index())
    }

    /// All nodes with their ids.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId(i as u32), node))
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena is empty (never true for constructed documents).
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth-first preorder of the nodes reachable from the root.
    ///
    /// Children are visited in field order and every node appears once, at
    /// its first occurrence. The walk is iterative so long pointer chains do
    /// not exhaust the stack.
    pub fn preorder(&self) -> Result<Vec<NodeId>> {
        let mut visited = vec![false; self.nodes.len()];
        let mut order = Vec::new();
        let mut stack = vec![self.root];
        let mut children = Vec::new();

        while let Some(id) = stack.pop() {
            let node = self.node(id).ok_or_else(|| Error::SchemaMismatch {
                path: id.to_string(),
                reason: "pointer to a node that does not exist".to_string(),
            })?;
            if visited[id.index()] {
                continue;
            }
            visited[id.index()] = true;
            order.push(id);

            children.clear();
            children.extend(node.pointers());
            stack.extend(children.iter().rev());
        }

        Ok(order)
    }

    /// Renumber nodes into canonical preorder, dropping unreachable nodes.
    pub fn canonicalize(&self) -> Result<Document> {
        let order = self.preorder()?;
        let mut remap = vec![NodeId(u32::MAX); self.nodes.len()];
        for (new, old) in order.iter().enumerate() {
            remap[old.index()] = NodeId(new as u32);
        }

        let nodes = order
            .iter()
            .map(|&old| {
                let node = &self.nodes[old.index()];
                Node {
                    kind: node.kind.clone(),
                    fields: node
                        .fields
                        .iter()
                        .map(|f| Field {
                            name: f.name.clone(),
                            value: f.value.map_pointers(&|id| remap[id.index()]),
                        })
                        .collect(),
                }
            })
            .collect();

        Ok(Document {
            nodes,
            root: NodeId(0),
        })
    }

    /// Whether node ids already follow canonical preorder with no unreachable nodes.
    pub fn is_canonical(&self) -> bool {
        self.root == NodeId(0)
            && self.preorder().is_ok_and(|order| {
                order.len() == self.nodes.len()
                    && order.iter().enumerate().all(|(i, id)| id.index() == i)
            })
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        let mut forward: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        let mut backward: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        let mut pending = Vec::new();

        if !bind(self.root, other.root, &mut forward, &mut backward, &mut pending) {
            return false;
        }

        while let Some((a, b)) = pending.pop() {
            let (Some(left), Some(right)) = (self.node(a), other.node(b)) else {
                return false;
            };
            if left.kind != right.kind || left.fields.len() != right.fields.len() {
                return false;
            }
            for (lf, rf) in left.fields.iter().zip(&right.fields) {
                if lf.name != rf.name
                    || !values_match(&lf.value, &rf.value, &mut forward, &mut backward, &mut pending)
                {
                    return false;
                }
            }
        }
        true
    }
}

/// Record the correspondence `a <-> b`, failing if either side is already bound elsewhere.
fn bind(
    a: NodeId,
    b: NodeId,
    forward: &mut FxHashMap<NodeId, NodeId>,
    backward: &mut FxHashMap<NodeId, NodeId>,
    pending: &mut Vec<(NodeId, NodeId)>,
) -> bool {
    match (forward.get(&a), backward.get(&b)) {
        (Some(&mapped), _) => mapped == b,
        (None, Some(_)) => false,
        (None, None) => {
            forward.insert(a, b);
            backward.insert(b, a);
            pending.push((a, b));
            true
        }
    }
}

fn values_match(
    a: &Value,
    b: &Value,
    forward: &mut FxHashMap<NodeId, NodeId>,
    backward: &mut FxHashMap<NodeId, NodeId>,
    pending: &mut Vec<(NodeId, NodeId)>,
) -> bool {
    match (a, b) {
        (Value::Pointer(None), Value::Pointer(None)) => true,
        (Value::Pointer(Some(x)), Value::Pointer(Some(y))) => bind(*x, *y, forward, backward, pending),
        (Value::FixedArray(x), Value::FixedArray(y)) | (Value::Array(x), Value::Array(y)) => {
            x.element == y.element
                && x.items.len() == y.items.len()
                && x.items
                    .iter()
                    .zip(&y.items)
                    .all(|(l, r)| values_match(l, r, forward, backward, pending))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// root -> [a, b], a -> b (alias), b -> root (back-reference)
    fn diamond() -> Document {
        let mut doc = Document::new(Node::new("Root"));
        let a = doc.add(Node::new("Leaf"));
        let b = doc.add(Node::new("Leaf"));
        doc.node_mut(a).unwrap().set("next", Value::Pointer(Some(b)));
        doc.node_mut(b).unwrap().set("next", Value::Pointer(Some(NodeId(0))));
        doc.node_mut(NodeId(0)).unwrap().set(
            "children",
            Value::Array(ArrayValue::new(
                ValueKind::Pointer,
                vec![Value::Pointer(Some(a)), Value::Pointer(Some(b))],
            )),
        );
        doc
    }

    #[test]
    fn test_preorder_follows_first_occurrence() {
        let doc = diamond();
        assert_eq!(doc.preorder().unwrap(), vec![NodeId(0), NodeId(1), NodeId(2)]);
        assert!(doc.is_canonical());
    }

    #[test]
    fn test_canonicalize_renumbers_and_drops_unreachable() {
        let mut doc = Document::new(Node::new("Root"));
        let orphan = doc.add(Node::new("Leaf").with("v", Value::U8(9)));
        let child = doc.add(Node::new("Leaf").with("v", Value::U8(1)));
        doc.node_mut(NodeId(0)).unwrap().set("child", Value::Pointer(Some(child)));
        assert_ne!(orphan, child);
        assert!(!doc.is_canonical());

        let canonical = doc.canonicalize().unwrap();
        assert_eq!(canonical.len(), 2);
        assert!(canonical.is_canonical());
        assert_eq!(canonical.root_node().get("child"), Some(&Value::Pointer(Some(NodeId(1)))));
        assert_eq!(canonical, doc);
    }

    #[test]
    fn test_equality_respects_aliasing() {
        let shared = diamond();

        // Same shape, but the second child is a distinct copy instead of an alias.
        let mut copied = Document::new(Node::new("Root"));
        let a = copied.add(Node::new("Leaf"));
        let b = copied.add(Node::new("Leaf"));
        let b2 = copied.add(Node::new("Leaf"));
        copied.node_mut(a).unwrap().set("next", Value::Pointer(Some(b)));
        copied.node_mut(b).unwrap().set("next", Value::Pointer(Some(NodeId(0))));
        copied.node_mut(b2).unwrap().set("next", Value::Pointer(Some(NodeId(0))));
        copied.node_mut(NodeId(0)).unwrap().set(
            "children",
            Value::Array(ArrayValue::new(
                ValueKind::Pointer,
                vec![Value::Pointer(Some(a)), Value::Pointer(Some(b2))],
            )),
        );

        assert_ne!(shared, copied);
        assert_eq!(shared, shared.canonicalize().unwrap());
    }

    #[test]
    fn test_type_tags() {
        assert_eq!(Value::I16(1).type_tag(), "i16");
        assert_eq!(Value::String(None).type_tag(), "string");
        assert_eq!(Value::Pointer(None).type_tag(), "ptr");
        let rgb = ArrayValue::new(ValueKind::Scalar(ScalarType::U8), vec![Value::U8(0); 3]);
        assert_eq!(Value::FixedArray(rgb.clone()).type_tag(), "u8[3]");
        assert_eq!(Value::Array(rgb).type_tag(), "u8[]");
    }

    #[test]
    fn test_float_equality_by_bits() {
        assert_eq!(Value::F32(f32::NAN), Value::F32(f32::NAN));
        assert_ne!(Value::F64(0.0), Value::F64(-0.0));
    }

    #[test]
    fn test_missing_node_is_reported() {
        let doc = Document::new(Node::new("Root").with("p", Value::Pointer(Some(NodeId(5)))));
        assert!(matches!(doc.preorder(), Err(Error::SchemaMismatch { .. })));
    }
}
