//! Schema catalog: typed field descriptors per structure kind.
//!
//! The codec is data-driven: every structure is described by a
//! [`StructSchema`], an ordered list of named, typed fields. Field types use a
//! compact textual grammar so catalogs can be kept as JSON files:
//!
//! | Grammar              | Meaning                                              |
//! |----------------------|------------------------------------------------------|
//! | `i8` … `u64`, `f32`, `f64`, `bool` | inline scalar                          |
//! | `string`             | pointer to a null-terminated string (nullable)       |
//! | `ptr<Kind>`          | pointer to a `Kind` structure (nullable)             |
//! | `<elem>[N]`          | `N` elements stored inline                           |
//! | `<elem>[count]`      | pointer to a run of elements, length read from the earlier integer field `count` |
//!
//! where `<elem>` is a scalar, `string` or `ptr<Kind>`.

use std::fmt;
use std::str::FromStr;

use hashbrown::HashMap as FastHashMap;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::hash::BuildHasherDefault;

use crate::{Error, Result};

type FxHashMap<K, V> = FastHashMap<K, V, BuildHasherDefault<FxHasher>>;

/// Fixed-width scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Bool,
}

impl ScalarType {
    /// All scalar types, in grammar order.
    pub const ALL: [ScalarType; 11] = [
        Self::I8,
        Self::U8,
        Self::I16,
        Self::U16,
        Self::I32,
        Self::U32,
        Self::I64,
        Self::U64,
        Self::F32,
        Self::F64,
        Self::Bool,
    ];

    /// Size in bytes (also the natural alignment).
    pub const fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 | Self::Bool => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    /// Whether this is an integer type (usable as an array count).
    pub const fn is_integer(self) -> bool {
        !matches!(self, Self::F32 | Self::F64 | Self::Bool)
    }

    /// Inclusive value range for integer types.
    pub const fn integer_range(self) -> Option<(i128, i128)> {
        match self {
            Self::I8 => Some((i8::MIN as i128, i8::MAX as i128)),
            Self::U8 => Some((0, u8::MAX as i128)),
            Self::I16 => Some((i16::MIN as i128, i16::MAX as i128)),
            Self::U16 => Some((0, u16::MAX as i128)),
            Self::I32 => Some((i32::MIN as i128, i32::MAX as i128)),
            Self::U32 => Some((0, u32::MAX as i128)),
            Self::I64 => Some((i64::MIN as i128, i64::MAX as i128)),
            Self::U64 => Some((0, u64::MAX as i128)),
            Self::F32 | Self::F64 | Self::Bool => None,
        }
    }

    /// Grammar name of the type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I16 => "i16",
            Self::U16 => "u16",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::I64 => "i64",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Bool => "bool",
        }
    }

    /// Parse a grammar name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.as_str() == name)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of a single (non-array) slot: a field or an array element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// Inline scalar.
    Scalar(ScalarType),
    /// Pointer into the string pool.
    String,
    /// Pointer to a structure of the named kind.
    Pointer(String),
}

impl ElementType {
    fn parse(text: &str) -> std::result::Result<Self, String> {
        if text == "string" {
            return Ok(Self::String);
        }
        if let Some(kind) = text.strip_prefix("ptr<").and_then(|rest| rest.strip_suffix('>')) {
            let kind = kind.trim();
            if kind.is_empty() {
                return Err("pointer target kind is empty".to_string());
            }
            return Ok(Self::Pointer(kind.to_string()));
        }
        ScalarType::from_name(text)
            .map(Self::Scalar)
            .ok_or_else(|| format!("unknown type '{}'", text))
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(ty) => write!(f, "{}", ty),
            Self::String => f.write_str("string"),
            Self::Pointer(kind) => write!(f, "ptr<{}>", kind),
        }
    }
}

/// Type of a structure field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// A single slot.
    Element(ElementType),
    /// `len` elements stored inline in the structure.
    FixedArray { element: ElementType, len: usize },
    /// Pointer to a run of elements in the trailing data section; the
    /// length is the value of the earlier integer field `count_field`.
    Array {
        element: ElementType,
        count_field: String,
    },
}

impl FieldType {
    /// Shorthand for a scalar field.
    pub fn scalar(ty: ScalarType) -> Self {
        Self::Element(ElementType::Scalar(ty))
    }

    /// Shorthand for a string field.
    pub fn string() -> Self {
        Self::Element(ElementType::String)
    }

    /// Shorthand for a pointer field.
    pub fn pointer(kind: impl Into<String>) -> Self {
        Self::Element(ElementType::Pointer(kind.into()))
    }

    /// Shorthand for a counted array field.
    pub fn array(element: ElementType, count_field: impl Into<String>) -> Self {
        Self::Array {
            element,
            count_field: count_field.into(),
        }
    }
}

impl FromStr for FieldType {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let text = text.trim();
        let invalid = |reason: String| Error::InvalidSchema(format!("field type '{}': {}", text, reason));

        let Some(base) = text.strip_suffix(']') else {
            return ElementType::parse(text).map(Self::Element).map_err(invalid);
        };
        let open = base
            .rfind('[')
            .ok_or_else(|| invalid("unbalanced ']'".to_string()))?;
        let element = ElementType::parse(base[..open].trim()).map_err(invalid)?;
        let inner = base[open + 1..].trim();

        if inner.is_empty() {
            return Err(invalid("array needs a length or a count field".to_string()));
        }
        if inner.bytes().all(|b| b.is_ascii_digit()) {
            let len = inner
                .parse()
                .map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?;
            return Ok(Self::FixedArray { element, len });
        }
        if !is_identifier(inner) {
            return Err(invalid(format!("'{}' is not a field name", inner)));
        }
        Ok(Self::array(element, inner))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Element(element) => write!(f, "{}", element),
            Self::FixedArray { element, len } => write!(f, "{}[{}]", element, len),
            Self::Array {
                element,
                count_field,
            } => write!(f, "{}[{}]", element, count_field),
        }
    }
}

impl Serialize for FieldType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// A named, typed field of a structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Field type.
    #[serde(rename = "type")]
    pub ty: FieldType,
}

/// Layout description of one structure kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructSchema {
    /// Kind name, used as the node kind in logical trees.
    pub name: String,
    /// Numeric kind identifier, stored in the file header for the root.
    pub id: u32,
    /// Fields in declaration (and on-disk) order.
    pub fields: Vec<FieldDef>,
}

impl StructSchema {
    /// Create a structure description with no fields.
    pub fn new(name: impl Into<String>, id: u32) -> Self {
        Self {
            name: name.into(),
            id,
            fields: Vec::new(),
        }
    }

    /// Append a field.
    pub fn field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            ty,
        });
        self
    }

    /// Find a field by name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

#[derive(Serialize, Deserialize)]
struct CatalogFile {
    structs: Vec<StructSchema>,
}

/// The set of structure kinds a conversion understands.
///
/// # Example
///
/// ```
/// use aeptools_format::schema::{FieldType, ScalarType, SchemaCatalog, StructSchema};
///
/// let catalog = SchemaCatalog::from_structs([StructSchema::new("Node", 1)
///     .field("id", FieldType::scalar(ScalarType::I32))
///     .field("name", FieldType::string())
///     .field("next", FieldType::pointer("Node"))])?;
///
/// assert_eq!(catalog.get("Node")?.fields.len(), 3);
/// # Ok::<(), aeptools_format::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    structs: Vec<StructSchema>,
    by_name: FxHashMap<String, usize>,
    by_id: FxHashMap<u32, usize>,
}

impl SchemaCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and validate a catalog from structure descriptions.
    pub fn from_structs(structs: impl IntoIterator<Item = StructSchema>) -> Result<Self> {
        let mut catalog = Self::new();
        for schema in structs {
            catalog.insert(schema)?;
        }
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load and validate a catalog from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Self::from_structs(file.structs)
    }

    /// Serialize the catalog to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        let file = CatalogFile {
            structs: self.structs.clone(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Add a structure description.
    ///
    /// Fails if the name or id is already taken. Cross-structure references
    /// are only checked by [`SchemaCatalog::validate`].
    pub fn insert(&mut self, schema: StructSchema) -> Result<()> {
        if self.by_name.contains_key(&schema.name) {
            return Err(Error::InvalidSchema(format!("duplicate structure kind '{}'", schema.name)));
        }
        if let Some(&existing) = self.by_id.get(&schema.id) {
            return Err(Error::InvalidSchema(format!(
                "structure id {} used by both '{}' and '{}'",
                schema.id, self.structs[existing].name, schema.name
            )));
        }
        let index = self.structs.len();
        self.by_name.insert(schema.name.clone(), index);
        self.by_id.insert(schema.id, index);
        self.structs.push(schema);
        Ok(())
    }

    /// Look up a structure by kind name.
    pub fn get(&self, name: &str) -> Result<&StructSchema> {
        self.by_name
            .get(name)
            .map(|&i| &self.structs[i])
            .ok_or_else(|| Error::UnknownStructureKind(name.to_string()))
    }

    /// Look up a structure by numeric id.
    pub fn by_id(&self, id: u32) -> Result<&StructSchema> {
        self.by_id
            .get(&id)
            .map(|&i| &self.structs[i])
            .ok_or_else(|| Error::UnknownStructureKind(format!("#{}", id)))
    }

    /// Iterate structure descriptions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &StructSchema> {
        self.structs.iter()
    }

    /// Number of structure kinds.
    pub fn len(&self) -> usize {
        self.structs.len()
    }

    /// Whether the catalog has no structure kinds.
    pub fn is_empty(&self) -> bool {
        self.structs.is_empty()
    }

    /// Check cross-references inside the catalog.
    ///
    /// Field names must be unique per structure, pointer targets must exist,
    /// and count fields must be integer scalars declared before their array.
    pub fn validate(&self) -> Result<()> {
        for schema in &self.structs {
            for (index, field) in schema.fields.iter().enumerate() {
                let path = format!("{}.{}", schema.name, field.name);

                if schema.fields[..index].iter().any(|f| f.name == field.name) {
                    return Err(Error::InvalidSchema(format!("duplicate field {}", path)));
                }

                let element = match &field.ty {
                    FieldType::Element(element) | FieldType::FixedArray { element, .. } => element,
                    FieldType::Array {
                        element,
                        count_field,
                    } => {
                        let count = schema.fields[..index]
                            .iter()
                            .find(|f| &f.name == count_field)
                            .ok_or_else(|| {
                                Error::InvalidSchema(format!(
                                    "{}: count field '{}' must be declared earlier",
                                    path, count_field
                                ))
                            })?;
                        match count.ty {
                            FieldType::Element(ElementType::Scalar(ty)) if ty.is_integer() => {}
                            _ => {
                                return Err(Error::InvalidSchema(format!(
                                    "{}: count field '{}' must be an integer, found {}",
                                    path, count_field, count.ty
                                )))
                            }
                        }
                        element
                    }
                };

                if let ElementType::Pointer(kind) = element {
                    if !self.by_name.contains_key(kind) {
                        return Err(Error::InvalidSchema(format!(
                            "{}: pointer to unknown structure kind '{}'",
                            path, kind
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_grammar() {
        let cases = [
            ("i32", FieldType::scalar(ScalarType::I32)),
            ("string", FieldType::string()),
            ("ptr<Layer>", FieldType::pointer("Layer")),
            (
                "f32[3]",
                FieldType::FixedArray {
                    element: ElementType::Scalar(ScalarType::F32),
                    len: 3,
                },
            ),
            (
                "ptr<Layer>[layer_count]",
                FieldType::array(ElementType::Pointer("Layer".to_string()), "layer_count"),
            ),
        ];

        for (text, expected) in cases {
            let parsed: FieldType = text.parse().unwrap();
            assert_eq!(parsed, expected);
            assert_eq!(parsed.to_string(), text);
        }
    }

    #[test]
    fn test_field_type_grammar_errors() {
        for text in ["i33", "ptr<>", "u8[]", "u8[1x]", "string]", "ptr<A"] {
            assert!(text.parse::<FieldType>().is_err(), "{} should not parse", text);
        }
    }

    #[test]
    fn test_lookup_by_name_and_id() {
        let catalog = SchemaCatalog::from_structs([
            StructSchema::new("A", 7).field("x", FieldType::scalar(ScalarType::U8)),
        ])
        .unwrap();

        assert_eq!(catalog.get("A").unwrap().id, 7);
        assert_eq!(catalog.by_id(7).unwrap().name, "A");
        assert!(matches!(catalog.get("B"), Err(Error::UnknownStructureKind(_))));
        assert!(matches!(catalog.by_id(8), Err(Error::UnknownStructureKind(_))));
    }

    #[test]
    fn test_validate_rejects_bad_count_fields() {
        let after = StructSchema::new("A", 1)
            .field("items", FieldType::array(ElementType::Scalar(ScalarType::U8), "count"))
            .field("count", FieldType::scalar(ScalarType::U32));
        assert!(SchemaCatalog::from_structs([after]).is_err());

        let float = StructSchema::new("A", 1)
            .field("count", FieldType::scalar(ScalarType::F32))
            .field("items", FieldType::array(ElementType::Scalar(ScalarType::U8), "count"));
        assert!(SchemaCatalog::from_structs([float]).is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_targets_and_duplicates() {
        let dangling = StructSchema::new("A", 1).field("b", FieldType::pointer("B"));
        assert!(matches!(
            SchemaCatalog::from_structs([dangling]),
            Err(Error::InvalidSchema(_))
        ));

        let twice = [StructSchema::new("A", 1), StructSchema::new("B", 1)];
        assert!(SchemaCatalog::from_structs(twice).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let json = r#"{
            "structs": [
                { "name": "Node", "id": 1, "fields": [
                    { "name": "count", "type": "u16" },
                    { "name": "values", "type": "f64[count]" },
                    { "name": "next", "type": "ptr<Node>" }
                ] }
            ]
        }"#;

        let catalog = SchemaCatalog::from_json(json).unwrap();
        let reloaded = SchemaCatalog::from_json(&catalog.to_json().unwrap()).unwrap();
        assert_eq!(catalog.get("Node").unwrap(), reloaded.get("Node").unwrap());
    }
}
