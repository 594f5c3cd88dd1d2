//! JSON text form of logical documents.
//!
//! Nodes are written as a flat list in canonical preorder, each with an id,
//! its kind and a typed field list. Pointers are node ids, so aliasing and
//! cycles survive the trip and deep pointer chains never nest.
//!
//! ```json
//! {
//!   "format": "aep-text",
//!   "version": 1,
//!   "root": 0,
//!   "nodes": [
//!     { "id": 0, "kind": "Node", "fields": [
//!       { "name": "id", "type": "i32", "value": 1 },
//!       { "name": "next", "type": "ptr", "value": null }
//!     ] }
//!   ]
//! }
//! ```

use hashbrown::HashMap as FastHashMap;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as Json};
use std::hash::BuildHasherDefault;

use crate::document::{ArrayValue, Document, Field, Node, NodeId, Value, ValueKind};
use crate::schema::ScalarType;
use crate::{Error, Result};

type FxHashMap<K, V> = FastHashMap<K, V, BuildHasherDefault<FxHasher>>;

/// Value of the `format` member.
pub const TEXT_FORMAT: &str = "aep-text";

/// Value of the `version` member.
pub const TEXT_VERSION: u64 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct TextDocument {
    format: String,
    version: u64,
    root: u32,
    nodes: Vec<TextNode>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TextNode {
    id: u32,
    kind: String,
    fields: Vec<TextField>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TextField {
    name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    ty: Option<String>,
    #[serde(default)]
    value: Json,
}

/// Render a document as pretty-printed JSON text.
pub fn to_text(document: &Document) -> Result<String> {
    let canonical;
    let document = if document.is_canonical() {
        document
    } else {
        canonical = document.canonicalize()?;
        &canonical
    };

    let nodes = document
        .nodes()
        .map(|(id, node)| TextNode {
            id: id.0,
            kind: node.kind.clone(),
            fields: node
                .fields
                .iter()
                .map(|field| TextField {
                    name: field.name.clone(),
                    ty: Some(field.value.type_tag()),
                    value: value_to_json(&field.value),
                })
                .collect(),
        })
        .collect();

    let text = TextDocument {
        format: TEXT_FORMAT.to_string(),
        version: TEXT_VERSION,
        root: document.root().0,
        nodes,
    };
    Ok(serde_json::to_string_pretty(&text)?)
}

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::I8(v) => Json::from(*v),
        Value::U8(v) => Json::from(*v),
        Value::I16(v) => Json::from(*v),
        Value::U16(v) => Json::from(*v),
        Value::I32(v) => Json::from(*v),
        Value::U32(v) => Json::from(*v),
        Value::I64(v) => Json::from(*v),
        Value::U64(v) => Json::from(*v),
        Value::F32(v) => f32_to_json(*v),
        Value::F64(v) => f64_to_json(*v),
        Value::Bool(v) => Json::Bool(*v),
        Value::String(s) => s.as_ref().map_or(Json::Null, |s| Json::String(s.clone())),
        Value::Pointer(target) => target.map_or(Json::Null, |id| Json::from(id.0)),
        Value::FixedArray(array) | Value::Array(array) => {
            Json::Array(array.items.iter().map(value_to_json).collect())
        }
    }
}

fn f64_to_json(v: f64) -> Json {
    match Number::from_f64(v) {
        Some(n) => Json::Number(n),
        None if v.is_nan() => nan_to_json(v.to_bits() == f64::NAN.to_bits(), format!("{:#018x}", v.to_bits())),
        None if v > 0.0 => Json::String("inf".to_string()),
        None => Json::String("-inf".to_string()),
    }
}

/// Shortest decimal form of an f32 when it reads back exactly, else the exact widening.
fn f32_to_json(v: f32) -> Json {
    if v.is_nan() {
        return nan_to_json(v.to_bits() == f32::NAN.to_bits(), format!("{:#010x}", v.to_bits()));
    }
    if v.is_infinite() {
        return f64_to_json(f64::from(v));
    }
    match v.to_string().parse::<f64>() {
        Ok(short) if (short as f32).to_bits() == v.to_bits() => f64_to_json(short),
        _ => f64_to_json(f64::from(v)),
    }
}

/// Any NaN other than the default quiet NaN keeps its bits as `NaN:0x<hex>`.
fn nan_to_json(canonical: bool, hex: String) -> Json {
    if canonical {
        Json::String("NaN".to_string())
    } else {
        Json::String(format!("NaN:{}", hex))
    }
}

/// Parse JSON text back into a canonical document.
pub fn from_text(text: &str) -> Result<Document> {
    let parsed: TextDocument = serde_json::from_str(text).map_err(|e| text_error("$", e.to_string()))?;

    if parsed.format != TEXT_FORMAT {
        return Err(text_error(
            "$.format",
            format!("expected '{}', found '{}'", TEXT_FORMAT, parsed.format),
        ));
    }
    if parsed.version != TEXT_VERSION {
        return Err(text_error(
            "$.version",
            format!("unsupported version {} (expected {})", parsed.version, TEXT_VERSION),
        ));
    }

    let mut ids: FxHashMap<u32, NodeId> = FxHashMap::default();
    for (index, node) in parsed.nodes.iter().enumerate() {
        if ids.insert(node.id, NodeId(index as u32)).is_some() {
            return Err(text_error(
                &format!("$.nodes[{}].id", index),
                format!("duplicate node id {}", node.id),
            ));
        }
    }
    let root = *ids
        .get(&parsed.root)
        .ok_or_else(|| text_error("$.root", format!("undefined node id {}", parsed.root)))?;

    let mut nodes = Vec::with_capacity(parsed.nodes.len());
    for (index, text_node) in parsed.nodes.iter().enumerate() {
        let mut node = Node::new(text_node.kind.clone());
        for (field_index, field) in text_node.fields.iter().enumerate() {
            let path = format!("$.nodes[{}].fields[{}]", index, field_index);
            let value = parse_field(field, &ids).map_err(|reason| {
                text_error(&path, format!("{}.{}: {}", text_node.kind, field.name, reason))
            })?;
            node.fields.push(Field {
                name: field.name.clone(),
                value,
            });
        }
        nodes.push(node);
    }

    Document::from_parts(nodes, root).canonicalize()
}

fn text_error(path: &str, reason: String) -> Error {
    Error::TextSchema {
        path: path.to_string(),
        reason,
    }
}

enum Shape {
    Single,
    Fixed(usize),
    Variable,
}

fn parse_tag(tag: &str) -> std::result::Result<(ValueKind, Shape), String> {
    let (element, shape) = match tag.strip_suffix(']').and_then(|base| base.rsplit_once('[')) {
        None => (tag, Shape::Single),
        Some((element, "")) => (element, Shape::Variable),
        Some((element, len)) => {
            let len = len.parse().map_err(|_| format!("invalid array length in type '{}'", tag))?;
            (element, Shape::Fixed(len))
        }
    };

    let kind = match element {
        "string" => ValueKind::String,
        "ptr" => ValueKind::Pointer,
        other => ScalarType::from_name(other)
            .map(ValueKind::Scalar)
            .ok_or_else(|| format!("unknown type '{}'", tag))?,
    };
    Ok((kind, shape))
}

fn parse_field(field: &TextField, ids: &FxHashMap<u32, NodeId>) -> std::result::Result<Value, String> {
    let tag = field.ty.as_deref().ok_or("missing type tag")?;
    let (kind, shape) = parse_tag(tag)?;

    let items = |json: &Json| -> std::result::Result<Vec<Value>, String> {
        json.as_array()
            .ok_or_else(|| format!("expected an array for type '{}'", tag))?
            .iter()
            .map(|item| parse_element(kind, item, ids))
            .collect()
    };

    match shape {
        Shape::Single => parse_element(kind, &field.value, ids),
        Shape::Fixed(len) => {
            let items = items(&field.value)?;
            if items.len() != len {
                return Err(format!("expected {} elements, found {}", len, items.len()));
            }
            Ok(Value::FixedArray(ArrayValue::new(kind, items)))
        }
        Shape::Variable => Ok(Value::Array(ArrayValue::new(kind, items(&field.value)?))),
    }
}

fn parse_element(kind: ValueKind, json: &Json, ids: &FxHashMap<u32, NodeId>) -> std::result::Result<Value, String> {
    match kind {
        ValueKind::Scalar(ty) => parse_scalar(ty, json),
        ValueKind::String => match json {
            Json::Null => Ok(Value::String(None)),
            Json::String(s) => Ok(Value::String(Some(s.clone()))),
            other => Err(format!("expected a string or null, found {}", other)),
        },
        ValueKind::Pointer => match json {
            Json::Null => Ok(Value::Pointer(None)),
            other => {
                let label = other
                    .as_u64()
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| format!("expected a node id or null, found {}", other))?;
                ids.get(&label)
                    .map(|id| Value::Pointer(Some(*id)))
                    .ok_or_else(|| format!("reference to undefined node id {}", label))
            }
        },
    }
}

fn parse_scalar(ty: ScalarType, json: &Json) -> std::result::Result<Value, String> {
    match ty {
        ScalarType::Bool => json
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| format!("expected a boolean, found {}", json)),
        ScalarType::F64 => match parse_float(json)? {
            TextFloat::Value(v) => Ok(Value::F64(v)),
            TextFloat::NanBits(bits) => {
                let v = f64::from_bits(bits);
                if !v.is_nan() {
                    return Err(format!("{:#018x} is not an f64 NaN", bits));
                }
                Ok(Value::F64(v))
            }
        },
        ScalarType::F32 => match parse_float(json)? {
            TextFloat::Value(v) if v.is_nan() => Ok(Value::F32(f32::NAN)),
            TextFloat::Value(v) => {
                let narrowed = v as f32;
                if v.is_finite() && !narrowed.is_finite() {
                    return Err(format!("{} is out of range for f32", v));
                }
                Ok(Value::F32(narrowed))
            }
            TextFloat::NanBits(bits) => {
                let v = u32::try_from(bits)
                    .map(f32::from_bits)
                    .map_err(|_| format!("{:#x} does not fit an f32", bits))?;
                if !v.is_nan() {
                    return Err(format!("{:#010x} is not an f32 NaN", bits));
                }
                Ok(Value::F32(v))
            }
        },
        _ => {
            let v = json
                .as_i64()
                .map(i128::from)
                .or_else(|| json.as_u64().map(i128::from))
                .ok_or_else(|| format!("expected an integer, found {}", json))?;
            let (min, max) = ty.integer_range().unwrap_or((0, 0));
            if v < min || v > max {
                return Err(format!("{} is out of range for {}", v, ty));
            }
            // In range, so the narrowing casts are exact.
            Ok(match ty {
                ScalarType::I8 => Value::I8(v as i8),
                ScalarType::U8 => Value::U8(v as u8),
                ScalarType::I16 => Value::I16(v as i16),
                ScalarType::U16 => Value::U16(v as u16),
                ScalarType::I32 => Value::I32(v as i32),
                ScalarType::U32 => Value::U32(v as u32),
                ScalarType::I64 => Value::I64(v as i64),
                _ => Value::U64(v as u64),
            })
        }
    }
}

/// A float as written in text: a plain value, or a NaN with explicit bits.
enum TextFloat {
    Value(f64),
    NanBits(u64),
}

fn parse_float(json: &Json) -> std::result::Result<TextFloat, String> {
    match json {
        Json::Number(n) => n
            .as_f64()
            .map(TextFloat::Value)
            .ok_or_else(|| format!("invalid number {}", n)),
        Json::String(s) => match s.as_str() {
            "NaN" => Ok(TextFloat::Value(f64::NAN)),
            "inf" => Ok(TextFloat::Value(f64::INFINITY)),
            "-inf" => Ok(TextFloat::Value(f64::NEG_INFINITY)),
            other => match other.strip_prefix("NaN:0x") {
                Some(hex) if !hex.is_empty() => u64::from_str_radix(hex, 16)
                    .map(TextFloat::NanBits)
                    .map_err(|_| format!("invalid NaN bit pattern \"{}\"", s)),
                _ => Err(format!("expected a number, found \"{}\"", s)),
            },
        },
        other => Err(format!("expected a number, found {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linked() -> Document {
        let mut doc = Document::new(Node::new("Node"));
        let child = doc.add(
            Node::new("Node")
                .with("id", Value::I32(2))
                .with("name", Value::String(None))
                .with("next", Value::Pointer(Some(NodeId(0)))),
        );
        *doc.node_mut(NodeId(0)).unwrap() = Node::new("Node")
            .with("id", Value::I32(1))
            .with("name", Value::string("a"))
            .with("next", Value::Pointer(Some(child)));
        doc
    }

    #[test]
    fn test_text_shape() {
        let text = to_text(&linked()).unwrap();
        let json: Json = serde_json::from_str(&text).unwrap();

        assert_eq!(json["format"], "aep-text");
        assert_eq!(json["version"], 1);
        assert_eq!(json["root"], 0);
        assert_eq!(json["nodes"][0]["fields"][2]["type"], "ptr");
        assert_eq!(json["nodes"][0]["fields"][2]["value"], 1);
        assert_eq!(json["nodes"][1]["fields"][1]["value"], Json::Null);
    }

    #[test]
    fn test_round_trip_with_cycle() {
        let doc = linked();
        let back = from_text(&to_text(&doc).unwrap()).unwrap();
        assert_eq!(back, doc);
        assert!(back.is_canonical());
    }

    #[test]
    fn test_arbitrary_ids_are_canonicalized() {
        let text = r#"{"format":"aep-text","version":1,"root":70,"nodes":[
            {"id":5,"kind":"Leaf","fields":[{"name":"v","type":"u8","value":9}]},
            {"id":70,"kind":"Root","fields":[{"name":"items","type":"ptr[]","value":[5,5]}]}
        ]}"#;
        let doc = from_text(text).unwrap();

        assert!(doc.is_canonical());
        assert_eq!(doc.root_node().kind, "Root");
        let items = doc.root_node().get("items").and_then(Value::as_array).unwrap();
        assert_eq!(items.items, vec![Value::Pointer(Some(NodeId(1))); 2]);
    }

    #[test]
    fn test_floats() {
        let doc = Document::new(
            Node::new("F")
                .with("a", Value::F32(0.1))
                .with("b", Value::F64(f64::NEG_INFINITY))
                .with("c", Value::F32(f32::NAN))
                .with("d", Value::F64(-0.0))
                .with("e", Value::F32(f32::MAX)),
        );
        let text = to_text(&doc).unwrap();
        assert!(text.contains("0.1"));
        assert!(text.contains("\"-inf\""));
        assert!(text.contains("\"NaN\""));
        assert_eq!(from_text(&text).unwrap(), doc);
    }

    #[test]
    fn test_nan_bits_survive() {
        let doc = Document::new(
            Node::new("F")
                .with("a", Value::F32(f32::from_bits(0xFFC0_0000)))
                .with("b", Value::F32(f32::from_bits(0x7F80_0001)))
                .with("c", Value::F64(f64::from_bits(0xFFF8_0000_0000_0000)))
                .with("d", Value::F64(f64::from_bits(0x7FF0_0000_DEAD_BEEF)))
                .with("e", Value::F64(f64::NAN)),
        );
        let text = to_text(&doc).unwrap();
        assert!(text.contains("\"NaN:0xffc00000\""));
        assert!(text.contains("\"NaN:0x7f800001\""));
        assert!(text.contains("\"NaN:0xfff8000000000000\""));
        assert!(text.contains("\"NaN:0x7ff00000deadbeef\""));
        assert!(text.contains("\"NaN\""));

        let back = from_text(&text).unwrap();
        assert_eq!(back, doc);
        let bits = |name: &str| match back.root_node().get(name) {
            Some(Value::F32(v)) => u64::from(v.to_bits()),
            Some(Value::F64(v)) => v.to_bits(),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(bits("a"), 0xFFC0_0000);
        assert_eq!(bits("d"), 0x7FF0_0000_DEAD_BEEF);
    }

    #[test]
    fn test_integer_extremes() {
        let doc = Document::new(
            Node::new("I")
                .with("a", Value::U64(u64::MAX))
                .with("b", Value::I64(i64::MIN))
                .with("c", Value::I8(-128)),
        );
        assert_eq!(from_text(&to_text(&doc).unwrap()).unwrap(), doc);
    }

    fn single_field(ty: &str, value: &str) -> String {
        format!(
            r#"{{"format":"aep-text","version":1,"root":0,"nodes":[{{"id":0,"kind":"K","fields":[{{"name":"f","type":"{}","value":{}}}]}}]}}"#,
            ty, value
        )
    }

    #[test]
    fn test_rejections() {
        let cases = [
            single_field("i32", "4294967296"),
            single_field("u8", "-1"),
            single_field("u8", "1.5"),
            single_field("f32", "1e300"),
            single_field("f32", "\"NaN:0x3f800000\""),
            single_field("f32", "\"NaN:0xfff8000000000000\""),
            single_field("f64", "\"NaN:0x3ff0000000000000\""),
            single_field("f64", "\"NaN:0xzz\""),
            single_field("f64", "\"NaN:0x\""),
            single_field("u16[2]", "[1,2,3]"),
            single_field("ptr", "3"),
            single_field("vec3", "1"),
            single_field("string", "5"),
            r#"{"format":"aep-text","version":1,"root":0,"nodes":[{"id":0,"kind":"K","fields":[{"name":"f","value":1}]}]}"#
                .to_string(),
            r#"{"format":"aep-text","version":1,"root":0,"nodes":[{"id":0,"kind":"K","fields":[]},{"id":0,"kind":"K","fields":[]}]}"#
                .to_string(),
            r#"{"format":"aep-text","version":2,"root":0,"nodes":[]}"#.to_string(),
            r#"{"format":"other","version":1,"root":0,"nodes":[]}"#.to_string(),
            r#"{"format":"aep-text","version":1,"root":0,"nodes":[]}"#.to_string(),
            "{ not json".to_string(),
        ];

        for text in &cases {
            assert!(
                matches!(from_text(text), Err(Error::TextSchema { .. })),
                "expected rejection of {}",
                text
            );
        }
    }
}
