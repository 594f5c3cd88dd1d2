//! Built-in catalog for AEP animation projects.
//!
//! A project holds textures and compositions. Compositions hold layers, and
//! each layer carries a timeline plus keyframe lists for its animated
//! properties and a list of markers.
//!
//! Layers refer to their asset (a texture or another composition) by name:
//! the asset name is the segment after the first `-` of the layer name, or
//! the whole name when it has no `-`.

use std::collections::BTreeSet;
use std::fmt;

use crate::document::{ArrayValue, Document, Node, NodeId, Value, ValueKind};
use crate::schema::{ElementType, FieldType, ScalarType, SchemaCatalog, StructSchema};
use crate::{Error, Result};

pub const PROJECT: &str = "Project";
pub const TEXTURE: &str = "Texture";
pub const COMPOSITION: &str = "Composition";
pub const LAYER: &str = "Layer";
pub const POSITION_KEYFRAME: &str = "PositionKeyframe";
pub const ANCHOR_POINT_KEYFRAME: &str = "AnchorPointKeyframe";
pub const COLOUR_KEYFRAME: &str = "ColourKeyframe";
pub const SCALE_KEYFRAME: &str = "ScaleKeyframe";
pub const ALPHA_KEYFRAME: &str = "AlphaKeyframe";
pub const ROTATION_KEYFRAME: &str = "RotationKeyframe";
pub const SIZE_KEYFRAME: &str = "SizeKeyframe";
pub const MARKER: &str = "Marker";

/// Per-layer lists: (count field, array field, element kind).
pub const LAYER_LISTS: [(&str, &str, &str); 10] = [
    ("position_keyframe_count", "position_keyframes", POSITION_KEYFRAME),
    ("anchor_point_keyframe_count", "anchor_point_keyframes", ANCHOR_POINT_KEYFRAME),
    ("colour_keyframe_count", "colour_keyframes", COLOUR_KEYFRAME),
    ("scale_keyframe_count", "scale_keyframes", SCALE_KEYFRAME),
    ("alpha_keyframe_count", "alpha_keyframes", ALPHA_KEYFRAME),
    ("rotation_x_keyframe_count", "rotation_x_keyframes", ROTATION_KEYFRAME),
    ("rotation_y_keyframe_count", "rotation_y_keyframes", ROTATION_KEYFRAME),
    ("rotation_z_keyframe_count", "rotation_z_keyframes", ROTATION_KEYFRAME),
    ("size_keyframe_count", "size_keyframes", SIZE_KEYFRAME),
    ("marker_count", "markers", MARKER),
];

fn u8_field() -> FieldType {
    FieldType::scalar(ScalarType::U8)
}

fn u32_field() -> FieldType {
    FieldType::scalar(ScalarType::U32)
}

fn f32_field() -> FieldType {
    FieldType::scalar(ScalarType::F32)
}

fn pointers(kind: &str, count: &str) -> FieldType {
    FieldType::array(ElementType::Pointer(kind.to_string()), count)
}

fn keyframe(name: &str, id: u32, values: &[(&str, FieldType)]) -> StructSchema {
    values
        .iter()
        .fold(StructSchema::new(name, id).field("frame", u32_field()), |schema, (field, ty)| {
            schema.field(*field, ty.clone())
        })
}

/// The AEP project catalog.
pub fn catalog() -> Result<SchemaCatalog> {
    let layer = LAYER_LISTS.iter().fold(
        StructSchema::new(LAYER, 4)
            .field("name", FieldType::string())
            .field("layer_type", u8_field())
            .field("blend_mode", u8_field())
            .field("timeline_start", f32_field())
            .field("timeline_unknown1", f32_field())
            .field("timeline_duration", f32_field())
            .field("timeline_unknown2", f32_field()),
        |schema, (count, list, kind)| schema.field(*count, u32_field()).field(*list, pointers(kind, count)),
    );

    let xyz = [("x", f32_field()), ("y", f32_field()), ("z", f32_field())];

    SchemaCatalog::from_structs([
        StructSchema::new(PROJECT, 1)
            .field("texture_count", u32_field())
            .field("textures", pointers(TEXTURE, "texture_count"))
            .field("composition_count", u32_field())
            .field("compositions", pointers(COMPOSITION, "composition_count")),
        StructSchema::new(TEXTURE, 2)
            .field("name", FieldType::string())
            .field("width", u32_field())
            .field("height", u32_field()),
        StructSchema::new(COMPOSITION, 3)
            .field("name", FieldType::string())
            .field("width", u32_field())
            .field("height", u32_field())
            .field("layer_count", u32_field())
            .field("layers", pointers(LAYER, "layer_count")),
        layer,
        keyframe(POSITION_KEYFRAME, 5, &xyz),
        keyframe(ANCHOR_POINT_KEYFRAME, 6, &xyz),
        keyframe(
            COLOUR_KEYFRAME,
            7,
            &[("r", u8_field()), ("g", u8_field()), ("b", u8_field()), ("a", u8_field())],
        ),
        keyframe(SCALE_KEYFRAME, 8, &[("x", f32_field()), ("y", f32_field())]),
        keyframe(ALPHA_KEYFRAME, 9, &[("value", f32_field())]),
        keyframe(ROTATION_KEYFRAME, 10, &[("degrees", f32_field())]),
        keyframe(SIZE_KEYFRAME, 11, &[("width", f32_field()), ("height", f32_field())]),
        keyframe(MARKER, 12, &[("unknown", u32_field()), ("name", FieldType::string())]),
    ])
}

/// How a layer is composited onto the layers below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlendMode {
    Normal = 0x2,
    Additive = 0x4,
    Unknown = 0x5,
}

impl BlendMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x2 => Some(Self::Normal),
            0x4 => Some(Self::Additive),
            0x5 => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Normal => "normal",
            Self::Additive => "additive",
            Self::Unknown => "unknown",
        })
    }
}

/// What a layer displays, stored in the layer's `layer_type` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LayerKind {
    Texture = 0x0,
    Composition = 0x1,
    Colour = 0x2,
}

impl LayerKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Texture),
            0x1 => Some(Self::Composition),
            0x2 => Some(Self::Colour),
            _ => None,
        }
    }
}

/// Name of the asset a layer displays.
pub fn layer_asset_name(layer_name: &str) -> &str {
    match layer_name.split('-').nth(1) {
        Some(asset) => asset,
        None => layer_name,
    }
}

/// Animated layer properties, one variant per keyframe kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Keyframe {
    Position { frame: u32, x: f32, y: f32, z: f32 },
    AnchorPoint { frame: u32, x: f32, y: f32, z: f32 },
    Colour { frame: u32, r: u8, g: u8, b: u8, a: u8 },
    Scale { frame: u32, x: f32, y: f32 },
    Alpha { frame: u32, value: f32 },
    RotationX { frame: u32, degrees: f32 },
    RotationY { frame: u32, degrees: f32 },
    RotationZ { frame: u32, degrees: f32 },
    Size { frame: u32, width: f32, height: f32 },
}

impl Keyframe {
    /// Index into [`LAYER_LISTS`] of the list this keyframe belongs to.
    fn list(&self) -> usize {
        match self {
            Self::Position { .. } => 0,
            Self::AnchorPoint { .. } => 1,
            Self::Colour { .. } => 2,
            Self::Scale { .. } => 3,
            Self::Alpha { .. } => 4,
            Self::RotationX { .. } => 5,
            Self::RotationY { .. } => 6,
            Self::RotationZ { .. } => 7,
            Self::Size { .. } => 8,
        }
    }

    fn to_node(&self) -> Node {
        let (_, _, kind) = LAYER_LISTS[self.list()];
        let node = |frame: u32| Node::new(kind).with("frame", Value::U32(frame));
        match *self {
            Self::Position { frame, x, y, z } | Self::AnchorPoint { frame, x, y, z } => node(frame)
                .with("x", Value::F32(x))
                .with("y", Value::F32(y))
                .with("z", Value::F32(z)),
            Self::Colour { frame, r, g, b, a } => node(frame)
                .with("r", Value::U8(r))
                .with("g", Value::U8(g))
                .with("b", Value::U8(b))
                .with("a", Value::U8(a)),
            Self::Scale { frame, x, y } => node(frame).with("x", Value::F32(x)).with("y", Value::F32(y)),
            Self::Alpha { frame, value } => node(frame).with("value", Value::F32(value)),
            Self::RotationX { frame, degrees }
            | Self::RotationY { frame, degrees }
            | Self::RotationZ { frame, degrees } => node(frame).with("degrees", Value::F32(degrees)),
            Self::Size { frame, width, height } => node(frame)
                .with("width", Value::F32(width))
                .with("height", Value::F32(height)),
        }
    }
}

/// A named point on a layer's timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub frame: u32,
    pub unknown: u32,
    pub name: String,
}

/// Everything needed to build one layer node.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
    pub name: String,
    pub layer_type: u8,
    pub blend_mode: BlendMode,
    /// `[start, unknown1, duration, unknown2]`.
    pub timeline: [f32; 4],
    pub keyframes: Vec<Keyframe>,
    pub markers: Vec<Marker>,
}

impl LayerSpec {
    pub fn new(name: impl Into<String>, blend_mode: BlendMode) -> Self {
        Self {
            name: name.into(),
            layer_type: 0,
            blend_mode,
            timeline: [0.0; 4],
            keyframes: Vec::new(),
            markers: Vec::new(),
        }
    }
}

/// Assembles project documents for the built-in catalog.
///
/// Textures and compositions may be shared: adding the same layer spec to
/// two compositions produces two distinct layers, while [`ProjectBuilder::share_layer`]
/// places one existing layer node in another composition.
#[derive(Debug)]
pub struct ProjectBuilder {
    document: Document,
    textures: Vec<NodeId>,
    compositions: Vec<(NodeId, Vec<NodeId>)>,
}

impl Default for ProjectBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectBuilder {
    pub fn new() -> Self {
        Self {
            document: Document::new(Node::new(PROJECT)),
            textures: Vec::new(),
            compositions: Vec::new(),
        }
    }

    /// Add a texture.
    pub fn texture(&mut self, name: &str, width: u32, height: u32) -> NodeId {
        let id = self.document.add(
            Node::new(TEXTURE)
                .with("name", Value::string(name))
                .with("width", Value::U32(width))
                .with("height", Value::U32(height)),
        );
        self.textures.push(id);
        id
    }

    /// Add an empty composition; returns its index for [`ProjectBuilder::layer`].
    pub fn composition(&mut self, name: &str, width: u32, height: u32) -> usize {
        let id = self.document.add(
            Node::new(COMPOSITION)
                .with("name", Value::string(name))
                .with("width", Value::U32(width))
                .with("height", Value::U32(height)),
        );
        self.compositions.push((id, Vec::new()));
        self.compositions.len() - 1
    }

    /// Add a layer to a composition.
    pub fn layer(&mut self, composition: usize, spec: &LayerSpec) -> Result<NodeId> {
        if composition >= self.compositions.len() {
            return Err(Error::SchemaMismatch {
                path: PROJECT.to_string(),
                reason: format!("no composition at index {}", composition),
            });
        }

        let mut lists: [Vec<Value>; 10] = Default::default();
        for keyframe in &spec.keyframes {
            let id = self.document.add(keyframe.to_node());
            lists[keyframe.list()].push(Value::Pointer(Some(id)));
        }
        for marker in &spec.markers {
            let id = self.document.add(
                Node::new(MARKER)
                    .with("frame", Value::U32(marker.frame))
                    .with("unknown", Value::U32(marker.unknown))
                    .with("name", Value::string(marker.name.as_str())),
            );
            lists[9].push(Value::Pointer(Some(id)));
        }

        let [start, unknown1, duration, unknown2] = spec.timeline;
        let mut node = Node::new(LAYER)
            .with("name", Value::string(spec.name.as_str()))
            .with("layer_type", Value::U8(spec.layer_type))
            .with("blend_mode", Value::U8(spec.blend_mode as u8))
            .with("timeline_start", Value::F32(start))
            .with("timeline_unknown1", Value::F32(unknown1))
            .with("timeline_duration", Value::F32(duration))
            .with("timeline_unknown2", Value::F32(unknown2));
        for ((count, list, _), items) in LAYER_LISTS.iter().zip(lists) {
            node = node
                .with(*count, Value::U32(items.len() as u32))
                .with(*list, pointer_array(items));
        }

        let id = self.document.add(node);
        self.compositions[composition].1.push(id);
        Ok(id)
    }

    /// Place an existing layer node in another composition as well.
    pub fn share_layer(&mut self, composition: usize, layer: NodeId) -> Result<()> {
        let layers = self
            .compositions
            .get_mut(composition)
            .map(|(_, layers)| layers)
            .ok_or_else(|| Error::SchemaMismatch {
                path: PROJECT.to_string(),
                reason: format!("no composition at index {}", composition),
            })?;
        layers.push(layer);
        Ok(())
    }

    /// Finish the project, filling in counts and lists.
    pub fn build(mut self) -> Result<Document> {
        for (composition, layers) in &self.compositions {
            let node = self
                .document
                .node_mut(*composition)
                .ok_or_else(|| Error::Layout(format!("composition {} vanished", composition)))?;
            node.set("layer_count", Value::U32(layers.len() as u32));
            node.set("layers", pointer_array(layers.iter().map(|id| Value::Pointer(Some(*id))).collect()));
        }

        let textures: Vec<Value> = self.textures.iter().map(|id| Value::Pointer(Some(*id))).collect();
        let compositions: Vec<Value> = self
            .compositions
            .iter()
            .map(|(id, _)| Value::Pointer(Some(*id)))
            .collect();

        let root = self.document.root();
        let project = self
            .document
            .node_mut(root)
            .ok_or_else(|| Error::Layout("project root vanished".to_string()))?;
        project.set("texture_count", Value::U32(textures.len() as u32));
        project.set("textures", pointer_array(textures));
        project.set("composition_count", Value::U32(compositions.len() as u32));
        project.set("compositions", pointer_array(compositions));

        self.document.canonicalize()
    }
}

fn pointer_array(items: Vec<Value>) -> Value {
    Value::Array(ArrayValue::new(ValueKind::Pointer, items))
}

/// Counts of the main entities in a project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectSummary {
    pub textures: usize,
    pub compositions: usize,
    pub layers: usize,
    pub keyframes: usize,
    pub markers: usize,
}

impl fmt::Display for ProjectSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} textures, {} compositions, {} layers, {} keyframes, {} markers",
            self.textures, self.compositions, self.layers, self.keyframes, self.markers
        )
    }
}

fn expect_project(document: &Document) -> Result<&Node> {
    let root = document.root_node();
    if root.kind != PROJECT {
        return Err(Error::SchemaMismatch {
            path: root.kind.clone(),
            reason: format!("expected a {} root", PROJECT),
        });
    }
    Ok(root)
}

fn targets<'d>(document: &'d Document, node: &'d Node, list: &str) -> impl Iterator<Item = (NodeId, &'d Node)> + 'd {
    node.get(list)
        .and_then(Value::as_array)
        .into_iter()
        .flat_map(|array| array.items.iter().filter_map(Value::as_pointer))
        .filter_map(move |id| document.node(id).map(|node| (id, node)))
}

/// Count distinct textures, compositions, layers, keyframes and markers.
///
/// Shared nodes are counted once.
pub fn summarize(document: &Document) -> Result<ProjectSummary> {
    expect_project(document)?;
    let mut summary = ProjectSummary::default();
    for (_, node) in document.nodes() {
        match node.kind.as_str() {
            TEXTURE => summary.textures += 1,
            COMPOSITION => summary.compositions += 1,
            LAYER => summary.layers += 1,
            MARKER => summary.markers += 1,
            kind if kind.ends_with("Keyframe") => summary.keyframes += 1,
            _ => {}
        }
    }
    Ok(summary)
}

/// A layer whose asset name matches no texture or composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    pub composition: String,
    pub layer: String,
    pub asset: String,
}

impl fmt::Display for UnresolvedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "layer '{}' in composition '{}' refers to unknown asset '{}'",
            self.layer, self.composition, self.asset
        )
    }
}

/// Layers whose asset name resolves to nothing in the project.
///
/// Texture layers are looked up among textures and composition layers among
/// compositions. Colour layers have no asset. A layer with an unrecognised
/// `layer_type` may name either.
pub fn unresolved_asset_references(document: &Document) -> Result<Vec<UnresolvedReference>> {
    let project = expect_project(document)?;
    let name_of = |node: &Node| node.get("name").and_then(Value::as_str).unwrap_or("").to_string();

    let textures: BTreeSet<String> = targets(document, project, "textures").map(|(_, node)| name_of(node)).collect();
    let compositions: BTreeSet<String> =
        targets(document, project, "compositions").map(|(_, node)| name_of(node)).collect();

    let mut unresolved = Vec::new();
    for (_, composition) in targets(document, project, "compositions") {
        for (_, layer) in targets(document, composition, "layers") {
            let layer_name = name_of(layer);
            let asset = layer_asset_name(&layer_name);
            let kind = match layer.get("layer_type") {
                Some(Value::U8(code)) => LayerKind::from_u8(*code),
                _ => None,
            };
            let found = match kind {
                Some(LayerKind::Texture) => textures.contains(asset),
                Some(LayerKind::Composition) => compositions.contains(asset),
                Some(LayerKind::Colour) => true,
                None => textures.contains(asset) || compositions.contains(asset),
            };
            if !found {
                unresolved.push(UnresolvedReference {
                    composition: name_of(composition),
                    layer: layer_name.clone(),
                    asset: asset.to_string(),
                });
            }
        }
    }
    Ok(unresolved)
}
