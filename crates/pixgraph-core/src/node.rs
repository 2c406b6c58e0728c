//! Nodes, their typed properties, and the keyframes (cels) they own.

use crate::id::{KeyFrameId, NodeId, PropName};
use crate::value::{PropertyValue, SurfaceRef, ValueType, VecD};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Well-known property names.
pub mod props {
    pub const BACKGROUND: &str = "Background";
    /// Input of a folder that receives the folder's children. A connection
    /// into this input marks the boundary of the folder's content.
    pub const CONTENT: &str = "Content";
    pub const OUTPUT: &str = "Output";
    pub const INPUT: &str = "Input";
    pub const OPACITY: &str = "Opacity";
    pub const IS_VISIBLE: &str = "IsVisible";
    pub const BLEND_MODE: &str = "BlendMode";
    pub const MASK_IS_VISIBLE: &str = "MaskIsVisible";
    pub const TOP: &str = "Top";
    pub const BOTTOM: &str = "Bottom";
    pub const STRENGTH: &str = "Strength";
    pub const X: &str = "X";
    pub const Y: &str = "Y";
    pub const RESULT: &str = "Result";
}

// ─── Kinds ───────────────────────────────────────────────────────────────

/// What a node does. Structure kinds (layers, folders) show up in the
/// layer tree; the rest are plain graph nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// The designated evaluation root.
    Output,
    ImageLayer,
    VectorLayer,
    Folder,
    Merge,
    Filter,
    Math,
    /// Start of a bracketed zone; always paired with a `ZoneEnd`.
    ZoneStart,
    ZoneEnd,
    /// Extension node with caller-provided properties.
    Custom(String),
}

impl NodeKind {
    pub fn is_structure(&self) -> bool {
        matches!(self, Self::ImageLayer | Self::VectorLayer | Self::Folder)
    }

    pub fn is_layer(&self) -> bool {
        matches!(self, Self::ImageLayer | Self::VectorLayer)
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Self::Folder)
    }

    /// Kinds that only exist as one half of a pair.
    pub fn is_pair_half(&self) -> bool {
        matches!(self, Self::ZoneStart | Self::ZoneEnd)
    }

    pub fn default_name(&self) -> &str {
        match self {
            Self::Output => "Output",
            Self::ImageLayer => "Layer",
            Self::VectorLayer => "Vector Layer",
            Self::Folder => "Folder",
            Self::Merge => "Merge",
            Self::Filter => "Filter",
            Self::Math => "Math",
            Self::ZoneStart => "Zone Start",
            Self::ZoneEnd => "Zone End",
            Self::Custom(name) => name,
        }
    }

    /// Input and output properties a fresh node of this kind carries.
    fn template(&self) -> (Vec<InputProperty>, Vec<OutputProperty>) {
        use props::*;
        let structure_inputs = || {
            vec![
                InputProperty::new(BACKGROUND, ValueType::Surface, PropertyValue::None),
                InputProperty::new(OPACITY, ValueType::Float, PropertyValue::Float(1.0)),
                InputProperty::new(IS_VISIBLE, ValueType::Bool, PropertyValue::Bool(true)),
                InputProperty::new(BLEND_MODE, ValueType::Int, PropertyValue::Int(0)),
                InputProperty::new(MASK_IS_VISIBLE, ValueType::Bool, PropertyValue::Bool(true)),
            ]
        };
        let surface_out = || vec![OutputProperty::new(OUTPUT, ValueType::Surface)];

        match self {
            Self::Output => (
                vec![InputProperty::new(BACKGROUND, ValueType::Surface, PropertyValue::None)],
                Vec::new(),
            ),
            Self::ImageLayer | Self::VectorLayer => (structure_inputs(), surface_out()),
            Self::Folder => {
                let mut inputs = structure_inputs();
                inputs.push(InputProperty::new(CONTENT, ValueType::Surface, PropertyValue::None));
                (inputs, surface_out())
            }
            Self::Merge => (
                vec![
                    InputProperty::new(TOP, ValueType::Surface, PropertyValue::None),
                    InputProperty::new(BOTTOM, ValueType::Surface, PropertyValue::None),
                    InputProperty::new(BLEND_MODE, ValueType::Int, PropertyValue::Int(0)),
                ],
                surface_out(),
            ),
            Self::Filter => (
                vec![
                    InputProperty::new(INPUT, ValueType::Surface, PropertyValue::None),
                    InputProperty::new(STRENGTH, ValueType::Float, PropertyValue::Float(1.0)),
                ],
                surface_out(),
            ),
            Self::Math => (
                vec![
                    InputProperty::new(X, ValueType::Float, PropertyValue::Float(0.0)),
                    InputProperty::new(Y, ValueType::Float, PropertyValue::Float(0.0)),
                ],
                vec![OutputProperty::new(RESULT, ValueType::Float)],
            ),
            Self::ZoneStart | Self::ZoneEnd => (
                vec![InputProperty::new(INPUT, ValueType::Any, PropertyValue::None)],
                vec![OutputProperty::new(OUTPUT, ValueType::Any)],
            ),
            Self::Custom(_) => (Vec::new(), Vec::new()),
        }
    }
}

// ─── Properties ──────────────────────────────────────────────────────────

/// An input slot. Its connection (if any) lives in the graph's edge set;
/// `value` is the literal used when nothing is connected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputProperty {
    pub name: PropName,
    pub value_type: ValueType,
    pub value: PropertyValue,
}

impl InputProperty {
    pub fn new(name: &str, value_type: ValueType, value: PropertyValue) -> Self {
        Self {
            name: PropName::intern(name),
            value_type,
            value,
        }
    }
}

/// An output slot; may fan out to any number of inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputProperty {
    pub name: PropName,
    pub value_type: ValueType,
}

impl OutputProperty {
    pub fn new(name: &str, value_type: ValueType) -> Self {
        Self {
            name: PropName::intern(name),
            value_type,
        }
    }
}

// ─── Keyframes ───────────────────────────────────────────────────────────

/// What a keyframe carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeyFramePayload {
    Raster(SurfaceRef),
    Value(PropertyValue),
    Empty,
}

/// A cel: one node's data over `[start, start + duration)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyFrameData {
    pub id: KeyFrameId,
    /// First frame, `>= 0`.
    pub start: i32,
    /// Length in frames, `>= 1`.
    pub duration: i32,
    pub visible: bool,
    /// Which part of the node this keyframe animates (`"Image"`, a property
    /// name, ...).
    pub affected_element: String,
    pub payload: KeyFramePayload,
}

impl KeyFrameData {
    pub fn new(start: i32, duration: i32, payload: KeyFramePayload) -> Self {
        Self {
            id: KeyFrameId::new(),
            start,
            duration,
            visible: true,
            affected_element: "Image".into(),
            payload,
        }
    }

    pub fn end(&self) -> i32 {
        self.start + self.duration
    }

    pub fn is_valid_timing(start: i32, duration: i32) -> bool {
        start >= 0 && duration >= 1
    }

    pub fn contains_frame(&self, frame: i32) -> bool {
        frame >= self.start && frame < self.end()
    }
}

// ─── Node ────────────────────────────────────────────────────────────────

/// A typed unit of the document graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: String,
    pub position: VecD,
    pub inputs: SmallVec<[InputProperty; 4]>,
    pub outputs: SmallVec<[OutputProperty; 2]>,
    pub keyframes: Vec<KeyFrameData>,
    /// The other half of a bracketing pair, if any.
    pub pair: Option<NodeId>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self::with_id(NodeId::new(), kind)
    }

    pub fn with_id(id: NodeId, kind: NodeKind) -> Self {
        let (inputs, outputs) = kind.template();
        Self {
            id,
            name: kind.default_name().to_string(),
            kind,
            position: VecD::default(),
            inputs: inputs.into(),
            outputs: outputs.into(),
            keyframes: Vec::new(),
            pair: None,
        }
    }

    /// Create a start/end pair linked to each other.
    pub fn new_zone_pair() -> (Node, Node) {
        let mut start = Node::new(NodeKind::ZoneStart);
        let mut end = Node::new(NodeKind::ZoneEnd);
        start.pair = Some(end.id);
        end.pair = Some(start.id);
        (start, end)
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_input(mut self, input: InputProperty) -> Self {
        self.inputs.push(input);
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: OutputProperty) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn input(&self, name: PropName) -> Option<&InputProperty> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn input_mut(&mut self, name: PropName) -> Option<&mut InputProperty> {
        self.inputs.iter_mut().find(|p| p.name == name)
    }

    pub fn output(&self, name: PropName) -> Option<&OutputProperty> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// Position of the input in declaration order.
    pub fn input_position(&self, name: PropName) -> Option<usize> {
        self.inputs.iter().position(|p| p.name == name)
    }

    fn bool_input(&self, name: &str, default: bool) -> bool {
        self.input(PropName::intern(name))
            .and_then(|p| p.value.as_bool())
            .unwrap_or(default)
    }

    pub fn is_visible(&self) -> bool {
        self.bool_input(props::IS_VISIBLE, true)
    }

    pub fn mask_is_visible(&self) -> bool {
        self.bool_input(props::MASK_IS_VISIBLE, true)
    }

    pub fn opacity(&self) -> f64 {
        self.input(PropName::intern(props::OPACITY))
            .and_then(|p| p.value.as_float())
            .unwrap_or(1.0)
    }

    pub fn keyframe(&self, id: KeyFrameId) -> Option<&KeyFrameData> {
        self.keyframes.iter().find(|k| k.id == id)
    }

    pub fn keyframe_mut(&mut self, id: KeyFrameId) -> Option<&mut KeyFrameData> {
        self.keyframes.iter_mut().find(|k| k.id == id)
    }

    /// Raster surfaces owned by this node's cels.
    pub fn surfaces_mut(&mut self) -> impl Iterator<Item = &mut SurfaceRef> {
        self.keyframes.iter_mut().filter_map(|k| match &mut k.payload {
            KeyFramePayload::Raster(s) => Some(s),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_template_has_content_input() {
        let folder = Node::new(NodeKind::Folder);
        assert!(folder.input(PropName::intern(props::CONTENT)).is_some());
        assert!(folder.input(PropName::intern(props::BACKGROUND)).is_some());
        assert!(folder.output(PropName::intern(props::OUTPUT)).is_some());

        let layer = Node::new(NodeKind::ImageLayer);
        assert!(layer.input(PropName::intern(props::CONTENT)).is_none());
        assert!(layer.is_visible());
        assert_eq!(layer.opacity(), 1.0);
    }

    #[test]
    fn zone_pair_is_cross_linked() {
        let (start, end) = Node::new_zone_pair();
        assert_eq!(start.pair, Some(end.id));
        assert_eq!(end.pair, Some(start.id));
        assert!(start.kind.is_pair_half());
    }

    #[test]
    fn keyframe_bounds() {
        let kf = KeyFrameData::new(2, 3, KeyFramePayload::Empty);
        assert_eq!(kf.end(), 5);
        assert!(kf.contains_frame(4));
        assert!(!kf.contains_frame(5));
        assert!(!KeyFrameData::is_valid_timing(-1, 1));
        assert!(!KeyFrameData::is_valid_timing(0, 0));
    }
}
