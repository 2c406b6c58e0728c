//! Property values and the small geometry vocabulary the document needs.
//!
//! Pixels never live here. Raster content is described by [`SurfaceRef`]
//! metadata (size, placement, orientation); producing pixels from it is the
//! renderer's job.

use crate::serialization::PortableValue;
use serde::{Deserialize, Serialize};

// ─── Geometry ────────────────────────────────────────────────────────────

/// Integer 2D vector (positions, offsets).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VecI {
    pub x: i32,
    pub y: i32,
}

impl VecI {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Floating-point 2D vector (node positions in the graph editor).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VecD {
    pub x: f64,
    pub y: f64,
}

impl VecD {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Integer size. Valid document and surface sizes are strictly positive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SizeI {
    pub width: i32,
    pub height: i32,
}

impl SizeI {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn transposed(&self) -> Self {
        Self::new(self.height, self.width)
    }
}

/// Axis-aligned integer rectangle (selection bounds).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RectI {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Flip direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlipAxis {
    Horizontal,
    Vertical,
}

/// Which edge/corner stays fixed when the canvas is resized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResizeAnchor {
    #[default]
    TopLeft,
    Top,
    TopRight,
    Left,
    Center,
    Right,
    BottomLeft,
    Bottom,
    BottomRight,
}

impl ResizeAnchor {
    /// Offset to add to existing content when going from `old` to `new`.
    pub fn content_offset(&self, old: SizeI, new: SizeI) -> VecI {
        let dw = new.width - old.width;
        let dh = new.height - old.height;
        let dx = match self {
            Self::TopLeft | Self::Left | Self::BottomLeft => 0,
            Self::Top | Self::Center | Self::Bottom => dw / 2,
            Self::TopRight | Self::Right | Self::BottomRight => dw,
        };
        let dy = match self {
            Self::TopLeft | Self::Top | Self::TopRight => 0,
            Self::Left | Self::Center | Self::Right => dh / 2,
            Self::BottomLeft | Self::Bottom | Self::BottomRight => dh,
        };
        VecI::new(dx, dy)
    }
}

/// Element of the square's symmetry group: rotate `quarter_turns` clockwise,
/// then mirror horizontally if `mirrored`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Orientation {
    pub quarter_turns: u8,
    pub mirrored: bool,
}

impl Orientation {
    /// Compose a horizontal mirror after this orientation.
    pub fn flipped_horizontally(self) -> Self {
        Self {
            quarter_turns: self.quarter_turns,
            mirrored: !self.mirrored,
        }
    }

    /// Compose a clockwise quarter turn after this orientation.
    pub fn rotated_cw(self) -> Self {
        // R ∘ M = M ∘ R⁻¹
        let quarter_turns = if self.mirrored {
            (self.quarter_turns + 3) % 4
        } else {
            (self.quarter_turns + 1) % 4
        };
        Self {
            quarter_turns,
            mirrored: self.mirrored,
        }
    }

    /// Vertical flip is a half turn followed by a horizontal mirror.
    pub fn flipped_vertically(self) -> Self {
        self.rotated_cw().rotated_cw().flipped_horizontally()
    }
}

/// Metadata for raster content owned by a cel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceRef {
    pub size: SizeI,
    pub offset: VecI,
    pub orientation: Orientation,
}

impl SurfaceRef {
    /// A surface covering the whole canvas.
    pub fn full(size: SizeI) -> Self {
        Self {
            size,
            offset: VecI::default(),
            orientation: Orientation::default(),
        }
    }

    pub fn flip(&mut self, axis: FlipAxis, canvas: SizeI) {
        match axis {
            FlipAxis::Horizontal => {
                self.offset.x = canvas.width - (self.offset.x + self.size.width);
                self.orientation = self.orientation.flipped_horizontally();
            }
            FlipAxis::Vertical => {
                self.offset.y = canvas.height - (self.offset.y + self.size.height);
                self.orientation = self.orientation.flipped_vertically();
            }
        }
    }

    /// Rotate clockwise by 90° inside a canvas of size `canvas` (pre-rotation).
    pub fn rotate_cw(&mut self, canvas: SizeI) {
        let x = canvas.height - (self.offset.y + self.size.height);
        let y = self.offset.x;
        self.offset = VecI::new(x, y);
        self.size = self.size.transposed();
        self.orientation = self.orientation.rotated_cw();
    }

    /// Scale placement and size from canvas `old` to canvas `new`.
    pub fn scale(&mut self, old: SizeI, new: SizeI) {
        let sx = f64::from(new.width) / f64::from(old.width);
        let sy = f64::from(new.height) / f64::from(old.height);
        self.offset = VecI::new(
            (f64::from(self.offset.x) * sx).round() as i32,
            (f64::from(self.offset.y) * sy).round() as i32,
        );
        self.size = SizeI::new(
            ((f64::from(self.size.width) * sx).round() as i32).max(1),
            ((f64::from(self.size.height) * sy).round() as i32).max(1),
        );
    }
}

// ─── Colors ──────────────────────────────────────────────────────────────

/// RGBA color, 4 × f32 in [0.0, 1.0].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

// ─── Property values ─────────────────────────────────────────────────────

/// The declared type of a property, used to check connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// Accepts anything.
    Any,
    Bool,
    Int,
    Float,
    Vec2,
    Color,
    Text,
    Surface,
    Custom,
}

impl ValueType {
    /// Whether an output of type `self` may feed an input of type `input`.
    pub fn can_feed(self, input: ValueType) -> bool {
        self == input
            || input == ValueType::Any
            || self == ValueType::Any
            || matches!(
                (self, input),
                (ValueType::Int, ValueType::Float)
                    | (ValueType::Float, ValueType::Int)
                    | (ValueType::Bool, ValueType::Int)
            )
    }
}

/// A literal value held by an unconnected input (or produced by an output).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Vec2(VecD),
    Color(Color),
    Text(String),
    Surface(SurfaceRef),
    /// Any other type, stored in its portable form via a factory.
    Custom(PortableValue),
}

impl PropertyValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::None => ValueType::Any,
            Self::Bool(_) => ValueType::Bool,
            Self::Int(_) => ValueType::Int,
            Self::Float(_) => ValueType::Float,
            Self::Vec2(_) => ValueType::Vec2,
            Self::Color(_) => ValueType::Color,
            Self::Text(_) => ValueType::Text,
            Self::Surface(_) => ValueType::Surface,
            Self::Custom(_) => ValueType::Custom,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Convert to `target` when the conversion table allows it.
    pub fn converted_to(&self, target: ValueType) -> Option<PropertyValue> {
        if target == ValueType::Any || self.value_type() == target {
            return Some(self.clone());
        }
        match (self, target) {
            (Self::Int(i), ValueType::Float) => Some(Self::Float(*i as f64)),
            (Self::Float(f), ValueType::Int) => Some(Self::Int(f.round() as i64)),
            (Self::Bool(b), ValueType::Int) => Some(Self::Int(i64::from(*b))),
            (Self::None, _) => Some(Self::None),
            _ => None,
        }
    }
}
