//! The packed vertex type word.
use bitos::{bitos, integer::u3};

#[bitos(2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TexCoordEncoding {
    #[default]
    None = 0b00,
    U8 = 0b01,
    U16 = 0b10,
    F32 = 0b11,
}

#[bitos(3)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorEncoding {
    #[default]
    None = 0b000,
    Reserved1 = 0b001,
    Reserved2 = 0b010,
    Reserved3 = 0b011,
    Rgb565 = 0b100,
    Rgba5551 = 0b101,
    Rgba4444 = 0b110,
    Rgba8888 = 0b111,
}

impl ColorEncoding {
    /// Size of a color with this encoding in a vertex record.
    pub fn size(self) -> u8 {
        match self {
            Self::Rgb565 | Self::Rgba5551 | Self::Rgba4444 => 2,
            Self::Rgba8888 => 4,
            _ => 0,
        }
    }
}

#[bitos(2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CoordsEncoding {
    #[default]
    None = 0b00,
    S8 = 0b01,
    S16 = 0b10,
    F32 = 0b11,
}

impl CoordsEncoding {
    /// Size of a single component with this encoding.
    pub fn component_size(self) -> u8 {
        match self {
            Self::None => 0,
            Self::S8 => 1,
            Self::S16 => 2,
            Self::F32 => 4,
        }
    }
}

#[bitos(2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WeightEncoding {
    #[default]
    None = 0b00,
    U8 = 0b01,
    U16 = 0b10,
    F32 = 0b11,
}

/// Width of the entries of an index buffer.
#[bitos(2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexWidth {
    /// No index buffer: vertices are used in order.
    #[default]
    None = 0b00,
    U8 = 0b01,
    U16 = 0b10,
    U32 = 0b11,
}

impl IndexWidth {
    /// Size of a single index in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::None => 0,
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

/// A packed vertex type, describing how every attribute of a vertex is encoded.
///
/// The layout follows the GE vertex type register, with a secondary color stored in the bits the
/// register leaves unused.
#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VertexType {
    #[bits(0..2)]
    pub texcoord: TexCoordEncoding,
    #[bits(2..5)]
    pub color0: ColorEncoding,
    #[bits(5..7)]
    pub normal: CoordsEncoding,
    #[bits(7..9)]
    pub position: CoordsEncoding,
    #[bits(9..11)]
    pub weights: WeightEncoding,
    #[bits(11..13)]
    pub index: IndexWidth,
    #[bits(14..17)]
    pub weight_count_minus_one: u3,
    #[bits(18..21)]
    pub morph_count_minus_one: u3,
    #[bits(23)]
    pub through: bool,
    #[bits(24..27)]
    pub color1: ColorEncoding,
}

impl VertexType {
    /// Number of weights per vertex, zero if the vertex has no weights.
    pub fn weight_count(&self) -> u8 {
        if self.weights() == WeightEncoding::None {
            0
        } else {
            self.weight_count_minus_one().value() as u8 + 1
        }
    }

    /// Number of morph targets per vertex, always at least one.
    pub fn morph_count(&self) -> u8 {
        self.morph_count_minus_one().value() as u8 + 1
    }

    /// Returns a copy with the given weight count. `count` must be in `1..=8`.
    pub fn with_weight_count(self, count: u8) -> Self {
        debug_assert!((1..=8).contains(&count));
        self.with_weight_count_minus_one(u3::new(count - 1))
    }

    /// Returns a copy with the given morph count. `count` must be in `1..=8`.
    pub fn with_morph_count(self, count: u8) -> Self {
        debug_assert!((1..=8).contains(&count));
        self.with_morph_count_minus_one(u3::new(count - 1))
    }
}
