//! Conversion steps of a decoding pipeline.
//!
//! A [`Step`] converts a single attribute slot of a vertex. Both the interpreter and the JIT match
//! on it exhaustively, so every step the planner can produce has an implementation in each.
use crate::layout::Attribute;
use std::fmt;

/// Normalization scale of 8-bit texture coordinates and weights.
pub const U8_SCALE: f32 = 1.0 / 128.0;
/// Normalization scale of 16-bit texture coordinates and weights.
pub const U16_SCALE: f32 = 1.0 / 32768.0;
/// Normalization scale of 16-bit texture coordinates with doubled range.
pub const U16_DOUBLE_SCALE: f32 = 1.0 / 16384.0;
/// Normalization scale of 8-bit normals and positions.
pub const S8_SCALE: f32 = 1.0 / 128.0;
/// Normalization scale of 16-bit normals and positions.
pub const S16_SCALE: f32 = 1.0 / 32768.0;
/// Scale from an 8-bit color channel to a float one.
pub const COLOR_SCALE: f32 = 1.0 / 255.0;

/// Encoding of unsigned vertex data (weights, texture coordinates).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unsigned {
    U8,
    U16,
    F32,
}

impl Unsigned {
    pub fn size(self) -> u8 {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::F32 => 4,
        }
    }

    /// Scale normalizing an integer value to float. `None` for floats, which are used as is.
    pub fn scale(self, double: bool) -> Option<f32> {
        match (self, double) {
            (Self::U8, _) => Some(U8_SCALE),
            (Self::U16, false) => Some(U16_SCALE),
            (Self::U16, true) => Some(U16_DOUBLE_SCALE),
            (Self::F32, _) => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::U8 => "U8",
            Self::U16 => "U16",
            Self::F32 => "Float",
        }
    }
}

/// Encoding of signed vertex data (normals, positions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signed {
    S8,
    S16,
    F32,
}

impl Signed {
    pub fn size(self) -> u8 {
        match self {
            Self::S8 => 1,
            Self::S16 => 2,
            Self::F32 => 4,
        }
    }

    /// Scale normalizing an integer value to float. `None` for floats, which are used as is.
    pub fn scale(self) -> Option<f32> {
        match self {
            Self::S8 => Some(S8_SCALE),
            Self::S16 => Some(S16_SCALE),
            Self::F32 => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::S8 => "S8",
            Self::S16 => "S16",
            Self::F32 => "Float",
        }
    }
}

/// What a weights step produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeightsOutput {
    /// Weights are blended into the skin matrix and not written out.
    Skin,
    /// Weights are copied in their source encoding.
    Raw,
    /// Weights are normalized to floats.
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeightsStep {
    pub format: Unsigned,
    pub count: u8,
    pub output: WeightsOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexCoordMode {
    /// Normalized to float.
    Plain,
    /// Normalized, then scaled and offset by the caller's UV scale.
    Prescale,
    /// Through mode: integer coordinates are kept unnormalized.
    Through,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TexCoordStep {
    pub format: Unsigned,
    pub mode: TexCoordMode,
    /// Whether 16-bit coordinates have doubled range.
    pub double: bool,
    pub morph: bool,
}

/// Source encoding of a single color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSource {
    /// A reserved encoding. Decodes to zero.
    Invalid,
    Rgb565,
    Rgba5551,
    Rgba4444,
    Rgba8888,
}

impl ColorSource {
    /// Bit width of each channel, or `None` for channels which are always 255.
    pub fn channel_bits(self) -> [Option<u32>; 4] {
        match self {
            Self::Invalid => [None; 4],
            Self::Rgb565 => [Some(5), Some(6), Some(5), None],
            Self::Rgba5551 => [Some(5), Some(5), Some(5), Some(1)],
            Self::Rgba4444 => [Some(4); 4],
            Self::Rgba8888 => [Some(8); 4],
        }
    }

    /// Factor bringing a channel of the given width to the 0..=255 range when blending morph
    /// targets. Single bit channels are blended as 0 or 255 already.
    pub fn morph_factor(bits: u32) -> f32 {
        match bits {
            1 | 8 => 1.0,
            bits => 255.0 / ((1u32 << bits) - 1) as f32,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Invalid => "Invalid",
            Self::Rgb565 => "565",
            Self::Rgba5551 => "5551",
            Self::Rgba4444 => "4444",
            Self::Rgba8888 => "8888",
        }
    }
}

/// Decoded format of colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorOutput {
    U8,
    F32,
}

/// Decodes both colors of a vertex. Each of them is optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorStep {
    pub color0: Option<ColorSource>,
    pub color1: Option<ColorSource>,
    pub output: ColorOutput,
    pub morph: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NormalOutput {
    /// Integer normals are copied in their source encoding.
    Raw,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NormalStep {
    pub format: Signed,
    pub output: NormalOutput,
    pub skin: bool,
    pub morph: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PositionStep {
    pub format: Signed,
    pub through: bool,
    pub skin: bool,
    pub morph: bool,
}

/// A single stage of a decoding pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Weights(WeightsStep),
    TexCoord(TexCoordStep),
    Color(ColorStep),
    Normal(NormalStep),
    Position(PositionStep),
    /// Writes zeros over an attribute whose source encoding is not supported.
    Zero(Attribute),
}

// fixed-capacity pipelines need a filler value for their unused slots
impl Default for Step {
    fn default() -> Self {
        Self::Zero(Attribute::Position)
    }
}

impl Step {
    /// Whether this step reads the skin matrix or morph targets together.
    pub fn is_morph_skin(&self) -> bool {
        match self {
            Self::Normal(n) => n.morph && n.skin,
            Self::Position(p) => p.morph && p.skin,
            _ => false,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Weights(w) => {
                let suffix = match (w.output, w.format) {
                    (WeightsOutput::Skin, _) => "Skin",
                    (WeightsOutput::Float, Unsigned::U8 | Unsigned::U16) => "ToFloat",
                    _ => "",
                };
                write!(f, "Weights{}{suffix} x{}", w.format.name(), w.count)
            }
            Self::TexCoord(tc) => {
                f.write_str("Tc")?;
                f.write_str(tc.format.name())?;
                if tc.double && tc.format == Unsigned::U16 {
                    f.write_str("Double")?;
                }
                match tc.mode {
                    TexCoordMode::Plain => (),
                    TexCoordMode::Prescale => f.write_str("Prescale")?,
                    TexCoordMode::Through => f.write_str("Through")?,
                }
                if tc.morph {
                    f.write_str("Morph")?;
                }
                if tc.mode == TexCoordMode::Plain && tc.format != Unsigned::F32 {
                    f.write_str("ToFloat")?;
                }
                Ok(())
            }
            Self::Color(c) => {
                f.write_str("Color")?;
                if let Some(c0) = c.color0 {
                    f.write_str(c0.name())?;
                }
                if let Some(c1) = c.color1 {
                    write!(f, "+{}", c1.name())?;
                }
                if c.morph {
                    f.write_str("Morph")?;
                }
                if c.output == ColorOutput::F32 {
                    f.write_str("ToFloat")?;
                }
                Ok(())
            }
            Self::Normal(n) => {
                write!(f, "Normal{}", n.format.name())?;
                if n.morph {
                    f.write_str("Morph")?;
                }
                if n.skin {
                    f.write_str("Skin")?;
                }
                if !n.skin && !n.morph && n.output == NormalOutput::Float && n.format != Signed::F32
                {
                    f.write_str("ToFloat")?;
                }
                Ok(())
            }
            Self::Position(p) => {
                write!(f, "Pos{}", p.format.name())?;
                if p.through {
                    f.write_str("Through")?;
                }
                if p.morph {
                    f.write_str("Morph")?;
                }
                if p.skin {
                    f.write_str("Skin")?;
                }
                Ok(())
            }
            Self::Zero(attr) => {
                let name: &'static str = attr.into();
                write!(f, "Zero{name}")
            }
        }
    }
}
