//! Decoded vertex layouts.
use std::fmt;
use strum::{EnumCount, IntoStaticStr, VariantArray};
use zerocopy::{Immutable, IntoBytes};

/// An attribute of a decoded vertex.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, EnumCount, VariantArray, IntoStaticStr,
)]
pub enum Attribute {
    /// Weights 0 to 3.
    Weights0,
    /// Weights 4 to 7.
    Weights1,
    TexCoord,
    Color0,
    Color1,
    Normal,
    #[default]
    Position,
}

/// Format of an attribute in a decoded vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, IntoStaticStr)]
#[repr(u8)]
pub enum DecodedFormat {
    #[default]
    None = 0,
    Float1,
    Float2,
    Float3,
    Float4,
    S8x3,
    S16x3,
    U8x1,
    U8x2,
    U8x3,
    U8x4,
    U16x1,
    U16x2,
    U16x3,
    U16x4,
}

impl DecodedFormat {
    /// Size of an attribute in this format, in bytes. Always a multiple of 4.
    pub fn size(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Float1 => 4,
            Self::Float2 => 8,
            Self::Float3 => 12,
            Self::Float4 => 16,
            Self::S8x3 => 4,
            Self::S16x3 => 8,
            Self::U8x1 | Self::U8x2 | Self::U8x3 | Self::U8x4 => 4,
            Self::U16x1 | Self::U16x2 => 4,
            Self::U16x3 | Self::U16x4 => 8,
        }
    }

    /// Number of components of this format.
    pub fn components(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Float1 | Self::U8x1 | Self::U16x1 => 1,
            Self::Float2 | Self::U8x2 | Self::U16x2 => 2,
            Self::Float3 | Self::U8x3 | Self::U16x3 | Self::S8x3 | Self::S16x3 => 3,
            Self::Float4 | Self::U8x4 | Self::U16x4 => 4,
        }
    }

    /// Returns the float format with `n` components.
    pub fn float(n: u8) -> Self {
        match n {
            1 => Self::Float1,
            2 => Self::Float2,
            3 => Self::Float3,
            4 => Self::Float4,
            _ => Self::None,
        }
    }

    /// Returns the unsigned byte format with `n` components.
    pub fn u8(n: u8) -> Self {
        match n {
            1 => Self::U8x1,
            2 => Self::U8x2,
            3 => Self::U8x3,
            4 => Self::U8x4,
            _ => Self::None,
        }
    }

    /// Returns the unsigned short format with `n` components.
    pub fn u16(n: u8) -> Self {
        match n {
            1 => Self::U16x1,
            2 => Self::U16x2,
            3 => Self::U16x3,
            4 => Self::U16x4,
            _ => Self::None,
        }
    }
}

impl fmt::Display for DecodedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.into())
    }
}

/// Format and position of an attribute inside a decoded vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AttributeLayout {
    pub format: DecodedFormat,
    pub offset: u8,
}

impl AttributeLayout {
    pub fn is_present(&self) -> bool {
        self.format != DecodedFormat::None
    }

    /// Byte range of this attribute inside a decoded vertex.
    pub fn range(&self) -> std::ops::Range<usize> {
        let start = self.offset as usize;
        start..start + self.format.size() as usize
    }
}

#[derive(Immutable, IntoBytes)]
#[repr(C)]
struct IdKey {
    formats: [u8; Attribute::COUNT],
    offsets: [u8; Attribute::COUNT],
    stride: [u8; 2],
}

/// Layout of a decoded vertex, as consumed by a rendering backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecodedLayout {
    attributes: [AttributeLayout; Attribute::COUNT],
    stride: u16,
    id: u64,
}

impl DecodedLayout {
    /// Layout of the given attribute. Absent attributes have [`DecodedFormat::None`].
    pub fn get(&self, attribute: Attribute) -> AttributeLayout {
        self.attributes[attribute as usize]
    }

    /// Size of a decoded vertex.
    pub fn stride(&self) -> u16 {
        self.stride
    }

    /// Identifier of this layout, derived from every field. Equal layouts have equal ids.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Present attributes, in decoded order.
    pub fn attributes(&self) -> impl Iterator<Item = (Attribute, AttributeLayout)> + '_ {
        Attribute::VARIANTS
            .iter()
            .map(|&attr| (attr, self.get(attr)))
            .filter(|(_, layout)| layout.is_present())
    }

    fn compute_id(attributes: &[AttributeLayout; Attribute::COUNT], stride: u16) -> u64 {
        let key = IdKey {
            formats: attributes.map(|a| a.format as u8),
            offsets: attributes.map(|a| a.offset),
            stride: stride.to_le_bytes(),
        };

        twox_hash::XxHash3_64::oneshot(key.as_bytes())
    }
}

impl fmt::Display for DecodedLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (attr, layout) in self.attributes() {
            let name: &'static str = attr.into();
            writeln!(f, "  {name:<9} {:<7} @ {}", layout.format, layout.offset)?;
        }

        write!(f, "  stride {} (id {:016x})", self.stride, self.id)
    }
}

/// Builds a [`DecodedLayout`] by appending attributes one after the other.
#[derive(Debug, Default)]
pub struct LayoutBuilder {
    attributes: [AttributeLayout; Attribute::COUNT],
    offset: u8,
}

impl LayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an attribute. Appending [`DecodedFormat::None`] is a no-op.
    pub fn push(&mut self, attribute: Attribute, format: DecodedFormat) -> &mut Self {
        if format == DecodedFormat::None {
            return self;
        }

        debug_assert!(!self.attributes[attribute as usize].is_present());
        self.attributes[attribute as usize] = AttributeLayout {
            format,
            offset: self.offset,
        };
        self.offset += format.size();

        self
    }

    pub fn build(&self) -> DecodedLayout {
        let stride = (self.offset as u16).next_multiple_of(4);
        DecodedLayout {
            attributes: self.attributes,
            stride,
            id: DecodedLayout::compute_id(&self.attributes, stride),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn offsets_follow_push_order() {
        let layout = LayoutBuilder::new()
            .push(Attribute::TexCoord, DecodedFormat::Float2)
            .push(Attribute::Color0, DecodedFormat::U8x4)
            .push(Attribute::Normal, DecodedFormat::S8x3)
            .push(Attribute::Position, DecodedFormat::Float3)
            .build();

        assert_eq!(layout.get(Attribute::TexCoord).offset, 0);
        assert_eq!(layout.get(Attribute::Color0).offset, 8);
        assert_eq!(layout.get(Attribute::Normal).offset, 12);
        assert_eq!(layout.get(Attribute::Position).offset, 16);
        assert_eq!(layout.stride(), 28);
        assert!(!layout.get(Attribute::Color1).is_present());
    }

    #[test]
    fn id_depends_on_every_field() {
        let a = LayoutBuilder::new()
            .push(Attribute::Color0, DecodedFormat::U8x4)
            .push(Attribute::Position, DecodedFormat::Float3)
            .build();
        let b = LayoutBuilder::new()
            .push(Attribute::Color0, DecodedFormat::U8x4)
            .push(Attribute::Position, DecodedFormat::Float3)
            .build();
        let c = LayoutBuilder::new()
            .push(Attribute::Color1, DecodedFormat::U8x4)
            .push(Attribute::Position, DecodedFormat::Float3)
            .build();
        let d = LayoutBuilder::new()
            .push(Attribute::Color0, DecodedFormat::Float4)
            .push(Attribute::Position, DecodedFormat::Float3)
            .build();

        assert_eq!(a.id(), b.id());
        assert_eq!(a, b);
        assert_ne!(a.id(), c.id());
        assert_ne!(a.id(), d.id());
    }

    #[test]
    fn sizes_are_word_granular() {
        for format in [
            DecodedFormat::Float1,
            DecodedFormat::Float4,
            DecodedFormat::S8x3,
            DecodedFormat::S16x3,
            DecodedFormat::U8x1,
            DecodedFormat::U16x1,
            DecodedFormat::U16x3,
        ] {
            assert_eq!(format.size() % 4, 0, "{format}");
        }
    }
}
