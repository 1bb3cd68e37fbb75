//! Convenient access to decoded vertices, for software transform and debugging.
use crate::{
    layout::{Attribute, DecodedFormat, DecodedLayout},
    plan::Plan,
};

macro_rules! warn_once {
    ($($arg:tt)*) => {{
        static WARNED: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);
        if !WARNED.swap(true, std::sync::atomic::Ordering::Relaxed) {
            tracing::warn!($($arg)*);
        }
    }};
}

/// Reads attributes of decoded vertices, converting them to floats.
///
/// Attributes in a format the reader does not understand read as zeros.
pub struct VertexReader<'a> {
    data: &'a [u8],
    layout: &'a DecodedLayout,
    through: bool,
    base: usize,
}

impl<'a> VertexReader<'a> {
    pub fn new(data: &'a [u8], layout: &'a DecodedLayout, through: bool) -> Self {
        Self {
            data,
            layout,
            through,
            base: 0,
        }
    }

    /// Creates a reader over vertices decoded with `plan`.
    pub fn for_plan(data: &'a [u8], plan: &'a Plan) -> Self {
        Self::new(data, &plan.layout, plan.through)
    }

    /// Moves to the vertex at `index`.
    pub fn goto(&mut self, index: usize) {
        self.base = index * self.layout.stride() as usize;
    }

    pub fn has_weights(&self) -> bool {
        self.layout.get(Attribute::Weights0).is_present()
    }

    pub fn has_uv(&self) -> bool {
        self.layout.get(Attribute::TexCoord).is_present()
    }

    pub fn has_color0(&self) -> bool {
        self.layout.get(Attribute::Color0).is_present()
    }

    pub fn has_color1(&self) -> bool {
        self.layout.get(Attribute::Color1).is_present()
    }

    pub fn has_normal(&self) -> bool {
        self.layout.get(Attribute::Normal).is_present()
    }

    pub fn is_through(&self) -> bool {
        self.through
    }

    fn at(&self, attr: Attribute) -> (DecodedFormat, &'a [u8]) {
        let layout = self.layout.get(attr);
        let start = self.base + layout.offset as usize;
        (layout.format, &self.data[start..start + layout.format.size() as usize])
    }

    fn f32s<const N: usize>(bytes: &[u8]) -> [f32; N] {
        std::array::from_fn(|i| {
            f32::from_le_bytes([
                bytes[4 * i],
                bytes[4 * i + 1],
                bytes[4 * i + 2],
                bytes[4 * i + 3],
            ])
        })
    }

    fn u16_at(bytes: &[u8], i: usize) -> u16 {
        u16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]])
    }

    /// Reads the position. In through mode, Z is converted by `z` for floats and by `int_z`,
    /// which also receives the largest representable value, for integers.
    fn position(&self, z: impl Fn(f32) -> f32, int_z: impl Fn(f32, f32) -> f32) -> [f32; 3] {
        let (format, bytes) = self.at(Attribute::Position);
        match format {
            DecodedFormat::Float3 => {
                let mut pos = Self::f32s::<3>(bytes);
                if self.through {
                    // an integer value passed as a float
                    pos[2] = z((pos[2] as i32) as f32);
                }
                pos
            }
            DecodedFormat::S16x3 => {
                let s = |i| Self::u16_at(bytes, i) as i16 as f32;
                if self.through {
                    [s(0), s(1), int_z(Self::u16_at(bytes, 2) as f32, 65535.0)]
                } else {
                    [s(0), s(1), s(2)].map(|v| v * (1.0 / 32768.0))
                }
            }
            DecodedFormat::S8x3 => {
                let s = |i: usize| bytes[i] as i8 as f32;
                if self.through {
                    [s(0), s(1), int_z(bytes[2] as f32, 255.0)]
                } else {
                    [s(0), s(1), s(2)].map(|v| v * (1.0 / 128.0))
                }
            }
            format => {
                warn_once!("reader: unsupported position format {format}");
                [0.0; 3]
            }
        }
    }

    /// Reads the position. In through mode, Z is normalized to `[0, 1]`.
    pub fn read_pos(&self) -> [f32; 3] {
        self.position(
            |z| (z * (1.0 / 65535.0)).clamp(0.0, 1.0),
            |z, max| z * (1.0 / max),
        )
    }

    /// Reads the position. In through mode, Z is kept as an integer in `[0, 65535]`.
    pub fn read_pos_through_z16(&self) -> [f32; 3] {
        self.position(|z| z.clamp(0.0, 65535.0), |z, _| z)
    }

    pub fn read_normal(&self) -> [f32; 3] {
        let (format, bytes) = self.at(Attribute::Normal);
        match format {
            DecodedFormat::Float3 => Self::f32s(bytes),
            DecodedFormat::S16x3 => {
                std::array::from_fn(|i| Self::u16_at(bytes, i) as i16 as f32 * (1.0 / 32767.0))
            }
            DecodedFormat::S8x3 => std::array::from_fn(|i| bytes[i] as i8 as f32 * (1.0 / 127.0)),
            format => {
                warn_once!("reader: unsupported normal format {format}");
                [0.0; 3]
            }
        }
    }

    pub fn read_uv(&self) -> [f32; 2] {
        let (format, bytes) = self.at(Attribute::TexCoord);
        match format {
            DecodedFormat::Float2 => Self::f32s(bytes),
            DecodedFormat::U8x2 => [bytes[0], bytes[1]].map(|v| v as f32 * (1.0 / 128.0)),
            DecodedFormat::U16x2 => {
                std::array::from_fn(|i| Self::u16_at(bytes, i) as f32 * (1.0 / 32768.0))
            }
            format => {
                warn_once!("reader: unsupported uv format {format}");
                [0.0; 2]
            }
        }
    }

    pub fn read_color0(&self) -> [f32; 4] {
        let (format, bytes) = self.at(Attribute::Color0);
        match format {
            DecodedFormat::U8x4 => std::array::from_fn(|i| bytes[i] as f32 * (1.0 / 255.0)),
            DecodedFormat::Float4 => Self::f32s(bytes),
            format => {
                warn_once!("reader: unsupported color0 format {format}");
                [0.0; 4]
            }
        }
    }

    pub fn read_color0_8888(&self) -> [u8; 4] {
        let (format, bytes) = self.at(Attribute::Color0);
        match format {
            DecodedFormat::U8x4 => [bytes[0], bytes[1], bytes[2], bytes[3]],
            DecodedFormat::Float4 => Self::f32s::<4>(bytes).map(|v| (v * 255.0) as u8),
            format => {
                warn_once!("reader: unsupported color0 format {format}");
                [0; 4]
            }
        }
    }

    /// Reads the RGB channels of the secondary color.
    pub fn read_color1(&self) -> [f32; 3] {
        let (format, bytes) = self.at(Attribute::Color1);
        match format {
            DecodedFormat::U8x4 => std::array::from_fn(|i| bytes[i] as f32 * (1.0 / 255.0)),
            DecodedFormat::Float4 => Self::f32s(bytes),
            format => {
                warn_once!("reader: unsupported color1 format {format}");
                [0.0; 3]
            }
        }
    }

    /// Reads every weight. Missing weights read as zero.
    pub fn read_weights(&self) -> [f32; 8] {
        let mut weights = [0.0; 8];
        for (attr, base) in [(Attribute::Weights0, 0), (Attribute::Weights1, 4)] {
            let (format, bytes) = self.at(attr);
            let n = format.components() as usize;
            let out = &mut weights[base..base + n];

            match format {
                DecodedFormat::None => (),
                DecodedFormat::Float1
                | DecodedFormat::Float2
                | DecodedFormat::Float3
                | DecodedFormat::Float4 => {
                    for (i, w) in out.iter_mut().enumerate() {
                        *w = Self::f32s::<1>(&bytes[4 * i..])[0];
                    }
                }
                DecodedFormat::U8x1
                | DecodedFormat::U8x2
                | DecodedFormat::U8x3
                | DecodedFormat::U8x4 => {
                    for (w, b) in out.iter_mut().zip(bytes) {
                        *w = *b as f32 * (1.0 / 128.0);
                    }
                }
                DecodedFormat::U16x1
                | DecodedFormat::U16x2
                | DecodedFormat::U16x3
                | DecodedFormat::U16x4 => {
                    for (i, w) in out.iter_mut().enumerate() {
                        *w = Self::u16_at(bytes, i) as f32 * (1.0 / 32768.0);
                    }
                }
                format => {
                    warn_once!("reader: unsupported weights format {format}");
                    out.fill(0.0);
                }
            }
        }

        weights
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        descriptor::{ColorEncoding, CoordsEncoding, VertexType, WeightEncoding},
        index::IndexBounds,
        interp,
        layout::LayoutBuilder,
        params::DecodeParams,
        plan::Options,
    };

    fn decode_one(plan: &Plan, verts: &[u8]) -> Vec<u8> {
        let mut decoded = vec![0; plan.layout.stride() as usize];
        interp::decode(
            plan,
            &DecodeParams::default(),
            verts,
            &mut decoded,
            IndexBounds { lower: 0, upper: 0 },
        )
        .unwrap();
        decoded
    }

    fn through_float_plan() -> Plan {
        let vt = VertexType::default()
            .with_position(CoordsEncoding::F32)
            .with_through(true);
        Plan::new(vt, Options::default())
    }

    fn float_verts(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn through_z_is_clamped() {
        let plan = through_float_plan();

        let decoded = decode_one(&plan, &float_verts(&[1.0, 2.0, -100.0]));
        let reader = VertexReader::for_plan(&decoded, &plan);
        assert_eq!(reader.read_pos(), [1.0, 2.0, 0.0]);
        assert_eq!(reader.read_pos_through_z16(), [1.0, 2.0, 0.0]);

        let decoded = decode_one(&plan, &float_verts(&[1.0, 2.0, 70000.0]));
        let reader = VertexReader::for_plan(&decoded, &plan);
        assert_eq!(reader.read_pos()[2], 1.0);
        assert_eq!(reader.read_pos_through_z16()[2], 65535.0);
    }

    #[test]
    fn through_z_is_truncated() {
        let plan = through_float_plan();
        let decoded = decode_one(&plan, &float_verts(&[0.0, 0.0, 300.75]));
        let reader = VertexReader::for_plan(&decoded, &plan);
        assert_eq!(reader.read_pos_through_z16()[2], 300.0);
        assert_eq!(reader.read_pos()[2], 300.0 * (1.0 / 65535.0));
    }

    #[test]
    fn through_s16_z_is_in_range() {
        let vt = VertexType::default()
            .with_position(CoordsEncoding::S16)
            .with_through(true);
        let plan = Plan::new(vt, Options::default());
        let s16_verts = |values: [i16; 3]| -> Vec<u8> {
            values.iter().flat_map(|v| v.to_le_bytes()).collect()
        };

        // z is unsigned, so the bits of -100 decode to 65436
        let decoded = decode_one(&plan, &s16_verts([-5, 10, -100]));
        let reader = VertexReader::for_plan(&decoded, &plan);
        assert_eq!(reader.read_pos_through_z16(), [-5.0, 10.0, 65436.0]);
        assert_eq!(reader.read_pos(), [-5.0, 10.0, 65436.0 * (1.0 / 65535.0)]);

        let decoded = decode_one(&plan, &s16_verts([0, 0, -1]));
        let reader = VertexReader::for_plan(&decoded, &plan);
        assert_eq!(reader.read_pos()[2], 1.0);
        assert_eq!(reader.read_pos_through_z16()[2], 65535.0);

        let decoded = decode_one(&plan, &s16_verts([0, 0, 0]));
        let reader = VertexReader::for_plan(&decoded, &plan);
        assert_eq!(reader.read_pos()[2], 0.0);
        assert_eq!(reader.read_pos_through_z16()[2], 0.0);
    }

    #[test]
    fn through_s16x3_layout_scales_z() {
        let layout = LayoutBuilder::new()
            .push(Attribute::Position, DecodedFormat::S16x3)
            .build();

        let mut data = [0; 8];
        data[0..2].copy_from_slice(&(-3i16).to_le_bytes());
        data[4..6].copy_from_slice(&u16::MAX.to_le_bytes());

        let reader = VertexReader::new(&data, &layout, true);
        assert_eq!(reader.read_pos(), [-3.0, 0.0, 1.0]);
        assert_eq!(reader.read_pos_through_z16(), [-3.0, 0.0, 65535.0]);
    }

    #[test]
    fn unsupported_normal_reads_as_zero() {
        let layout = LayoutBuilder::new()
            .push(Attribute::Normal, DecodedFormat::U8x4)
            .push(Attribute::Position, DecodedFormat::Float3)
            .build();

        let data = [0x7F; 16];
        let reader = VertexReader::new(&data, &layout, false);
        assert!(reader.has_normal());
        assert_eq!(reader.read_normal(), [0.0; 3]);
    }

    #[test]
    fn goto_moves_by_stride() {
        let vt = VertexType::default()
            .with_color0(ColorEncoding::Rgba8888)
            .with_position(CoordsEncoding::S8);
        let plan = Plan::new(vt, Options::default());

        let verts = [10, 20, 30, 40, 0, 0, 0, 0, 50, 60, 70, 80, 0x40, 0, 0, 0];
        let mut decoded = vec![0; 2 * plan.layout.stride() as usize];
        interp::decode(
            &plan,
            &DecodeParams::default(),
            &verts,
            &mut decoded,
            IndexBounds { lower: 0, upper: 1 },
        )
        .unwrap();

        let mut reader = VertexReader::for_plan(&decoded, &plan);
        assert_eq!(reader.read_color0_8888(), [10, 20, 30, 40]);

        reader.goto(1);
        assert_eq!(reader.read_color0_8888(), [50, 60, 70, 80]);
        assert_eq!(reader.read_pos(), [0.5, 0.0, 0.0]);
        assert_eq!(reader.read_color1(), [0.0; 3]);
        assert!(!reader.has_color1());
        assert!(!reader.has_uv());
    }

    #[test]
    fn weights() {
        let vt = VertexType::default()
            .with_weights(WeightEncoding::U8)
            .with_weight_count(5)
            .with_position(CoordsEncoding::S8);
        let plan = Plan::new(vt, Options::default());

        let decoded = decode_one(&plan, &[128, 64, 32, 0, 16, 0, 0, 0]);
        let reader = VertexReader::for_plan(&decoded, &plan);
        assert!(reader.has_weights());
        assert_eq!(
            reader.read_weights(),
            [1.0, 0.5, 0.25, 0.0, 0.125, 0.0, 0.0, 0.0]
        );
    }
}
