//! Decomposition of a vertex type into a decoding pipeline.
use crate::{
    descriptor::{ColorEncoding, CoordsEncoding, TexCoordEncoding, VertexType, WeightEncoding},
    layout::{Attribute, DecodedFormat, DecodedLayout, LayoutBuilder},
    step::{
        ColorOutput, ColorSource, ColorStep, NormalOutput, NormalStep, PositionStep, Signed, Step,
        TexCoordMode, TexCoordStep, Unsigned, WeightsOutput, WeightsStep,
    },
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::{fmt, sync::Arc};
use tinyvec::ArrayVec;

/// Decoding options, chosen by the rendering backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Options {
    /// Write weights as floats regardless of their source encoding.
    pub expand_all_weights_to_float: bool,
    /// Write 8-bit normals as floats instead of copying them.
    pub expand_8bit_normals_to_float: bool,
    /// Write colors as four floats instead of four bytes.
    pub expand_colors_to_float: bool,
    /// Apply skinning during decoding instead of writing weights out.
    pub skin_in_decode: bool,
    /// Apply the caller's UV scale and offset to texture coordinates.
    pub prescale_uv: bool,
    /// 16-bit texture coordinates have doubled range.
    pub double_texcoords: bool,
}

/// Offsets of every attribute inside a single morph target of an input vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputLayout {
    pub weights: u8,
    pub texcoord: u8,
    pub color0: u8,
    pub color1: u8,
    pub normal: u8,
    pub position: u8,
    /// Size of a single morph target.
    pub vertex_size: u8,
    /// Size of a whole vertex, including every morph target.
    pub stride: u16,
}

/// An encoding combination which cannot be decoded. The affected attribute decodes to zeros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Unsupported {
    #[default]
    MissingPosition,
    ReservedColor0(ColorEncoding),
    ReservedColor1(ColorEncoding),
}

impl fmt::Display for Unsupported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPosition => f.write_str("vertex has no position"),
            Self::ReservedColor0(enc) => write!(f, "reserved color0 encoding {enc:?}"),
            Self::ReservedColor1(enc) => write!(f, "reserved color1 encoding {enc:?}"),
        }
    }
}

#[derive(Default)]
struct InputCursor {
    offset: u8,
    biggest: u8,
}

impl InputCursor {
    fn place(&mut self, size: u8, align: u8) -> u8 {
        if size == 0 {
            return self.offset;
        }

        self.offset = self.offset.next_multiple_of(align);
        self.biggest = self.biggest.max(align);

        let offset = self.offset;
        self.offset += size;
        offset
    }

    fn vertex_size(&self) -> u8 {
        self.offset.next_multiple_of(self.biggest.max(1))
    }
}

fn unsigned_of_weights(enc: WeightEncoding) -> Option<Unsigned> {
    match enc {
        WeightEncoding::None => None,
        WeightEncoding::U8 => Some(Unsigned::U8),
        WeightEncoding::U16 => Some(Unsigned::U16),
        WeightEncoding::F32 => Some(Unsigned::F32),
    }
}

fn unsigned_of_texcoord(enc: TexCoordEncoding) -> Option<Unsigned> {
    match enc {
        TexCoordEncoding::None => None,
        TexCoordEncoding::U8 => Some(Unsigned::U8),
        TexCoordEncoding::U16 => Some(Unsigned::U16),
        TexCoordEncoding::F32 => Some(Unsigned::F32),
    }
}

fn signed_of_coords(enc: CoordsEncoding) -> Option<Signed> {
    match enc {
        CoordsEncoding::None => None,
        CoordsEncoding::S8 => Some(Signed::S8),
        CoordsEncoding::S16 => Some(Signed::S16),
        CoordsEncoding::F32 => Some(Signed::F32),
    }
}

fn color_source(enc: ColorEncoding) -> Option<ColorSource> {
    match enc {
        ColorEncoding::None => None,
        ColorEncoding::Reserved1 | ColorEncoding::Reserved2 | ColorEncoding::Reserved3 => {
            Some(ColorSource::Invalid)
        }
        ColorEncoding::Rgb565 => Some(ColorSource::Rgb565),
        ColorEncoding::Rgba5551 => Some(ColorSource::Rgba5551),
        ColorEncoding::Rgba4444 => Some(ColorSource::Rgba4444),
        ColorEncoding::Rgba8888 => Some(ColorSource::Rgba8888),
    }
}

/// Decoded format of `count` weights split into the two weight slots.
fn weight_formats(step: &WeightsStep) -> (DecodedFormat, DecodedFormat) {
    let w0 = step.count.min(4);
    let w1 = step.count.saturating_sub(4);
    let format = |n| match (step.output, step.format) {
        (WeightsOutput::Skin, _) => DecodedFormat::None,
        (WeightsOutput::Raw, Unsigned::U8) => DecodedFormat::u8(n),
        (WeightsOutput::Raw, Unsigned::U16) => DecodedFormat::u16(n),
        _ => DecodedFormat::float(n),
    };

    (format(w0), format(w1))
}

/// A decoding pipeline for a single vertex type.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub vertex_type: VertexType,
    pub options: Options,
    /// Steps, in execution order.
    pub steps: ArrayVec<[Step; 5]>,
    /// Layout of decoded vertices.
    pub layout: DecodedLayout,
    /// Layout of input vertices.
    pub input: InputLayout,
    pub weight_count: u8,
    pub morph_count: u8,
    pub through: bool,
    /// Encodings this plan cannot decode.
    pub unsupported: ArrayVec<[Unsupported; 3]>,
}

impl Plan {
    pub fn new(vertex_type: VertexType, options: Options) -> Self {
        let weight_count = vertex_type.weight_count();
        let morph_count = vertex_type.morph_count();
        let through = vertex_type.through();
        let morph = morph_count > 1;

        let mut steps = ArrayVec::new();
        let mut unsupported = ArrayVec::new();
        let mut input = InputCursor::default();
        let mut offsets = InputLayout::default();
        let mut layout = LayoutBuilder::new();

        // weights
        let weights = unsigned_of_weights(vertex_type.weights());
        let skin = weights.is_some() && options.skin_in_decode;
        if let Some(format) = weights {
            offsets.weights = input.place(weight_count * format.size(), format.size());

            let output = if skin {
                WeightsOutput::Skin
            } else if format == Unsigned::F32 || options.expand_all_weights_to_float {
                WeightsOutput::Float
            } else {
                WeightsOutput::Raw
            };

            let step = WeightsStep {
                format,
                count: weight_count,
                output,
            };

            let (w0, w1) = weight_formats(&step);
            layout.push(Attribute::Weights0, w0);
            layout.push(Attribute::Weights1, w1);
            steps.push(Step::Weights(step));
        }

        // texcoord
        if let Some(format) = unsigned_of_texcoord(vertex_type.texcoord()) {
            offsets.texcoord = input.place(2 * format.size(), format.size());

            let mode = if through {
                TexCoordMode::Through
            } else if options.prescale_uv {
                TexCoordMode::Prescale
            } else {
                TexCoordMode::Plain
            };

            layout.push(Attribute::TexCoord, DecodedFormat::Float2);
            steps.push(Step::TexCoord(TexCoordStep {
                format,
                mode,
                double: options.double_texcoords && format == Unsigned::U16,
                morph: morph && !through,
            }));
        }

        // colors
        let color_format = if options.expand_colors_to_float {
            DecodedFormat::Float4
        } else {
            DecodedFormat::U8x4
        };

        let mut color = |enc: ColorEncoding, attr: Attribute, offset: &mut u8| {
            let source = color_source(enc)?;
            let size = enc.size();
            *offset = input.place(size, size);
            layout.push(attr, color_format);

            if source == ColorSource::Invalid {
                let bad = match attr {
                    Attribute::Color0 => Unsupported::ReservedColor0(enc),
                    _ => Unsupported::ReservedColor1(enc),
                };
                unsupported.push(bad);
            }

            Some(source)
        };

        let color0 = color(vertex_type.color0(), Attribute::Color0, &mut offsets.color0);
        let color1 = color(vertex_type.color1(), Attribute::Color1, &mut offsets.color1);
        if color0.is_some() || color1.is_some() {
            steps.push(Step::Color(ColorStep {
                color0,
                color1,
                output: if options.expand_colors_to_float {
                    ColorOutput::F32
                } else {
                    ColorOutput::U8
                },
                morph,
            }));
        }

        // normal
        if let Some(format) = signed_of_coords(vertex_type.normal()) {
            offsets.normal = input.place(3 * format.size(), format.size());

            let raw = !skin
                && !morph
                && match format {
                    Signed::S8 => !options.expand_8bit_normals_to_float,
                    Signed::S16 => true,
                    Signed::F32 => false,
                };

            let (output, decoded) = match (raw, format) {
                (true, Signed::S8) => (NormalOutput::Raw, DecodedFormat::S8x3),
                (true, Signed::S16) => (NormalOutput::Raw, DecodedFormat::S16x3),
                _ => (NormalOutput::Float, DecodedFormat::Float3),
            };

            layout.push(Attribute::Normal, decoded);
            steps.push(Step::Normal(NormalStep {
                format,
                output,
                skin,
                morph,
            }));
        }

        // position
        layout.push(Attribute::Position, DecodedFormat::Float3);
        match signed_of_coords(vertex_type.position()) {
            Some(format) => {
                offsets.position = input.place(3 * format.size(), format.size());
                steps.push(Step::Position(PositionStep {
                    format,
                    through,
                    skin: skin && !through,
                    morph: morph && !through,
                }));
            }
            None => {
                offsets.position = input.offset;
                unsupported.push(Unsupported::MissingPosition);
                steps.push(Step::Zero(Attribute::Position));
            }
        }

        offsets.vertex_size = input.vertex_size();
        offsets.stride = offsets.vertex_size as u16 * morph_count as u16;

        Self {
            vertex_type,
            options,
            steps,
            layout: layout.build(),
            input: offsets,
            weight_count,
            morph_count,
            through,
            unsupported,
        }
    }

    /// Whether this plan skins vertices while decoding.
    pub fn skins(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s, Step::Weights(w) if w.output == WeightsOutput::Skin))
    }

    /// Whether every encoding of this plan is supported.
    pub fn is_supported(&self) -> bool {
        self.unsupported.is_empty()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "vertex type {:#010x}: {} bytes x {} morph targets",
            self.vertex_type.to_bits(),
            self.input.vertex_size,
            self.morph_count
        )?;

        if self.weight_count > 0 {
            write!(f, ", {} weights", self.weight_count)?;
        }

        if self.through {
            f.write_str(", through")?;
        }

        f.write_str("\nsteps:")?;
        for step in &self.steps {
            write!(f, " {step}")?;
        }

        for bad in &self.unsupported {
            write!(f, "\nunsupported: {bad}")?;
        }

        write!(f, "\nlayout:\n{}", self.layout)
    }
}

/// Caches plans by vertex type and options.
#[derive(Default)]
pub struct Planner {
    plans: FxHashMap<(u32, Options), Arc<Plan>>,
    reported: FxHashSet<u32>,
}

impl Planner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the plan for the given vertex type, building it if needed.
    pub fn plan(&mut self, vertex_type: VertexType, options: Options) -> Arc<Plan> {
        let bits = vertex_type.to_bits();
        if let Some(plan) = self.plans.get(&(bits, options)) {
            return plan.clone();
        }

        let plan = Arc::new(Plan::new(vertex_type, options));
        if !plan.is_supported() && self.reported.insert(bits) {
            for bad in &plan.unsupported {
                tracing::warn!("vertex type {bits:#010x}: {bad}, decoding it as zeros");
            }
        }

        self.plans.insert((bits, options), plan.clone());
        plan
    }

    /// Number of cached plans.
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn clear(&mut self) {
        self.plans.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::descriptor::IndexWidth;

    fn vtype() -> VertexType {
        VertexType::default()
    }

    #[test]
    fn input_offsets_are_aligned() {
        // u8 weights x3, u16 texcoords, 565 color, s8 normal, f32 position
        let vt = vtype()
            .with_weights(WeightEncoding::U8)
            .with_weight_count(3)
            .with_texcoord(TexCoordEncoding::U16)
            .with_color0(ColorEncoding::Rgb565)
            .with_normal(CoordsEncoding::S8)
            .with_position(CoordsEncoding::F32);

        let plan = Plan::new(vt, Options::default());
        assert_eq!(plan.input.weights, 0);
        assert_eq!(plan.input.texcoord, 4);
        assert_eq!(plan.input.color0, 8);
        assert_eq!(plan.input.normal, 10);
        assert_eq!(plan.input.position, 16);
        assert_eq!(plan.input.vertex_size, 28);
        assert_eq!(plan.input.stride, 28);
    }

    #[test]
    fn stride_covers_morph_targets() {
        let vt = vtype()
            .with_normal(CoordsEncoding::S8)
            .with_position(CoordsEncoding::S16)
            .with_morph_count(3);

        let plan = Plan::new(vt, Options::default());
        assert_eq!(plan.input.normal, 0);
        assert_eq!(plan.input.position, 4);
        assert_eq!(plan.input.vertex_size, 10);
        assert_eq!(plan.input.stride, 30);
        assert_eq!(plan.morph_count, 3);
        assert_eq!(
            plan.layout.get(Attribute::Normal).format,
            DecodedFormat::Float3
        );
    }

    #[test]
    fn pipeline_order() {
        let vt = vtype()
            .with_weights(WeightEncoding::F32)
            .with_weight_count(6)
            .with_texcoord(TexCoordEncoding::F32)
            .with_color0(ColorEncoding::Rgba8888)
            .with_color1(ColorEncoding::Rgba4444)
            .with_normal(CoordsEncoding::S16)
            .with_position(CoordsEncoding::S8)
            .with_index(IndexWidth::U16);

        let plan = Plan::new(vt, Options::default());
        assert_eq!(plan.steps.len(), 5);
        assert!(matches!(plan.steps[0], Step::Weights(_)));
        assert!(matches!(plan.steps[1], Step::TexCoord(_)));
        assert!(matches!(plan.steps[2], Step::Color(_)));
        assert!(matches!(plan.steps[3], Step::Normal(_)));
        assert!(matches!(plan.steps[4], Step::Position(_)));

        let layout = &plan.layout;
        assert_eq!(layout.get(Attribute::Weights0).format, DecodedFormat::Float4);
        assert_eq!(layout.get(Attribute::Weights1).format, DecodedFormat::Float2);
        assert_eq!(layout.get(Attribute::TexCoord).offset, 24);
        assert_eq!(layout.get(Attribute::Color0).format, DecodedFormat::U8x4);
        assert_eq!(layout.get(Attribute::Color1).offset, 36);
        assert_eq!(layout.get(Attribute::Normal).format, DecodedFormat::S16x3);
        assert_eq!(layout.get(Attribute::Position).offset, 48);
        assert_eq!(layout.stride(), 60);
    }

    #[test]
    fn attributes_never_overlap() {
        let vt = vtype()
            .with_weights(WeightEncoding::U16)
            .with_weight_count(5)
            .with_texcoord(TexCoordEncoding::U8)
            .with_color0(ColorEncoding::Rgba5551)
            .with_normal(CoordsEncoding::S8)
            .with_position(CoordsEncoding::S16);

        for options in [
            Options::default(),
            Options {
                expand_all_weights_to_float: true,
                expand_8bit_normals_to_float: true,
                expand_colors_to_float: true,
                ..Default::default()
            },
        ] {
            let plan = Plan::new(vt, options);
            let mut ranges: Vec<_> = plan.layout.attributes().map(|(_, a)| a.range()).collect();
            ranges.sort_by_key(|r| r.start);

            for pair in ranges.windows(2) {
                assert!(pair[0].end <= pair[1].start);
            }
            assert!(ranges.last().unwrap().end <= plan.layout.stride() as usize);
        }
    }

    #[test]
    fn planning_is_deterministic() {
        let vt = vtype()
            .with_texcoord(TexCoordEncoding::U16)
            .with_color0(ColorEncoding::Rgba4444)
            .with_position(CoordsEncoding::F32);

        let a = Plan::new(vt, Options::default());
        let b = Plan::new(vt, Options::default());
        assert_eq!(a, b);
        assert_eq!(a.layout.id(), b.layout.id());

        let c = Plan::new(
            vt,
            Options {
                expand_colors_to_float: true,
                ..Default::default()
            },
        );
        assert_ne!(a.layout.id(), c.layout.id());
    }

    #[test]
    fn skinning_removes_weights_from_layout() {
        let vt = vtype()
            .with_weights(WeightEncoding::U8)
            .with_weight_count(2)
            .with_normal(CoordsEncoding::S8)
            .with_position(CoordsEncoding::F32);

        let plan = Plan::new(
            vt,
            Options {
                skin_in_decode: true,
                ..Default::default()
            },
        );

        assert!(plan.skins());
        assert!(!plan.layout.get(Attribute::Weights0).is_present());
        assert_eq!(
            plan.layout.get(Attribute::Normal).format,
            DecodedFormat::Float3
        );
        assert!(matches!(plan.steps[2], Step::Position(PositionStep { skin: true, .. })));
    }

    #[test]
    fn unsupported_encodings_are_recorded() {
        let vt = vtype()
            .with_color0(ColorEncoding::Reserved2)
            .with_normal(CoordsEncoding::S16);

        let plan = Plan::new(vt, Options::default());
        assert!(!plan.is_supported());
        assert_eq!(
            plan.unsupported.as_slice(),
            &[
                Unsupported::ReservedColor0(ColorEncoding::Reserved2),
                Unsupported::MissingPosition
            ]
        );
        assert_eq!(plan.steps.last(), Some(&Step::Zero(Attribute::Position)));
        assert!(plan.layout.get(Attribute::Color0).is_present());
        assert_eq!(plan.input.vertex_size, 6);
    }

    #[test]
    fn through_mode_disables_morph() {
        let vt = vtype()
            .with_texcoord(TexCoordEncoding::U16)
            .with_position(CoordsEncoding::S16)
            .with_through(true)
            .with_morph_count(2);

        let plan = Plan::new(vt, Options::default());
        assert_eq!(
            plan.steps[0],
            Step::TexCoord(TexCoordStep {
                format: Unsigned::U16,
                mode: TexCoordMode::Through,
                double: false,
                morph: false,
            })
        );
        assert_eq!(plan.steps[0].to_string(), "TcU16Through");
        assert_eq!(plan.steps[1].to_string(), "PosS16Through");
    }

    #[test]
    fn planner_caches() {
        let mut planner = Planner::new();
        let vt = vtype().with_position(CoordsEncoding::F32);

        let a = planner.plan(vt, Options::default());
        let b = planner.plan(vt, Options::default());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(planner.len(), 1);

        planner.plan(
            vt,
            Options {
                prescale_uv: true,
                ..Default::default()
            },
        );
        assert_eq!(planner.len(), 2);
    }
}
