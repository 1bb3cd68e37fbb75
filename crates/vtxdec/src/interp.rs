//! Reference interpreter of decoding pipelines.
use crate::{
    index::IndexBounds,
    layout::Attribute,
    params::DecodeParams,
    plan::Plan,
    step::{
        COLOR_SCALE, ColorOutput, ColorSource, ColorStep, NormalOutput, NormalStep, PositionStep,
        Signed, Step, TexCoordMode, TexCoordStep, U8_SCALE, Unsigned, WeightsOutput, WeightsStep,
    },
};
use easyerr::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("vertex buffer has {len} bytes but {needed} are needed")]
    InputTooShort { len: usize, needed: usize },
    #[error("decoded buffer has {len} bytes but {needed} are needed")]
    OutputTooShort { len: usize, needed: usize },
    #[error("index range {lower}..={upper} is inverted")]
    InvertedBounds { lower: u32, upper: u32 },
}

/// Checks that buffers of the given lengths can hold the vertices in `bounds`.
pub fn validate(
    plan: &Plan,
    verts: usize,
    decoded: usize,
    bounds: IndexBounds,
) -> Result<(), DecodeError> {
    if bounds.is_empty() {
        return Err(DecodeError::InvertedBounds {
            lower: bounds.lower,
            upper: bounds.upper,
        });
    }

    let needed = (bounds.upper as usize + 1) * plan.input.stride as usize;
    if verts < needed {
        return Err(DecodeError::InputTooShort { len: verts, needed });
    }

    let needed = bounds.len() * plan.layout.stride() as usize;
    if decoded < needed {
        return Err(DecodeError::OutputTooShort {
            len: decoded,
            needed,
        });
    }

    Ok(())
}

/// Something that decodes vertices according to a plan.
pub trait VertexDecoder: Send {
    /// Decodes the vertices in `bounds` from `verts` into `decoded`. The vertex with index
    /// `bounds.lower` is written at the start of `decoded`.
    fn decode(
        &mut self,
        plan: &Plan,
        params: &DecodeParams,
        verts: &[u8],
        decoded: &mut [u8],
        bounds: IndexBounds,
    ) -> Result<(), DecodeError>;
}

/// A [`VertexDecoder`] which always interprets the plan.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterpreterDecoder;

impl VertexDecoder for InterpreterDecoder {
    fn decode(
        &mut self,
        plan: &Plan,
        params: &DecodeParams,
        verts: &[u8],
        decoded: &mut [u8],
        bounds: IndexBounds,
    ) -> Result<(), DecodeError> {
        decode(plan, params, verts, decoded, bounds)
    }
}

/// Decodes the vertices in `bounds` by interpreting the steps of `plan`.
pub fn decode(
    plan: &Plan,
    params: &DecodeParams,
    verts: &[u8],
    decoded: &mut [u8],
    bounds: IndexBounds,
) -> Result<(), DecodeError> {
    validate(plan, verts.len(), decoded.len(), bounds)?;

    let in_stride = plan.input.stride as usize;
    let out_stride = plan.layout.stride() as usize;

    // input stride is zero if no attribute reads input data
    let vertices = decoded
        .chunks_exact_mut(out_stride)
        .take(bounds.len())
        .enumerate();

    for (i, dst) in vertices {
        let start = (bounds.lower as usize + i) * in_stride;
        let src = &verts[start..start + in_stride];
        let mut vertex = Vertex {
            plan,
            params,
            src,
            dst,
            skin: [0.0; 12],
        };

        for step in &plan.steps {
            vertex.run(step);
        }
    }

    Ok(())
}

#[inline(always)]
fn bytes<const N: usize>(src: &[u8], offset: usize) -> [u8; N] {
    let mut bytes = [0; N];
    bytes.copy_from_slice(&src[offset..offset + N]);
    bytes
}

#[inline(always)]
fn u16_at(src: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(bytes(src, offset))
}

#[inline(always)]
fn u32_at(src: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes(src, offset))
}

#[inline(always)]
fn f32_at(src: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes(bytes(src, offset))
}

#[inline(always)]
fn unsigned_at(src: &[u8], offset: usize, format: Unsigned) -> f32 {
    match format {
        Unsigned::U8 => src[offset] as f32,
        Unsigned::U16 => u16_at(src, offset) as f32,
        Unsigned::F32 => f32_at(src, offset),
    }
}

#[inline(always)]
fn signed_at(src: &[u8], offset: usize, format: Signed) -> f32 {
    match format {
        Signed::S8 => src[offset] as i8 as f32,
        Signed::S16 => u16_at(src, offset) as i16 as f32,
        Signed::F32 => f32_at(src, offset),
    }
}

#[inline(always)]
fn normalize(value: f32, scale: Option<f32>) -> f32 {
    match scale {
        Some(k) => value * k,
        None => value,
    }
}

#[inline(always)]
fn put_f32(dst: &mut [u8], offset: usize, value: f32) {
    dst[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn packed_color(src: &[u8], offset: usize, source: ColorSource) -> u32 {
    match source {
        ColorSource::Invalid => 0,
        ColorSource::Rgba8888 => u32_at(src, offset),
        _ => u16_at(src, offset) as u32,
    }
}

/// Splits a packed color into its channels.
fn channels(packed: u32, source: ColorSource) -> [Option<u32>; 4] {
    let mut shift = 0;
    let mut out = [None; 4];
    for (out, bits) in out.iter_mut().zip(source.channel_bits()) {
        if let Some(bits) = bits {
            *out = Some((packed >> shift) & ((1 << bits) - 1));
            shift += bits;
        }
    }

    out
}

/// Expands a channel of the given width to 8 bits.
fn expand_channel(bits: u32, value: u32) -> u8 {
    let value = match bits {
        1 => value * 0xFF,
        4 => (value << 4) | value,
        5 => (value << 3) | (value >> 2),
        6 => (value << 2) | (value >> 4),
        _ => value,
    };

    value as u8
}

/// Expands a packed color to 8 bits per channel.
pub fn expand_color(packed: u32, source: ColorSource) -> [u8; 4] {
    if source == ColorSource::Invalid {
        return [0; 4];
    }

    let channels = channels(packed, source);
    let bits = source.channel_bits();
    std::array::from_fn(|i| match (bits[i], channels[i]) {
        (Some(bits), Some(value)) => expand_channel(bits, value),
        _ => 0xFF,
    })
}

struct Vertex<'a> {
    plan: &'a Plan,
    params: &'a DecodeParams,
    /// Input vertex, including every morph target.
    src: &'a [u8],
    /// Decoded vertex.
    dst: &'a mut [u8],
    skin: [f32; 12],
}

impl Vertex<'_> {
    fn run(&mut self, step: &Step) {
        match step {
            Step::Weights(step) => self.weights(step),
            Step::TexCoord(step) => self.texcoord(step),
            Step::Color(step) => self.color(step),
            Step::Normal(step) => self.normal(step),
            Step::Position(step) => self.position(step),
            Step::Zero(attr) => {
                let range = self.plan.layout.get(*attr).range();
                self.dst[range].fill(0);
            }
        }
    }

    fn output(&self, attr: Attribute) -> usize {
        self.plan.layout.get(attr).offset as usize
    }

    /// Reads `N` components of the first morph target, or blends them across every morph target
    /// if `morph` is set.
    fn fetch<const N: usize>(
        &self,
        offset: u8,
        size: u8,
        scale: Option<f32>,
        morph: bool,
        read: impl Fn(&[u8], usize) -> f32,
    ) -> [f32; N] {
        let offset = offset as usize;
        let size = size as usize;

        if !morph {
            return std::array::from_fn(|c| normalize(read(self.src, offset + c * size), scale));
        }

        let vertex_size = self.plan.input.vertex_size as usize;
        let target = |n: usize| {
            let factor = normalize(self.params.morph_weights[n], scale);
            let base = n * vertex_size + offset;
            std::array::from_fn::<f32, N, _>(|c| read(self.src, base + c * size) * factor)
        };

        let mut acc = target(0);
        for n in 1..self.plan.morph_count as usize {
            for (acc, value) in acc.iter_mut().zip(target(n)) {
                *acc = *acc + value;
            }
        }

        acc
    }

    fn transform(&self, v: [f32; 3], translate: bool) -> [f32; 3] {
        let m = &self.skin;
        std::array::from_fn(|i| {
            let r = v[0] * m[i] + v[1] * m[3 + i];
            let r = r + v[2] * m[6 + i];
            if translate { r + m[9 + i] } else { r }
        })
    }

    fn put_vec3(&mut self, attr: Attribute, v: [f32; 3]) {
        let out = self.output(attr);
        for (c, v) in v.into_iter().enumerate() {
            put_f32(self.dst, out + 4 * c, v);
        }
    }

    fn weights(&mut self, step: &WeightsStep) {
        let offset = self.plan.input.weights as usize;
        let size = step.format.size() as usize;
        let count = step.count as usize;
        let weight = |j: usize| {
            normalize(
                unsigned_at(self.src, offset + j * size, step.format),
                step.format.scale(false),
            )
        };

        let written = match step.output {
            WeightsOutput::Skin => {
                let w = weight(0);
                let mut m = self.params.bones[0].0.map(|b| w * b);
                for j in 1..count {
                    let w = weight(j);
                    for (m, b) in m.iter_mut().zip(&self.params.bones[j].0) {
                        *m = *m + w * b;
                    }
                }

                self.skin = m;
                return;
            }
            WeightsOutput::Raw => {
                let out = self.output(Attribute::Weights0);
                let len = count * size;
                self.dst[out..out + len].copy_from_slice(&self.src[offset..offset + len]);
                len
            }
            WeightsOutput::Float => {
                let out = self.output(Attribute::Weights0);
                for j in 0..count {
                    let w = weight(j);
                    put_f32(self.dst, out + 4 * j, w);
                }
                4 * count
            }
        };

        // pad the weight slots
        let layout = &self.plan.layout;
        let w0 = layout.get(Attribute::Weights0);
        let end = w0.range().end + layout.get(Attribute::Weights1).format.size() as usize;
        self.dst[w0.offset as usize + written..end].fill(0);
    }

    fn texcoord(&mut self, step: &TexCoordStep) {
        let format = step.format;
        let offset = self.plan.input.texcoord;
        let read = |src: &[u8], o: usize| unsigned_at(src, o, format);

        let uv: [f32; 2] = match step.mode {
            TexCoordMode::Through => {
                let raw: [f32; 2] = self.fetch(offset, format.size(), None, false, read);
                match format {
                    Unsigned::U8 => raw.map(|v| v * U8_SCALE),
                    Unsigned::U16 if step.double => raw.map(|v| v * 2.0),
                    _ => raw,
                }
            }
            TexCoordMode::Plain => self.fetch(
                offset,
                format.size(),
                format.scale(step.double),
                step.morph,
                read,
            ),
            TexCoordMode::Prescale => {
                let [u, v] = self.fetch(
                    offset,
                    format.size(),
                    format.scale(step.double),
                    step.morph,
                    read,
                );

                let scale = &self.params.uv;
                [
                    u * scale.u_scale + scale.u_offset,
                    v * scale.v_scale + scale.v_offset,
                ]
            }
        };

        let out = self.output(Attribute::TexCoord);
        put_f32(self.dst, out, uv[0]);
        put_f32(self.dst, out + 4, uv[1]);
    }

    fn blend_color(&self, offset: usize, source: ColorSource) -> [u8; 4] {
        if source == ColorSource::Invalid {
            return [0; 4];
        }

        let bits = source.channel_bits();
        let vertex_size = self.plan.input.vertex_size as usize;
        let target = |n: usize| {
            let w = self.params.morph_weights[n];
            let packed = packed_color(self.src, n * vertex_size + offset, source);
            let channels = channels(packed, source);
            std::array::from_fn::<f32, 4, _>(|c| match (bits[c], channels[c]) {
                (Some(bits), Some(value)) => {
                    let field = if bits == 1 {
                        (value * 0xFF) as f32
                    } else {
                        value as f32
                    };

                    (w * field) * ColorSource::morph_factor(bits)
                }
                _ => 0.0,
            })
        };

        let mut acc = target(0);
        for n in 1..self.plan.morph_count as usize {
            for (acc, value) in acc.iter_mut().zip(target(n)) {
                *acc = *acc + value;
            }
        }

        std::array::from_fn(|c| match bits[c] {
            Some(_) => (acc[c] as i32).clamp(0, 255) as u8,
            None => 0xFF,
        })
    }

    fn color(&mut self, step: &ColorStep) {
        let colors = [
            (step.color0, self.plan.input.color0, Attribute::Color0),
            (step.color1, self.plan.input.color1, Attribute::Color1),
        ];

        for (source, offset, attr) in colors {
            let Some(source) = source else {
                continue;
            };

            let offset = offset as usize;
            let rgba = if step.morph {
                self.blend_color(offset, source)
            } else {
                expand_color(packed_color(self.src, offset, source), source)
            };

            let out = self.output(attr);
            match step.output {
                ColorOutput::U8 => self.dst[out..out + 4].copy_from_slice(&rgba),
                ColorOutput::F32 => {
                    for (c, value) in rgba.into_iter().enumerate() {
                        put_f32(self.dst, out + 4 * c, value as f32 * COLOR_SCALE);
                    }
                }
            }
        }
    }

    fn normal(&mut self, step: &NormalStep) {
        let format = step.format;
        let offset = self.plan.input.normal;

        match step.output {
            NormalOutput::Raw => {
                let out = self.plan.layout.get(Attribute::Normal);
                let start = offset as usize;
                let len = 3 * format.size() as usize;
                let range = out.range();

                self.dst[range.start..range.start + len]
                    .copy_from_slice(&self.src[start..start + len]);
                self.dst[range.start + len..range.end].fill(0);
            }
            NormalOutput::Float => {
                let read = |src: &[u8], o: usize| signed_at(src, o, format);
                let mut normal =
                    self.fetch(offset, format.size(), format.scale(), step.morph, read);

                if step.skin {
                    normal = self.transform(normal, false);
                }

                self.put_vec3(Attribute::Normal, normal);
            }
        }
    }

    fn position(&mut self, step: &PositionStep) {
        let format = step.format;
        let offset = self.plan.input.position;

        let position = if step.through {
            // z is unsigned in through mode
            let o = offset as usize;
            let size = format.size() as usize;
            let z = match format {
                Signed::S8 => self.src[o + 2 * size] as f32,
                Signed::S16 => u16_at(self.src, o + 2 * size) as f32,
                Signed::F32 => f32_at(self.src, o + 2 * size),
            };

            [
                signed_at(self.src, o, format),
                signed_at(self.src, o + size, format),
                z,
            ]
        } else {
            let read = |src: &[u8], o: usize| signed_at(src, o, format);
            let position = self.fetch(offset, format.size(), format.scale(), step.morph, read);
            if step.skin {
                self.transform(position, true)
            } else {
                position
            }
        };

        self.put_vec3(Attribute::Position, position);
    }
}
