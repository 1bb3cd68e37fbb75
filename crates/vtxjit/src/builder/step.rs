use super::{DecoderBuilder, MEMFLAGS, MEMFLAGS_READONLY, Source};
use cranelift::{
    codegen::ir::{self, condcodes::IntCC},
    prelude::InstBuilder,
};
use vtxdec::{
    Attribute, BoneMatrix, DecodeParams,
    step::{
        COLOR_SCALE, ColorOutput, ColorSource, ColorStep, NormalOutput, NormalStep, PositionStep,
        Signed, TexCoordMode, TexCoordStep, U8_SCALE, Unsigned, WeightsOutput, WeightsStep,
    },
};

impl DecoderBuilder<'_> {
    fn output(&self, attr: Attribute) -> u8 {
        self.plan.layout.get(attr).offset
    }

    /// Copies `len` integers of `width` bytes from the input vertex to the decoded one.
    fn copy(&mut self, ty: ir::Type, len: usize, from: usize, to: usize) {
        let width = ty.bytes() as usize;
        for i in 0..len {
            let value = self.bd.ins().load(
                ty,
                MEMFLAGS_READONLY,
                self.vars.src_ptr,
                (from + i * width) as i32,
            );
            self.bd
                .ins()
                .store(MEMFLAGS, value, self.vars.dst_ptr, (to + i * width) as i32);
        }
    }

    pub(super) fn weights(&mut self, step: &WeightsStep) {
        let offset = self.plan.input.weights as usize;
        let size = step.format.size() as usize;
        let count = step.count as usize;
        let source = Source::Unsigned(step.format);
        let scale = step.format.scale(false);

        let out = self.output(Attribute::Weights0) as usize;
        let written = match step.output {
            WeightsOutput::Skin => {
                let bones = std::mem::offset_of!(DecodeParams, bones);
                let mut skin: Option<[ir::Value; 12]> = None;
                for j in 0..count {
                    let w = self.load(source, offset + j * size);
                    let w = self.scale(w, scale);
                    let bone: [ir::Value; 12] = std::array::from_fn(|i| {
                        let b =
                            self.load_param(bones + j * size_of::<BoneMatrix>() + 4 * i);
                        self.bd.ins().fmul(w, b)
                    });

                    skin = Some(match skin {
                        None => bone,
                        Some(m) => std::array::from_fn(|i| self.bd.ins().fadd(m[i], bone[i])),
                    });
                }

                self.vars.skin = skin;
                return;
            }
            WeightsOutput::Raw => {
                let ty = match step.format {
                    Unsigned::U8 => ir::types::I8,
                    Unsigned::U16 => ir::types::I16,
                    Unsigned::F32 => ir::types::I32,
                };

                self.copy(ty, count, offset, out);
                count * size
            }
            WeightsOutput::Float => {
                let weights: Vec<_> = (0..count)
                    .map(|j| {
                        let w = self.load(source, offset + j * size);
                        self.scale(w, scale)
                    })
                    .collect();

                self.store_floats(&weights, out as u8);
                4 * count
            }
        };

        // pad the weight slots
        let layout = &self.plan.layout;
        let w0 = layout.get(Attribute::Weights0);
        let end = w0.range().end + layout.get(Attribute::Weights1).format.size() as usize;
        self.zero(out + written..end);
    }

    pub(super) fn texcoord(&mut self, step: &TexCoordStep) {
        let format = step.format;
        let source = Source::Unsigned(format);
        let offset = self.plan.input.texcoord;

        let uv: [ir::Value; 2] = match step.mode {
            TexCoordMode::Through => {
                let raw: [ir::Value; 2] = self.fetch(source, offset, None, false);
                match format {
                    Unsigned::U8 => raw.map(|v| self.scale(v, Some(U8_SCALE))),
                    Unsigned::U16 if step.double => raw.map(|v| self.scale(v, Some(2.0))),
                    _ => raw,
                }
            }
            TexCoordMode::Plain => self.fetch(source, offset, format.scale(step.double), step.morph),
            TexCoordMode::Prescale => {
                let [u, v] = self.fetch(source, offset, format.scale(step.double), step.morph);

                let base = std::mem::offset_of!(DecodeParams, uv);
                let mut prescale = |value, scale, offset| {
                    let scale = self.load_param(base + scale);
                    let offset = self.load_param(base + offset);
                    let value = self.bd.ins().fmul(value, scale);
                    self.bd.ins().fadd(value, offset)
                };

                [
                    prescale(
                        u,
                        std::mem::offset_of!(vtxdec::UvScale, u_scale),
                        std::mem::offset_of!(vtxdec::UvScale, u_offset),
                    ),
                    prescale(
                        v,
                        std::mem::offset_of!(vtxdec::UvScale, v_scale),
                        std::mem::offset_of!(vtxdec::UvScale, v_offset),
                    ),
                ]
            }
        };

        let out = self.output(Attribute::TexCoord);
        self.store_floats(&uv, out);
    }

    /// Loads the packed color at `offset` of the input vertex.
    fn packed_color(&mut self, offset: usize, source: ColorSource) -> ir::Value {
        let ptr = self.vars.src_ptr;
        match source {
            ColorSource::Rgba8888 => {
                self.bd
                    .ins()
                    .load(ir::types::I32, MEMFLAGS_READONLY, ptr, offset as i32)
            }
            _ => self
                .bd
                .ins()
                .uload16(ir::types::I32, MEMFLAGS_READONLY, ptr, offset as i32),
        }
    }

    /// Splits a packed color into its channels, paired with their bit widths.
    fn channels(
        &mut self,
        packed: ir::Value,
        source: ColorSource,
    ) -> [Option<(u32, ir::Value)>; 4] {
        let mut shift = 0;
        let mut out = [None; 4];
        for (out, bits) in out.iter_mut().zip(source.channel_bits()) {
            let Some(bits) = bits else {
                continue;
            };

            let value = if shift == 0 {
                packed
            } else {
                self.bd.ins().ushr_imm(packed, shift as i64)
            };

            let value = self.bd.ins().band_imm(value, ((1 << bits) - 1) as i64);
            *out = Some((bits, value));
            shift += bits;
        }

        out
    }

    /// Expands a channel of the given width to 8 bits.
    fn expand_channel(&mut self, bits: u32, value: ir::Value) -> ir::Value {
        let (left, right) = match bits {
            1 => return self.bd.ins().imul_imm(value, 0xFF),
            4 => (4, 0),
            5 => (3, 2),
            6 => (2, 4),
            _ => return value,
        };

        let high = self.bd.ins().ishl_imm(value, left);
        let low = if right == 0 {
            value
        } else {
            self.bd.ins().ushr_imm(value, right)
        };

        self.bd.ins().bor(high, low)
    }

    /// Decodes a color to four integer channels in the 0..=255 range.
    fn expand_color(&mut self, offset: usize, source: ColorSource) -> [ir::Value; 4] {
        let packed = self.packed_color(offset, source);
        let channels = self.channels(packed, source);
        channels.map(|channel| match channel {
            Some((bits, value)) => self.expand_channel(bits, value),
            None => self.bd.ins().iconst(ir::types::I32, 0xFF),
        })
    }

    /// Blends a color across every morph target into four integer channels in the 0..=255
    /// range.
    fn blend_color(&mut self, offset: usize, source: ColorSource) -> [ir::Value; 4] {
        let vertex_size = self.plan.input.vertex_size as usize;
        let mut acc: [Option<ir::Value>; 4] = [None; 4];

        for n in 0..self.plan.morph_count as usize {
            let w = self.consts.morph_weights[n];
            let packed = self.packed_color(n * vertex_size + offset, source);
            let channels = self.channels(packed, source);

            for (acc, channel) in acc.iter_mut().zip(channels) {
                let Some((bits, value)) = channel else {
                    continue;
                };

                let field = if bits == 1 {
                    self.bd.ins().imul_imm(value, 0xFF)
                } else {
                    value
                };

                let field = self.bd.ins().fcvt_from_sint(ir::types::F32, field);
                let term = self.bd.ins().fmul(w, field);
                let factor = self.bd.ins().f32const(ColorSource::morph_factor(bits));
                let term = self.bd.ins().fmul(term, factor);

                *acc = Some(match *acc {
                    None => term,
                    Some(acc) => self.bd.ins().fadd(acc, term),
                });
            }
        }

        acc.map(|acc| match acc {
            Some(acc) => {
                let value = self.bd.ins().fcvt_to_sint_sat(ir::types::I32, acc);
                let zero = self.bd.ins().iconst(ir::types::I32, 0);
                let max = self.bd.ins().iconst(ir::types::I32, 0xFF);

                let negative = self.bd.ins().icmp_imm(IntCC::SignedLessThan, value, 0);
                let value = self.bd.ins().select(negative, zero, value);
                let overflow = self.bd.ins().icmp_imm(IntCC::SignedGreaterThan, value, 0xFF);
                self.bd.ins().select(overflow, max, value)
            }
            None => self.bd.ins().iconst(ir::types::I32, 0xFF),
        })
    }

    pub(super) fn color(&mut self, step: &ColorStep) {
        let colors = [
            (step.color0, self.plan.input.color0, Attribute::Color0),
            (step.color1, self.plan.input.color1, Attribute::Color1),
        ];

        for (source, offset, attr) in colors {
            let Some(source) = source else {
                continue;
            };

            if source == ColorSource::Invalid {
                let range = self.plan.layout.get(attr).range();
                self.zero(range);
                continue;
            }

            let offset = offset as usize;
            let rgba = if step.morph {
                self.blend_color(offset, source)
            } else {
                self.expand_color(offset, source)
            };

            let out = self.output(attr);
            match step.output {
                ColorOutput::U8 => {
                    for (c, value) in rgba.into_iter().enumerate() {
                        self.bd.ins().istore8(
                            MEMFLAGS,
                            value,
                            self.vars.dst_ptr,
                            out as i32 + c as i32,
                        );
                    }
                }
                ColorOutput::F32 => {
                    let rgba = rgba.map(|value| {
                        let value = self.bd.ins().fcvt_from_sint(ir::types::F32, value);
                        self.scale(value, Some(COLOR_SCALE))
                    });

                    self.store_floats(&rgba, out);
                }
            }
        }
    }

    pub(super) fn normal(&mut self, step: &NormalStep) {
        let format = step.format;
        let offset = self.plan.input.normal;

        match step.output {
            NormalOutput::Raw => {
                let range = self.plan.layout.get(Attribute::Normal).range();
                let ty = match format {
                    Signed::S8 => ir::types::I8,
                    Signed::S16 => ir::types::I16,
                    Signed::F32 => ir::types::I32,
                };

                self.copy(ty, 3, offset as usize, range.start);
                let written = 3 * format.size() as usize;
                self.zero(range.start + written..range.end);
            }
            NormalOutput::Float => {
                let mut normal =
                    self.fetch(Source::Signed(format), offset, format.scale(), step.morph);

                if step.skin {
                    normal = self.transform(normal, false);
                }

                let out = self.output(Attribute::Normal);
                self.store_floats(&normal, out);
            }
        }
    }

    pub(super) fn position(&mut self, step: &PositionStep) {
        let format = step.format;
        let offset = self.plan.input.position;

        let position = if step.through {
            // z is unsigned in through mode
            let o = offset as usize;
            let size = format.size() as usize;
            let z = match format {
                Signed::S8 => Source::Unsigned(Unsigned::U8),
                Signed::S16 => Source::Unsigned(Unsigned::U16),
                Signed::F32 => Source::Signed(Signed::F32),
            };

            [
                self.load(Source::Signed(format), o),
                self.load(Source::Signed(format), o + size),
                self.load(z, o + 2 * size),
            ]
        } else {
            let position =
                self.fetch(Source::Signed(format), offset, format.scale(), step.morph);
            if step.skin {
                self.transform(position, true)
            } else {
                position
            }
        };

        let out = self.output(Attribute::Position);
        self.store_floats(&position, out);
    }
}
