mod step;

use cranelift::{
    codegen::ir::{self, condcodes::IntCC},
    frontend,
    prelude::InstBuilder,
};
use vtxdec::{
    DecodeParams, Plan, Step,
    step::{Signed, Unsigned},
};

const MEMFLAGS: ir::MemFlags = ir::MemFlags::new().with_notrap().with_can_move();
const MEMFLAGS_READONLY: ir::MemFlags = ir::MemFlags::new()
    .with_notrap()
    .with_can_move()
    .with_readonly();

/// Encoding of a value in an input vertex.
#[derive(Clone, Copy)]
enum Source {
    Unsigned(Unsigned),
    Signed(Signed),
}

impl Source {
    fn size(self) -> u8 {
        match self {
            Self::Unsigned(format) => format.size(),
            Self::Signed(format) => format.size(),
        }
    }
}

struct Consts {
    ptr_type: ir::Type,

    src_ptr: ir::Value,
    dst_ptr: ir::Value,
    params_ptr: ir::Value,
    count: ir::Value,

    /// Blend weight of each morph target.
    morph_weights: Vec<ir::Value>,
}

struct Vars {
    src_ptr: ir::Value,
    dst_ptr: ir::Value,
    skin: Option<[ir::Value; 12]>,
}

/// Builds a function decoding vertices according to a plan.
pub struct DecoderBuilder<'ctx> {
    bd: frontend::FunctionBuilder<'ctx>,
    plan: &'ctx Plan,
    consts: Consts,
    vars: Vars,
}

impl<'ctx> DecoderBuilder<'ctx> {
    pub fn new(
        ptr_type: ir::Type,
        mut bd: frontend::FunctionBuilder<'ctx>,
        plan: &'ctx Plan,
    ) -> Self {
        let entry_bb = bd.create_block();
        bd.append_block_params_for_function_params(entry_bb);
        bd.switch_to_block(entry_bb);
        bd.seal_block(entry_bb);

        let params = bd.block_params(entry_bb);
        let src_ptr = params[0];
        let dst_ptr = params[1];
        let count = params[2];
        let params_ptr = params[3];

        let consts = Consts {
            ptr_type,

            src_ptr,
            dst_ptr,
            params_ptr,
            count,

            morph_weights: Vec::new(),
        };

        let vars = Vars {
            src_ptr,
            dst_ptr,
            skin: None,
        };

        Self {
            bd,
            plan,
            consts,
            vars,
        }
    }

    fn load_param(&mut self, offset: usize) -> ir::Value {
        self.bd.ins().load(
            ir::types::F32,
            MEMFLAGS_READONLY,
            self.consts.params_ptr,
            offset as i32,
        )
    }

    /// Loads a value of the current input vertex and converts it to a float.
    fn load(&mut self, source: Source, offset: usize) -> ir::Value {
        let ptr = self.vars.src_ptr;
        let offset = offset as i32;

        let int = match source {
            Source::Unsigned(Unsigned::U8) => {
                self.bd
                    .ins()
                    .uload8(ir::types::I32, MEMFLAGS_READONLY, ptr, offset)
            }
            Source::Unsigned(Unsigned::U16) => {
                self.bd
                    .ins()
                    .uload16(ir::types::I32, MEMFLAGS_READONLY, ptr, offset)
            }
            Source::Signed(Signed::S8) => {
                self.bd
                    .ins()
                    .sload8(ir::types::I32, MEMFLAGS_READONLY, ptr, offset)
            }
            Source::Signed(Signed::S16) => {
                self.bd
                    .ins()
                    .sload16(ir::types::I32, MEMFLAGS_READONLY, ptr, offset)
            }
            Source::Unsigned(Unsigned::F32) | Source::Signed(Signed::F32) => {
                return self
                    .bd
                    .ins()
                    .load(ir::types::F32, MEMFLAGS_READONLY, ptr, offset);
            }
        };

        self.bd.ins().fcvt_from_sint(ir::types::F32, int)
    }

    fn scale(&mut self, value: ir::Value, scale: Option<f32>) -> ir::Value {
        match scale {
            Some(k) => {
                let k = self.bd.ins().f32const(k);
                self.bd.ins().fmul(value, k)
            }
            None => value,
        }
    }

    /// Reads `N` components of the first morph target, or blends them across every morph target
    /// if `morph` is set.
    fn fetch<const N: usize>(
        &mut self,
        source: Source,
        offset: u8,
        scale: Option<f32>,
        morph: bool,
    ) -> [ir::Value; N] {
        let offset = offset as usize;
        let size = source.size() as usize;

        if !morph {
            return std::array::from_fn(|c| {
                let value = self.load(source, offset + c * size);
                self.scale(value, scale)
            });
        }

        let vertex_size = self.plan.input.vertex_size as usize;
        let target = |this: &mut Self, n: usize| -> [ir::Value; N] {
            let weight = this.consts.morph_weights[n];
            let factor = this.scale(weight, scale);
            let base = n * vertex_size + offset;
            std::array::from_fn(|c| {
                let value = this.load(source, base + c * size);
                this.bd.ins().fmul(value, factor)
            })
        };

        let mut acc = target(self, 0);
        for n in 1..self.plan.morph_count as usize {
            let values = target(self, n);
            for (acc, value) in acc.iter_mut().zip(values) {
                *acc = self.bd.ins().fadd(*acc, value);
            }
        }

        acc
    }

    /// Multiplies `v` by the skin matrix.
    fn transform(&mut self, v: [ir::Value; 3], translate: bool) -> [ir::Value; 3] {
        let Some(m) = self.vars.skin else {
            return v;
        };

        std::array::from_fn(|i| {
            let a = self.bd.ins().fmul(v[0], m[i]);
            let b = self.bd.ins().fmul(v[1], m[3 + i]);
            let r = self.bd.ins().fadd(a, b);
            let c = self.bd.ins().fmul(v[2], m[6 + i]);
            let r = self.bd.ins().fadd(r, c);
            if translate {
                self.bd.ins().fadd(r, m[9 + i])
            } else {
                r
            }
        })
    }

    fn store_floats(&mut self, values: &[ir::Value], offset: u8) {
        for (c, value) in values.iter().enumerate() {
            self.bd.ins().store(
                MEMFLAGS,
                *value,
                self.vars.dst_ptr,
                offset as i32 + 4 * c as i32,
            );
        }
    }

    /// Zeroes the given byte range of the current decoded vertex.
    fn zero(&mut self, range: std::ops::Range<usize>) {
        let mut offset = range.start;
        for (ty, width) in [(ir::types::I32, 4), (ir::types::I16, 2), (ir::types::I8, 1)] {
            if range.end - offset < width {
                continue;
            }

            let zero = self.bd.ins().iconst(ty, 0);
            while range.end - offset >= width {
                self.bd
                    .ins()
                    .store(MEMFLAGS, zero, self.vars.dst_ptr, offset as i32);
                offset += width;
            }
        }
    }

    fn head(&mut self) {
        let base = std::mem::offset_of!(DecodeParams, morph_weights);
        if self.plan.morph_count > 1 {
            self.consts.morph_weights = (0..self.plan.morph_count as usize)
                .map(|n| self.load_param(base + 4 * n))
                .collect();
        }
    }

    fn body(&mut self) {
        self.vars.skin = None;
        for (i, step) in self.plan.steps.iter().enumerate() {
            self.bd.set_srcloc(ir::SourceLoc::new(i as u32));
            match step {
                Step::Weights(step) => self.weights(step),
                Step::TexCoord(step) => self.texcoord(step),
                Step::Color(step) => self.color(step),
                Step::Normal(step) => self.normal(step),
                Step::Position(step) => self.position(step),
                Step::Zero(attr) => {
                    let range = self.plan.layout.get(*attr).range();
                    self.zero(range);
                }
            }
        }

        self.bd.set_srcloc(ir::SourceLoc::default());
    }

    pub fn build(mut self) {
        // setup everything needed before the loop
        self.head();

        // setup the loop
        let iter_bb = self.bd.create_block();
        let body_bb = self.bd.create_block();
        let exit_bb = self.bd.create_block();

        self.bd.set_cold_block(exit_bb);
        self.bd.append_block_param(iter_bb, self.consts.ptr_type); // src ptr
        self.bd.append_block_param(iter_bb, self.consts.ptr_type); // dst ptr
        self.bd.append_block_param(iter_bb, ir::types::I32); // remaining

        self.bd.ins().jump(
            iter_bb,
            &[
                ir::BlockArg::Value(self.consts.src_ptr),
                ir::BlockArg::Value(self.consts.dst_ptr),
                ir::BlockArg::Value(self.consts.count),
            ],
        );

        // loop header: exit once every vertex has been decoded
        self.bd.switch_to_block(iter_bb);
        let params = self.bd.block_params(iter_bb);
        self.vars.src_ptr = params[0];
        self.vars.dst_ptr = params[1];
        let remaining = params[2];

        let loop_cond = self.bd.ins().icmp_imm(IntCC::NotEqual, remaining, 0);
        self.bd.ins().brif(loop_cond, body_bb, &[], exit_bb, &[]);

        self.bd.seal_block(body_bb);
        self.bd.seal_block(exit_bb);

        // decode a single vertex
        self.bd.switch_to_block(body_bb);
        self.body();

        // advance and start the next iteration
        let src_ptr = self
            .bd
            .ins()
            .iadd_imm(self.vars.src_ptr, self.plan.input.stride as i64);
        let dst_ptr = self
            .bd
            .ins()
            .iadd_imm(self.vars.dst_ptr, self.plan.layout.stride() as i64);
        let remaining = self.bd.ins().iadd_imm(remaining, -1);
        self.bd.ins().jump(
            iter_bb,
            &[
                ir::BlockArg::Value(src_ptr),
                ir::BlockArg::Value(dst_ptr),
                ir::BlockArg::Value(remaining),
            ],
        );

        self.bd.seal_block(iter_bb);

        // exit
        self.bd.switch_to_block(exit_bb);
        self.bd.ins().return_(&[]);
        self.bd.finalize();
    }
}
