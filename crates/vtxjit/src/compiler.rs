use crate::{
    CODE_LIMIT, CodeGenerator, CompileCtx, CompileError, CompiledDecoder, JitCtx, JitError,
    builder::DecoderBuilder,
};
use cranelift::{
    codegen::{self, ir},
    frontend, native,
    prelude::{Configurable, isa::OwnedTargetIsa},
};
use easyerr::ResultExt;
use jitalloc::{Allocator, Exec};
use vtxdec::Plan;

/// A [`CodeGenerator`] emitting native code for the host through Cranelift.
pub struct CraneliftGenerator {
    isa: OwnedTargetIsa,
    allocator: Allocator<Exec>,
    code_ctx: codegen::Context,
    func_ctx: frontend::FunctionBuilderContext,
}

// SAFETY: the compilation contexts hold no references to thread-local data
unsafe impl Send for CraneliftGenerator {}

impl CraneliftGenerator {
    pub fn new() -> Result<Self, JitError> {
        let verifier = if cfg!(debug_assertions) {
            "true"
        } else {
            "false"
        };

        let mut codegen = codegen::settings::builder();
        let mut set = |name, value| codegen.set(name, value).context(JitCtx::Settings);
        set("preserve_frame_pointers", "true")?;
        set("use_colocated_libcalls", "false")?;
        set("stack_switch_model", "basic")?;
        set("unwind_info", "true")?;
        set("is_pic", "false")?;

        // affect runtime performance
        set("opt_level", "speed")?;
        set("enable_verifier", verifier)?;
        set("enable_alias_analysis", "true")?;
        set("regalloc_algorithm", "backtracking")?;
        set("regalloc_checker", "false")?;
        set("enable_pinned_reg", "false")?;
        set("enable_heap_access_spectre_mitigation", "false")?;
        set("enable_table_access_spectre_mitigation", "false")?;

        let isa_builder = native::builder().map_err(JitError::UnsupportedHost)?;
        let flags = codegen::settings::Flags::new(codegen);
        let isa = isa_builder.finish(flags).context(JitCtx::Codegen)?;

        Ok(Self {
            isa,
            allocator: Allocator::new(),
            code_ctx: codegen::Context::new(),
            func_ctx: frontend::FunctionBuilderContext::new(),
        })
    }

    fn decoder_signature(&self) -> ir::Signature {
        let ptr = self.isa.pointer_type();
        ir::Signature {
            // src, dst, count, params
            params: vec![
                ir::AbiParam::new(ptr),
                ir::AbiParam::new(ptr),
                ir::AbiParam::new(ir::types::I32),
                ir::AbiParam::new(ptr),
            ],
            returns: vec![],
            call_conv: self.isa.default_call_conv(),
        }
    }
}

impl CodeGenerator for CraneliftGenerator {
    fn compile(&mut self, plan: &Plan) -> Result<CompiledDecoder, CompileError> {
        if let Some(step) = plan.steps.iter().find(|step| step.is_morph_skin()) {
            return Err(CompileError::UnsupportedStep(*step));
        }

        let mut func = ir::Function::new();
        func.signature = self.decoder_signature();

        let func_builder = frontend::FunctionBuilder::new(&mut func, &mut self.func_ctx);
        let builder = DecoderBuilder::new(self.isa.pointer_type(), func_builder, plan);
        builder.build();

        tracing::trace!("{plan}\n{}", func.display());

        self.code_ctx.clear();
        self.code_ctx.func = func;
        let compiled = self
            .code_ctx
            .compile(&*self.isa, &mut Default::default())
            .map_err(|e| e.inner)
            .context(CompileCtx::Codegen)?;

        let code = compiled.code_buffer();
        if code.len() > CODE_LIMIT {
            return Err(CompileError::TooLarge {
                len: code.len(),
                limit: CODE_LIMIT,
            });
        }

        let alloc = self
            .allocator
            .allocate(64, code)
            .context(CompileCtx::Allocation)?;

        tracing::debug!(
            "compiled {:#010x} ({} steps) into {} bytes",
            plan.vertex_type.to_bits(),
            plan.steps.len(),
            alloc.len()
        );

        Ok(CompiledDecoder::new(alloc, plan.clone()))
    }

    unsafe fn reset(&mut self) {
        // SAFETY: the caller guarantees no compiled decoder is used afterwards
        unsafe { self.allocator.reset() };
    }
}
