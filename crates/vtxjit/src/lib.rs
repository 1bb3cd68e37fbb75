//! Native code generation for vertex decoding pipelines.
//!
//! A [`CodeGenerator`] turns a [`Plan`] into a [`CompiledDecoder`], a native function decoding
//! vertices exactly like the interpreter in [`vtxdec::interp`]. [`JitDecoder`] compiles plans on
//! demand and falls back to the interpreter whenever a plan cannot be compiled.
mod builder;
mod compiler;

#[cfg(any(test, feature = "verify"))]
pub mod verify;

#[cfg(test)]
mod test;

use easyerr::Error;
use jitalloc::{Allocation, Exec};
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use vtxdec::{
    DecodeError, DecodeParams, IndexBounds, Options, Plan, Step, VertexDecoder, interp,
};

pub use compiler::CraneliftGenerator;

/// Largest function a generator accepts, in bytes.
pub const CODE_LIMIT: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("step {f0} has no native implementation")]
    UnsupportedStep(Step),
    #[error("no code generator for this host")]
    UnsupportedHost,
    #[error("generated code has {len} bytes, more than the limit of {limit}")]
    TooLarge { len: usize, limit: usize },
    #[error(transparent)]
    Codegen {
        source: cranelift::codegen::CodegenError,
    },
    #[error(transparent)]
    Allocation { source: std::io::Error },
}

/// Errors creating a code generator.
#[derive(Debug, Error)]
pub enum JitError {
    #[error("host machine is not supported: {f0}")]
    UnsupportedHost(&'static str),
    #[error(transparent)]
    Settings {
        source: cranelift::codegen::settings::SetError,
    },
    #[error(transparent)]
    Codegen {
        source: cranelift::codegen::CodegenError,
    },
}

/// Signature of a compiled decoder: source vertices, decoded vertices, vertex count and
/// parameters.
pub type DecoderFn = unsafe extern "C" fn(*const u8, *mut u8, u32, *const DecodeParams);

/// A native function decoding vertices according to a plan.
pub struct CompiledDecoder {
    code: Allocation<Exec>,
    plan: Plan,
}

impl CompiledDecoder {
    pub(crate) fn new(code: Allocation<Exec>, plan: Plan) -> Self {
        Self { code, plan }
    }

    /// The plan this decoder was compiled from.
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Length of the native code in bytes.
    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    /// Decodes the vertices in `bounds` from `verts` into `decoded`, with the same results as
    /// [`interp::decode`] for the plan of this decoder.
    pub fn decode(
        &self,
        params: &DecodeParams,
        verts: &[u8],
        decoded: &mut [u8],
        bounds: IndexBounds,
    ) -> Result<(), DecodeError> {
        interp::validate(&self.plan, verts.len(), decoded.len(), bounds)?;

        let start = bounds.lower as usize * self.plan.input.stride as usize;

        // SAFETY: the allocation holds a function with the `DecoderFn` signature and, as long as
        // this decoder exists, its generator has not been reset
        let func: DecoderFn = unsafe { std::mem::transmute(self.code.as_ptr().cast::<u8>()) };

        // SAFETY: buffers were validated to hold every vertex in bounds
        unsafe {
            func(
                verts[start..].as_ptr(),
                decoded.as_mut_ptr(),
                bounds.len() as u32,
                params,
            )
        };

        Ok(())
    }
}

/// Something that compiles plans to native code.
pub trait CodeGenerator: Send {
    /// Compiles a decoder for `plan`.
    fn compile(&mut self, plan: &Plan) -> Result<CompiledDecoder, CompileError>;

    /// Releases the code of every decoder compiled so far.
    ///
    /// # Safety
    /// No decoder compiled by this generator may be used after this call.
    unsafe fn reset(&mut self);
}

/// A code generator for hosts without a backend. Every compilation fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullGenerator;

impl CodeGenerator for NullGenerator {
    fn compile(&mut self, _: &Plan) -> Result<CompiledDecoder, CompileError> {
        Err(CompileError::UnsupportedHost)
    }

    unsafe fn reset(&mut self) {}
}

// other architectures need the instruction cache flushed after code is written
#[cfg(target_arch = "x86_64")]
pub type HostGenerator = CraneliftGenerator;

#[cfg(not(target_arch = "x86_64"))]
pub type HostGenerator = NullGenerator;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JitStats {
    /// Plans compiled to native code.
    pub compiled: u64,
    /// Plans that could not be compiled and are interpreted instead.
    pub unavailable: u64,
    /// Bytes of native code generated.
    pub code_bytes: u64,
}

/// A [`VertexDecoder`] which compiles plans on first use and interprets the ones it cannot
/// compile.
pub struct JitDecoder<G: CodeGenerator = HostGenerator> {
    generator: G,
    decoders: FxHashMap<(u32, Options), Option<CompiledDecoder>>,
    stats: JitStats,
}

impl<G: CodeGenerator> JitDecoder<G> {
    pub fn new(generator: G) -> Self {
        Self {
            generator,
            decoders: FxHashMap::default(),
            stats: JitStats::default(),
        }
    }

    pub fn stats(&self) -> JitStats {
        self.stats
    }

    /// Returns the compiled decoder for `plan`, compiling it if this is the first time it is
    /// seen. `None` if the plan cannot be compiled.
    pub fn get(&mut self, plan: &Plan) -> Option<&CompiledDecoder> {
        let key = (plan.vertex_type.to_bits(), plan.options);
        match self.decoders.entry(key) {
            Entry::Occupied(o) => o.into_mut().as_ref(),
            Entry::Vacant(v) => {
                let decoder = match self.generator.compile(plan) {
                    Ok(decoder) => {
                        self.stats.compiled += 1;
                        self.stats.code_bytes += decoder.code_len() as u64;
                        Some(decoder)
                    }
                    Err(e) => {
                        tracing::debug!("interpreting {:#010x}: {e}", key.0);
                        self.stats.unavailable += 1;
                        None
                    }
                };

                v.insert(decoder).as_ref()
            }
        }
    }

    /// Drops every compiled decoder and releases their code.
    pub fn reset(&mut self) {
        self.decoders.clear();
        self.stats = JitStats::default();

        // SAFETY: every decoder compiled by the generator has just been dropped
        unsafe { self.generator.reset() };
    }
}

impl JitDecoder<HostGenerator> {
    /// Creates a decoder with the code generator of this host.
    #[cfg(target_arch = "x86_64")]
    pub fn host() -> Result<Self, JitError> {
        Ok(Self::new(CraneliftGenerator::new()?))
    }

    /// Creates a decoder with the code generator of this host.
    #[cfg(not(target_arch = "x86_64"))]
    pub fn host() -> Result<Self, JitError> {
        Ok(Self::new(NullGenerator))
    }
}

impl<G: CodeGenerator> VertexDecoder for JitDecoder<G> {
    fn decode(
        &mut self,
        plan: &Plan,
        params: &DecodeParams,
        verts: &[u8],
        decoded: &mut [u8],
        bounds: IndexBounds,
    ) -> Result<(), DecodeError> {
        match self.get(plan) {
            Some(decoder) => decoder.decode(params, verts, decoded, bounds),
            None => interp::decode(plan, params, verts, decoded, bounds),
        }
    }
}
