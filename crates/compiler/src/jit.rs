//! JIT engine plumbing and the compiled program handle.
//!
//! The module registers every host maths shim up front so the generated
//! code's imports resolve during finalization, then hands the executable
//! `Entrypoint` address to the host wrapped in a [`CompiledProgram`].

use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::FuncId;

use crate::errors::CompilationError;
use crate::types::Precision;

/// Create an empty JIT module with the host shims registered.
pub(crate) fn create_module() -> Result<JITModule, CompilationError> {
    let mut builder = JITBuilder::new(cranelift_module::default_libcall_names())
        .map_err(|e| CompilationError::internal(format!("creating JIT module: {}", e)))?;
    for (name, address) in crate::builtins::shims() {
        builder.symbol(name, address);
    }
    Ok(JITModule::new(builder))
}

/// Finalize all defined functions and capture the entry address.
pub(crate) fn finish(
    mut module: JITModule,
    entry: FuncId,
    ir: String,
    signature: ProgramSignature,
) -> Result<CompiledProgram, CompilationError> {
    module
        .finalize_definitions()
        .map_err(|e| CompilationError::internal(format!("finalizing module: {}", e)))?;
    let entry = module.get_finalized_function(entry);
    Ok(CompiledProgram {
        module: Some(module),
        entry,
        ir,
        signature,
    })
}

/// Marshalled type of one entry parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// One real, by value on input and through a pointer on output.
    Real,
    /// N contiguous reals, always through a pointer.
    Vector(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub ty: ParamType,
}

/// The external calling convention of a compiled script:
/// `void Entrypoint(inputs..., outputs...)` with the C default ABI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSignature {
    pub inputs: Vec<Parameter>,
    pub outputs: Vec<Parameter>,
    pub precision: Precision,
}

/// A compiled script: owns the JIT code memory and exposes the entry point.
///
/// The entry has the signature declared when the script was compiled, with
/// each scalar input passed by value (`f32` or `f64` per the compiler's
/// precision), each vector input as a pointer to its flat element array, and
/// each output as a pointer the function stores through. Hosts transmute
/// [`entry_ptr`](Self::entry_ptr) to the matching `extern "C" fn` type:
///
/// ```ignore
/// let program = compiler.compile("(n: real) : (r: real)", "n * 2 + 1", &globals)?;
/// let f: extern "C" fn(f64, *mut f64) = unsafe { std::mem::transmute(program.entry_ptr()) };
/// ```
///
/// The compiled code is pure; it may be invoked concurrently as long as the
/// output buffers are distinct. Dropping the program frees the executable
/// memory, so the pointer must not outlive it.
pub struct CompiledProgram {
    module: Option<JITModule>,
    entry: *const u8,
    ir: String,
    signature: ProgramSignature,
}

impl CompiledProgram {
    /// Raw address of the `Entrypoint` function.
    ///
    /// Calling through it is unsafe; the caller must transmute to the exact
    /// signature described by [`signature`](Self::signature) and must not
    /// use the pointer after the program is dropped.
    pub fn entry_ptr(&self) -> *const u8 {
        self.entry
    }

    pub fn signature(&self) -> &ProgramSignature {
        &self.signature
    }

    /// The generated IR of every function in the module.
    pub fn ir(&self) -> &str {
        &self.ir
    }

    /// Print the generated IR to stderr.
    pub fn dump(&self) {
        eprintln!("{}", self.ir);
    }
}

impl Drop for CompiledProgram {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // Safety: this unmaps the code; entry_ptr's contract forbids
            // using the pointer past the program's lifetime.
            unsafe { module.free_memory() };
        }
    }
}

impl std::fmt::Debug for CompiledProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledProgram")
            .field("signature", &self.signature)
            .field("entry", &self.entry)
            .finish()
    }
}
