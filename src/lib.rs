//! blendjit - Runtime synthesis of an SSE2 alpha-blend kernel.
//!
//! blendjit emits, at runtime, a native x86-64 function that composites
//! `count` RGBA pixels from a source buffer over a destination buffer in
//! place, using an alignment-aware three-phase loop (scalar prefix,
//! vectorized bulk, scalar remainder) around a fixed-point blend formula.
//! Construction goes through a code-builder abstraction: virtual registers,
//! labels with forward references, typed signatures, and a trailing
//! constant pool.
//!
//! # Primary Usage
//!
//! ```ignore
//! use blendjit::{BlendKernel, BuildSession};
//! use bumpalo::Bump;
//!
//! let arena = Bump::new();
//! let session = BuildSession::new(&arena);
//!
//! let kernel = BlendKernel::compile(&session)?;
//! kernel.blend(&mut dst, &src);
//! ```
//!
//! # Architecture
//!
//! - [`blend`] - kernel generator, blend formula, loop phases, reference
//! - [`core`] - shared infrastructure (session, registers, errors)
//! - [`x64`] - x86-64 specific code (builder, calling convention,
//!   executable memory)

pub mod blend;
pub mod core;
pub mod x64;

// Re-export common types from organized modules
pub use crate::core::{
    // Errors
    BuildError,
    BuildResult,
    // Session management
    BuildSession,
    BuildStats,
    // Register allocation
    AsmReg,
    RegBitSet,
    RegClass,
    RegisterFile,
    VirtReg,
};
pub use crate::x64::{CallingConvention, CodeBuilder, JumpCondition, Label, ParamKind, Signature};
#[cfg(unix)]
pub use crate::x64::Kernel;

pub use crate::blend::emit_alpha_blend;
#[cfg(target_arch = "x86_64")]
pub use crate::blend::BlendFn;
#[cfg(unix)]
pub use crate::blend::BlendKernel;
