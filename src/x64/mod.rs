//! x86-64 code-builder engine.
//!
//! - [`builder`] - CodeBuilder over iced-x86: registers, labels, typed
//!   emission, function framing, constant blocks, finalize
//! - [`calling_convention`] - argument registers and volatile sets
//! - [`executable`] - mmap-backed kernel memory (unix)

pub mod builder;
pub mod calling_convention;
#[cfg(unix)]
pub mod executable;

pub use builder::{CodeBuilder, JumpCondition, Label, ParamKind, Signature};
pub use calling_convention::CallingConvention;
#[cfg(unix)]
pub use executable::{ExecutableMemory, Kernel};
