//! The alpha-blend kernel: formula, loop phases, generator, reference.
//!
//! [`generator`] orchestrates everything; [`formula`] owns the per-pixel
//! SIMD math; the private `loops` module owns the prefix/bulk/remainder
//! structure; [`reference`] is the scalar oracle.

pub mod formula;
pub mod generator;
mod loops;
pub mod reference;

#[cfg(target_arch = "x86_64")]
pub use generator::BlendFn;
#[cfg(unix)]
pub use generator::BlendKernel;
pub use generator::emit_alpha_blend;
