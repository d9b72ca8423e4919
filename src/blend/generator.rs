// This module is the kernel generator: it drives the code builder to emit the whole
// alpha-blend function and wraps the finished artifact in a typed API. The emitted
// function takes (dst, src, count) under the System V convention, blends count
// 4-byte RGBA pixels from src over dst in place, and returns nothing. Setup loads
// the two fixed-point constants from a 16-byte-aligned data pool appended after the
// body and zeroes the widening register; the loop phases come from the
// loop-splitting policy; the per-pixel math from the formula module. The prefix
// arithmetic assumes the 4-byte pixel stride throughout; a different stride would
// need a re-derived prefix count.

//! Alpha-blend kernel generation and the `BlendKernel` artifact.

use crate::blend::formula::{self, BlendConstants};
use crate::blend::loops::{self, LoopLabels};
use crate::core::error::BuildResult;
use crate::x64::builder::{CodeBuilder, ParamKind, Signature};

#[cfg(unix)]
use crate::core::session::BuildSession;
#[cfg(unix)]
use crate::x64::calling_convention::CallingConvention;
#[cfg(unix)]
use crate::x64::executable::Kernel;

/// Signature of the generated kernel.
///
/// Blends `count` pixels of `src` over `dst` in place. Both buffers must
/// hold at least `count * 4` bytes and must not overlap.
#[cfg(target_arch = "x86_64")]
pub type BlendFn = unsafe extern "sysv64" fn(dst: *mut u8, src: *const u8, count: usize);

/// Emit the complete alpha-blend function into the builder.
///
/// Phases: constant setup, alignment prefix, shared scalar loop, remaining
/// split, bulk quad loop, tail re-entry, exit. The data pool is registered
/// up front and lands after the body, 16-byte aligned.
pub fn emit_alpha_blend(b: &mut CodeBuilder) -> BuildResult<()> {
    let dst = b.new_gp("dst")?;
    let src = b.new_gp("src")?;
    let count = b.new_gp("count")?;
    let prefix = b.new_gp("prefix")?;
    let pool_ptr = b.new_gp("pool_ptr")?;

    let k = BlendConstants {
        zero: b.new_vec("vzero")?,
        bias: b.new_vec("vbias")?,
        div255: b.new_vec("vdiv255")?,
    };

    b.declare_function(Signature::void(&[
        ParamKind::Ptr,
        ParamKind::ConstPtr,
        ParamKind::Size,
    ]))?;
    b.bind_param(0, dst)?;
    b.bind_param(1, src)?;
    b.bind_param(2, count)?;
    let exit = b.exit_label()?;

    let labels = LoopLabels::new(b);
    let pool = b.emit_constant_block(&formula::pool_image(), 16)?;

    b.lea_label(pool_ptr, pool)?;
    b.xorps_reg_reg(k.zero, k.zero)?;
    b.movaps_load(k.bias, pool_ptr, 0)?;
    b.movaps_load(k.div255, pool_ptr, 16)?;

    loops::emit_prefix_count(b, dst, count, prefix, &labels)?;
    loops::emit_scalar_loop(b, dst, src, prefix, &k, &labels)?;
    loops::emit_remaining_split(b, count, prefix, exit, &labels)?;
    loops::emit_quad_loop(b, dst, src, count, &k, &labels)?;
    loops::emit_tail_reentry(b, prefix, &labels)?;

    b.end_function()
}

/// A compiled alpha-blend kernel.
#[cfg(unix)]
pub struct BlendKernel {
    kernel: Kernel,
}

#[cfg(unix)]
impl BlendKernel {
    /// Generate, assemble and map the kernel.
    pub fn compile(session: &BuildSession<'_>) -> BuildResult<Self> {
        let mut builder = CodeBuilder::new(session, CallingConvention::SystemV)?;
        emit_alpha_blend(&mut builder)?;
        let kernel = builder.finalize()?;
        log::debug!(
            "alpha-blend kernel ready: {} code bytes",
            kernel.code_bytes().len()
        );
        Ok(Self { kernel })
    }

    /// The underlying artifact (entry pointer, code bytes).
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }
}

#[cfg(all(unix, target_arch = "x86_64"))]
impl BlendKernel {
    /// The raw entry point.
    ///
    /// # Safety
    ///
    /// Callers must uphold the kernel contract: both buffers hold at least
    /// `count * 4` bytes and do not overlap.
    pub unsafe fn raw(&self) -> BlendFn {
        unsafe { std::mem::transmute(self.kernel.entry_ptr()) }
    }

    /// Blend `src` over `dst` in place.
    ///
    /// Both slices must be the same length and a multiple of 4 bytes.
    pub fn blend(&self, dst: &mut [u8], src: &[u8]) {
        assert_eq!(dst.len(), src.len(), "buffer lengths must match");
        assert_eq!(dst.len() % 4, 0, "buffers must hold whole pixels");
        let count = dst.len() / 4;
        // SAFETY: the slices cover count * 4 bytes and cannot overlap.
        unsafe { (self.raw())(dst.as_mut_ptr(), src.as_ptr(), count) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;

    #[cfg(unix)]
    #[test]
    fn test_compile_produces_code() {
        let arena = Bump::new();
        let session = BuildSession::new(&arena);
        let blend = BlendKernel::compile(&session).unwrap();

        assert!(!blend.kernel().code_bytes().is_empty());
        let stats = session.stats();
        assert_eq!(stats.kernels_finalized, 1);
        assert_eq!(stats.constant_bytes, 32);
        assert!(stats.instructions_encoded > 0);
    }

    #[cfg(all(unix, target_arch = "x86_64"))]
    #[test]
    fn test_blend_smoke() {
        use crate::blend::reference;

        let arena = Bump::new();
        let session = BuildSession::new(&arena);
        let blend = BlendKernel::compile(&session).unwrap();

        let src: Vec<u8> = (0..4 * 4).map(|i| (i * 37 + 11) as u8).collect();
        let mut dst: Vec<u8> = (0..4 * 4).map(|i| (i * 53 + 5) as u8).collect();
        let mut expected = dst.clone();

        blend.blend(&mut dst, &src);
        reference::blend_in_place(&mut expected, &src);
        assert_eq!(dst, expected);
    }
}
