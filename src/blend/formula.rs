// This module is the numeric core of the generated kernel: the SSE2 instruction
// sequences computing one or four blended pixels from unpacked byte channels,
// independent of the loop structure around them. Both variants share one contract
// per channel: widen the destination byte to a word, multiply by the complement of
// the source alpha (broadcast across the pixel's words by shuffle), add the 0x0080
// rounding bias with a saturating word add, take the high word of a multiply by
// 0x0101 (the fixed-point divide-by-255), add the widened source word, and narrow
// back to bytes with unsigned saturation. The quad variant runs the pipeline on the
// low and high halves of a 128-bit register with per-half weight shuffles, adds the
// widened source halves in the word domain, and repacks both halves at once.

//! SSE2 blend formula emission: single-pixel and quad-pixel variants.

use crate::core::error::BuildResult;
use crate::core::register_file::VirtReg;
use crate::x64::builder::CodeBuilder;

/// Rounding bias added before the fixed-point divide.
pub const ROUND_BIAS: u16 = 0x0080;

/// Multiplier whose high word approximates division by 255.
pub const DIV255: u16 = 0x0101;

/// Byte image of the kernel's constant pool: eight words of [`ROUND_BIAS`]
/// followed by eight words of [`DIV255`], 32 bytes total.
pub fn pool_image() -> [u8; 32] {
    let mut image = [0u8; 32];
    for lane in 0..8 {
        image[lane * 2..lane * 2 + 2].copy_from_slice(&ROUND_BIAS.to_le_bytes());
        image[16 + lane * 2..16 + lane * 2 + 2].copy_from_slice(&DIV255.to_le_bytes());
    }
    image
}

/// Pack a 4-lane shuffle selector into its immediate byte.
pub(crate) const fn shuf(a: u32, b: u32, c: u32, d: u32) -> u32 {
    (a << 6) | (b << 4) | (c << 2) | d
}

/// SIMD registers holding the loop-invariant constants.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlendConstants {
    /// All-zero register used for byte-to-word widening.
    pub zero: VirtReg,
    /// [`ROUND_BIAS`] broadcast across all words.
    pub bias: VirtReg,
    /// [`DIV255`] broadcast across all words.
    pub div255: VirtReg,
}

/// Emit the blend of one pixel: 32-bit load from both pointers, formula,
/// 32-bit store to the destination. Pointers are not advanced.
pub(crate) fn emit_blend_single(
    b: &mut CodeBuilder,
    dst: VirtReg,
    src: VirtReg,
    k: &BlendConstants,
) -> BuildResult<()> {
    let x0 = b.new_vec("x0")?;
    let y0 = b.new_vec("y0")?;
    let a0 = b.new_vec("a0")?;

    b.movd_load(y0, src)?;
    b.movd_load(x0, dst)?;

    // a0 = 255 - src bytes, then keep the alpha word and broadcast it
    b.pcmpeqb_reg_reg(a0, a0)?;
    b.pxor_reg_reg(a0, y0)?;
    b.psrlw_imm(a0, 8)?;
    b.punpcklbw_reg_reg(x0, k.zero)?;

    b.pshuflw_imm(a0, a0, shuf(1, 1, 1, 1))?;
    b.punpcklbw_reg_reg(y0, k.zero)?;

    b.pmullw_reg_reg(x0, a0)?;
    b.paddsw_reg_reg(x0, k.bias)?;
    b.pmulhuw_reg_reg(x0, k.div255)?;

    b.paddw_reg_reg(x0, y0)?;
    b.packuswb_reg_reg(x0, x0)?;

    b.movd_store(dst, x0)?;

    b.release(x0)?;
    b.release(y0)?;
    b.release(a0)?;
    Ok(())
}

/// Emit the blend of four pixels: unaligned 128-bit load from the source,
/// aligned load/store on the destination. Pointers are not advanced.
pub(crate) fn emit_blend_quad(
    b: &mut CodeBuilder,
    dst: VirtReg,
    src: VirtReg,
    k: &BlendConstants,
) -> BuildResult<()> {
    let x0 = b.new_vec("x0")?;
    let x1 = b.new_vec("x1")?;
    let y0 = b.new_vec("y0")?;
    let a0 = b.new_vec("a0")?;
    let a1 = b.new_vec("a1")?;

    b.movups_load(y0, src)?;
    b.movaps_load(x0, dst, 0)?;

    b.pcmpeqb_reg_reg(a0, a0)?;
    b.xorps_reg_reg(a0, y0)?;
    b.movaps_reg_reg(x1, x0)?;

    b.psrlw_imm(a0, 8)?;
    b.punpcklbw_reg_reg(x0, k.zero)?;

    b.movaps_reg_reg(a1, a0)?;
    b.punpcklwd_reg_reg(a0, a0)?;

    b.punpckhbw_reg_reg(x1, k.zero)?;
    b.punpckhwd_reg_reg(a1, a1)?;

    // spread each pixel's complemented alpha across its four words
    b.pshufd_imm(a0, a0, shuf(3, 3, 1, 1))?;
    b.pshufd_imm(a1, a1, shuf(3, 3, 1, 1))?;

    b.pmullw_reg_reg(x0, a0)?;
    b.pmullw_reg_reg(x1, a1)?;

    b.paddsw_reg_reg(x0, k.bias)?;
    b.paddsw_reg_reg(x1, k.bias)?;

    b.pmulhuw_reg_reg(x0, k.div255)?;
    b.pmulhuw_reg_reg(x1, k.div255)?;

    // add the widened source halves in the word domain so the narrowing
    // saturates exactly like the single-pixel path
    b.movaps_reg_reg(a0, y0)?;
    b.punpcklbw_reg_reg(a0, k.zero)?;
    b.paddw_reg_reg(x0, a0)?;
    b.punpckhbw_reg_reg(y0, k.zero)?;
    b.paddw_reg_reg(x1, y0)?;

    b.packuswb_reg_reg(x0, x1)?;
    b.movaps_store(dst, 0, x0)?;

    b.release(x0)?;
    b.release(x1)?;
    b.release(y0)?;
    b.release(a0)?;
    b.release(a1)?;
    Ok(())
}
