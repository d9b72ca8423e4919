// This module is the loop-splitting policy: how many pixels run through the scalar
// path versus the vectorized path, and how control flows between the phases. The
// prefix phase counts the leading pixels needed to 16-align the destination pointer
// (((0 - dst) & 15) >> 2, clamped to the pixel count); the remaining count is split
// into quads and a tail; the scalar loop body is emitted once and entered from two
// places, before alignment and after the bulk loop, driven purely by whatever
// counter value is live at the jump. The fall-through out of the scalar loop lands
// on the remaining-count check, whose count==0 exit covers the second entry.

//! Loop phases of the generated kernel.
//!
//! State machine: Prefix -> CheckRemaining -> Bulk -> CheckTail ->
//! ScalarShared -> Exit, with ScalarShared also entered directly from
//! Prefix and looping on its own counter.

use crate::blend::formula::{self, BlendConstants};
use crate::core::error::BuildResult;
use crate::core::register_file::VirtReg;
use crate::x64::builder::{CodeBuilder, JumpCondition, Label};

/// Labels shared by the loop phases.
pub(crate) struct LoopLabels {
    /// Head of the shared scalar loop (two incoming edges).
    pub scalar_head: Label,
    /// Fall-through past the scalar loop.
    pub scalar_done: Label,
    /// Head of the bulk quad loop.
    pub quad_head: Label,
    /// Fall-through past the bulk loop.
    pub quad_done: Label,
}

impl LoopLabels {
    pub fn new(b: &mut CodeBuilder) -> Self {
        Self {
            scalar_head: b.new_label(),
            scalar_done: b.new_label(),
            quad_head: b.new_label(),
            quad_done: b.new_label(),
        }
    }
}

/// Phase A: compute the alignment prefix count.
///
/// `prefix = ((0 - dst) & 15) >> 2` is the number of leading pixels that
/// bring a 4-byte-stride destination to a 16-byte boundary, clamped to the
/// pixels available and deducted from `count`. The zero check runs again
/// after the clamp: an unaligned destination with zero pixels must skip the
/// scalar loop too.
pub(crate) fn emit_prefix_count(
    b: &mut CodeBuilder,
    dst: VirtReg,
    count: VirtReg,
    prefix: VirtReg,
    labels: &LoopLabels,
) -> BuildResult<()> {
    b.xor_reg_reg(prefix, prefix)?;
    b.sub_reg_reg(prefix, dst)?;
    b.and_reg_imm(prefix, 15)?;
    b.shr_reg_imm(prefix, 2)?;
    b.jcc(JumpCondition::Zero, labels.scalar_done)?;

    b.cmp_reg_reg(prefix, count)?;
    b.cmovg_reg_reg(prefix, count)?; // prefix = min(prefix, count)
    b.sub_reg_reg(count, prefix)?;

    b.test_reg_reg(prefix, prefix)?;
    b.jcc(JumpCondition::Zero, labels.scalar_done)?;
    Ok(())
}

/// The shared scalar loop: one pixel per iteration, `prefix` iterations.
///
/// Entered either by falling in from the prefix phase or by the tail jump
/// after the bulk loop.
pub(crate) fn emit_scalar_loop(
    b: &mut CodeBuilder,
    dst: VirtReg,
    src: VirtReg,
    prefix: VirtReg,
    k: &BlendConstants,
    labels: &LoopLabels,
) -> BuildResult<()> {
    log::trace!("emit scalar loop");
    b.bind(labels.scalar_head)?;
    formula::emit_blend_single(b, dst, src, k)?;

    b.add_reg_imm(dst, 4)?;
    b.add_reg_imm(src, 4)?;

    b.dec_reg(prefix)?;
    b.jcc(JumpCondition::NotZero, labels.scalar_head)?;

    b.bind(labels.scalar_done)?;
    Ok(())
}

/// CheckRemaining: route an empty buffer straight to the exit, else split
/// `count` into `count = quads` and `prefix = tail`.
pub(crate) fn emit_remaining_split(
    b: &mut CodeBuilder,
    count: VirtReg,
    prefix: VirtReg,
    exit: Label,
    labels: &LoopLabels,
) -> BuildResult<()> {
    b.test_reg_reg(count, count)?;
    b.mov_reg_reg(prefix, count)?;
    b.jcc(JumpCondition::Zero, exit)?;

    b.and_reg_imm(prefix, 3)?;
    b.shr_reg_imm(count, 2)?;
    b.jcc(JumpCondition::Zero, labels.quad_done)?;
    Ok(())
}

/// Phase B: the bulk loop, four pixels per iteration, `count` iterations.
pub(crate) fn emit_quad_loop(
    b: &mut CodeBuilder,
    dst: VirtReg,
    src: VirtReg,
    count: VirtReg,
    k: &BlendConstants,
    labels: &LoopLabels,
) -> BuildResult<()> {
    log::trace!("emit quad loop");
    b.bind(labels.quad_head)?;
    formula::emit_blend_quad(b, dst, src, k)?;

    b.add_reg_imm(src, 16)?;
    b.add_reg_imm(dst, 16)?;

    b.dec_reg(count)?;
    b.jcc(JumpCondition::NotZero, labels.quad_head)?;

    b.bind(labels.quad_done)?;
    Ok(())
}

/// CheckTail: re-enter the shared scalar loop for the last 1-3 pixels.
///
/// The scalar loop falls through to the remaining-count check, which sees
/// zero and exits.
pub(crate) fn emit_tail_reentry(
    b: &mut CodeBuilder,
    prefix: VirtReg,
    labels: &LoopLabels,
) -> BuildResult<()> {
    b.test_reg_reg(prefix, prefix)?;
    b.jcc(JumpCondition::NotZero, labels.scalar_head)?;
    Ok(())
}
