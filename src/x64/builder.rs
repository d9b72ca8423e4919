// This module provides the x86-64 code-builder engine using the iced-x86 library.
// CodeBuilder is the component kernel generators drive: it issues virtual registers
// backed by the RegisterFile, manages labels with bind-exactly-once semantics and
// forward references, frames a single void function under a calling convention,
// exposes typed emission methods for the integer and SSE2 instructions the blend
// kernel needs, and registers constant blocks that are appended after the function
// body. finalize() audits the label table, appends the constant data with alignment
// padding, assembles once at a probe base address, and copies the bytes into a fresh
// executable mapping at an offset chosen so every constant block honors its
// alignment. Only position-independent constructs are ever emitted (relative
// branches and RIP-relative lea), which is what makes the single-pass assemble and
// relocate-by-copy scheme valid.

//! x86-64 code building on top of iced-x86.
//!
//! The builder owns one function per build. Virtual registers resolve to
//! physical registers through the RegisterFile; labels may be referenced
//! before they are bound; constant blocks land after the body, aligned.

use crate::core::error::{BuildError, BuildResult};
use crate::core::register_file::{RegClass, RegisterFile, VirtReg};
use crate::core::session::BuildSession;
use crate::x64::calling_convention::CallingConvention;
#[cfg(unix)]
use crate::x64::executable::{ExecutableMemory, Kernel};
use bumpalo::collections::Vec as BumpVec;
use iced_x86::code_asm::{
    dword_ptr, qword_ptr, xmmword_ptr, AsmRegister64, AsmRegisterXmm, CodeAssembler, CodeLabel,
};
use iced_x86::{BlockEncoderOptions, IcedError};

/// Semantic type of one function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Mutable pointer argument.
    Ptr,
    /// Read-only pointer argument.
    ConstPtr,
    /// Unsigned pointer-width count.
    Size,
}

/// Ordered parameter list of a generated function.
///
/// Every function built here returns nothing; kernels communicate through
/// their pointer arguments.
#[derive(Debug, Clone)]
pub struct Signature {
    params: Vec<ParamKind>,
}

impl Signature {
    /// Signature of a void function with the given parameters.
    pub fn void(params: &[ParamKind]) -> Self {
        Self {
            params: params.to_vec(),
        }
    }

    pub fn params(&self) -> &[ParamKind] {
        &self.params
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

/// Branch conditions the builder can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpCondition {
    /// ZF set (`je`).
    Zero,
    /// ZF clear (`jne`).
    NotZero,
}

/// Handle to a control-flow target owned by one builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(u32);

struct LabelState {
    inner: CodeLabel,
    bound: bool,
    referenced: bool,
}

struct ConstBlock<'arena> {
    label: Label,
    bytes: &'arena [u8],
    align: usize,
}

struct FunctionState {
    signature: Signature,
    exit: Label,
    ended: bool,
}

/// Probe address builds are measured at; the final placement is chosen by
/// `finalize` and only has to match its 16-byte phase.
const PROBE_BASE: u64 = 0x1000;

const PAD_ZEROS: [u8; 16] = [0; 16];

/// The code-builder engine: virtual registers, labels, typed emission,
/// function framing, constant blocks, and finalization into a [`Kernel`].
pub struct CodeBuilder<'sess, 'arena> {
    session: &'sess BuildSession<'arena>,
    asm: CodeAssembler,
    regs: RegisterFile<'arena>,
    convention: CallingConvention,
    labels: Vec<LabelState>,
    constants: BumpVec<'arena, ConstBlock<'arena>>,
    function: Option<FunctionState>,
}

impl<'sess, 'arena> CodeBuilder<'sess, 'arena> {
    /// Create a builder drawing registers from the convention's volatile set.
    pub fn new(
        session: &'sess BuildSession<'arena>,
        convention: CallingConvention,
    ) -> BuildResult<Self> {
        let asm = CodeAssembler::new(64).map_err(asm_err)?;
        Ok(Self {
            session,
            asm,
            regs: RegisterFile::new(convention.volatile_regs()),
            convention,
            labels: Vec::new(),
            constants: BumpVec::new_in(session.arena()),
            function: None,
        })
    }

    // ==== REGISTERS ====

    /// Issue a pointer-width general-purpose virtual register.
    pub fn new_gp(&mut self, name: &str) -> BuildResult<VirtReg> {
        let name = self.session.intern_str(name);
        let reg = self.regs.issue(RegClass::Gp, name)?;
        self.session.count_register();
        Ok(reg)
    }

    /// Issue a 128-bit SIMD virtual register.
    pub fn new_vec(&mut self, name: &str) -> BuildResult<VirtReg> {
        let name = self.session.intern_str(name);
        let reg = self.regs.issue(RegClass::Vec, name)?;
        self.session.count_register();
        Ok(reg)
    }

    /// Release a virtual register back to the pool.
    pub fn release(&mut self, reg: VirtReg) -> BuildResult<()> {
        self.regs.release(reg)
    }

    /// Convert a virtual register to the iced 64-bit GP register.
    fn gp64(&self, reg: VirtReg) -> BuildResult<AsmRegister64> {
        use iced_x86::code_asm::*;

        if reg.class() != RegClass::Gp {
            return Err(BuildError::WrongRegisterClass {
                expected: RegClass::Gp,
            });
        }
        let phys = self.regs.resolve(reg)?;

        const GP64_REGS: [AsmRegister64; 16] = [
            rax, rcx, rdx, rbx, rsp, rbp, rsi, rdi, r8, r9, r10, r11, r12, r13, r14, r15,
        ];

        GP64_REGS
            .get(phys.id as usize)
            .copied()
            .ok_or(BuildError::StaleRegister)
    }

    /// Convert a virtual register to the iced XMM register.
    fn xmm(&self, reg: VirtReg) -> BuildResult<AsmRegisterXmm> {
        use iced_x86::code_asm::*;

        if reg.class() != RegClass::Vec {
            return Err(BuildError::WrongRegisterClass {
                expected: RegClass::Vec,
            });
        }
        let phys = self.regs.resolve(reg)?;

        const XMM_REGS: [AsmRegisterXmm; 16] = [
            xmm0, xmm1, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7, xmm8, xmm9, xmm10, xmm11, xmm12,
            xmm13, xmm14, xmm15,
        ];

        XMM_REGS
            .get(phys.id as usize)
            .copied()
            .ok_or(BuildError::StaleRegister)
    }

    // ==== LABELS ====

    /// Create a new, unbound label.
    pub fn new_label(&mut self) -> Label {
        let inner = self.asm.create_label();
        self.labels.push(LabelState {
            inner,
            bound: false,
            referenced: false,
        });
        self.session.count_label_created();
        Label(self.labels.len() as u32 - 1)
    }

    /// Bind a label to the current position. Each label binds exactly once.
    pub fn bind(&mut self, label: Label) -> BuildResult<()> {
        let state = self
            .labels
            .get_mut(label.0 as usize)
            .ok_or(BuildError::StaleLabel)?;
        if state.bound {
            return Err(BuildError::LabelRebound { index: label.0 });
        }
        let mut inner = state.inner;
        self.asm.set_label(&mut inner).map_err(asm_err)?;
        let state = &mut self.labels[label.0 as usize];
        state.inner = inner;
        state.bound = true;
        self.session.count_label_bound();
        Ok(())
    }

    /// Mark a label referenced and hand out the iced handle.
    fn label_ref(&mut self, label: Label) -> BuildResult<CodeLabel> {
        let state = self
            .labels
            .get_mut(label.0 as usize)
            .ok_or(BuildError::StaleLabel)?;
        state.referenced = true;
        Ok(state.inner)
    }

    // ==== FUNCTION FRAMING ====

    /// Declare the single function this builder emits.
    pub fn declare_function(&mut self, signature: Signature) -> BuildResult<()> {
        if self.function.is_some() {
            return Err(BuildError::FunctionRedeclared);
        }
        if signature.param_count() > self.convention.max_gp_params() {
            return Err(BuildError::InvalidParameter {
                index: signature.param_count(),
                reason: "more parameters than the convention passes in registers",
            });
        }
        let exit = self.new_label();
        log::trace!(
            "declare function with {} params under {:?}",
            signature.param_count(),
            self.convention
        );
        self.function = Some(FunctionState {
            signature,
            exit,
            ended: false,
        });
        Ok(())
    }

    /// Pin a virtual register onto the physical register carrying parameter
    /// `index`. Must happen before any instruction is emitted.
    pub fn bind_param(&mut self, index: usize, reg: VirtReg) -> BuildResult<()> {
        let function = self.function.as_ref().ok_or(BuildError::NoFunction)?;
        if index >= function.signature.param_count() {
            return Err(BuildError::InvalidParameter {
                index,
                reason: "index out of range for the declared signature",
            });
        }
        if reg.class() != RegClass::Gp {
            return Err(BuildError::InvalidParameter {
                index,
                reason: "pointer and size parameters need a GP register",
            });
        }
        if !self.asm.instructions().is_empty() {
            return Err(BuildError::InvalidParameter {
                index,
                reason: "parameters must be bound before code is emitted",
            });
        }
        let phys = self
            .convention
            .gp_param_reg(index)
            .ok_or(BuildError::InvalidParameter {
                index,
                reason: "convention passes this parameter on the stack",
            })?;
        self.regs.rebind(reg, phys)
    }

    /// The function's declared exit point.
    pub fn exit_label(&self) -> BuildResult<Label> {
        self.function
            .as_ref()
            .map(|f| f.exit)
            .ok_or(BuildError::NoFunction)
    }

    /// Bind the exit label and emit the return.
    pub fn end_function(&mut self) -> BuildResult<()> {
        let exit = self.exit_label()?;
        self.bind(exit)?;
        self.asm.ret().map_err(asm_err)?;
        if let Some(function) = self.function.as_mut() {
            function.ended = true;
        }
        Ok(())
    }

    // ==== CONSTANT DATA ====

    /// Register a constant block appended after the function body.
    ///
    /// The returned label resolves to the block's first byte; the block
    /// address will satisfy `align` (a power of two, at most one page).
    pub fn emit_constant_block(&mut self, bytes: &[u8], align: usize) -> BuildResult<Label> {
        if !align.is_power_of_two() || align > 4096 {
            return Err(BuildError::Assembly(format!(
                "unsupported constant alignment {align}"
            )));
        }
        let image = self.session.alloc_bytes(bytes);
        self.session.count_constant_bytes(image.len());
        let label = self.new_label();
        self.constants.push(ConstBlock {
            label,
            bytes: image,
            align,
        });
        Ok(label)
    }

    // ==== BRANCHES ====

    /// Unconditional jump.
    pub fn jmp(&mut self, target: Label) -> BuildResult<()> {
        let l = self.label_ref(target)?;
        self.asm.jmp(l).map_err(asm_err)
    }

    /// Conditional jump.
    pub fn jcc(&mut self, condition: JumpCondition, target: Label) -> BuildResult<()> {
        let l = self.label_ref(target)?;
        match condition {
            JumpCondition::Zero => self.asm.je(l),
            JumpCondition::NotZero => self.asm.jne(l),
        }
        .map_err(asm_err)
    }

    // ==== GP INSTRUCTIONS ====

    /// Emit MOV - register to register.
    pub fn mov_reg_reg(&mut self, dst: VirtReg, src: VirtReg) -> BuildResult<()> {
        let (d, s) = (self.gp64(dst)?, self.gp64(src)?);
        self.asm.mov(d, s).map_err(asm_err)
    }

    /// Emit XOR - register with register.
    pub fn xor_reg_reg(&mut self, dst: VirtReg, src: VirtReg) -> BuildResult<()> {
        let (d, s) = (self.gp64(dst)?, self.gp64(src)?);
        self.asm.xor(d, s).map_err(asm_err)
    }

    /// Emit SUB - register from register.
    pub fn sub_reg_reg(&mut self, dst: VirtReg, src: VirtReg) -> BuildResult<()> {
        let (d, s) = (self.gp64(dst)?, self.gp64(src)?);
        self.asm.sub(d, s).map_err(asm_err)
    }

    /// Emit ADD - immediate to register.
    pub fn add_reg_imm(&mut self, dst: VirtReg, imm: i32) -> BuildResult<()> {
        let d = self.gp64(dst)?;
        self.asm.add(d, imm).map_err(asm_err)
    }

    /// Emit AND - immediate with register.
    pub fn and_reg_imm(&mut self, dst: VirtReg, imm: i32) -> BuildResult<()> {
        let d = self.gp64(dst)?;
        self.asm.and(d, imm).map_err(asm_err)
    }

    /// Emit SHR - logical shift right by immediate.
    pub fn shr_reg_imm(&mut self, dst: VirtReg, imm: u32) -> BuildResult<()> {
        let d = self.gp64(dst)?;
        self.asm.shr(d, imm).map_err(asm_err)
    }

    /// Emit CMP - register against register.
    pub fn cmp_reg_reg(&mut self, left: VirtReg, right: VirtReg) -> BuildResult<()> {
        let (l, r) = (self.gp64(left)?, self.gp64(right)?);
        self.asm.cmp(l, r).map_err(asm_err)
    }

    /// Emit CMOVG - conditional move on greater (signed).
    pub fn cmovg_reg_reg(&mut self, dst: VirtReg, src: VirtReg) -> BuildResult<()> {
        let (d, s) = (self.gp64(dst)?, self.gp64(src)?);
        self.asm.cmovg(d, s).map_err(asm_err)
    }

    /// Emit TEST - register against register.
    pub fn test_reg_reg(&mut self, left: VirtReg, right: VirtReg) -> BuildResult<()> {
        let (l, r) = (self.gp64(left)?, self.gp64(right)?);
        self.asm.test(l, r).map_err(asm_err)
    }

    /// Emit DEC - decrement register.
    pub fn dec_reg(&mut self, dst: VirtReg) -> BuildResult<()> {
        let d = self.gp64(dst)?;
        self.asm.dec(d).map_err(asm_err)
    }

    /// Emit LEA of a label's address (RIP-relative).
    pub fn lea_label(&mut self, dst: VirtReg, target: Label) -> BuildResult<()> {
        let d = self.gp64(dst)?;
        let l = self.label_ref(target)?;
        self.asm.lea(d, qword_ptr(l)).map_err(asm_err)
    }

    // ==== SSE2 INSTRUCTIONS ====

    /// Emit MOVD - 32-bit load into the low lane.
    pub fn movd_load(&mut self, dst: VirtReg, base: VirtReg) -> BuildResult<()> {
        let (d, b) = (self.xmm(dst)?, self.gp64(base)?);
        self.asm.movd(d, dword_ptr(b)).map_err(asm_err)
    }

    /// Emit MOVD - 32-bit store from the low lane.
    pub fn movd_store(&mut self, base: VirtReg, src: VirtReg) -> BuildResult<()> {
        let (b, s) = (self.gp64(base)?, self.xmm(src)?);
        self.asm.movd(dword_ptr(b), s).map_err(asm_err)
    }

    /// Emit MOVAPS - register to register.
    pub fn movaps_reg_reg(&mut self, dst: VirtReg, src: VirtReg) -> BuildResult<()> {
        let (d, s) = (self.xmm(dst)?, self.xmm(src)?);
        self.asm.movaps(d, s).map_err(asm_err)
    }

    /// Emit MOVAPS - aligned 128-bit load.
    pub fn movaps_load(&mut self, dst: VirtReg, base: VirtReg, offset: i32) -> BuildResult<()> {
        let (d, b) = (self.xmm(dst)?, self.gp64(base)?);
        self.asm.movaps(d, xmmword_ptr(b + offset)).map_err(asm_err)
    }

    /// Emit MOVAPS - aligned 128-bit store.
    pub fn movaps_store(&mut self, base: VirtReg, offset: i32, src: VirtReg) -> BuildResult<()> {
        let (b, s) = (self.gp64(base)?, self.xmm(src)?);
        self.asm.movaps(xmmword_ptr(b + offset), s).map_err(asm_err)
    }

    /// Emit MOVUPS - unaligned 128-bit load.
    pub fn movups_load(&mut self, dst: VirtReg, base: VirtReg) -> BuildResult<()> {
        let (d, b) = (self.xmm(dst)?, self.gp64(base)?);
        self.asm.movups(d, xmmword_ptr(b)).map_err(asm_err)
    }

    /// Emit PCMPEQB - byte-wise equality, the all-ones idiom when dst == src.
    pub fn pcmpeqb_reg_reg(&mut self, dst: VirtReg, src: VirtReg) -> BuildResult<()> {
        let (d, s) = (self.xmm(dst)?, self.xmm(src)?);
        self.asm.pcmpeqb(d, s).map_err(asm_err)
    }

    /// Emit PXOR - bitwise xor.
    pub fn pxor_reg_reg(&mut self, dst: VirtReg, src: VirtReg) -> BuildResult<()> {
        let (d, s) = (self.xmm(dst)?, self.xmm(src)?);
        self.asm.pxor(d, s).map_err(asm_err)
    }

    /// Emit XORPS - bitwise xor in the float domain.
    pub fn xorps_reg_reg(&mut self, dst: VirtReg, src: VirtReg) -> BuildResult<()> {
        let (d, s) = (self.xmm(dst)?, self.xmm(src)?);
        self.asm.xorps(d, s).map_err(asm_err)
    }

    /// Emit PSRLW - word-wise logical shift right by immediate.
    pub fn psrlw_imm(&mut self, dst: VirtReg, imm: u32) -> BuildResult<()> {
        let d = self.xmm(dst)?;
        self.asm.psrlw(d, imm).map_err(asm_err)
    }

    /// Emit PUNPCKLBW - interleave low bytes.
    pub fn punpcklbw_reg_reg(&mut self, dst: VirtReg, src: VirtReg) -> BuildResult<()> {
        let (d, s) = (self.xmm(dst)?, self.xmm(src)?);
        self.asm.punpcklbw(d, s).map_err(asm_err)
    }

    /// Emit PUNPCKHBW - interleave high bytes.
    pub fn punpckhbw_reg_reg(&mut self, dst: VirtReg, src: VirtReg) -> BuildResult<()> {
        let (d, s) = (self.xmm(dst)?, self.xmm(src)?);
        self.asm.punpckhbw(d, s).map_err(asm_err)
    }

    /// Emit PUNPCKLWD - interleave low words.
    pub fn punpcklwd_reg_reg(&mut self, dst: VirtReg, src: VirtReg) -> BuildResult<()> {
        let (d, s) = (self.xmm(dst)?, self.xmm(src)?);
        self.asm.punpcklwd(d, s).map_err(asm_err)
    }

    /// Emit PUNPCKHWD - interleave high words.
    pub fn punpckhwd_reg_reg(&mut self, dst: VirtReg, src: VirtReg) -> BuildResult<()> {
        let (d, s) = (self.xmm(dst)?, self.xmm(src)?);
        self.asm.punpckhwd(d, s).map_err(asm_err)
    }

    /// Emit PSHUFLW - shuffle low words by immediate.
    pub fn pshuflw_imm(&mut self, dst: VirtReg, src: VirtReg, imm: u32) -> BuildResult<()> {
        let (d, s) = (self.xmm(dst)?, self.xmm(src)?);
        self.asm.pshuflw(d, s, imm).map_err(asm_err)
    }

    /// Emit PSHUFD - shuffle doublewords by immediate.
    pub fn pshufd_imm(&mut self, dst: VirtReg, src: VirtReg, imm: u32) -> BuildResult<()> {
        let (d, s) = (self.xmm(dst)?, self.xmm(src)?);
        self.asm.pshufd(d, s, imm).map_err(asm_err)
    }

    /// Emit PMULLW - word-wise multiply, low half.
    pub fn pmullw_reg_reg(&mut self, dst: VirtReg, src: VirtReg) -> BuildResult<()> {
        let (d, s) = (self.xmm(dst)?, self.xmm(src)?);
        self.asm.pmullw(d, s).map_err(asm_err)
    }

    /// Emit PADDSW - word-wise saturating signed add.
    pub fn paddsw_reg_reg(&mut self, dst: VirtReg, src: VirtReg) -> BuildResult<()> {
        let (d, s) = (self.xmm(dst)?, self.xmm(src)?);
        self.asm.paddsw(d, s).map_err(asm_err)
    }

    /// Emit PMULHUW - word-wise unsigned multiply, high half.
    pub fn pmulhuw_reg_reg(&mut self, dst: VirtReg, src: VirtReg) -> BuildResult<()> {
        let (d, s) = (self.xmm(dst)?, self.xmm(src)?);
        self.asm.pmulhuw(d, s).map_err(asm_err)
    }

    /// Emit PADDW - word-wise wrapping add.
    pub fn paddw_reg_reg(&mut self, dst: VirtReg, src: VirtReg) -> BuildResult<()> {
        let (d, s) = (self.xmm(dst)?, self.xmm(src)?);
        self.asm.paddw(d, s).map_err(asm_err)
    }

    /// Emit PACKUSWB - narrow words to bytes with unsigned saturation.
    pub fn packuswb_reg_reg(&mut self, dst: VirtReg, src: VirtReg) -> BuildResult<()> {
        let (d, s) = (self.xmm(dst)?, self.xmm(src)?);
        self.asm.packuswb(d, s).map_err(asm_err)
    }

    // ==== FINALIZATION ====

    /// Assemble the function and map it into executable memory.
    ///
    /// Fails if the function was never declared or closed, or if any
    /// referenced label is still unbound.
    #[cfg(unix)]
    pub fn finalize(mut self) -> BuildResult<Kernel> {
        let function = self.function.take().ok_or(BuildError::NoFunction)?;
        if !function.ended {
            return Err(BuildError::UnterminatedFunction);
        }

        let (first_const, max_align) = self.append_constants()?;

        for (index, state) in self.labels.iter().enumerate() {
            if state.referenced && !state.bound {
                return Err(BuildError::UnboundLabel {
                    index: index as u32,
                });
            }
        }

        let result = self
            .asm
            .assemble_options(PROBE_BASE, BlockEncoderOptions::RETURN_NEW_INSTRUCTION_OFFSETS)
            .map_err(asm_err)?;

        // Pick the copy offset so the first constant block (and, by the
        // size/alignment rule, every later one) lands aligned. The mapping
        // base is page-aligned, so only the offset's phase matters.
        let delta = match first_const {
            Some(label) => {
                let state = &self.labels[label.0 as usize];
                let pool_ip = result.label_ip(&state.inner).map_err(asm_err)?;
                let offset = (pool_ip - PROBE_BASE) as usize;
                (max_align - offset % max_align) % max_align
            }
            None => 0,
        };
        let code = result.inner.code_buffer;

        let mut memory = ExecutableMemory::map(delta + code.len())?;
        memory.write(delta, &code);
        memory.make_executable()?;

        self.session
            .count_finalized(self.asm.instructions().len(), code.len());
        log::debug!(
            "finalized kernel: {} bytes at entry offset {delta}, {} instructions",
            code.len(),
            self.asm.instructions().len()
        );

        Ok(Kernel::new(memory, delta, code.len()))
    }

    /// Append registered constant blocks after the body, padding between
    /// blocks so each keeps its alignment relative to the first.
    fn append_constants(&mut self) -> BuildResult<(Option<Label>, usize)> {
        if self.constants.is_empty() {
            return Ok((None, 1));
        }
        let blocks: Vec<(Label, &'arena [u8], usize)> = self
            .constants
            .iter()
            .map(|c| (c.label, c.bytes, c.align))
            .collect();
        let max_align = blocks.iter().map(|b| b.2).max().unwrap_or(1);
        let first = blocks[0].0;

        let mut cursor = 0usize;
        for (label, bytes, align) in blocks {
            let mut pad = (align - cursor % align) % align;
            cursor += pad;
            while pad > 0 {
                let chunk = pad.min(PAD_ZEROS.len());
                self.asm.db(&PAD_ZEROS[..chunk]).map_err(asm_err)?;
                pad -= chunk;
            }
            self.bind(label)?;
            self.asm.db(bytes).map_err(asm_err)?;
            cursor += bytes.len();
        }
        Ok((Some(first), max_align))
    }
}

fn asm_err(e: IcedError) -> BuildError {
    BuildError::Assembly(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::register_file::AsmReg;
    use bumpalo::Bump;

    fn session(arena: &Bump) -> BuildSession<'_> {
        BuildSession::new(arena)
    }

    #[test]
    fn test_label_rebound_is_an_error() {
        let arena = Bump::new();
        let session = session(&arena);
        let mut builder = CodeBuilder::new(&session, CallingConvention::SystemV).unwrap();

        let label = builder.new_label();
        builder.bind(label).unwrap();
        let r = builder.new_gp("r").unwrap();
        builder.dec_reg(r).unwrap();

        assert!(matches!(
            builder.bind(label),
            Err(BuildError::LabelRebound { .. })
        ));
    }

    #[test]
    fn test_param_binding_pins_convention_registers() {
        let arena = Bump::new();
        let session = session(&arena);
        let mut builder = CodeBuilder::new(&session, CallingConvention::SystemV).unwrap();

        let dst = builder.new_gp("dst").unwrap();
        let src = builder.new_gp("src").unwrap();
        let count = builder.new_gp("count").unwrap();
        builder
            .declare_function(Signature::void(&[
                ParamKind::Ptr,
                ParamKind::ConstPtr,
                ParamKind::Size,
            ]))
            .unwrap();
        builder.bind_param(0, dst).unwrap();
        builder.bind_param(1, src).unwrap();
        builder.bind_param(2, count).unwrap();

        assert_eq!(builder.regs.resolve(dst).unwrap(), AsmReg::gp(7)); // RDI
        assert_eq!(builder.regs.resolve(src).unwrap(), AsmReg::gp(6)); // RSI
        assert_eq!(builder.regs.resolve(count).unwrap(), AsmReg::gp(2)); // RDX
    }

    #[test]
    fn test_bind_param_after_code_is_rejected() {
        let arena = Bump::new();
        let session = session(&arena);
        let mut builder = CodeBuilder::new(&session, CallingConvention::SystemV).unwrap();

        let dst = builder.new_gp("dst").unwrap();
        builder
            .declare_function(Signature::void(&[ParamKind::Ptr]))
            .unwrap();
        builder.dec_reg(dst).unwrap();

        assert!(matches!(
            builder.bind_param(0, dst),
            Err(BuildError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_vec_register_rejected_as_parameter() {
        let arena = Bump::new();
        let session = session(&arena);
        let mut builder = CodeBuilder::new(&session, CallingConvention::SystemV).unwrap();

        let v = builder.new_vec("v").unwrap();
        builder
            .declare_function(Signature::void(&[ParamKind::Ptr]))
            .unwrap();

        assert!(matches!(
            builder.bind_param(0, v),
            Err(BuildError::InvalidParameter { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_unbound_label_fails_finalize() {
        let arena = Bump::new();
        let session = session(&arena);
        let mut builder = CodeBuilder::new(&session, CallingConvention::SystemV).unwrap();

        builder.declare_function(Signature::void(&[])).unwrap();
        let nowhere = builder.new_label();
        builder.jmp(nowhere).unwrap();
        builder.end_function().unwrap();

        assert!(matches!(
            builder.finalize(),
            Err(BuildError::UnboundLabel { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_unterminated_function_fails_finalize() {
        let arena = Bump::new();
        let session = session(&arena);
        let mut builder = CodeBuilder::new(&session, CallingConvention::SystemV).unwrap();

        builder.declare_function(Signature::void(&[])).unwrap();

        assert!(matches!(
            builder.finalize(),
            Err(BuildError::UnterminatedFunction)
        ));
    }

    #[cfg(all(unix, target_arch = "x86_64"))]
    #[test]
    fn test_constant_block_is_aligned_and_readable() {
        let arena = Bump::new();
        let session = session(&arena);
        let mut builder = CodeBuilder::new(&session, CallingConvention::SystemV).unwrap();

        // A function returning the pool address: lea rax, [pool]; ret.
        // The first issued GP register is RAX in the System V volatile set.
        let out = builder.new_gp("out").unwrap();
        builder.declare_function(Signature::void(&[])).unwrap();
        let pool = builder
            .emit_constant_block(&[0xAAu8; 16], 16)
            .unwrap();
        builder.lea_label(out, pool).unwrap();
        builder.end_function().unwrap();

        let kernel = builder.finalize().unwrap();
        let f: unsafe extern "sysv64" fn() -> usize =
            unsafe { std::mem::transmute(kernel.entry_ptr()) };
        let addr = unsafe { f() };

        assert_eq!(addr % 16, 0, "constant pool must be 16-byte aligned");
        let image = unsafe { std::slice::from_raw_parts(addr as *const u8, 16) };
        assert_eq!(image, &[0xAAu8; 16]);
    }
}
