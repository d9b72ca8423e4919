// This module captures the slice of the x86-64 calling conventions that a generated
// leaf kernel needs: which physical registers carry the first integer/pointer
// arguments, and which registers are volatile (caller-saved) and therefore usable
// without prologue spills. System V AMD64 passes GP arguments in RDI, RSI, RDX,
// RCX, R8, R9 and treats all XMM registers as volatile; Windows x64 passes them in
// RCX, RDX, R8, R9 and only XMM0-XMM5 are volatile. Stack arguments, return-value
// assignment and callee-saved frames are deliberately absent: every kernel built
// here is a void leaf function whose arguments fit in registers.

//! Calling-convention register assignments for x86-64.

use crate::core::register_file::{AsmReg, RegBitSet};

/// Calling convention a function is framed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
    /// System V AMD64 ABI (Linux, BSD, macOS).
    SystemV,
    /// Microsoft x64 ABI.
    Windows,
}

/// GP register ids, bank 0. Named for readability at the call sites.
pub mod gp {
    pub const RAX: u8 = 0;
    pub const RCX: u8 = 1;
    pub const RDX: u8 = 2;
    pub const RSI: u8 = 6;
    pub const RDI: u8 = 7;
    pub const R8: u8 = 8;
    pub const R9: u8 = 9;
    pub const R10: u8 = 10;
    pub const R11: u8 = 11;
}

const SYSV_GP_PARAMS: [u8; 6] = [gp::RDI, gp::RSI, gp::RDX, gp::RCX, gp::R8, gp::R9];
const WIN64_GP_PARAMS: [u8; 4] = [gp::RCX, gp::RDX, gp::R8, gp::R9];

const SYSV_VOLATILE_GP: [u8; 9] = [
    gp::RAX,
    gp::RCX,
    gp::RDX,
    gp::RSI,
    gp::RDI,
    gp::R8,
    gp::R9,
    gp::R10,
    gp::R11,
];
const WIN64_VOLATILE_GP: [u8; 7] =
    [gp::RAX, gp::RCX, gp::RDX, gp::R8, gp::R9, gp::R10, gp::R11];

impl CallingConvention {
    /// Physical register carrying GP argument `index`, if it fits.
    pub fn gp_param_reg(self, index: usize) -> Option<AsmReg> {
        let table: &[u8] = match self {
            CallingConvention::SystemV => &SYSV_GP_PARAMS,
            CallingConvention::Windows => &WIN64_GP_PARAMS,
        };
        table.get(index).map(|&id| AsmReg::gp(id))
    }

    /// How many GP arguments this convention passes in registers.
    pub fn max_gp_params(self) -> usize {
        match self {
            CallingConvention::SystemV => SYSV_GP_PARAMS.len(),
            CallingConvention::Windows => WIN64_GP_PARAMS.len(),
        }
    }

    /// Volatile registers a leaf function may use without saving.
    ///
    /// RSP and RBP are never included; neither are callee-saved registers,
    /// since generated kernels carry no prologue to preserve them.
    pub fn volatile_regs(self) -> RegBitSet {
        let mut set = RegBitSet::new();
        let gp_table: &[u8] = match self {
            CallingConvention::SystemV => &SYSV_VOLATILE_GP,
            CallingConvention::Windows => &WIN64_VOLATILE_GP,
        };
        for &id in gp_table {
            set.set(AsmReg::gp(id));
        }
        let xmm_count = match self {
            CallingConvention::SystemV => 16,
            CallingConvention::Windows => 6,
        };
        for id in 0..xmm_count {
            set.set(AsmReg::xmm(id));
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::register_file::RegClass;

    #[test]
    fn test_sysv_param_order() {
        let cc = CallingConvention::SystemV;
        assert_eq!(cc.gp_param_reg(0), Some(AsmReg::gp(gp::RDI)));
        assert_eq!(cc.gp_param_reg(1), Some(AsmReg::gp(gp::RSI)));
        assert_eq!(cc.gp_param_reg(2), Some(AsmReg::gp(gp::RDX)));
        assert_eq!(cc.gp_param_reg(6), None);
    }

    #[test]
    fn test_win64_param_order() {
        let cc = CallingConvention::Windows;
        assert_eq!(cc.gp_param_reg(0), Some(AsmReg::gp(gp::RCX)));
        assert_eq!(cc.gp_param_reg(3), Some(AsmReg::gp(gp::R9)));
        assert_eq!(cc.gp_param_reg(4), None);
    }

    #[test]
    fn test_volatile_sets_exclude_stack_registers() {
        for cc in [CallingConvention::SystemV, CallingConvention::Windows] {
            let set = cc.volatile_regs();
            assert!(!set.contains(AsmReg::gp(4))); // RSP
            assert!(!set.contains(AsmReg::gp(5))); // RBP
        }
    }

    #[test]
    fn test_volatile_xmm_counts() {
        assert_eq!(
            CallingConvention::SystemV
                .volatile_regs()
                .count_in_bank(RegClass::Vec.bank()),
            16
        );
        assert_eq!(
            CallingConvention::Windows
                .volatile_regs()
                .count_in_bank(RegClass::Vec.bank()),
            6
        );
    }
}
