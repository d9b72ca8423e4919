//! Virtual-register issue and physical assignment.
//!
//! This module implements the RegisterFile that backs the builder's
//! "ask for a register, get a name" interface. Virtual registers are
//! arena-style indices into a per-build table; each one is assigned a
//! physical register eagerly, first-free within its class bank. There is
//! no spilling: a kernel build that exceeds the volatile set is a hard
//! build error.

use crate::core::error::{BuildError, BuildResult};

/// Number of register banks (GP and 128-bit SIMD).
pub const REGISTER_BANKS: usize = 2;

/// Number of registers per bank on x86-64.
pub const REGISTERS_PER_BANK: usize = 16;

/// Type for register bank indices.
pub type RegBank = u8;

/// Type for register IDs within a bank.
pub type RegId = u8;

/// Register class a virtual register is issued from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegClass {
    /// Pointer-width general-purpose integer register.
    Gp,
    /// 128-bit SIMD register.
    Vec,
}

impl RegClass {
    /// Bank index backing this class.
    pub const fn bank(self) -> RegBank {
        match self {
            RegClass::Gp => 0,
            RegClass::Vec => 1,
        }
    }
}

/// Combined physical register identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AsmReg {
    pub bank: RegBank,
    pub id: RegId,
}

impl AsmReg {
    pub const fn new(bank: RegBank, id: RegId) -> Self {
        Self { bank, id }
    }

    pub const fn gp(id: RegId) -> Self {
        Self::new(RegClass::Gp.bank(), id)
    }

    pub const fn xmm(id: RegId) -> Self {
        Self::new(RegClass::Vec.bank(), id)
    }
}

/// Bit set for efficiently tracking register sets.
#[derive(Debug, Clone, Default)]
pub struct RegBitSet {
    banks: [u64; REGISTER_BANKS],
}

impl RegBitSet {
    /// Create empty register set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if register is set.
    pub fn contains(&self, reg: AsmReg) -> bool {
        if reg.bank as usize >= REGISTER_BANKS || reg.id as usize >= 64 {
            return false;
        }
        (self.banks[reg.bank as usize] & (1u64 << reg.id)) != 0
    }

    /// Set a register.
    pub fn set(&mut self, reg: AsmReg) {
        if (reg.bank as usize) < REGISTER_BANKS && (reg.id as usize) < 64 {
            self.banks[reg.bank as usize] |= 1u64 << reg.id;
        }
    }

    /// Clear a register.
    pub fn clear(&mut self, reg: AsmReg) {
        if (reg.bank as usize) < REGISTER_BANKS && (reg.id as usize) < 64 {
            self.banks[reg.bank as usize] &= !(1u64 << reg.id);
        }
    }

    /// Find the first register in `bank` that is set here but not in `exclude`.
    pub fn find_first_in_bank(&self, bank: RegBank, exclude: &RegBitSet) -> Option<RegId> {
        if bank as usize >= REGISTER_BANKS {
            return None;
        }
        let available = self.banks[bank as usize] & !exclude.banks[bank as usize];
        if available == 0 {
            return None;
        }
        Some(available.trailing_zeros() as RegId)
    }

    /// Count of set registers in the given bank.
    pub fn count_in_bank(&self, bank: RegBank) -> u32 {
        if bank as usize >= REGISTER_BANKS {
            return 0;
        }
        self.banks[bank as usize].count_ones()
    }
}

/// An abstract register name issued by the register file.
///
/// The index is an arena-style handle into the per-build slot table; the
/// physical assignment behind it is private to the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtReg {
    class: RegClass,
    index: u16,
}

impl VirtReg {
    pub fn class(&self) -> RegClass {
        self.class
    }

    pub fn index(&self) -> u16 {
        self.index
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot<'arena> {
    phys: AsmReg,
    name: &'arena str,
    live: bool,
}

/// RegisterFile manages virtual registers for a single kernel build.
///
/// Physical registers are handed out first-free within the allocatable set
/// for the class bank. Released registers return to the pool; their virtual
/// names stay in the table and resolving one is a `StaleRegister` error.
pub struct RegisterFile<'arena> {
    /// Registers available to this build (the convention's volatile set).
    allocatable: RegBitSet,
    /// Currently assigned registers.
    used: RegBitSet,
    /// Slot table indexed by virtual register index.
    slots: Vec<Slot<'arena>>,
}

impl<'arena> RegisterFile<'arena> {
    /// Create a register file drawing from the given allocatable set.
    pub fn new(allocatable: RegBitSet) -> Self {
        Self {
            allocatable,
            used: RegBitSet::new(),
            slots: Vec::new(),
        }
    }

    /// Issue a fresh virtual register of the given class.
    pub fn issue(&mut self, class: RegClass, name: &'arena str) -> BuildResult<VirtReg> {
        let id = self
            .allocatable
            .find_first_in_bank(class.bank(), &self.used)
            .ok_or(BuildError::RegisterExhausted { class })?;
        let phys = AsmReg::new(class.bank(), id);
        self.used.set(phys);
        let index = self.slots.len() as u16;
        self.slots.push(Slot {
            phys,
            name,
            live: true,
        });
        Ok(VirtReg { class, index })
    }

    /// Re-pin a live virtual register onto a specific physical register.
    ///
    /// Used for parameter binding, where the calling convention dictates the
    /// assignment. If another virtual register currently holds the target,
    /// the two swap physical registers.
    pub fn rebind(&mut self, reg: VirtReg, phys: AsmReg) -> BuildResult<()> {
        if phys.bank != reg.class.bank() {
            return Err(BuildError::WrongRegisterClass {
                expected: reg.class,
            });
        }
        let old = self.resolve(reg)?;
        if old == phys {
            return Ok(());
        }
        if let Some(holder) = self.holder_of(phys) {
            self.slots[holder].phys = old;
        } else {
            self.used.clear(old);
            self.used.set(phys);
        }
        self.slots[reg.index as usize].phys = phys;
        Ok(())
    }

    /// Resolve a virtual register to its physical assignment.
    pub fn resolve(&self, reg: VirtReg) -> BuildResult<AsmReg> {
        let slot = self
            .slots
            .get(reg.index as usize)
            .ok_or(BuildError::StaleRegister)?;
        if !slot.live {
            return Err(BuildError::StaleRegister);
        }
        Ok(slot.phys)
    }

    /// Release a virtual register, returning its physical register to the pool.
    pub fn release(&mut self, reg: VirtReg) -> BuildResult<()> {
        let slot = self
            .slots
            .get_mut(reg.index as usize)
            .ok_or(BuildError::StaleRegister)?;
        if !slot.live {
            return Err(BuildError::StaleRegister);
        }
        slot.live = false;
        let phys = slot.phys;
        self.used.clear(phys);
        Ok(())
    }

    /// Debug name the register was issued under.
    pub fn name(&self, reg: VirtReg) -> &'arena str {
        self.slots
            .get(reg.index as usize)
            .map(|s| s.name)
            .unwrap_or("?")
    }

    /// Number of live registers in the given class.
    pub fn live_count(&self, class: RegClass) -> u32 {
        self.used.count_in_bank(class.bank())
    }

    fn holder_of(&self, phys: AsmReg) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.live && s.phys == phys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volatile_gp_pair() -> RegBitSet {
        let mut set = RegBitSet::new();
        set.set(AsmReg::gp(0));
        set.set(AsmReg::gp(1));
        set
    }

    #[test]
    fn test_regbitset_operations() {
        let mut set = RegBitSet::new();
        let reg = AsmReg::new(0, 5);

        assert!(!set.contains(reg));
        set.set(reg);
        assert!(set.contains(reg));
        set.clear(reg);
        assert!(!set.contains(reg));
    }

    #[test]
    fn test_issue_assigns_distinct_registers() {
        let mut file = RegisterFile::new(volatile_gp_pair());
        let a = file.issue(RegClass::Gp, "a").unwrap();
        let b = file.issue(RegClass::Gp, "b").unwrap();

        assert_ne!(file.resolve(a).unwrap(), file.resolve(b).unwrap());
        assert_eq!(file.live_count(RegClass::Gp), 2);
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        let mut file = RegisterFile::new(volatile_gp_pair());
        file.issue(RegClass::Gp, "a").unwrap();
        file.issue(RegClass::Gp, "b").unwrap();

        match file.issue(RegClass::Gp, "c") {
            Err(BuildError::RegisterExhausted { class }) => assert_eq!(class, RegClass::Gp),
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn test_release_and_reissue() {
        let mut file = RegisterFile::new(volatile_gp_pair());
        let a = file.issue(RegClass::Gp, "a").unwrap();
        let phys = file.resolve(a).unwrap();
        file.release(a).unwrap();

        assert!(matches!(file.resolve(a), Err(BuildError::StaleRegister)));

        let b = file.issue(RegClass::Gp, "b").unwrap();
        assert_eq!(file.resolve(b).unwrap(), phys);
    }

    #[test]
    fn test_rebind_swaps_holders() {
        let mut file = RegisterFile::new(volatile_gp_pair());
        let a = file.issue(RegClass::Gp, "a").unwrap();
        let b = file.issue(RegClass::Gp, "b").unwrap();
        let phys_a = file.resolve(a).unwrap();
        let phys_b = file.resolve(b).unwrap();

        file.rebind(a, phys_b).unwrap();
        assert_eq!(file.resolve(a).unwrap(), phys_b);
        assert_eq!(file.resolve(b).unwrap(), phys_a);
    }

    #[test]
    fn test_rebind_rejects_wrong_bank() {
        let mut set = RegBitSet::new();
        set.set(AsmReg::gp(0));
        set.set(AsmReg::xmm(0));
        let mut file = RegisterFile::new(set);
        let v = file.issue(RegClass::Vec, "v").unwrap();

        assert!(file.rebind(v, AsmReg::gp(0)).is_err());
    }
}
