// This module provides arena-based build session management using the bumpalo crate
// to simplify lifetime management during kernel construction. BuildSession is the hub
// that owns a reference to the arena allocator and tracks build-wide state with a
// unified lifetime: interned register names, arena-allocated constant-block images,
// and build statistics. BuildStats records how much work a build performed (registers
// issued, labels created and bound, constant bytes registered, instructions encoded,
// code bytes mapped), which the CLI surfaces and tests assert against. Each kernel
// build borrows one session; concurrent builds must not share one, matching the
// single-owner label/register namespace rule.

//! Arena-based build session management.
//!
//! All per-build objects (register names, constant images) are allocated in
//! the session arena and share its lifetime, eliminating complex lifetime
//! propagation through the builder.

use bumpalo::Bump;
use std::cell::RefCell;
use std::collections::HashMap;

/// Statistics gathered over the lifetime of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Virtual registers issued.
    pub registers_issued: u32,
    /// Labels created.
    pub labels_created: u32,
    /// Labels bound to a position.
    pub labels_bound: u32,
    /// Bytes of constant data registered.
    pub constant_bytes: u32,
    /// Instructions encoded across finalized kernels.
    pub instructions_encoded: u32,
    /// Machine-code bytes mapped across finalized kernels.
    pub code_bytes: u32,
    /// Kernels successfully finalized.
    pub kernels_finalized: u32,
}

/// Arena-based build session.
///
/// Owns the statistics and string interning for one or more sequential
/// kernel builds. The arena itself is borrowed so the caller controls when
/// the memory is reclaimed.
pub struct BuildSession<'arena> {
    arena: &'arena Bump,
    stats: RefCell<BuildStats>,
    interned_strings: RefCell<HashMap<String, &'arena str>>,
}

impl<'arena> BuildSession<'arena> {
    /// Create a new session backed by the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(BuildStats::default()),
            interned_strings: RefCell::new(HashMap::new()),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Copy a byte slice into the arena.
    pub fn alloc_bytes(&self, bytes: &[u8]) -> &'arena [u8] {
        self.arena.alloc_slice_copy(bytes)
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }
        let interned: &'arena str = self.arena.alloc_str(s);
        strings.insert(s.to_string(), interned);
        interned
    }

    /// Snapshot of the current statistics.
    pub fn stats(&self) -> BuildStats {
        *self.stats.borrow()
    }

    pub(crate) fn count_register(&self) {
        self.stats.borrow_mut().registers_issued += 1;
    }

    pub(crate) fn count_label_created(&self) {
        self.stats.borrow_mut().labels_created += 1;
    }

    pub(crate) fn count_label_bound(&self) {
        self.stats.borrow_mut().labels_bound += 1;
    }

    pub(crate) fn count_constant_bytes(&self, len: usize) {
        self.stats.borrow_mut().constant_bytes += len as u32;
    }

    pub(crate) fn count_finalized(&self, instructions: usize, code_bytes: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.instructions_encoded += instructions as u32;
        stats.code_bytes += code_bytes as u32;
        stats.kernels_finalized += 1;
    }
}
