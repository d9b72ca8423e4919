// This module serves as the hub for blendjit's target-independent infrastructure,
// the pieces a kernel build needs before any x86-64 specifics enter the picture:
// error types (BuildError/BuildResult via thiserror), virtual-register issue with
// eager physical assignment (RegisterFile, RegBitSet, AsmReg), and arena-backed
// session state (BuildSession, BuildStats via bumpalo). Everything here is owned
// per build; there is no process-global allocator table or ambient state.

//! Core infrastructure.
//!
//! # Key Components
//!
//! ## Session Management (`session`)
//! - Arena-based memory allocation using `bumpalo`
//! - Register-name interning and build statistics
//!
//! ## Register Allocation (`register_file`)
//! - Arena-style virtual register indices
//! - First-free physical assignment per class bank, no spilling
//!
//! ## Errors (`error`)
//! - `BuildError` for every construction-time failure; builds never
//!   recover partially

pub mod error;
pub mod register_file;
pub mod session;

pub use error::{BuildError, BuildResult};
pub use register_file::{AsmReg, RegBitSet, RegClass, RegisterFile, VirtReg};
pub use session::{BuildSession, BuildStats};
