// This module defines error types for kernel construction using the thiserror crate
// for idiomatic Rust error handling. BuildError is the main error enum covering the
// failure scenarios of a build: register-bank exhaustion, use of released or foreign
// virtual registers, label misuse (rebinding, referenced-but-never-bound), function
// framing mistakes, assembly errors surfaced by iced-x86, and executable-memory
// mapping failures. Each variant carries relevant context (register class, label
// index, parameter index, OS errno) for debugging. The module also provides
// BuildResult<T> as a convenience alias for Result<T, BuildError>. All variants are
// fatal to the build in progress; the caller discards the builder and retries.

//! Error types for kernel construction.
//!
//! Using thiserror for more idiomatic error handling.

use crate::core::register_file::RegClass;
use thiserror::Error;

/// Main error type for kernel builds.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("No {class:?} registers left in the volatile set")]
    RegisterExhausted { class: RegClass },

    #[error("Virtual register used after release")]
    StaleRegister,

    #[error("Expected a {expected:?} register")]
    WrongRegisterClass { expected: RegClass },

    #[error("Label handle does not belong to this builder")]
    StaleLabel,

    #[error("Label {index} bound more than once")]
    LabelRebound { index: u32 },

    #[error("Label {index} referenced but never bound")]
    UnboundLabel { index: u32 },

    #[error("Parameter {index} cannot be bound: {reason}")]
    InvalidParameter { index: usize, reason: &'static str },

    #[error("Function already declared on this builder")]
    FunctionRedeclared,

    #[error("No function declared on this builder")]
    NoFunction,

    #[error("Function body never closed with end_function")]
    UnterminatedFunction,

    #[error("Assembly error: {0}")]
    Assembly(String),

    #[error("Executable memory mapping failed (errno {errno})")]
    Memory { errno: i32 },
}

/// Result type alias for build operations.
pub type BuildResult<T> = Result<T, BuildError>;
