//! Compilation errors.
//!
//! A failed compile aborts that single script; other scripts in the same
//! project are unaffected. The malformed-IR class of errors (unknown
//! opcode, wrong arity, constant of the wrong primitive kind) cannot be
//! constructed in this representation at all, so the reachable errors are
//! the casting, yield-discipline and dependency failures below.

use crate::lattice::ValueType;
use std::fmt;

/// Result alias used throughout the compiler.
pub type CompileResult<T> = Result<T, CompileError>;

/// An error raised while building IR or lowering a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// `to_type` was asked for a target the cast set cannot express.
    ImpossibleCast { target: ValueType },
    /// A yield would be emitted into a script not flagged as yielding.
    YieldMismatch { script: String },
    /// A yielding procedure was invoked from a non-yielding script.
    YieldingCall { caller: String, callee: String },
    /// A procedure variant is referenced but absent from the IR.
    MissingProcedure { code: String },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImpossibleCast { target } => {
                write!(f, "cannot cast to type {:?}", target)
            }
            Self::YieldMismatch { script } => {
                write!(f, "yield emitted in non-yielding script '{}'", script)
            }
            Self::YieldingCall { caller, callee } => {
                write!(
                    f,
                    "non-yielding script '{}' calls yielding procedure '{}'",
                    caller, callee
                )
            }
            Self::MissingProcedure { code } => {
                write!(f, "procedure variant '{}' is not in the IR", code)
            }
        }
    }
}

impl std::error::Error for CompileError {}
