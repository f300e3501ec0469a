//! blockjet: ahead-of-time compiler core for a block-based project
//! runtime.
//!
//! The front-end lowers each script of stacked visual blocks into the IR
//! in [`ir`]; [`analyzer`] propagates a fine-grained numeric type lattice
//! through it, [`rewriter`] removes the coercions the analysis proved
//! redundant, and [`codegen`] lowers the result to a host-language
//! function factory that the runtime instantiates per thread. The
//! [`bridge`] module documents the narrow contract the emitted code
//! assumes from the runtime.

pub mod value;
pub mod lattice;
pub mod error;
pub mod state;
pub mod ir;
pub mod analyzer;
pub mod rewriter;
pub mod bridge;
pub mod codegen;
pub mod context;

pub use analyzer::{analyze, Analyzer};
pub use bridge::{TargetInfo, HELPERS};
pub use codegen::{CodeGenerator, CompiledScript};
pub use context::{compile, compile_script, CompiledProject, CompilerContext};
pub use error::{CompileError, CompileResult};
pub use ir::{
    ArgKind, Argument, BinaryOp, CastKind, CompatCall, Input, InputKind, Ir, ListRef, Script,
    Stack, StackBlock, StackKind, UnaryOp, VarRef, VarScope,
};
pub use lattice::ValueType;
pub use rewriter::{optimize, RewriteStats, Rewriter};
pub use state::TypeState;
pub use value::Value;

mod tests;
