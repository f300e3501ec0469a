//! Compiler context and entry points.
//!
//! The only state shared between compilations is here: the naming-pool
//! counters that keep factory and function names unique across every
//! script compiled in the same process, the debug flag, and the optional
//! test observer. The context is created once at startup and passed into
//! each compile.

use crate::analyzer;
use crate::bridge::TargetInfo;
use crate::codegen::{CodeGenerator, CompiledScript};
use crate::error::{CompileError, CompileResult};
use crate::ir::{Ir, Script};
use crate::rewriter;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

/// Hook invoked after each successful compile; used by snapshot tests.
pub type Observer = Box<dyn FnMut(&CompiledScript)>;

/// Process-wide compiler state.
#[derive(Default)]
pub struct CompilerContext {
    factory_counter: usize,
    function_counter: usize,
    /// Mirrors the host's `runtime.debug`: log each compiled factory.
    pub debug: bool,
    /// Whether the host environment supports the `??` operator.
    pub nullish_coalescing: bool,
    observer: Option<Observer>,
}

impl CompilerContext {
    pub fn new() -> Self {
        Self {
            nullish_coalescing: true,
            ..Default::default()
        }
    }

    pub fn set_observer(&mut self, observer: Observer) {
        self.observer = Some(observer);
    }

    pub(crate) fn next_factory_name(&mut self) -> String {
        let n = self.factory_counter;
        self.factory_counter += 1;
        format!("factory{}", n)
    }

    pub(crate) fn next_function_name(&mut self, script: &Script) -> String {
        let n = self.function_counter;
        self.function_counter += 1;
        let base = if script.yields {
            format!("gen{}", n)
        } else {
            format!("fun{}", n)
        };
        if script.is_procedure {
            format!("{}_{}", base, sanitize(&script.procedure_code))
        } else {
            base
        }
    }

    fn finish(&mut self, script: &Script, compiled: &CompiledScript) {
        if self.debug {
            debug!(
                script = %script.name(),
                source = %compiled.factory_source,
                "compiled script"
            );
        }
        if let Some(observer) = &mut self.observer {
            observer(compiled);
        }
    }
}

/// Procedure names carry a sanitized, truncated copy of the signature for
/// debuggability.
fn sanitize(code: &str) -> String {
    code.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(24)
        .collect()
}

/// The factories produced from one IR.
#[derive(Debug, Clone)]
pub struct CompiledProject {
    pub entry: Rc<CompiledScript>,
    pub procedures: HashMap<String, Rc<CompiledScript>>,
}

/// Lower one script of an analyzed, rewritten IR to its factory. The
/// caller registers the factory in the per-thread procedure table keyed by
/// the procedure variant.
pub fn compile_script(
    ctx: &mut CompilerContext,
    script: &Script,
    ir: &Ir,
    target: &TargetInfo,
) -> CompileResult<Rc<CompiledScript>> {
    let compiled = CodeGenerator::new(ctx, script, ir, target).compile()?;
    ctx.finish(script, &compiled);
    Ok(Rc::new(compiled))
}

/// Full pipeline for one IR: analyze, rewrite, then lower every depended
/// procedure variant (dependencies first) and the entry script. A failure
/// aborts only the script it occurred in; previously compiled scripts are
/// returned to the cache slots untouched.
pub fn compile(
    ctx: &mut CompilerContext,
    ir: &mut Ir,
    target: &TargetInfo,
) -> CompileResult<CompiledProject> {
    analyzer::analyze(ir);
    let stats = rewriter::optimize(ir);
    if ctx.debug {
        debug!(%stats, "rewrite finished");
    }

    let mut procedures = HashMap::new();
    for code in ir.dependency_order() {
        let script = ir
            .procedures
            .get(&code)
            .ok_or_else(|| CompileError::MissingProcedure { code: code.clone() })?;
        let compiled = compile_script(ctx, script, ir, target)?;
        procedures.insert(code, compiled);
    }
    let entry = compile_script(ctx, &ir.entry, ir, target)?;

    for (code, compiled) in &procedures {
        if let Some(script) = ir.procedures.get_mut(code) {
            script.cached_compile = Some(compiled.clone());
        }
    }
    ir.entry.cached_compile = Some(entry.clone());

    Ok(CompiledProject { entry, procedures })
}
