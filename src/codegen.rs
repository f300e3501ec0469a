//! Lowering from optimized IR to a host-language function factory.
//!
//! The output of a compile is a string: a factory function that, applied
//! to a thread, binds the target/runtime/stage plus the deduplicated setup
//! expressions and returns the script body as either a plain function or a
//! generator (when the script yields). The host evaluates the string with
//! `scopedEval`, whose lexical scope provides the helpers listed in
//! [`crate::bridge::HELPERS`].
//!
//! Lowering is type-driven: the rewriter has already refreshed every
//! input's refined type, so coercions are only emitted where the type
//! still demands them, comparisons specialize to `===` or lowercase string
//! compares, and list reads take the indexed fast path when the index is
//! known numeric.

use crate::bridge::TargetInfo;
use crate::context::CompilerContext;
use crate::error::{CompileError, CompileResult};
use crate::ir::{
    BinaryOp, CastKind, CompatCall, Input, InputKind, Ir, ListRef, Script, Stack, StackBlock,
    StackKind, UnaryOp, VarRef, VarScope,
};
use crate::lattice::ValueType;
use crate::value::{number_to_string, Value};
use std::collections::HashMap;

/// The result of lowering one script.
#[derive(Debug, Clone)]
pub struct CompiledScript {
    /// Factory source, ready for the host's `scopedEval`.
    pub factory_source: String,
    pub factory_name: String,
    pub function_name: String,
    /// Whether the factory returns a generator.
    pub yields: bool,
    pub is_procedure: bool,
    pub procedure_code: String,
}

/// Per-stack compilation context: whether the stack is a loop body and
/// whether the block being lowered is its last.
#[derive(Debug, Clone, Copy)]
struct Frame {
    is_loop: bool,
    is_last_block: bool,
}

/// Lowers one script of an analyzed IR.
pub struct CodeGenerator<'a> {
    ctx: &'a mut CompilerContext,
    script: &'a Script,
    ir: &'a Ir,
    target: &'a TargetInfo,
    source: String,
    setup: Vec<(String, String)>,
    setup_index: HashMap<String, String>,
    local_count: usize,
    frames: Vec<Frame>,
    descended_into_modulo: bool,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(
        ctx: &'a mut CompilerContext,
        script: &'a Script,
        ir: &'a Ir,
        target: &'a TargetInfo,
    ) -> Self {
        Self {
            ctx,
            script,
            ir,
            target,
            source: String::new(),
            setup: Vec::new(),
            setup_index: HashMap::new(),
            local_count: 0,
            frames: Vec::new(),
            descended_into_modulo: false,
        }
    }

    pub fn compile(mut self) -> CompileResult<CompiledScript> {
        let script = self.script;
        self.descend_stack(&script.stack, false)?;
        if !script.is_procedure {
            // Entry scripts mark the thread DONE; procedures just return.
            self.line("retire();");
        }

        let factory_name = self.ctx.next_factory_name();
        let function_name = self.ctx.next_function_name(script);
        let star = if script.yields { "*" } else { "" };
        let params: Vec<String> = (0..script.arguments.len())
            .map(|i| format!("p{}", i))
            .collect();

        let mut out = String::new();
        out.push_str(&format!("(function {}(thread) {{\n", factory_name));
        out.push_str("const target = thread.target;\n");
        out.push_str("const runtime = target.runtime;\n");
        out.push_str("const stage = runtime.getTargetForStage();\n");
        for (name, expr) in &self.setup {
            out.push_str(&format!("const {} = {};\n", name, expr));
        }
        out.push_str(&format!(
            "return function{} {}({}) {{\n",
            star,
            function_name,
            params.join(", ")
        ));
        out.push_str(&self.source);
        out.push_str("};\n})\n");

        Ok(CompiledScript {
            factory_source: out,
            factory_name,
            function_name,
            yields: script.yields,
            is_procedure: script.is_procedure,
            procedure_code: script.procedure_code.clone(),
        })
    }

    // ═══════════════════════════════════════════════════════════════════
    // Emission plumbing
    // ═══════════════════════════════════════════════════════════════════

    fn line(&mut self, s: &str) {
        self.source.push_str(s);
        self.source.push('\n');
    }

    fn alloc_local(&mut self) -> String {
        let n = self.local_count;
        self.local_count += 1;
        format!("a{}", n)
    }

    /// Bind an expression once in the factory preamble, deduplicated.
    fn setup_binding(&mut self, expr: String) -> String {
        if let Some(name) = self.setup_index.get(&expr) {
            return name.clone();
        }
        let name = format!("b{}", self.setup.len());
        self.setup.push((name.clone(), expr.clone()));
        self.setup_index.insert(expr, name.clone());
        name
    }

    fn referenced_variable(&mut self, var: &VarRef) -> String {
        let table = match var.scope {
            VarScope::Target => "target",
            VarScope::Stage => "stage",
        };
        self.setup_binding(format!("{}.variables[{}]", table, js_string(&var.id)))
    }

    fn referenced_list(&mut self, list: &ListRef) -> String {
        let table = match list.scope {
            VarScope::Target => "target",
            VarScope::Stage => "stage",
        };
        self.setup_binding(format!("{}.variables[{}]", table, js_string(&list.id)))
    }

    /// Fail unless this script is allowed to yield.
    fn require_yield(&mut self) -> CompileResult<()> {
        if self.script.yields {
            Ok(())
        } else {
            Err(CompileError::YieldMismatch {
                script: self.script.name().to_string(),
            })
        }
    }

    /// The yield at the bottom of a loop body. Warp mode suppresses the
    /// per-iteration yield but keeps the stuck check when the warp timer
    /// is on.
    fn emit_loop_yield(&mut self, block_yields: bool) -> CompileResult<()> {
        if block_yields {
            self.require_yield()?;
            if self.script.is_warp {
                self.line("if (isStuck()) yield;");
            } else {
                self.line("yield;");
            }
        } else if self.script.is_warp && self.script.warp_timer {
            self.require_yield()?;
            self.line("if (isStuck()) yield;");
        }
        Ok(())
    }

    /// True when every enclosing stack up to the innermost loop is at its
    /// last block, i.e. nothing else runs before the loop wraps around.
    fn is_last_block_in_loop(&self) -> bool {
        for frame in self.frames.iter().rev() {
            if !frame.is_last_block {
                return false;
            }
            if frame.is_loop {
                return true;
            }
        }
        false
    }

    fn nullish(&self, expr: String, fallback: &str) -> String {
        if self.ctx.nullish_coalescing {
            format!("({} ?? {})", expr, fallback)
        } else {
            format!("({} || {})", expr, fallback)
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Statements
    // ═══════════════════════════════════════════════════════════════════

    fn descend_stack(&mut self, stack: &Stack, is_loop: bool) -> CompileResult<()> {
        self.frames.push(Frame {
            is_loop,
            is_last_block: false,
        });
        let mut result = Ok(());
        let len = stack.len();
        for (i, block) in stack.iter().enumerate() {
            if let Some(frame) = self.frames.last_mut() {
                frame.is_last_block = i + 1 == len;
            }
            result = self.descend_block(block);
            if result.is_err() {
                break;
            }
        }
        self.frames.pop();
        result
    }

    fn descend_block(&mut self, block: &StackBlock) -> CompileResult<()> {
        match &block.kind {
            StackKind::IfElse {
                condition,
                then_branch,
                else_branch,
            } => {
                let cond = self.descend_as_boolean(condition)?;
                self.line(&format!("if ({}) {{", cond));
                self.descend_stack(then_branch, false)?;
                if !else_branch.is_empty() {
                    self.line("} else {");
                    self.descend_stack(else_branch, false)?;
                }
                self.line("}");
            }
            StackKind::While { condition, body } => {
                let cond = self.descend_as_boolean(condition)?;
                self.line(&format!("while ({}) {{", cond));
                self.descend_stack(body, true)?;
                self.emit_loop_yield(block.yields)?;
                self.line("}");
            }
            StackKind::Repeat { times, body } => {
                let times = self.descend_as_number(times)?;
                let i = self.alloc_local();
                self.line(&format!("for (var {i} = {times}; {i} >= 0.5; {i}--) {{"));
                self.descend_stack(body, true)?;
                self.emit_loop_yield(block.yields)?;
                self.line("}");
            }
            StackKind::For {
                variable,
                count,
                body,
            } => {
                let count = self.descend_as_number(count)?;
                let var = self.referenced_variable(variable);
                let i = self.alloc_local();
                self.line(&format!("var {i} = 0;"));
                self.line(&format!("while ({i} < {count}) {{"));
                self.line(&format!("{i}++;"));
                self.line(&format!("{var}.value = {i};"));
                self.descend_stack(body, true)?;
                self.emit_loop_yield(block.yields)?;
                self.line("}");
            }
            StackKind::Wait { seconds } => {
                let seconds = self.descend_as_number(seconds)?;
                let duration = self.alloc_local();
                self.require_yield()?;
                self.line("thread.timer = timer();");
                self.line(&format!(
                    "var {duration} = Math.max(0, 1000 * {seconds});"
                ));
                self.line("runtime.requestRedraw();");
                self.line("yield;");
                self.line(&format!(
                    "while (thread.timer.timeElapsed() < {duration}) {{"
                ));
                if self.script.is_warp {
                    self.line("if (isStuck()) yield;");
                } else {
                    self.line("yield;");
                }
                self.line("}");
                self.line("thread.timer = null;");
            }
            StackKind::WaitUntil { condition } => {
                let cond = self.descend_as_boolean(condition)?;
                self.line(&format!("while (!{}) {{", cond));
                self.emit_loop_yield(true)?;
                self.line("}");
            }
            StackKind::StopScript => {
                if self.script.is_procedure {
                    self.line("return;");
                } else {
                    self.line("retire();");
                    self.line("return;");
                }
            }
            StackKind::StopAll => {
                self.line("runtime.stopAll();");
                self.line("retire();");
                self.line("return;");
            }
            StackKind::StopOtherScripts => {
                self.line("runtime.stopForTarget(target, thread);");
            }
            StackKind::DeleteThisClone => {
                self.line("if (!target.isOriginal) {");
                self.line("runtime.disposeTarget(target);");
                self.line("runtime.stopForTarget(target);");
                self.line("retire();");
                self.line("return;");
                self.line("}");
            }
            StackKind::VarSet { var, value } => {
                let value = self.descend_input(value)?;
                let binding = self.referenced_variable(var);
                self.line(&format!("{}.value = {};", binding, value));
                if var.is_cloud {
                    self.line(&format!(
                        "runtime.ioDevices.cloud.requestUpdateVariable({}, {}.value);",
                        js_string(&var.name),
                        binding
                    ));
                }
            }
            StackKind::VarShow(var) => self.emit_monitor_visibility(&var.id, true),
            StackKind::VarHide(var) => self.emit_monitor_visibility(&var.id, false),
            StackKind::ListAdd { list, item } => {
                let item = self.descend_input(item)?;
                let list = self.referenced_list(list);
                self.line(&format!("{}.value.push({});", list, item));
                self.line(&format!("{}._monitorUpToDate = false;", list));
            }
            StackKind::ListInsert { list, index, item } => {
                let index = self.descend_input(index)?;
                let item = self.descend_input(item)?;
                let list = self.referenced_list(list);
                self.line(&format!("listInsert({}, {}, {});", list, index, item));
            }
            StackKind::ListReplace { list, index, item } => {
                let index = self.descend_input(index)?;
                let item = self.descend_input(item)?;
                let list = self.referenced_list(list);
                self.line(&format!("listReplace({}, {}, {});", list, index, item));
            }
            StackKind::ListDelete { list, index } => {
                let list_binding = self.referenced_list(list);
                if index.is_constant(&Value::from("last")) {
                    self.line(&format!("{}.value.pop();", list_binding));
                    self.line(&format!("{}._monitorUpToDate = false;", list_binding));
                } else {
                    let index = self.descend_input(index)?;
                    self.line(&format!("listDelete({}, {});", list_binding, index));
                }
            }
            StackKind::ListDeleteAll(list) => {
                let list = self.referenced_list(list);
                self.line(&format!("{}.value = [];", list));
                self.line(&format!("{}._monitorUpToDate = false;", list));
            }
            StackKind::ListShow(list) => self.emit_monitor_visibility(&list.id, true),
            StackKind::ListHide(list) => self.emit_monitor_visibility(&list.id, false),
            StackKind::MotionSetX { x } => {
                self.descended_into_modulo = false;
                let x = self.descend_as_number(x)?;
                self.emit_interpolation_reset();
                self.line(&format!("target.setXY({}, target.y);", x));
            }
            StackKind::MotionSetY { y } => {
                self.descended_into_modulo = false;
                let y = self.descend_as_number(y)?;
                self.emit_interpolation_reset();
                self.line(&format!("target.setXY(target.x, {});", y));
            }
            StackKind::MotionSetXY { x, y } => {
                self.descended_into_modulo = false;
                let x = self.descend_as_number(x)?;
                let y = self.descend_as_number(y)?;
                self.emit_interpolation_reset();
                self.line(&format!("target.setXY({}, {});", x, y));
            }
            StackKind::MotionChangeX { dx } => {
                let dx = self.descend_as_number(dx)?;
                self.line(&format!("target.setXY(target.x + {}, target.y);", dx));
            }
            StackKind::MotionChangeY { dy } => {
                let dy = self.descend_as_number(dy)?;
                self.line(&format!("target.setXY(target.x, target.y + {});", dy));
            }
            StackKind::MotionSetDirection { direction } => {
                let direction = self.descend_as_number(direction)?;
                self.line(&format!("target.setDirection({});", direction));
            }
            StackKind::LooksShow => self.line("target.setVisible(true);"),
            StackKind::LooksHide => self.line("target.setVisible(false);"),
            StackKind::LooksSetSize { size } => {
                let size = self.descend_as_number(size)?;
                self.line(&format!("target.setSize({});", size));
            }
            StackKind::LooksChangeSize { delta } => {
                let delta = self.descend_as_number(delta)?;
                self.line(&format!("target.setSize(target.size + {});", delta));
            }
            StackKind::LooksSetEffect { effect, value } => {
                let value = self.descend_as_number(value)?;
                self.line(&format!(
                    "target.setEffect({}, {});",
                    js_string(effect),
                    value
                ));
            }
            StackKind::LooksClearEffects => self.line("target.clearEffects();"),
            StackKind::LooksGoToFront => self.line("target.goToFront();"),
            StackKind::LooksGoToBack => self.line("target.goToBack();"),
            StackKind::LooksForwardLayers { layers } => {
                let layers = self.descend_as_number(layers)?;
                self.line(&format!("target.goForwardLayers({});", layers));
            }
            StackKind::LooksBackwardLayers { layers } => {
                let layers = self.descend_as_number(layers)?;
                self.line(&format!("target.goBackwardLayers({});", layers));
            }
            StackKind::SensingResetTimer => {
                self.line("runtime.ioDevices.clock.resetProjectTimer();");
            }
            StackKind::PenClear => {
                let pen = self.setup_binding("runtime.ext_pen".to_string());
                self.line(&format!("{}.clear();", pen));
            }
            StackKind::EventBroadcast { broadcast } => {
                let name = self.descend_as_string(broadcast)?;
                self.line(&format!(
                    "startHats(\"event_whenbroadcastreceived\", {{ BROADCAST_OPTION: {} }});",
                    name
                ));
            }
            StackKind::EventBroadcastAndWait { broadcast } => {
                let name = self.descend_as_string(broadcast)?;
                self.require_yield()?;
                self.line(&format!(
                    "yield* waitThreads(startHats(\"event_whenbroadcastreceived\", {{ BROADCAST_OPTION: {} }}));",
                    name
                ));
            }
            StackKind::ProcedureCall { code, arguments } => {
                self.descend_procedure_call(code, arguments)?;
            }
            StackKind::CompatibilityLayer(call) => {
                self.require_yield()?;
                let call_js = self.compat_call_js(call)?;
                self.line(&format!("yield* {};", call_js));
                if self.is_last_block_in_loop() {
                    self.line("if (thread.resumedFromPromise) {");
                    self.line("thread.resumedFromPromise = false;");
                    self.line("continue;");
                    self.line("}");
                }
            }
            StackKind::AddonCall {
                block_id,
                arguments,
            } => {
                let binding =
                    self.setup_binding(format!("runtime.getAddonBlock({})", js_string(block_id)));
                let args = self.object_literal(arguments)?;
                self.line(&format!("{}.callback({}, thread);", binding, args));
            }
            StackKind::Debugger => self.line("debugger;"),
            StackKind::VisualReport { input } => {
                let value = self.descend_input(input)?;
                let local = self.alloc_local();
                self.line(&format!("var {} = {};", local, value));
                self.line(&format!(
                    "if ({} !== undefined) runtime.visualReport({}, {});",
                    local,
                    js_string(&self.script.top_block_id),
                    local
                ));
            }
            StackKind::Nop => {}
        }
        Ok(())
    }

    fn emit_interpolation_reset(&mut self) {
        if self.descended_into_modulo {
            self.line("target.interpolationData = null;");
            self.descended_into_modulo = false;
        }
    }

    fn emit_monitor_visibility(&mut self, id: &str, visible: bool) {
        self.line(&format!(
            "runtime.monitorBlocks.changeBlock({{ id: {}, element: \"checkbox\", value: {} }}, runtime);",
            js_string(id),
            visible
        ));
    }

    fn descend_procedure_call(&mut self, code: &str, arguments: &[Input]) -> CompileResult<()> {
        let callee = self
            .ir
            .procedures
            .get(code)
            .ok_or_else(|| CompileError::MissingProcedure {
                code: code.to_string(),
            })?;
        if callee.stack.is_empty() {
            return Ok(());
        }
        let mut args = Vec::with_capacity(arguments.len());
        for argument in arguments {
            args.push(self.descend_input(argument)?);
        }
        // Direct recursion outside warp must give the sequencer a chance
        // to run between frames.
        if self.script.is_procedure && code == self.script.procedure_code && !callee.is_warp {
            self.require_yield()?;
            self.line("yield;");
        }
        let key = js_string(code);
        if callee.yields {
            if !self.script.yields {
                return Err(CompileError::YieldingCall {
                    caller: self.script.name().to_string(),
                    callee: code.to_string(),
                });
            }
            self.line(&format!(
                "yield* thread.procedures[{}]({});",
                key,
                args.join(", ")
            ));
        } else {
            self.line(&format!(
                "thread.procedures[{}]({});",
                key,
                args.join(", ")
            ));
        }
        Ok(())
    }

    fn object_literal(&mut self, entries: &[(String, Input)]) -> CompileResult<String> {
        let mut out = String::from("{");
        for (i, (name, input)) in entries.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let value = self.descend_input(input)?;
            out.push_str(&format!("{}: {}", js_string(name), value));
        }
        out.push('}');
        Ok(out)
    }

    fn compat_call_js(&mut self, call: &CompatCall) -> CompileResult<String> {
        let opcode_fn = self.setup_binding(format!(
            "runtime.getOpcodeFunction({})",
            js_string(&call.opcode)
        ));
        let inputs = self.object_literal(&call.inputs)?;
        let mut fields = String::from("{");
        for (i, (name, value)) in call.fields.iter().enumerate() {
            if i > 0 {
                fields.push_str(", ");
            }
            fields.push_str(&format!("{}: {}", js_string(name), js_string(value)));
        }
        fields.push('}');
        Ok(format!(
            "executeInCompatibilityLayer({}, {}, {}, {}, {})",
            inputs,
            fields,
            opcode_fn,
            self.script.is_warp,
            js_string(&call.block_id)
        ))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Expressions
    // ═══════════════════════════════════════════════════════════════════

    fn descend_input(&mut self, input: &Input) -> CompileResult<String> {
        match &input.kind {
            InputKind::Constant(v) => Ok(emit_constant(v)),
            InputKind::VarGet(var) => {
                let binding = self.referenced_variable(var);
                Ok(format!("{}.value", binding))
            }
            InputKind::ListGet { list, index } => {
                let list = self.referenced_list(list);
                if self.ctx.nullish_coalescing {
                    if index.is_constant(&Value::from("last")) {
                        return Ok(format!(
                            "({0}.value[{0}.value.length - 1] ?? \"\")",
                            list
                        ));
                    }
                    if index.ty.is_always(ValueType::NUMBER_OR_NAN) {
                        let idx = self.descend_input(index)?;
                        return Ok(format!("({}.value[{} - 1] ?? \"\")", list, idx));
                    }
                }
                let idx = self.descend_input(index)?;
                Ok(format!("listGet({}.value, {})", list, idx))
            }
            InputKind::ListLength(list) => {
                let list = self.referenced_list(list);
                Ok(format!("{}.value.length", list))
            }
            InputKind::ListContains { list, item } => {
                let item = self.descend_input(item)?;
                let list = self.referenced_list(list);
                Ok(format!("listContains({}, {})", list, item))
            }
            InputKind::ListIndexOf { list, item } => {
                let item = self.descend_input(item)?;
                let list = self.referenced_list(list);
                Ok(format!("listIndexOf({}, {})", list, item))
            }
            InputKind::ListContents(list) => {
                let list = self.referenced_list(list);
                Ok(format!("listContents({})", list))
            }
            InputKind::ProcedureArg { index, .. } => Ok(format!("p{}", index)),
            InputKind::Cast { kind, value } => match kind {
                CastKind::Number => self.descend_as_number(value),
                CastKind::NumberOrNan => self.descend_as_number_or_nan(value),
                CastKind::NumberIndex => {
                    let js = self.descend_as_number_or_nan(value)?;
                    Ok(format!("Math.trunc({})", js))
                }
                CastKind::Boolean => self.descend_as_boolean(value),
                CastKind::String => self.descend_as_string(value),
            },
            InputKind::Binary { op, left, right } => self.descend_binary(*op, left, right),
            InputKind::Unary { op, value } => self.descend_unary(*op, value),
            InputKind::MotionX => Ok("limitPrecision(target.x)".to_string()),
            InputKind::MotionY => Ok("limitPrecision(target.y)".to_string()),
            InputKind::MotionDirection => Ok("target.direction".to_string()),
            InputKind::LooksSize => Ok("Math.round(target.size)".to_string()),
            InputKind::LooksCostumeNumber => Ok("(target.currentCostume + 1)".to_string()),
            InputKind::LooksCostumeName => {
                Ok("target.getCostumes()[target.currentCostume].name".to_string())
            }
            InputKind::SensingTimer => {
                Ok("runtime.ioDevices.clock.projectTimer()".to_string())
            }
            InputKind::SensingMouseX => {
                Ok("runtime.ioDevices.mouse.getScratchX()".to_string())
            }
            InputKind::SensingMouseY => {
                Ok("runtime.ioDevices.mouse.getScratchY()".to_string())
            }
            InputKind::SensingMouseDown => {
                Ok("runtime.ioDevices.mouse.getIsDown()".to_string())
            }
            InputKind::SensingKeyDown(key) => {
                let key = self.descend_input(key)?;
                Ok(format!(
                    "runtime.ioDevices.keyboard.getKeyIsDown({})",
                    key
                ))
            }
            InputKind::SensingDistance(name) => {
                let name = self.descend_as_string(name)?;
                Ok(format!("distance({})", name))
            }
            InputKind::SensingDaysSince2000 => Ok("daysSince2000()".to_string()),
            InputKind::SensingUsername => {
                Ok("runtime.ioDevices.userData.getUsername()".to_string())
            }
            InputKind::SensingAnswer => {
                let sensing = self.setup_binding("runtime.ext_scratch3_sensing".to_string());
                Ok(format!("{}._answer", sensing))
            }
            InputKind::SensingTouchingObject(name) => {
                let name = self.descend_as_string(name)?;
                Ok(format!("target.isTouchingObject({})", name))
            }
            InputKind::SensingTouchingColor(color) => {
                let color = self.descend_input(color)?;
                Ok(format!("target.isTouchingColor(colorToList({}))", color))
            }
            InputKind::SensingColorTouchingColor { color, mask } => {
                let color = self.descend_input(color)?;
                let mask = self.descend_input(mask)?;
                Ok(format!(
                    "target.colorIsTouchingColor(colorToList({}), colorToList({}))",
                    color, mask
                ))
            }
            InputKind::SensingOf { object, property } => self.descend_sensing_of(object, property),
            InputKind::CompatibilityLayer(call) => {
                self.require_yield()?;
                let call_js = self.compat_call_js(call)?;
                Ok(format!("(yield* {})", call_js))
            }
        }
    }

    fn descend_binary(&mut self, op: BinaryOp, left: &Input, right: &Input) -> CompileResult<String> {
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                let a = self.descend_as_number(left)?;
                let b = self.descend_as_number(right)?;
                let sym = match op {
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    _ => "/",
                };
                Ok(format!("({} {} {})", a, sym, b))
            }
            BinaryOp::Mod => {
                let a = self.descend_as_number(left)?;
                let b = self.descend_as_number(right)?;
                self.descended_into_modulo = true;
                Ok(format!("mod({}, {})", a, b))
            }
            BinaryOp::And => {
                let a = self.descend_as_boolean(left)?;
                let b = self.descend_as_boolean(right)?;
                Ok(format!("({} && {})", a, b))
            }
            BinaryOp::Or => {
                let a = self.descend_as_boolean(left)?;
                let b = self.descend_as_boolean(right)?;
                Ok(format!("({} || {})", a, b))
            }
            BinaryOp::Eq => self.descend_compare(left, right, "===", "compareEqual", true),
            BinaryOp::Lt => self.descend_compare(left, right, "<", "compareLessThan", false),
            BinaryOp::Gt => self.descend_compare(left, right, ">", "compareGreaterThan", false),
            BinaryOp::Join => {
                let a = self.descend_as_string(left)?;
                let b = self.descend_as_string(right)?;
                Ok(format!("({} + {})", a, b))
            }
            BinaryOp::LetterOf => {
                let s = self.descend_as_string(right)?;
                let i = self.descend_as_number(left)?;
                Ok(self.nullish(format!("{}[{} - 1]", s, i), "\"\""))
            }
            BinaryOp::Contains => {
                let a = self.descend_as_string(left)?;
                let b = self.descend_as_string(right)?;
                Ok(format!(
                    "{}.toLowerCase().includes({}.toLowerCase())",
                    a, b
                ))
            }
            BinaryOp::Random => self.descend_random(left, right),
        }
    }

    fn descend_random(&mut self, left: &Input, right: &Input) -> CompileResult<String> {
        if let (Some(lo), Some(hi)) = (left.as_constant(), right.as_constant()) {
            // The bounds are known at compile time: pick the helper now. A
            // string bound written with a decimal point forces floats.
            let lo_n = lo.to_number();
            let hi_n = hi.to_number();
            let forced_float = [lo, hi].iter().any(|v| match v {
                Value::String(s) => s.contains('.'),
                _ => false,
            });
            let integral = lo_n.fract() == 0.0 && hi_n.fract() == 0.0 && !forced_float;
            let helper = if integral { "randomInt" } else { "randomFloat" };
            return Ok(format!(
                "{}({}, {})",
                helper,
                number_literal(lo_n),
                number_literal(hi_n)
            ));
        }
        let a = self.descend_as_number(left)?;
        let b = self.descend_as_number(right)?;
        Ok(format!(
            "((l, h) => Number.isInteger(l) && Number.isInteger(h) ? randomInt(l, h) : randomFloat(l, h))({}, {})",
            a, b
        ))
    }

    /// Comparison lowering: `===`/`<`/`>` over numbers when both sides are
    /// statically numeric (or safe numeric constants), lowercase string
    /// comparison when either side can never be a number, and the runtime
    /// helper otherwise.
    fn descend_compare(
        &mut self,
        left: &Input,
        right: &Input,
        sym: &str,
        helper: &str,
        equality: bool,
    ) -> CompileResult<String> {
        if let (Some(a), Some(b)) = (left.as_constant(), right.as_constant()) {
            // Both sides are literals: decide now, with the runtime's own
            // comparison semantics.
            let ord = crate::value::compare(a, b);
            let result = match sym {
                "<" => ord == std::cmp::Ordering::Less,
                ">" => ord == std::cmp::Ordering::Greater,
                _ => ord == std::cmp::Ordering::Equal,
            };
            return Ok(result.to_string());
        }
        let numeric = |input: &Input| {
            input.ty.is_always(ValueType::NUMBER) || is_safe_numeric_constant(input, equality)
        };
        if numeric(left) && numeric(right) {
            let a = self.descend_as_number(left)?;
            let b = self.descend_as_number(right)?;
            return Ok(format!("({} {} {})", a, sym, b));
        }
        if left.ty.is_always(ValueType::STRING) || right.ty.is_always(ValueType::STRING) {
            let a = self.descend_lowercased(left)?;
            let b = self.descend_lowercased(right)?;
            return Ok(format!("({} {} {})", a, sym, b));
        }
        let a = self.descend_input(left)?;
        let b = self.descend_input(right)?;
        Ok(format!("{}({}, {})", helper, a, b))
    }

    fn descend_lowercased(&mut self, input: &Input) -> CompileResult<String> {
        if let Some(v) = input.as_constant() {
            return Ok(js_string(&v.to_js_string().to_lowercase()));
        }
        let js = self.descend_as_string(input)?;
        Ok(format!("{}.toLowerCase()", js))
    }

    fn descend_unary(&mut self, op: UnaryOp, value: &Input) -> CompileResult<String> {
        match op {
            UnaryOp::Not => {
                let b = self.descend_as_boolean(value)?;
                Ok(format!("!{}", b))
            }
            UnaryOp::Len => {
                let s = self.descend_as_string(value)?;
                Ok(format!("{}.length", s))
            }
            UnaryOp::Abs => self.math_call("Math.abs", value),
            UnaryOp::Floor => self.math_call("Math.floor", value),
            UnaryOp::Ceil => self.math_call("Math.ceil", value),
            UnaryOp::Sqrt => self.math_call("Math.sqrt", value),
            UnaryOp::Round => self.math_call("Math.round", value),
            UnaryOp::Sin => {
                let n = self.descend_as_number(value)?;
                Ok(format!(
                    "(Math.round(Math.sin((Math.PI * {}) / 180) * 1e10) / 1e10)",
                    n
                ))
            }
            UnaryOp::Cos => {
                let n = self.descend_as_number(value)?;
                Ok(format!(
                    "(Math.round(Math.cos((Math.PI * {}) / 180) * 1e10) / 1e10)",
                    n
                ))
            }
            UnaryOp::Tan => {
                let n = self.descend_as_number(value)?;
                Ok(format!("tan({})", n))
            }
            UnaryOp::Asin => {
                let n = self.descend_as_number(value)?;
                Ok(format!("((Math.asin({}) * 180) / Math.PI)", n))
            }
            UnaryOp::Acos => {
                let n = self.descend_as_number(value)?;
                Ok(format!("((Math.acos({}) * 180) / Math.PI)", n))
            }
            UnaryOp::Atan => {
                let n = self.descend_as_number(value)?;
                Ok(format!("((Math.atan({}) * 180) / Math.PI)", n))
            }
            UnaryOp::Ln => self.math_call("Math.log", value),
            UnaryOp::Log10 => {
                let n = self.descend_as_number(value)?;
                Ok(format!("(Math.log({}) / Math.LN10)", n))
            }
            UnaryOp::PowE => self.math_call("Math.exp", value),
            UnaryOp::Pow10 => {
                let n = self.descend_as_number(value)?;
                Ok(format!("Math.pow(10, {})", n))
            }
        }
    }

    fn math_call(&mut self, name: &str, value: &Input) -> CompileResult<String> {
        let n = self.descend_as_number(value)?;
        Ok(format!("{}({})", name, n))
    }

    fn descend_sensing_of(&mut self, object: &Input, property: &str) -> CompileResult<String> {
        if let Some(Value::String(name)) = object.as_constant() {
            if name == "_stage_" {
                return Ok(sensing_of_property("stage", property));
            }
            let binding = self.setup_binding(format!(
                "runtime.getSpriteTargetByName({})",
                js_string(name)
            ));
            let read = sensing_of_property("t", property);
            return Ok(format!("((t) => t ? {} : 0)({})", read, binding));
        }
        let name = self.descend_as_string(object)?;
        let read = sensing_of_property("t", property);
        Ok(format!(
            "((t) => t ? {} : 0)(runtime.getSpriteTargetByName({}))",
            read, name
        ))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Typed coercion wrappers
    // ═══════════════════════════════════════════════════════════════════

    /// Emit an input as a number, NaN scrubbed to 0, -0 preserved. The
    /// wrapper is chosen from the refined type so that already-numeric
    /// values pay nothing.
    fn descend_as_number(&mut self, input: &Input) -> CompileResult<String> {
        if let Some(v) = input.as_constant() {
            if let Value::String(s) = v {
                if self.target.is_unsafe_name(s) {
                    return Ok(format!("(+{} || 0)", js_string(s)));
                }
            }
            return Ok(number_literal(v.to_number()));
        }
        let ty = input.ty;
        if ty.is_always(ValueType::NUMBER) {
            return self.descend_input(input);
        }
        let js = self.descend_input(input)?;
        let nan_possible = ty.is_sometimes(ValueType::NAN | ValueType::STRING);
        let neg_zero_possible = ty.is_sometimes(ValueType::NEG_ZERO | ValueType::STRING_NUM);
        if !nan_possible {
            Ok(format!("(+{})", js))
        } else if !neg_zero_possible {
            Ok(format!("(+{} || 0)", js))
        } else {
            Ok(format!("((n => n === n ? n : 0)(+{}))", js))
        }
    }

    /// Emit an input as a number without scrubbing NaN.
    fn descend_as_number_or_nan(&mut self, input: &Input) -> CompileResult<String> {
        if let Some(v) = input.as_constant() {
            if let Value::String(s) = v {
                if self.target.is_unsafe_name(s) {
                    return Ok(format!("(+{})", js_string(s)));
                }
            }
            return Ok(number_literal(v.to_number_or_nan()));
        }
        if input.ty.is_always(ValueType::NUMBER_OR_NAN) {
            return self.descend_input(input);
        }
        let js = self.descend_input(input)?;
        Ok(format!("(+{})", js))
    }

    /// Emit an input as a string.
    fn descend_as_string(&mut self, input: &Input) -> CompileResult<String> {
        if let Some(v) = input.as_constant() {
            return Ok(js_string(&v.to_js_string()));
        }
        if input.ty.is_always(ValueType::ANY_STRING) {
            return self.descend_input(input);
        }
        let js = self.descend_input(input)?;
        Ok(format!("(\"\" + {})", js))
    }

    /// Emit an input as a boolean.
    fn descend_as_boolean(&mut self, input: &Input) -> CompileResult<String> {
        if let Some(v) = input.as_constant() {
            return Ok(if v.to_boolean() { "true" } else { "false" }.to_string());
        }
        if input.ty.is_always(ValueType::BOOLEAN) {
            return self.descend_input(input);
        }
        let js = self.descend_input(input)?;
        Ok(format!("toBoolean({})", js))
    }
}

fn sensing_of_property(obj: &str, property: &str) -> String {
    match property {
        "volume" => format!("{}.volume", obj),
        "x position" => format!("{}.x", obj),
        "y position" => format!("{}.y", obj),
        "direction" => format!("{}.direction", obj),
        "costume #" | "backdrop #" => format!("({}.currentCostume + 1)", obj),
        "costume name" | "backdrop name" => {
            format!("{0}.getCostumes()[{0}.currentCostume].name", obj)
        }
        "size" => format!("{}.size", obj),
        _ => format!(
            "((v => v ? v.value : 0)({}.lookupVariableByNameAndType({}, \"\")))",
            obj,
            js_string(property)
        ),
    }
}

fn emit_constant(v: &Value) -> String {
    match v {
        Value::Number(n) => number_literal(*n),
        Value::Bool(b) => b.to_string(),
        Value::String(s) => js_string(s),
    }
}

/// A number as a host literal. `-0`, infinities and NaN have no plain
/// literal form and are special-cased.
fn number_literal(n: f64) -> String {
    if n == 0.0 && n.is_sign_negative() {
        return "-0".to_string();
    }
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n == f64::INFINITY {
        return "Infinity".to_string();
    }
    if n == f64::NEG_INFINITY {
        return "-Infinity".to_string();
    }
    number_to_string(n)
}

/// JSON-escape a string for embedding in emitted source.
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// True when a constant may take part in a numeric comparison: its numeric
/// value must stringify back to the original literal (so "05" and "" are
/// out), and for equality it must additionally be non-zero.
fn is_safe_numeric_constant(input: &Input, equality: bool) -> bool {
    let Some(v) = input.as_constant() else {
        return false;
    };
    let n = v.to_number_or_nan();
    if n.is_nan() {
        return false;
    }
    if equality && n == 0.0 {
        return false;
    }
    number_to_string(n) == v.to_js_string()
}
