//! Rewriting pass that consumes the analyzer's annotations.
//!
//! A second walk over the IR, threading a state like the analyzer but
//! resetting to the recorded entry/exit annotations at loop boundaries.
//! Each input subtree is rewritten bottom-up: a cast whose operand already
//! lies inside the cast's target type is dropped, a cast of a constant is
//! folded, and every other input gets its `ty` field refreshed to the
//! analyzed type. The result is a semantically equivalent tree; running
//! the pass twice yields the same tree.

use crate::analyzer::type_of;
use crate::ir::{Input, InputKind, Ir, Script, Stack, StackBlock, StackKind};
use crate::state::TypeState;
use crate::value::Value;
use std::fmt;

/// Counters for what a rewrite changed.
#[derive(Debug, Default, Clone)]
pub struct RewriteStats {
    /// Redundant cast nodes removed.
    pub casts_dropped: usize,
    /// Casts of constants folded into new constants.
    pub constants_folded: usize,
}

impl RewriteStats {
    fn merge(&mut self, other: &RewriteStats) {
        self.casts_dropped += other.casts_dropped;
        self.constants_folded += other.constants_folded;
    }
}

impl fmt::Display for RewriteStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} casts dropped, {} constants folded",
            self.casts_dropped, self.constants_folded
        )
    }
}

/// Rewrite every procedure variant (dependencies first) and the entry
/// script of an analyzed IR.
pub fn optimize(ir: &mut Ir) -> RewriteStats {
    let mut total = RewriteStats::default();
    for code in ir.dependency_order() {
        if let Some(script) = ir.procedures.get_mut(&code) {
            let mut rewriter = Rewriter::new();
            rewriter.rewrite_script(script);
            total.merge(&rewriter.stats);
        }
    }
    let mut rewriter = Rewriter::new();
    rewriter.rewrite_script(&mut ir.entry);
    total.merge(&rewriter.stats);
    total
}

/// The stateful rewriting walk over one script.
pub struct Rewriter {
    state: TypeState,
    stats: RewriteStats,
}

impl Default for Rewriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Rewriter {
    pub fn new() -> Self {
        Self {
            state: TypeState::new(),
            stats: RewriteStats::default(),
        }
    }

    pub fn stats(&self) -> &RewriteStats {
        &self.stats
    }

    pub fn rewrite_script(&mut self, script: &mut Script) {
        self.state = TypeState::new();
        self.walk_stack(&mut script.stack);
    }

    fn walk_stack(&mut self, stack: &mut Stack) {
        for block in stack.iter_mut() {
            self.walk_block(block);
        }
    }

    fn walk_block(&mut self, block: &mut StackBlock) {
        let yields = block.yields;
        let entry = block.entry_state.clone();
        let exit = block.exit_state.clone();
        match &mut block.kind {
            StackKind::VarSet { var, value } => {
                self.rewrite_input(value);
                let ty = value.ty;
                if yields {
                    self.state.clear();
                }
                self.state.set(&var.id, ty);
            }
            StackKind::IfElse {
                condition,
                then_branch,
                else_branch,
            } => {
                self.rewrite_input(condition);
                if yields {
                    self.state.clear();
                }
                let mut other = self.state.clone();
                std::mem::swap(&mut self.state, &mut other);
                self.walk_stack(then_branch);
                std::mem::swap(&mut self.state, &mut other);
                self.walk_stack(else_branch);
                self.state.or(&other);
            }
            StackKind::While { condition, body } => {
                // The condition re-evaluates each iteration: rewrite it
                // under the loop invariant, like the body.
                self.state = entry.unwrap_or_default();
                self.rewrite_input(condition);
                self.walk_stack(body);
                self.state = exit.unwrap_or_default();
            }
            StackKind::Repeat { times, body } => {
                // The iteration count is evaluated once, before the loop.
                self.rewrite_input(times);
                self.state = entry.unwrap_or_default();
                self.walk_stack(body);
                self.state = exit.unwrap_or_default();
            }
            StackKind::For { count, body, .. } => {
                self.rewrite_input(count);
                self.state = entry.unwrap_or_default();
                self.walk_stack(body);
                self.state = exit.unwrap_or_default();
            }
            StackKind::ProcedureCall { arguments, .. } => {
                for argument in arguments.iter_mut() {
                    self.rewrite_input(argument);
                }
                self.state.clear();
            }
            StackKind::CompatibilityLayer(call) => {
                for (_, input) in call.inputs.iter_mut() {
                    self.rewrite_input(input);
                }
                self.state.clear();
            }
            StackKind::AddonCall { arguments, .. } => {
                for (_, input) in arguments.iter_mut() {
                    self.rewrite_input(input);
                }
                self.state.clear();
            }
            StackKind::EventBroadcastAndWait { broadcast } => {
                self.rewrite_input(broadcast);
                self.state.clear();
            }
            other => {
                for input in other.inputs_mut() {
                    self.rewrite_input(input);
                }
                if yields {
                    self.state.clear();
                }
            }
        }
    }

    /// Bottom-up rewrite of one expression tree.
    fn rewrite_input(&mut self, input: &mut Input) {
        for child in input.children_mut() {
            self.rewrite_input(child);
        }
        if let InputKind::Cast { kind, value } = &input.kind {
            if let InputKind::Constant(v) = &value.kind {
                *input = Input::constant(kind.apply(v));
                self.stats.constants_folded += 1;
                return;
            }
            if value.ty.is_always(kind.target_type()) {
                let old = std::mem::replace(
                    &mut input.kind,
                    InputKind::Constant(Value::Bool(false)),
                );
                if let InputKind::Cast { value, .. } = old {
                    *input = *value;
                }
                self.stats.casts_dropped += 1;
                return;
            }
        }
        input.ty = type_of(input, &self.state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer;
    use crate::ir::{BinaryOp, VarRef};
    use crate::lattice::ValueType;

    fn var_x() -> VarRef {
        VarRef::target("x", "x")
    }

    fn set_x(value: Input) -> StackBlock {
        StackBlock::new(StackKind::VarSet {
            var: var_x(),
            value,
        })
    }

    #[test]
    fn test_redundant_cast_is_dropped() {
        // x := 3; x := (x as number)
        let mut ir = Ir::new(Script::new("top"));
        ir.entry.stack = vec![
            set_x(Input::number(3.0)),
            set_x(
                Input::var_get(var_x())
                    .to_type(ValueType::NUMBER)
                    .unwrap(),
            ),
        ];
        analyzer::analyze(&mut ir);
        let stats = optimize(&mut ir);
        assert_eq!(stats.casts_dropped, 1);
        let StackKind::VarSet { value, .. } = &ir.entry.stack[1].kind else {
            panic!("expected VarSet");
        };
        assert!(matches!(value.kind, InputKind::VarGet(_)));
        assert_eq!(value.ty, ValueType::POS_INT);
    }

    #[test]
    fn test_required_cast_survives() {
        // x := "hello"; x := (x as number)
        let mut ir = Ir::new(Script::new("top"));
        ir.entry.stack = vec![
            set_x(Input::string("hello")),
            set_x(
                Input::var_get(var_x())
                    .to_type(ValueType::NUMBER)
                    .unwrap(),
            ),
        ];
        analyzer::analyze(&mut ir);
        let stats = optimize(&mut ir);
        assert_eq!(stats.casts_dropped, 0);
        let StackKind::VarSet { value, .. } = &ir.entry.stack[1].kind else {
            panic!("expected VarSet");
        };
        assert!(matches!(value.kind, InputKind::Cast { .. }));
        // A non-numeric string always coerces to 0.
        assert_eq!(value.ty, ValueType::ZERO);
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let mut ir = Ir::new(Script::new("top"));
        ir.entry.stack = vec![
            set_x(Input::string("3")),
            set_x(Input::binary(
                BinaryOp::Add,
                Input::var_get(var_x()).to_type(ValueType::NUMBER).unwrap(),
                Input::number(4.0),
            )),
        ];
        analyzer::analyze(&mut ir);
        optimize(&mut ir);
        let once = ir.entry.stack.clone();
        analyzer::analyze(&mut ir);
        optimize(&mut ir);
        assert_eq!(once, ir.entry.stack);
    }

    #[test]
    fn test_loop_keeps_widening_cast() {
        // y starts as a string; the loop keeps adding 1, so inside the
        // loop y may be either and the numeric cast must stay.
        let var_y = VarRef::target("y", "y");
        let body = vec![StackBlock::new(StackKind::VarSet {
            var: var_y.clone(),
            value: Input::binary(
                BinaryOp::Add,
                Input::var_get(var_y.clone())
                    .to_type(ValueType::NUMBER)
                    .unwrap(),
                Input::number(1.0),
            ),
        })];
        let mut ir = Ir::new(Script::new("top"));
        ir.entry.is_warp = true;
        ir.entry.stack = vec![
            StackBlock::new(StackKind::VarSet {
                var: var_y.clone(),
                value: Input::string("start"),
            }),
            StackBlock::new(StackKind::While {
                condition: Input::constant(true),
                body,
            }),
        ];
        analyzer::analyze(&mut ir);
        let stats = optimize(&mut ir);
        assert_eq!(stats.casts_dropped, 0);
        let StackKind::While { body, .. } = &ir.entry.stack[1].kind else {
            panic!("expected While");
        };
        let StackKind::VarSet { value, .. } = &body[0].kind else {
            panic!("expected VarSet");
        };
        let InputKind::Binary { left, .. } = &value.kind else {
            panic!("expected Add");
        };
        assert!(matches!(left.kind, InputKind::Cast { .. }));
    }
}
