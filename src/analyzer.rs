//! Dataflow type analysis over the IR.
//!
//! The analyzer threads one [`TypeState`] through each script in execution
//! order. Straight-line statements transfer the state directly, branches
//! fork and re-join it, and loops iterate to a fixed point (the lattice is
//! a finite bitset and every transfer function is monotone, so the
//! iteration terminates). Blocks are annotated with their entry and exit
//! states for the rewriter; annotations are joined when a block is
//! revisited.
//!
//! Anything that can suspend the script clears the state: after a yield
//! another script may have written any variable, so no refinement survives
//! it. Procedure calls are treated the same way until call summaries exist.
//!
//! The analyzer is infallible: a transfer function without a case for some
//! node keeps the node's previous type, which is a safe over-approximation.

use crate::ir::{
    BinaryOp, CastKind, Input, InputKind, Ir, Script, Stack, StackBlock, StackKind, UnaryOp,
};
use crate::lattice::ValueType;
use crate::state::TypeState;

/// Analyze every procedure variant the entry depends on (dependencies
/// first, each from a fresh state), then the entry script.
pub fn analyze(ir: &mut Ir) {
    for code in ir.dependency_order() {
        if let Some(script) = ir.procedures.get_mut(&code) {
            Analyzer::new().analyze_script(script);
        }
    }
    Analyzer::new().analyze_script(&mut ir.entry);
}

/// The stateful walk over one script.
pub struct Analyzer {
    state: TypeState,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            state: TypeState::new(),
        }
    }

    pub fn analyze_script(&mut self, script: &mut Script) {
        self.state = TypeState::new();
        self.walk_stack(&mut script.stack);
    }

    /// The state after everything analyzed so far (test hook).
    pub fn state(&self) -> &TypeState {
        &self.state
    }

    fn walk_stack(&mut self, stack: &mut Stack) {
        for block in stack.iter_mut() {
            self.walk_block(block);
        }
    }

    fn walk_block(&mut self, block: &mut StackBlock) {
        let yields = block.yields;
        // Loops overwrite this with their converged invariant.
        let mut entry = self.state.clone();
        match &mut block.kind {
            StackKind::VarSet { var, value } => {
                let ty = type_of(value, &self.state);
                // A yield during input evaluation invalidates every other
                // refinement, but the computed value itself is in hand.
                if yields {
                    self.state.clear();
                }
                self.state.set(&var.id, ty);
            }
            StackKind::IfElse {
                then_branch,
                else_branch,
                ..
            } => {
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
            StackKind::While { body, .. } | StackKind::Repeat { body, .. } => {
                entry = self.run_loop(yields, body, None);
            }
            StackKind::For { variable, body, .. } => {
                let var_id = variable.id.clone();
                entry = self.run_loop(yields, body, Some(&var_id));
            }
            StackKind::ProcedureCall { code, .. } => {
                if self.call_summary(code).is_none() {
                    self.state.clear();
                }
            }
            StackKind::CompatibilityLayer(_)
            | StackKind::AddonCall { .. }
            | StackKind::EventBroadcastAndWait { .. } => {
                // May reach user code in other scripts.
                self.state.clear();
            }
            _ => {
                if yields {
                    self.state.clear();
                }
            }
        }
        join_annotation(&mut block.entry_state, &entry);
        join_annotation(&mut block.exit_state, &self.state);
    }

    /// Analyze a loop body. Non-yielding loops iterate to a fixed point;
    /// loops that yield at their head clear the state first, which makes
    /// a single body pass sufficient (the state is already top for every
    /// mutated variable). Returns the entry state holding at the start of
    /// each iteration.
    fn run_loop(&mut self, yields: bool, body: &mut Stack, loop_var: Option<&str>) -> TypeState {
        if yields {
            self.state.clear();
            if let Some(var) = loop_var {
                self.state.set(var, ValueType::POS_INT);
            }
            let entry = self.state.clone();
            self.walk_stack(body);
            // The loop head yields again before both the next iteration
            // and the exit check.
            self.state.clear();
            entry
        } else {
            loop {
                let snapshot = self.state.clone();
                if let Some(var) = loop_var {
                    self.state.set(var, ValueType::POS_INT);
                }
                self.walk_stack(body);
                let body_exit = std::mem::replace(&mut self.state, snapshot);
                if !self.state.or(&body_exit) {
                    break;
                }
            }
            let mut entry = self.state.clone();
            if let Some(var) = loop_var {
                entry.set(var, ValueType::POS_INT);
            }
            entry
        }
    }

    /// Effect summary of a procedure variant. Always `None` for now, which
    /// makes calls clear the state at the call site; the seam is here so
    /// summary-based refinement can slot in without touching the walk.
    fn call_summary(&self, _code: &str) -> Option<TypeState> {
        None
    }
}

fn join_annotation(slot: &mut Option<TypeState>, state: &TypeState) {
    match slot {
        Some(existing) => {
            existing.or(state);
        }
        None => *slot = Some(state.clone()),
    }
}

/// The refined result type of an input under the given state.
pub fn type_of(input: &Input, state: &TypeState) -> ValueType {
    match &input.kind {
        InputKind::Constant(v) => ValueType::of_value(v),
        InputKind::VarGet(var) => state.get(&var.id),
        InputKind::Cast { kind, value } => {
            let inner = type_of(value, state);
            match kind {
                CastKind::Number => cast_number_type(inner),
                CastKind::NumberOrNan => cast_number_or_nan_type(inner),
                CastKind::NumberIndex => cast_number_index_type(inner),
                CastKind::Boolean => ValueType::BOOLEAN,
                CastKind::String => ValueType::ANY_STRING,
            }
        }
        InputKind::Binary { op, left, right } => {
            let l = type_of(left, state);
            let r = type_of(right, state);
            match op {
                BinaryOp::Add => add_type(l, r),
                BinaryOp::Sub => sub_type(l, r),
                BinaryOp::Mul => mul_type(l, r),
                BinaryOp::Div => div_type(l, r),
                BinaryOp::Mod => ValueType::NUMBER_OR_NAN,
                BinaryOp::Random => random_type(l, r),
                _ => input.ty,
            }
        }
        InputKind::Unary { op, value } => {
            let v = type_of(value, state);
            match op {
                UnaryOp::Abs => abs_type(v),
                UnaryOp::Floor => floor_type(v),
                UnaryOp::Ceil => ceil_type(v),
                UnaryOp::Round => round_type(v),
                _ => input.ty,
            }
        }
        _ => input.ty,
    }
}

/// The image of a type under the NaN-scrubbing numeric coercion. This is
/// what an arithmetic operand looks like at runtime: NaN and non-numeric
/// strings become 0, booleans become 0 or 1, numeric strings can be any
/// number.
pub fn cast_number_type(t: ValueType) -> ValueType {
    let mut out = t & ValueType::NUMBER;
    if t.is_sometimes(ValueType::NAN | ValueType::STRING) {
        out |= ValueType::ZERO;
    }
    if t.is_sometimes(ValueType::BOOLEAN) {
        out |= ValueType::ZERO | ValueType::POS_INT;
    }
    if t.is_sometimes(ValueType::STRING_NUM) {
        out |= ValueType::NUMBER;
    }
    if out.is_empty() {
        ValueType::NUMBER
    } else {
        out
    }
}

/// The image of a type under the lossless numeric coercion.
pub fn cast_number_or_nan_type(t: ValueType) -> ValueType {
    let mut out = t & ValueType::NUMBER_OR_NAN;
    if t.is_sometimes(ValueType::STRING) {
        out |= ValueType::NAN;
    }
    if t.is_sometimes(ValueType::BOOLEAN) {
        out |= ValueType::ZERO | ValueType::POS_INT;
    }
    if t.is_sometimes(ValueType::STRING_NUM) {
        out |= ValueType::NUMBER;
    }
    if out.is_empty() {
        ValueType::NUMBER_OR_NAN
    } else {
        out
    }
}

/// Lossless numeric coercion followed by truncation toward zero.
pub fn cast_number_index_type(t: ValueType) -> ValueType {
    let n = cast_number_or_nan_type(t);
    let mut out = n & !ValueType::FRACT;
    if n.is_sometimes(ValueType::POS_FRACT) {
        out |= ValueType::POS_INT | ValueType::ZERO;
    }
    if n.is_sometimes(ValueType::NEG_FRACT) {
        out |= ValueType::NEG_INT | ValueType::NEG_ZERO;
    }
    out
}

fn negate_number(t: ValueType) -> ValueType {
    let swaps = [
        (ValueType::POS_INT, ValueType::NEG_INT),
        (ValueType::POS_FRACT, ValueType::NEG_FRACT),
        (ValueType::POS_INF, ValueType::NEG_INF),
        (ValueType::ZERO, ValueType::NEG_ZERO),
    ];
    let mut out = t & ValueType::NAN;
    for (pos, neg) in swaps {
        if t.is_sometimes(pos) {
            out |= neg;
        }
        if t.is_sometimes(neg) {
            out |= pos;
        }
    }
    out
}

/// IEEE-754 addition over atom groups. Operands are taken after numeric
/// coercion, so neither side contains NaN; NaN can only be produced by
/// opposite infinities.
pub fn add_type(a: ValueType, b: ValueType) -> ValueType {
    let a = cast_number_type(a);
    let b = cast_number_type(b);
    let fract = a.is_sometimes(ValueType::FRACT) || b.is_sometimes(ValueType::FRACT);
    let mut out = ValueType::empty();

    let a_pi = a.is_sometimes(ValueType::POS_INF);
    let a_ni = a.is_sometimes(ValueType::NEG_INF);
    let b_pi = b.is_sometimes(ValueType::POS_INF);
    let b_ni = b.is_sometimes(ValueType::NEG_INF);
    if a_pi && b_ni || a_ni && b_pi {
        out |= ValueType::NAN;
    }
    let not_ninf = ValueType::NUMBER & !ValueType::NEG_INF;
    let not_pinf = ValueType::NUMBER & !ValueType::POS_INF;
    if a_pi && b.is_sometimes(not_ninf) || b_pi && a.is_sometimes(not_ninf) {
        out |= ValueType::POS_INF;
    }
    if a_ni && b.is_sometimes(not_pinf) || b_ni && a.is_sometimes(not_pinf) {
        out |= ValueType::NEG_INF;
    }

    let a_z = a.is_sometimes(ValueType::ZERO);
    let a_nz = a.is_sometimes(ValueType::NEG_ZERO);
    let b_z = b.is_sometimes(ValueType::ZERO);
    let b_nz = b.is_sometimes(ValueType::NEG_ZERO);
    if a_z && b_z || a_z && b_nz || a_nz && b_z {
        out |= ValueType::ZERO;
    }
    if a_nz && b_nz {
        out |= ValueType::NEG_ZERO;
    }
    // A zero passes the other operand through exactly.
    if a_z || a_nz {
        out |= b & (ValueType::POS_REAL | ValueType::NEG_REAL);
    }
    if b_z || b_nz {
        out |= a & (ValueType::POS_REAL | ValueType::NEG_REAL);
    }

    let a_p = a.is_sometimes(ValueType::POS_REAL);
    let a_n = a.is_sometimes(ValueType::NEG_REAL);
    let b_p = b.is_sometimes(ValueType::POS_REAL);
    let b_n = b.is_sometimes(ValueType::NEG_REAL);
    if a_p && b_p {
        out |= ValueType::POS_INT | ValueType::POS_INF;
        if fract {
            out |= ValueType::POS_FRACT;
        }
    }
    if a_n && b_n {
        out |= ValueType::NEG_INT | ValueType::NEG_INF;
        if fract {
            out |= ValueType::NEG_FRACT;
        }
    }
    if a_p && b_n || a_n && b_p {
        out |= ValueType::POS_INT | ValueType::NEG_INT | ValueType::ZERO;
        if fract {
            out |= ValueType::FRACT;
        }
    }
    out
}

/// Subtraction: `a - b` behaves as `a + (-b)`.
pub fn sub_type(a: ValueType, b: ValueType) -> ValueType {
    add_type(a, negate_number(cast_number_type(b)))
}

/// IEEE-754 multiplication over atom groups.
pub fn mul_type(a: ValueType, b: ValueType) -> ValueType {
    let a = cast_number_type(a);
    let b = cast_number_type(b);
    let fract = a.is_sometimes(ValueType::FRACT) || b.is_sometimes(ValueType::FRACT);
    let mut out = ValueType::empty();

    let a_inf = a.is_sometimes(ValueType::INF);
    let b_inf = b.is_sometimes(ValueType::INF);
    let a_zero = a.is_sometimes(ValueType::ANY_ZERO);
    let b_zero = b.is_sometimes(ValueType::ANY_ZERO);
    if a_inf && b_zero || b_inf && a_zero {
        out |= ValueType::NAN;
    }

    let a_pi = a.is_sometimes(ValueType::POS_INF);
    let a_ni = a.is_sometimes(ValueType::NEG_INF);
    let b_pi = b.is_sometimes(ValueType::POS_INF);
    let b_ni = b.is_sometimes(ValueType::NEG_INF);
    let a_posish = a.is_sometimes(ValueType::POS_REAL | ValueType::POS_INF);
    let a_negish = a.is_sometimes(ValueType::NEG_REAL | ValueType::NEG_INF);
    let b_posish = b.is_sometimes(ValueType::POS_REAL | ValueType::POS_INF);
    let b_negish = b.is_sometimes(ValueType::NEG_REAL | ValueType::NEG_INF);
    if a_pi && b_posish || b_pi && a_posish || a_ni && b_negish || b_ni && a_negish {
        out |= ValueType::POS_INF;
    }
    if a_pi && b_negish || b_pi && a_negish || a_ni && b_posish || b_ni && a_posish {
        out |= ValueType::NEG_INF;
    }

    // A zero times anything finite is a zero whose sign is the product of
    // the operand signs.
    let a_zp = a.is_sometimes(ValueType::ZERO);
    let a_zn = a.is_sometimes(ValueType::NEG_ZERO);
    let b_zp = b.is_sometimes(ValueType::ZERO);
    let b_zn = b.is_sometimes(ValueType::NEG_ZERO);
    let a_posz = a.is_sometimes(ValueType::ZERO | ValueType::POS_REAL);
    let a_negz = a.is_sometimes(ValueType::NEG_ZERO | ValueType::NEG_REAL);
    let b_posz = b.is_sometimes(ValueType::ZERO | ValueType::POS_REAL);
    let b_negz = b.is_sometimes(ValueType::NEG_ZERO | ValueType::NEG_REAL);
    if a_zp && b_posz || a_zn && b_negz || b_zp && a_posz || b_zn && a_negz {
        out |= ValueType::ZERO;
    }
    if a_zp && b_negz || a_zn && b_posz || b_zp && a_negz || b_zn && a_posz {
        out |= ValueType::NEG_ZERO;
    }

    // Finite nonzero products can overflow to infinity and underflow to a
    // signed zero.
    let a_p = a.is_sometimes(ValueType::POS_REAL);
    let a_n = a.is_sometimes(ValueType::NEG_REAL);
    let b_p = b.is_sometimes(ValueType::POS_REAL);
    let b_n = b.is_sometimes(ValueType::NEG_REAL);
    if a_p && b_p || a_n && b_n {
        out |= ValueType::POS_INT | ValueType::POS_INF | ValueType::ZERO;
        if fract {
            out |= ValueType::POS_FRACT;
        }
    }
    if a_p && b_n || a_n && b_p {
        out |= ValueType::NEG_INT | ValueType::NEG_INF | ValueType::NEG_ZERO;
        if fract {
            out |= ValueType::NEG_FRACT;
        }
    }
    out
}

/// IEEE-754 division over atom groups.
pub fn div_type(a: ValueType, b: ValueType) -> ValueType {
    let a = cast_number_type(a);
    let b = cast_number_type(b);
    let mut out = ValueType::empty();

    let a_inf = a.is_sometimes(ValueType::INF);
    let b_inf = b.is_sometimes(ValueType::INF);
    let a_zero = a.is_sometimes(ValueType::ANY_ZERO);
    let b_zero = b.is_sometimes(ValueType::ANY_ZERO);
    if a_inf && b_inf || a_zero && b_zero {
        out |= ValueType::NAN;
    }

    let a_pi = a.is_sometimes(ValueType::POS_INF);
    let a_ni = a.is_sometimes(ValueType::NEG_INF);
    let b_pi = b.is_sometimes(ValueType::POS_INF);
    let b_ni = b.is_sometimes(ValueType::NEG_INF);
    let a_p = a.is_sometimes(ValueType::POS_REAL);
    let a_n = a.is_sometimes(ValueType::NEG_REAL);
    let b_p = b.is_sometimes(ValueType::POS_REAL);
    let b_n = b.is_sometimes(ValueType::NEG_REAL);
    let b_zp = b.is_sometimes(ValueType::ZERO);
    let b_zn = b.is_sometimes(ValueType::NEG_ZERO);

    // Infinite results: an infinite numerator over anything finite, or a
    // finite nonzero numerator over a zero.
    if a_pi && b.is_sometimes(ValueType::POS_REAL | ValueType::ZERO)
        || a_ni && b.is_sometimes(ValueType::NEG_REAL | ValueType::NEG_ZERO)
        || a_p && b_zp
        || a_n && b_zn
    {
        out |= ValueType::POS_INF;
    }
    if a_pi && b.is_sometimes(ValueType::NEG_REAL | ValueType::NEG_ZERO)
        || a_ni && b.is_sometimes(ValueType::POS_REAL | ValueType::ZERO)
        || a_p && b_zn
        || a_n && b_zp
    {
        out |= ValueType::NEG_INF;
    }

    // Zero results: a zero numerator over anything nonzero, or a finite
    // numerator over an infinity.
    let a_zp2 = a.is_sometimes(ValueType::ZERO);
    let a_zn2 = a.is_sometimes(ValueType::NEG_ZERO);
    if a_zp2 && b.is_sometimes(ValueType::POS_REAL | ValueType::POS_INF)
        || a_zn2 && b.is_sometimes(ValueType::NEG_REAL | ValueType::NEG_INF)
        || a_p && b_pi
        || a_n && b_ni
    {
        out |= ValueType::ZERO;
    }
    if a_zp2 && b.is_sometimes(ValueType::NEG_REAL | ValueType::NEG_INF)
        || a_zn2 && b.is_sometimes(ValueType::POS_REAL | ValueType::POS_INF)
        || a_p && b_ni
        || a_n && b_pi
    {
        out |= ValueType::NEG_ZERO;
    }

    // Finite nonzero quotients span the whole sign range: they can be
    // fractional, overflow to infinity or underflow to a signed zero.
    if a_p && b_p || a_n && b_n {
        out |= ValueType::POS_INT | ValueType::POS_FRACT | ValueType::POS_INF | ValueType::ZERO;
    }
    if a_p && b_n || a_n && b_p {
        out |= ValueType::NEG_INT | ValueType::NEG_FRACT | ValueType::NEG_INF | ValueType::NEG_ZERO;
    }
    out
}

fn random_type(a: ValueType, b: ValueType) -> ValueType {
    let ints = ValueType::POS_INT | ValueType::NEG_INT | ValueType::ANY_ZERO;
    if cast_number_type(a).is_always(ints) && cast_number_type(b).is_always(ints) {
        ValueType::POS_INT | ValueType::NEG_INT | ValueType::ZERO
    } else {
        ValueType::NUMBER
    }
}

fn abs_type(t: ValueType) -> ValueType {
    let t = cast_number_type(t);
    let mut out = t & (ValueType::POS | ValueType::ZERO);
    if t.is_sometimes(ValueType::NEG_INT) {
        out |= ValueType::POS_INT;
    }
    if t.is_sometimes(ValueType::NEG_FRACT) {
        out |= ValueType::POS_FRACT;
    }
    if t.is_sometimes(ValueType::NEG_INF) {
        out |= ValueType::POS_INF;
    }
    if t.is_sometimes(ValueType::NEG_ZERO) {
        out |= ValueType::ZERO;
    }
    out
}

fn floor_type(t: ValueType) -> ValueType {
    let t = cast_number_type(t);
    let mut out = t & !ValueType::FRACT;
    if t.is_sometimes(ValueType::POS_FRACT) {
        out |= ValueType::POS_INT | ValueType::ZERO;
    }
    if t.is_sometimes(ValueType::NEG_FRACT) {
        out |= ValueType::NEG_INT;
    }
    out
}

fn ceil_type(t: ValueType) -> ValueType {
    let t = cast_number_type(t);
    let mut out = t & !ValueType::FRACT;
    if t.is_sometimes(ValueType::POS_FRACT) {
        out |= ValueType::POS_INT;
    }
    if t.is_sometimes(ValueType::NEG_FRACT) {
        out |= ValueType::NEG_INT | ValueType::NEG_ZERO;
    }
    out
}

fn round_type(t: ValueType) -> ValueType {
    let t = cast_number_type(t);
    let mut out = t & !ValueType::FRACT;
    if t.is_sometimes(ValueType::POS_FRACT) {
        out |= ValueType::POS_INT | ValueType::ZERO;
    }
    if t.is_sometimes(ValueType::NEG_FRACT) {
        out |= ValueType::NEG_INT | ValueType::NEG_ZERO;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::VarRef;
    use crate::value::Value;

    #[test]
    fn test_add_positive_operands() {
        let t = add_type(ValueType::POS_INT, ValueType::POS_INT);
        assert_eq!(t, ValueType::POS_INT | ValueType::POS_INF);

        let t = add_type(ValueType::POS_INT, ValueType::POS_FRACT);
        assert_eq!(
            t,
            ValueType::POS_INT | ValueType::POS_FRACT | ValueType::POS_INF
        );
    }

    #[test]
    fn test_add_mixed_signs_includes_zero() {
        let t = add_type(ValueType::POS_INT, ValueType::NEG_INT);
        assert!(t.is_sometimes(ValueType::ZERO));
        assert!(t.is_sometimes(ValueType::POS_INT));
        assert!(t.is_sometimes(ValueType::NEG_INT));
        assert!(!t.is_sometimes(ValueType::INF));
        assert!(!t.is_sometimes(ValueType::NAN));
    }

    #[test]
    fn test_add_opposite_infinities_is_nan() {
        let t = add_type(ValueType::POS_INF, ValueType::NEG_INF);
        assert_eq!(t, ValueType::NAN);
        let t = sub_type(ValueType::POS_INF, ValueType::POS_INF);
        assert_eq!(t, ValueType::NAN);
    }

    #[test]
    fn test_add_zero_passes_operand_through() {
        let t = add_type(ValueType::ZERO, ValueType::POS_FRACT);
        assert_eq!(t, ValueType::POS_FRACT);
        let t = add_type(ValueType::NEG_ZERO, ValueType::NEG_ZERO);
        assert_eq!(t, ValueType::NEG_ZERO);
        let t = add_type(ValueType::ZERO, ValueType::NEG_ZERO);
        assert_eq!(t, ValueType::ZERO);
    }

    #[test]
    fn test_mul_zero_and_infinity_is_nan() {
        let t = mul_type(ValueType::POS_INF, ValueType::ZERO);
        assert_eq!(t, ValueType::NAN);
    }

    #[test]
    fn test_mul_sign_products() {
        let t = mul_type(ValueType::NEG_INT, ValueType::NEG_INT);
        assert!(t.is_always(ValueType::POS_INT | ValueType::POS_INF | ValueType::ZERO));
        let t = mul_type(ValueType::ZERO, ValueType::NEG_INT);
        assert_eq!(t, ValueType::NEG_ZERO);
    }

    #[test]
    fn test_div_one_by_zero_is_positive_infinity() {
        let t = div_type(ValueType::POS_INT, ValueType::ZERO);
        assert_eq!(t, ValueType::POS_INF);
        let t = div_type(ValueType::ZERO, ValueType::ZERO);
        assert_eq!(t, ValueType::NAN);
        let t = div_type(ValueType::NEG_INT, ValueType::ZERO);
        assert_eq!(t, ValueType::NEG_INF);
    }

    #[test]
    fn test_div_real_operands_span_everything_signed() {
        let t = div_type(ValueType::POS_INT, ValueType::POS_INT);
        assert!(t.is_sometimes(ValueType::POS_FRACT));
        assert!(t.is_sometimes(ValueType::POS_INF));
        assert!(t.is_sometimes(ValueType::ZERO));
        assert!(!t.is_sometimes(ValueType::NEG));
        assert!(!t.is_sometimes(ValueType::NAN));
    }

    #[test]
    fn test_cast_number_scrubs_nan() {
        let t = cast_number_type(ValueType::POS_INF | ValueType::NAN);
        assert_eq!(t, ValueType::POS_INF | ValueType::ZERO);
        // A non-numeric string coerces to NaN, then to 0.
        assert_eq!(cast_number_type(ValueType::STRING), ValueType::ZERO);
        assert_eq!(cast_number_type(ValueType::STRING_NUM), ValueType::NUMBER);
    }

    #[test]
    fn test_cast_number_or_nan_keeps_nan() {
        let t = cast_number_or_nan_type(ValueType::STRING);
        assert_eq!(t, ValueType::NAN);
        let t = cast_number_or_nan_type(ValueType::POS_INT | ValueType::NAN);
        assert_eq!(t, ValueType::POS_INT | ValueType::NAN);
    }

    #[test]
    fn test_cast_number_index_truncates() {
        let t = cast_number_index_type(ValueType::POS_FRACT);
        assert_eq!(t, ValueType::POS_INT | ValueType::ZERO);
        let t = cast_number_index_type(ValueType::NEG_FRACT);
        assert_eq!(t, ValueType::NEG_INT | ValueType::NEG_ZERO);
    }

    #[test]
    fn test_rounding_maps() {
        assert_eq!(
            floor_type(ValueType::POS_FRACT),
            ValueType::POS_INT | ValueType::ZERO
        );
        assert_eq!(ceil_type(ValueType::POS_FRACT), ValueType::POS_INT);
        assert_eq!(
            ceil_type(ValueType::NEG_FRACT),
            ValueType::NEG_INT | ValueType::NEG_ZERO
        );
        assert_eq!(
            abs_type(ValueType::NEG_FRACT | ValueType::NEG_ZERO),
            ValueType::POS_FRACT | ValueType::ZERO
        );
    }

    #[test]
    fn test_var_get_reads_state() {
        let mut state = TypeState::new();
        state.set("x", ValueType::POS_INT);
        let input = Input::var_get(VarRef::target("x", "x"));
        assert_eq!(type_of(&input, &state), ValueType::POS_INT);
        assert_eq!(
            type_of(&Input::var_get(VarRef::target("y", "y")), &state),
            ValueType::ANY
        );
    }

    #[test]
    fn test_constant_literal_type() {
        let state = TypeState::new();
        assert_eq!(
            type_of(&Input::constant(Value::Number(7.0)), &state),
            ValueType::POS_INT
        );
    }
}
