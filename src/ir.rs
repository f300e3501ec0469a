//! Intermediate representation of scripts.
//!
//! A script is a tree: *inputs* are expressions that produce a value and
//! carry a refined type, *stack blocks* are statements executed in order.
//! Both kinds are tagged variants with typed payloads; nested stacks hang
//! off the control blocks. The front-end lowers the raw block graph into
//! this shape; the analyzer annotates it; the rewriter transforms it; the
//! code generator consumes it.

use crate::codegen::CompiledScript;
use crate::error::{CompileError, CompileResult};
use crate::lattice::ValueType;
use crate::state::TypeState;
use crate::value::Value;
use std::collections::HashMap;
use std::rc::Rc;

/// Where a variable or list lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarScope {
    /// Owned by the sprite the script runs on.
    Target,
    /// Owned by the stage (a global).
    Stage,
}

/// A resolved reference to a variable.
#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    pub id: String,
    pub name: String,
    pub scope: VarScope,
    pub is_cloud: bool,
}

impl VarRef {
    pub fn target(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            scope: VarScope::Target,
            is_cloud: false,
        }
    }

    pub fn stage(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            scope: VarScope::Stage,
            is_cloud: false,
        }
    }
}

/// A resolved reference to a list.
#[derive(Debug, Clone, PartialEq)]
pub struct ListRef {
    pub id: String,
    pub name: String,
    pub scope: VarScope,
}

impl ListRef {
    pub fn target(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            scope: VarScope::Target,
        }
    }
}

/// The coercion a cast node applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    /// Host truthiness ("", "0" and "false" are false).
    Boolean,
    /// Numeric coercion with NaN replaced by 0; preserves -0.
    Number,
    /// Lossless numeric coercion; may produce NaN.
    NumberOrNan,
    /// Numeric coercion followed by truncation toward zero.
    NumberIndex,
    /// Host string coercion.
    String,
}

impl CastKind {
    /// The set of types the cast can produce. A cast whose operand is
    /// already inside this set is redundant.
    pub fn target_type(self) -> ValueType {
        match self {
            CastKind::Boolean => ValueType::BOOLEAN,
            CastKind::Number => ValueType::NUMBER,
            CastKind::NumberOrNan => ValueType::NUMBER_OR_NAN,
            CastKind::NumberIndex => ValueType::NUMBER_INDEX,
            CastKind::String => ValueType::ANY_STRING,
        }
    }

    /// Apply the cast to a literal at build time.
    pub fn apply(self, v: &Value) -> Value {
        match self {
            CastKind::Boolean => Value::Bool(v.to_boolean()),
            CastKind::Number => Value::Number(v.to_number()),
            CastKind::NumberOrNan => Value::Number(v.to_number_or_nan()),
            CastKind::NumberIndex => Value::Number(v.to_number_or_nan().trunc()),
            CastKind::String => Value::String(v.to_js_string()),
        }
    }
}

/// Two-operand operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Eq,
    Lt,
    Gt,
    Join,
    LetterOf,
    Contains,
    Random,
}

/// One-operand operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Len,
    Abs,
    Floor,
    Ceil,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Ln,
    Log10,
    PowE,
    Pow10,
    Round,
}

/// How a procedure argument is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// A string/number argument slot.
    StringNumber,
    /// A boolean argument slot.
    Boolean,
}

/// A declared procedure argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub kind: ArgKind,
}

impl Argument {
    pub fn string_number(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ArgKind::StringNumber,
        }
    }

    pub fn boolean(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ArgKind::Boolean,
        }
    }
}

/// A call routed through the runtime's interpreter shim. Used for blocks
/// the compiler has no dedicated lowering for.
#[derive(Debug, Clone, PartialEq)]
pub struct CompatCall {
    pub opcode: String,
    pub block_id: String,
    pub inputs: Vec<(String, Input)>,
    pub fields: Vec<(String, String)>,
}

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum InputKind {
    Constant(Value),
    VarGet(VarRef),
    ListGet { list: ListRef, index: Box<Input> },
    ListLength(ListRef),
    ListContains { list: ListRef, item: Box<Input> },
    ListIndexOf { list: ListRef, item: Box<Input> },
    ListContents(ListRef),
    ProcedureArg { index: usize, kind: ArgKind },
    Cast { kind: CastKind, value: Box<Input> },
    Binary { op: BinaryOp, left: Box<Input>, right: Box<Input> },
    Unary { op: UnaryOp, value: Box<Input> },
    MotionX,
    MotionY,
    MotionDirection,
    LooksSize,
    LooksCostumeNumber,
    LooksCostumeName,
    SensingTimer,
    SensingMouseX,
    SensingMouseY,
    SensingMouseDown,
    SensingKeyDown(Box<Input>),
    SensingDistance(Box<Input>),
    SensingDaysSince2000,
    SensingUsername,
    SensingAnswer,
    SensingTouchingObject(Box<Input>),
    SensingTouchingColor(Box<Input>),
    SensingColorTouchingColor { color: Box<Input>, mask: Box<Input> },
    SensingOf { object: Box<Input>, property: String },
    CompatibilityLayer(CompatCall),
}

/// An expression with its refined type and yield flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Input {
    pub kind: InputKind,
    pub ty: ValueType,
    pub yields: bool,
}

impl Input {
    /// Wrap an expression node, deriving the default type and yield flag.
    pub fn new(kind: InputKind) -> Self {
        let ty = kind.default_type();
        let yields = kind.yields();
        Self { kind, ty, yields }
    }

    pub fn constant(v: impl Into<Value>) -> Self {
        Self::new(InputKind::Constant(v.into()))
    }

    pub fn number(n: f64) -> Self {
        Self::constant(Value::Number(n))
    }

    pub fn string(s: &str) -> Self {
        Self::constant(Value::String(s.to_string()))
    }

    pub fn var_get(var: VarRef) -> Self {
        Self::new(InputKind::VarGet(var))
    }

    pub fn binary(op: BinaryOp, left: Input, right: Input) -> Self {
        Self::new(InputKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn unary(op: UnaryOp, value: Input) -> Self {
        Self::new(InputKind::Unary {
            op,
            value: Box::new(value),
        })
    }

    /// The stored literal, if this is a constant.
    pub fn as_constant(&self) -> Option<&Value> {
        match &self.kind {
            InputKind::Constant(v) => Some(v),
            _ => None,
        }
    }

    /// True iff this is a CONSTANT whose literal equals `v`. Numbers are
    /// compared after numeric coercion of the stored literal, strings and
    /// booleans against the literal's string/boolean form.
    pub fn is_constant(&self, v: &Value) -> bool {
        let Some(stored) = self.as_constant() else {
            return false;
        };
        match v {
            Value::Number(n) => stored.to_number_or_nan() == *n,
            Value::String(s) => stored.to_js_string() == *s,
            Value::Bool(b) => matches!(stored, Value::Bool(sb) if sb == b),
        }
    }

    /// Coerce this input to `target`, one of BOOLEAN, NUMBER,
    /// NUMBER_OR_NAN, NUMBER_INDEX or ANY_STRING. Returns the node
    /// unchanged when its type is already inside `target`; folds the cast
    /// at build time on constants; otherwise wraps a cast node.
    pub fn to_type(self, target: ValueType) -> CompileResult<Input> {
        if self.ty.is_always(target) {
            return Ok(self);
        }
        let kind = if target == ValueType::BOOLEAN {
            CastKind::Boolean
        } else if target == ValueType::NUMBER {
            CastKind::Number
        } else if target == ValueType::NUMBER_OR_NAN {
            CastKind::NumberOrNan
        } else if target == ValueType::NUMBER_INDEX {
            CastKind::NumberIndex
        } else if target == ValueType::ANY_STRING {
            CastKind::String
        } else {
            return Err(CompileError::ImpossibleCast { target });
        };
        if let InputKind::Constant(v) = &self.kind {
            return Ok(Input::constant(kind.apply(v)));
        }
        let yields = self.yields;
        Ok(Input {
            kind: InputKind::Cast {
                kind,
                value: Box::new(self),
            },
            ty: kind.target_type(),
            yields,
        })
    }

    /// Direct child expressions.
    pub fn children(&self) -> Vec<&Input> {
        self.kind.children()
    }

    /// Direct child expressions, mutable.
    pub fn children_mut(&mut self) -> Vec<&mut Input> {
        self.kind.children_mut()
    }
}

impl InputKind {
    /// The conservative type an input of this shape has before analysis.
    pub fn default_type(&self) -> ValueType {
        use InputKind::*;
        match self {
            Constant(v) => ValueType::of_value(v),
            VarGet(_) | ListGet { .. } | ProcedureArg { kind: ArgKind::StringNumber, .. } => {
                ValueType::ANY
            }
            ProcedureArg { kind: ArgKind::Boolean, .. } => ValueType::BOOLEAN,
            ListLength(_) | ListIndexOf { .. } => ValueType::POS_INT | ValueType::ZERO,
            ListContains { .. } => ValueType::BOOLEAN,
            ListContents(_) => ValueType::ANY_STRING,
            Cast { kind, .. } => kind.target_type(),
            Binary { op, .. } => match op {
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                    ValueType::NUMBER_OR_NAN
                }
                BinaryOp::And
                | BinaryOp::Or
                | BinaryOp::Eq
                | BinaryOp::Lt
                | BinaryOp::Gt
                | BinaryOp::Contains => ValueType::BOOLEAN,
                BinaryOp::Join | BinaryOp::LetterOf => ValueType::ANY_STRING,
                BinaryOp::Random => ValueType::NUMBER,
            },
            Unary { op, .. } => match op {
                UnaryOp::Not => ValueType::BOOLEAN,
                UnaryOp::Len => ValueType::POS_INT | ValueType::ZERO,
                UnaryOp::Abs => ValueType::POS | ValueType::ANY_ZERO,
                UnaryOp::Floor | UnaryOp::Ceil | UnaryOp::Round => {
                    ValueType::NUMBER.meet(!ValueType::FRACT)
                }
                _ => ValueType::NUMBER_OR_NAN,
            },
            MotionX | MotionY | MotionDirection | SensingMouseX | SensingMouseY => ValueType::REAL,
            LooksSize | LooksCostumeNumber => ValueType::POS_INT | ValueType::ZERO,
            LooksCostumeName | SensingUsername | SensingAnswer => ValueType::ANY_STRING,
            SensingTimer | SensingDistance(_) | SensingDaysSince2000 => {
                ValueType::POS_REAL | ValueType::ZERO
            }
            SensingMouseDown
            | SensingKeyDown(_)
            | SensingTouchingObject(_)
            | SensingTouchingColor(_)
            | SensingColorTouchingColor { .. } => ValueType::BOOLEAN,
            SensingOf { .. } | CompatibilityLayer(_) => ValueType::ANY,
        }
    }

    /// Whether evaluating this input can suspend the script.
    pub fn yields(&self) -> bool {
        if matches!(self, InputKind::CompatibilityLayer(_)) {
            return true;
        }
        self.children().iter().any(|c| c.yields)
    }

    pub fn children(&self) -> Vec<&Input> {
        use InputKind::*;
        match self {
            ListGet { index: a, .. }
            | ListContains { item: a, .. }
            | ListIndexOf { item: a, .. }
            | Cast { value: a, .. }
            | Unary { value: a, .. }
            | SensingKeyDown(a)
            | SensingDistance(a)
            | SensingTouchingObject(a)
            | SensingTouchingColor(a)
            | SensingOf { object: a, .. } => vec![a],
            Binary { left, right, .. } => vec![left, right],
            SensingColorTouchingColor { color, mask } => vec![color, mask],
            CompatibilityLayer(call) => call.inputs.iter().map(|(_, i)| i).collect(),
            _ => Vec::new(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Input> {
        use InputKind::*;
        match self {
            ListGet { index: a, .. }
            | ListContains { item: a, .. }
            | ListIndexOf { item: a, .. }
            | Cast { value: a, .. }
            | Unary { value: a, .. }
            | SensingKeyDown(a)
            | SensingDistance(a)
            | SensingTouchingObject(a)
            | SensingTouchingColor(a)
            | SensingOf { object: a, .. } => vec![a],
            Binary { left, right, .. } => vec![left, right],
            SensingColorTouchingColor { color, mask } => vec![color, mask],
            CompatibilityLayer(call) => call.inputs.iter_mut().map(|(_, i)| i).collect(),
            _ => Vec::new(),
        }
    }
}

/// An ordered sequence of stack blocks.
pub type Stack = Vec<StackBlock>;

/// A statement node.
#[derive(Debug, Clone, PartialEq)]
pub enum StackKind {
    IfElse {
        condition: Input,
        then_branch: Stack,
        else_branch: Stack,
    },
    While {
        condition: Input,
        body: Stack,
    },
    Repeat {
        times: Input,
        body: Stack,
    },
    For {
        variable: VarRef,
        count: Input,
        body: Stack,
    },
    Wait {
        seconds: Input,
    },
    WaitUntil {
        condition: Input,
    },
    StopScript,
    StopAll,
    StopOtherScripts,
    DeleteThisClone,
    VarSet {
        var: VarRef,
        value: Input,
    },
    VarShow(VarRef),
    VarHide(VarRef),
    ListAdd {
        list: ListRef,
        item: Input,
    },
    ListInsert {
        list: ListRef,
        index: Input,
        item: Input,
    },
    ListReplace {
        list: ListRef,
        index: Input,
        item: Input,
    },
    ListDelete {
        list: ListRef,
        index: Input,
    },
    ListDeleteAll(ListRef),
    ListShow(ListRef),
    ListHide(ListRef),
    MotionSetX {
        x: Input,
    },
    MotionSetY {
        y: Input,
    },
    MotionSetXY {
        x: Input,
        y: Input,
    },
    MotionChangeX {
        dx: Input,
    },
    MotionChangeY {
        dy: Input,
    },
    MotionSetDirection {
        direction: Input,
    },
    LooksShow,
    LooksHide,
    LooksSetSize {
        size: Input,
    },
    LooksChangeSize {
        delta: Input,
    },
    LooksSetEffect {
        effect: String,
        value: Input,
    },
    LooksClearEffects,
    LooksGoToFront,
    LooksGoToBack,
    LooksForwardLayers {
        layers: Input,
    },
    LooksBackwardLayers {
        layers: Input,
    },
    SensingResetTimer,
    PenClear,
    EventBroadcast {
        broadcast: Input,
    },
    EventBroadcastAndWait {
        broadcast: Input,
    },
    ProcedureCall {
        code: String,
        arguments: Vec<Input>,
    },
    CompatibilityLayer(CompatCall),
    AddonCall {
        block_id: String,
        arguments: Vec<(String, Input)>,
    },
    Debugger,
    VisualReport {
        input: Input,
    },
    Nop,
}

impl StackKind {
    /// Direct input expressions of this statement (not those of nested
    /// stacks).
    pub fn inputs(&self) -> Vec<&Input> {
        use StackKind::*;
        match self {
            IfElse { condition: a, .. }
            | While { condition: a, .. }
            | Repeat { times: a, .. }
            | For { count: a, .. }
            | Wait { seconds: a }
            | WaitUntil { condition: a }
            | VarSet { value: a, .. }
            | ListAdd { item: a, .. }
            | ListDelete { index: a, .. }
            | MotionSetX { x: a }
            | MotionSetY { y: a }
            | MotionChangeX { dx: a }
            | MotionChangeY { dy: a }
            | MotionSetDirection { direction: a }
            | LooksSetSize { size: a }
            | LooksChangeSize { delta: a }
            | LooksSetEffect { value: a, .. }
            | LooksForwardLayers { layers: a }
            | LooksBackwardLayers { layers: a }
            | EventBroadcast { broadcast: a }
            | EventBroadcastAndWait { broadcast: a }
            | VisualReport { input: a } => vec![a],
            MotionSetXY { x, y } => vec![x, y],
            ListInsert { index, item, .. } | ListReplace { index, item, .. } => vec![index, item],
            ProcedureCall { arguments, .. } => arguments.iter().collect(),
            CompatibilityLayer(call) => call.inputs.iter().map(|(_, i)| i).collect(),
            AddonCall { arguments, .. } => arguments.iter().map(|(_, i)| i).collect(),
            _ => Vec::new(),
        }
    }

    /// Direct input expressions, mutable.
    pub fn inputs_mut(&mut self) -> Vec<&mut Input> {
        use StackKind::*;
        match self {
            IfElse { condition: a, .. }
            | While { condition: a, .. }
            | Repeat { times: a, .. }
            | For { count: a, .. }
            | Wait { seconds: a }
            | WaitUntil { condition: a }
            | VarSet { value: a, .. }
            | ListAdd { item: a, .. }
            | ListDelete { index: a, .. }
            | MotionSetX { x: a }
            | MotionSetY { y: a }
            | MotionChangeX { dx: a }
            | MotionChangeY { dy: a }
            | MotionSetDirection { direction: a }
            | LooksSetSize { size: a }
            | LooksChangeSize { delta: a }
            | LooksSetEffect { value: a, .. }
            | LooksForwardLayers { layers: a }
            | LooksBackwardLayers { layers: a }
            | EventBroadcast { broadcast: a }
            | EventBroadcastAndWait { broadcast: a }
            | VisualReport { input: a } => vec![a],
            MotionSetXY { x, y } => vec![x, y],
            ListInsert { index, item, .. } | ListReplace { index, item, .. } => vec![index, item],
            ProcedureCall { arguments, .. } => arguments.iter_mut().collect(),
            CompatibilityLayer(call) => call.inputs.iter_mut().map(|(_, i)| i).collect(),
            AddonCall { arguments, .. } => arguments.iter_mut().map(|(_, i)| i).collect(),
            _ => Vec::new(),
        }
    }
}

/// A statement with its yield flag and the analyzer's annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct StackBlock {
    pub kind: StackKind,
    /// Whether executing this block can suspend the script. The front-end
    /// sets this on loops in non-warp scripts and on blocks that wait.
    pub yields: bool,
    /// State on entry, recorded by the analyzer (loop heads record the
    /// converged invariant).
    pub entry_state: Option<TypeState>,
    /// State on exit, recorded by the analyzer (joined when revisited).
    pub exit_state: Option<TypeState>,
}

impl StackBlock {
    /// Wrap a statement, deriving the inherent yield flag: waiting blocks
    /// and compatibility calls always yield, everything else only if one
    /// of its inputs does.
    pub fn new(kind: StackKind) -> Self {
        let inherent = matches!(
            kind,
            StackKind::Wait { .. }
                | StackKind::EventBroadcastAndWait { .. }
                | StackKind::CompatibilityLayer(_)
        );
        let yields = inherent || kind.inputs().iter().any(|i| i.yields);
        Self {
            kind,
            yields,
            entry_state: None,
            exit_state: None,
        }
    }

    pub fn with_yields(mut self, yields: bool) -> Self {
        self.yields = yields;
        self
    }
}

/// One compilable script: a hat's stack or a procedure variant body.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Id of the top block (used for visual reports and diagnostics).
    pub top_block_id: String,
    pub stack: Stack,
    pub is_procedure: bool,
    /// The procedure signature string; empty for entry scripts.
    pub procedure_code: String,
    /// Declared argument names and kinds, in order.
    pub arguments: Vec<Argument>,
    /// Warp mode suppresses per-iteration yields.
    pub is_warp: bool,
    /// Whether the compiled function must be a generator.
    pub yields: bool,
    /// Warp scripts with the warp timer still yield when stuck.
    pub warp_timer: bool,
    /// Procedure variants this script calls, directly or indirectly.
    pub depended_procedures: Vec<String>,
    /// Cache slot, filled after a successful compile.
    pub cached_compile: Option<Rc<CompiledScript>>,
}

impl Script {
    pub fn new(top_block_id: &str) -> Self {
        Self {
            top_block_id: top_block_id.to_string(),
            ..Default::default()
        }
    }

    /// Display name for diagnostics.
    pub fn name(&self) -> &str {
        if self.is_procedure {
            &self.procedure_code
        } else {
            &self.top_block_id
        }
    }
}

/// An entry script plus the procedure variants it depends on.
#[derive(Debug, Clone, Default)]
pub struct Ir {
    pub entry: Script,
    pub procedures: HashMap<String, Script>,
}

impl Ir {
    pub fn new(entry: Script) -> Self {
        Self {
            entry,
            procedures: HashMap::new(),
        }
    }

    /// All referenced procedure variants, dependencies before dependents.
    /// Codes without a script in `procedures` are still listed so callers
    /// can report them.
    pub fn dependency_order(&self) -> Vec<String> {
        fn visit(code: &str, ir: &Ir, seen: &mut Vec<String>, out: &mut Vec<String>) {
            if seen.iter().any(|c| c == code) {
                return;
            }
            seen.push(code.to_string());
            if let Some(script) = ir.procedures.get(code) {
                for dep in &script.depended_procedures {
                    visit(dep, ir, seen, out);
                }
            }
            out.push(code.to_string());
        }
        let mut seen = Vec::new();
        let mut out = Vec::new();
        for dep in &self.entry.depended_procedures {
            visit(dep, self, &mut seen, &mut out);
        }
        out
    }
}
