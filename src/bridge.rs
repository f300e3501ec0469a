//! The narrow contract between emitted code and the host runtime.
//!
//! Generated factories assume exactly this surface, implemented by the
//! runtime/VM:
//!
//! - `thread.target`, `target.runtime`, `runtime.getTargetForStage()`
//! - `target.variables[id]` / `stage.variables[id]`, each shaped
//!   `{value, isCloud, name}`; lists add `_monitorUpToDate`
//! - target methods: `setXY`, `x`/`y`/`direction`/`size`/`currentCostume`,
//!   `getCostumes`, `setCostume`, `setDirection`, `setRotationStyle`,
//!   `setSize`, `goForwardLayers`/`goBackwardLayers`, `goToFront`/
//!   `goToBack`, `setVisible`, `setEffect`, `clearEffects`, `effects`,
//!   `isTouchingObject`, `isTouchingColor`, `colorIsTouchingColor`,
//!   `lookupVariableByNameAndType`, `interpolationData`
//! - runtime: `ioDevices.{keyboard,mouse,clock,userData,cloud}`,
//!   `monitorBlocks.changeBlock`, `visualReport`, `requestRedraw`,
//!   `stopAll`, `stopForTarget`, `disposeTarget`, `getSpriteTargetByName`,
//!   `ext_scratch3_*` extension handles, `ext_pen`, `getOpcodeFunction`,
//!   `getAddonBlock`
//!
//! The factory string is evaluated by the host's `scopedEval` inside a
//! lexical scope that provides the helper functions in [`HELPERS`]; the
//! code generator may reference those names and nothing else.

/// Helper functions the `scopedEval` scope provides to emitted code.
pub const HELPERS: &[&str] = &[
    "toBoolean",
    "mod",
    "randomInt",
    "randomFloat",
    "listGet",
    "listDelete",
    "listInsert",
    "listReplace",
    "listContains",
    "listIndexOf",
    "listContents",
    "compareEqual",
    "compareLessThan",
    "compareGreaterThan",
    "timer",
    "limitPrecision",
    "colorToList",
    "distance",
    "daysSince2000",
    "startHats",
    "waitThreads",
    "executeInCompatibilityLayer",
    "retire",
    "isStuck",
    "tan",
];

/// Compile-time view of the target a script is compiled against.
///
/// Only what lowering decisions depend on lives here; everything else
/// about the target is reached through the bindings above at run time.
#[derive(Debug, Clone, Default)]
pub struct TargetInfo {
    pub is_stage: bool,
    /// Costume names, in costume order.
    pub costume_names: Vec<String>,
    /// Sound names, in sound order.
    pub sound_names: Vec<String>,
}

impl TargetInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sprite() -> Self {
        Self::default()
    }

    pub fn with_costumes(mut self, names: &[&str]) -> Self {
        self.costume_names = names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// A string constant that names a costume or sound must stay a string
    /// in the emitted code, even where a numeric literal would otherwise
    /// be used: the runtime resolves such inputs by name first.
    pub fn is_unsafe_name(&self, s: &str) -> bool {
        self.costume_names.iter().any(|n| n == s) || self.sound_names.iter().any(|n| n == s)
    }
}
