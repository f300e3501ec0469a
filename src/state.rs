//! The abstract variable store threaded through the analyzer.
//!
//! A `TypeState` maps variable ids to lattice elements. A variable that is
//! absent from the map is at top ([`ValueType::ANY`]); the map never stores
//! ANY explicitly, which keeps `clear` and the merge cheap.

use crate::lattice::ValueType;
use std::collections::HashMap;

/// Variable id → refined type. Missing means ANY.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeState {
    vars: HashMap<String, ValueType>,
}

impl TypeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The refined type of a variable; ANY if nothing is known.
    pub fn get(&self, var: &str) -> ValueType {
        self.vars.get(var).copied().unwrap_or(ValueType::ANY)
    }

    /// Record a write. Returns whether the stored type changed.
    pub fn set(&mut self, var: &str, ty: ValueType) -> bool {
        if ty == ValueType::ANY {
            return self.vars.remove(var).is_some();
        }
        match self.vars.get_mut(var) {
            Some(old) => {
                if *old == ty {
                    false
                } else {
                    *old = ty;
                    true
                }
            }
            None => {
                self.vars.insert(var.to_string(), ty);
                true
            }
        }
    }

    /// Join with another state, element-wise. A variable known on only one
    /// side becomes ANY afterwards: a write that happened on one arm of a
    /// branch tells us nothing once the arms merge. Returns whether self
    /// changed.
    pub fn or(&mut self, other: &TypeState) -> bool {
        let mut changed = false;
        self.vars.retain(|var, ty| match other.vars.get(var) {
            Some(o) => {
                let joined = *ty | *o;
                if joined == ValueType::ANY {
                    changed = true;
                    false
                } else {
                    if joined != *ty {
                        *ty = joined;
                        changed = true;
                    }
                    true
                }
            }
            None => {
                changed = true;
                false
            }
        });
        changed
    }

    /// Forget everything (all variables back to ANY). Used at yields and
    /// around opaque calls: another script may have written any variable.
    /// Returns whether anything was known beforehand.
    pub fn clear(&mut self) -> bool {
        let changed = !self.vars.is_empty();
        self.vars.clear();
        changed
    }

    /// Number of variables with a refinement (test helper).
    pub fn known_len(&self) -> usize {
        self.vars.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_defaults_to_any() {
        let state = TypeState::new();
        assert_eq!(state.get("x"), ValueType::ANY);
    }

    #[test]
    fn test_set_reports_change() {
        let mut state = TypeState::new();
        assert!(state.set("x", ValueType::POS_INT));
        assert!(!state.set("x", ValueType::POS_INT));
        assert!(state.set("x", ValueType::NUMBER));
        assert_eq!(state.get("x"), ValueType::NUMBER);
    }

    #[test]
    fn test_set_any_drops_entry() {
        let mut state = TypeState::new();
        state.set("x", ValueType::POS_INT);
        assert!(state.set("x", ValueType::ANY));
        assert!(!state.set("x", ValueType::ANY));
        assert_eq!(state.known_len(), 0);
    }

    #[test]
    fn test_or_joins_elementwise() {
        let mut a = TypeState::new();
        a.set("x", ValueType::POS_INT);
        let mut b = TypeState::new();
        b.set("x", ValueType::STRING);
        assert!(a.or(&b));
        assert_eq!(a.get("x"), ValueType::POS_INT | ValueType::STRING);
        assert!(!a.or(&b));
    }

    #[test]
    fn test_or_widens_one_sided_keys() {
        let mut a = TypeState::new();
        a.set("x", ValueType::POS_INT);
        a.set("y", ValueType::BOOLEAN);
        let mut b = TypeState::new();
        b.set("x", ValueType::POS_INT);
        assert!(a.or(&b));
        assert_eq!(a.get("x"), ValueType::POS_INT);
        // y was only known on one side: conservatively ANY now.
        assert_eq!(a.get("y"), ValueType::ANY);
    }

    #[test]
    fn test_clear() {
        let mut state = TypeState::new();
        assert!(!state.clear());
        state.set("x", ValueType::POS_INT);
        assert!(state.clear());
        assert_eq!(state.get("x"), ValueType::ANY);
    }
}
