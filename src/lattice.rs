//! The refinement type lattice for the dataflow analyzer.
//!
//! A value's refined type is a bitset over disjoint atoms; joining two
//! types is bitwise union, so the set of types forms a join-semilattice of
//! finite height with bottom 0 (impossible) and top [`ValueType::ANY`].
//!
//! # Atoms
//!
//! The number atoms split the IEEE-754 doubles by sign, integerness and the
//! special values so that the analyzer can reason about coercions exactly:
//!
//! ```text
//! POS_INT  POS_FRACT  POS_INF      positive numbers
//! NEG_INT  NEG_FRACT  NEG_INF      negative numbers
//! ZERO     NEG_ZERO   NAN          the signed zeroes and NaN
//! BOOLEAN                          true / false
//! STRING_NUM                       a string that parses as a number
//! STRING                           a string that does not
//! ```
//!
//! Every analyzer-produced type is an over-approximation: no runtime value
//! may ever fall outside the bits of its computed type.

use crate::value::{parse_number, Value};
use bitflags::bitflags;

bitflags! {
    /// A set of possible runtime value kinds.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ValueType: u16 {
        /// A positive integer (1, 2, ...).
        const POS_INT = 1 << 0;
        /// A positive non-integer (0.5, 1.25, ...).
        const POS_FRACT = 1 << 1;
        /// Positive infinity.
        const POS_INF = 1 << 2;
        /// A negative integer (-1, -2, ...).
        const NEG_INT = 1 << 3;
        /// A negative non-integer (-0.5, -1.25, ...).
        const NEG_FRACT = 1 << 4;
        /// Negative infinity.
        const NEG_INF = 1 << 5;
        /// Positive zero.
        const ZERO = 1 << 6;
        /// Negative zero.
        const NEG_ZERO = 1 << 7;
        /// Not-a-number.
        const NAN = 1 << 8;
        /// true or false.
        const BOOLEAN = 1 << 9;
        /// A string that interprets as a number ("3", "-1.5", "0x10").
        const STRING_NUM = 1 << 10;
        /// A string that does not interpret as a number ("hello").
        const STRING = 1 << 11;

        /// Any positive number.
        const POS = Self::POS_INT.bits() | Self::POS_FRACT.bits() | Self::POS_INF.bits();
        /// Any negative number.
        const NEG = Self::NEG_INT.bits() | Self::NEG_FRACT.bits() | Self::NEG_INF.bits();
        /// Any finite positive number.
        const POS_REAL = Self::POS_INT.bits() | Self::POS_FRACT.bits();
        /// Any finite negative number.
        const NEG_REAL = Self::NEG_INT.bits() | Self::NEG_FRACT.bits();
        /// Either zero.
        const ANY_ZERO = Self::ZERO.bits() | Self::NEG_ZERO.bits();
        /// Any finite, non-NaN number.
        const REAL = Self::POS_REAL.bits() | Self::NEG_REAL.bits() | Self::ANY_ZERO.bits();
        /// Either infinity.
        const INF = Self::POS_INF.bits() | Self::NEG_INF.bits();
        /// Any non-integer number.
        const FRACT = Self::POS_FRACT.bits() | Self::NEG_FRACT.bits();
        /// Any number except NaN.
        const NUMBER = Self::REAL.bits() | Self::INF.bits();
        /// Any number.
        const NUMBER_OR_NAN = Self::NUMBER.bits() | Self::NAN.bits();
        /// Any number an index coercion (truncation toward zero) can produce.
        const NUMBER_INDEX = Self::NUMBER_OR_NAN.bits() & !Self::FRACT.bits();
        /// Values that coerce to a finite number without surprises.
        const NUMBER_INTERPRETABLE = Self::REAL.bits() | Self::BOOLEAN.bits();
        /// Any string.
        const ANY_STRING = Self::STRING.bits() | Self::STRING_NUM.bits();
        /// Top: nothing is known about the value.
        const ANY = Self::NUMBER_OR_NAN.bits()
            | Self::BOOLEAN.bits()
            | Self::ANY_STRING.bits();
    }
}

impl ValueType {
    /// True when every value of this type is also of type `t` (`self ⊆ t`).
    #[inline]
    pub fn is_always(self, t: ValueType) -> bool {
        self.bits() & t.bits() == self.bits()
    }

    /// True when some value of this type may be of type `t`
    /// (`self ∩ t ≠ ∅`).
    #[inline]
    pub fn is_sometimes(self, t: ValueType) -> bool {
        self.bits() & t.bits() != 0
    }

    /// Least upper bound: the union of both bit sets.
    #[inline]
    pub fn join(self, other: ValueType) -> ValueType {
        self | other
    }

    /// Greatest lower bound: the intersection of both bit sets.
    #[inline]
    pub fn meet(self, other: ValueType) -> ValueType {
        self & other
    }

    /// The single atom describing a concrete number.
    pub fn number_type(n: f64) -> ValueType {
        if n.is_nan() {
            ValueType::NAN
        } else if n == f64::INFINITY {
            ValueType::POS_INF
        } else if n == f64::NEG_INFINITY {
            ValueType::NEG_INF
        } else if n == 0.0 {
            if n.is_sign_negative() {
                ValueType::NEG_ZERO
            } else {
                ValueType::ZERO
            }
        } else if n.fract() == 0.0 {
            if n > 0.0 {
                ValueType::POS_INT
            } else {
                ValueType::NEG_INT
            }
        } else if n > 0.0 {
            ValueType::POS_FRACT
        } else {
            ValueType::NEG_FRACT
        }
    }

    /// The type of a concrete string. Strings that interpret as numbers
    /// additionally carry the STRING_NUM flag.
    pub fn string_type(s: &str) -> ValueType {
        if parse_number(s).is_nan() {
            ValueType::STRING
        } else {
            ValueType::STRING | ValueType::STRING_NUM
        }
    }

    /// The precise type of a literal.
    pub fn of_value(v: &Value) -> ValueType {
        match v {
            Value::Number(n) => Self::number_type(*n),
            Value::Bool(_) => ValueType::BOOLEAN,
            Value::String(s) => Self::string_type(s),
        }
    }
}

impl Default for ValueType {
    fn default() -> Self {
        ValueType::ANY
    }
}
