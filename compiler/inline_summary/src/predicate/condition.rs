use super::{Clause, Predicate, FIRST_DYNAMIC_CONDITION, NOT_INLINED_CONDITION, NUM_CONDITIONS};
use crate::{
    call_graph::NodeId,
    known::{KnownArguments, KnownValue},
};
use derive_more::Deref;
use std::{
    cmp::Ordering,
    fmt::{self, Display, Formatter},
};
use strum_macros::{EnumIter, FromRepr, IntoStaticStr};

#[derive(Clone, Copy, Debug, EnumIter, Eq, FromRepr, Hash, IntoStaticStr, PartialEq)]
#[repr(u8)]
pub enum ConditionCode {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Holds unless the argument is known to be a compile-time constant.
    IsNotConstant,
    /// Holds unless the argument is known to be unchanged since the last
    /// invocation.
    Changed,
}
impl ConditionCode {
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        !matches!(self, Self::IsNotConstant | Self::Changed)
    }

    /// The comparison that holds exactly when `self` doesn't.
    ///
    /// With NaNs, only equality comparisons have such an inverse.
    #[must_use]
    pub const fn invert(self, honor_nans: bool) -> Option<Self> {
        match self {
            Self::Eq => Some(Self::Ne),
            Self::Ne => Some(Self::Eq),
            _ if honor_nans => None,
            Self::Lt => Some(Self::Ge),
            Self::Le => Some(Self::Gt),
            Self::Gt => Some(Self::Le),
            Self::Ge => Some(Self::Lt),
            Self::IsNotConstant | Self::Changed => None,
        }
    }

    /// Evaluates `lhs <self> rhs` if both literals are comparable.
    #[must_use]
    pub fn fold(self, lhs: &Literal, rhs: &Literal) -> Option<bool> {
        if !self.is_comparison() {
            return None;
        }
        let ordering = match (lhs, rhs) {
            (Literal::Int { value: lhs, .. }, Literal::Int { value: rhs, .. }) => lhs.cmp(rhs),
            (Literal::Float { .. }, Literal::Float { .. }) => {
                let (lhs, rhs) = (lhs.as_f64()?, rhs.as_f64()?);
                match lhs.partial_cmp(&rhs) {
                    Some(ordering) => ordering,
                    None => return Some(self == Self::Ne),
                }
            }
            (Literal::Function(lhs), Literal::Function(rhs)) => {
                return match self {
                    Self::Eq => Some(lhs == rhs),
                    Self::Ne => Some(lhs != rhs),
                    _ => None,
                };
            }
            _ => return None,
        };
        Some(match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
            Self::IsNotConstant | Self::Changed => unreachable!(),
        })
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::IsNotConstant => "not constant",
            Self::Changed => "changed",
        }
    }
}

/// A typed compile-time value.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Literal {
    Int { value: i128, bits: u32 },
    /// Stored as raw bits so that literals can be hashed and compared exactly.
    Float { raw: u64, bits: u32 },
    /// The address of a function.
    Function(NodeId),
}
impl Literal {
    pub const POINTER_BITS: u32 = 64;

    #[must_use]
    pub const fn int(value: i128, bits: u32) -> Self {
        Self::Int { value, bits }
    }
    #[must_use]
    pub fn float(value: f64, bits: u32) -> Self {
        Self::Float {
            raw: value.to_bits(),
            bits,
        }
    }

    #[must_use]
    pub const fn size(&self) -> u32 {
        match self {
            Self::Int { bits, .. } | Self::Float { bits, .. } => *bits,
            Self::Function(_) => Self::POINTER_BITS,
        }
    }
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float { raw, .. } => Some(f64::from_bits(*raw)),
            _ => None,
        }
    }
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        matches!(self, Self::Int { value: 0, .. })
    }
}
impl Display for Literal {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Int { value, .. } => write!(f, "{value}"),
            Self::Float { raw, .. } => write!(f, "{:?}", f64::from_bits(*raw)),
            Self::Function(node) => write!(f, "&{node}"),
        }
    }
}

/// Where inside a parameter's aggregate a condition looks.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct AggregatePosition {
    /// In bits.
    pub offset: i64,
    /// Whether the parameter is a pointer to the aggregate rather than the
    /// aggregate itself.
    pub by_ref: bool,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Condition {
    pub operand_num: usize,
    /// Bit-width of the compared value.
    pub size: u32,
    pub code: ConditionCode,
    pub val: Option<Literal>,
    pub agg: Option<AggregatePosition>,
}
impl Condition {
    /// Whether `self` and `other` can never hold together.
    ///
    /// Only ordinary comparisons of the same value against the same literal
    /// are recognized.
    #[must_use]
    pub fn contradicts(&self, other: &Self) -> bool {
        self.code.is_comparison()
            && other.code.is_comparison()
            && self.operand_num == other.operand_num
            && self.size == other.size
            && self.agg == other.agg
            && self.val == other.val
            && self.code.invert(false) == Some(other.code)
    }
}
impl Display for Condition {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "op{}", self.operand_num)?;
        if let Some(agg) = self.agg {
            write!(
                f,
                "[{}offset: {}]",
                if agg.by_ref { "ref " } else { "" },
                agg.offset,
            )?;
        }
        match self.code {
            ConditionCode::IsNotConstant | ConditionCode::Changed => {
                write!(f, " {}", self.code.symbol())
            }
            code => {
                write!(f, " {} ", code.symbol())?;
                match &self.val {
                    Some(val) => write!(f, "{val}"),
                    None => write!(f, "?"),
                }
            }
        }
    }
}

/// The per-function table of conditions that predicate bits refer to.
///
/// Condition `i` of the table corresponds to predicate bit
/// `i + FIRST_DYNAMIC_CONDITION`.
#[derive(Clone, Debug, Default, Deref, Eq, Hash, PartialEq)]
pub struct Conditions(Vec<Condition>);
impl Conditions {
    #[must_use]
    pub fn from_vec(conditions: Vec<Condition>) -> Self {
        Self(conditions)
    }

    /// Returns the predicate testing the given condition, reusing an equal
    /// entry of the table if there is one.
    ///
    /// When the table is full, the result is the conservative `true`.
    pub fn add(
        &mut self,
        operand_num: usize,
        size: u32,
        agg: Option<AggregatePosition>,
        code: ConditionCode,
        val: Option<Literal>,
    ) -> Predicate {
        let condition = Condition {
            operand_num,
            size,
            code,
            val,
            agg,
        };
        if let Some(index) = self.0.iter().position(|it| *it == condition) {
            return Predicate::testing_condition(index + FIRST_DYNAMIC_CONDITION);
        }
        if self.0.len() == NUM_CONDITIONS - FIRST_DYNAMIC_CONDITION {
            return Predicate::TRUE;
        }
        self.0.push(condition);
        Predicate::testing_condition(self.0.len() - 1 + FIRST_DYNAMIC_CONDITION)
    }

    /// The condition behind predicate bit `bit`, if it is a dynamic one.
    #[must_use]
    pub fn for_bit(&self, bit: usize) -> Option<&Condition> {
        bit.checked_sub(FIRST_DYNAMIC_CONDITION)
            .and_then(|index| self.0.get(index))
    }

    /// Whether the conjunction of conditions in `clause` can never hold.
    #[must_use]
    pub fn clause_is_contradictory(&self, clause: Clause) -> bool {
        let dynamic_bits = (FIRST_DYNAMIC_CONDITION..NUM_CONDITIONS)
            .filter(|bit| clause & (1 << bit) != 0)
            .filter_map(|bit| self.for_bit(bit))
            .collect::<Vec<_>>();
        dynamic_bits.iter().enumerate().any(|(index, first)| {
            dynamic_bits[index + 1..]
                .iter()
                .any(|second| first.contradicts(second))
        })
    }

    /// Computes which conditions may hold given what is known about the
    /// arguments.
    ///
    /// `possible_truths` may drop conditions that only become false once the
    /// function is specialized for the known values. `nonspec_possible_truths`
    /// describes the unspecialized body: there, `is_not_constant` and
    /// `changed` still hold.
    #[must_use]
    pub fn evaluate_for_known_args(&self, inline_p: bool, known: &KnownArguments) -> ContextClauses {
        let not_inlined_bit = 1 << NOT_INLINED_CONDITION;
        let mut clauses = ContextClauses {
            possible_truths: if inline_p { 0 } else { not_inlined_bit },
            nonspec_possible_truths: not_inlined_bit,
        };

        for (index, condition) in self.0.iter().enumerate() {
            let bit = 1 << (index + FIRST_DYNAMIC_CONDITION);

            if condition.operand_num >= known.values.len() {
                clauses.add_both(bit);
                continue;
            }
            let scalar = known.values[condition.operand_num];

            let val = if let Some(agg) = condition.agg {
                if condition.code == ConditionCode::Changed
                    && !agg.by_ref
                    && scalar == Some(KnownValue::Invariant)
                {
                    continue;
                }
                known
                    .aggregates
                    .get(condition.operand_num)
                    .and_then(Option::as_ref)
                    .and_then(|aggregate| aggregate.find(agg.offset, agg.by_ref))
                    .map(|literal| KnownValue::Constant(*literal))
            } else {
                match scalar {
                    Some(KnownValue::Invariant) if condition.code != ConditionCode::Changed => {
                        None
                    }
                    scalar => scalar,
                }
            };
            let Some(val) = val else {
                clauses.add_both(bit);
                continue;
            };

            if condition.code == ConditionCode::Changed {
                clauses.nonspec_possible_truths |= bit;
                continue;
            }
            let KnownValue::Constant(literal) = val else {
                clauses.add_both(bit);
                continue;
            };
            if literal.size() != condition.size {
                clauses.add_both(bit);
                continue;
            }
            if condition.code == ConditionCode::IsNotConstant {
                clauses.nonspec_possible_truths |= bit;
                continue;
            }

            let folded = condition
                .val
                .as_ref()
                .and_then(|val| condition.code.fold(&literal, val));
            if folded == Some(false) {
                continue;
            }
            clauses.add_both(bit);
        }
        clauses
    }
}

/// The clauses describing a calling context, see
/// [`Conditions::evaluate_for_known_args`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ContextClauses {
    pub possible_truths: Clause,
    pub nonspec_possible_truths: Clause,
}
impl ContextClauses {
    fn add_both(&mut self, bit: Clause) {
        self.possible_truths |= bit;
        self.nonspec_possible_truths |= bit;
    }
}

#[cfg(test)]
mod test {
    use super::{AggregatePosition, ConditionCode, Conditions, Literal};
    use crate::{
        known::{AggregateItem, KnownAggregate, KnownArguments, KnownValue},
        predicate::{Predicate, FIRST_DYNAMIC_CONDITION, NOT_INLINED_CONDITION, NUM_CONDITIONS},
    };
    use strum::IntoEnumIterator;

    fn int(value: i128) -> Literal {
        Literal::int(value, 32)
    }

    #[test]
    fn equal_conditions_are_shared() {
        let mut conds = Conditions::default();
        let first = conds.add(0, 32, None, ConditionCode::Eq, Some(int(0)));
        let second = conds.add(0, 32, None, ConditionCode::Eq, Some(int(0)));
        let other = conds.add(1, 32, None, ConditionCode::Eq, Some(int(0)));
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(conds.len(), 2);
    }

    #[test]
    fn full_table_yields_true() {
        let mut conds = Conditions::default();
        for value in 0..(NUM_CONDITIONS - FIRST_DYNAMIC_CONDITION) {
            let predicate = conds.add(0, 32, None, ConditionCode::Eq, Some(int(value as i128)));
            assert!(!predicate.is_true());
        }
        let overflow = conds.add(0, 32, None, ConditionCode::Eq, Some(int(-1)));
        assert!(overflow.is_true());
    }

    #[test]
    fn folding_comparisons() {
        assert_eq!(ConditionCode::Lt.fold(&int(1), &int(2)), Some(true));
        assert_eq!(ConditionCode::Ge.fold(&int(1), &int(2)), Some(false));
        assert_eq!(
            ConditionCode::Eq.fold(&Literal::float(f64::NAN, 64), &Literal::float(1.0, 64)),
            Some(false),
        );
        assert_eq!(ConditionCode::Eq.fold(&int(1), &Literal::float(1.0, 32)), None);
        assert_eq!(ConditionCode::Changed.fold(&int(1), &int(1)), None);
    }

    #[test]
    fn codes_are_identified_by_their_discriminant() {
        for code in ConditionCode::iter() {
            assert_eq!(ConditionCode::from_repr(code as u8), Some(code));
            if let Some(inverted) = code.invert(false) {
                assert_eq!(inverted.invert(false), Some(code));
            }
        }
        assert_eq!(ConditionCode::from_repr(8), None);
    }

    #[test]
    fn inverting_with_nans() {
        assert_eq!(ConditionCode::Lt.invert(false), Some(ConditionCode::Ge));
        assert_eq!(ConditionCode::Lt.invert(true), None);
        assert_eq!(ConditionCode::Ne.invert(true), Some(ConditionCode::Eq));
    }

    #[test]
    fn contradictory_clauses() {
        let mut conds = Conditions::default();
        let lt = conds.add(0, 32, None, ConditionCode::Lt, Some(int(5)));
        let ge = conds.add(0, 32, None, ConditionCode::Ge, Some(int(5)));
        let other = conds.add(1, 32, None, ConditionCode::Ge, Some(int(5)));
        assert!(conds.clause_is_contradictory(lt.clauses()[0] | ge.clauses()[0]));
        assert!(!conds.clause_is_contradictory(lt.clauses()[0] | other.clauses()[0]));
    }

    #[test]
    fn known_constant_decides_comparison() {
        let mut conds = Conditions::default();
        let eq_zero = conds.add(0, 32, None, ConditionCode::Eq, Some(int(0)));
        let ne_zero = conds.add(0, 32, None, ConditionCode::Ne, Some(int(0)));

        let known = KnownArguments::from_values(vec![Some(KnownValue::Constant(int(0)))]);
        let clauses = conds.evaluate_for_known_args(false, &known);
        assert!(eq_zero.evaluate(clauses.possible_truths));
        assert!(!ne_zero.evaluate(clauses.possible_truths));
        assert!(Predicate::not_inlined().evaluate(clauses.possible_truths));

        let inlined = conds.evaluate_for_known_args(true, &known);
        assert!(!Predicate::not_inlined().evaluate(inlined.possible_truths));
        assert_ne!(inlined.nonspec_possible_truths & (1 << NOT_INLINED_CONDITION), 0);
    }

    #[test]
    fn unknown_and_mismatched_values_keep_conditions() {
        let mut conds = Conditions::default();
        let eq_zero = conds.add(0, 32, None, ConditionCode::Eq, Some(int(0)));
        let on_second = conds.add(1, 32, None, ConditionCode::Eq, Some(int(0)));

        let known = KnownArguments::from_values(vec![Some(KnownValue::Constant(Literal::int(
            1, 64,
        )))]);
        let clauses = conds.evaluate_for_known_args(false, &known);
        assert!(eq_zero.evaluate(clauses.possible_truths));
        assert!(on_second.evaluate(clauses.possible_truths));
    }

    #[test]
    fn synthetic_codes_only_hold_unspecialized() {
        let mut conds = Conditions::default();
        let not_constant = conds.add(0, 32, None, ConditionCode::IsNotConstant, None);
        let changed = conds.add(1, 32, None, ConditionCode::Changed, None);

        let known = KnownArguments::from_values(vec![
            Some(KnownValue::Constant(int(42))),
            Some(KnownValue::Invariant),
        ]);
        let clauses = conds.evaluate_for_known_args(true, &known);
        assert!(!not_constant.evaluate(clauses.possible_truths));
        assert!(not_constant.evaluate(clauses.nonspec_possible_truths));
        assert!(!changed.evaluate(clauses.possible_truths));
        assert!(changed.evaluate(clauses.nonspec_possible_truths));
    }

    #[test]
    fn aggregate_values_are_looked_up_by_offset() {
        let mut conds = Conditions::default();
        let position = AggregatePosition {
            offset: 64,
            by_ref: true,
        };
        let eq_three = conds.add(0, 32, Some(position), ConditionCode::Eq, Some(int(3)));

        let mut known = KnownArguments::from_values(vec![None]);
        known.aggregates = vec![Some(KnownAggregate {
            by_ref: true,
            items: vec![AggregateItem {
                offset: 64,
                value: int(4),
            }],
        })];
        let clauses = conds.evaluate_for_known_args(false, &known);
        assert!(!eq_three.evaluate(clauses.possible_truths));

        known.aggregates[0].as_mut().unwrap().by_ref = false;
        let clauses = conds.evaluate_for_known_args(false, &known);
        assert!(eq_three.evaluate(clauses.possible_truths));
    }
}
