//! Predicates over the conditions of a function's [`Conditions`] table.
//!
//! A [`Predicate`] is a formula in disjunctive normal form: it holds if any
//! of its clauses holds, and a clause holds if every condition whose bit is
//! set in it may hold. Clauses are bit masks over at most [`NUM_CONDITIONS`]
//! conditions. Bit 0 is the always-false condition and bit 1 holds exactly
//! when the function is not inlined at the current call site.
//!
//! The number of clauses is capped at [`MAX_CLAUSES`]. Adding a clause beyond
//! that merges two clauses into their intersection, which holds whenever
//! either of them does. Every predicate operation therefore only ever errs
//! towards `true`, which is the safe direction for inlining decisions.
//!
//! Predicates are kept canonical: clauses are sorted, none of them is implied
//! by another one, and `true` is the single empty clause. Structural equality
//! is therefore logical equality as long as no widening happened.

use self::condition::Conditions;
use crate::{combine_probabilities, summary::ParamChange, PROB_BASE};
use itertools::Itertools;
use std::{
    fmt::{self, Debug, Formatter},
    ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign},
};
use tracing::trace;

pub mod condition;

/// A conjunction of conditions, one bit per condition.
pub type Clause = u32;

pub const MAX_CLAUSES: usize = 8;
pub const NUM_CONDITIONS: usize = 32;
pub const FALSE_CONDITION: usize = 0;
pub const NOT_INLINED_CONDITION: usize = 1;
pub const FIRST_DYNAMIC_CONDITION: usize = 2;

const FALSE_BIT: Clause = 1 << FALSE_CONDITION;

#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Predicate {
    clauses: [Clause; MAX_CLAUSES],
    len: u8,
}
impl Predicate {
    pub const TRUE: Self = Self {
        clauses: [0; MAX_CLAUSES],
        len: 1,
    };
    pub const FALSE: Self = Self {
        clauses: [0; MAX_CLAUSES],
        len: 0,
    };

    #[must_use]
    pub fn testing_condition(condition: usize) -> Self {
        assert!(condition < NUM_CONDITIONS);
        let mut predicate = Self::FALSE;
        predicate.add_clause(None, 1 << condition);
        predicate
    }
    #[must_use]
    pub fn not_inlined() -> Self {
        Self::testing_condition(NOT_INLINED_CONDITION)
    }

    /// Builds a predicate from clauses, canonicalizing them on the way.
    #[must_use]
    pub fn from_clauses(clauses: impl IntoIterator<Item = Clause>) -> Self {
        let mut predicate = Self::FALSE;
        for clause in clauses {
            predicate.add_clause(None, clause);
        }
        predicate
    }

    #[must_use]
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses[..self.len as usize]
    }
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.clauses() == [0]
    }
    #[must_use]
    pub const fn is_false(&self) -> bool {
        self.len == 0
    }

    /// Adds `clause` as another alternative.
    ///
    /// With `conds`, clauses that combine mutually exclusive comparisons are
    /// recognized as unsatisfiable and dropped.
    pub fn add_clause(&mut self, conds: Option<&Conditions>, clause: Clause) {
        if self.is_true() || clause & FALSE_BIT != 0 {
            return;
        }
        if conds.is_some_and(|conds| conds.clause_is_contradictory(clause)) {
            return;
        }
        if self.clauses().iter().any(|it| it & !clause == 0) {
            return;
        }

        let mut kept = [0; MAX_CLAUSES];
        let mut kept_len = 0;
        for &it in self.clauses() {
            if clause & !it != 0 {
                kept[kept_len] = it;
                kept_len += 1;
            }
        }
        self.clauses = kept;
        self.len = kept_len as u8;

        if kept_len == MAX_CLAUSES {
            // Replace the clause that loses the fewest conditions by its
            // intersection with the new one.
            let (index, merged) = self
                .clauses()
                .iter()
                .map(|it| it & clause)
                .enumerate()
                .max_by_key(|(index, merged)| (merged.count_ones(), usize::MAX - index))
                .unwrap();
            trace!("Predicate overflow: widening {clause:#b} into clause {index}.");
            self.remove_clause_at(index);
            self.add_clause(None, merged);
            return;
        }

        let position = self
            .clauses()
            .iter()
            .position(|it| *it > clause)
            .unwrap_or(kept_len);
        self.clauses.copy_within(position..kept_len, position + 1);
        self.clauses[position] = clause;
        self.len += 1;
    }
    fn remove_clause_at(&mut self, index: usize) {
        let len = self.len as usize;
        self.clauses.copy_within(index + 1..len, index);
        self.clauses[len - 1] = 0;
        self.len -= 1;
    }

    /// Conjunction, dropping clauses that `conds` proves unsatisfiable.
    #[must_use]
    pub fn and_with(self, conds: Option<&Conditions>, other: Self) -> Self {
        if self.is_false() || other.is_false() {
            return Self::FALSE;
        }
        if self.is_true() {
            return other;
        }
        if other.is_true() {
            return self;
        }
        let mut result = Self::FALSE;
        for (lhs, rhs) in self.clauses().iter().cartesian_product(other.clauses()) {
            result.add_clause(conds, lhs | rhs);
        }
        result
    }

    /// Disjunction, dropping clauses that `conds` proves unsatisfiable.
    #[must_use]
    pub fn or_with(self, conds: Option<&Conditions>, other: Self) -> Self {
        if self.is_true() || other.is_false() {
            return self;
        }
        if other.is_true() || self.is_false() {
            return other;
        }
        let mut result = self;
        for &clause in other.clauses() {
            result.add_clause(conds, clause);
        }
        result
    }

    /// Whether the predicate may hold in a context where exactly the
    /// conditions in `possible_truths` may hold.
    #[must_use]
    pub fn evaluate(&self, possible_truths: Clause) -> bool {
        debug_assert_eq!(possible_truths & FALSE_BIT, 0);
        self.clauses()
            .iter()
            .any(|clause| clause & !possible_truths == 0)
    }

    /// Estimates how likely the predicate holds, in `0..=PROB_BASE`.
    ///
    /// Only `changed` conditions are uncertain: each one holds with the
    /// change probability of its parameter. All other possible conditions are
    /// assumed to hold.
    #[must_use]
    pub fn probability(
        &self,
        conds: &Conditions,
        possible_truths: Clause,
        params: &[ParamChange],
    ) -> i32 {
        if self.is_true() {
            return PROB_BASE;
        }
        let mut probability = 0;
        for &clause in self.clauses() {
            if clause & !possible_truths != 0 {
                continue;
            }
            if params.is_empty() {
                return PROB_BASE;
            }
            let mut clause_probability = PROB_BASE;
            for bit in FIRST_DYNAMIC_CONDITION..NUM_CONDITIONS {
                if clause & (1 << bit) == 0 {
                    continue;
                }
                let Some(condition) = conds.for_bit(bit) else {
                    continue;
                };
                if condition.code != condition::ConditionCode::Changed {
                    continue;
                }
                if let Some(param) = params.get(condition.operand_num) {
                    clause_probability =
                        combine_probabilities(clause_probability, param.change_prob);
                }
            }
            probability = probability.max(clause_probability);
            if probability == PROB_BASE {
                break;
            }
        }
        probability
    }

    /// Simplifies the predicate for a specialized copy of its function in
    /// which only `possible_truths` may hold.
    #[must_use]
    pub fn remap_after_duplication(&self, possible_truths: Clause) -> Self {
        Self::from_clauses(
            self.clauses()
                .iter()
                .copied()
                .filter(|clause| clause & !possible_truths == 0),
        )
    }

    /// Translates a predicate of an inlined callee into the condition space of
    /// the function it got inlined into.
    ///
    /// `operand_map[i]` is the caller parameter that callee parameter `i` is
    /// passed through from, if any. `offset_map[i]` is `-1` if aggregate
    /// contents of that parameter are not preserved, or the offset an ancestor
    /// jump function adds to by-reference aggregate accesses. Conditions that
    /// can't be expressed in the caller become `true`. The result is conjoined
    /// with `toplev`, the predicate of the inlined call itself.
    #[must_use]
    pub fn remap_after_inlining(
        &self,
        caller_conds: &mut Conditions,
        callee_conds: &Conditions,
        operand_map: &[Option<usize>],
        offset_map: &[i64],
        possible_truths: Clause,
        toplev: Self,
    ) -> Self {
        if self.is_true() {
            return toplev;
        }

        let mut out = Self::FALSE;
        for &clause in self.clauses() {
            if clause & !possible_truths != 0 {
                continue;
            }
            let mut clause_predicate = Self::TRUE;
            for bit in 0..NUM_CONDITIONS {
                if clause & (1 << bit) == 0 {
                    continue;
                }
                let condition_predicate = if bit < FIRST_DYNAMIC_CONDITION {
                    Self::testing_condition(bit)
                } else {
                    Self::remap_condition(
                        caller_conds,
                        callee_conds,
                        bit,
                        operand_map,
                        offset_map,
                    )
                };
                clause_predicate =
                    clause_predicate.and_with(Some(caller_conds), condition_predicate);
            }
            out = out.or_with(Some(caller_conds), clause_predicate);
        }
        out.and_with(Some(caller_conds), toplev)
    }
    fn remap_condition(
        caller_conds: &mut Conditions,
        callee_conds: &Conditions,
        bit: usize,
        operand_map: &[Option<usize>],
        offset_map: &[i64],
    ) -> Self {
        let condition = callee_conds
            .for_bit(bit)
            .unwrap_or_else(|| panic!("Predicate bit {bit} has no condition."));
        let Some(Some(operand)) = operand_map.get(condition.operand_num) else {
            return Self::TRUE;
        };
        let offset_delta = offset_map.get(condition.operand_num).copied().unwrap_or(0);

        let by_ref = condition.agg.is_some_and(|agg| agg.by_ref);
        if !by_ref && offset_delta > 0 {
            return Self::TRUE;
        }
        if by_ref && offset_delta < 0 {
            return Self::TRUE;
        }
        let agg = condition.agg.map(|mut agg| {
            agg.offset += offset_delta.max(0);
            agg
        });
        caller_conds.add(*operand, condition.size, agg, condition.code, condition.val)
    }

    /// Renders the predicate using the names of the conditions in `conds`.
    #[must_use]
    pub fn display<'a>(&'a self, conds: &'a Conditions) -> PredicateDisplay<'a> {
        PredicateDisplay {
            predicate: self,
            conds,
        }
    }
}
impl Default for Predicate {
    fn default() -> Self {
        Self::TRUE
    }
}
impl Debug for Predicate {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.is_true() {
            return write!(f, "true");
        }
        if self.is_false() {
            return write!(f, "false");
        }
        write!(
            f,
            "{}",
            self.clauses()
                .iter()
                .map(|clause| format!("{clause:#b}"))
                .join(" || "),
        )
    }
}

impl BitAnd for Predicate {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        self.and_with(None, rhs)
    }
}
impl BitAndAssign for Predicate {
    fn bitand_assign(&mut self, rhs: Self) {
        *self = *self & rhs;
    }
}
impl BitOr for Predicate {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.or_with(None, rhs)
    }
}
impl BitOrAssign for Predicate {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

pub struct PredicateDisplay<'a> {
    predicate: &'a Predicate,
    conds: &'a Conditions,
}
impl fmt::Display for PredicateDisplay<'_> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.predicate.is_true() {
            return write!(f, "true");
        }
        if self.predicate.is_false() {
            return write!(f, "false");
        }
        let clauses = self.predicate.clauses().iter().map(|&clause| {
            let conditions = (0..NUM_CONDITIONS)
                .filter(|bit| clause & (1 << bit) != 0)
                .map(|bit| match bit {
                    FALSE_CONDITION => "false".to_string(),
                    NOT_INLINED_CONDITION => "not inlined".to_string(),
                    _ => self
                        .conds
                        .for_bit(bit)
                        .map_or_else(|| format!("cond{bit}"), ToString::to_string),
                })
                .join(" && ");
            format!("({conditions})")
        });
        write!(f, "{}", clauses.format(" || "))
    }
}

#[cfg(test)]
mod test {
    use super::{
        condition::{ConditionCode, Conditions, Literal},
        Clause, Predicate, MAX_CLAUSES, NOT_INLINED_CONDITION,
    };
    use crate::{summary::ParamChange, PROB_BASE};
    use proptest::prelude::*;

    fn clause_strategy() -> impl Strategy<Value = Clause> {
        (0u32..256).prop_map(|bits| bits << 2)
    }
    fn predicate_strategy() -> impl Strategy<Value = Predicate> {
        prop::collection::vec(clause_strategy(), 0..=2).prop_map(Predicate::from_clauses)
    }
    fn context_strategy() -> impl Strategy<Value = Clause> {
        (0u32..(1 << 12)).prop_map(|bits| bits << 1)
    }

    proptest! {
        #[test]
        fn identities(p in predicate_strategy()) {
            prop_assert_eq!(p & Predicate::TRUE, p);
            prop_assert_eq!(p | Predicate::FALSE, p);
            prop_assert_eq!(p & Predicate::FALSE, Predicate::FALSE);
            prop_assert_eq!(p | Predicate::TRUE, Predicate::TRUE);
        }

        #[test]
        fn idempotence(p in predicate_strategy()) {
            prop_assert_eq!(p & p, p);
            prop_assert_eq!(p | p, p);
        }

        #[test]
        fn commutativity(p in predicate_strategy(), q in predicate_strategy()) {
            prop_assert_eq!(p & q, q & p);
            prop_assert_eq!(p | q, q | p);
        }

        #[test]
        fn associativity(
            p in predicate_strategy(),
            q in predicate_strategy(),
            r in predicate_strategy(),
        ) {
            prop_assert_eq!((p & q) & r, p & (q & r));
            prop_assert_eq!((p | q) | r, p | (q | r));
        }

        #[test]
        fn monotonicity(
            p in predicate_strategy(),
            q in predicate_strategy(),
            context in context_strategy(),
        ) {
            if p.evaluate(context) {
                prop_assert!((p | q).evaluate(context));
            }
            if (p & q).evaluate(context) {
                prop_assert!(p.evaluate(context));
            }
        }

        #[test]
        fn specialization_is_sound(
            p in predicate_strategy(),
            specialization in context_strategy(),
            context in context_strategy(),
        ) {
            if p.remap_after_duplication(specialization).evaluate(context) {
                prop_assert!(p.evaluate(specialization & context));
            }
        }

        #[test]
        fn widening_preserves_truth(
            clauses in prop::collection::vec(clause_strategy(), 0..24),
            context in context_strategy(),
        ) {
            let widened = Predicate::from_clauses(clauses.iter().copied());
            prop_assert!(widened.clauses().len() <= MAX_CLAUSES);
            let precise = clauses.iter().any(|clause| clause & !context == 0);
            if precise {
                prop_assert!(widened.evaluate(context));
            }
        }
    }

    #[test]
    fn sentinels() {
        assert!(Predicate::TRUE.evaluate(0));
        assert!(!Predicate::FALSE.evaluate(!1));
        assert!(Predicate::from_clauses([0b1]).is_false());
        assert!(Predicate::from_clauses([0b100, 0]).is_true());
        assert_eq!(Predicate::default(), Predicate::TRUE);
    }

    #[test]
    fn subsumed_clauses_are_dropped() {
        let p = Predicate::from_clauses([0b1100, 0b100]);
        assert_eq!(p.clauses(), [0b100]);
        let q = Predicate::from_clauses([0b100, 0b1100]);
        assert_eq!(p, q);
    }

    #[test]
    fn evaluation_requires_all_conditions_of_a_clause() {
        let p = Predicate::from_clauses([0b1100]);
        assert!(p.evaluate(0b1100));
        assert!(!p.evaluate(0b0100));
        assert!(Predicate::not_inlined().evaluate(1 << NOT_INLINED_CONDITION));
        assert!(!Predicate::not_inlined().evaluate(0));
    }

    #[test]
    fn contradictions_are_dropped_with_conditions() {
        let mut conds = Conditions::default();
        let lt = conds.add(0, 32, None, ConditionCode::Lt, Some(Literal::int(5, 32)));
        let ge = conds.add(0, 32, None, ConditionCode::Ge, Some(Literal::int(5, 32)));
        assert!(lt.and_with(Some(&conds), ge).is_false());
        assert!(!(lt & ge).is_false());
    }

    #[test]
    fn probability_of_changed_conditions() {
        let mut conds = Conditions::default();
        let changed = conds.add(0, 32, None, ConditionCode::Changed, None);
        let eq = conds.add(1, 32, None, ConditionCode::Eq, Some(Literal::int(0, 32)));
        let params = [
            ParamChange { change_prob: 2500 },
            ParamChange { change_prob: 0 },
        ];
        let everything = !1;

        assert_eq!(changed.probability(&conds, everything, &params), 2500);
        assert_eq!(eq.probability(&conds, everything, &params), PROB_BASE);
        assert_eq!((changed | eq).probability(&conds, everything, &params), PROB_BASE);
        assert_eq!((changed & eq).probability(&conds, everything, &params), 2500);
        assert_eq!(changed.probability(&conds, everything, &[]), PROB_BASE);
        assert_eq!(changed.probability(&conds, 0, &params), 0);
    }

    #[test]
    fn remapping_into_the_caller() {
        let mut callee_conds = Conditions::default();
        let callee_p = callee_conds.add(0, 32, None, ConditionCode::Eq, Some(Literal::int(0, 32)));
        let unmapped = callee_conds.add(1, 32, None, ConditionCode::Eq, Some(Literal::int(0, 32)));

        let mut caller_conds = Conditions::default();
        caller_conds.add(3, 8, None, ConditionCode::Changed, None);
        let everything = !1;

        let remapped = callee_p.remap_after_inlining(
            &mut caller_conds,
            &callee_conds,
            &[Some(2), None],
            &[0, 0],
            everything,
            Predicate::TRUE,
        );
        assert_eq!(caller_conds.len(), 2);
        assert_eq!(caller_conds[1].operand_num, 2);
        assert_eq!(remapped, Predicate::testing_condition(3));

        let widened = unmapped.remap_after_inlining(
            &mut caller_conds,
            &callee_conds,
            &[Some(2), None],
            &[0, 0],
            everything,
            Predicate::not_inlined(),
        );
        assert_eq!(widened, Predicate::not_inlined());

        let known_false = callee_p.remap_after_inlining(
            &mut caller_conds,
            &callee_conds,
            &[Some(2), None],
            &[0, 0],
            0,
            Predicate::TRUE,
        );
        assert!(known_false.is_false());
    }

    #[test]
    fn display_uses_condition_names() {
        let mut conds = Conditions::default();
        let eq = conds.add(0, 32, None, ConditionCode::Eq, Some(Literal::int(0, 32)));
        let changed = conds.add(1, 32, None, ConditionCode::Changed, None);
        let p = (eq & Predicate::not_inlined()) | changed;
        insta::assert_snapshot!(p.display(&conds), @"(not inlined && op0 == 0) || (op1 changed)");
    }
}
