//! Summaries of functions and call sites, stored in side tables keyed by the
//! call graph's stable IDs.

use crate::{
    call_graph::{EdgeId, NodeId},
    predicate::{condition::Conditions, Predicate},
    utils::HashMapExtension,
    MAX_ENTRIES,
};
use rustc_hash::FxHashMap;
use tracing::trace;

/// Size and time of the code that runs when `exec_predicate` holds and
/// survives specialization when `nonconst_predicate` holds.
#[derive(Clone, Debug, PartialEq)]
pub struct SizeTimeEntry {
    /// Scaled by [`crate::INLINE_SIZE_SCALE`].
    pub size: i32,
    pub time: f64,
    pub exec_predicate: Predicate,
    pub nonconst_predicate: Predicate,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionSummary {
    pub conds: Conditions,
    /// `entries[0]` has `true` predicates and collects everything that
    /// doesn't fit once there are [`MAX_ENTRIES`] entries.
    pub entries: Vec<SizeTimeEntry>,
    /// Holds while the iteration count of some loop is not known. The
    /// inliner gets a hint when a context makes it known.
    pub loop_iterations: Option<Predicate>,
    pub loop_stride: Option<Predicate>,
    pub array_index: Option<Predicate>,

    pub self_size: i32,
    pub self_time: f64,
    pub estimated_self_stack_size: i64,

    pub size: i32,
    pub min_size: i32,
    pub time: f64,
    pub estimated_stack_size: i64,
    /// Where this function's frame starts within the frame of the function
    /// it got inlined into.
    pub stack_frame_offset: i64,
    pub growth: i32,
    /// Non-zero for functions in a strongly connected component of the call
    /// graph; functions of the same component share the number.
    pub scc_no: u32,

    pub inlinable: bool,
    pub fp_expressions: bool,
    pub contains_cilk_spawn: bool,
}
impl Default for FunctionSummary {
    fn default() -> Self {
        Self {
            conds: Conditions::default(),
            entries: vec![SizeTimeEntry {
                size: 0,
                time: 0.0,
                exec_predicate: Predicate::TRUE,
                nonconst_predicate: Predicate::TRUE,
            }],
            loop_iterations: None,
            loop_stride: None,
            array_index: None,
            self_size: 0,
            self_time: 0.0,
            estimated_self_stack_size: 0,
            size: 0,
            min_size: 0,
            time: 0.0,
            estimated_stack_size: 0,
            stack_frame_offset: 0,
            growth: 0,
            scc_no: 0,
            inlinable: false,
            fp_expressions: false,
            contains_cilk_spawn: false,
        }
    }
}
impl FunctionSummary {
    /// A summary without entries, to be filled through
    /// [`Self::account_size_time`].
    #[must_use]
    pub fn without_entries() -> Self {
        Self {
            entries: vec![],
            ..Self::default()
        }
    }

    /// Adds `size` and `time` under the given predicates, merging with an
    /// existing entry with the same predicates.
    pub fn account_size_time(
        &mut self,
        size: i32,
        time: f64,
        exec_predicate: Predicate,
        nonconst_predicate: Predicate,
    ) {
        if exec_predicate.is_false() {
            return;
        }
        let nonconst_predicate = nonconst_predicate.and_with(Some(&self.conds), exec_predicate);
        if nonconst_predicate.is_false() {
            return;
        }
        // Empty entries carry no information, but the first one is always
        // kept.
        if size == 0 && time == 0.0 && !self.entries.is_empty() {
            return;
        }

        let existing = self.entries.iter().position(|entry| {
            entry.exec_predicate == exec_predicate && entry.nonconst_predicate == nonconst_predicate
        });
        let index = match existing {
            Some(index) => index,
            None if self.entries.len() >= MAX_ENTRIES => {
                trace!("Too many entries, accounting to the unconditional one.");
                assert!(
                    self.entries[0].exec_predicate.is_true()
                        && self.entries[0].nonconst_predicate.is_true(),
                    "The first entry must be unconditional.",
                );
                0
            }
            None => {
                self.entries.push(SizeTimeEntry {
                    size: 0,
                    time: 0.0,
                    exec_predicate,
                    nonconst_predicate,
                });
                self.entries.len() - 1
            }
        };
        trace!(
            "Accounting size: {size}, time: {time:.2} to entry {index}: exec {}, nonconst {}",
            exec_predicate.display(&self.conds),
            nonconst_predicate.display(&self.conds),
        );
        let entry = &mut self.entries[index];
        entry.size += size;
        entry.time += time;
    }

    #[must_use]
    pub fn hint_predicates(&self) -> [Option<&Predicate>; 3] {
        [
            self.loop_iterations.as_ref(),
            self.loop_stride.as_ref(),
            self.array_index.as_ref(),
        ]
    }
}

/// Stores `new` as a hint predicate unless it carries no information.
///
/// The hint applies in contexts where `new` evaluates to false.
pub fn set_hint_predicate(hint: &mut Option<Predicate>, new: Predicate) {
    *hint = if new.is_true() || new.is_false() {
        None
    } else {
        Some(new)
    };
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ParamChange {
    /// Probability in `0..=PROB_BASE` that the argument differs from the one
    /// passed in the previous invocation. Zero for compile-time invariants.
    pub change_prob: i32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallSummary {
    pub call_stmt_size: i32,
    pub call_stmt_time: i32,
    pub loop_depth: u32,
    /// `None` if the call is reached whenever its caller runs.
    pub predicate: Option<Predicate>,
    pub params: Vec<ParamChange>,
}

/// Side tables mapping call graph nodes and edges to their summaries.
#[derive(Clone, Debug, Default)]
pub struct Summaries {
    functions: FxHashMap<NodeId, FunctionSummary>,
    calls: FxHashMap<EdgeId, CallSummary>,
}
impl Summaries {
    #[must_use]
    pub fn function(&self, node: NodeId) -> &FunctionSummary {
        self.functions
            .get(&node)
            .unwrap_or_else(|| panic!("Node {node} has no summary."))
    }
    pub fn function_mut(&mut self, node: NodeId) -> &mut FunctionSummary {
        self.functions
            .get_mut(&node)
            .unwrap_or_else(|| panic!("Node {node} has no summary."))
    }
    #[must_use]
    pub fn get_function(&self, node: NodeId) -> Option<&FunctionSummary> {
        self.functions.get(&node)
    }
    pub fn set_function(&mut self, node: NodeId, summary: FunctionSummary) {
        self.functions.insert(node, summary);
    }
    pub fn remove_function(&mut self, node: NodeId) -> Option<FunctionSummary> {
        self.functions.remove(&node)
    }
    /// Takes a summary out temporarily so that it can be updated while other
    /// summaries are read.
    pub fn take_function(&mut self, node: NodeId) -> FunctionSummary {
        self.functions.force_remove(&node)
    }

    #[must_use]
    pub fn call(&self, edge: EdgeId) -> &CallSummary {
        self.calls
            .get(&edge)
            .unwrap_or_else(|| panic!("Edge {edge} has no summary."))
    }
    pub fn call_mut(&mut self, edge: EdgeId) -> &mut CallSummary {
        self.calls
            .get_mut(&edge)
            .unwrap_or_else(|| panic!("Edge {edge} has no summary."))
    }
    #[must_use]
    pub fn get_call(&self, edge: EdgeId) -> Option<&CallSummary> {
        self.calls.get(&edge)
    }
    pub fn set_call(&mut self, edge: EdgeId, summary: CallSummary) {
        self.calls.insert(edge, summary);
    }
    pub fn remove_call(&mut self, edge: EdgeId) -> Option<CallSummary> {
        self.calls.remove(&edge)
    }
}

#[cfg(test)]
mod test {
    use super::{set_hint_predicate, FunctionSummary};
    use crate::{
        predicate::{
            condition::{ConditionCode, Literal},
            Predicate,
        },
        MAX_ENTRIES,
    };

    #[test]
    fn accounting_merges_equal_predicates() {
        let mut summary = FunctionSummary::default();
        let condition =
            summary
                .conds
                .add(0, 32, None, ConditionCode::Eq, Some(Literal::int(0, 32)));
        summary.account_size_time(4, 2.0, condition, condition);
        summary.account_size_time(2, 1.0, condition, Predicate::TRUE);
        summary.account_size_time(6, 0.5, Predicate::TRUE, Predicate::TRUE);

        assert_eq!(summary.entries.len(), 2);
        assert_eq!(summary.entries[0].size, 6);
        assert_eq!(summary.entries[1].size, 6);
        assert!((summary.entries[1].time - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn accounting_drops_unreachable_code() {
        let mut summary = FunctionSummary::default();
        summary.account_size_time(4, 2.0, Predicate::FALSE, Predicate::TRUE);
        summary.account_size_time(4, 2.0, Predicate::TRUE, Predicate::FALSE);
        summary.account_size_time(0, 0.0, Predicate::not_inlined(), Predicate::TRUE);
        assert_eq!(summary.entries, FunctionSummary::default().entries);
    }

    #[test]
    fn nonconst_predicate_is_implied_by_exec_predicate() {
        let mut summary = FunctionSummary::default();
        let condition =
            summary
                .conds
                .add(0, 32, None, ConditionCode::Ne, Some(Literal::int(1, 32)));
        summary.account_size_time(2, 1.0, Predicate::not_inlined(), condition);
        let entry = &summary.entries[1];
        assert_eq!(entry.exec_predicate, Predicate::not_inlined());
        assert_eq!(entry.nonconst_predicate, condition & Predicate::not_inlined());
    }

    #[test]
    fn overflowing_entries_land_in_the_first_one() {
        let mut summary = FunctionSummary::default();
        let mut pairs = (2..32)
            .flat_map(|first| (first + 1..32).map(move |second| (first, second)))
            .map(|(first, second)| {
                Predicate::testing_condition(first) & Predicate::testing_condition(second)
            });
        while summary.entries.len() < MAX_ENTRIES {
            let predicate = pairs.next().unwrap();
            summary.account_size_time(2, 1.0, predicate, predicate);
        }
        assert_eq!(summary.entries[0].size, 0);

        let predicate = pairs.next().unwrap();
        summary.account_size_time(10, 1.0, predicate, predicate);
        assert_eq!(summary.entries.len(), MAX_ENTRIES);
        assert_eq!(summary.entries[0].size, 10);
    }

    #[test]
    fn hint_predicates_without_information_are_dropped() {
        let mut hint = Some(Predicate::not_inlined());
        set_hint_predicate(&mut hint, Predicate::TRUE);
        assert_eq!(hint, None);
        set_hint_predicate(&mut hint, Predicate::FALSE);
        assert_eq!(hint, None);
        set_hint_predicate(&mut hint, Predicate::not_inlined());
        assert_eq!(hint, Some(Predicate::not_inlined()));
    }
}
