//! Size and time of a function in a given calling context.

use crate::{
    call_graph::{EdgeId, IndirectCallInfo, JumpFunction, JumpFunctionKind, Node, NodeId},
    context::InlineAnalysis,
    hints::{InlineHint, InlineHints},
    known::{KnownArguments, KnownValue, PolymorphicContext},
    predicate::{
        condition::{ContextClauses, Literal},
        Clause,
    },
    rdiv,
    summary::ParamChange,
    FREQ_BASE, INLINE_SIZE_SCALE, PROB_BASE,
};
use tracing::trace;

/// The result of estimating a function body in some context.
///
/// Sizes are in statement units, times are relative to one invocation of the
/// function.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Estimate {
    pub size: i32,
    /// The part of the size that doesn't depend on the context.
    pub min_size: i32,
    pub time: f64,
    /// Time of the body when it's not specialized for the known arguments.
    pub nonspec_time: f64,
    pub hints: InlineHints,
}

/// What is known at a call site.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeProperties {
    pub clauses: ContextClauses,
    pub known: KnownArguments,
}

/// Running totals while walking the calls of a function, in scaled sizes.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct CallCosts {
    pub size: i32,
    pub min_size: i32,
    pub time: f64,
    pub hints: InlineHints,
}

impl InlineAnalysis {
    /// Estimates the body of `node` when only the conditions in `clauses` may
    /// hold and the arguments are described by `known`.
    ///
    /// `params` are the change probabilities of the arguments at the call
    /// site. When empty, conditions that depend on changing parameters are
    /// assumed to always hold.
    #[must_use]
    pub fn estimate_node_size_and_time(
        &self,
        node: NodeId,
        clauses: ContextClauses,
        known: &KnownArguments,
        params: &[ParamChange],
    ) -> Estimate {
        let summary = self.summaries.function(node);
        trace!(
            "Estimating the body of {} with possible truths {:#b}.",
            self.graph.node(node).name,
            clauses.possible_truths,
        );

        let mut costs = CallCosts::default();
        self.estimate_calls_size_and_time(node, clauses.possible_truths, known, &mut costs);
        let mut size = costs.size;
        let mut time = costs.time;
        let mut nonspec_time = costs.time;
        let mut hints = costs.hints;

        for entry in &summary.entries {
            let exec = entry
                .exec_predicate
                .evaluate(clauses.nonspec_possible_truths);
            if !exec {
                continue;
            }
            nonspec_time += entry.time;
            if !entry.nonconst_predicate.evaluate(clauses.possible_truths) {
                continue;
            }
            size += entry.size;
            let prob =
                entry
                    .nonconst_predicate
                    .probability(&summary.conds, clauses.possible_truths, params);
            assert!((0..=PROB_BASE).contains(&prob));
            time += entry.time * f64::from(prob) / f64::from(PROB_BASE);
        }
        let first = &summary.entries[0];
        assert!(
            first.exec_predicate.is_true() && first.nonconst_predicate.is_true(),
            "The first entry of {node} must always be accounted.",
        );
        let min_size = first.size;
        assert!(size >= 0);

        // Rounding may make the specialized time slightly larger.
        if time > nonspec_time {
            time = nonspec_time;
        }

        let hint_predicates = [
            (&summary.loop_iterations, InlineHint::LoopIterations),
            (&summary.loop_stride, InlineHint::LoopStride),
            (&summary.array_index, InlineHint::ArrayIndex),
        ];
        for (predicate, hint) in hint_predicates {
            if predicate
                .as_ref()
                .is_some_and(|it| !it.evaluate(clauses.possible_truths))
            {
                hints |= hint;
            }
        }
        if summary.scc_no != 0 {
            hints |= InlineHint::InScc;
        }
        if self.graph.node(node).declared_inline {
            hints |= InlineHint::DeclaredInline;
        }

        let estimate = Estimate {
            size: scale_down(size),
            min_size: scale_down(min_size),
            time,
            nonspec_time,
            hints,
        };
        trace!(
            "Size {}, time {:.2}, nonspecialized time {:.2}.",
            estimate.size,
            estimate.time,
            estimate.nonspec_time,
        );
        estimate
    }

    /// Adds the cost of all calls of `node` that may be executed, looking
    /// through calls that are already inlined.
    pub(crate) fn estimate_calls_size_and_time(
        &self,
        node: NodeId,
        possible_truths: Clause,
        known: &KnownArguments,
        costs: &mut CallCosts,
    ) {
        let data = self.graph.node(node);
        for &edge in &data.callees {
            let call = self.summaries.call(edge);
            let edge_data = self.graph.edge(edge);
            // Zero-sized builtins.
            if !edge_data.is_inlined() && call.call_stmt_size == 0 {
                assert_eq!(call.call_stmt_time, 0);
                continue;
            }
            if !call
                .predicate
                .map_or(true, |predicate| predicate.evaluate(possible_truths))
            {
                continue;
            }
            if edge_data.is_inlined() {
                let callee = edge_data
                    .callee
                    .unwrap_or_else(|| panic!("Inlined call {edge} has no callee."));
                self.estimate_calls_size_and_time(callee, possible_truths, known, costs);
            } else {
                self.estimate_edge_size_and_time(edge, known, costs);
            }
        }
        for &edge in &data.indirect_calls {
            let call = self.summaries.call(edge);
            if call
                .predicate
                .map_or(true, |predicate| predicate.evaluate(possible_truths))
            {
                self.estimate_edge_size_and_time(edge, known, costs);
            }
        }
    }

    fn estimate_edge_size_and_time(&self, edge: EdgeId, known: &KnownArguments, costs: &mut CallCosts) {
        let call = self.summaries.call(edge);
        let edge_data = self.graph.edge(edge);
        let mut call_size = call.call_stmt_size;
        let mut call_time = call.call_stmt_time;
        if edge_data.is_indirect()
            && self.estimate_edge_devirt_benefit(edge, &mut call_size, &mut call_time, known)
            && edge_data.maybe_hot()
        {
            costs.hints |= InlineHint::IndirectCall;
        }

        let scaled_size = call_size * INLINE_SIZE_SCALE;
        costs.size += scaled_size;
        if call.predicate.is_none() {
            costs.min_size += scaled_size;
        }
        costs.time += f64::from(call_time) * f64::from(edge_data.frequency) / f64::from(FREQ_BASE);
    }

    /// Subtracts the cost difference between an indirect and a direct call if
    /// the known arguments determine the target of the indirect call `edge`.
    ///
    /// Returns whether the target may then be inlined.
    fn estimate_edge_devirt_benefit(
        &self,
        edge: EdgeId,
        size: &mut i32,
        time: &mut i32,
        known: &KnownArguments,
    ) -> bool {
        if known.is_empty() || !self.config.indirect_inlining {
            return false;
        }
        let Some(info) = &self.graph.edge(edge).indirect_info else {
            return false;
        };
        let Some(target) = indirect_call_target(info, known) else {
            return false;
        };

        // Streamed call summaries may be cheaper than the benefit.
        *size = (*size - self.config.size_weights.devirtualization_benefit()).max(0);
        *time = (*time - self.config.time_weights.devirtualization_benefit()).max(0);

        if !self.graph.contains_node(target) {
            return false;
        }
        let target = self.graph.ultimate_alias_target(target);
        let data = self.graph.node(target);
        if data.body.is_none() && !data.thunk {
            return false;
        }
        self.summaries
            .get_function(target)
            .is_some_and(|summary| summary.inlinable)
    }

    /// Collects what the caller knows about the arguments of `edge` and which
    /// conditions of the callee may hold there.
    ///
    /// With `inline_p`, the callee is considered inlined: `not_inlined` is
    /// false and arguments that don't change between invocations count as
    /// invariant.
    #[must_use]
    pub fn evaluate_properties_for_edge(&self, edge: EdgeId, inline_p: bool) -> EdgeProperties {
        let data = self.graph.edge(edge);
        let callee = data
            .callee
            .unwrap_or_else(|| panic!("Indirect call {edge} has no known callee."));
        let callee = self.graph.ultimate_alias_target(callee);
        let summary = self.summaries.function(callee);

        let mut known = KnownArguments::default();
        if !data.call_stmt_cannot_inline && !data.jump_functions.is_empty() {
            let root = self.graph.node(self.graph.root(data.caller));
            let call = self.summaries.call(edge);
            known.values = data
                .jump_functions
                .iter()
                .enumerate()
                .map(|(index, jump_function)| {
                    value_from_jump_function(root, jump_function)
                        .map(KnownValue::Constant)
                        .or_else(|| {
                            let invariant = inline_p
                                && call
                                    .params
                                    .get(index)
                                    .is_some_and(|param| param.change_prob == 0);
                            invariant.then_some(KnownValue::Invariant)
                        })
                })
                .collect();
            known.contexts = data
                .jump_functions
                .iter()
                .map(|jump_function| context_from_jump_function(jump_function))
                .collect();
            known.aggregates = data
                .jump_functions
                .iter()
                .map(|jump_function| jump_function.agg.clone())
                .collect();
        }

        let clauses = summary.conds.evaluate_for_known_args(inline_p, &known);
        EdgeProperties { clauses, known }
    }

    /// Estimates a copy of `node` specialized for the `known` arguments.
    #[must_use]
    pub fn estimate_ipcp_clone_size_and_time(&self, node: NodeId, known: &KnownArguments) -> Estimate {
        let clauses = self
            .summaries
            .function(node)
            .conds
            .evaluate_for_known_args(false, known);
        self.estimate_node_size_and_time(node, clauses, known, &[])
    }
}

fn scale_down(size: i32) -> i32 {
    rdiv(i64::from(size), i64::from(INLINE_SIZE_SCALE)) as i32
}

/// The constant an argument is known to have, looking at the constants the
/// root of the caller was specialized for.
fn value_from_jump_function(root: &Node, jump_function: &JumpFunction) -> Option<Literal> {
    match jump_function.kind {
        JumpFunctionKind::Constant(value) => Some(value),
        JumpFunctionKind::PassThrough {
            formal_id,
            nop: true,
            ..
        } => root.known_constants.get(formal_id).copied().flatten(),
        JumpFunctionKind::PassThrough { .. }
        | JumpFunctionKind::Ancestor { .. }
        | JumpFunctionKind::Unknown => None,
    }
}
const fn context_from_jump_function(jump_function: &JumpFunction) -> Option<PolymorphicContext> {
    jump_function.context
}

fn indirect_call_target(info: &IndirectCallInfo, known: &KnownArguments) -> Option<NodeId> {
    let index = info.param_index;
    if info.polymorphic {
        return known
            .contexts
            .get(index)
            .copied()
            .flatten()
            .map(|context| context.target);
    }
    let literal = if let Some(position) = info.agg {
        known
            .aggregates
            .get(index)?
            .as_ref()?
            .find(position.offset, position.by_ref)
            .copied()
    } else {
        known.values.get(index).copied().flatten()?.constant().copied()
    };
    match literal? {
        Literal::Function(target) => Some(target),
        Literal::Int { .. } | Literal::Float { .. } => None,
    }
}
