//! Folding the summary of an inlined function into the function it got
//! inlined into.

use crate::{
    call_graph::{EdgeId, JumpFunction, JumpFunctionKind, NodeId},
    context::InlineAnalysis,
    estimate::CallCosts,
    known::KnownArguments,
    predicate::{
        condition::{Conditions, Literal},
        Clause, Predicate, FALSE_CONDITION,
    },
    combine_probabilities, rdiv, FREQ_BASE, INLINE_SIZE_SCALE, PROB_BASE,
};
use tracing::debug;

/// How predicates of an inlined function translate into the function it got
/// inlined into.
struct InliningMaps {
    /// The caller parameter each callee parameter is passed through from.
    operand_map: Vec<Option<usize>>,
    /// `-1` if the aggregate behind a parameter isn't preserved, otherwise the
    /// offset added by an ancestor jump function.
    offset_map: Vec<i64>,
    /// Conditions of the callee that may hold at the call site.
    possible_truths: Clause,
    /// The predicate of the inlined call.
    toplev: Predicate,
}
impl InliningMaps {
    fn new(jump_functions: &[JumpFunction], possible_truths: Clause, toplev: Predicate) -> Self {
        let (operand_map, offset_map) = jump_functions
            .iter()
            .map(|jump_function| match jump_function.kind {
                JumpFunctionKind::PassThrough {
                    formal_id,
                    nop,
                    agg_preserved,
                } => (nop.then_some(formal_id), if agg_preserved { 0 } else { -1 }),
                JumpFunctionKind::Ancestor {
                    formal_id,
                    offset,
                    agg_preserved,
                } if (0..i64::from(i32::MAX)).contains(&offset) => {
                    (Some(formal_id), if agg_preserved { offset } else { -1 })
                }
                JumpFunctionKind::Ancestor { .. }
                | JumpFunctionKind::Constant(_)
                | JumpFunctionKind::Unknown => (None, 0),
            })
            .unzip();
        Self {
            operand_map,
            offset_map,
            possible_truths,
            toplev,
        }
    }

    fn remap(
        &self,
        predicate: &Predicate,
        caller_conds: &mut Conditions,
        callee_conds: &Conditions,
    ) -> Predicate {
        predicate.remap_after_inlining(
            caller_conds,
            callee_conds,
            &self.operand_map,
            &self.offset_map,
            self.possible_truths,
            self.toplev,
        )
    }
}

impl InlineAnalysis {
    /// Recomputes the overall size and time of `node` from its entries and the
    /// calls it contains, including calls of bodies inlined into it.
    pub fn update_overall_summary(&mut self, node: NodeId) {
        let summary = self.summaries.function(node);
        let mut costs = CallCosts {
            size: summary.entries.iter().map(|entry| entry.size).sum(),
            min_size: summary.entries[0].size,
            time: summary.entries.iter().map(|entry| entry.time).sum(),
            ..CallCosts::default()
        };
        self.estimate_calls_size_and_time(
            node,
            !(1 << FALSE_CONDITION),
            &KnownArguments::default(),
            &mut costs,
        );

        let summary = self.summaries.function_mut(node);
        let scale = i64::from(INLINE_SIZE_SCALE);
        summary.size = rdiv(i64::from(costs.size), scale) as i32;
        summary.min_size = rdiv(i64::from(costs.min_size), scale) as i32;
        summary.time = costs.time;
    }

    /// Merges the summary of the callee of `edge` into the root of its
    /// caller.
    ///
    /// The callee must already be the exclusive inline copy, marked as
    /// inlined into the root. The overall summary of the root is not
    /// recomputed.
    pub fn inline_merge_summary(&mut self, edge: EdgeId) {
        let data = self.graph.edge(edge);
        let callee = data
            .callee
            .unwrap_or_else(|| panic!("Can't inline indirect call {edge}."));
        let to = self.graph.root(data.caller);
        let frequency = data.frequency;
        let call = self.summaries.call(edge).clone();
        let callee_summary = self.summaries.function(callee).clone();

        let possible_truths = if callee_summary.conds.is_empty() {
            0
        } else {
            self.evaluate_properties_for_edge(edge, true)
                .clauses
                .possible_truths
        };
        let jump_functions: &[JumpFunction] = if callee_summary.conds.is_empty() {
            &[]
        } else {
            &data.jump_functions
        };
        let maps = InliningMaps::new(
            jump_functions,
            possible_truths,
            call.predicate.unwrap_or(Predicate::TRUE),
        );

        let mut info = self.summaries.take_function(to);
        info.fp_expressions |= callee_summary.fp_expressions;

        for entry in &callee_summary.entries {
            let exec = maps.remap(&entry.exec_predicate, &mut info.conds, &callee_summary.conds);
            let nonconst =
                maps.remap(&entry.nonconst_predicate, &mut info.conds, &callee_summary.conds);
            if exec.is_false() || nonconst.is_false() {
                continue;
            }
            let prob = entry.nonconst_predicate.probability(
                &callee_summary.conds,
                possible_truths,
                &call.params,
            );
            let time = entry.time * f64::from(frequency) / f64::from(FREQ_BASE) * f64::from(prob)
                / f64::from(PROB_BASE);
            info.account_size_time(entry.size, time, exec, nonconst);
        }

        let mut edge_predicates = vec![];
        self.remap_edge_summaries(
            edge,
            callee,
            &mut info.conds,
            &callee_summary.conds,
            &maps,
            &mut edge_predicates,
        );

        let callee_hints = [
            (callee_summary.loop_iterations, &mut info.loop_iterations),
            (callee_summary.loop_stride, &mut info.loop_stride),
            (callee_summary.array_index, &mut info.array_index),
        ];
        for (callee_hint, hint) in callee_hints {
            let Some(callee_hint) = callee_hint else {
                continue;
            };
            let remapped = maps.remap(&callee_hint, &mut info.conds, &callee_summary.conds);
            if remapped.is_true() || remapped.is_false() {
                continue;
            }
            *hint = Some(hint.map_or(remapped, |hint| hint & remapped));
        }
        self.summaries.set_function(to, info);

        for (edge, predicate) in edge_predicates {
            self.edge_set_predicate(edge, Some(predicate));
        }
        self.update_callee_summaries(callee, call.loop_depth);

        // Predicates and parameter summaries of inlined calls are meaningless.
        self.edge_set_predicate(edge, Some(Predicate::TRUE));
        self.summaries.call_mut(edge).params.clear();
        debug!(
            "Merged {} into {}.",
            self.graph.node(callee).name,
            self.graph.node(to).name,
        );
    }

    /// Remaps the predicates of the calls in the body of `node` inlined
    /// through `inlined_edge`. The new predicates are collected in `out` so
    /// that the caller's summary can be updated first.
    fn remap_edge_summaries(
        &mut self,
        inlined_edge: EdgeId,
        node: NodeId,
        caller_conds: &mut Conditions,
        callee_conds: &Conditions,
        maps: &InliningMaps,
        out: &mut Vec<(EdgeId, Predicate)>,
    ) {
        let data = self.graph.node(node);
        let callees = data.callees.clone();
        let indirect_calls = data.indirect_calls.clone();

        for edge in callees {
            let edge_data = self.graph.edge(edge);
            if edge_data.is_inlined() {
                let callee = edge_data
                    .callee
                    .unwrap_or_else(|| panic!("Inlined call {edge} has no callee."));
                self.remap_edge_summaries(inlined_edge, callee, caller_conds, callee_conds, maps, out);
                continue;
            }
            self.remap_edge_change_prob(inlined_edge, edge);
            out.push((edge, self.remap_edge_predicate(edge, caller_conds, callee_conds, maps)));
        }
        for edge in indirect_calls {
            self.remap_edge_change_prob(inlined_edge, edge);
            out.push((edge, self.remap_edge_predicate(edge, caller_conds, callee_conds, maps)));
        }
    }
    fn remap_edge_predicate(
        &self,
        edge: EdgeId,
        caller_conds: &mut Conditions,
        callee_conds: &Conditions,
        maps: &InliningMaps,
    ) -> Predicate {
        match &self.summaries.call(edge).predicate {
            Some(predicate) => maps.remap(predicate, caller_conds, callee_conds),
            None => maps.toplev,
        }
    }

    /// A parameter of `edge` that is passed through from the inlined function
    /// now changes only if both the argument of the inlined call and the
    /// passed-through value change.
    fn remap_edge_change_prob(&mut self, inlined_edge: EdgeId, edge: EdgeId) {
        let inlined_params = &self.summaries.call(inlined_edge).params;
        let params = &self.summaries.call(edge).params;
        let updates = self
            .graph
            .edge(edge)
            .jump_functions
            .iter()
            .enumerate()
            .filter_map(|(index, jump_function)| {
                let (JumpFunctionKind::PassThrough { formal_id, .. }
                | JumpFunctionKind::Ancestor { formal_id, .. }) = jump_function.kind
                else {
                    return None;
                };
                let outer = inlined_params.get(formal_id)?.change_prob;
                let inner = params.get(index)?.change_prob;
                let mut prob = combine_probabilities(inner, outer);
                if inner != 0 && outer != 0 && prob == 0 {
                    prob = 1;
                }
                Some((index, prob))
            })
            .collect::<Vec<_>>();

        let params = &mut self.summaries.call_mut(edge).params;
        for (index, prob) in updates {
            params[index].change_prob = prob;
        }
    }

    /// Places the stack frame of the inlined `node` after its caller's and
    /// moves its calls deeper into the loop nest of the inlined call.
    fn update_callee_summaries(&mut self, node: NodeId, depth: u32) {
        let data = self.graph.node(node);
        let [edge] = data.callers.as_slice() else {
            panic!("Inline copy {node} must have exactly one caller.");
        };
        let caller = self.graph.edge(*edge).caller;
        let root = self.graph.root(node);
        let callees = data.callees.clone();
        let indirect_calls = data.indirect_calls.clone();

        let caller_summary = self.summaries.function(caller);
        let offset = caller_summary.stack_frame_offset + caller_summary.estimated_self_stack_size;
        let summary = self.summaries.function_mut(node);
        summary.stack_frame_offset = offset;
        let peak = offset + summary.estimated_self_stack_size;
        let root_summary = self.summaries.function_mut(root);
        root_summary.estimated_stack_size = root_summary.estimated_stack_size.max(peak);

        for edge in callees {
            let edge_data = self.graph.edge(edge);
            if let (true, Some(callee)) = (edge_data.is_inlined(), edge_data.callee) {
                self.update_callee_summaries(callee, depth);
            }
            self.summaries.call_mut(edge).loop_depth += depth;
        }
        for edge in indirect_calls {
            self.summaries.call_mut(edge).loop_depth += depth;
        }
    }

    /// Inlines the call `edge`.
    ///
    /// If the callee is needed elsewhere, the body that gets inlined is a copy
    /// of it, including the bodies already inlined into it. Returns the node
    /// of the inlined body.
    pub fn inline_call(&mut self, edge: EdgeId) -> NodeId {
        let data = self.graph.edge(edge);
        assert!(!data.is_inlined(), "Call {edge} is already inlined.");
        let caller = data.caller;
        let callee = data
            .callee
            .unwrap_or_else(|| panic!("Can't inline indirect call {edge}."));
        let target = self.graph.ultimate_alias_target(callee);
        if target != callee {
            self.redirect_call(edge, target);
        }
        let to = self.graph.root(caller);

        let inlined = if self.can_reuse_for_inlining(target) {
            target
        } else {
            let name = self.graph.node(target).name.clone();
            let copy = self.clone_function(target, name, vec![]);
            self.redirect_call(edge, copy);
            copy
        };
        self.graph.edge_mut(edge).inline_failed = None;
        self.mark_inlined_to(inlined, to);

        let old_size = self.summaries.function(to).size;
        self.inline_merge_summary(edge);
        self.propagate_jump_functions(edge, inlined);
        self.update_overall_summary(to);
        self.reset_node_growth_cache(to);
        debug!(
            "Inlined {} into {}: size {old_size} -> {}.",
            self.graph.node(inlined).name,
            self.graph.node(to).name,
            self.summaries.function(to).size,
        );
        inlined
    }
    fn can_reuse_for_inlining(&self, node: NodeId) -> bool {
        let data = self.graph.node(node);
        data.callers.len() == 1
            && data.inlined_to.is_none()
            && data.aliases.is_empty()
            && data.can_remove_if_no_direct_calls
            && !data.address_taken
            && !data.external
    }
    fn mark_inlined_to(&mut self, node: NodeId, to: NodeId) {
        self.graph.node_mut(node).inlined_to = Some(to);
        let inlined_callees = self
            .graph
            .node(node)
            .callees
            .iter()
            .map(|edge| self.graph.edge(*edge))
            .filter(|edge| edge.is_inlined())
            .filter_map(|edge| edge.callee)
            .collect::<Vec<_>>();
        for callee in inlined_callees {
            self.mark_inlined_to(callee, to);
        }
    }

    /// Rewrites the jump functions of the calls in the inlined body so that
    /// they are relative to the parameters of the root instead of the
    /// parameters of the inlined function. Indirect calls whose target
    /// becomes known are made direct.
    fn propagate_jump_functions(&mut self, inlined_edge: EdgeId, node: NodeId) {
        let outer = self.graph.edge(inlined_edge).jump_functions.clone();
        let data = self.graph.node(node);
        let callees = data.callees.clone();
        let indirect_calls = data.indirect_calls.clone();

        for edge in callees {
            let edge_data = self.graph.edge_mut(edge);
            for jump_function in &mut edge_data.jump_functions {
                *jump_function = compose_jump_functions(&outer, jump_function);
            }
            if let (true, Some(callee)) = (edge_data.is_inlined(), edge_data.callee) {
                self.propagate_jump_functions(inlined_edge, callee);
            }
        }
        for edge in indirect_calls {
            let edge_data = self.graph.edge_mut(edge);
            for jump_function in &mut edge_data.jump_functions {
                *jump_function = compose_jump_functions(&outer, jump_function);
            }
            let Some(info) = edge_data.indirect_info else {
                continue;
            };
            let source = outer.get(info.param_index);
            let target = source.and_then(|source| {
                if info.polymorphic {
                    source.context.map(|context| context.target)
                } else if let Some(position) = info.agg {
                    match source.agg.as_ref()?.find(position.offset, position.by_ref) {
                        Some(Literal::Function(target)) => Some(*target),
                        _ => None,
                    }
                } else {
                    match source.kind {
                        JumpFunctionKind::Constant(Literal::Function(target)) => Some(target),
                        _ => None,
                    }
                }
            });
            if let Some(target) = target.filter(|target| self.graph.contains_node(*target)) {
                debug!("Inlining resolved indirect call {edge} to {target}.");
                self.make_direct(edge, target);
                continue;
            }

            let param_index = source.and_then(|source| match source.kind {
                JumpFunctionKind::PassThrough {
                    formal_id,
                    nop: true,
                    agg_preserved,
                } if info.agg.map_or(true, |_| agg_preserved) => Some(formal_id),
                _ => None,
            });
            let edge_data = self.graph.edge_mut(edge);
            edge_data.indirect_info = param_index.map(|param_index| {
                let mut info = info;
                info.param_index = param_index;
                info
            });
        }
    }
}

/// The jump function of `inner`, which refers to parameters of an inlined
/// function, expressed in terms of the parameters of the function the call
/// described by `outer` is in.
fn compose_jump_functions(outer: &[JumpFunction], inner: &JumpFunction) -> JumpFunction {
    let kind = match inner.kind {
        JumpFunctionKind::Unknown | JumpFunctionKind::Constant(_) => return inner.clone(),
        JumpFunctionKind::PassThrough {
            formal_id,
            nop,
            agg_preserved,
        } => match outer.get(formal_id).map(|outer| outer.kind) {
            Some(JumpFunctionKind::Constant(value)) if nop => JumpFunctionKind::Constant(value),
            Some(JumpFunctionKind::PassThrough {
                formal_id,
                nop: outer_nop,
                agg_preserved: outer_agg_preserved,
            }) if nop || outer_nop => JumpFunctionKind::PassThrough {
                formal_id,
                nop: nop && outer_nop,
                agg_preserved: agg_preserved && outer_agg_preserved,
            },
            Some(JumpFunctionKind::Ancestor {
                formal_id,
                offset,
                agg_preserved: outer_agg_preserved,
            }) if nop => JumpFunctionKind::Ancestor {
                formal_id,
                offset,
                agg_preserved: agg_preserved && outer_agg_preserved,
            },
            _ => JumpFunctionKind::Unknown,
        },
        JumpFunctionKind::Ancestor {
            formal_id,
            offset,
            agg_preserved,
        } => match outer.get(formal_id).map(|outer| outer.kind) {
            Some(JumpFunctionKind::PassThrough {
                formal_id,
                nop: true,
                agg_preserved: outer_agg_preserved,
            }) => JumpFunctionKind::Ancestor {
                formal_id,
                offset,
                agg_preserved: agg_preserved && outer_agg_preserved,
            },
            Some(JumpFunctionKind::Ancestor {
                formal_id,
                offset: outer_offset,
                agg_preserved: outer_agg_preserved,
            }) => JumpFunctionKind::Ancestor {
                formal_id,
                offset: offset + outer_offset,
                agg_preserved: agg_preserved && outer_agg_preserved,
            },
            _ => JumpFunctionKind::Unknown,
        },
    };
    let source = match inner.kind {
        JumpFunctionKind::PassThrough { formal_id, .. }
        | JumpFunctionKind::Ancestor { formal_id, .. } => outer.get(formal_id),
        JumpFunctionKind::Unknown | JumpFunctionKind::Constant(_) => None,
    };
    JumpFunction {
        kind,
        agg: inner.agg.clone().or_else(|| {
            let preserved = matches!(
                inner.kind,
                JumpFunctionKind::PassThrough {
                    nop: true,
                    agg_preserved: true,
                    ..
                }
            );
            source.filter(|_| preserved).and_then(|source| source.agg.clone())
        }),
        context: inner
            .context
            .or_else(|| source.and_then(|source| source.context)),
    }
}
