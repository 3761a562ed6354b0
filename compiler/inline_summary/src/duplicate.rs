use crate::{
    call_graph::{EdgeId, NodeId, ReplaceMap},
    context::InlineAnalysis,
    known::KnownArguments,
    predicate::Predicate,
    summary::set_hint_predicate,
    INLINE_SIZE_SCALE,
};
use tracing::debug;

impl InlineAnalysis {
    /// Copies `node` together with its calls. Bodies inlined into `node` are
    /// copied as well so that the copy owns its inlined bodies.
    ///
    /// Parameters listed in `tree_map` are replaced by constants in the copy,
    /// which drops the parts of the summary that can't be executed anymore.
    pub fn clone_function(
        &mut self,
        node: NodeId,
        name: impl Into<String>,
        tree_map: Vec<ReplaceMap>,
    ) -> NodeId {
        self.clone_function_into(node, name.into(), tree_map, None)
    }
    fn clone_function_into(
        &mut self,
        node: NodeId,
        name: String,
        tree_map: Vec<ReplaceMap>,
        inlined_to: Option<NodeId>,
    ) -> NodeId {
        let clone = self.graph.duplicate_node(node, name);
        let data = self.graph.node_mut(clone);
        data.inlined_to = inlined_to;
        for replacement in &tree_map {
            if data.known_constants.len() <= replacement.param_index {
                data.known_constants.resize(replacement.param_index + 1, None);
            }
            data.known_constants[replacement.param_index] = Some(replacement.value);
        }
        data.tree_map = tree_map;
        let root = inlined_to.unwrap_or(clone);

        let data = self.graph.node(node);
        let edges = data
            .callees
            .iter()
            .chain(&data.indirect_calls)
            .copied()
            .collect::<Vec<_>>();
        for edge in edges {
            let new_edge = self.duplicate_call(edge, clone, None);
            let edge_data = self.graph.edge(new_edge);
            if let (true, Some(callee)) = (edge_data.is_inlined(), edge_data.callee) {
                let name = self.graph.node(callee).name.clone();
                let callee_clone = self.clone_function_into(callee, name, vec![], Some(root));
                self.graph.redirect_callee(new_edge, callee_clone);
            }
        }

        self.duplicate_function_summary(node, clone);
        debug!(
            "Cloned {} into {clone} with {} parameters replaced.",
            self.graph.node(node).name,
            self.graph.node(clone).tree_map.len(),
        );
        clone
    }

    /// Copies the summary of `src` to its clone `dst`, specializing it for the
    /// parameters the clone replaces.
    fn duplicate_function_summary(&mut self, src: NodeId, dst: NodeId) {
        let mut info = self.summaries.function(src).clone();
        let data = self.graph.node(dst);

        if !data.tree_map.is_empty() {
            let param_count = data.body.as_ref().map_or(0, |body| body.parameters.len());
            let mut constants = vec![None; param_count];
            for replacement in &data.tree_map {
                if constants.len() <= replacement.param_index {
                    constants.resize(replacement.param_index + 1, None);
                }
                constants[replacement.param_index] = Some(replacement.value);
            }
            let known = KnownArguments::from_constants(constants);
            // The clone is specialized, so the unspecialized truths don't
            // matter.
            let possible_truths = info
                .conds
                .evaluate_for_known_args(false, &known)
                .possible_truths;

            let entries = std::mem::take(&mut info.entries);
            info.account_size_time(0, 0.0, Predicate::TRUE, Predicate::TRUE);
            let mut optimized_out_size = 0;
            for entry in entries {
                let exec = entry.exec_predicate.remap_after_duplication(possible_truths);
                let nonconst = entry
                    .nonconst_predicate
                    .remap_after_duplication(possible_truths);
                if exec.is_false() || nonconst.is_false() {
                    optimized_out_size += entry.size;
                } else {
                    info.account_size_time(entry.size, entry.time, exec, nonconst);
                }
            }

            let mut has_inlined_calls = false;
            let mut edge_predicates = vec![];
            for &edge in data.callees.iter().chain(&data.indirect_calls) {
                has_inlined_calls |= self.graph.edge(edge).is_inlined();
                let call = self.summaries.call(edge);
                let Some(predicate) = call.predicate else {
                    continue;
                };
                let new_predicate = predicate.remap_after_duplication(possible_truths);
                if new_predicate.is_false() && !predicate.is_false() {
                    optimized_out_size += call.call_stmt_size * INLINE_SIZE_SCALE;
                }
                edge_predicates.push((edge, new_predicate));
            }

            for hint in [
                &mut info.loop_iterations,
                &mut info.loop_stride,
                &mut info.array_index,
            ] {
                if let Some(predicate) = hint.take() {
                    set_hint_predicate(hint, predicate.remap_after_duplication(possible_truths));
                }
            }
            // Entries of functions with inlined bodies already contain the
            // sizes of those bodies, so they can't shrink here.
            assert!(
                !has_inlined_calls || optimized_out_size == 0,
                "Can't specialize {dst}, which has bodies inlined into it.",
            );
            debug!("Specializing {dst} optimized out size {optimized_out_size} (scaled).");

            self.summaries.set_function(dst, info);
            for (edge, predicate) in edge_predicates {
                self.edge_set_predicate(edge, Some(predicate));
            }
        } else {
            self.summaries.set_function(dst, info);
        }

        if self.graph.node(dst).inlined_to.is_none() {
            self.update_overall_summary(dst);
        }
    }

    /// Copies the call `edge` so that it leaves `caller`, optionally calling
    /// `callee` directly.
    pub fn duplicate_call(
        &mut self,
        edge: EdgeId,
        caller: NodeId,
        callee: Option<NodeId>,
    ) -> EdgeId {
        let new_edge = self.graph.duplicate_edge(edge, caller);
        if let Some(callee) = callee {
            if self.graph.edge(new_edge).is_indirect() {
                self.graph.make_direct(new_edge, callee);
            } else {
                self.graph.redirect_callee(new_edge, callee);
            }
        }

        let mut summary = self.summaries.call(edge).clone();
        let predicate = summary.predicate.take();
        self.summaries.set_call(new_edge, summary);
        self.edge_set_predicate(new_edge, predicate);
        if self.graph.edge(edge).is_indirect() && !self.graph.edge(new_edge).is_indirect() {
            self.account_for_direct_call(new_edge);
        }
        new_edge
    }
}
