//! How inlining a call or a whole function changes code size.

use crate::{
    call_graph::{EdgeId, NodeId},
    context::InlineAnalysis,
    growth_cache::EdgeGrowthCacheEntry,
    hints::{InlineHint, InlineHints},
};

#[derive(Debug, Default)]
struct GrowthData {
    self_recursive: bool,
    uninlinable: bool,
    growth: i32,
}

impl InlineAnalysis {
    /// Estimates the body of the callee of `edge` as it would look when
    /// inlined there. Fills the growth cache if it's enabled.
    fn do_estimate_edge(&mut self, edge: EdgeId) -> EdgeGrowthCacheEntry {
        let data = self.graph.edge(edge);
        assert!(!data.is_inlined(), "Call {edge} is already inlined.");
        let callee = data
            .callee
            .unwrap_or_else(|| panic!("Can't estimate indirect call {edge}."));
        let callee = self.graph.ultimate_alias_target(callee);
        let count = data.count;
        let is_hot = data.maybe_hot();
        let root_count = self.graph.node(self.graph.root(data.caller)).count;

        let properties = self.evaluate_properties_for_edge(edge, true);
        let estimate = self.estimate_node_size_and_time(
            callee,
            properties.clauses,
            &properties.known,
            &self.summaries.call(edge).params,
        );

        // With profile feedback, hot calls that dominate their caller may
        // ignore size limits.
        let mut hints = estimate.hints | self.simple_edge_hints(edge);
        if count != 0 && is_hot && count * 2 > root_count {
            hints |= InlineHint::KnownHot;
        }
        assert!(estimate.size >= 0 && estimate.time >= 0.0);

        let entry = EdgeGrowthCacheEntry {
            size: estimate.size,
            time: estimate.time,
            nonspec_time: estimate.nonspec_time,
            hints,
        };
        if let Some(cache) = &mut self.growth_cache {
            cache.set(edge, entry);
            self.summaries.function_mut(callee).min_size = estimate.min_size;
        }
        entry
    }
    fn cached_or_estimated_edge(&mut self, edge: EdgeId) -> EdgeGrowthCacheEntry {
        match self.growth_cache.as_ref().and_then(|cache| cache.get(edge)) {
            Some(entry) => *entry,
            None => self.do_estimate_edge(edge),
        }
    }

    /// Time of the callee of `edge` when inlined there.
    pub fn estimate_edge_time(&mut self, edge: EdgeId) -> f64 {
        self.cached_or_estimated_edge(edge).time
    }
    /// Time of the callee of `edge` when inlined there without specializing
    /// it for the known arguments.
    pub fn estimate_edge_nonspec_time(&mut self, edge: EdgeId) -> f64 {
        self.cached_or_estimated_edge(edge).nonspec_time
    }
    /// Size of the callee of `edge` when inlined there.
    pub fn estimate_edge_size(&mut self, edge: EdgeId) -> i32 {
        self.cached_or_estimated_edge(edge).size
    }
    pub fn estimate_edge_hints(&mut self, edge: EdgeId) -> InlineHints {
        self.cached_or_estimated_edge(edge).hints
    }
    /// How much the caller grows when `edge` gets inlined: the inlined body
    /// replaces the call statement.
    pub fn estimate_edge_growth(&mut self, edge: EdgeId) -> i32 {
        self.estimate_edge_size(edge) - self.summaries.call(edge).call_stmt_size
    }

    /// Hints that follow from the call graph alone.
    #[must_use]
    pub fn simple_edge_hints(&self, edge: EdgeId) -> InlineHints {
        let mut hints = InlineHints::empty();
        let data = self.graph.edge(edge);
        let Some(callee) = data.callee else {
            return hints;
        };
        let callee = self.graph.ultimate_alias_target(callee);
        let to = self.graph.root(data.caller);

        let scc_no = self.summaries.function(to).scc_no;
        if scc_no != 0
            && scc_no == self.summaries.function(callee).scc_no
            && !self.graph.is_recursive(edge)
        {
            hints |= InlineHint::SameScc;
        }

        let callee_data = self.graph.node(callee);
        if let (Some(caller_module), Some(callee_module)) =
            (self.graph.node(data.caller).module, callee_data.module)
        {
            if caller_module != callee_module && !callee_data.merged_comdat {
                hints |= InlineHint::CrossModule;
            }
        }
        hints
    }

    /// Size of `node` after inlining `edge`, which is a call in `node` or in
    /// a body inlined into it.
    pub fn estimate_size_after_inlining(&mut self, node: NodeId, edge: EdgeId) -> i32 {
        let size = self.summaries.function(node).size;
        let executed = self
            .summaries
            .call(edge)
            .predicate
            .map_or(true, |predicate| !predicate.is_false());
        if !executed {
            return size;
        }
        let size = size + self.estimate_edge_growth(edge);
        assert!(size >= 0);
        size
    }

    /// Estimates how much the program grows when `node` is inlined into all
    /// of its callers.
    pub fn estimate_growth(&mut self, node: NodeId) -> i32 {
        let mut data = GrowthData::default();
        self.collect_callers_growth(node, &mut data);
        let size = self.summaries.function(node).size;
        let node_data = self.graph.node(node);

        // The growth of self-recursive functions is infinite in theory. Keep
        // it finite and positive.
        if data.self_recursive {
            data.growth.max(size)
        } else if node_data.external || data.uninlinable {
            data.growth
        } else if node_data.will_be_removed_if_no_direct_calls {
            data.growth - size
        } else if node_data.comdat && node_data.can_remove_if_no_direct_calls {
            // COMDAT functions are often not shared across units.
            let unshared = 100 - self.config.comdat_sharing_probability;
            data.growth - (size * unshared + 50) / 100
        } else {
            data.growth
        }
    }
    fn collect_callers_growth(&mut self, node: NodeId, data: &mut GrowthData) {
        let node_data = self.graph.node(node);
        let callers = node_data.callers.clone();
        let aliases = node_data.aliases.clone();
        for edge in callers {
            let reason = self
                .graph
                .edge(edge)
                .inline_failed
                .unwrap_or_else(|| panic!("Call {edge} is already inlined."));
            if reason.is_final() {
                data.uninlinable = true;
                continue;
            }
            if self.graph.is_recursive(edge) {
                data.self_recursive = true;
                continue;
            }
            data.growth += self.estimate_edge_growth(edge);
        }
        for alias in aliases {
            self.collect_callers_growth(alias, data);
        }
    }

    /// Cheaply guesses whether [`Self::estimate_growth`] is positive, given
    /// the growth of one of the calls of `node`.
    ///
    /// Functions with many callers are assumed to grow the program without
    /// estimating every call.
    pub fn growth_likely_positive(&mut self, node: NodeId, edge_growth: i32) -> bool {
        assert!(edge_growth > 0);
        let data = self.graph.node(node);
        if data.external || !data.can_remove_if_no_direct_calls || data.address_taken {
            return true;
        }

        let mut max_callers = self.summaries.function(node).size * 4 / edge_growth + 2;
        if self.has_too_many_callers(node, &mut max_callers) {
            return true;
        }

        // COMDAT functions are allowed to be optimistic: they are small and
        // their growth already accounts for sharing.
        let data = self.graph.node(node);
        if data.comdat {
            if !data.can_remove_if_no_direct_calls {
                return true;
            }
        } else if !data.will_be_removed_if_no_direct_calls {
            return true;
        }
        self.estimate_growth(node) > 0
    }
    fn has_too_many_callers(&self, node: NodeId, max_callers: &mut i32) -> bool {
        let data = self.graph.node(node);
        if !data.can_remove_if_no_direct_calls {
            return true;
        }
        for edge in &data.callers {
            *max_callers -= 1;
            let uninlinable = self
                .graph
                .edge(*edge)
                .inline_failed
                .is_some_and(|reason| reason.is_final());
            if *max_callers == 0 || uninlinable {
                return true;
            }
        }
        data.aliases
            .iter()
            .any(|alias| self.has_too_many_callers(*alias, max_callers))
    }
}

#[cfg(test)]
mod test {
    use crate::{
        call_graph::InlineFailed,
        hints::InlineHint,
        predicate::condition::Literal,
        test_utils::{add_caller, add_leaf_function, new_analysis},
    };

    #[test]
    fn inlining_replaces_the_call() {
        let mut analysis = new_analysis();
        let callee = add_leaf_function(&mut analysis, "callee", 10, 0);
        let (caller, call) = add_caller(&mut analysis, "caller", callee, Literal::int(0, 32));

        // The prologue only exists in the offline copy.
        assert_eq!(analysis.summaries.function(callee).size, 12);
        assert_eq!(analysis.estimate_edge_size(call), 10);
        assert_eq!(analysis.estimate_edge_growth(call), 7);
        assert_eq!(analysis.summaries.function(caller).size, 5);
        assert_eq!(analysis.estimate_size_after_inlining(caller, call), 12);
    }

    #[test]
    fn removable_functions_with_one_caller_shrink_the_program() {
        let mut analysis = new_analysis();
        let callee = add_leaf_function(&mut analysis, "callee", 10, 0);
        add_caller(&mut analysis, "caller", callee, Literal::int(0, 32));
        assert_eq!(analysis.estimate_growth(callee), -5);
        assert!(!analysis.growth_likely_positive(callee, 7));

        analysis.graph.node_mut(callee).address_taken = true;
        assert!(analysis.growth_likely_positive(callee, 7));
    }

    #[test]
    fn growth_depends_on_whether_the_body_stays() {
        let mut analysis = new_analysis();
        let callee = add_leaf_function(&mut analysis, "callee", 10, 0);
        add_caller(&mut analysis, "first", callee, Literal::int(0, 32));
        add_caller(&mut analysis, "second", callee, Literal::int(0, 32));
        assert_eq!(analysis.estimate_growth(callee), 2);

        analysis.graph.node_mut(callee).external = true;
        assert_eq!(analysis.estimate_growth(callee), 14);

        let data = analysis.graph.node_mut(callee);
        data.external = false;
        data.will_be_removed_if_no_direct_calls = false;
        data.comdat = true;
        assert_eq!(analysis.estimate_growth(callee), 4);
    }

    #[test]
    fn uninlinable_callers_keep_the_body() {
        let mut analysis = new_analysis();
        let callee = add_leaf_function(&mut analysis, "callee", 10, 0);
        add_caller(&mut analysis, "first", callee, Literal::int(0, 32));
        let (_, call) = add_caller(&mut analysis, "second", callee, Literal::int(0, 32));
        analysis.graph.edge_mut(call).inline_failed = Some(InlineFailed::FunctionNotInlinable);
        assert_eq!(analysis.estimate_growth(callee), 7);
        assert!(analysis.growth_likely_positive(callee, 7));
    }

    #[test]
    fn hot_calls_dominating_their_caller() {
        let mut analysis = new_analysis();
        let callee = add_leaf_function(&mut analysis, "callee", 10, 0);
        let (caller, call) = add_caller(&mut analysis, "caller", callee, Literal::int(0, 32));
        assert!(!analysis.estimate_edge_hints(call).contains(InlineHint::KnownHot));

        analysis.graph.node_mut(caller).count = 100;
        analysis.graph.edge_mut(call).count = 60;
        assert!(analysis.estimate_edge_hints(call).contains(InlineHint::KnownHot));
    }

    #[test]
    fn calls_across_modules_are_hinted() {
        let mut analysis = new_analysis();
        let callee = add_leaf_function(&mut analysis, "callee", 10, 0);
        let (caller, call) = add_caller(&mut analysis, "caller", callee, Literal::int(0, 32));
        analysis.graph.node_mut(caller).module = Some(0);
        analysis.graph.node_mut(callee).module = Some(1);
        assert!(analysis.simple_edge_hints(call).contains(InlineHint::CrossModule));

        analysis.graph.node_mut(callee).merged_comdat = true;
        assert!(!analysis.simple_edge_hints(call).contains(InlineHint::CrossModule));

        analysis.summaries.function_mut(caller).scc_no = 2;
        analysis.summaries.function_mut(callee).scc_no = 2;
        let hints = analysis.estimate_edge_hints(call);
        assert!(hints.contains(InlineHint::SameScc));
        assert!(hints.contains(InlineHint::InScc));
    }
}
