use crate::{
    call_graph::{CallGraph, EdgeId, IndirectCallInfo, InlineFailed, NodeId},
    config::SummaryConfig,
    growth_cache::EdgeGrowthCache,
    predicate::Predicate,
    summary::{CallSummary, FunctionSummary, Summaries},
};
use itertools::Itertools;
use tracing::debug;

/// Owns the call graph together with the summaries describing it.
///
/// Mutations of the graph go through the methods of this type so that
/// summaries and the growth cache are updated together with the graph.
#[derive(Clone, Debug, Default)]
pub struct InlineAnalysis {
    pub graph: CallGraph,
    pub summaries: Summaries,
    pub config: SummaryConfig,
    pub(crate) growth_cache: Option<EdgeGrowthCache>,
}
impl InlineAnalysis {
    #[must_use]
    pub fn new(config: SummaryConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn add_function(&mut self, name: impl Into<String>) -> NodeId {
        let id = self.graph.add_node(name);
        self.summaries.set_function(id, FunctionSummary::default());
        id
    }
    pub fn add_alias(&mut self, name: impl Into<String>, target: NodeId) -> NodeId {
        let id = self.graph.add_alias(name, target);
        self.summaries.set_function(id, FunctionSummary::default());
        id
    }
    pub fn add_call(&mut self, caller: NodeId, callee: NodeId, frequency: i32) -> EdgeId {
        let id = self.graph.add_edge(caller, callee, frequency);
        self.summaries.set_call(id, CallSummary::default());
        id
    }
    pub fn add_indirect_call(
        &mut self,
        caller: NodeId,
        info: IndirectCallInfo,
        frequency: i32,
    ) -> EdgeId {
        let id = self.graph.add_indirect_edge(caller, info, frequency);
        self.summaries.set_call(id, CallSummary::default());
        id
    }

    pub fn remove_call(&mut self, edge: EdgeId) {
        self.reset_edge_growth_cache(edge);
        self.summaries.remove_call(edge);
        self.graph.remove_edge(edge);
    }
    /// Removes a function with all calls from and to it.
    pub fn remove_function(&mut self, node: NodeId) {
        let data = self.graph.node(node);
        let edges = data
            .callers
            .iter()
            .chain(&data.callees)
            .chain(&data.indirect_calls)
            .copied()
            .unique()
            .collect::<Vec<_>>();
        for edge in edges {
            self.remove_call(edge);
        }
        self.summaries.remove_function(node);
        self.graph.remove_node(node);
    }
    /// Removes a function along with the function bodies inlined into it.
    pub fn remove_function_and_inline_clones(&mut self, node: NodeId) {
        let inlined = self
            .graph
            .node(node)
            .callees
            .iter()
            .filter(|edge| self.graph.edge(**edge).is_inlined())
            .filter_map(|edge| self.graph.edge(*edge).callee)
            .collect::<Vec<_>>();
        for callee in inlined {
            self.remove_function_and_inline_clones(callee);
        }
        self.remove_function(node);
    }

    pub fn redirect_call(&mut self, edge: EdgeId, callee: NodeId) {
        self.reset_edge_growth_cache(edge);
        self.graph.redirect_callee(edge, callee);
    }
    /// Resolves an indirect call, which makes the call itself cheaper.
    pub fn make_direct(&mut self, edge: EdgeId, callee: NodeId) {
        self.reset_edge_growth_cache(edge);
        self.graph.make_direct(edge, callee);
        self.account_for_direct_call(edge);
    }
    pub(crate) fn account_for_direct_call(&mut self, edge: EdgeId) {
        let size_delta = self.config.size_weights.devirtualization_benefit();
        let time_delta = self.config.time_weights.devirtualization_benefit();
        let summary = self.summaries.call_mut(edge);
        summary.call_stmt_size -= size_delta;
        summary.call_stmt_time -= time_delta;
    }

    /// The function standing for unreachable code, created on first use.
    pub fn unreachable_node(&mut self) -> NodeId {
        let id = self.graph.unreachable_node();
        if self.summaries.get_function(id).is_none() {
            self.summaries.set_function(id, FunctionSummary::default());
        }
        id
    }

    /// Sets the predicate under which the call is executed.
    ///
    /// Calls that can't be executed are redirected to the unreachable
    /// function.
    pub fn edge_set_predicate(&mut self, edge: EdgeId, predicate: Option<Predicate>) {
        if predicate.is_some_and(|it| it.is_false()) {
            self.redirect_to_unreachable(edge);
        }
        self.summaries.call_mut(edge).predicate = predicate.filter(|it| !it.is_true());
    }

    /// Makes the call a call to the unreachable function that costs nothing.
    pub fn redirect_to_unreachable(&mut self, edge: EdgeId) {
        let inlined_callee = {
            let edge = self.graph.edge(edge);
            if edge.is_inlined() {
                edge.callee
            } else {
                None
            }
        };
        let target = self.unreachable_node();
        debug!(
            "Redirecting unreachable call {edge} in {} to {}.",
            self.graph.node(self.graph.edge(edge).caller).name,
            self.graph.node(target).name,
        );
        self.reset_edge_growth_cache(edge);
        if self.graph.edge(edge).is_indirect() {
            self.graph.make_direct(edge, target);
        } else {
            self.graph.redirect_callee(edge, target);
        }

        let data = self.graph.edge_mut(edge);
        data.inline_failed = Some(InlineFailed::Unreachable);
        data.frequency = 0;
        data.count = 0;
        let summary = self.summaries.call_mut(edge);
        summary.call_stmt_size = 0;
        summary.call_stmt_time = 0;

        if let Some(callee) = inlined_callee {
            self.remove_function_and_inline_clones(callee);
        }
    }
}

#[cfg(test)]
mod test {
    use super::InlineAnalysis;
    use crate::{
        call_graph::{IndirectCallInfo, InlineFailed},
        predicate::Predicate,
        SummaryConfig,
    };

    #[test]
    fn false_predicates_make_calls_unreachable() {
        let mut analysis = InlineAnalysis::new(SummaryConfig::default());
        let caller = analysis.add_function("caller");
        let callee = analysis.add_function("callee");
        let call = analysis.add_call(caller, callee, 1000);
        analysis.summaries.call_mut(call).call_stmt_size = 3;

        analysis.edge_set_predicate(call, Some(Predicate::not_inlined()));
        assert_eq!(
            analysis.summaries.call(call).predicate,
            Some(Predicate::not_inlined()),
        );
        analysis.edge_set_predicate(call, Some(Predicate::TRUE));
        assert_eq!(analysis.summaries.call(call).predicate, None);

        analysis.edge_set_predicate(call, Some(Predicate::FALSE));
        let edge = analysis.graph.edge(call);
        let unreachable = analysis.graph.existing_unreachable_node().unwrap();
        assert_eq!(edge.callee, Some(unreachable));
        assert_eq!(edge.inline_failed, Some(InlineFailed::Unreachable));
        assert_eq!(edge.frequency, 0);
        assert_eq!(analysis.summaries.call(call).call_stmt_size, 0);
        assert!(analysis.graph.node(callee).callers.is_empty());
    }

    #[test]
    fn unreachable_indirect_calls_become_direct() {
        let mut analysis = InlineAnalysis::new(SummaryConfig::default());
        let caller = analysis.add_function("caller");
        let call = analysis.add_indirect_call(
            caller,
            IndirectCallInfo {
                param_index: 0,
                polymorphic: true,
                agg: None,
            },
            1000,
        );
        analysis.redirect_to_unreachable(call);
        assert!(!analysis.graph.edge(call).is_indirect());
        assert!(analysis.graph.node(caller).indirect_calls.is_empty());
    }

    #[test]
    fn removing_functions_removes_their_calls() {
        let mut analysis = InlineAnalysis::new(SummaryConfig::default());
        let caller = analysis.add_function("caller");
        let callee = analysis.add_function("callee");
        let call = analysis.add_call(caller, callee, 1000);
        analysis.remove_function(callee);
        assert!(!analysis.graph.contains_edge(call));
        assert!(analysis.summaries.get_call(call).is_none());
        assert!(analysis.summaries.get_function(callee).is_none());
        assert!(analysis.graph.node(caller).callees.is_empty());
    }

    #[test]
    fn direct_calls_are_cheaper() {
        let mut analysis = InlineAnalysis::new(SummaryConfig::default());
        let caller = analysis.add_function("caller");
        let target = analysis.add_function("target");
        let call = analysis.add_indirect_call(
            caller,
            IndirectCallInfo {
                param_index: 0,
                polymorphic: false,
                agg: None,
            },
            1000,
        );
        let summary = analysis.summaries.call_mut(call);
        summary.call_stmt_size = 3;
        summary.call_stmt_time = 15;
        analysis.make_direct(call, target);
        assert_eq!(analysis.summaries.call(call).call_stmt_size, 1);
        assert_eq!(analysis.summaries.call(call).call_stmt_time, 10);
    }
}
