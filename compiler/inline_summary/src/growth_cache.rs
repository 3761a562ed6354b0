//! Results of the last estimate per edge, so that the inliner can re-rank
//! edges cheaply.

use crate::{
    call_graph::{EdgeId, NodeId},
    context::InlineAnalysis,
    hints::InlineHints,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EdgeGrowthCacheEntry {
    pub size: i32,
    pub time: f64,
    pub nonspec_time: f64,
    pub hints: InlineHints,
}

#[derive(Clone, Debug, Default)]
pub struct EdgeGrowthCache {
    entries: Vec<Option<EdgeGrowthCacheEntry>>,
}
impl EdgeGrowthCache {
    #[must_use]
    pub fn get(&self, edge: EdgeId) -> Option<&EdgeGrowthCacheEntry> {
        self.entries.get(*edge).and_then(Option::as_ref)
    }
    pub fn set(&mut self, edge: EdgeId, entry: EdgeGrowthCacheEntry) {
        if self.entries.len() <= *edge {
            self.entries.resize(*edge + 1, None);
        }
        self.entries[*edge] = Some(entry);
    }
    pub fn reset(&mut self, edge: EdgeId) {
        if let Some(entry) = self.entries.get_mut(*edge) {
            *entry = None;
        }
    }
}

impl InlineAnalysis {
    /// Starts caching edge estimates, sized for all current edges.
    pub fn init_growth_cache(&mut self) {
        let mut cache = EdgeGrowthCache::default();
        cache.entries.resize(self.graph.edges_max_uid(), None);
        self.growth_cache = Some(cache);
    }
    pub fn free_growth_cache(&mut self) {
        self.growth_cache = None;
    }
    #[must_use]
    pub const fn growth_cache(&self) -> Option<&EdgeGrowthCache> {
        self.growth_cache.as_ref()
    }

    pub fn reset_edge_growth_cache(&mut self, edge: EdgeId) {
        if let Some(cache) = &mut self.growth_cache {
            cache.reset(edge);
        }
    }
    /// Forgets the estimates of all calls to and from the function, including
    /// calls from bodies inlined into it.
    pub fn reset_node_growth_cache(&mut self, node: NodeId) {
        let callers = self.graph.node(node).callers.clone();
        for edge in callers {
            self.reset_edge_growth_cache(edge);
        }
        self.reset_callees_growth_cache(node);
    }
    fn reset_callees_growth_cache(&mut self, node: NodeId) {
        let data = self.graph.node(node);
        let edges = data
            .callees
            .iter()
            .chain(&data.indirect_calls)
            .copied()
            .collect::<Vec<_>>();
        for edge in edges {
            self.reset_edge_growth_cache(edge);
            let data = self.graph.edge(edge);
            if let (true, Some(callee)) = (data.is_inlined(), data.callee) {
                self.reset_callees_growth_cache(callee);
            }
        }
    }
}
