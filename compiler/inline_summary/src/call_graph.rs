//! The call graph the summaries are attached to.
//!
//! Nodes are functions (or inlined copies of them), edges are call sites.
//! Edges whose callee is unknown are indirect calls. An edge without an
//! `inline_failed` reason has been inlined: its callee is then an inline
//! clone whose `inlined_to` points at the function it ended up in.

use crate::{
    body::FunctionBody,
    id::IdGenerator,
    impl_countable_id,
    known::{KnownAggregate, PolymorphicContext},
    predicate::condition::{AggregatePosition, Literal},
    utils::{HashMapExtension, VecExtension},
};
use derive_more::Deref;
use rustc_hash::FxHashMap;
use std::fmt::{self, Display, Formatter};
use strum_macros::IntoStaticStr;
use tracing::debug;

#[derive(Clone, Copy, Debug, Default, Deref, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(usize);
impl_countable_id!(NodeId);
impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, Deref, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct EdgeId(usize);
impl_countable_id!(EdgeId);
impl Display for EdgeId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    /// The function this node is a copy of. Inline clones share it with the
    /// node they were cloned from.
    pub declaration: NodeId,
    /// `None` if the body isn't available in this unit.
    pub body: Option<FunctionBody>,
    pub callers: Vec<EdgeId>,
    pub callees: Vec<EdgeId>,
    pub indirect_calls: Vec<EdgeId>,
    pub inlined_to: Option<NodeId>,
    pub clone_of: Option<NodeId>,
    /// Parameters a specialized clone has replaced by constants.
    pub tree_map: Vec<ReplaceMap>,
    /// Values of the parameters propagated by interprocedural constant
    /// propagation, indexed by parameter.
    pub known_constants: Vec<Option<Literal>>,
    pub alias_target: Option<NodeId>,
    pub aliases: Vec<NodeId>,

    pub declared_inline: bool,
    /// Inlined even without optimization.
    pub always_inline: bool,
    /// The body is only available for inlining; the function is emitted
    /// elsewhere.
    pub external: bool,
    pub comdat: bool,
    /// Merged from COMDAT copies in several units.
    pub merged_comdat: bool,
    pub address_taken: bool,
    pub can_remove_if_no_direct_calls: bool,
    pub will_be_removed_if_no_direct_calls: bool,
    /// The function only adjusts `this` and tail-calls its single callee.
    pub thunk: bool,
    /// The translation unit the function comes from.
    pub module: Option<u32>,
    /// Profile count, zero if unknown.
    pub count: i64,
}
impl Node {
    fn new(name: String, declaration: NodeId) -> Self {
        Self {
            name,
            declaration,
            body: None,
            callers: vec![],
            callees: vec![],
            indirect_calls: vec![],
            inlined_to: None,
            clone_of: None,
            tree_map: vec![],
            known_constants: vec![],
            alias_target: None,
            aliases: vec![],
            declared_inline: false,
            always_inline: false,
            external: false,
            comdat: false,
            merged_comdat: false,
            address_taken: false,
            can_remove_if_no_direct_calls: true,
            will_be_removed_if_no_direct_calls: true,
            thunk: false,
            module: None,
            count: 0,
        }
    }
}

/// A parameter replaced by a constant in a specialized clone.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReplaceMap {
    pub param_index: usize,
    pub value: Literal,
}

#[derive(Clone, Debug)]
pub struct Edge {
    pub caller: NodeId,
    /// `None` for indirect calls.
    pub callee: Option<NodeId>,
    /// `None` once the call is inlined.
    pub inline_failed: Option<InlineFailed>,
    /// How often the call runs per invocation of the caller, relative to
    /// [`crate::FREQ_BASE`].
    pub frequency: i32,
    /// Profile count, zero if unknown.
    pub count: i64,
    /// One per argument; empty if nothing is known about the arguments.
    pub jump_functions: Vec<JumpFunction>,
    /// Set for calls that started out indirect.
    pub indirect_info: Option<IndirectCallInfo>,
    pub call_stmt_cannot_inline: bool,
}
impl Edge {
    #[must_use]
    pub const fn is_indirect(&self) -> bool {
        self.callee.is_none()
    }
    #[must_use]
    pub const fn is_inlined(&self) -> bool {
        self.inline_failed.is_none()
    }
    /// Whether the call may be executed often enough to matter.
    #[must_use]
    pub const fn maybe_hot(&self) -> bool {
        self.frequency > 0
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "snake_case")]
pub enum InlineFailed {
    Unspecified,
    NotConsidered,
    BodyNotAvailable,
    FunctionNotInlinable,
    MismatchedArguments,
    IndirectUnknownCall,
    Unreachable,
}
impl InlineFailed {
    /// Whether the reason can never go away.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(
            self,
            Self::BodyNotAvailable
                | Self::FunctionNotInlinable
                | Self::MismatchedArguments
                | Self::Unreachable,
        )
    }
}

/// How an argument of a call is computed from the caller's parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct JumpFunction {
    pub kind: JumpFunctionKind,
    /// Known constant contents of the aggregate the argument is or points to.
    pub agg: Option<KnownAggregate>,
    pub context: Option<PolymorphicContext>,
}
impl JumpFunction {
    #[must_use]
    pub const fn unknown() -> Self {
        Self::from_kind(JumpFunctionKind::Unknown)
    }
    #[must_use]
    pub const fn constant(value: Literal) -> Self {
        Self::from_kind(JumpFunctionKind::Constant(value))
    }
    /// The caller's parameter `formal_id`, passed unchanged.
    #[must_use]
    pub const fn pass_through(formal_id: usize) -> Self {
        Self::from_kind(JumpFunctionKind::PassThrough {
            formal_id,
            nop: true,
            agg_preserved: true,
        })
    }
    #[must_use]
    pub const fn from_kind(kind: JumpFunctionKind) -> Self {
        Self {
            kind,
            agg: None,
            context: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JumpFunctionKind {
    Unknown,
    Constant(Literal),
    PassThrough {
        formal_id: usize,
        /// The value is passed without an arithmetic operation applied.
        nop: bool,
        /// Memory the parameter points to isn't modified before the call.
        agg_preserved: bool,
    },
    /// The address of a part of the object the caller's parameter points to.
    Ancestor {
        formal_id: usize,
        /// In bits.
        offset: i64,
        agg_preserved: bool,
    },
}

/// Where the target of an indirect call comes from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IndirectCallInfo {
    pub param_index: usize,
    /// A virtual call on an object passed in the parameter.
    pub polymorphic: bool,
    /// The target is loaded from the aggregate the parameter is or points to.
    pub agg: Option<AggregatePosition>,
}

#[derive(Clone, Debug, Default)]
pub struct CallGraph {
    nodes: FxHashMap<NodeId, Node>,
    edges: FxHashMap<EdgeId, Edge>,
    node_ids: IdGenerator<NodeId>,
    edge_ids: IdGenerator<EdgeId>,
    unreachable: Option<NodeId>,
}
impl CallGraph {
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes
            .get(&id)
            .unwrap_or_else(|| panic!("Node {id} doesn't exist."))
    }
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes
            .get_mut(&id)
            .unwrap_or_else(|| panic!("Node {id} doesn't exist."))
    }
    #[must_use]
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }
    #[must_use]
    pub fn edge(&self, id: EdgeId) -> &Edge {
        self.edges
            .get(&id)
            .unwrap_or_else(|| panic!("Edge {id} doesn't exist."))
    }
    pub fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
        self.edges
            .get_mut(&id)
            .unwrap_or_else(|| panic!("Edge {id} doesn't exist."))
    }
    #[must_use]
    pub fn contains_edge(&self, id: EdgeId) -> bool {
        self.edges.contains_key(&id)
    }
    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.edges.keys().copied()
    }
    /// One past the largest edge ID handed out so far.
    #[must_use]
    pub const fn edges_max_uid(&self) -> usize {
        self.edge_ids.max_uid()
    }

    pub fn add_node(&mut self, name: impl Into<String>) -> NodeId {
        let id = self.node_ids.generate();
        self.nodes.force_insert(id, Node::new(name.into(), id));
        id
    }
    /// Adds `name` as another symbol for `target`.
    pub fn add_alias(&mut self, name: impl Into<String>, target: NodeId) -> NodeId {
        let id = self.add_node(name);
        self.node_mut(id).alias_target = Some(target);
        self.node_mut(target).aliases.push(id);
        id
    }

    pub fn add_edge(&mut self, caller: NodeId, callee: NodeId, frequency: i32) -> EdgeId {
        let id = self.insert_edge(Edge {
            caller,
            callee: Some(callee),
            inline_failed: Some(InlineFailed::Unspecified),
            frequency,
            count: 0,
            jump_functions: vec![],
            indirect_info: None,
            call_stmt_cannot_inline: false,
        });
        self.node_mut(caller).callees.push(id);
        self.node_mut(callee).callers.push(id);
        id
    }
    pub fn add_indirect_edge(
        &mut self,
        caller: NodeId,
        info: IndirectCallInfo,
        frequency: i32,
    ) -> EdgeId {
        let id = self.insert_edge(Edge {
            caller,
            callee: None,
            inline_failed: Some(InlineFailed::IndirectUnknownCall),
            frequency,
            count: 0,
            jump_functions: vec![],
            indirect_info: Some(info),
            call_stmt_cannot_inline: false,
        });
        self.node_mut(caller).indirect_calls.push(id);
        id
    }
    fn insert_edge(&mut self, edge: Edge) -> EdgeId {
        let id = self.edge_ids.generate();
        self.edges.force_insert(id, edge);
        id
    }

    /// Removes an edge from the graph. Summaries must be dropped by the
    /// caller.
    pub fn remove_edge(&mut self, id: EdgeId) -> Edge {
        let edge = self.edges.force_remove(&id);
        let caller = self.node_mut(edge.caller);
        match edge.callee {
            Some(_) => caller.callees.force_remove_item(&id),
            None => caller.indirect_calls.force_remove_item(&id),
        }
        if let Some(callee) = edge.callee {
            self.node_mut(callee).callers.force_remove_item(&id);
        }
        edge
    }
    /// Removes a node whose edges are already gone.
    pub fn remove_node(&mut self, id: NodeId) -> Node {
        let node = self.nodes.force_remove(&id);
        assert!(
            node.callers.is_empty() && node.callees.is_empty() && node.indirect_calls.is_empty(),
            "Node {id} still has edges.",
        );
        if let Some(target) = node.alias_target {
            if let Some(target) = self.nodes.get_mut(&target) {
                target.aliases.retain(|alias| *alias != id);
            }
        }
        if self.unreachable == Some(id) {
            self.unreachable = None;
        }
        node
    }

    /// Follows aliases to the function that actually gets called.
    #[must_use]
    pub fn ultimate_alias_target(&self, mut id: NodeId) -> NodeId {
        while let Some(target) = self.node(id).alias_target {
            id = target;
        }
        id
    }
    /// The function `id` got inlined into or `id` itself.
    #[must_use]
    pub fn root(&self, id: NodeId) -> NodeId {
        self.node(id).inlined_to.unwrap_or(id)
    }
    /// Whether the call ends up calling the function containing it.
    #[must_use]
    pub fn is_recursive(&self, edge: EdgeId) -> bool {
        let edge = self.edge(edge);
        let Some(callee) = edge.callee else {
            return false;
        };
        let callee = self.ultimate_alias_target(callee);
        let caller = self.root(edge.caller);
        self.node(caller).declaration == self.node(callee).declaration
    }

    /// The function standing for unreachable code, created on first use.
    pub fn unreachable_node(&mut self) -> NodeId {
        if let Some(id) = self.unreachable {
            return id;
        }
        let id = self.add_node("__builtin_unreachable");
        self.unreachable = Some(id);
        id
    }
    #[must_use]
    pub const fn existing_unreachable_node(&self) -> Option<NodeId> {
        self.unreachable
    }

    /// Makes a direct call call `callee` instead.
    pub fn redirect_callee(&mut self, edge: EdgeId, callee: NodeId) {
        let old_callee = self
            .edge(edge)
            .callee
            .unwrap_or_else(|| panic!("Can't redirect indirect call {edge}."));
        if old_callee == callee {
            return;
        }
        debug!("Redirecting {edge} from {old_callee} to {callee}.");
        self.node_mut(old_callee).callers.force_remove_item(&edge);
        self.node_mut(callee).callers.push(edge);
        self.edge_mut(edge).callee = Some(callee);
    }
    /// Resolves an indirect call to `callee`.
    pub fn make_direct(&mut self, edge: EdgeId, callee: NodeId) {
        let caller = self.edge(edge).caller;
        assert!(self.edge(edge).is_indirect(), "Call {edge} is already direct.");
        debug!("Making {edge} a direct call to {callee}.");
        let caller = self.node_mut(caller);
        caller.indirect_calls.force_remove_item(&edge);
        caller.callees.push(edge);
        self.node_mut(callee).callers.push(edge);
        let edge = self.edge_mut(edge);
        edge.callee = Some(callee);
        edge.inline_failed = Some(InlineFailed::Unspecified);
    }

    /// Copies a node without its edges.
    pub fn duplicate_node(&mut self, id: NodeId, name: impl Into<String>) -> NodeId {
        let new_id = self.node_ids.generate();
        let original = self.node(id);
        let mut copy = Node::new(name.into(), original.declaration);
        copy.body = original.body.clone();
        copy.inlined_to = original.inlined_to;
        copy.clone_of = Some(id);
        copy.tree_map = original.tree_map.clone();
        copy.known_constants = original.known_constants.clone();
        copy.declared_inline = original.declared_inline;
        copy.always_inline = original.always_inline;
        copy.external = original.external;
        copy.comdat = original.comdat;
        copy.merged_comdat = original.merged_comdat;
        copy.thunk = original.thunk;
        copy.module = original.module;
        copy.count = original.count;
        self.nodes.force_insert(new_id, copy);
        new_id
    }
    /// Copies an edge so that it leaves `caller` instead.
    pub fn duplicate_edge(&mut self, id: EdgeId, caller: NodeId) -> EdgeId {
        let mut copy = self.edge(id).clone();
        copy.caller = caller;
        let callee = copy.callee;
        let new_id = self.insert_edge(copy);
        match callee {
            Some(callee) => {
                self.node_mut(caller).callees.push(new_id);
                self.node_mut(callee).callers.push(new_id);
            }
            None => self.node_mut(caller).indirect_calls.push(new_id),
        }
        new_id
    }
}

#[cfg(test)]
mod test {
    use super::{CallGraph, IndirectCallInfo, InlineFailed};

    #[test]
    fn aliases_resolve_to_their_target() {
        let mut graph = CallGraph::default();
        let function = graph.add_node("f");
        let alias = graph.add_alias("f_alias", function);
        let alias_of_alias = graph.add_alias("f_alias2", alias);
        assert_eq!(graph.ultimate_alias_target(alias_of_alias), function);
        assert_eq!(graph.node(function).aliases, vec![alias]);
    }

    #[test]
    fn recursion_is_detected_through_inline_clones() {
        let mut graph = CallGraph::default();
        let f = graph.add_node("f");
        let g = graph.add_node("g");
        let f_to_g = graph.add_edge(f, g, 1000);
        let clone = graph.duplicate_node(g, "g.inlined");
        graph.node_mut(clone).inlined_to = Some(f);
        graph.redirect_callee(f_to_g, clone);
        graph.edge_mut(f_to_g).inline_failed = None;
        let back = graph.add_edge(clone, f, 1000);
        let self_call = graph.add_edge(clone, g, 1000);

        assert!(graph.is_recursive(back));
        assert!(!graph.is_recursive(self_call));
        assert!(graph.node(g).callers.contains(&self_call));
        assert!(graph.node(g).callers.iter().all(|it| *it != f_to_g));
    }

    #[test]
    fn indirect_calls_become_direct() {
        let mut graph = CallGraph::default();
        let f = graph.add_node("f");
        let target = graph.add_node("target");
        let call = graph.add_indirect_edge(
            f,
            IndirectCallInfo {
                param_index: 0,
                polymorphic: false,
                agg: None,
            },
            500,
        );
        assert!(graph.edge(call).is_indirect());
        graph.make_direct(call, target);
        assert_eq!(graph.node(f).callees, vec![call]);
        assert!(graph.node(f).indirect_calls.is_empty());
        assert_eq!(graph.edge(call).inline_failed, Some(InlineFailed::Unspecified));

        let removed = graph.remove_edge(call);
        assert_eq!(removed.callee, Some(target));
        assert!(graph.node(target).callers.is_empty());
    }

    #[test]
    fn unreachable_node_is_shared() {
        let mut graph = CallGraph::default();
        let first = graph.unreachable_node();
        assert_eq!(graph.unreachable_node(), first);
        assert_eq!(graph.existing_unreachable_node(), Some(first));
    }
}
