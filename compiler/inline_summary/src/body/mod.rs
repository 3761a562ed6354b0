//! The view of a function body the analysis needs: a control-flow graph of
//! basic blocks in SSA form, the frontend's per-statement cost estimates and
//! loop information.

use crate::{
    call_graph::EdgeId,
    impl_countable_id,
    predicate::condition::{ConditionCode, Literal},
    FREQ_BASE, FREQ_MAX,
};
use derive_more::Deref;
use rustc_hash::FxHashSet;
use std::fmt::{self, Display, Formatter};

pub use self::builder::BodyBuilder;

mod builder;

#[derive(Clone, Copy, Debug, Default, Deref, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BlockId(usize);
impl_countable_id!(BlockId);
impl BlockId {
    pub const ENTRY: Self = Self(0);
}
impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, Deref, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CfgEdgeId(usize);
impl_countable_id!(CfgEdgeId);

#[derive(Clone, Copy, Debug, Default, Deref, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SsaName(usize);
impl_countable_id!(SsaName);
impl Display for SsaName {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "_{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, Deref, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct LoopId(usize);
impl_countable_id!(LoopId);

/// Identifies a statement by its block and position.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct StatementRef {
    pub block: BlockId,
    pub index: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionBody {
    pub parameters: Vec<Parameter>,
    /// `blocks[0]` is the entry block.
    pub blocks: Vec<BasicBlock>,
    pub edges: Vec<CfgEdge>,
    pub ssa_names: Vec<SsaDefinition>,
    pub loops: Vec<Loop>,
    pub stack_frame_size: i64,
    pub inlinable: bool,
    pub contains_cilk_spawn: bool,
    /// Without a profile, every block counts as executed once per call.
    pub has_profile: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Parameter {
    /// Bit-width of the parameter's type.
    pub size: u32,
    /// Whether the parameter lives in memory and is written to somewhere in
    /// the body.
    pub modified: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BasicBlock {
    pub frequency: i32,
    pub loop_father: Option<LoopId>,
    pub phis: Vec<Phi>,
    pub statements: Vec<Statement>,
    pub predecessors: Vec<CfgEdgeId>,
    pub successors: Vec<CfgEdgeId>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CfgEdge {
    pub source: BlockId,
    pub target: BlockId,
    pub kind: CfgEdgeKind,
}
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CfgEdgeKind {
    Normal,
    /// Taken when the block's condition holds.
    True,
    /// Taken when the block's condition doesn't hold.
    False,
    /// Taken when the block throws.
    Exception,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SsaDefinition {
    /// The value of a parameter on entry.
    Parameter(usize),
    /// The value of an uninitialized local variable.
    Undefined,
    Statement(StatementRef),
    Phi { block: BlockId, index: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Phi {
    pub result: SsaName,
    /// One argument per predecessor edge, in the same order.
    pub arguments: Vec<Operand>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    /// Estimated size in instructions.
    pub size: i32,
    /// Estimated time for a single execution.
    pub time: i32,
    pub has_float_operands: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StatementKind {
    Assign {
        lhs: Operand,
        rhs: Rvalue,
    },
    /// Ends a block with a `True` and a `False` successor edge.
    Condition {
        lhs: Operand,
        code: ConditionCode,
        rhs: Operand,
        floating: bool,
    },
    Switch {
        index: Operand,
        cases: Vec<SwitchCase>,
    },
    Call(Call),
    Return(Option<Operand>),
    /// Continues propagating an exception.
    Resume,
    Label,
    Debug,
    /// Marks the end of a variable's storage lifetime.
    Clobber,
    /// Anything else, such as inline assembly.
    Other {
        uses: Vec<Operand>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SwitchCase {
    /// `None` for the default label.
    pub low: Option<Literal>,
    /// Set for case ranges.
    pub high: Option<Literal>,
    pub target: BlockId,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    /// The call graph edge of this call site. Calls the frontend folds away
    /// have none and are accounted like ordinary statements.
    pub edge: Option<EdgeId>,
    pub arguments: Vec<CallArgument>,
    pub lhs: Option<SsaName>,
    pub builtin: Option<Builtin>,
    /// The callee has no side effects and only depends on its arguments.
    pub is_const: bool,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Builtin {
    ConstantP,
    Expect,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CallArgument {
    pub value: Operand,
    /// For arguments read from memory: blocks containing stores that may
    /// reach the call. `None` stands for the initial state of memory on
    /// entry.
    pub reaching_stores: Vec<Option<BlockId>>,
}
impl From<Operand> for CallArgument {
    fn from(value: Operand) -> Self {
        Self {
            value,
            reaching_stores: vec![],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Ssa(SsaName),
    /// A parameter that lives in memory instead of an SSA register.
    Param(usize),
    /// The function's return slot.
    Result,
    /// A local variable that lives in memory.
    Local,
    Global {
        /// Read-only with a known initializer.
        read_only: bool,
    },
    Constant(Literal),
    /// A link-time constant that isn't a literal, like a global's address.
    Invariant,
    Memory(Box<MemoryRef>),
    AddressOf(Box<Operand>),
}
impl Operand {
    #[must_use]
    pub fn memory(memory: MemoryRef) -> Self {
        Self::Memory(Box::new(memory))
    }
    #[must_use]
    pub fn address_of(operand: Self) -> Self {
        Self::AddressOf(Box::new(operand))
    }

    #[must_use]
    pub const fn is_register(&self) -> bool {
        matches!(self, Self::Ssa(_))
    }
    #[must_use]
    pub const fn is_min_invariant(&self) -> bool {
        matches!(self, Self::Constant(_) | Self::Invariant | Self::AddressOf(_))
    }
    /// Whether reading this operand reads memory.
    #[must_use]
    pub const fn is_memory_read(&self) -> bool {
        matches!(
            self,
            Self::Param(_) | Self::Result | Self::Local | Self::Global { .. } | Self::Memory(_),
        )
    }

    /// The object an access through this operand is based on.
    #[must_use]
    pub fn base_address(&self) -> BaseAddress<'_> {
        match self {
            Self::Memory(memory) if memory.deref => BaseAddress::Deref(&memory.base),
            Self::Memory(memory) => memory.base.base_address(),
            Self::AddressOf(inner) => BaseAddress::AddressOf(inner),
            other => BaseAddress::Operand(other),
        }
    }

    pub fn collect_ssa_uses(&self, uses: &mut Vec<SsaName>) {
        match self {
            Self::Ssa(name) => uses.push(*name),
            Self::Memory(memory) => {
                memory.base.collect_ssa_uses(uses);
                for index in &memory.indices {
                    index.collect_ssa_uses(uses);
                }
            }
            Self::AddressOf(inner) => inner.collect_ssa_uses(uses),
            Self::Param(_)
            | Self::Result
            | Self::Local
            | Self::Global { .. }
            | Self::Constant(_)
            | Self::Invariant => {}
        }
    }
}

/// Result of [`Operand::base_address`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BaseAddress<'a> {
    /// A declaration or register.
    Operand(&'a Operand),
    /// Memory pointed to by the operand.
    Deref(&'a Operand),
    AddressOf(&'a Operand),
}

#[derive(Clone, Debug, PartialEq)]
pub struct MemoryRef {
    /// A declaration, or with `deref`, the pointer that is dereferenced.
    pub base: Operand,
    pub deref: bool,
    /// Constant offset from the base in bits, if known.
    pub offset: Option<i64>,
    /// Bit-width of the accessed value.
    pub size: u32,
    /// Indices of array accesses on the way from the base.
    pub indices: Vec<Operand>,
    /// No store may have changed the accessed memory since function entry.
    pub preserved: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Rvalue {
    /// A copy or, from a memory operand, a load.
    Use(Operand),
    Convert(Operand),
    Unary(Operand),
    Binary(Operand, Operand),
    Compare(ConditionCode, Operand, Operand),
    Select(Operand, Operand, Operand),
}
impl Rvalue {
    pub fn collect_ssa_uses(&self, uses: &mut Vec<SsaName>) {
        match self {
            Self::Use(operand) | Self::Convert(operand) | Self::Unary(operand) => {
                operand.collect_ssa_uses(uses);
            }
            Self::Binary(lhs, rhs) | Self::Compare(_, lhs, rhs) => {
                lhs.collect_ssa_uses(uses);
                rhs.collect_ssa_uses(uses);
            }
            Self::Select(condition, then, otherwise) => {
                condition.collect_ssa_uses(uses);
                then.collect_ssa_uses(uses);
                otherwise.collect_ssa_uses(uses);
            }
        }
    }
}

/// A symbolic expression over SSA values, as produced by loop analysis.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Operand(Operand),
    Unary(Box<Expr>),
    Binary(Box<Expr>, Box<Expr>),
    Select(Box<Expr>, Box<Expr>, Box<Expr>),
}
impl Expr {
    #[must_use]
    pub const fn is_min_invariant(&self) -> bool {
        matches!(self, Self::Operand(operand) if operand.is_min_invariant())
    }
}
impl From<Operand> for Expr {
    fn from(operand: Operand) -> Self {
        Self::Operand(operand)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Loop {
    pub header: BlockId,
    pub parent: Option<LoopId>,
    pub depth: u32,
    /// Iteration counts of the exits whose count the loop analysis could
    /// express.
    pub iteration_counts: Vec<Expr>,
    /// Steps of induction variables defined in the loop.
    pub induction_steps: Vec<InductionStep>,
}
#[derive(Clone, Debug, PartialEq)]
pub struct InductionStep {
    pub block: BlockId,
    pub step: Expr,
}

impl Statement {
    #[must_use]
    pub fn ssa_uses(&self) -> Vec<SsaName> {
        let mut uses = vec![];
        match &self.kind {
            StatementKind::Assign { lhs, rhs } => {
                if !lhs.is_register() {
                    lhs.collect_ssa_uses(&mut uses);
                }
                rhs.collect_ssa_uses(&mut uses);
            }
            StatementKind::Condition { lhs, rhs, .. } => {
                lhs.collect_ssa_uses(&mut uses);
                rhs.collect_ssa_uses(&mut uses);
            }
            StatementKind::Switch { index, .. } => index.collect_ssa_uses(&mut uses),
            StatementKind::Call(call) => {
                for argument in &call.arguments {
                    argument.value.collect_ssa_uses(&mut uses);
                }
            }
            StatementKind::Return(value) => {
                if let Some(value) = value {
                    value.collect_ssa_uses(&mut uses);
                }
            }
            StatementKind::Other { uses: operands } => {
                for operand in operands {
                    operand.collect_ssa_uses(&mut uses);
                }
            }
            StatementKind::Resume
            | StatementKind::Label
            | StatementKind::Debug
            | StatementKind::Clobber => {}
        }
        uses
    }

    /// Whether the statement writes to memory.
    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(&self.kind, StatementKind::Assign { lhs, .. } if !lhs.is_register())
    }
    /// The memory operand the statement loads from, if it is a plain load.
    #[must_use]
    pub const fn loaded_operand(&self) -> Option<&Operand> {
        match &self.kind {
            StatementKind::Assign {
                rhs: Rvalue::Use(operand),
                ..
            } if operand.is_memory_read() => Some(operand),
            _ => None,
        }
    }
    #[must_use]
    pub const fn defined_ssa_name(&self) -> Option<SsaName> {
        match &self.kind {
            StatementKind::Assign {
                lhs: Operand::Ssa(name),
                ..
            } => Some(*name),
            StatementKind::Call(Call { lhs, .. }) => *lhs,
            _ => None,
        }
    }
}

impl FunctionBody {
    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[*id]
    }
    #[must_use]
    pub fn edge(&self, id: CfgEdgeId) -> &CfgEdge {
        &self.edges[*id]
    }
    #[must_use]
    pub fn statement(&self, statement: StatementRef) -> &Statement {
        &self.block(statement.block).statements[statement.index]
    }
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len()).map(BlockId)
    }

    /// Blocks reachable from the entry, each before its successors except
    /// along back edges.
    #[must_use]
    pub fn reverse_post_order(&self) -> Vec<BlockId> {
        let mut visited = FxHashSet::default();
        let mut post_order = vec![];
        let mut stack = vec![(BlockId::ENTRY, 0)];
        visited.insert(BlockId::ENTRY);
        while let Some((block, next_successor)) = stack.pop() {
            let successors = &self.block(block).successors;
            if let Some(edge) = successors.get(next_successor) {
                stack.push((block, next_successor + 1));
                let target = self.edge(*edge).target;
                if visited.insert(target) {
                    stack.push((target, 0));
                }
            } else {
                post_order.push(block);
            }
        }
        post_order.reverse();
        post_order
    }

    #[must_use]
    pub fn single_successor(&self, block: BlockId) -> Option<BlockId> {
        match self.block(block).successors.as_slice() {
            [edge] => Some(self.edge(*edge).target),
            _ => None,
        }
    }
    #[must_use]
    pub fn single_predecessor(&self, block: BlockId) -> Option<BlockId> {
        match self.block(block).predecessors.as_slice() {
            [edge] => Some(self.edge(*edge).source),
            _ => None,
        }
    }

    #[must_use]
    pub fn loop_depth(&self, block: BlockId) -> u32 {
        self.block(block)
            .loop_father
            .map_or(0, |loop_id| self.loops[*loop_id].depth)
    }
    /// The innermost loop containing both loops, or `None` for the function
    /// body itself.
    #[must_use]
    pub fn common_loop(&self, first: Option<LoopId>, second: Option<LoopId>) -> Option<LoopId> {
        let mut ancestors = FxHashSet::default();
        let mut current = first;
        while let Some(loop_id) = current {
            ancestors.insert(loop_id);
            current = self.loops[*loop_id].parent;
        }
        let mut current = second;
        while let Some(loop_id) = current {
            if ancestors.contains(&loop_id) {
                return Some(loop_id);
            }
            current = self.loops[*loop_id].parent;
        }
        None
    }

    #[must_use]
    pub fn ssa_definition(&self, name: SsaName) -> SsaDefinition {
        self.ssa_names[*name]
    }
    /// The statement defining `name`, unless it is a parameter, undefined or a
    /// PHI result.
    #[must_use]
    pub fn defining_statement(&self, name: SsaName) -> Option<&Statement> {
        match self.ssa_definition(name) {
            SsaDefinition::Statement(statement) => Some(self.statement(statement)),
            _ => None,
        }
    }
    /// The block defining `name`, or `None` for default definitions.
    #[must_use]
    pub fn defining_block(&self, name: SsaName) -> Option<BlockId> {
        match self.ssa_definition(name) {
            SsaDefinition::Statement(statement) => Some(statement.block),
            SsaDefinition::Phi { block, .. } => Some(block),
            SsaDefinition::Parameter(_) | SsaDefinition::Undefined => None,
        }
    }
    /// The statement using `name` if it has exactly one use, which is not a
    /// PHI argument.
    #[must_use]
    pub fn single_use(&self, name: SsaName) -> Option<StatementRef> {
        let mut found = None;
        for block in self.block_ids() {
            let block_data = self.block(block);
            for phi in &block_data.phis {
                let mut uses = vec![];
                for argument in &phi.arguments {
                    argument.collect_ssa_uses(&mut uses);
                }
                if uses.contains(&name) {
                    return None;
                }
            }
            for (index, statement) in block_data.statements.iter().enumerate() {
                for used in statement.ssa_uses() {
                    if used != name {
                        continue;
                    }
                    if found.is_some() {
                        return None;
                    }
                    found = Some(StatementRef { block, index });
                }
            }
        }
        found
    }

    /// Execution frequency of `block` relative to the function entry, scaled
    /// to [`FREQ_BASE`].
    #[must_use]
    pub fn relative_frequency(&self, block: BlockId) -> i32 {
        if !self.has_profile {
            return FREQ_BASE;
        }
        let mut entry_frequency = i64::from(self.block(BlockId::ENTRY).frequency);
        let mut frequency = i64::from(self.block(block).frequency);
        if entry_frequency == 0 {
            entry_frequency = 1;
            frequency += 1;
        }
        (frequency * i64::from(FREQ_BASE) / entry_frequency).min(i64::from(FREQ_MAX)) as i32
    }
}
