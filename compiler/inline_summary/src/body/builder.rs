use super::{
    BasicBlock, BlockId, Call, CfgEdge, CfgEdgeId, CfgEdgeKind, FunctionBody, InductionStep,
    Loop, LoopId, Operand, Parameter, Phi, Rvalue, SsaDefinition, SsaName, Statement,
    StatementKind, StatementRef,
};
use crate::{
    body::Expr,
    id::{CountableId, IdGenerator},
};

/// Incrementally assembles a [`FunctionBody`].
///
/// The entry block exists from the start. Blocks without a profile have
/// frequency [`crate::FREQ_BASE`].
pub struct BodyBuilder {
    body: FunctionBody,
    block_ids: IdGenerator<BlockId>,
    edge_ids: IdGenerator<CfgEdgeId>,
    ssa_ids: IdGenerator<SsaName>,
    loop_ids: IdGenerator<LoopId>,
}
impl BodyBuilder {
    #[must_use]
    pub fn new(parameters: Vec<Parameter>) -> Self {
        let mut builder = Self {
            body: FunctionBody {
                parameters,
                blocks: vec![],
                edges: vec![],
                ssa_names: vec![],
                loops: vec![],
                stack_frame_size: 0,
                inlinable: true,
                contains_cilk_spawn: false,
                has_profile: false,
            },
            block_ids: IdGenerator::default(),
            edge_ids: IdGenerator::default(),
            ssa_ids: IdGenerator::default(),
            loop_ids: IdGenerator::default(),
        };
        let entry = builder.add_block(crate::FREQ_BASE);
        assert_eq!(entry, BlockId::ENTRY);
        builder
    }
    /// A body with `count` unmodified 32-bit integer parameters.
    #[must_use]
    pub fn with_int_parameters(count: usize) -> Self {
        Self::new(vec![
            Parameter {
                size: 32,
                modified: false,
            };
            count
        ])
    }

    pub fn set_stack_frame_size(&mut self, size: i64) -> &mut Self {
        self.body.stack_frame_size = size;
        self
    }
    pub fn set_inlinable(&mut self, inlinable: bool) -> &mut Self {
        self.body.inlinable = inlinable;
        self
    }
    /// Makes block frequencies meaningful.
    pub fn set_has_profile(&mut self) -> &mut Self {
        self.body.has_profile = true;
        self
    }
    pub fn set_frequency(&mut self, block: BlockId, frequency: i32) -> &mut Self {
        self.body.blocks[*block].frequency = frequency;
        self
    }

    pub fn add_block(&mut self, frequency: i32) -> BlockId {
        let id = self.block_ids.generate();
        self.body.blocks.push(BasicBlock {
            frequency,
            ..BasicBlock::default()
        });
        id
    }
    pub fn add_edge(&mut self, source: BlockId, target: BlockId, kind: CfgEdgeKind) -> CfgEdgeId {
        let id = self.edge_ids.generate();
        self.body.edges.push(CfgEdge {
            source,
            target,
            kind,
        });
        self.body.blocks[*source].successors.push(id);
        self.body.blocks[*target].predecessors.push(id);
        id
    }
    pub fn goto(&mut self, source: BlockId, target: BlockId) -> CfgEdgeId {
        self.add_edge(source, target, CfgEdgeKind::Normal)
    }

    /// The SSA name holding parameter `index` on entry.
    pub fn parameter_value(&mut self, index: usize) -> SsaName {
        let definition = SsaDefinition::Parameter(index);
        if let Some(existing) = self.body.ssa_names.iter().position(|it| *it == definition) {
            return SsaName::from_usize(existing);
        }
        self.new_ssa_name(definition)
    }
    pub fn undefined_value(&mut self) -> SsaName {
        self.new_ssa_name(SsaDefinition::Undefined)
    }
    fn new_ssa_name(&mut self, definition: SsaDefinition) -> SsaName {
        let name = self.ssa_ids.generate();
        self.body.ssa_names.push(definition);
        name
    }

    /// Appends a statement and records the SSA name it defines.
    pub fn push(
        &mut self,
        block: BlockId,
        kind: StatementKind,
        size: i32,
        time: i32,
    ) -> StatementRef {
        self.push_statement(
            block,
            Statement {
                kind,
                size,
                time,
                has_float_operands: false,
            },
        )
    }
    pub fn push_statement(&mut self, block: BlockId, statement: Statement) -> StatementRef {
        let statements = &mut self.body.blocks[*block].statements;
        let reference = StatementRef {
            block,
            index: statements.len(),
        };
        if let Some(name) = statement.defined_ssa_name() {
            self.body.ssa_names[*name] = SsaDefinition::Statement(reference);
        }
        statements.push(statement);
        reference
    }

    /// Appends `new_name = rhs`.
    pub fn assign(&mut self, block: BlockId, rhs: Rvalue, size: i32, time: i32) -> SsaName {
        let name = self.undefined_value();
        self.push(
            block,
            StatementKind::Assign {
                lhs: Operand::Ssa(name),
                rhs,
            },
            size,
            time,
        );
        name
    }
    /// Appends a call whose result, if any, gets a fresh SSA name.
    pub fn call(
        &mut self,
        block: BlockId,
        mut call: Call,
        has_result: bool,
        size: i32,
        time: i32,
    ) -> Option<SsaName> {
        let lhs = has_result.then(|| self.undefined_value());
        call.lhs = lhs;
        self.push(block, StatementKind::Call(call), size, time);
        lhs
    }
    /// Ends `block` with a two-way branch on `lhs <code> rhs`.
    pub fn branch(
        &mut self,
        block: BlockId,
        condition: StatementKind,
        if_true: BlockId,
        if_false: BlockId,
        size: i32,
        time: i32,
    ) {
        assert!(matches!(condition, StatementKind::Condition { .. }));
        self.push(block, condition, size, time);
        self.add_edge(block, if_true, CfgEdgeKind::True);
        self.add_edge(block, if_false, CfgEdgeKind::False);
    }

    /// Adds a PHI node; `arguments` line up with the block's predecessor
    /// edges.
    pub fn phi(&mut self, block: BlockId, arguments: Vec<Operand>) -> SsaName {
        let phis = &self.body.blocks[*block].phis;
        let definition = SsaDefinition::Phi {
            block,
            index: phis.len(),
        };
        let result = self.new_ssa_name(definition);
        self.body.blocks[*block]
            .phis
            .push(Phi { result, arguments });
        result
    }

    /// Registers a loop consisting of `blocks`, which must include `header`.
    pub fn add_loop(
        &mut self,
        header: BlockId,
        parent: Option<LoopId>,
        blocks: &[BlockId],
    ) -> LoopId {
        let id = self.loop_ids.generate();
        let depth = parent.map_or(1, |parent| self.body.loops[*parent].depth + 1);
        self.body.loops.push(Loop {
            header,
            parent,
            depth,
            iteration_counts: vec![],
            induction_steps: vec![],
        });
        for block in blocks {
            self.body.blocks[**block].loop_father = Some(id);
        }
        id
    }
    pub fn add_iteration_count(&mut self, loop_id: LoopId, count: Expr) -> &mut Self {
        self.body.loops[*loop_id].iteration_counts.push(count);
        self
    }
    pub fn add_induction_step(&mut self, loop_id: LoopId, block: BlockId, step: Expr) -> &mut Self {
        self.body.loops[*loop_id]
            .induction_steps
            .push(InductionStep { block, step });
        self
    }

    #[must_use]
    pub fn finish(self) -> FunctionBody {
        self.body
    }
}
