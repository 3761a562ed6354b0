use super::{
    parameters::{unmodified_param, unmodified_param_or_agg_item},
    BodyAnalyzer,
};
use crate::{
    body::{
        BlockId, Builtin, CfgEdgeKind, Expr, FunctionBody, Operand, Phi, Rvalue, Statement,
        StatementKind, StatementRef,
    },
    predicate::{condition::ConditionCode, Predicate},
};
use rustc_hash::FxHashSet;
use tracing::trace;

impl BodyAnalyzer<'_> {
    /// Computes for every block the predicate under which it is executed.
    pub(super) fn compute_bb_predicates(&mut self) {
        let body = self.body;
        let mut edge_predicates = vec![None; body.edges.len()];
        for block in body.block_ids() {
            self.set_condition_predicates(block, &mut edge_predicates);
            self.set_switch_predicates(block, &mut edge_predicates);
        }

        let mut bb_predicates = vec![None; body.blocks.len()];
        bb_predicates[*BlockId::ENTRY] = Some(Predicate::TRUE);
        let mut done = false;
        while !done {
            done = true;
            for block in body.block_ids().skip(1) {
                let mut predicate = Predicate::FALSE;
                for edge_id in &body.block(block).predecessors {
                    let edge = body.edge(*edge_id);
                    let Some(source_predicate) = bb_predicates[*edge.source] else {
                        continue;
                    };
                    let mut this_predicate: Predicate = source_predicate;
                    if let Some(edge_predicate) = edge_predicates[**edge_id] {
                        this_predicate &= edge_predicate;
                    }
                    predicate = predicate.or_with(Some(&self.summary.conds), this_predicate);
                    if predicate.is_true() {
                        break;
                    }
                }
                if predicate.is_false() {
                    continue;
                }

                let current = &mut bb_predicates[*block];
                match *current {
                    None => {
                        done = false;
                        *current = Some(predicate);
                    }
                    Some(old) if old != predicate => {
                        // Widening can make the new predicate incomparable to
                        // the old one; joining keeps the iteration monotonic.
                        let joined = predicate.or_with(Some(&self.summary.conds), old);
                        if joined != old {
                            done = false;
                            *current = Some(joined);
                        }
                    }
                    Some(_) => {}
                }
            }
        }
        self.bb_predicates = bb_predicates;
    }

    fn set_condition_predicates(
        &mut self,
        block: BlockId,
        edge_predicates: &mut [Option<Predicate>],
    ) {
        let body = self.body;
        let Some(last) = body.block(block).statements.last() else {
            return;
        };
        let StatementKind::Condition {
            lhs,
            code,
            rhs: Operand::Constant(value),
            floating,
        } = &last.kind
        else {
            return;
        };

        if let Some(param) = unmodified_param_or_agg_item(body, lhs) {
            let inverted_code = code.invert(*floating);
            for edge_id in &body.block(block).successors {
                let this_code = if body.edge(*edge_id).kind == CfgEdgeKind::True {
                    Some(*code)
                } else {
                    inverted_code
                };
                if let Some(this_code) = this_code {
                    edge_predicates[**edge_id] = Some(self.summary.conds.add(
                        param.index,
                        param.size,
                        param.agg,
                        this_code,
                        Some(*value),
                    ));
                }
            }
        }

        // In `if (__builtin_constant_p (param))`, the code for non-constant
        // arguments disappears once the argument is known. The other branch
        // is only known to survive when the function is inlined, which a
        // condition can't express.
        let Operand::Ssa(name) = lhs else {
            return;
        };
        if *code != ConditionCode::Ne || !value.is_zero() {
            return;
        }
        let Some(StatementKind::Call(call)) = body.defining_statement(*name).map(|it| &it.kind)
        else {
            return;
        };
        let [argument] = call.arguments.as_slice() else {
            return;
        };
        if call.builtin != Some(Builtin::ConstantP) {
            return;
        }
        let Some(param) = unmodified_param_or_agg_item(body, &argument.value) else {
            return;
        };
        for edge_id in &body.block(block).successors {
            if body.edge(*edge_id).kind == CfgEdgeKind::False {
                edge_predicates[**edge_id] = Some(self.summary.conds.add(
                    param.index,
                    param.size,
                    param.agg,
                    ConditionCode::IsNotConstant,
                    None,
                ));
            }
        }
    }

    fn set_switch_predicates(&mut self, block: BlockId, edge_predicates: &mut [Option<Predicate>]) {
        let body = self.body;
        let Some(last) = body.block(block).statements.last() else {
            return;
        };
        let StatementKind::Switch { index, cases } = &last.kind else {
            return;
        };
        let Some(param) = unmodified_param_or_agg_item(body, index) else {
            return;
        };

        let successors = &body.block(block).successors;
        for edge_id in successors {
            edge_predicates[**edge_id] = Some(Predicate::FALSE);
        }
        for case in cases {
            let Some(edge_id) = successors
                .iter()
                .find(|edge| body.edge(**edge).target == case.target)
            else {
                continue;
            };
            let conds = &mut self.summary.conds;
            // The default label would need the negation of all other cases.
            let predicate = match (case.low, case.high) {
                (None, _) => Predicate::TRUE,
                (Some(low), None) => {
                    conds.add(param.index, param.size, param.agg, ConditionCode::Eq, Some(low))
                }
                (Some(low), Some(high)) => {
                    let low =
                        conds.add(param.index, param.size, param.agg, ConditionCode::Ge, Some(low));
                    let high = conds.add(
                        param.index,
                        param.size,
                        param.agg,
                        ConditionCode::Le,
                        Some(high),
                    );
                    low & high
                }
            };
            let existing = edge_predicates[**edge_id].unwrap_or(Predicate::FALSE);
            edge_predicates[**edge_id] = Some(predicate.or_with(Some(&*conds), existing));
        }
    }

    /// The predicate under which the statement's result is not a constant,
    /// which is also recorded for the SSA name it defines.
    pub(super) fn will_be_nonconstant_predicate(&mut self, statement: &Statement) -> Predicate {
        let body = self.body;
        match &statement.kind {
            StatementKind::Assign { .. }
            | StatementKind::Condition { .. }
            | StatementKind::Switch { .. } => {}
            StatementKind::Call(call) if call.is_const => {}
            _ => return Predicate::TRUE,
        }
        if statement.is_store() {
            return Predicate::TRUE;
        }

        let base = match statement.loaded_operand() {
            Some(loaded) => match unmodified_param_or_agg_item(body, loaded) {
                Some(param) => Some(param),
                None => return Predicate::TRUE,
            },
            None => None,
        };

        let uses = statement.ssa_uses();
        let all_understood = uses.iter().all(|name| {
            unmodified_param(body, &Operand::Ssa(*name)).is_some()
                || !self.nonconstant_names[**name].is_true()
        });
        if !all_understood {
            return Predicate::TRUE;
        }

        let conds = &mut self.summary.conds;
        let mut nonconstant = match base {
            Some(base) => conds.add(base.index, base.size, base.agg, ConditionCode::Changed, None),
            None => Predicate::FALSE,
        };
        for name in &uses {
            let predicate = match unmodified_param(body, &Operand::Ssa(*name)) {
                Some(param) if base.is_some_and(|base| base.index == param.index) => continue,
                Some(param) => conds.add(param.index, param.size, None, ConditionCode::Changed, None),
                None => self.nonconstant_names[**name],
            };
            nonconstant = predicate.or_with(Some(&*conds), nonconstant);
        }

        if let Some(name) = statement.defined_ssa_name() {
            self.nonconstant_names[*name] = nonconstant;
        }
        nonconstant
    }

    /// The predicate under which `expr` is not a constant.
    pub(super) fn will_be_nonconstant_expr_predicate(&mut self, expr: &Expr) -> Predicate {
        match expr {
            Expr::Operand(operand) => {
                if let Some(param) = unmodified_param(self.body, operand) {
                    return self.summary.conds.add(
                        param.index,
                        param.size,
                        None,
                        ConditionCode::Changed,
                        None,
                    );
                }
                if operand.is_min_invariant() {
                    return Predicate::FALSE;
                }
                match operand {
                    Operand::Ssa(name) => self.nonconstant_names[**name],
                    _ => Predicate::TRUE,
                }
            }
            Expr::Unary(inner) => self.will_be_nonconstant_expr_predicate(inner),
            Expr::Binary(lhs, rhs) => {
                let lhs = self.will_be_nonconstant_expr_predicate(lhs);
                if lhs.is_true() {
                    return lhs;
                }
                let rhs = self.will_be_nonconstant_expr_predicate(rhs);
                lhs.or_with(Some(&self.summary.conds), rhs)
            }
            Expr::Select(condition, then, otherwise) => {
                let mut predicate = Predicate::FALSE;
                for operand in [condition, then, otherwise] {
                    let operand = self.will_be_nonconstant_expr_predicate(operand);
                    if operand.is_true() {
                        return operand;
                    }
                    predicate = predicate.or_with(Some(&self.summary.conds), operand);
                }
                predicate
            }
        }
    }

    /// Computes nonconstant predicates of PHI results in `block`.
    ///
    /// When the block merges the two arms of a condition, its PHI results
    /// are constant if the condition and all incoming values are.
    pub(super) fn analyze_phis(&mut self, block: BlockId) {
        let body = self.body;
        let phis = &body.block(block).phis;
        if phis.is_empty() {
            return;
        }
        let Some(mut predicate) = self.phi_result_unknown_predicate(block) else {
            return;
        };
        for phi in phis {
            self.predicate_for_phi_result(phi, &mut predicate);
        }
    }

    /// The predicate under which the choice between PHI arguments in `block`
    /// is not known, or `None` if the choice can't be tied to a condition.
    fn phi_result_unknown_predicate(&mut self, block: BlockId) -> Option<Predicate> {
        let body = self.body;
        if body.single_predecessor(block).is_some() {
            return Some(Predicate::FALSE);
        }

        let mut first_block = None;
        for edge_id in &body.block(block).predecessors {
            let source = body.edge(*edge_id).source;
            let candidate = if body.single_successor(source).is_some() {
                body.single_predecessor(source)?
            } else {
                source
            };
            match first_block {
                None => first_block = Some(candidate),
                Some(first) if first != candidate => return None,
                Some(_) => {}
            }
        }

        let last = body.block(first_block?).statements.last()?;
        let StatementKind::Condition { lhs, rhs, .. } = &last.kind else {
            return None;
        };
        if !rhs.is_min_invariant() {
            return None;
        }
        let predicate = self.will_be_nonconstant_expr_predicate(&Expr::Operand(lhs.clone()));
        (!predicate.is_true()).then_some(predicate)
    }

    fn predicate_for_phi_result(&mut self, phi: &Phi, predicate: &mut Predicate) {
        for argument in &phi.arguments {
            if argument.is_min_invariant() {
                continue;
            }
            let argument_predicate = match argument {
                Operand::Ssa(name) => self.nonconstant_names[**name],
                _ => Predicate::TRUE,
            };
            *predicate = predicate.or_with(Some(&self.summary.conds), argument_predicate);
            if predicate.is_true() {
                return;
            }
        }
        trace!(
            "PHI result {} is nonconstant if {}",
            phi.result,
            predicate.display(&self.summary.conds),
        );
        self.nonconstant_names[*phi.result] = *predicate;
    }

    /// The predicate under which some array index used in the access is not
    /// a constant.
    pub(super) fn array_index_predicate(&self, operand: &Operand) -> Predicate {
        let Operand::Memory(memory) = operand else {
            return Predicate::FALSE;
        };
        let conds = Some(&self.summary.conds);
        let mut predicate = Predicate::FALSE;
        for index in &memory.indices {
            if let Operand::Ssa(name) = index {
                predicate = predicate.or_with(conds, self.nonconstant_names[**name]);
            }
        }
        if !memory.deref {
            predicate = predicate.or_with(conds, self.array_index_predicate(&memory.base));
        }
        predicate
    }
}

/// Whether the block only ends variable lifetimes before rethrowing an
/// exception. Such blocks are removed later on.
pub(super) fn is_clobber_only_eh_block(body: &FunctionBody, block: BlockId) -> bool {
    clobber_only_eh_block(body, block, true, &mut FxHashSet::default())
}
fn clobber_only_eh_block(
    body: &FunctionBody,
    block: BlockId,
    need_eh: bool,
    visited: &mut FxHashSet<BlockId>,
) -> bool {
    if !visited.insert(block) {
        return false;
    }
    let mut statements = body.block(block).statements.as_slice();
    if need_eh {
        match statements.split_last() {
            Some((last, rest)) if last.kind == StatementKind::Resume => statements = rest,
            _ => return false,
        }
    } else if body.single_successor(block).is_none() {
        return false;
    }

    for statement in statements.iter().rev() {
        match statement.kind {
            StatementKind::Debug | StatementKind::Clobber => {}
            StatementKind::Label => break,
            _ => return false,
        }
    }

    body.block(block).predecessors.iter().all(|edge_id| {
        let edge = body.edge(*edge_id);
        edge.kind == CfgEdgeKind::Exception || clobber_only_eh_block(body, edge.source, false, visited)
    })
}

/// Finds a condition on the result of `__builtin_expect (a <cmp> b, …)`.
/// Once the expectation is dropped, the comparison folds into the condition.
pub(super) fn find_foldable_builtin_expect(
    body: &FunctionBody,
    block: BlockId,
) -> Option<StatementRef> {
    for statement in &body.block(block).statements {
        let StatementKind::Call(call) = &statement.kind else {
            continue;
        };
        if call.builtin != Some(Builtin::Expect) {
            continue;
        }
        let (Some(result), Some(argument)) = (call.lhs, call.arguments.first()) else {
            continue;
        };

        let mut argument = &argument.value;
        let mut is_comparison = false;
        while let Operand::Ssa(name) = argument {
            let Some(StatementKind::Assign { rhs, .. }) =
                body.defining_statement(*name).map(|it| &it.kind)
            else {
                break;
            };
            match rhs {
                Rvalue::Compare(..) => {
                    is_comparison = true;
                    break;
                }
                Rvalue::Convert(inner) => argument = inner,
                _ => break,
            }
        }
        if !is_comparison {
            continue;
        }
        if let Some(user) = body.single_use(result) {
            if matches!(body.statement(user).kind, StatementKind::Condition { .. }) {
                return Some(user);
            }
        }
    }
    None
}
