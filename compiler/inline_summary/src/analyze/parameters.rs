//! Questions about how statements relate to the function's parameters.

use crate::{
    body::{
        BaseAddress, BlockId, CallArgument, FunctionBody, Operand, Rvalue, SsaDefinition,
        Statement, StatementKind,
    },
    compute_scale,
    predicate::condition::AggregatePosition,
    PROB_BASE,
};
use rustc_hash::FxHashSet;

/// A parameter whose value reaches some operand unmodified.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParamValue {
    pub index: usize,
    /// Bit-width of the value.
    pub size: u32,
    /// Set if the value is loaded from the aggregate the parameter is or
    /// points to.
    pub agg: Option<AggregatePosition>,
}
impl ParamValue {
    const fn scalar(index: usize, size: u32) -> Self {
        Self {
            index,
            size,
            agg: None,
        }
    }
}

/// The parameter `operand` is, without looking through copies.
fn direct_param(body: &FunctionBody, operand: &Operand) -> Option<ParamValue> {
    let index = match operand {
        Operand::Ssa(name) => match body.ssa_definition(*name) {
            SsaDefinition::Parameter(index) => index,
            _ => return None,
        },
        Operand::Param(index) => *index,
        _ => return None,
    };
    let parameter = body.parameters.get(index)?;
    if matches!(operand, Operand::Param(_)) && parameter.modified {
        return None;
    }
    Some(ParamValue::scalar(index, parameter.size))
}

/// The parameter `operand` is a copy of, if it still holds the value passed
/// in.
#[must_use]
pub fn unmodified_param(body: &FunctionBody, operand: &Operand) -> Option<ParamValue> {
    if let Some(param) = direct_param(body, operand) {
        return Some(param);
    }
    let Operand::Ssa(name) = operand else {
        return None;
    };
    match &body.defining_statement(*name)?.kind {
        StatementKind::Assign {
            rhs: Rvalue::Use(source),
            ..
        } => unmodified_param(body, source),
        _ => None,
    }
}

/// Like [`unmodified_param`], but also accepts values loaded from a
/// parameter's aggregate at a constant offset.
#[must_use]
pub fn unmodified_param_or_agg_item(
    body: &FunctionBody,
    operand: &Operand,
) -> Option<ParamValue> {
    if let Some(param) = direct_param(body, operand) {
        return Some(param);
    }
    let operand = match operand {
        Operand::Ssa(name) => {
            let StatementKind::Assign {
                rhs: Rvalue::Use(source),
                ..
            } = &body.defining_statement(*name)?.kind
            else {
                return None;
            };
            if !matches!(source, Operand::Memory(_)) {
                return unmodified_param_or_agg_item(body, source);
            }
            source
        }
        operand => operand,
    };
    load_from_param_agg(body, operand)
}

fn load_from_param_agg(body: &FunctionBody, operand: &Operand) -> Option<ParamValue> {
    let Operand::Memory(memory) = operand else {
        return None;
    };
    let offset = memory.offset?;
    if !memory.preserved || !memory.indices.iter().all(Operand::is_min_invariant) {
        return None;
    }
    let (index, by_ref) = match (&memory.base, memory.deref) {
        (Operand::Ssa(pointer), true) => match body.ssa_definition(*pointer) {
            SsaDefinition::Parameter(index) => (index, true),
            _ => return None,
        },
        (Operand::Param(index), false) => (*index, false),
        _ => return None,
    };
    (index < body.parameters.len()).then_some(ParamValue {
        index,
        size: memory.size,
        agg: Some(AggregatePosition { offset, by_ref }),
    })
}

/// The block whose frequency best describes how often a value defined in
/// `definition` changes as seen from `use_block`.
///
/// A definition inside a loop not containing the use is executed at most as
/// often as the header of the innermost loop containing both.
fn minimal_block(body: &FunctionBody, definition: BlockId, use_block: BlockId) -> BlockId {
    let common = body.common_loop(
        body.block(definition).loop_father,
        body.block(use_block).loop_father,
    );
    let header = common.map_or(BlockId::ENTRY, |loop_id| body.loops[*loop_id].header);
    if body.block(header).frequency < body.block(definition).frequency {
        header
    } else {
        definition
    }
}

/// Probability that the argument differs between two executions of a call
/// in `block`.
///
/// When the call runs N times more often than the value is set, the value
/// changes with a probability of 1/N.
#[must_use]
pub fn param_change_prob(body: &FunctionBody, block: BlockId, argument: &CallArgument) -> i32 {
    let frequency = body.block(block).frequency;
    let entry_frequency = body.block(BlockId::ENTRY).frequency;
    let scale_to_call = |init_frequency: i32| {
        if init_frequency < frequency {
            compute_scale(init_frequency, frequency).max(1)
        } else {
            PROB_BASE
        }
    };

    match argument.value.base_address() {
        BaseAddress::AddressOf(_) => 0,
        BaseAddress::Operand(operand) if operand.is_min_invariant() => 0,
        BaseAddress::Operand(Operand::Global { read_only: true }) => 0,
        BaseAddress::Operand(Operand::Ssa(name)) => {
            if frequency == 0 {
                return PROB_BASE;
            }
            let init_frequency = body.defining_block(*name).map_or(entry_frequency, |defined| {
                body.block(minimal_block(body, defined, block)).frequency
            });
            scale_to_call(init_frequency.max(1))
        }
        _ => {
            if frequency == 0 {
                return PROB_BASE;
            }
            let store_blocks = argument
                .reaching_stores
                .iter()
                .map(|store| store.map_or(BlockId::ENTRY, |store| minimal_block(body, store, block)))
                .collect::<FxHashSet<_>>();
            if store_blocks.contains(&block) {
                return PROB_BASE;
            }
            let min_frequency = store_blocks
                .iter()
                .map(|store| body.block(*store).frequency)
                .fold(if entry_frequency == 0 { 1 } else { entry_frequency }, i32::min);
            scale_to_call(min_frequency)
        }
    }
}

/// How much of the statement disappears once the function is inlined, in
/// halves: 2 means it goes away completely, 1 that half of such statements
/// do on average.
#[must_use]
pub fn eliminated_by_inlining_prob(body: &FunctionBody, statement: &Statement) -> i32 {
    let (lhs, rhs) = match &statement.kind {
        StatementKind::Return(_) => return 2,
        StatementKind::Assign {
            lhs,
            rhs: Rvalue::Use(rhs) | Rvalue::Convert(rhs),
        } => (lhs, rhs),
        _ => return 0,
    };
    let is_unmodified_param = |operand: &Operand| unmodified_param(body, operand).is_some();
    let inner_rhs = rhs.base_address();
    let inner_lhs = lhs.base_address();

    // Reads of parameters and `&param->field` will combine with the caller's
    // code.
    let mut rhs_free = match inner_rhs {
        BaseAddress::Operand(operand) => is_unmodified_param(operand),
        BaseAddress::AddressOf(inner) => match inner.base_address() {
            BaseAddress::Operand(Operand::Param(_)) => true,
            BaseAddress::Deref(pointer) => is_unmodified_param(pointer),
            _ => false,
        },
        BaseAddress::Deref(_) => false,
    };
    if rhs_free && lhs.is_register() {
        return 2;
    }

    // Loads through parameters passed by reference.
    if let BaseAddress::Deref(pointer) = inner_rhs {
        if is_unmodified_param(pointer) {
            rhs_free = true;
        }
    }
    let mut lhs_free = rhs_free && lhs.is_register();

    // Stores to parameters and the return value.
    lhs_free |= match inner_lhs {
        BaseAddress::Operand(operand) => matches!(operand, Operand::Param(_) | Operand::Result),
        BaseAddress::Deref(pointer) => is_unmodified_param(pointer),
        BaseAddress::AddressOf(_) => false,
    };
    if lhs_free && (rhs.is_register() || rhs.is_min_invariant()) {
        rhs_free = true;
    }
    i32::from(lhs_free && rhs_free)
}

#[cfg(test)]
mod test {
    use super::{
        eliminated_by_inlining_prob, param_change_prob, unmodified_param,
        unmodified_param_or_agg_item, ParamValue,
    };
    use crate::{
        body::{
            BlockId, BodyBuilder, CallArgument, MemoryRef, Operand, Parameter, Rvalue,
            Statement, StatementKind,
        },
        predicate::condition::{AggregatePosition, Literal},
        PROB_BASE,
    };

    fn statement(kind: StatementKind) -> Statement {
        Statement {
            kind,
            size: 1,
            time: 1,
            has_float_operands: false,
        }
    }

    #[test]
    fn copies_of_parameters_are_unmodified() {
        let mut builder = BodyBuilder::with_int_parameters(2);
        let param = builder.parameter_value(1);
        let copy = builder.assign(BlockId::ENTRY, Rvalue::Use(Operand::Ssa(param)), 1, 1);
        let sum = builder.assign(
            BlockId::ENTRY,
            Rvalue::Binary(Operand::Ssa(copy), Operand::Ssa(copy)),
            1,
            1,
        );
        let body = builder.finish();

        assert_eq!(
            unmodified_param(&body, &Operand::Ssa(copy)),
            Some(ParamValue {
                index: 1,
                size: 32,
                agg: None,
            }),
        );
        assert_eq!(unmodified_param(&body, &Operand::Ssa(sum)), None);
    }

    #[test]
    fn modified_memory_parameters_are_not_tracked() {
        let builder = BodyBuilder::new(vec![
            Parameter {
                size: 64,
                modified: true,
            },
            Parameter {
                size: 64,
                modified: false,
            },
        ]);
        let body = builder.finish();
        assert_eq!(unmodified_param(&body, &Operand::Param(0)), None);
        assert_eq!(
            unmodified_param(&body, &Operand::Param(1)).map(|it| it.index),
            Some(1),
        );
    }

    #[test]
    fn loads_from_aggregates_passed_by_reference() {
        let mut builder = BodyBuilder::with_int_parameters(1);
        let pointer = builder.parameter_value(0);
        let load = |offset, preserved| {
            Operand::memory(MemoryRef {
                base: Operand::Ssa(pointer),
                deref: true,
                offset,
                size: 16,
                indices: vec![],
                preserved,
            })
        };
        let loaded = builder.assign(BlockId::ENTRY, Rvalue::Use(load(Some(32), true)), 1, 1);
        let clobbered = builder.assign(BlockId::ENTRY, Rvalue::Use(load(Some(32), false)), 1, 1);
        let unknown = builder.assign(BlockId::ENTRY, Rvalue::Use(load(None, true)), 1, 1);
        let body = builder.finish();

        assert_eq!(
            unmodified_param_or_agg_item(&body, &Operand::Ssa(loaded)),
            Some(ParamValue {
                index: 0,
                size: 16,
                agg: Some(AggregatePosition {
                    offset: 32,
                    by_ref: true,
                }),
            }),
        );
        assert_eq!(unmodified_param_or_agg_item(&body, &Operand::Ssa(clobbered)), None);
        assert_eq!(unmodified_param_or_agg_item(&body, &Operand::Ssa(unknown)), None);
    }

    #[test]
    fn arguments_defined_outside_a_hot_loop_rarely_change() {
        let mut builder = BodyBuilder::with_int_parameters(1);
        let param = builder.parameter_value(0);
        let header = builder.add_block(10_000);
        builder.goto(BlockId::ENTRY, header);
        builder.goto(header, header);
        builder.add_loop(header, None, &[header]);
        let local = builder.assign(BlockId::ENTRY, Rvalue::Unary(Operand::Ssa(param)), 1, 1);
        let in_loop = builder.assign(header, Rvalue::Unary(Operand::Ssa(param)), 1, 1);
        let body = builder.finish();

        let argument = |operand: Operand| CallArgument::from(operand);
        assert_eq!(
            param_change_prob(&body, header, &argument(Operand::Ssa(param))),
            1000,
        );
        assert_eq!(
            param_change_prob(&body, header, &argument(Operand::Ssa(local))),
            1000,
        );
        assert_eq!(
            param_change_prob(&body, header, &argument(Operand::Ssa(in_loop))),
            PROB_BASE,
        );
        assert_eq!(
            param_change_prob(
                &body,
                header,
                &argument(Operand::Constant(Literal::int(3, 32))),
            ),
            0,
        );
        assert_eq!(
            param_change_prob(
                &body,
                header,
                &argument(Operand::Global { read_only: true }),
            ),
            0,
        );
    }

    #[test]
    fn memory_arguments_use_the_rarest_store() {
        let mut builder = BodyBuilder::with_int_parameters(0);
        let header = builder.add_block(4000);
        let store = builder.add_block(2000);
        builder.goto(BlockId::ENTRY, header);
        builder.goto(header, store);
        builder.goto(store, header);
        builder.add_loop(header, None, &[header, store]);
        let body = builder.finish();

        let argument = CallArgument {
            value: Operand::Local,
            reaching_stores: vec![None],
        };
        assert_eq!(param_change_prob(&body, header, &argument), 2500);
        let argument = CallArgument {
            value: Operand::Local,
            reaching_stores: vec![None, Some(store)],
        };
        assert_eq!(param_change_prob(&body, header, &argument), 2500);
        let argument = CallArgument {
            value: Operand::Local,
            reaching_stores: vec![Some(header)],
        };
        assert_eq!(param_change_prob(&body, header, &argument), PROB_BASE);
    }

    #[test]
    fn parameter_moves_are_eliminated() {
        let mut builder = BodyBuilder::with_int_parameters(1);
        let param = builder.parameter_value(0);
        let result = builder.undefined_value();
        let body = builder.finish();

        let copy = statement(StatementKind::Assign {
            lhs: Operand::Ssa(result),
            rhs: Rvalue::Convert(Operand::Ssa(param)),
        });
        assert_eq!(eliminated_by_inlining_prob(&body, &copy), 2);

        let store_result = statement(StatementKind::Assign {
            lhs: Operand::Result,
            rhs: Rvalue::Use(Operand::Constant(Literal::int(0, 32))),
        });
        assert_eq!(eliminated_by_inlining_prob(&body, &store_result), 1);

        let store_global = statement(StatementKind::Assign {
            lhs: Operand::Global { read_only: false },
            rhs: Rvalue::Use(Operand::Ssa(param)),
        });
        assert_eq!(eliminated_by_inlining_prob(&body, &store_global), 0);

        let arithmetic = statement(StatementKind::Assign {
            lhs: Operand::Ssa(result),
            rhs: Rvalue::Binary(Operand::Ssa(param), Operand::Ssa(param)),
        });
        assert_eq!(eliminated_by_inlining_prob(&body, &arithmetic), 0);
        assert_eq!(
            eliminated_by_inlining_prob(&body, &statement(StatementKind::Return(None))),
            2,
        );
    }
}
