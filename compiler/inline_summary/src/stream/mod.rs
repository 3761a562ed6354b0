//! Streaming summaries in and out of the summary sections of link-time
//! compilation units.
//!
//! A section lists the summaries of the functions defined in a unit.
//! Functions are referred to by their index in the unit's
//! [`SymbolEncoder`]. Call summaries aren't keyed at all: they follow the
//! order of the function's direct calls, then its indirect calls, so the
//! reading call graph must have the same calls as the writing one.

use self::{input::InputBlock, output::OutputBlock};
use crate::{
    call_graph::NodeId,
    context::InlineAnalysis,
    predicate::{
        condition::{AggregatePosition, Condition, ConditionCode, Conditions},
        Predicate, FIRST_DYNAMIC_CONDITION, NUM_CONDITIONS,
    },
    summary::{set_hint_predicate, CallSummary, FunctionSummary, ParamChange, SizeTimeEntry},
    MAX_ENTRIES,
};
use rustc_hash::FxHashMap;
use tracing::debug;

pub use self::error::StreamError;

mod error;
pub mod input;
pub mod output;

/// Maps the nodes of a unit to consecutive indices.
#[derive(Clone, Debug, Default)]
pub struct SymbolEncoder {
    nodes: Vec<NodeId>,
    indices: FxHashMap<NodeId, usize>,
}
impl SymbolEncoder {
    /// The index of `node`, adding it if it's not encoded yet.
    pub fn encode(&mut self, node: NodeId) -> usize {
        if let Some(index) = self.indices.get(&node) {
            return *index;
        }
        let index = self.nodes.len();
        self.nodes.push(node);
        self.indices.insert(node, index);
        index
    }
    #[must_use]
    pub fn lookup(&self, node: NodeId) -> Option<usize> {
        self.indices.get(&node).copied()
    }
    #[must_use]
    pub fn node(&self, index: usize) -> Option<NodeId> {
        self.nodes.get(index).copied()
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
impl FromIterator<NodeId> for SymbolEncoder {
    fn from_iter<T: IntoIterator<Item = NodeId>>(iter: T) -> Self {
        let mut encoder = Self::default();
        for node in iter {
            encoder.encode(node);
        }
        encoder
    }
}

/// The summary section of one unit, as handed over by the driver.
#[derive(Debug)]
pub struct UnitSection<'a> {
    pub file: String,
    pub encoder: SymbolEncoder,
    /// `None` if the unit has no summary section.
    pub data: Option<&'a [u8]>,
}

impl InlineAnalysis {
    /// Writes the summaries of the functions in `encoder` that have a body
    /// or are thunks.
    ///
    /// Functions referenced by literals in condition tables are added to
    /// `encoder`.
    #[must_use]
    pub fn write_summaries(&self, encoder: &mut SymbolEncoder) -> Vec<u8> {
        let nodes = encoder
            .nodes
            .iter()
            .copied()
            .filter(|node| {
                let data = self.graph.node(*node);
                (data.body.is_some() || data.thunk) && data.alias_target.is_none()
            })
            .collect::<Vec<_>>();

        let mut output = OutputBlock::default();
        output.write_usize(nodes.len());
        for node in nodes {
            self.write_function_summary(node, encoder, &mut output);
        }
        output.write_u8(0);
        output.into_bytes()
    }
    fn write_function_summary(
        &self,
        node: NodeId,
        encoder: &mut SymbolEncoder,
        output: &mut OutputBlock,
    ) {
        let summary = self.summaries.function(node);
        output.write_usize(encoder.encode(node));
        output.write_hwi(summary.estimated_self_stack_size);
        output.write_hwi(summary.self_size);
        output.write_f64(summary.self_time);
        output.write_flags(&[
            summary.inlinable,
            summary.contains_cilk_spawn,
            summary.fp_expressions,
        ]);

        output.write_usize(summary.conds.len());
        for condition in summary.conds.iter() {
            output.write_usize(condition.operand_num);
            output.write_uhwi(condition.size);
            output.write_uhwi(condition.code as u8);
            output.write_literal(condition.val.as_ref(), encoder);
            output.write_flags(&[
                condition.agg.is_some(),
                condition.agg.is_some_and(|agg| agg.by_ref),
            ]);
            if let Some(agg) = condition.agg {
                output.write_hwi(agg.offset);
            }
        }

        output.write_usize(summary.entries.len());
        for entry in &summary.entries {
            output.write_hwi(entry.size);
            output.write_f64(entry.time);
            output.write_predicate(&entry.exec_predicate);
            output.write_predicate(&entry.nonconst_predicate);
        }

        for hint in [
            &summary.loop_iterations,
            &summary.loop_stride,
            &summary.array_index,
        ] {
            output.write_predicate(&hint.unwrap_or(Predicate::TRUE));
        }

        let data = self.graph.node(node);
        for edge in data.callees.iter().chain(&data.indirect_calls) {
            let call = self.summaries.call(*edge);
            output.write_hwi(call.call_stmt_size);
            output.write_hwi(call.call_stmt_time);
            output.write_uhwi(call.loop_depth);
            output.write_predicate(&call.predicate.unwrap_or(Predicate::TRUE));
            output.write_usize(call.params.len());
            for param in &call.params {
                output.write_hwi(param.change_prob);
            }
        }
    }

    /// Reads the summary sections of all units. Every unit must have one.
    pub fn read_summaries(&mut self, units: &[UnitSection]) -> Result<(), StreamError> {
        for unit in units {
            let data = unit.data.ok_or_else(|| StreamError::MissingSummary {
                file: unit.file.clone(),
            })?;
            self.read_summary_section(&unit.encoder, data)?;
            debug!("Read the inline summaries of {}.", unit.file);
        }
        Ok(())
    }

    /// Reads one summary section, replacing the summaries of the functions
    /// it describes.
    pub fn read_summary_section(
        &mut self,
        encoder: &SymbolEncoder,
        data: &[u8],
    ) -> Result<(), StreamError> {
        let mut input = InputBlock::new(data);
        let count = input.read_usize()?;
        for _ in 0..count {
            self.read_function_summary(encoder, &mut input)?;
        }
        if input.read_u8()? != 0 || input.has_more_data() {
            return Err(StreamError::EdgeCountMismatch);
        }
        Ok(())
    }
    fn read_function_summary(
        &mut self,
        encoder: &SymbolEncoder,
        input: &mut InputBlock,
    ) -> Result<(), StreamError> {
        let node = input.read_node(encoder)?;
        if !self.graph.contains_node(node) {
            return Err(StreamError::UnknownNode(*node as u64));
        }

        let mut summary = FunctionSummary::without_entries();
        summary.estimated_self_stack_size = input.read_i64()?;
        summary.estimated_stack_size = summary.estimated_self_stack_size;
        summary.self_size = input.read_i32()?;
        summary.size = summary.self_size;
        summary.self_time = input.read_f64()?;
        summary.time = summary.self_time;
        let flags = input.read_flags()?;
        summary.inlinable = flags[0];
        summary.contains_cilk_spawn = flags[1];
        summary.fp_expressions = flags[2];

        let count = input.read_count(NUM_CONDITIONS - FIRST_DYNAMIC_CONDITION)?;
        let conditions = (0..count)
            .map(|_| read_condition(input, encoder))
            .collect::<Result<Vec<_>, _>>()?;
        summary.conds = Conditions::from_vec(conditions);

        let count = input.read_count(MAX_ENTRIES)?;
        for _ in 0..count {
            summary.entries.push(SizeTimeEntry {
                size: input.read_i32()?,
                time: input.read_f64()?,
                exec_predicate: input.read_predicate()?,
                nonconst_predicate: input.read_predicate()?,
            });
        }
        let has_unconditional_entry = summary.entries.first().is_some_and(|entry| {
            entry.exec_predicate.is_true() && entry.nonconst_predicate.is_true()
        });
        if !has_unconditional_entry {
            return Err(StreamError::MissingUnconditionalEntry(*node as u64));
        }

        for hint in [
            &mut summary.loop_iterations,
            &mut summary.loop_stride,
            &mut summary.array_index,
        ] {
            set_hint_predicate(hint, input.read_predicate()?);
        }

        let data = self.graph.node(node);
        let edges = data
            .callees
            .iter()
            .chain(&data.indirect_calls)
            .copied()
            .collect::<Vec<_>>();
        let calls = edges
            .into_iter()
            .map(|edge| {
                let call_stmt_size = input.read_i32()?;
                let call_stmt_time = input.read_i32()?;
                let loop_depth = input.read_u32_leb()?;
                let predicate = input.read_predicate()?;
                let count = input.read_usize()?;
                let params = (0..count)
                    .map(|_| {
                        Ok(ParamChange {
                            change_prob: input.read_i32()?,
                        })
                    })
                    .collect::<Result<Vec<_>, StreamError>>()?;
                let call = CallSummary {
                    call_stmt_size,
                    call_stmt_time,
                    loop_depth,
                    predicate: None,
                    params,
                };
                Ok((edge, call, predicate))
            })
            .collect::<Result<Vec<_>, StreamError>>()?;

        self.summaries.set_function(node, summary);
        for (edge, call, predicate) in calls {
            self.reset_edge_growth_cache(edge);
            self.summaries.set_call(edge, call);
            self.edge_set_predicate(edge, Some(predicate));
        }
        Ok(())
    }
}

fn read_condition(
    input: &mut InputBlock,
    encoder: &SymbolEncoder,
) -> Result<Condition, StreamError> {
    let operand_num = input.read_usize()?;
    let size = input.read_u32_leb()?;
    let code = input.read_uhwi()?;
    let code = u8::try_from(code)
        .ok()
        .and_then(ConditionCode::from_repr)
        .ok_or(StreamError::InvalidConditionCode(code))?;
    let val = input.read_literal(encoder)?;
    let flags = input.read_flags()?;
    let agg = if flags[0] {
        Some(AggregatePosition {
            offset: input.read_i64()?,
            by_ref: flags[1],
        })
    } else {
        None
    };
    Ok(Condition {
        operand_num,
        size,
        code,
        val,
        agg,
    })
}

#[cfg(test)]
mod test {
    use super::{output::OutputBlock, StreamError, SymbolEncoder, UnitSection};
    use crate::{
        known::KnownArguments,
        predicate::{
            condition::{AggregatePosition, ConditionCode, Literal},
            Predicate,
        },
        test_utils::{add_branchy_function, add_caller, add_leaf_function, new_analysis},
        FunctionSummary, InlineAnalysis,
    };

    /// Writes the summaries of `analysis` and reads them back into a copy
    /// whose summaries were reset.
    fn round_trip(analysis: &InlineAnalysis) -> InlineAnalysis {
        let mut encoder = analysis.graph.node_ids().collect::<SymbolEncoder>();
        let bytes = analysis.write_summaries(&mut encoder);

        let mut copy = analysis.clone();
        for node in copy.graph.node_ids().collect::<Vec<_>>() {
            copy.summaries.set_function(node, FunctionSummary::default());
        }
        copy.read_summaries(&[UnitSection {
            file: "unit.o".to_string(),
            encoder,
            data: Some(&bytes),
        }])
        .unwrap();
        copy
    }

    #[test]
    fn summaries_survive_streaming() {
        let mut analysis = new_analysis();
        let (function, _) = add_branchy_function(&mut analysis, "f");
        let (caller, _) = add_caller(&mut analysis, "caller", function, Literal::int(0, 32));
        analysis.summaries.function_mut(function).estimated_self_stack_size = 16;
        let conds = &mut analysis.summaries.function_mut(function).conds;
        let agg = conds.add(
            0,
            64,
            Some(AggregatePosition {
                offset: -8,
                by_ref: true,
            }),
            ConditionCode::Le,
            Some(Literal::float(1.5, 64)),
        );
        let function_literal =
            conds.add(0, 64, None, ConditionCode::Eq, Some(Literal::Function(caller)));
        analysis.summaries.function_mut(function).loop_stride = Some(agg | function_literal);

        let copy = round_trip(&analysis);
        for node in [function, caller] {
            let original = analysis.summaries.function(node);
            let read = copy.summaries.function(node);
            assert_eq!(read.conds, original.conds);
            assert_eq!(read.entries, original.entries);
            assert_eq!(read.hint_predicates(), original.hint_predicates());
            assert_eq!(read.self_size, original.self_size);
            assert_eq!(read.size, original.self_size);
            assert_eq!(read.self_time.to_bits(), original.self_time.to_bits());
            assert_eq!(
                read.estimated_stack_size,
                original.estimated_self_stack_size,
            );
            assert_eq!(read.inlinable, original.inlinable);
            assert_eq!(read.fp_expressions, original.fp_expressions);
        }
        for edge in analysis.graph.edge_ids() {
            assert_eq!(copy.summaries.call(edge), analysis.summaries.call(edge));
        }
    }

    #[test]
    fn missing_sections_are_fatal() {
        let mut analysis = new_analysis();
        let result = analysis.read_summaries(&[UnitSection {
            file: "other.o".to_string(),
            encoder: SymbolEncoder::default(),
            data: None,
        }]);
        assert_eq!(
            result,
            Err(StreamError::MissingSummary {
                file: "other.o".to_string(),
            }),
        );
    }

    #[test]
    fn summaries_without_an_unconditional_entry_are_rejected() {
        let mut analysis = new_analysis();
        let function = add_leaf_function(&mut analysis, "f", 10, 0);
        let original = analysis.summaries.function(function).clone();
        let encoder = [function].into_iter().collect::<SymbolEncoder>();

        let section = |entries: &[(Predicate, Predicate)]| {
            let mut output = OutputBlock::default();
            output.write_usize(1);
            output.write_usize(0);
            output.write_hwi(0);
            output.write_hwi(20);
            output.write_f64(20.0);
            output.write_flags(&[true, false, false]);
            output.write_usize(0);
            output.write_usize(entries.len());
            for (exec, nonconst) in entries {
                output.write_hwi(4);
                output.write_f64(4.0);
                output.write_predicate(exec);
                output.write_predicate(nonconst);
            }
            for _ in 0..3 {
                output.write_predicate(&Predicate::TRUE);
            }
            output.write_u8(0);
            output.into_bytes()
        };

        for entries in [
            vec![],
            vec![(Predicate::not_inlined(), Predicate::TRUE)],
            vec![(Predicate::TRUE, Predicate::not_inlined())],
        ] {
            let bytes = section(entries.as_slice());
            assert_eq!(
                analysis.read_summary_section(&encoder, &bytes),
                Err(StreamError::MissingUnconditionalEntry(*function as u64)),
            );
            assert_eq!(analysis.summaries.function(function), &original);
        }

        let bytes = section([(Predicate::TRUE, Predicate::TRUE)].as_slice());
        analysis.read_summary_section(&encoder, &bytes).unwrap();
        assert_eq!(analysis.summaries.function(function).self_size, 20);
        let estimate = analysis
            .estimate_ipcp_clone_size_and_time(function, &KnownArguments::default());
        assert_eq!(estimate.size, 2);
    }

    #[test]
    fn truncated_calls_leave_the_summary_untouched() {
        let mut analysis = new_analysis();
        let (function, _) = add_branchy_function(&mut analysis, "f");
        let original = analysis.summaries.function(function).clone();
        let mut encoder = [function].into_iter().collect::<SymbolEncoder>();
        let bytes = analysis.write_summaries(&mut encoder);

        analysis.summaries.function_mut(function).self_size += 1;
        let changed = analysis.summaries.function(function).clone();
        assert_eq!(
            analysis.read_summary_section(&encoder, &bytes[..bytes.len() - 2]),
            Err(StreamError::UnexpectedEnd),
        );
        assert_eq!(analysis.summaries.function(function), &changed);
        assert_ne!(&changed, &original);
    }

    #[test]
    fn sections_referring_to_unknown_nodes_are_rejected() {
        let mut analysis = new_analysis();
        let encoder = SymbolEncoder::default();
        assert_eq!(
            analysis.read_summary_section(&encoder, &[1, 3]),
            Err(StreamError::UnknownNode(3)),
        );
    }

    #[test]
    fn extra_calls_are_detected() {
        let mut analysis = new_analysis();
        let (function, _) = add_branchy_function(&mut analysis, "f");
        let mut encoder = [function].into_iter().collect::<SymbolEncoder>();
        let bytes = analysis.write_summaries(&mut encoder);

        let callee = analysis.add_function("g");
        analysis.add_call(function, callee, 1000);
        assert!(analysis.read_summary_section(&encoder, &bytes).is_err());
    }

    #[test]
    fn unreachable_calls_stay_unreachable() {
        let mut analysis = new_analysis();
        let (function, call) = add_branchy_function(&mut analysis, "f");
        analysis.edge_set_predicate(call, Some(Predicate::FALSE));
        let copy = round_trip(&analysis);
        assert_eq!(copy.summaries.call(call).predicate, Some(Predicate::FALSE));
        assert_eq!(
            copy.graph.edge(call).callee,
            copy.graph.existing_unreachable_node(),
        );
        assert_eq!(
            copy.summaries.function(function).entries,
            analysis.summaries.function(function).entries,
        );
    }
}
