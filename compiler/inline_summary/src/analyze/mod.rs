//! Builds function summaries from function bodies.
//!
//! The analysis computes under which predicate each block runs, splits every
//! statement's cost into the part that survives inlining and the part that
//! doesn't, and tracks which SSA values stop being constant depending on the
//! parameters. Calls don't contribute to the function's entries: their cost
//! lives in the call summaries so that it disappears once a call is inlined.

use self::{
    parameters::{eliminated_by_inlining_prob, param_change_prob},
    predicates::{find_foldable_builtin_expect, is_clobber_only_eh_block},
};
use crate::{
    body::{BlockId, Builtin, FunctionBody, StatementKind, StatementRef},
    call_graph::{EdgeId, NodeId},
    context::InlineAnalysis,
    predicate::Predicate,
    summary::{set_hint_predicate, CallSummary, FunctionSummary, ParamChange},
    FREQ_BASE, INLINE_SIZE_SCALE,
};
use tracing::{debug, trace};

pub mod parameters;
mod predicates;

impl InlineAnalysis {
    /// Builds the summary of a function and its outgoing calls from scratch.
    pub fn analyze_function(&mut self, node: NodeId) {
        self.compute_inline_parameters(node, false);
    }

    /// Like [`Self::analyze_function`]. The early variant skips loop
    /// analysis.
    pub fn compute_inline_parameters(&mut self, node: NodeId, early: bool) {
        let data = self.graph.node(node);
        assert!(
            data.inlined_to.is_none(),
            "Inline clone {node} can't be analyzed.",
        );
        let scc_no = self
            .summaries
            .get_function(node)
            .map_or(0, |summary| summary.scc_no);

        if data.thunk {
            let [edge] = data.callees.as_slice() else {
                panic!("Thunk {node} must call exactly one function.");
            };
            self.analyze_thunk(node, *edge, scc_no);
            return;
        }

        let body = data
            .body
            .as_ref()
            .unwrap_or_else(|| panic!("Function {node} has no body to analyze."));
        let optimize = self.config.optimize;
        let BodyAnalysis { mut summary, calls } = analyze_body(body, optimize, early);
        summary.inlinable = (optimize || data.always_inline) && body.inlinable;
        summary.contains_cilk_spawn = body.contains_cilk_spawn;
        let stack_size = if optimize { body.stack_frame_size } else { 0 };
        summary.estimated_self_stack_size = stack_size;
        summary.estimated_stack_size = stack_size;
        summary.stack_frame_offset = 0;
        summary.scc_no = scc_no;
        summary.size = summary.self_size;
        self.summaries.set_function(node, summary);

        for call in calls {
            self.reset_edge_growth_cache(call.edge);
            self.summaries.set_call(call.edge, call.summary);
            self.edge_set_predicate(call.edge, Some(call.predicate));
        }
        self.update_overall_summary(node);

        let summary = self.summaries.function(node);
        debug!(
            "Analyzed {}: self size {}, self time {:.2}, {} entries, {} conditions.",
            self.graph.node(node).name,
            summary.self_size,
            summary.self_time,
            summary.entries.len(),
            summary.conds.len(),
        );
    }

    fn analyze_thunk(&mut self, node: NodeId, edge: EdgeId, scc_no: u32) {
        let call = self.summaries.call_mut(edge);
        call.call_stmt_size = self.config.size_weights.call_cost;
        call.call_stmt_time = self.config.time_weights.call_cost;

        let mut summary = FunctionSummary::without_entries();
        summary.account_size_time(
            2 * INLINE_SIZE_SCALE,
            2.0,
            Predicate::TRUE,
            Predicate::TRUE,
        );
        summary.account_size_time(
            2 * INLINE_SIZE_SCALE,
            0.0,
            Predicate::not_inlined(),
            Predicate::not_inlined(),
        );
        summary.inlinable = true;
        summary.scc_no = scc_no;
        self.summaries.set_function(node, summary);
        self.update_overall_summary(node);

        let summary = self.summaries.function_mut(node);
        summary.self_size = summary.size;
        summary.self_time = summary.time;
        debug!("Analyzed thunk {}.", self.graph.node(node).name);
    }
}

/// Outcome of analyzing a single body, before it is attached to the graph.
struct BodyAnalysis {
    summary: FunctionSummary,
    calls: Vec<CallSite>,
}
struct CallSite {
    edge: EdgeId,
    summary: CallSummary,
    predicate: Predicate,
}

fn analyze_body(body: &FunctionBody, optimize: bool, early: bool) -> BodyAnalysis {
    let analyzer = BodyAnalyzer {
        body,
        optimize,
        summary: FunctionSummary::without_entries(),
        bb_predicates: vec![],
        nonconstant_names: vec![Predicate::TRUE; body.ssa_names.len()],
    };
    analyzer.run(early)
}

pub(crate) struct BodyAnalyzer<'a> {
    body: &'a FunctionBody,
    /// Without optimization, every block is executed and no value becomes
    /// constant.
    optimize: bool,
    summary: FunctionSummary,
    /// `None` for blocks that are never executed.
    bb_predicates: Vec<Option<Predicate>>,
    /// Indexed by SSA name.
    nonconstant_names: Vec<Predicate>,
}
impl BodyAnalyzer<'_> {
    fn run(mut self, early: bool) -> BodyAnalysis {
        let body = self.body;
        // Prologue and epilogue.
        let mut size = 2;
        let mut time = 0.0;
        self.summary
            .account_size_time(0, 0.0, Predicate::TRUE, Predicate::TRUE);
        self.summary.account_size_time(
            2 * INLINE_SIZE_SCALE,
            0.0,
            Predicate::not_inlined(),
            Predicate::not_inlined(),
        );

        if self.optimize {
            self.compute_bb_predicates();
        }

        let mut calls = vec![];
        let mut array_index = Predicate::TRUE;
        for block in body.reverse_post_order() {
            if is_clobber_only_eh_block(body, block) {
                trace!("Ignoring {block}: it only clobbers before rethrowing.");
                continue;
            }
            let frequency = body.relative_frequency(block);
            let bb_predicate = self.bb_predicate(block);
            trace!(
                "{block} with frequency {frequency} runs if {}",
                bb_predicate.display(&self.summary.conds),
            );

            if self.optimize {
                self.analyze_phis(block);
            }
            let foldable_condition = find_foldable_builtin_expect(body, block);

            for (index, statement) in body.block(block).statements.iter().enumerate() {
                let mut this_size = statement.size;
                let mut this_time = statement.time;
                if foldable_condition == Some(StatementRef { block, index }) {
                    this_size -= 1;
                    this_time -= 1;
                }

                let mut is_edge_call = false;
                if let StatementKind::Call(call) = &statement.kind {
                    // The result of `__builtin_constant_p` always resolves to
                    // a constant, but the call itself must stay accounted.
                    if let (true, Some(Builtin::ConstantP), Some(lhs)) =
                        (self.optimize, call.builtin, call.lhs)
                    {
                        self.nonconstant_names[*lhs] = Predicate::FALSE;
                    }
                    if let Some(edge) = call.edge {
                        is_edge_call = true;
                        let params = if self.optimize {
                            call.arguments
                                .iter()
                                .map(|argument| ParamChange {
                                    change_prob: param_change_prob(body, block, argument),
                                })
                                .collect()
                        } else {
                            vec![]
                        };
                        calls.push(CallSite {
                            edge,
                            summary: CallSummary {
                                call_stmt_size: this_size,
                                call_stmt_time: this_time,
                                loop_depth: body.loop_depth(block),
                                predicate: None,
                                params,
                            },
                            predicate: bb_predicate,
                        });
                    }
                }

                if self.optimize {
                    let accessed = [
                        statement.loaded_operand(),
                        match &statement.kind {
                            StatementKind::Assign { lhs, .. } if statement.is_store() => Some(lhs),
                            _ => None,
                        },
                    ];
                    for operand in accessed.into_iter().flatten() {
                        let this_array_index = self.array_index_predicate(operand);
                        if !this_array_index.is_false() {
                            array_index &= this_array_index;
                        }
                    }
                }

                let will_be_nonconstant = if self.optimize {
                    self.will_be_nonconstant_predicate(statement)
                } else {
                    Predicate::TRUE
                };
                if this_size == 0 && this_time == 0 {
                    continue;
                }

                let final_time = f64::from(this_time) * f64::from(frequency);
                let prob = if self.optimize {
                    eliminated_by_inlining_prob(body, statement)
                } else {
                    0
                };
                let predicate = bb_predicate & will_be_nonconstant;
                trace!(
                    "  {:?}: size {this_size}, time {this_time}, eliminated {prob}/2, nonconstant if {}",
                    statement.kind,
                    predicate.display(&self.summary.conds),
                );

                // Calls can't be dropped when they are never executed: their
                // edges account for them.
                let executed = if is_edge_call {
                    bb_predicate
                } else {
                    predicate
                };
                if !executed.is_false() {
                    time += final_time;
                    size += this_size;
                }

                if !is_edge_call {
                    let time_divisor = f64::from(FREQ_BASE * 2);
                    if prob != 0 {
                        self.summary.account_size_time(
                            this_size * prob,
                            final_time * f64::from(prob) / time_divisor,
                            bb_predicate & Predicate::not_inlined(),
                            predicate,
                        );
                    }
                    if prob != 2 {
                        self.summary.account_size_time(
                            this_size * (2 - prob),
                            final_time * f64::from(2 - prob) / time_divisor,
                            bb_predicate,
                            predicate,
                        );
                    }
                }

                if statement.has_float_operands && !self.summary.fp_expressions {
                    trace!("Found a floating point expression.");
                    self.summary.fp_expressions = true;
                }
            }
        }
        set_hint_predicate(&mut self.summary.array_index, array_index);

        if self.optimize && !early {
            self.compute_loop_hints();
        }

        self.summary.self_time = time / f64::from(FREQ_BASE);
        self.summary.self_size = size;
        BodyAnalysis {
            summary: self.summary,
            calls,
        }
    }

    fn bb_predicate(&self, block: BlockId) -> Predicate {
        if self.optimize {
            self.bb_predicates[*block].unwrap_or(Predicate::FALSE)
        } else {
            Predicate::TRUE
        }
    }

    /// Collects when loop iteration counts and induction variable steps are
    /// not constants.
    fn compute_loop_hints(&mut self) {
        let body = self.body;
        let mut loop_iterations = Predicate::TRUE;
        let mut loop_stride = Predicate::TRUE;
        for loop_data in &body.loops {
            let header_predicate = self.bb_predicate(loop_data.header);
            for count in &loop_data.iteration_counts {
                if count.is_min_invariant() {
                    continue;
                }
                let predicate = self.will_be_nonconstant_expr_predicate(count);
                if let Some(predicate) = Self::hint_contribution(header_predicate, predicate) {
                    loop_iterations &= predicate;
                }
            }
            for induction in &loop_data.induction_steps {
                if induction.step.is_min_invariant() {
                    continue;
                }
                let block_predicate = self.bb_predicate(induction.block);
                let predicate = self.will_be_nonconstant_expr_predicate(&induction.step);
                if let Some(predicate) = Self::hint_contribution(block_predicate, predicate) {
                    loop_stride &= predicate;
                }
            }
        }
        set_hint_predicate(&mut self.summary.loop_iterations, loop_iterations);
        set_hint_predicate(&mut self.summary.loop_stride, loop_stride);
    }
    fn hint_contribution(block_predicate: Predicate, nonconstant: Predicate) -> Option<Predicate> {
        let predicate = if nonconstant.is_true() {
            nonconstant
        } else {
            block_predicate & nonconstant
        };
        (!predicate.is_true() && !predicate.is_false()).then_some(predicate)
    }
}
