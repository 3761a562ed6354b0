//! Human-readable dumps of function summaries.

use crate::{
    call_graph::{EdgeId, NodeId},
    context::InlineAnalysis,
    to_text::{TextBuilder, ToText},
    FunctionSummary, INLINE_SIZE_SCALE, PROB_BASE,
};
use itertools::Itertools;

impl InlineAnalysis {
    /// The summary of `node` together with its calls, including the calls of
    /// bodies inlined into it.
    #[must_use]
    pub fn dump_summary(&self, node: NodeId) -> String {
        SummaryDump {
            analysis: self,
            node,
        }
        .to_text(true)
    }

    /// Summaries of all functions that are not inlined anywhere.
    #[must_use]
    pub fn dump_summaries(&self) -> String {
        self.graph
            .node_ids()
            .sorted()
            .filter(|node| {
                let data = self.graph.node(*node);
                data.inlined_to.is_none() && (data.body.is_some() || data.thunk)
            })
            .map(|node| self.dump_summary(node))
            .join("\n")
    }
}

struct SummaryDump<'a> {
    analysis: &'a InlineAnalysis,
    node: NodeId,
}
impl ToText for SummaryDump<'_> {
    fn build_text(&self, builder: &mut TextBuilder) {
        let data = self.analysis.graph.node(self.node);
        let summary = self.analysis.summaries.function(self.node);

        let flags = [
            (data.always_inline, "always_inline"),
            (summary.inlinable, "inlinable"),
            (summary.contains_cilk_spawn, "contains_cilk_spawn"),
            (summary.fp_expressions, "fp_expression"),
        ];
        builder.push_line(format!("{}/{}", data.name, self.node));
        for (_, flag) in flags.iter().filter(|(set, _)| *set) {
            builder.push(" ");
            builder.push(flag);
        }

        builder.push_indented(|builder| {
            builder.push_line(format!("self time: {:.2}", summary.self_time));
            builder.push_line(format!("global time: {:.2}", summary.time));
            builder.push_line(format!("self size: {}", summary.self_size));
            builder.push_line(format!("global size: {}", summary.size));
            builder.push_line(format!("min size: {}", summary.min_size));
            builder.push_line(format!("self stack: {}", summary.estimated_self_stack_size));
            builder.push_line(format!("global stack: {}", summary.estimated_stack_size));
            if summary.growth != 0 {
                builder.push_line(format!("estimated growth: {}", summary.growth));
            }
            if summary.scc_no != 0 {
                builder.push_line(format!("in SCC: {}", summary.scc_no));
            }
            build_summary_text(builder, summary);
            if !data.callees.is_empty() || !data.indirect_calls.is_empty() {
                builder.push_line("calls:");
                builder.push_indented(|builder| self.build_calls_text(builder, self.node));
            }
        });
    }
}
impl SummaryDump<'_> {
    fn build_calls_text(&self, builder: &mut TextBuilder, node: NodeId) {
        let graph = &self.analysis.graph;
        let data = graph.node(node);
        for &edge in &data.callees {
            self.build_call_text(builder, edge);
            let edge_data = graph.edge(edge);
            if let (true, Some(callee)) = (edge_data.is_inlined(), edge_data.callee) {
                builder.push_indented(|builder| self.build_calls_text(builder, callee));
            }
        }
        for &edge in &data.indirect_calls {
            self.build_call_text(builder, edge);
        }
    }
    fn build_call_text(&self, builder: &mut TextBuilder, edge: EdgeId) {
        let graph = &self.analysis.graph;
        let summaries = &self.analysis.summaries;
        let edge_data = graph.edge(edge);
        let call = summaries.call(edge);
        let conds = &summaries.function(graph.root(edge_data.caller)).conds;

        let target = match edge_data.callee {
            Some(callee) => {
                let status = edge_data
                    .inline_failed
                    .map_or("inlined", <&'static str>::from);
                format!("{}/{callee} {status}", graph.node(callee).name)
            }
            None => "indirect call".to_string(),
        };
        builder.push_line(format!(
            "{edge}: {target}, loop depth: {}, freq: {}, size: {}, time: {}",
            call.loop_depth, edge_data.frequency, call.call_stmt_size, call.call_stmt_time,
        ));
        if let Some(callee) = edge_data.callee.filter(|_| edge_data.is_inlined()) {
            let callee_summary = summaries.function(callee);
            builder.push(format!(
                ", callee size: {}, stack frame offset: {}",
                callee_summary.self_size, callee_summary.stack_frame_offset,
            ));
        }
        if let Some(predicate) = &call.predicate {
            builder.push(format!(", predicate: {}", predicate.display(conds)));
        }
        builder.push_indented(|builder| {
            for (index, param) in call.params.iter().enumerate() {
                if param.change_prob == 0 {
                    builder.push_line(format!("op{index} is compile time invariant"));
                } else if param.change_prob != PROB_BASE {
                    builder.push_line(format!(
                        "op{index} changes {:.2}% of time",
                        f64::from(param.change_prob) * 100.0 / f64::from(PROB_BASE),
                    ));
                }
            }
        });
    }
}

fn build_summary_text(builder: &mut TextBuilder, summary: &FunctionSummary) {
    let conds = &summary.conds;
    builder.push_section("conditions:", conds.iter().enumerate(), |builder, (index, condition)| {
        builder.push_line(format!("{index}: {condition}"));
    });
    for entry in &summary.entries {
        builder.push_line(format!(
            "size: {:.1}, time: {:.2}, executed if: {}",
            f64::from(entry.size) / f64::from(INLINE_SIZE_SCALE),
            entry.time,
            entry.exec_predicate.display(conds),
        ));
        if entry.nonconst_predicate != entry.exec_predicate {
            builder.push(format!(
                ", nonconst if: {}",
                entry.nonconst_predicate.display(conds),
            ));
        }
    }
    let hints = [
        ("loop iterations", &summary.loop_iterations),
        ("loop stride", &summary.loop_stride),
        ("array index", &summary.array_index),
    ];
    for (name, predicate) in hints {
        if let Some(predicate) = predicate {
            builder.push_line(format!("{name}: {}", predicate.display(conds)));
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        predicate::condition::Literal,
        test_utils::{add_branchy_function, add_caller, new_analysis},
    };

    #[test]
    fn dumps_entries_and_calls() {
        let mut analysis = new_analysis();
        let (function, _) = add_branchy_function(&mut analysis, "f");
        insta::assert_snapshot!(analysis.dump_summary(function), @r###"
        f/n0 inlinable
          self time: 17.00
          global time: 14.50
          self size: 17
          global size: 17
          min size: 0
          self stack: 0
          global stack: 0
          conditions:
            0: op0 == 0
            1: op0 != 0
            2: op0 changed
          size: 0.0, time: 0.00, executed if: true
          size: 2.0, time: 0.00, executed if: (not inlined)
          size: 1.0, time: 1.00, executed if: true, nonconst if: (op0 changed)
          size: 10.0, time: 10.00, executed if: (op0 != 0)
          size: 1.0, time: 1.00, executed if: (op0 == 0)
          calls:
            e0: f.callee/n1 unspecified, loop depth: 0, freq: 500, size: 3, time: 5, predicate: (op0 != 0)
        "###);
    }

    #[test]
    fn inlined_bodies_are_nested() {
        let mut analysis = new_analysis();
        let (function, call) = add_branchy_function(&mut analysis, "f");
        let (caller, inlined_call) =
            add_caller(&mut analysis, "caller", function, Literal::int(1, 32));
        analysis.inline_call(inlined_call);

        let dump = analysis.dump_summary(caller);
        let lines = dump.lines().collect::<Vec<_>>();
        let call_line = lines
            .iter()
            .position(|line| line.trim_start().starts_with(&format!("{inlined_call}:")))
            .unwrap();
        assert!(lines[call_line].contains("f/n0 inlined"));
        assert!(lines[call_line + 1].trim_start().starts_with(&format!("{call}:")));
        assert!(analysis.dump_summaries().contains("caller/"));
        assert!(!analysis.dump_summaries().contains("\nf/n0"));
    }
}
