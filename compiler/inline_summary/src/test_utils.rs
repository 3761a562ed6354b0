//! Small analyzed call graphs for tests.

use crate::{
    body::{BlockId, BodyBuilder, Call, Operand, StatementKind},
    call_graph::{EdgeId, JumpFunction, NodeId},
    predicate::condition::{ConditionCode, Literal},
    InlineAnalysis, SummaryConfig,
};
use tracing::Level;

pub const CHEAP_SIZE: i32 = 1;
pub const EXPENSIVE_SIZE: i32 = 10;
pub const CALL_SIZE: i32 = 3;

pub fn new_analysis() -> InlineAnalysis {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::TRACE)
        .with_test_writer()
        .try_init();
    InlineAnalysis::new(SummaryConfig::default())
}

pub fn call_statement(edge: EdgeId, arguments: Vec<Operand>) -> Call {
    Call {
        edge: Some(edge),
        arguments: arguments.into_iter().map(Into::into).collect(),
        lhs: None,
        builtin: None,
        is_const: false,
    }
}

/// A statement that never becomes constant and never gets eliminated.
pub fn opaque_statement() -> StatementKind {
    StatementKind::Other { uses: vec![] }
}

/// `name() { <size> }` with a stack frame of `stack` bytes.
pub fn add_leaf_function(analysis: &mut InlineAnalysis, name: &str, size: i32, stack: i64) -> NodeId {
    let function = analysis.add_function(name);
    let mut builder = BodyBuilder::with_int_parameters(0);
    builder.set_stack_frame_size(stack);
    builder.push(BlockId::ENTRY, opaque_statement(), size, size);
    analysis.graph.node_mut(function).body = Some(builder.finish());
    analysis.analyze_function(function);
    function
}

/// ```text
/// name(x) {
///   if (x == 0) { <CHEAP_SIZE> }
///   else { <EXPENSIVE_SIZE>; name.callee(); }
/// }
/// ```
///
/// Returns the function and its call of `name.callee`.
pub fn add_branchy_function(analysis: &mut InlineAnalysis, name: &str) -> (NodeId, EdgeId) {
    let function = analysis.add_function(name);
    let callee = analysis.add_function(format!("{name}.callee"));
    let call = analysis.add_call(function, callee, 500);

    let mut builder = BodyBuilder::with_int_parameters(1);
    let x = builder.parameter_value(0);
    let cheap = builder.add_block(500);
    let expensive = builder.add_block(500);
    builder.branch(
        BlockId::ENTRY,
        StatementKind::Condition {
            lhs: Operand::Ssa(x),
            code: ConditionCode::Eq,
            rhs: Operand::Constant(Literal::int(0, 32)),
            floating: false,
        },
        cheap,
        expensive,
        1,
        1,
    );
    builder.push(cheap, opaque_statement(), CHEAP_SIZE, CHEAP_SIZE);
    builder.push(expensive, opaque_statement(), EXPENSIVE_SIZE, EXPENSIVE_SIZE);
    builder.call(expensive, call_statement(call, vec![]), false, CALL_SIZE, 5);
    analysis.graph.node_mut(function).body = Some(builder.finish());
    analysis.analyze_function(function);
    (function, call)
}

/// `name() { callee(argument); }`
pub fn add_caller(
    analysis: &mut InlineAnalysis,
    name: &str,
    callee: NodeId,
    argument: Literal,
) -> (NodeId, EdgeId) {
    let function = analysis.add_function(name);
    let call = analysis.add_call(function, callee, 1000);
    analysis.graph.edge_mut(call).jump_functions = vec![JumpFunction::constant(argument)];

    let mut builder = BodyBuilder::with_int_parameters(0);
    builder.call(
        BlockId::ENTRY,
        call_statement(call, vec![Operand::Constant(argument)]),
        false,
        CALL_SIZE,
        5,
    );
    analysis.graph.node_mut(function).body = Some(builder.finish());
    analysis.analyze_function(function);
    (function, call)
}

/// `name(x) { callee(x); }`
pub fn add_forwarder(analysis: &mut InlineAnalysis, name: &str, callee: NodeId) -> (NodeId, EdgeId) {
    let function = analysis.add_function(name);
    let call = analysis.add_call(function, callee, 1000);
    analysis.graph.edge_mut(call).jump_functions = vec![JumpFunction::pass_through(0)];

    let mut builder = BodyBuilder::with_int_parameters(1);
    let x = builder.parameter_value(0);
    builder.call(
        BlockId::ENTRY,
        call_statement(call, vec![Operand::Ssa(x)]),
        false,
        CALL_SIZE,
        5,
    );
    analysis.graph.node_mut(function).body = Some(builder.finish());
    analysis.analyze_function(function);
    (function, call)
}
