#![warn(clippy::nursery, clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::too_many_arguments
)]

//! Context-sensitive size and time summaries for interprocedural inlining.
//!
//! Every function in the call graph gets a [`FunctionSummary`]: a list of
//! size/time entries, each guarded by a pair of [`Predicate`]s over
//! conditions on the function's parameters. When a caller knows something
//! about the arguments it passes, evaluating those predicates tells the
//! inliner how large and how slow the callee would be once specialized or
//! inlined into that call site.
//!
//! All state lives in [`InlineAnalysis`], which owns the call graph, the
//! summary side tables and the edge growth cache. Graph mutations go
//! through it so that the summaries never disagree with the graph.

pub use self::{
    config::{CostWeights, SummaryConfig},
    context::InlineAnalysis,
    hints::{InlineHint, InlineHints},
    predicate::{condition::Conditions, Predicate},
    summary::{CallSummary, FunctionSummary, SizeTimeEntry},
};

pub mod analyze;
pub mod body;
pub mod call_graph;
pub mod config;
pub mod context;
mod duplicate;
pub mod dump;
pub mod estimate;
pub mod growth;
pub mod growth_cache;
pub mod hints;
pub mod id;
pub mod known;
pub mod merge;
pub mod predicate;
pub mod stream;
pub mod summary;
#[cfg(test)]
mod test_utils;
pub mod to_text;
pub mod utils;

/// Sizes in summary entries are multiplied by this factor so that half-units
/// survive the split between eliminated and surviving statement costs.
pub const INLINE_SIZE_SCALE: i32 = 2;
/// Probabilities are fixed-point numbers with this base.
pub const PROB_BASE: i32 = 10_000;
/// Edge and block frequencies are relative to this base.
pub const FREQ_BASE: i32 = 1000;
pub const FREQ_MAX: i32 = 100_000;
/// Once a summary has this many entries, further accounting lands in entry 0.
pub const MAX_ENTRIES: usize = 256;

/// Rounding integer division.
#[must_use]
pub const fn rdiv(x: i64, y: i64) -> i64 {
    (x + y / 2) / y
}

#[must_use]
pub const fn combine_probabilities(prob1: i32, prob2: i32) -> i32 {
    rdiv(prob1 as i64 * prob2 as i64, PROB_BASE as i64) as i32
}

/// `numerator / denominator` as a probability, rounded.
#[must_use]
pub const fn compute_scale(numerator: i32, denominator: i32) -> i32 {
    if denominator == 0 {
        PROB_BASE
    } else {
        rdiv(numerator as i64 * PROB_BASE as i64, denominator as i64) as i32
    }
}
