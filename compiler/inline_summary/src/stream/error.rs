use thiserror::Error;

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum StreamError {
    #[error("Unit {file} has no inline summary section.")]
    MissingSummary { file: String },

    #[error("The summary section ended unexpectedly.")]
    UnexpectedEnd,

    #[error("Invalid condition code {0}.")]
    InvalidConditionCode(u64),

    #[error("Invalid literal tag {0}.")]
    InvalidLiteralTag(u8),

    #[error("The summary section refers to unknown node {0}.")]
    UnknownNode(u64),

    #[error("The summary of node {0} doesn't start with an unconditional entry.")]
    MissingUnconditionalEntry(u64),

    #[error("The calls in the summary section don't match the call graph.")]
    EdgeCountMismatch,

    #[error("A value in the summary section is out of range.")]
    Overflow,
}
