//! What a calling context knows about the arguments it passes.

use crate::{call_graph::NodeId, predicate::condition::Literal};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KnownValue {
    Constant(Literal),
    /// Not a known constant, but known not to change between invocations.
    Invariant,
}
impl KnownValue {
    #[must_use]
    pub const fn constant(&self) -> Option<&Literal> {
        match self {
            Self::Constant(literal) => Some(literal),
            Self::Invariant => None,
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct AggregateItem {
    /// In bits.
    pub offset: i64,
    pub value: Literal,
}

/// Known constant parts of an aggregate passed by value or by reference.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct KnownAggregate {
    pub by_ref: bool,
    pub items: Vec<AggregateItem>,
}
impl KnownAggregate {
    #[must_use]
    pub fn find(&self, offset: i64, by_ref: bool) -> Option<&Literal> {
        if self.by_ref != by_ref {
            return None;
        }
        self.items
            .iter()
            .find(|item| item.offset == offset)
            .map(|item| &item.value)
    }
}

/// The dynamic type of an object argument is known, so a virtual call on it
/// resolves to `target`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PolymorphicContext {
    pub target: NodeId,
}

/// Per-parameter knowledge, indexed by parameter number.
///
/// An empty vector means nothing is known at all.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KnownArguments {
    pub values: Vec<Option<KnownValue>>,
    pub contexts: Vec<Option<PolymorphicContext>>,
    pub aggregates: Vec<Option<KnownAggregate>>,
}
impl KnownArguments {
    #[must_use]
    pub fn from_values(values: Vec<Option<KnownValue>>) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }
    #[must_use]
    pub fn from_constants(constants: impl IntoIterator<Item = Option<Literal>>) -> Self {
        Self::from_values(
            constants
                .into_iter()
                .map(|it| it.map(KnownValue::Constant))
                .collect(),
        )
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.contexts.is_empty()
    }
}
