use enumset::{EnumSet, EnumSetType};
use itertools::Itertools;
use strum_macros::IntoStaticStr;

/// Advisory facts about a call site that bias the inlining policy.
#[derive(Debug, EnumSetType, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum InlineHint {
    /// Inlining turns an indirect call into a direct one to an inlinable
    /// function.
    IndirectCall,
    /// Inlining makes the iteration count of some loop known.
    LoopIterations,
    /// Inlining makes the stride of some induction variable known.
    LoopStride,
    SameScc,
    InScc,
    CrossModule,
    DeclaredInline,
    /// Inlining makes some array index known.
    ArrayIndex,
    KnownHot,
}

pub type InlineHints = EnumSet<InlineHint>;

#[must_use]
pub fn format_hints(hints: InlineHints) -> String {
    hints.iter().map(<&'static str>::from).join(" ")
}

#[cfg(test)]
mod test {
    use super::{format_hints, InlineHint};

    #[test]
    fn hints_are_listed_in_declaration_order() {
        let hints = InlineHint::KnownHot | InlineHint::LoopStride | InlineHint::IndirectCall;
        assert_eq!(format_hints(hints), "indirect_call loop_stride known_hot");
    }
}
