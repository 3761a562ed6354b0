use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SummaryConfig {
    /// Without optimization, no predicates are computed and functions are
    /// only inlinable if the frontend marked them so.
    pub optimize: bool,

    /// Whether devirtualizing an indirect call under known arguments counts as
    /// a benefit.
    pub indirect_inlining: bool,

    /// Percentage of COMDAT functions assumed to be shared with other units
    /// and therefore not removable after inlining.
    pub comdat_sharing_probability: i32,

    pub size_weights: CostWeights,
    pub time_weights: CostWeights,
}
impl SummaryConfig {
    #[must_use]
    pub const fn unoptimized() -> Self {
        Self {
            optimize: false,
            ..Self::DEFAULT
        }
    }

    const DEFAULT: Self = Self {
        optimize: true,
        indirect_inlining: true,
        comdat_sharing_probability: 20,
        size_weights: CostWeights {
            call_cost: 1,
            indirect_call_cost: 3,
        },
        time_weights: CostWeights {
            call_cost: 10,
            indirect_call_cost: 15,
        },
    };
}
impl Default for SummaryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Costs the frontend's statement weights assign to call statements.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostWeights {
    pub call_cost: i32,
    pub indirect_call_cost: i32,
}
impl CostWeights {
    #[must_use]
    pub const fn devirtualization_benefit(self) -> i32 {
        self.indirect_call_cost - self.call_cost
    }
}
