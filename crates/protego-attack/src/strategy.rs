//! Strategy selection table.
//!
//! The six strategies differ only in their step rule and its constants, so
//! they are data: `(Architecture, AttackFamily) -> StrategyDescriptor`, run by
//! a single loop in [`crate::attack`].

use crate::signal::Objective;
use protego_core::{Architecture, AttackFamily, Domain};
use serde::Serialize;

/// Iterations every strategy runs unless overridden.
pub const DEFAULT_BUDGET: usize = 5000;

/// Per-iteration update rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum StepRule {
    /// `x <- clip(x + step * sign(grad log p_target))`, always applied.
    SignedGradient { step: f32 },
    /// Candidate `clip(x + N(0, std^2))`, kept iff the oracle says target.
    RandomWalk { noise_std: f32 },
    /// `m <- decay*m + (1-decay)*grad p_target`; candidate
    /// `clip(x + step * sign(m))`, kept iff the oracle says target.
    MomentumSign { step: f32, decay: f32 },
    /// Candidate with every 2-D FFT magnitude scaled by `factor`, phase
    /// kept; kept iff the oracle says target.
    SpectralAttenuation { factor: f32 },
}

impl StepRule {
    /// Whether candidates are gated by the label oracle.
    pub fn is_rejection_sampled(&self) -> bool {
        !matches!(self, StepRule::SignedGradient { .. })
    }

    /// Objective the rule needs a direction for, if any.
    pub fn objective(&self) -> Option<Objective> {
        match self {
            StepRule::SignedGradient { .. } => Some(Objective::CrossEntropy),
            StepRule::MomentumSign { .. } => Some(Objective::TargetConfidence),
            StepRule::RandomWalk { .. } | StepRule::SpectralAttenuation { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StepRule::SignedGradient { .. } => "signed-gradient",
            StepRule::RandomWalk { .. } => "random-walk",
            StepRule::MomentumSign { .. } => "momentum-sign",
            StepRule::SpectralAttenuation { .. } => "spectral-attenuation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StrategyDescriptor {
    pub architecture: Architecture,
    pub family: AttackFamily,
    pub rule: StepRule,
    pub domain: Domain,
    pub budget: usize,
}

impl StrategyDescriptor {
    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }
}

/// Look up the strategy for an (architecture, family) pair.
pub fn descriptor(architecture: Architecture, family: AttackFamily) -> StrategyDescriptor {
    use Architecture::*;
    use AttackFamily::*;

    let rule = match (architecture, family) {
        (ResNet, ScoreBased) => StepRule::SignedGradient { step: 0.04 },
        (MobileNet, ScoreBased) => StepRule::SignedGradient { step: 0.06 },
        (EfficientNet, ScoreBased) => StepRule::SignedGradient { step: 0.03 },
        (ResNet, BoundaryBased) => StepRule::RandomWalk { noise_std: 0.01 },
        (MobileNet, BoundaryBased) => StepRule::MomentumSign {
            step: 0.02,
            decay: 0.9,
        },
        (EfficientNet, BoundaryBased) => StepRule::SpectralAttenuation { factor: 0.95 },
    };

    StrategyDescriptor {
        architecture,
        family,
        rule,
        domain: architecture.domain(),
        budget: DEFAULT_BUDGET,
    }
}
