//! Attack-synthesis engine for Protego.
//!
//! Given a loaded classifier and a target class, a scan:
//!
//! 1. validates the request against the model (before any inference),
//! 2. looks up the strategy for the (architecture, attack family) pair,
//! 3. runs its fixed-budget loop from a seed image, clipping every update
//!    into the architecture's value domain,
//! 4. quantizes the terminal image to 8 bits and re-scores it,
//! 5. attaches the mitigation guidance for the pair.
//!
//! Score-based strategies follow a signed gradient toward the target, taken
//! from back-propagation when the model supports it and from NES estimation
//! otherwise. Boundary-based strategies propose candidates and keep only those
//! the model labels as the target.

pub mod analyzer;
pub mod attack;
pub mod cancel;
pub mod engine;
pub mod nes;
pub mod signal;
pub mod strategy;

pub use analyzer::{Analysis, Analyzer, Rescored};
pub use attack::{Attack, AttackOutcome, DEFAULT_CHECK_INTERVAL};
pub use cancel::CancellationToken;
pub use engine::{
    CachingLoader, EngineConfig, FileModelLoader, ModelLoader, ScanEngine, ScanOptions,
};
pub use nes::NesConfig;
pub use signal::{
    AnalyticGradient, DirectionalSignal, GradientMode, NesSignal, Objective, Signal,
};
pub use strategy::{descriptor, StepRule, StrategyDescriptor, DEFAULT_BUDGET};

pub use protego_core::{Result, ScanError};
