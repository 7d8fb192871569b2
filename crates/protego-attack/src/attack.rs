//! The strategy loop.
//!
//! One loop runs every [`StrategyDescriptor`]. Each iteration performs the
//! rule's update, clips into the domain, and reports the current image to an
//! optional observer. The budget is always run in full; there is no early
//! exit on success. Any model failure aborts the loop with no partial result.

use crate::cancel::CancellationToken;
use crate::signal::{DirectionalSignal, Objective};
use crate::strategy::{StepRule, StrategyDescriptor};
use ndarray::Array3;
use protego_core::{Result, ScanError};
use protego_model::{argmax, Classifier};
use protego_tensor::{SpectralAttenuator, WorkingImage};
use rand::rngs::StdRng;
use tracing::{debug, trace};

/// Default number of iterations between cancellation checks.
pub const DEFAULT_CHECK_INTERVAL: usize = 64;

/// Terminal state of a strategy loop.
#[derive(Debug, Clone)]
pub struct AttackOutcome {
    pub image: WorkingImage,
    pub iterations: usize,
    /// Oracle-accepted candidates, for rejection-sampled rules.
    pub accepted_steps: Option<usize>,
    pub model_queries: usize,
}

/// A configured strategy run against one model.
pub struct Attack<'a> {
    descriptor: StrategyDescriptor,
    model: &'a dyn Classifier,
    signal: Option<&'a dyn DirectionalSignal>,
    cancel: CancellationToken,
    check_interval: usize,
}

impl<'a> Attack<'a> {
    pub fn new(descriptor: StrategyDescriptor, model: &'a dyn Classifier) -> Self {
        Self {
            descriptor,
            model,
            signal: None,
            cancel: CancellationToken::new(),
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }

    /// Directional signal for gradient-driven rules.
    pub fn with_signal(mut self, signal: &'a dyn DirectionalSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Check `token` every `interval` iterations (an interval of 0 is treated as 1).
    pub fn with_cancellation(mut self, token: CancellationToken, interval: usize) -> Self {
        self.cancel = token;
        self.check_interval = interval.max(1);
        self
    }

    pub fn descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    pub fn run(&self, seed: WorkingImage, target: usize, rng: &mut StdRng) -> Result<AttackOutcome> {
        self.run_observed(seed, target, rng, |_, _| {})
    }

    /// Run the loop, calling `observer(iteration, image)` after every update.
    pub fn run_observed<F>(
        &self,
        seed: WorkingImage,
        target: usize,
        rng: &mut StdRng,
        mut observer: F,
    ) -> Result<AttackOutcome>
    where
        F: FnMut(usize, &WorkingImage),
    {
        let d = &self.descriptor;
        if seed.domain() != d.domain {
            return Err(ScanError::InvalidRequest(format!(
                "seed image domain {} does not match {} domain {}",
                seed.domain(),
                d.architecture,
                d.domain
            )));
        }
        if target >= self.model.num_classes() {
            return Err(ScanError::InvalidRequest(format!(
                "target class {target} out of range for a model with {} classes",
                self.model.num_classes()
            )));
        }

        let signal = match (d.rule.objective(), self.signal) {
            (Some(_), None) => {
                return Err(ScanError::InvalidRequest(format!(
                    "{} step rule needs a directional signal",
                    d.rule.name()
                )))
            }
            (_, signal) => signal,
        };

        let mut current = seed.clipped();
        let mut queries = 0;
        let mut accepted = 0;
        let mut momentum: Option<Array3<f32>> = None;
        let mut spectral: Option<SpectralAttenuator> = None;

        debug!(
            architecture = %d.architecture,
            family = %d.family,
            rule = d.rule.name(),
            signal = signal.map_or("none", |s| s.name()),
            budget = d.budget,
            target,
            "Starting attack loop"
        );

        for i in 0..d.budget {
            if i % self.check_interval == 0 {
                self.cancel.check(i)?;
            }

            let candidate = match d.rule {
                StepRule::SignedGradient { step } => {
                    let signal = required(signal)?.direction(
                        self.model,
                        &current,
                        target,
                        Objective::CrossEntropy,
                        rng,
                    )?;
                    queries += signal.queries;
                    current.signed_step(signal.direction.view(), step)?;
                    None
                }
                StepRule::RandomWalk { noise_std } => Some(current.noisy_candidate(noise_std, rng)),
                StepRule::MomentumSign { step, decay } => {
                    let signal = required(signal)?.direction(
                        self.model,
                        &current,
                        target,
                        Objective::TargetConfidence,
                        rng,
                    )?;
                    queries += signal.queries;
                    let m = match momentum.take() {
                        Some(mut m) => {
                            m.zip_mut_with(&signal.direction, |m, &g| {
                                *m = decay * *m + (1.0 - decay) * g
                            });
                            m
                        }
                        None => signal.direction * (1.0 - decay),
                    };
                    let candidate = current.signed_candidate(m.view(), step)?;
                    momentum = Some(m);
                    Some(candidate)
                }
                StepRule::SpectralAttenuation { factor } => {
                    let (h, w, _) = current.shape();
                    let attenuated = spectral
                        .get_or_insert_with(|| SpectralAttenuator::new(h, w, factor))
                        .apply(current.view())?;
                    let mut candidate = current.clone();
                    candidate.assign_clipped(attenuated)?;
                    Some(candidate)
                }
            };

            if let Some(candidate) = candidate {
                let scores = self.model.predict(candidate.view())?;
                queries += 1;
                if argmax(scores.view()) == target {
                    current = candidate;
                    accepted += 1;
                    trace!(iteration = i, "Candidate accepted");
                }
            }

            observer(i, &current);
        }

        let accepted_steps = d.rule.is_rejection_sampled().then_some(accepted);
        debug!(
            iterations = d.budget,
            accepted = ?accepted_steps,
            queries,
            "Attack loop finished"
        );
        Ok(AttackOutcome {
            image: current,
            iterations: d.budget,
            accepted_steps,
            model_queries: queries,
        })
    }
}

fn required(signal: Option<&dyn DirectionalSignal>) -> Result<&dyn DirectionalSignal> {
    signal.ok_or_else(|| ScanError::InvalidRequest("missing directional signal".to_string()))
}
