//! Directional signals: where to push an image to raise the target class.
//!
//! Strategies only ever see a [`DirectionalSignal`]. Whether the direction
//! comes from back-propagation through the model or from black-box NES
//! probing is decided once per scan by [`GradientMode`].

use crate::nes::{self, NesConfig};
use ndarray::{Array1, Array3};
use protego_core::{Result, ScanError};
use protego_model::{softmax, Classifier};
use protego_tensor::WorkingImage;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Quantity whose ascent direction is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    /// `log p_target`, i.e. negated cross-entropy to the target one-hot.
    CrossEntropy,
    /// `p_target`, the softmax confidence itself.
    TargetConfidence,
}

/// An image-shaped ascent direction and what it cost to get.
#[derive(Debug, Clone)]
pub struct Signal {
    pub direction: Array3<f32>,
    pub queries: usize,
}

pub trait DirectionalSignal: Send + Sync {
    fn name(&self) -> &'static str;

    /// Ascent direction of `objective` for class `target` at `image`.
    fn direction(
        &self,
        model: &dyn Classifier,
        image: &WorkingImage,
        target: usize,
        objective: Objective,
        rng: &mut StdRng,
    ) -> Result<Signal>;
}

/// Exact vector-Jacobian product through a differentiable model.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyticGradient;

impl DirectionalSignal for AnalyticGradient {
    fn name(&self) -> &'static str {
        "analytic"
    }

    fn direction(
        &self,
        model: &dyn Classifier,
        image: &WorkingImage,
        target: usize,
        objective: Objective,
        _rng: &mut StdRng,
    ) -> Result<Signal> {
        let diff = model.as_differentiable().ok_or_else(|| {
            ScanError::InvalidRequest("model does not expose an analytic gradient".to_string())
        })?;

        let probs = softmax(model.logits(image.view())?.view());
        if target >= probs.len() {
            return Err(ScanError::InvalidRequest(format!(
                "target class {target} out of range for {} classes",
                probs.len()
            )));
        }

        // d log p_t / dz = e_t - p ; d p_t / dz = p_t (e_t - p)
        let mut upstream: Array1<f32> = -&probs;
        upstream[target] += 1.0;
        if objective == Objective::TargetConfidence {
            upstream *= probs[target];
        }

        let direction = diff.backward(image.view(), upstream.view())?;
        Ok(Signal {
            direction,
            queries: 1,
        })
    }
}

/// Black-box NES estimate over softmax target confidence.
///
/// Probes are clipped into the image's domain before they reach the model.
#[derive(Debug, Clone, Copy, Default)]
pub struct NesSignal {
    pub config: NesConfig,
}

impl NesSignal {
    pub fn new(config: NesConfig) -> Self {
        Self { config }
    }
}

impl DirectionalSignal for NesSignal {
    fn name(&self) -> &'static str {
        "nes"
    }

    fn direction(
        &self,
        model: &dyn Classifier,
        image: &WorkingImage,
        target: usize,
        objective: Objective,
        rng: &mut StdRng,
    ) -> Result<Signal> {
        let classes = model.num_classes();
        if target >= classes {
            return Err(ScanError::InvalidRequest(format!(
                "target class {target} out of range for {classes} classes"
            )));
        }
        let mut one_hot = Array1::zeros(classes);
        one_hot[target] = 1.0;

        let domain = image.domain();
        let mut direction = nes::estimate(
            image.view(),
            one_hot.view(),
            |probe| model.predict(probe.mapv(|v| domain.clamp(v)).view()),
            self.config.samples,
            self.config.sigma,
            rng,
        )?;
        let mut queries = self.config.queries();

        if objective == Objective::CrossEntropy {
            // grad log p = grad p / p
            let p = model.predict(image.view())?[target];
            queries += 1;
            direction /= p.max(f32::MIN_POSITIVE);
        }

        Ok(Signal { direction, queries })
    }
}

/// How a scan obtains its directional signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradientMode {
    /// Analytic when the model supports it, NES otherwise.
    #[default]
    Auto,
    Analytic,
    Estimated,
}

impl GradientMode {
    /// Pick a provider for `model`. `Analytic` on a black-box model is an
    /// invalid request, reported before any inference.
    pub fn select(
        self,
        model: &dyn Classifier,
        nes: NesConfig,
    ) -> Result<Box<dyn DirectionalSignal>> {
        let differentiable = model.as_differentiable().is_some();
        let signal: Box<dyn DirectionalSignal> = match (self, differentiable) {
            (GradientMode::Auto, true) | (GradientMode::Analytic, true) => Box::new(AnalyticGradient),
            (GradientMode::Analytic, false) => {
                return Err(ScanError::InvalidRequest(format!(
                    "analytic gradients requested but the {} model is not differentiable",
                    model.architecture()
                )))
            }
            (GradientMode::Auto, false) | (GradientMode::Estimated, _) => {
                nes.validate()?;
                Box::new(NesSignal::new(nes))
            }
        };
        debug!(mode = %self, signal = signal.name(), "Selected directional signal");
        Ok(signal)
    }
}

impl fmt::Display for GradientMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GradientMode::Auto => "auto",
            GradientMode::Analytic => "analytic",
            GradientMode::Estimated => "estimated",
        })
    }
}

impl FromStr for GradientMode {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(GradientMode::Auto),
            "analytic" => Ok(GradientMode::Analytic),
            "estimated" | "nes" => Ok(GradientMode::Estimated),
            other => Err(ScanError::InvalidRequest(format!(
                "unknown gradient mode '{other}' (expected auto, analytic or estimated)"
            ))),
        }
    }
}
