//! NES gradient estimation.
//!
//! Antithetic Gaussian sampling: for each of `samples` draws `u ~ N(0, I)`,
//! score the target class at `x + sigma*u` and `x - sigma*u` and accumulate
//! `u * (s+ - s-) / (2*sigma)`. The mean over draws estimates the gradient of
//! the target score. Its variance falls as `1/samples`.
//!
//! Each draw costs two scorer calls, regardless of image size.

use ndarray::{Array1, Array3, ArrayView1, ArrayView3, Zip};
use protego_core::{Result, ScanError};
use protego_tensor::gaussian_noise;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// NES sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NesConfig {
    /// Antithetic pairs per estimate.
    pub samples: usize,
    /// Std of the probing noise.
    pub sigma: f32,
}

impl Default for NesConfig {
    fn default() -> Self {
        Self {
            samples: 50,
            sigma: 0.3,
        }
    }
}

impl NesConfig {
    /// Fewer, tighter probes.
    pub fn fast() -> Self {
        Self {
            samples: 10,
            sigma: 0.1,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.samples == 0 {
            return Err(ScanError::InvalidRequest(
                "NES needs at least one sample".to_string(),
            ));
        }
        if !(self.sigma > 0.0 && self.sigma.is_finite()) {
            return Err(ScanError::InvalidRequest(format!(
                "NES sigma must be positive, got {}",
                self.sigma
            )));
        }
        Ok(())
    }

    /// Scorer calls one estimate makes.
    pub fn queries(&self) -> usize {
        2 * self.samples
    }
}

/// Estimate the gradient of `target_one_hot · score_fn(x)` at `image`.
///
/// `score_fn` returns a class-score vector (typically softmax confidences).
/// Probes are passed as-is; callers that need them inside a value domain
/// clip inside `score_fn`.
pub fn estimate<F, R>(
    image: ArrayView3<'_, f32>,
    target_one_hot: ArrayView1<'_, f32>,
    mut score_fn: F,
    samples: usize,
    sigma: f32,
    rng: &mut R,
) -> Result<Array3<f32>>
where
    F: FnMut(ArrayView3<'_, f32>) -> Result<Array1<f32>>,
    R: Rng + ?Sized,
{
    NesConfig { samples, sigma }.validate()?;

    let mut target_score = |probe: &Array3<f32>| -> Result<f32> {
        let scores = score_fn(probe.view())?;
        if scores.len() != target_one_hot.len() {
            return Err(ScanError::shape_mismatch(
                &[target_one_hot.len()],
                &[scores.len()],
            ));
        }
        Ok(scores.dot(&target_one_hot))
    };

    let mut grad = Array3::<f32>::zeros(image.raw_dim());
    let mut plus = Array3::<f32>::zeros(image.raw_dim());
    let mut minus = Array3::<f32>::zeros(image.raw_dim());

    for _ in 0..samples {
        let noise = gaussian_noise(image.dim(), 1.0, rng);
        Zip::from(&mut plus)
            .and(&mut minus)
            .and(&image)
            .and(&noise)
            .for_each(|p, m, &x, &u| {
                *p = x + sigma * u;
                *m = x - sigma * u;
            });

        let diff = target_score(&plus)? - target_score(&minus)?;
        grad.scaled_add(diff / (2.0 * sigma), &noise);
    }

    grad /= samples as f32;
    trace!(samples, sigma, "NES estimate complete");
    Ok(grad)
}
