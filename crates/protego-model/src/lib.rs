//! Model adapter for Protego.
//!
//! Exposes one uniform capability over the supported classifier families:
//! `predict(image) -> class scores`. Models that can also differentiate their
//! logits with respect to the input implement [`Differentiable`]; attacks that
//! need a gradient fall back to black-box estimation when a model does not.
//!
//! ```ignore
//! use protego_model::{load_model, Classifier};
//!
//! let model = load_model("resnet.safetensors", Architecture::ResNet)?;
//! let scores = model.predict(image.view())?;
//! ```

pub mod dense;
pub mod loader;
pub mod preprocess;

mod source;

pub use dense::{DenseClassifier, DenseLayer};
pub use loader::{load_model, load_model_from_bytes, save_model, serialize_model};
pub use preprocess::{pixels_from_nested, pixels_to_nested, Preprocessor};

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView3, ArrayView4, Axis};
use protego_core::{Architecture, Result, ScanError};
use std::sync::Arc;

/// A loaded classifier. Inference takes `&self`; implementations must not keep
/// mutable per-call state so a handle can be shared across concurrent scans.
pub trait Classifier: Send + Sync {
    fn architecture(&self) -> Architecture;

    /// Output cardinality.
    fn num_classes(&self) -> usize;

    /// Expected (height, width, channels).
    fn input_shape(&self) -> (usize, usize, usize) {
        self.architecture().input_shape()
    }

    /// Raw, unnormalized class scores.
    fn logits(&self, image: ArrayView3<'_, f32>) -> Result<Array1<f32>>;

    /// Softmax class distribution.
    fn predict(&self, image: ArrayView3<'_, f32>) -> Result<Array1<f32>> {
        Ok(softmax(self.logits(image)?.view()))
    }

    /// Batched prediction over (N, H, W, C).
    fn predict_batch(&self, images: ArrayView4<'_, f32>) -> Result<Array2<f32>> {
        let n = images.len_of(Axis(0));
        let mut out = Array2::zeros((n, self.num_classes()));
        for (i, image) in images.axis_iter(Axis(0)).enumerate() {
            let scores = self.predict(image)?;
            if scores.len() != self.num_classes() {
                return Err(ScanError::shape_mismatch(&[self.num_classes()], &[scores.len()]));
            }
            out.row_mut(i).assign(&scores);
        }
        Ok(out)
    }

    /// Analytic-gradient view of this model, if it has one.
    fn as_differentiable(&self) -> Option<&dyn Differentiable> {
        None
    }
}

/// Classifiers that can back-propagate to their input.
pub trait Differentiable: Classifier {
    /// Vector-Jacobian product: gradient of `upstream · logits(image)` with
    /// respect to `image`.
    fn backward(
        &self,
        image: ArrayView3<'_, f32>,
        upstream: ArrayView1<'_, f32>,
    ) -> Result<Array3<f32>>;
}

/// Shared, read-only model handle.
pub type ModelHandle = Arc<dyn Classifier>;

/// Numerically stable softmax.
pub fn softmax(logits: ArrayView1<'_, f32>) -> Array1<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp = logits.mapv(|z| (z - max).exp());
    let sum = exp.sum();
    exp / sum
}

/// Index of the largest score (first on ties, NaN never wins).
pub fn argmax(scores: ArrayView1<'_, f32>) -> usize {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (i, &v) in scores.iter().enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}

/// Check an input against a model's expected geometry.
pub fn check_input_shape(expected: (usize, usize, usize), image: ArrayView3<'_, f32>) -> Result<()> {
    if image.dim() != expected {
        return Err(ScanError::shape_mismatch(
            &[expected.0, expected.1, expected.2],
            image.shape(),
        ));
    }
    Ok(())
}
