//! Feed-forward classifier head with an analytic input gradient.
//!
//! The network average-pools the (H, W, 3) input by a fixed factor, flattens
//! it row-major, and runs a stack of dense layers with ReLU between them. The
//! last layer produces logits. Backward is the exact vector-Jacobian product
//! through the same stages.

use crate::{check_input_shape, Classifier, Differentiable};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView3};
use protego_core::{Architecture, Result, ScanError, CHANNELS};
use tracing::debug;

/// One dense layer: `y = W x + b` with `W` shaped (out, in).
#[derive(Debug, Clone, PartialEq)]
pub struct DenseLayer {
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
}

impl DenseLayer {
    pub fn new(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        if weight.nrows() != bias.len() {
            return Err(ScanError::ModelLoad(format!(
                "bias length {} does not match weight rows {}",
                bias.len(),
                weight.nrows()
            )));
        }
        Ok(Self { weight, bias })
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    fn forward(&self, x: &Array1<f32>) -> Array1<f32> {
        self.weight.dot(x) + &self.bias
    }
}

#[derive(Debug, Clone)]
pub struct DenseClassifier {
    architecture: Architecture,
    input_shape: (usize, usize, usize),
    pool: usize,
    layers: Vec<DenseLayer>,
}

impl DenseClassifier {
    /// Build a classifier for an architecture's canonical input geometry.
    pub fn new(architecture: Architecture, pool: usize, layers: Vec<DenseLayer>) -> Result<Self> {
        Self::with_input_shape(architecture, architecture.input_shape(), pool, layers)
    }

    /// Build a classifier for an explicit input geometry.
    pub fn with_input_shape(
        architecture: Architecture,
        input_shape: (usize, usize, usize),
        pool: usize,
        layers: Vec<DenseLayer>,
    ) -> Result<Self> {
        let (h, w, c) = input_shape;
        if c != CHANNELS {
            return Err(ScanError::ModelLoad(format!(
                "expected {CHANNELS} input channels, got {c}"
            )));
        }
        if pool == 0 || h % pool != 0 || w % pool != 0 {
            return Err(ScanError::ModelLoad(format!(
                "pool factor {pool} does not divide input {h}x{w}"
            )));
        }
        let Some(first) = layers.first() else {
            return Err(ScanError::ModelLoad("model has no layers".to_string()));
        };
        let features = (h / pool) * (w / pool) * c;
        if first.in_features() != features {
            return Err(ScanError::ModelLoad(format!(
                "first layer expects {} features but a {}x{}x{} input pooled by {} gives {}",
                first.in_features(),
                h,
                w,
                c,
                pool,
                features
            )));
        }
        for (i, pair) in layers.windows(2).enumerate() {
            if pair[0].out_features() != pair[1].in_features() {
                return Err(ScanError::ModelLoad(format!(
                    "layer {} outputs {} features but layer {} expects {}",
                    i,
                    pair[0].out_features(),
                    i + 1,
                    pair[1].in_features()
                )));
            }
        }

        debug!(
            architecture = %architecture,
            layers = layers.len(),
            pool,
            "Built dense classifier"
        );
        Ok(Self {
            architecture,
            input_shape,
            pool,
            layers,
        })
    }

    pub fn pool(&self) -> usize {
        self.pool
    }

    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    pub fn param_count(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.weight.len() + l.bias.len())
            .sum()
    }

    /// Average-pool and flatten.
    fn features(&self, image: ArrayView3<'_, f32>) -> Array1<f32> {
        let (h, w, c) = self.input_shape;
        let p = self.pool;
        let (ph, pw) = (h / p, w / p);
        let norm = 1.0 / (p * p) as f32;
        let mut out = Array1::zeros(ph * pw * c);
        for y in 0..h {
            for x in 0..w {
                let base = ((y / p) * pw + x / p) * c;
                for ch in 0..c {
                    out[base + ch] += image[[y, x, ch]] * norm;
                }
            }
        }
        out
    }

    /// Forward pass keeping each layer's pre-activation.
    fn forward_trace(&self, image: ArrayView3<'_, f32>) -> (Vec<Array1<f32>>, Array1<f32>) {
        let mut pre_activations = Vec::with_capacity(self.layers.len());
        let mut x = self.features(image);
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(&x);
            x = if i == last {
                z.clone()
            } else {
                z.mapv(|v| v.max(0.0))
            };
            pre_activations.push(z);
        }
        (pre_activations, x)
    }
}

impl Classifier for DenseClassifier {
    fn architecture(&self) -> Architecture {
        self.architecture
    }

    fn num_classes(&self) -> usize {
        self.layers.last().map_or(0, DenseLayer::out_features)
    }

    fn input_shape(&self) -> (usize, usize, usize) {
        self.input_shape
    }

    fn logits(&self, image: ArrayView3<'_, f32>) -> Result<Array1<f32>> {
        check_input_shape(self.input_shape, image)?;
        Ok(self.forward_trace(image).1)
    }

    fn as_differentiable(&self) -> Option<&dyn Differentiable> {
        Some(self)
    }
}

impl Differentiable for DenseClassifier {
    fn backward(
        &self,
        image: ArrayView3<'_, f32>,
        upstream: ArrayView1<'_, f32>,
    ) -> Result<Array3<f32>> {
        check_input_shape(self.input_shape, image)?;
        if upstream.len() != self.num_classes() {
            return Err(ScanError::shape_mismatch(
                &[self.num_classes()],
                &[upstream.len()],
            ));
        }

        let (pre_activations, _) = self.forward_trace(image);
        let last = self.layers.len() - 1;
        let mut grad = upstream.to_owned();
        for (i, layer) in self.layers.iter().enumerate().rev() {
            if i != last {
                grad.zip_mut_with(&pre_activations[i], |g, &z| {
                    if z <= 0.0 {
                        *g = 0.0;
                    }
                });
            }
            grad = layer.weight.t().dot(&grad);
        }

        // Un-pool: each pixel receives an equal share of its cell's gradient.
        let (h, w, c) = self.input_shape;
        let p = self.pool;
        let pw = w / p;
        let norm = 1.0 / (p * p) as f32;
        Ok(Array3::from_shape_fn((h, w, c), |(y, x, ch)| {
            grad[((y / p) * pw + x / p) * c + ch] * norm
        }))
    }
}
