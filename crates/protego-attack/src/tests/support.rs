//! Test doubles shared by the attack tests.

use crate::signal::{DirectionalSignal, Objective, Signal};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView3};
use protego_core::{Architecture, Result, ScanError};
use protego_model::{check_input_shape, Classifier, DenseClassifier, DenseLayer, Differentiable};
use protego_tensor::WorkingImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Returns the same logits for every input and counts every call.
pub struct StubModel {
    architecture: Architecture,
    input_shape: (usize, usize, usize),
    logits: Array1<f32>,
    differentiable: bool,
    fail_after: Option<usize>,
    switch: Option<(usize, usize)>,
    calls: AtomicUsize,
}

impl StubModel {
    /// `classes` outputs with `favored` far ahead of the rest.
    pub fn favoring(
        architecture: Architecture,
        input_shape: (usize, usize, usize),
        classes: usize,
        favored: usize,
    ) -> Self {
        let mut logits = Array1::zeros(classes);
        logits[favored] = 10.0;
        Self {
            architecture,
            input_shape,
            logits,
            differentiable: true,
            fail_after: None,
            switch: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Same model without a gradient path.
    pub fn black_box(mut self) -> Self {
        self.differentiable = false;
        self
    }

    /// Every call after the first `n` fails with an inference error.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// After the first `n` calls, `favored` leads instead.
    pub fn switching_after(mut self, n: usize, favored: usize) -> Self {
        self.switch = Some((n, favored));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Count a call; returns how many came before it.
    fn record_call(&self) -> Result<usize> {
        let previous = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.fail_after {
            Some(n) if previous >= n => Err(ScanError::Inference(format!(
                "stub failure on call {}",
                previous + 1
            ))),
            _ => Ok(previous),
        }
    }
}

impl Classifier for StubModel {
    fn architecture(&self) -> Architecture {
        self.architecture
    }

    fn num_classes(&self) -> usize {
        self.logits.len()
    }

    fn input_shape(&self) -> (usize, usize, usize) {
        self.input_shape
    }

    fn logits(&self, image: ArrayView3<'_, f32>) -> Result<Array1<f32>> {
        let previous = self.record_call()?;
        check_input_shape(self.input_shape, image)?;
        match self.switch {
            Some((n, favored)) if previous >= n => {
                let mut logits = Array1::zeros(self.logits.len());
                logits[favored] = 10.0;
                Ok(logits)
            }
            _ => Ok(self.logits.clone()),
        }
    }

    fn as_differentiable(&self) -> Option<&dyn Differentiable> {
        if self.differentiable {
            Some(self)
        } else {
            None
        }
    }
}

impl Differentiable for StubModel {
    fn backward(
        &self,
        image: ArrayView3<'_, f32>,
        _upstream: ArrayView1<'_, f32>,
    ) -> Result<Array3<f32>> {
        self.record_call()?;
        check_input_shape(self.input_shape, image)?;
        Ok(Array3::zeros(self.input_shape))
    }
}

/// Returns `values[k]` everywhere on its k-th call (the last value once exhausted).
pub struct ScriptedSignal {
    values: Vec<f32>,
    calls: AtomicUsize,
}

impl ScriptedSignal {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            calls: AtomicUsize::new(0),
        }
    }
}

impl DirectionalSignal for ScriptedSignal {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn direction(
        &self,
        _model: &dyn Classifier,
        image: &WorkingImage,
        _target: usize,
        objective: Objective,
        _rng: &mut StdRng,
    ) -> Result<Signal> {
        assert_eq!(objective, Objective::TargetConfidence);
        let k = self.calls.fetch_add(1, Ordering::SeqCst);
        let value = self.values[k.min(self.values.len() - 1)];
        Ok(Signal {
            direction: Array3::from_elem(image.shape(), value),
            queries: 0,
        })
    }
}

/// Small random two-layer classifier with a non-trivial gradient.
pub fn dense_model(
    architecture: Architecture,
    input_shape: (usize, usize, usize),
    classes: usize,
    seed: u64,
) -> DenseClassifier {
    let mut rng = StdRng::seed_from_u64(seed);
    let features = input_shape.0 * input_shape.1 * input_shape.2;
    let hidden = 8;
    // Inputs in the byte domain would saturate the logits; scale weights down.
    let scale = 1.0 / architecture.domain().width().max(1.0);
    let mut random = |rows: usize, cols: usize, s: f32| {
        Array2::from_shape_simple_fn((rows, cols), || rng.random_range(-1.0_f32..1.0) * s)
    };
    let l1 = DenseLayer::new(random(hidden, features, scale), Array1::from_elem(hidden, 0.1))
        .expect("valid layer");
    let l2 = DenseLayer::new(random(classes, hidden, 1.0), Array1::zeros(classes))
        .expect("valid layer");
    DenseClassifier::with_input_shape(architecture, input_shape, 1, vec![l1, l2])
        .expect("valid model")
}

pub fn cosine(a: &Array3<f32>, b: &Array3<f32>) -> f32 {
    let dot = (a * b).sum();
    let na = a.mapv(|v| v * v).sum().sqrt();
    let nb = b.mapv(|v| v * v).sum().sqrt();
    dot / (na * nb)
}

/// Single dense layer: smooth (softmax of affine) class scores.
pub fn linear_model(
    architecture: Architecture,
    input_shape: (usize, usize, usize),
    classes: usize,
    seed: u64,
) -> DenseClassifier {
    let mut rng = StdRng::seed_from_u64(seed);
    let features = input_shape.0 * input_shape.1 * input_shape.2;
    let scale = 1.0 / architecture.domain().width().max(1.0);
    let weight = Array2::from_shape_simple_fn((classes, features), || {
        rng.random_range(-1.0_f32..1.0) * scale
    });
    let layer = DenseLayer::new(weight, Array1::zeros(classes)).expect("valid layer");
    DenseClassifier::with_input_shape(architecture, input_shape, 1, vec![layer]).expect("valid model")
}
