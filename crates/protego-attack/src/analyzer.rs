//! Result analysis: terminal tensor to transportable 8-bit image, re-scored.

use ndarray::{Array1, Array3, ArrayD};
use protego_core::{Domain, Result, ScanError};
use protego_model::{argmax, Classifier, Preprocessor};
use protego_tensor::{quantize_u8, WorkingImage};
use tracing::debug;

/// A re-scored quantized image.
#[derive(Debug, Clone, PartialEq)]
pub struct Rescored {
    pub pixels: Array3<u8>,
    pub scores: Array1<f32>,
    pub predicted_class: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub adversarial: Rescored,
    pub target_class: usize,
    pub target_confidence: f32,
    pub baseline: Option<Rescored>,
    pub model_queries: usize,
}

impl Analysis {
    pub fn succeeded(&self) -> bool {
        self.adversarial.predicted_class == self.target_class
    }
}

/// Quantizes and re-scores images through the model's own preprocessing.
pub struct Analyzer<'a> {
    model: &'a dyn Classifier,
    preprocessor: Preprocessor,
}

impl<'a> Analyzer<'a> {
    pub fn new(model: &'a dyn Classifier) -> Self {
        Self {
            model,
            preprocessor: Preprocessor::for_model(model),
        }
    }

    pub fn domain(&self) -> Domain {
        self.preprocessor.domain()
    }

    /// Analyze a final tensor, (H, W, 3) or a batch of one, and optionally the seed.
    pub fn analyze(
        &self,
        final_tensor: ArrayD<f32>,
        target_class: usize,
        original: Option<ArrayD<f32>>,
    ) -> Result<Analysis> {
        let domain = self.domain();
        let adversarial = self.rescore(&WorkingImage::from_batched(final_tensor, domain)?)?;
        let mut model_queries = 1;

        let baseline = match original {
            Some(seed) => {
                model_queries += 1;
                Some(self.rescore(&WorkingImage::from_batched(seed, domain)?)?)
            }
            None => None,
        };

        let target_confidence = adversarial.scores.get(target_class).copied().unwrap_or(0.0);
        debug!(
            target_class,
            predicted = adversarial.predicted_class,
            target_confidence,
            baseline = ?baseline.as_ref().map(|b| b.predicted_class),
            "Analyzed attack result"
        );

        Ok(Analysis {
            adversarial,
            target_class,
            target_confidence,
            baseline,
            model_queries,
        })
    }

    /// Quantize, map back through preprocessing, predict.
    ///
    /// The image must already have the model's input shape; it is never resampled.
    pub fn rescore(&self, image: &WorkingImage) -> Result<Rescored> {
        let expected = self.model.input_shape();
        let got = image.shape();
        if got != expected {
            return Err(ScanError::shape_mismatch(
                &[expected.0, expected.1, expected.2],
                &[got.0, got.1, got.2],
            ));
        }
        let pixels = quantize_u8(image.view(), image.domain());
        let restored = self.preprocessor.preprocess(pixels.view())?;
        let scores = self.model.predict(restored.view())?;
        let predicted_class = argmax(scores.view());
        Ok(Rescored {
            pixels,
            scores,
            predicted_class,
        })
    }
}
