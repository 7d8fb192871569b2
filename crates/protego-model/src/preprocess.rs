//! Per-architecture input preprocessing.
//!
//! Raw 8-bit pixels are mapped into the architecture's value domain and
//! resized to its resolution. The value mapping is `dequantize`, the exact
//! counterpart of the analyzer's `quantize_u8`, so re-scoring a quantized
//! adversarial image sees the same tensor the model was attacked with, up to
//! truncation.

use crate::Classifier;
use ndarray::{Array3, ArrayView3};
use protego_core::{Architecture, Domain, Result, ScanError, CHANNELS};
use protego_tensor::{dequantize, resize_bilinear, WorkingImage};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preprocessor {
    height: usize,
    width: usize,
    domain: Domain,
}

impl Preprocessor {
    pub fn for_architecture(architecture: Architecture) -> Self {
        let (height, width, _) = architecture.input_shape();
        Self {
            height,
            width,
            domain: architecture.domain(),
        }
    }

    /// Match a loaded model's geometry, which may differ from the canonical one.
    pub fn for_model(model: &dyn Classifier) -> Self {
        let (height, width, _) = model.input_shape();
        Self {
            height,
            width,
            domain: model.architecture().domain(),
        }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn resolution(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// 8-bit (H, W, 3) pixels to a working image in the model's domain.
    pub fn preprocess(&self, raw: ArrayView3<'_, u8>) -> Result<WorkingImage> {
        check_channels(raw.shape())?;
        let mapped = dequantize(raw, self.domain);
        self.preprocess_f32(mapped.view())
    }

    /// Domain-valued (H, W, 3) input: resize and clip only.
    pub fn preprocess_f32(&self, image: ArrayView3<'_, f32>) -> Result<WorkingImage> {
        check_channels(image.shape())?;
        trace!(
            from = ?image.dim(),
            to = ?(self.height, self.width),
            "Preprocessing image"
        );
        let resized = resize_bilinear(image, self.height, self.width);
        Ok(WorkingImage::new(resized, self.domain)?.clipped())
    }
}

fn check_channels(shape: &[usize]) -> Result<()> {
    if shape[2] != CHANNELS || shape[0] == 0 || shape[1] == 0 {
        return Err(ScanError::shape_mismatch(
            &[shape[0].max(1), shape[1].max(1), CHANNELS],
            shape,
        ));
    }
    Ok(())
}

/// Nested `[row][column][channel]` pixels to an array. Ragged input is rejected.
pub fn pixels_from_nested(pixels: &[Vec<Vec<u8>>]) -> Result<Array3<u8>> {
    let height = pixels.len();
    let width = pixels.first().map_or(0, Vec::len);
    let channels = pixels
        .first()
        .and_then(|row| row.first())
        .map_or(0, Vec::len);

    let mut flat = Vec::with_capacity(height * width * channels);
    for (y, row) in pixels.iter().enumerate() {
        if row.len() != width {
            return Err(ScanError::InvalidRequest(format!(
                "image row {y} has {} columns, expected {width}",
                row.len()
            )));
        }
        for (x, px) in row.iter().enumerate() {
            if px.len() != channels {
                return Err(ScanError::InvalidRequest(format!(
                    "pixel ({y}, {x}) has {} channels, expected {channels}",
                    px.len()
                )));
            }
            flat.extend_from_slice(px);
        }
    }

    Array3::from_shape_vec((height, width, channels), flat)
        .map_err(|e| ScanError::InvalidRequest(format!("Invalid image: {e}")))
}

/// Array to nested `[row][column][channel]` pixels.
pub fn pixels_to_nested(pixels: ArrayView3<'_, u8>) -> Vec<Vec<Vec<u8>>> {
    pixels
        .outer_iter()
        .map(|row| row.outer_iter().map(|px| px.to_vec()).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr3;
    use protego_tensor::quantize_u8;

    #[test]
    fn test_domain_transforms_per_architecture() {
        let raw = arr3(&[[[0_u8, 255, 51]]]);

        let resnet = Preprocessor {
            height: 1,
            width: 1,
            domain: Architecture::ResNet.domain(),
        };
        let img = resnet.preprocess(raw.view()).unwrap();
        assert!((img.data()[[0, 0, 2]] - 0.2).abs() < 1e-6);

        let mobilenet = Preprocessor {
            domain: Architecture::MobileNet.domain(),
            ..resnet
        };
        let img = mobilenet.preprocess(raw.view()).unwrap();
        assert_eq!(img.data()[[0, 0, 0]], -1.0);
        assert_eq!(img.data()[[0, 0, 1]], 1.0);

        let efficientnet = Preprocessor {
            domain: Architecture::EfficientNet.domain(),
            ..resnet
        };
        let img = efficientnet.preprocess(raw.view()).unwrap();
        assert_eq!(img.data()[[0, 0, 2]], 51.0);
    }

    #[test]
    fn test_resizes_to_architecture_resolution() {
        let raw = Array3::from_elem((10, 20, 3), 128_u8);
        let pre = Preprocessor::for_architecture(Architecture::MobileNet);
        let img = pre.preprocess(raw.view()).unwrap();
        assert_eq!(img.shape(), (128, 128, 3));
        assert!(img.is_within_domain());
    }

    #[test]
    fn test_quantize_after_preprocess_recovers_pixels() {
        let raw = Array3::from_shape_fn((4, 4, 3), |(y, x, c)| (y * 60 + x * 15 + c) as u8);
        for domain in [Domain::UNIT, Domain::SIGNED, Domain::BYTE] {
            let pre = Preprocessor {
                height: 4,
                width: 4,
                domain,
            };
            let img = pre.preprocess(raw.view()).unwrap();
            assert_eq!(quantize_u8(img.view(), domain), raw, "{domain}");
        }
    }

    #[test]
    fn test_wrong_channel_count_is_rejected() {
        let pre = Preprocessor::for_architecture(Architecture::ResNet);
        let raw = Array3::<u8>::zeros((4, 4, 1));
        assert!(pre.preprocess(raw.view()).is_err());
    }

    #[test]
    fn test_nested_pixels() {
        let nested = vec![vec![vec![1_u8, 2, 3], vec![4, 5, 6]]];
        let arr = pixels_from_nested(&nested).unwrap();
        assert_eq!(arr.dim(), (1, 2, 3));
        assert_eq!(pixels_to_nested(arr.view()), nested);

        let ragged = vec![vec![vec![1_u8, 2, 3]], vec![]];
        let err = pixels_from_nested(&ragged).unwrap_err();
        assert_eq!(err.kind(), protego_core::ErrorKind::InvalidRequest);
    }
}
