//! SafeTensors serialization for [`DenseClassifier`].
//!
//! A model file holds `layers.{i}.weight` (out, in) and `layers.{i}.bias`
//! (out) as little-endian F32 tensors, numbered from zero without gaps. The
//! header metadata records the architecture label and the pooling factor:
//!
//! ```text
//! { "architecture": "ResNet", "pool": "16" }
//! ```
//!
//! Gzip-compressed files and byte buffers are recognized by their magic bytes
//! and inflated first. When `pool` is absent it is recovered from the first
//! layer's width.

use crate::dense::{DenseClassifier, DenseLayer};
use crate::source::{inflate, read_model_source};
use crate::Classifier;
use ndarray::{Array1, Array2};
use protego_core::{Architecture, Result, ScanError, CHANNELS};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

const META_ARCHITECTURE: &str = "architecture";
const META_POOL: &str = "pool";

fn weight_name(i: usize) -> String {
    format!("layers.{i}.weight")
}

fn bias_name(i: usize) -> String {
    format!("layers.{i}.bias")
}

/// Load a classifier for `architecture` from a `.safetensors` (or `.safetensors.gz`) file.
pub fn load_model<P: AsRef<Path>>(path: P, architecture: Architecture) -> Result<DenseClassifier> {
    let path = path.as_ref();
    let bytes = read_model_source(path)?;
    let model = parse_model(&bytes, architecture)?;
    info!(
        path = %path.display(),
        architecture = %architecture,
        classes = model.num_classes(),
        params = model.param_count(),
        "Loaded model"
    );
    Ok(model)
}

/// Parse a classifier from in-memory SafeTensors bytes, plain or gzip-compressed.
pub fn load_model_from_bytes(bytes: &[u8], architecture: Architecture) -> Result<DenseClassifier> {
    let bytes = inflate(bytes, "in-memory model")?;
    parse_model(&bytes, architecture)
}

fn parse_model(bytes: &[u8], architecture: Architecture) -> Result<DenseClassifier> {
    let (_, header) = SafeTensors::read_metadata(bytes)
        .map_err(|e| ScanError::ModelLoad(format!("Invalid safetensors header: {e}")))?;
    let metadata = header.metadata().clone().unwrap_or_default();

    if let Some(label) = metadata.get(META_ARCHITECTURE) {
        let stored: Architecture = label
            .parse()
            .map_err(|_| ScanError::ModelLoad(format!("Unknown architecture in model file: {label}")))?;
        if stored != architecture {
            return Err(ScanError::ModelLoad(format!(
                "Model was saved for {stored} but {architecture} was requested"
            )));
        }
    }

    let tensors = SafeTensors::deserialize(bytes)
        .map_err(|e| ScanError::ModelLoad(format!("Invalid safetensors file: {e}")))?;

    let mut layers = Vec::new();
    loop {
        let i = layers.len();
        let Ok(weight) = tensors.tensor(&weight_name(i)) else {
            break;
        };
        let weight = read_matrix(&weight_name(i), &weight)?;
        let bias = tensors
            .tensor(&bias_name(i))
            .map_err(|_| ScanError::ModelLoad(format!("Missing tensor {}", bias_name(i))))?;
        let bias = read_vector(&bias_name(i), &bias)?;
        layers.push(DenseLayer::new(weight, bias)?);
    }
    if layers.is_empty() {
        return Err(ScanError::ModelLoad(format!(
            "No '{}' tensor found",
            weight_name(0)
        )));
    }

    let pool = match metadata.get(META_POOL) {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|e| ScanError::ModelLoad(format!("Invalid pool metadata '{raw}': {e}")))?,
        None => infer_pool(architecture, layers[0].in_features())?,
    };
    debug!(layers = layers.len(), pool, "Parsed dense layers");

    DenseClassifier::new(architecture, pool, layers)
}

/// Serialize a classifier to SafeTensors bytes.
pub fn serialize_model(model: &DenseClassifier) -> Result<Vec<u8>> {
    let buffers: Vec<(String, Vec<usize>, Vec<u8>)> = model
        .layers()
        .iter()
        .enumerate()
        .flat_map(|(i, layer)| {
            [
                (
                    weight_name(i),
                    layer.weight.shape().to_vec(),
                    f32_bytes(layer.weight.iter()),
                ),
                (
                    bias_name(i),
                    layer.bias.shape().to_vec(),
                    f32_bytes(layer.bias.iter()),
                ),
            ]
        })
        .collect();

    let mut views = Vec::with_capacity(buffers.len());
    for (name, shape, data) in &buffers {
        let view = TensorView::new(Dtype::F32, shape.clone(), data)
            .map_err(|e| ScanError::ModelLoad(format!("Failed to build tensor {name}: {e}")))?;
        views.push((name.clone(), view));
    }

    let metadata: HashMap<String, String> = [
        (
            META_ARCHITECTURE.to_string(),
            model.architecture().label().to_string(),
        ),
        (META_POOL.to_string(), model.pool().to_string()),
    ]
    .into_iter()
    .collect();

    safetensors::serialize(views, &Some(metadata))
        .map_err(|e| ScanError::ModelLoad(format!("Failed to serialize model: {e}")))
}

/// Write a classifier to `path`.
pub fn save_model<P: AsRef<Path>>(model: &DenseClassifier, path: P) -> Result<()> {
    let bytes = serialize_model(model)?;
    std::fs::write(path.as_ref(), bytes)
        .map_err(|e| ScanError::ModelLoad(format!("Failed to write model: {e}")))
}

fn f32_bytes<'a>(values: impl Iterator<Item = &'a f32>) -> Vec<u8> {
    values.flat_map(|v| v.to_le_bytes()).collect()
}

fn read_f32(name: &str, view: &TensorView<'_>) -> Result<Vec<f32>> {
    if view.dtype() != Dtype::F32 {
        return Err(ScanError::ModelLoad(format!(
            "Tensor {name} has dtype {:?}, expected F32",
            view.dtype()
        )));
    }
    Ok(view
        .data()
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn read_matrix(name: &str, view: &TensorView<'_>) -> Result<Array2<f32>> {
    let shape = view.shape();
    if shape.len() != 2 {
        return Err(ScanError::ModelLoad(format!(
            "Tensor {name} must be 2-D, got shape {shape:?}"
        )));
    }
    Array2::from_shape_vec((shape[0], shape[1]), read_f32(name, view)?)
        .map_err(|e| ScanError::ModelLoad(format!("Tensor {name}: {e}")))
}

fn read_vector(name: &str, view: &TensorView<'_>) -> Result<Array1<f32>> {
    if view.shape().len() != 1 {
        return Err(ScanError::ModelLoad(format!(
            "Tensor {name} must be 1-D, got shape {:?}",
            view.shape()
        )));
    }
    Ok(Array1::from(read_f32(name, view)?))
}

/// Smallest pool factor whose pooled input matches `features`.
fn infer_pool(architecture: Architecture, features: usize) -> Result<usize> {
    let (h, w, _) = architecture.input_shape();
    (1..=h.min(w))
        .find(|&p| h % p == 0 && w % p == 0 && (h / p) * (w / p) * CHANNELS == features)
        .ok_or_else(|| {
            ScanError::ModelLoad(format!(
                "Cannot infer pooling: {features} input features do not fit a {h}x{w}x{CHANNELS} image"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression};
    use ndarray::Array;
    use protego_core::ErrorKind;
    use std::io::Write;

    /// MobileNet input (128x128) pooled by 32 gives 4*4*3 = 48 features.
    fn sample_model() -> DenseClassifier {
        let l1 = DenseLayer::new(
            Array::from_shape_fn((8, 48), |(o, i)| ((o * 48 + i) % 7) as f32 * 0.01 - 0.03),
            Array::from_shape_fn(8, |o| o as f32 * 0.1),
        )
        .unwrap();
        let l2 = DenseLayer::new(
            Array::from_shape_fn((5, 8), |(o, i)| (o as f32 - i as f32) * 0.05),
            Array1::zeros(5),
        )
        .unwrap();
        DenseClassifier::new(Architecture::MobileNet, 32, vec![l1, l2]).unwrap()
    }

    #[test]
    fn test_save_and_load_preserves_weights() {
        let model = sample_model();
        let file = tempfile::Builder::new()
            .suffix(".safetensors")
            .tempfile()
            .unwrap();
        save_model(&model, file.path()).unwrap();

        let loaded = load_model(file.path(), Architecture::MobileNet).unwrap();
        assert_eq!(loaded.pool(), 32);
        assert_eq!(loaded.num_classes(), 5);
        assert_eq!(loaded.layers(), model.layers());
    }

    #[test]
    fn test_load_gzip_model() {
        let bytes = serialize_model(&sample_model()).unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&bytes).unwrap();
        let packed = encoder.finish().unwrap();

        let mut file = tempfile::Builder::new()
            .suffix(".safetensors.gz")
            .tempfile()
            .unwrap();
        file.write_all(&packed).unwrap();
        file.flush().unwrap();
        let loaded = load_model(file.path(), Architecture::MobileNet).unwrap();
        assert_eq!(loaded.layers().len(), 2);

        let loaded = load_model_from_bytes(&packed, Architecture::MobileNet).unwrap();
        assert_eq!(loaded.layers(), sample_model().layers());
    }

    #[test]
    fn test_architecture_mismatch_is_rejected() {
        let bytes = serialize_model(&sample_model()).unwrap();
        let err = load_model_from_bytes(&bytes, Architecture::ResNet).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelLoad);
        assert!(err.to_string().contains("saved for MobileNet"), "{err}");
    }

    #[test]
    fn test_corrupt_bytes_are_model_load_errors() {
        let err = load_model_from_bytes(b"definitely not safetensors", Architecture::ResNet)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelLoad);

        let err = load_model("/nonexistent/model.safetensors", Architecture::ResNet).unwrap_err();
        assert!(err.to_string().contains("File not found"), "{err}");
    }

    /// One zero layer with `features` inputs and no metadata.
    fn unlabelled_model_bytes(features: usize) -> Vec<u8> {
        let weight_bytes = f32_bytes(Array2::<f32>::zeros((2, features)).iter());
        let bias_bytes = f32_bytes(Array1::<f32>::zeros(2).iter());
        let views = vec![
            (
                weight_name(0),
                TensorView::new(Dtype::F32, vec![2, features], &weight_bytes).unwrap(),
            ),
            (
                bias_name(0),
                TensorView::new(Dtype::F32, vec![2], &bias_bytes).unwrap(),
            ),
        ];
        safetensors::serialize(views, &None).unwrap()
    }

    #[test]
    fn test_pool_is_inferred_without_metadata() {
        // 4x4x3 after pooling: 128/32, 224/56 and 256/64.
        let bytes = unlabelled_model_bytes(48);
        let pools = [
            (Architecture::MobileNet, 32),
            (Architecture::EfficientNet, 56),
            (Architecture::ResNet, 64),
        ];
        for (arch, pool) in pools {
            let model = load_model_from_bytes(&bytes, arch).unwrap();
            assert_eq!(model.pool(), pool, "{arch}");
        }
    }

    #[test]
    fn test_unfittable_feature_count_is_rejected() {
        // 50 is not 3 * k^2 for any k.
        let bytes = unlabelled_model_bytes(50);
        for arch in Architecture::ALL {
            let err = load_model_from_bytes(&bytes, arch).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ModelLoad, "{arch}");
            assert!(err.to_string().contains("Cannot infer pooling"), "{err}");
        }
    }

    #[test]
    fn test_non_f32_tensor_is_rejected() {
        let data = vec![0_u8; 2 * 48];
        let bias = vec![0_u8; 2];
        let views = vec![
            (
                weight_name(0),
                TensorView::new(Dtype::U8, vec![2, 48], &data).unwrap(),
            ),
            (
                bias_name(0),
                TensorView::new(Dtype::U8, vec![2], &bias).unwrap(),
            ),
        ];
        let bytes = safetensors::serialize(views, &None).unwrap();
        let err = load_model_from_bytes(&bytes, Architecture::MobileNet).unwrap_err();
        assert!(err.to_string().contains("expected F32"), "{err}");
    }
}
