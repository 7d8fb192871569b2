//! Core types for the Protego adversarial-robustness scanner.
//!
//! This crate holds the vocabulary shared by every other crate: the supported
//! classifier families, the two attack families, value domains, the scan
//! request/result payloads that cross the engine boundary, the error taxonomy
//! and the static mitigation catalog.

pub mod mitigation;

pub use mitigation::{mitigations_for, MitigationCatalog, CATALOG_VERSION};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of colour channels in every working image.
pub const CHANNELS: usize = 3;

// =============================================================================
// Architecture and attack family
// =============================================================================

/// Supported classifier families.
///
/// The architecture fixes the input resolution, the value domain the model
/// consumes and the preprocessing used to get there from 8-bit pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "ResNet", alias = "resnet")]
    ResNet,
    #[serde(rename = "MobileNet", alias = "mobilenet")]
    MobileNet,
    #[serde(rename = "EfficientNetB0", alias = "EfficientNet", alias = "efficientnet")]
    EfficientNet,
}

impl Architecture {
    pub const ALL: [Architecture; 3] = [
        Architecture::ResNet,
        Architecture::MobileNet,
        Architecture::EfficientNet,
    ];

    /// Human-readable label used in results and reports.
    pub fn label(&self) -> &'static str {
        match self {
            Architecture::ResNet => "ResNet",
            Architecture::MobileNet => "MobileNet",
            Architecture::EfficientNet => "EfficientNetB0",
        }
    }

    /// Input geometry as (height, width, channels).
    pub fn input_shape(&self) -> (usize, usize, usize) {
        match self {
            Architecture::ResNet => (256, 256, CHANNELS),
            Architecture::MobileNet => (128, 128, CHANNELS),
            Architecture::EfficientNet => (224, 224, CHANNELS),
        }
    }

    /// Value domain the model consumes and every working image must stay in.
    pub fn domain(&self) -> Domain {
        match self {
            Architecture::ResNet => Domain::UNIT,
            Architecture::MobileNet => Domain::SIGNED,
            Architecture::EfficientNet => Domain::BYTE,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Architecture {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "resnet" | "a" => Ok(Architecture::ResNet),
            "mobilenet" | "b" => Ok(Architecture::MobileNet),
            "efficientnet" | "efficientnetb0" | "c" => Ok(Architecture::EfficientNet),
            other => Err(ScanError::InvalidRequest(format!(
                "unknown architecture '{other}' (expected resnet, mobilenet or efficientnet)"
            ))),
        }
    }
}

/// The two families of attack strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttackFamily {
    /// Gradient-informed: steers the image along a (true or estimated) loss gradient.
    #[serde(rename = "score", alias = "Score-Based")]
    ScoreBased,
    /// Query-driven: random-walk candidates accepted only when the oracle says "target".
    #[serde(rename = "boundary", alias = "Boundary-Based")]
    BoundaryBased,
}

impl AttackFamily {
    pub const ALL: [AttackFamily; 2] = [AttackFamily::ScoreBased, AttackFamily::BoundaryBased];

    pub fn label(&self) -> &'static str {
        match self {
            AttackFamily::ScoreBased => "Score-Based",
            AttackFamily::BoundaryBased => "Boundary-Based",
        }
    }
}

impl fmt::Display for AttackFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AttackFamily {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "score" | "score-based" | "score_based" => Ok(AttackFamily::ScoreBased),
            "boundary" | "boundary-based" | "boundary_based" => Ok(AttackFamily::BoundaryBased),
            other => Err(ScanError::InvalidRequest(format!(
                "unknown attack family '{other}' (expected score or boundary)"
            ))),
        }
    }
}

// =============================================================================
// Value domains
// =============================================================================

/// A closed value range [lower, upper] for working-image elements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub lower: f32,
    pub upper: f32,
}

impl Domain {
    /// Normalized pixels.
    pub const UNIT: Domain = Domain {
        lower: 0.0,
        upper: 1.0,
    };
    /// Raw 8-bit range.
    pub const BYTE: Domain = Domain {
        lower: 0.0,
        upper: 255.0,
    };
    /// Zero-centred range used by MobileNet-style preprocessing.
    pub const SIGNED: Domain = Domain {
        lower: -1.0,
        upper: 1.0,
    };

    #[inline]
    pub fn new(lower: f32, upper: f32) -> Self {
        debug_assert!(lower < upper, "Invalid domain: {lower} >= {upper}");
        Self { lower, upper }
    }

    #[inline]
    pub fn contains(&self, value: f32) -> bool {
        self.lower <= value && value <= self.upper
    }

    #[inline]
    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.lower, self.upper)
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.upper - self.lower
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

// =============================================================================
// Request / result payloads
// =============================================================================

/// Inbound scan request.
///
/// `target_class` is signed so that a malformed payload (e.g. `-1`) reaches
/// validation instead of failing at deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub architecture: Architecture,
    pub attack_family: AttackFamily,
    #[serde(default)]
    pub target_class: i64,
    /// Resolved model location (a local path; resolution of URLs is the caller's job).
    pub model_ref: String,
}

impl ScanRequest {
    pub fn new(
        architecture: Architecture,
        attack_family: AttackFamily,
        target_class: i64,
        model_ref: impl Into<String>,
    ) -> Self {
        Self {
            architecture,
            attack_family,
            target_class,
            model_ref: model_ref.into(),
        }
    }

    /// Check the target class against the loaded model's output cardinality.
    ///
    /// Must run after the model is loaded and before any inference.
    pub fn validate_target(&self, num_classes: usize) -> Result<usize> {
        if self.target_class < 0 || self.target_class as u64 >= num_classes as u64 {
            return Err(ScanError::InvalidRequest(format!(
                "target class {} out of range for a model with {} classes",
                self.target_class, num_classes
            )));
        }
        Ok(self.target_class as usize)
    }
}

/// The sole artifact handed to external collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackResult {
    /// Quantized adversarial image, indexed `[row][column][channel]`.
    pub adversarial_image: Vec<Vec<Vec<u8>>>,
    pub target_class: usize,
    /// Iterations the strategy loop executed (its full budget).
    pub iterations: usize,
    pub elapsed_secs: f64,
    pub architecture: String,
    pub attack_family: String,
    pub mitigations: Vec<String>,
    /// Post-attack argmax of the re-scored quantized image.
    pub predicted_class: usize,
    /// Post-attack softmax confidence of the target class.
    pub target_confidence: f32,
    /// Whether the quantized image is classified as the target.
    pub succeeded: bool,
    pub post_attack_scores: Vec<f32>,
    /// Re-scored seed image, for strategies that keep the seed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_scores: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_class: Option<usize>,
    /// Candidates the oracle accepted (boundary strategies only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_steps: Option<usize>,
    pub model_queries: usize,
}

impl AttackResult {
    /// Image dimensions as (height, width, channels).
    pub fn image_shape(&self) -> (usize, usize, usize) {
        let h = self.adversarial_image.len();
        let w = self.adversarial_image.first().map_or(0, |row| row.len());
        let c = self
            .adversarial_image
            .first()
            .and_then(|row| row.first())
            .map_or(0, |px| px.len());
        (h, w, c)
    }

    /// One-line summary for logs and the CLI.
    pub fn summary(&self) -> String {
        format!(
            "{} / {}: target {} -> predicted {} (confidence {:.4}, {}) after {} iterations in {:.2}s",
            self.architecture,
            self.attack_family,
            self.target_class,
            self.predicted_class,
            self.target_confidence,
            if self.succeeded { "succeeded" } else { "failed" },
            self.iterations,
            self.elapsed_secs
        )
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Error taxonomy at the engine boundary.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// Missing or corrupt model source. Fatal, never retried.
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    /// Shape or domain mismatch during a predict call. Fatal within the scan.
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Request rejected before the attack loop started.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Cancellation token fired or the deadline passed mid-loop.
    #[error("Scan cancelled after {completed} iterations")]
    Cancelled { completed: usize },
}

/// Stable error kinds for structured reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ModelLoad,
    Inference,
    InvalidRequest,
    Cancelled,
}

/// Structured error payload (kind + message).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl ScanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScanError::ModelLoad(_) => ErrorKind::ModelLoad,
            ScanError::Inference(_) => ErrorKind::Inference,
            ScanError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ScanError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }

    /// Shape mismatch raised by a predict call.
    pub fn shape_mismatch(expected: &[usize], got: &[usize]) -> Self {
        ScanError::Inference(format!(
            "Shape mismatch: expected {:?}, got {:?}",
            expected, got
        ))
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
