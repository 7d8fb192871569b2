//! Mitigation catalog: defensive guidance keyed by (architecture, attack family).
//!
//! The built-in tables are static, read-only data. [`MitigationCatalog`] wraps
//! them (or a JSON file with the same six entries) into an immutable lookup
//! that is built once and shared across scans.

use crate::{Architecture, AttackFamily, Result, ScanError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Version of the built-in guidance text.
pub const CATALOG_VERSION: &str = "2025.1";

const RESNET_SCORE: &[&str] = &[
    "Training and Architectural Enhancements:",
    "Train on adversarial examples generated against every residual stage, not only the final block.",
    "Introduce margin-based loss adjustments to penalize overconfident predictions near boundaries.",
    "Integrate Mixup and CutMix during training to enforce smoother class transitions.",
    "Regularization and Differential Privacy Techniques:",
    "Apply label smoothing and gradient penalties to prevent extreme confidence scores.",
    "Selectively apply Differentially Private SGD (DPSGD) in critical layers to disrupt gradient extraction.",
    "Deployment and Post-Training Countermeasures:",
    "Use dynamic noise injection at inference time to make gradient probing more difficult.",
    "Employ an ensemble of ResNet models or stochastic depth at inference to randomize decisions.",
    "Implement rate limiting and query anomaly detection to prevent rapid probing.",
    "Use model versioning and frequent updates to prevent static decision boundaries.",
];

const RESNET_BOUNDARY: &[&str] = &[
    "Enhanced Regularization to Smooth Boundaries:",
    "Increase weight decay values and incorporate dropout layers (especially in the fully connected or later convolutional layers) to reduce overfitting.",
    "Use aggressive data augmentation (random crops, flips, rotations, color jittering) so that the model learns to classify under varied conditions.",
    "Replace hard one-hot labels with soft targets (e.g. 0.9 for the true class and 0.1 distributed among others) to reduce overconfidence.",
    "Adversarial Training with Boundary Samples:",
    "During training, generate adversarial examples crafted to lie close to the current decision boundary (PGD or FGSM with moderate perturbation).",
    "Gradually introduce adversarial examples with increasing perturbation levels (curriculum-based adversarial training).",
    "Use margin-based or regularized loss functions that penalize overly steep transitions in confidence near the boundary.",
    "Gradient Obfuscation and Noise Injection During Training:",
    "Introduce a small, controlled amount of noise into intermediate activations or directly into the logits during training.",
    "Use DPSGD (Differentially Private SGD) to add calibrated noise to gradients selectively in critical layers.",
    "Deployment-Level Strategies:",
    "Return only top-1 labels or coarse confidence bands instead of full probability vectors.",
    "Add small randomized perturbations to the output probabilities at inference time to obscure the precise boundary location.",
    "Implement dynamic response noise, adjusting the amount of noise based on query history.",
    "Query Throttling and Monitoring:",
    "Enforce strict per-IP or per-user query limits to prevent excessive probing.",
    "Monitor query patterns for sequences of inputs that vary only slightly (indicative of boundary probing).",
    "Provide tiered API access where detailed outputs are only available under strict authentication.",
    "Ensemble and Model Rotation Strategies:",
    "Deploy an ensemble of ResNet models trained with slightly different hyperparameters or on different subsets of data.",
    "Periodically update or rotate the deployed model parameters to change the decision boundary over time.",
];

const MOBILENET_SCORE: &[&str] = &[
    "Training and Architectural Enhancements:",
    "Incorporate low-budget adversarial examples into training; lean depthwise networks respond strongly to modest adversarial training.",
    "Introduce margin-based loss adjustments to penalize overconfident predictions near boundaries.",
    "Integrate Mixup and CutMix during training to enforce smoother class transitions.",
    "Regularization and Differential Privacy Techniques:",
    "Apply label smoothing and gradient penalties to prevent extreme confidence scores.",
    "Selectively apply Differentially Private SGD (DPSGD) in critical layers to disrupt gradient extraction.",
    "Deployment and Post-Training Countermeasures:",
    "Use dynamic noise injection at inference time to make gradient probing more difficult.",
    "Serve only the predicted label or a coarse confidence band rather than the full softmax distribution.",
    "Implement rate limiting and query anomaly detection to prevent rapid probing.",
    "Use model versioning and frequent updates to prevent static decision boundaries.",
];

const MOBILENET_BOUNDARY: &[&str] = &[
    "Tailored Adversarial Training:",
    "Incorporate adversarial examples generated with low-budget attacks (e.g. FGSM with small epsilon) to prevent overconfident, sharp transitions.",
    "Because MobileNet is lean, even modest adversarial training can lead to significant boundary smoothing.",
    "Use mixup or CutMix during training to force the network to learn smooth interpolations between classes.",
    "Activation Function and Normalization Tweaks:",
    "Replace standard ReLU activations with smoother variants such as GELU or softplus.",
    "Smoother activations lead to a less abrupt change in output near the boundary.",
    "Fine-tune batch normalization settings or experiment with alternatives (e.g. group normalization) that reduce overfitting in low-parameter networks.",
    "Deployment-Level Strategies:",
    "Serve only the predicted label (or a coarse confidence interval) rather than the full softmax distribution.",
    "Reducing output granularity prevents attackers from approximating the decision boundary.",
    "Inject minimal random noise into the output logits at inference time, calibrated to be imperceptible to legitimate users yet sufficient to thwart boundary approximation.",
    "Implement lightweight session-based query monitoring to detect rapid, minor input changes.",
    "Cache results at the device or edge server for near-identical queries and return the cached, noise-augmented result to limit information leakage.",
    "Impose lower per-user query limits for mobile clients.",
    "Raise the output noise level dynamically when a client exceeds a threshold of similar queries.",
];

const EFFICIENTNET_SCORE: &[&str] = &[
    "Training and Architectural Enhancements:",
    "Incorporate adversarial examples across EfficientNet's compound scaling factors to enhance robustness.",
    "Introduce margin-based loss adjustments to penalize overconfident predictions near boundaries.",
    "Integrate Mixup and CutMix during training to enforce smoother class transitions.",
    "Regularization and Differential Privacy Techniques:",
    "Apply label smoothing and gradient penalties to prevent extreme confidence scores.",
    "Selectively apply Differentially Private SGD (DPSGD) in critical layers to disrupt gradient extraction.",
    "Deployment and Post-Training Countermeasures:",
    "Use dynamic noise injection at inference time to make gradient probing more difficult.",
    "Employ an ensemble of EfficientNet models or stochastic depth at inference to randomize decisions.",
    "Implement rate limiting and query anomaly detection to prevent rapid probing.",
    "Use model versioning and frequent updates to prevent static decision boundaries.",
];

const EFFICIENTNET_BOUNDARY: &[&str] = &[
    "Training and Architectural Enhancements:",
    "Incorporate adversarial examples in the compound scaling process so that each scaled version of the model learns robust boundaries.",
    "Ensure that training data includes near-boundary examples for all scales (depth, width and resolution).",
    "Add margin or center loss terms that penalize overly confident predictions near the boundary.",
    "Use mixup or CutMix during training to force the model to learn smooth class transitions.",
    "Regularization and Differential Privacy Techniques:",
    "Apply label smoothing to reduce extreme confidence values and add gradient penalties to limit how sharply the output changes with input perturbations.",
    "Integrate differential privacy mechanisms (like DPSGD) in layers that directly influence the final logits.",
    "Deployment and Post-Training Countermeasures:",
    "Add differential-privacy-inspired noise to the output probabilities or logits at inference time.",
    "Increase the noise level when a client appears to be probing near the boundary.",
    "Use an ensemble of EfficientNet models (or stochastic depth at inference time) so that the decision boundary varies slightly with each query.",
    "Monitor for rapid query sequences that indicate boundary probing.",
    "Block or randomize responses automatically for clients that exceed normal usage thresholds.",
    "Return aggregated responses for similar queries over a short time window.",
    "Introduce minor, randomized response delays to disrupt timing-based inference.",
    "Periodically update model weights or rotate among several EfficientNet versions deployed concurrently.",
];

/// Built-in guidance for an (architecture, attack family) pair.
pub fn mitigations_for(
    architecture: Architecture,
    family: AttackFamily,
) -> &'static [&'static str] {
    match (architecture, family) {
        (Architecture::ResNet, AttackFamily::ScoreBased) => RESNET_SCORE,
        (Architecture::ResNet, AttackFamily::BoundaryBased) => RESNET_BOUNDARY,
        (Architecture::MobileNet, AttackFamily::ScoreBased) => MOBILENET_SCORE,
        (Architecture::MobileNet, AttackFamily::BoundaryBased) => MOBILENET_BOUNDARY,
        (Architecture::EfficientNet, AttackFamily::ScoreBased) => EFFICIENTNET_SCORE,
        (Architecture::EfficientNet, AttackFamily::BoundaryBased) => EFFICIENTNET_BOUNDARY,
    }
}

/// On-disk catalog format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
    pub version: String,
    pub entries: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub architecture: Architecture,
    pub attack_family: AttackFamily,
    pub mitigations: Vec<String>,
}

/// Immutable (architecture, family) -> guidance lookup.
#[derive(Debug, Clone)]
pub struct MitigationCatalog {
    version: String,
    entries: HashMap<(Architecture, AttackFamily), Arc<[String]>>,
}

impl MitigationCatalog {
    /// Catalog backed by the built-in tables.
    pub fn builtin() -> Self {
        let entries = Architecture::ALL
            .iter()
            .flat_map(|&arch| AttackFamily::ALL.iter().map(move |&family| (arch, family)))
            .map(|(arch, family)| {
                let list: Arc<[String]> = mitigations_for(arch, family)
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                ((arch, family), list)
            })
            .collect();
        Self {
            version: CATALOG_VERSION.to_string(),
            entries,
        }
    }

    /// Build from a parsed catalog file. Every pair must be present and non-empty.
    pub fn from_catalog_file(file: CatalogFile) -> Result<Self> {
        let mut entries: HashMap<(Architecture, AttackFamily), Arc<[String]>> = HashMap::new();
        for entry in file.entries {
            if entry.mitigations.is_empty() {
                return Err(ScanError::InvalidRequest(format!(
                    "mitigation catalog entry for {} / {} is empty",
                    entry.architecture, entry.attack_family
                )));
            }
            let key = (entry.architecture, entry.attack_family);
            if entries.insert(key, Arc::from(entry.mitigations)).is_some() {
                return Err(ScanError::InvalidRequest(format!(
                    "duplicate mitigation catalog entry for {} / {}",
                    key.0, key.1
                )));
            }
        }
        for arch in Architecture::ALL {
            for family in AttackFamily::ALL {
                if !entries.contains_key(&(arch, family)) {
                    return Err(ScanError::InvalidRequest(format!(
                        "mitigation catalog has no entry for {} / {}",
                        arch, family
                    )));
                }
            }
        }
        Ok(Self {
            version: file.version,
            entries,
        })
    }

    /// Load a JSON catalog file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ScanError::InvalidRequest(format!(
                "Failed to read mitigation catalog {}: {}",
                path.display(),
                e
            ))
        })?;
        let file: CatalogFile = serde_json::from_str(&content).map_err(|e| {
            ScanError::InvalidRequest(format!(
                "Failed to parse mitigation catalog {}: {}",
                path.display(),
                e
            ))
        })?;
        debug!(version = %file.version, path = %path.display(), "Loaded mitigation catalog");
        Self::from_catalog_file(file)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Ordered guidance for a pair.
    pub fn get(&self, architecture: Architecture, family: AttackFamily) -> &[String] {
        // Construction guarantees every pair is present.
        self.entries
            .get(&(architecture, family))
            .map(|list| list.as_ref())
            .unwrap_or(&[])
    }

    /// Owned copy for embedding in a result.
    pub fn to_vec(&self, architecture: Architecture, family: AttackFamily) -> Vec<String> {
        self.get(architecture, family).to_vec()
    }

    /// Serializable form of the catalog.
    pub fn to_catalog_file(&self) -> CatalogFile {
        let mut entries = Vec::with_capacity(self.entries.len());
        for arch in Architecture::ALL {
            for family in AttackFamily::ALL {
                entries.push(CatalogEntry {
                    architecture: arch,
                    attack_family: family,
                    mitigations: self.to_vec(arch, family),
                });
            }
        }
        CatalogFile {
            version: self.version.clone(),
            entries,
        }
    }
}

impl Default for MitigationCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
