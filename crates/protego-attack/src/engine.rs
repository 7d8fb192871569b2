//! Scan orchestration: load, validate, attack, analyze, attach mitigations.

use crate::analyzer::Analyzer;
use crate::attack::{Attack, DEFAULT_CHECK_INTERVAL};
use crate::cancel::CancellationToken;
use crate::nes::NesConfig;
use crate::signal::GradientMode;
use crate::strategy::descriptor;
use ndarray::Array3;
use protego_core::{
    Architecture, AttackFamily, AttackResult, MitigationCatalog, Result, ScanError, ScanRequest,
};
use protego_model::{load_model, pixels_to_nested, Classifier, ModelHandle, Preprocessor};
use protego_tensor::WorkingImage;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Overrides every strategy's iteration budget.
    pub iterations: Option<usize>,
    pub nes: NesConfig,
    pub gradient_mode: GradientMode,
    /// Fixed RNG seed; `None` seeds from the OS.
    pub rng_seed: Option<u64>,
    /// Iterations between cancellation checks.
    pub cancel_check_interval: usize,
    /// Per-scan wall-clock limit.
    pub timeout_secs: Option<u64>,
    /// JSON catalog replacing the built-in mitigation tables.
    pub mitigations_file: Option<PathBuf>,
    /// Models kept loaded between scans; `None` keeps every model ever requested.
    pub model_cache_capacity: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            iterations: None,
            nes: NesConfig::default(),
            gradient_mode: GradientMode::Auto,
            rng_seed: None,
            cancel_check_interval: DEFAULT_CHECK_INTERVAL,
            timeout_secs: None,
            mitigations_file: None,
            model_cache_capacity: None,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ScanError::InvalidRequest(format!(
                "Failed to read config {}: {}",
                path.display(),
                e
            ))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            ScanError::InvalidRequest(format!(
                "Failed to parse config {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Small budget and a fixed seed, for smoke runs.
    pub fn quick() -> Self {
        Self {
            iterations: Some(50),
            nes: NesConfig::fast(),
            rng_seed: Some(42),
            ..Self::default()
        }
    }

    fn rng(&self) -> StdRng {
        match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}

/// Resolves a model reference to a loaded handle.
pub trait ModelLoader: Send + Sync {
    fn load(&self, model_ref: &str, architecture: Architecture) -> Result<ModelHandle>;
}

/// Loads SafeTensors files from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileModelLoader;

impl ModelLoader for FileModelLoader {
    fn load(&self, model_ref: &str, architecture: Architecture) -> Result<ModelHandle> {
        Ok(Arc::new(load_model(model_ref, architecture)?))
    }
}

type CacheKey = (String, Architecture);

/// Pools loaded models by (reference, architecture).
///
/// Handles are read-only, so concurrent scans may share them. With a capacity
/// the least recently used model is dropped from the pool once it is full;
/// scans still holding its handle keep it alive until they finish.
pub struct CachingLoader<L> {
    inner: L,
    capacity: Option<usize>,
    cache: Mutex<ModelCache>,
}

#[derive(Default)]
struct ModelCache {
    models: HashMap<CacheKey, ModelHandle>,
    /// Least recently used first.
    order: VecDeque<CacheKey>,
}

impl ModelCache {
    fn touch(&mut self, key: &CacheKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}

impl<L: ModelLoader> CachingLoader<L> {
    /// Unbounded pool.
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            capacity: None,
            cache: Mutex::new(ModelCache::default()),
        }
    }

    /// Pool holding at most `capacity` models; 0 disables pooling.
    pub fn bounded(inner: L, capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new(inner)
        }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.lock().models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every pooled model.
    pub fn clear(&self) {
        let mut cache = self.lock();
        cache.models.clear();
        cache.order.clear();
    }

    fn lock(&self) -> MutexGuard<'_, ModelCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<L: ModelLoader> ModelLoader for CachingLoader<L> {
    fn load(&self, model_ref: &str, architecture: Architecture) -> Result<ModelHandle> {
        if self.capacity == Some(0) {
            return self.inner.load(model_ref, architecture);
        }

        let key = (model_ref.to_string(), architecture);
        {
            let mut cache = self.lock();
            if let Some(model) = cache.models.get(&key).cloned() {
                cache.touch(&key);
                debug!(model_ref, "Model cache hit");
                return Ok(model);
            }
        }

        // Loaded outside the lock; a racing load of the same key keeps the first.
        let model = self.inner.load(model_ref, architecture)?;
        let mut cache = self.lock();
        if let Some(existing) = cache.models.get(&key).cloned() {
            cache.touch(&key);
            return Ok(existing);
        }
        if let Some(capacity) = self.capacity {
            while cache.models.len() >= capacity {
                let Some(evicted) = cache.order.pop_front() else {
                    break;
                };
                cache.models.remove(&evicted);
                debug!(model_ref = %evicted.0, "Evicted pooled model");
            }
        }
        cache.order.push_back(key.clone());
        cache.models.insert(key, Arc::clone(&model));
        Ok(model)
    }
}

/// Per-scan inputs that are not part of the request payload.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// 8-bit (H, W, 3) seed; resized to the model's resolution. Uniform noise when absent.
    pub seed_image: Option<Array3<u8>>,
    pub cancel: Option<CancellationToken>,
}

/// Runs scans end to end.
pub struct ScanEngine {
    config: EngineConfig,
    loader: Arc<dyn ModelLoader>,
    catalog: Arc<MitigationCatalog>,
}

impl ScanEngine {
    /// Filesystem-backed engine with model pooling.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let loader = match config.model_cache_capacity {
            Some(capacity) => CachingLoader::bounded(FileModelLoader, capacity),
            None => CachingLoader::new(FileModelLoader),
        };
        Self::with_loader(config, Arc::new(loader))
    }

    pub fn with_loader(config: EngineConfig, loader: Arc<dyn ModelLoader>) -> Result<Self> {
        let catalog = match &config.mitigations_file {
            Some(path) => MitigationCatalog::from_file(path)?,
            None => MitigationCatalog::builtin(),
        };
        debug!(catalog_version = catalog.version(), "Scan engine ready");
        Ok(Self {
            config,
            loader,
            catalog: Arc::new(catalog),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &MitigationCatalog {
        &self.catalog
    }

    pub fn scan(&self, request: &ScanRequest) -> Result<AttackResult> {
        self.scan_with(request, &ScanOptions::default())
    }

    pub fn scan_with(&self, request: &ScanRequest, options: &ScanOptions) -> Result<AttackResult> {
        let model = self.loader.load(&request.model_ref, request.architecture)?;
        self.scan_with_model(request, model.as_ref(), options)
    }

    /// Scan against an already loaded model.
    ///
    /// The request is fully validated before the first inference call.
    pub fn scan_with_model(
        &self,
        request: &ScanRequest,
        model: &dyn Classifier,
        options: &ScanOptions,
    ) -> Result<AttackResult> {
        if model.architecture() != request.architecture {
            return Err(ScanError::InvalidRequest(format!(
                "request is for {} but the model is {}",
                request.architecture,
                model.architecture()
            )));
        }
        let target = request.validate_target(model.num_classes())?;

        let mut strategy = descriptor(request.architecture, request.attack_family);
        if let Some(budget) = self.config.iterations {
            strategy = strategy.with_budget(budget);
        }
        let signal = match strategy.rule.objective() {
            Some(_) => Some(self.config.gradient_mode.select(model, self.config.nes)?),
            None => None,
        };

        let mut rng = self.config.rng();
        let preprocessor = Preprocessor::for_model(model);
        let seed = match &options.seed_image {
            Some(raw) => preprocessor.preprocess(raw.view())?,
            None => {
                let (h, w) = preprocessor.resolution();
                WorkingImage::uniform(h, w, preprocessor.domain(), &mut rng)
            }
        };

        let mut cancel = options.cancel.clone().unwrap_or_default();
        if let Some(secs) = self.config.timeout_secs {
            cancel = cancel.with_timeout(Duration::from_secs(secs));
        }

        info!(
            architecture = %request.architecture,
            family = %request.attack_family,
            target,
            budget = strategy.budget,
            "Starting scan"
        );
        let start = Instant::now();

        let mut attack = Attack::new(strategy, model)
            .with_cancellation(cancel, self.config.cancel_check_interval);
        if let Some(signal) = signal.as_deref() {
            attack = attack.with_signal(signal);
        }
        // Boundary strategies walk from the seed, so it is a meaningful baseline.
        let baseline = (request.attack_family == AttackFamily::BoundaryBased)
            .then(|| seed.data().clone().into_dyn());
        let outcome = attack.run(seed, target, &mut rng)?;

        let analysis =
            Analyzer::new(model).analyze(outcome.image.into_inner().into_dyn(), target, baseline)?;
        let elapsed = start.elapsed().as_secs_f64();

        let result = AttackResult {
            adversarial_image: pixels_to_nested(analysis.adversarial.pixels.view()),
            target_class: target,
            iterations: outcome.iterations,
            elapsed_secs: elapsed,
            architecture: request.architecture.label().to_string(),
            attack_family: request.attack_family.label().to_string(),
            mitigations: self
                .catalog
                .to_vec(request.architecture, request.attack_family),
            predicted_class: analysis.adversarial.predicted_class,
            target_confidence: analysis.target_confidence,
            succeeded: analysis.succeeded(),
            post_attack_scores: analysis.adversarial.scores.to_vec(),
            baseline_scores: analysis.baseline.as_ref().map(|b| b.scores.to_vec()),
            baseline_class: analysis.baseline.as_ref().map(|b| b.predicted_class),
            accepted_steps: outcome.accepted_steps,
            model_queries: outcome.model_queries + analysis.model_queries,
        };

        info!(
            predicted = result.predicted_class,
            succeeded = result.succeeded,
            elapsed_secs = elapsed,
            "Scan complete"
        );
        Ok(result)
    }

    /// Run independent requests concurrently, one scan per rayon task.
    ///
    /// Results are returned in request order; one failure does not stop the others.
    pub fn scan_batch(&self, requests: &[ScanRequest]) -> Vec<Result<AttackResult>> {
        info!(count = requests.len(), "Starting batch scan");
        requests
            .par_iter()
            .map(|request| {
                let result = self.scan(request);
                if let Err(e) = &result {
                    warn!(model_ref = %request.model_ref, error = %e, "Scan failed");
                }
                result
            })
            .collect()
    }
}
