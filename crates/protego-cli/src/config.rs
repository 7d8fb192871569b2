//! Engine configuration from a JSON file plus command-line overrides.

use anyhow::Context;
use clap::Args;
use protego_attack::{EngineConfig, GradientMode};
use std::path::PathBuf;

/// Flags shared by every command that runs scans.
///
/// Precedence: flag, then `PROTEGO_*` environment variable, then `--config`
/// file, then built-in defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct EngineArgs {
    /// JSON engine configuration file
    #[arg(long, env = "PROTEGO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override every strategy's iteration budget
    #[arg(long, env = "PROTEGO_ITERATIONS")]
    pub iterations: Option<usize>,

    /// RNG seed for reproducible scans
    #[arg(long, env = "PROTEGO_SEED")]
    pub seed: Option<u64>,

    /// Directional signal: auto, analytic or estimated
    #[arg(long, env = "PROTEGO_GRADIENT")]
    pub gradient: Option<GradientMode>,

    /// NES samples per gradient estimate
    #[arg(long, env = "PROTEGO_NES_SAMPLES")]
    pub nes_samples: Option<usize>,

    /// NES probe standard deviation
    #[arg(long, env = "PROTEGO_NES_SIGMA")]
    pub nes_sigma: Option<f32>,

    /// Abort a scan after this many seconds
    #[arg(long, env = "PROTEGO_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// JSON mitigation catalog replacing the built-in guidance
    #[arg(long, env = "PROTEGO_MITIGATIONS_FILE")]
    pub mitigations_file: Option<PathBuf>,

    /// Models kept loaded between scans (0 disables pooling)
    #[arg(long, env = "PROTEGO_MODEL_CACHE_CAPACITY")]
    pub model_cache_capacity: Option<usize>,
}

impl EngineArgs {
    pub fn to_config(&self) -> anyhow::Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_file(path)
                .with_context(|| format!("loading engine config {}", path.display()))?,
            None => EngineConfig::default(),
        };

        if let Some(iterations) = self.iterations {
            config.iterations = Some(iterations);
        }
        if let Some(seed) = self.seed {
            config.rng_seed = Some(seed);
        }
        if let Some(mode) = self.gradient {
            config.gradient_mode = mode;
        }
        if let Some(samples) = self.nes_samples {
            config.nes.samples = samples;
        }
        if let Some(sigma) = self.nes_sigma {
            config.nes.sigma = sigma;
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout_secs = Some(secs);
        }
        if let Some(path) = &self.mitigations_file {
            config.mitigations_file = Some(path.clone());
        }
        if let Some(capacity) = self.model_cache_capacity {
            config.model_cache_capacity = Some(capacity);
        }
        Ok(config)
    }
}
