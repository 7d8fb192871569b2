//! Protego CLI
//!
//! Command-line interface for the adversarial-robustness scanner.
//!
//! # Commands
//!
//! - `protego scan` - Run one attack against a model and print the result
//! - `protego batch` - Run a JSON array of scan requests concurrently
//! - `protego mitigations` - Show defensive guidance for an (architecture, attack) pair
//! - `protego inspect` - Describe a model file

mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::EngineArgs;
use protego_attack::{ScanEngine, ScanOptions};
use protego_core::{Architecture, AttackFamily, MitigationCatalog, ScanError, ScanRequest};
use protego_model::{load_model, pixels_from_nested, Classifier};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "protego")]
#[command(about = "Adversarial-robustness scanner for image classifiers")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize an adversarial image for one model and target class
    Scan {
        /// Model file (safetensors, optionally gzip-compressed)
        #[arg(short, long, env = "PROTEGO_MODEL")]
        model: PathBuf,
        /// Architecture: resnet, mobilenet or efficientnet
        #[arg(short, long)]
        arch: Architecture,
        /// Attack family: score or boundary
        #[arg(long)]
        attack: AttackFamily,
        /// Target class index
        #[arg(short, long)]
        target: i64,
        /// Seed image as nested [row][column][channel] 8-bit JSON
        #[arg(long)]
        seed_image: Option<PathBuf>,
        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Run every scan request in a JSON array
    Batch {
        /// JSON file holding an array of scan requests
        #[arg(short, long)]
        requests: PathBuf,
        /// Write the results here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Print mitigation guidance
    Mitigations {
        /// Architecture (all when omitted)
        #[arg(short, long)]
        arch: Option<Architecture>,
        /// Attack family (all when omitted)
        #[arg(long)]
        attack: Option<AttackFamily>,
        /// Catalog file replacing the built-in guidance
        #[arg(long, env = "PROTEGO_MITIGATIONS_FILE")]
        catalog: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Describe a model file
    Inspect {
        /// Model file (safetensors, optionally gzip-compressed)
        #[arg(short, long, env = "PROTEGO_MODEL")]
        model: PathBuf,
        /// Architecture the model was trained for
        #[arg(short, long)]
        arch: Architecture,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command) {
        Ok(code) => code,
        Err(err) => {
            // Engine errors keep their structured form at the boundary.
            match err.downcast_ref::<ScanError>() {
                Some(scan_error) => {
                    let report = scan_error.report();
                    match serde_json::to_string(&report) {
                        Ok(json) => eprintln!("{json}"),
                        Err(_) => eprintln!("error: {scan_error}"),
                    }
                }
                None => eprintln!("error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Commands) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Scan {
            model,
            arch,
            attack,
            target,
            seed_image,
            output,
            engine,
        } => {
            let engine = ScanEngine::new(engine.to_config()?)?;
            let options = ScanOptions {
                seed_image: seed_image.as_deref().map(read_seed_image).transpose()?,
                cancel: None,
            };
            let request = ScanRequest::new(arch, attack, target, model.to_string_lossy());
            let result = engine.scan_with(&request, &options)?;
            info!("{}", result.summary());
            write_json(&result, output.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Batch {
            requests,
            output,
            engine,
        } => {
            let content = std::fs::read_to_string(&requests)
                .with_context(|| format!("reading {}", requests.display()))?;
            let requests: Vec<ScanRequest> = serde_json::from_str(&content)
                .with_context(|| format!("parsing scan requests in {}", requests.display()))?;

            let engine = ScanEngine::new(engine.to_config()?)?;
            let results = engine.scan_batch(&requests);
            let failed = results.iter().filter(|r| r.is_err()).count();
            let entries: Vec<serde_json::Value> = results
                .into_iter()
                .map(|r| match r {
                    Ok(result) => serde_json::to_value(result),
                    Err(e) => serde_json::to_value(BatchFailure { error: e.report() }),
                })
                .collect::<Result<_, _>>()?;
            info!(total = entries.len(), failed, "Batch finished");
            write_json(&entries, output.as_deref())?;
            Ok(if failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Mitigations {
            arch,
            attack,
            catalog,
            json,
        } => {
            let catalog = match catalog {
                Some(path) => MitigationCatalog::from_file(path)?,
                None => MitigationCatalog::builtin(),
            };
            print_mitigations(&catalog, arch, attack, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Inspect { model, arch, json } => {
            inspect(&model, arch, json)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[derive(Serialize)]
struct BatchFailure {
    error: protego_core::ErrorReport,
}

fn read_seed_image(path: &Path) -> anyhow::Result<ndarray::Array3<u8>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading seed image {}", path.display()))?;
    let nested: Vec<Vec<Vec<u8>>> = serde_json::from_str(&content)
        .with_context(|| format!("parsing seed image {}", path.display()))?;
    Ok(pixels_from_nested(&nested)?)
}

fn write_json<T: Serialize + ?Sized>(value: &T, output: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "Wrote output");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn print_mitigations(
    catalog: &MitigationCatalog,
    arch: Option<Architecture>,
    attack: Option<AttackFamily>,
    json: bool,
) -> anyhow::Result<()> {
    let archs: Vec<Architecture> = arch.map_or_else(|| Architecture::ALL.to_vec(), |a| vec![a]);
    let families: Vec<AttackFamily> =
        attack.map_or_else(|| AttackFamily::ALL.to_vec(), |f| vec![f]);

    if json {
        let mut file = catalog.to_catalog_file();
        file.entries
            .retain(|e| archs.contains(&e.architecture) && families.contains(&e.attack_family));
        return write_json(&file, None);
    }

    println!("Mitigation catalog {}", catalog.version());
    for &a in &archs {
        for &f in &families {
            println!();
            println!("{a} / {f}:");
            for (i, line) in catalog.get(a, f).iter().enumerate() {
                println!("  {}. {}", i + 1, line);
            }
        }
    }
    Ok(())
}

fn inspect(path: &Path, arch: Architecture, json: bool) -> anyhow::Result<()> {
    let model = load_model(path, arch)?;
    let (h, w, c) = model.input_shape();
    let layers: Vec<[usize; 2]> = model
        .layers()
        .iter()
        .map(|l| [l.in_features(), l.out_features()])
        .collect();

    if json {
        let summary = serde_json::json!({
            "architecture": arch.label(),
            "input_shape": [h, w, c],
            "domain": [arch.domain().lower, arch.domain().upper],
            "classes": model.num_classes(),
            "pool": model.pool(),
            "layers": layers,
            "parameters": model.param_count(),
            "differentiable": model.as_differentiable().is_some(),
        });
        return write_json(&summary, None);
    }

    println!("Model: {}", path.display());
    println!("Architecture: {arch}");
    println!("Input: {h}x{w}x{c} in {}", arch.domain());
    println!("Classes: {}", model.num_classes());
    println!("Pooling: {}x{}", model.pool(), model.pool());
    for (i, [inputs, outputs]) in layers.iter().enumerate() {
        println!("  layer {i}: {inputs} -> {outputs}");
    }
    println!("Parameters: {}", model.param_count());
    Ok(())
}
