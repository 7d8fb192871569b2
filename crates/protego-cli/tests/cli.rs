//! Integration tests driving the `protego` binary.

use ndarray::{Array1, Array2};
use protego_core::Architecture;
use protego_model::{save_model, DenseClassifier, DenseLayer};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn protego() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_protego"));
    cmd.env_remove("RUST_LOG");
    for var in [
        "PROTEGO_MODEL",
        "PROTEGO_CONFIG",
        "PROTEGO_ITERATIONS",
        "PROTEGO_SEED",
        "PROTEGO_GRADIENT",
        "PROTEGO_TIMEOUT_SECS",
        "PROTEGO_MITIGATIONS_FILE",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

/// MobileNet model: 128x128 input pooled by 32 into 48 features, 4 classes.
fn write_model(dir: &Path) -> PathBuf {
    let layer = DenseLayer::new(
        Array2::from_shape_fn((4, 48), |(o, i)| ((o * 3 + i) % 7) as f32 * 0.05 - 0.15),
        Array1::zeros(4),
    )
    .unwrap();
    let model = DenseClassifier::new(Architecture::MobileNet, 32, vec![layer]).unwrap();
    let path = dir.join("mobilenet.safetensors");
    save_model(&model, &path).unwrap();
    path
}

fn stdout_json(output: &Output) -> serde_json::Value {
    assert!(
        output.status.success(),
        "protego failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

#[test]
fn test_scan_prints_attack_result() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path());

    let output = protego()
        .args(["scan", "--arch", "mobilenet", "--attack", "score", "--target", "2"])
        .args(["--iterations", "4", "--seed", "7", "--model"])
        .arg(&model)
        .output()
        .unwrap();

    let result = stdout_json(&output);
    assert_eq!(result["iterations"], 4);
    assert_eq!(result["target_class"], 2);
    assert_eq!(result["architecture"], "MobileNet");
    assert_eq!(result["attack_family"], "Score-Based");
    assert_eq!(result["adversarial_image"].as_array().unwrap().len(), 128);
    assert!(!result["mitigations"].as_array().unwrap().is_empty());
}

#[test]
fn test_scan_writes_output_file_with_seed_image() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path());
    let seed = dir.path().join("seed.json");
    std::fs::write(&seed, serde_json::to_string(&vec![vec![vec![200_u8, 10, 90]; 16]; 16]).unwrap())
        .unwrap();
    let out = dir.path().join("result.json");

    let output = protego()
        .args(["scan", "--arch", "b", "--attack", "boundary", "--target", "0"])
        .args(["--iterations", "3", "--seed", "1"])
        .arg("--model")
        .arg(&model)
        .arg("--seed-image")
        .arg(&seed)
        .arg("--output")
        .arg(&out)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let result: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(result["attack_family"], "Boundary-Based");
    assert!(result["baseline_scores"].is_array());
    assert!(result["accepted_steps"].is_number());
}

#[test]
fn test_invalid_target_reports_structured_error() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path());

    let output = protego()
        .args(["scan", "--arch", "mobilenet", "--attack", "score", "--target", "9"])
        .arg("--model")
        .arg(&model)
        .output()
        .unwrap();
    assert!(!output.status.success());
    let report: serde_json::Value = serde_json::from_slice(
        String::from_utf8_lossy(&output.stderr)
            .lines()
            .last()
            .unwrap()
            .as_bytes(),
    )
    .unwrap();
    assert_eq!(report["kind"], "invalid_request");
}

#[test]
fn test_missing_model_is_model_load_error() {
    let output = protego()
        .args(["scan", "--arch", "resnet", "--attack", "score", "--target", "0"])
        .args(["--model", "/nonexistent/model.safetensors"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("model_load"), "{stderr}");
}

#[test]
fn test_batch_reports_each_request() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path());
    let requests = serde_json::json!([
        {
            "architecture": "MobileNet",
            "attack_family": "score",
            "target_class": 1,
            "model_ref": model,
        },
        {
            "architecture": "MobileNet",
            "attack_family": "boundary",
            "target_class": 0,
            "model_ref": dir.path().join("absent.safetensors"),
        },
    ]);
    let requests_path = dir.path().join("requests.json");
    std::fs::write(&requests_path, requests.to_string()).unwrap();

    let output = protego()
        .args(["batch", "--iterations", "2", "--seed", "3", "--requests"])
        .arg(&requests_path)
        .output()
        .unwrap();
    assert!(!output.status.success());
    let results: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["target_class"], 1);
    assert_eq!(results[1]["error"]["kind"], "model_load");
}

#[test]
fn test_mitigations_listing() {
    let output = protego()
        .args(["mitigations", "--arch", "efficientnet", "--attack", "boundary", "--json"])
        .output()
        .unwrap();
    let catalog = stdout_json(&output);
    let entries = catalog["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["architecture"], "EfficientNetB0");
    assert!(!entries[0]["mitigations"].as_array().unwrap().is_empty());

    let output = protego().arg("mitigations").output().unwrap();
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("ResNet / Score-Based"), "{text}");
    assert!(text.contains("EfficientNetB0 / Boundary-Based"), "{text}");
}

#[test]
fn test_inspect_json() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path());

    let output = protego()
        .args(["inspect", "--arch", "mobilenet", "--json", "--model"])
        .arg(&model)
        .output()
        .unwrap();
    let summary = stdout_json(&output);
    assert_eq!(summary["classes"], 4);
    assert_eq!(summary["pool"], 32);
    assert_eq!(summary["input_shape"], serde_json::json!([128, 128, 3]));
    assert_eq!(summary["parameters"], 4 * 48 + 4);
}

#[test]
fn test_unknown_architecture_is_rejected_by_parser() {
    let output = protego()
        .args(["inspect", "--arch", "vgg", "--model", "m.safetensors"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown architecture"));
}
