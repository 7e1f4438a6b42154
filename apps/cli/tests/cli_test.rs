//! Integration tests for the `trainwatch` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;
use trainwatch_core::{parse_event_line, Event};

const FAST_SETTINGS: &str = r"
[liveness]
enabled = false

[telemetry]
interval_secs = 0.05

[benchmark]
warmup = 1
num_runs = 3
batch_sizes = [1, 2]
throughput_warmup = 1
throughput_runs = 1

[visual]
every_n_epochs = 1

[preflight]
min_images_per_split = 1
";

fn write_workspace(root: &Path) {
    for split in ["train", "val"] {
        let dir = root.join("data/images").join(split);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..4 {
            image::RgbImage::from_pixel(40, 40, image::Rgb([120, 80, 40]))
                .save(dir.join(format!("{split}_{i}.png")))
                .unwrap();
        }
    }
    std::fs::write(
        root.join("data.yaml"),
        "path: data\ntrain: images/train\nval: images/val\ntest: images/val\nnames:\n  0: person\nkpt_shape: [3, 3]\n",
    )
    .unwrap();
    std::fs::write(root.join("trainwatch.toml"), FAST_SETTINGS).unwrap();
}

fn trainwatch(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("trainwatch").unwrap();
    cmd.current_dir(dir).env_remove("RUST_LOG");
    cmd
}

fn events(stdout: &[u8]) -> Vec<Event> {
    String::from_utf8_lossy(stdout).lines().filter_map(parse_event_line).collect()
}

#[test]
fn test_help_lists_commands() {
    let temp = TempDir::new().unwrap();
    trainwatch(temp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run").and(predicate::str::contains("check")));
}

#[test]
fn test_classify_json() {
    let temp = TempDir::new().unwrap();
    trainwatch(temp.path())
        .args(["classify", "RuntimeError: CUDA out of memory. Tried to allocate 20.00 MiB", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"kind\": \"oom\""));
}

#[test]
fn test_classify_unknown_message() {
    let temp = TempDir::new().unwrap();
    trainwatch(temp.path())
        .args(["classify", "--json", "something odd happened"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"kind\": \"unknown\""));
}

#[test]
fn test_check_passes_on_valid_dataset() {
    let temp = TempDir::new().unwrap();
    write_workspace(temp.path());

    let output = trainwatch(temp.path()).args(["check", "--json"]).output().unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["gate"], "pass");
    assert_eq!(report["checks"]["config_exists"], true);
    assert_eq!(report["checks"]["train_images"], true);
}

#[test]
fn test_check_missing_config_exits_2() {
    let temp = TempDir::new().unwrap();
    trainwatch(temp.path())
        .args(["check", "--data", "missing.yaml"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("config_exists"));
}

#[test]
fn test_run_emits_ordered_event_stream() {
    let temp = TempDir::new().unwrap();
    write_workspace(temp.path());

    let output = trainwatch(temp.path())
        .args(["run", "--epochs", "2", "--device", "cpu", "--name", "cli", "--export", "onnx"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let events = events(&output.stdout);
    let kinds: Vec<_> = events.iter().map(Event::kind).collect();
    assert_eq!(kinds.first(), Some(&"validation_passed"));
    assert_eq!(kinds.last(), Some(&"training_complete"));
    assert_eq!(kinds.iter().filter(|k| **k == "epoch_end").count(), 2);
    for kind in ["hardware_check", "training_start", "validation_complete", "export_complete", "performance_benchmark", "gpu_summary"] {
        assert!(kinds.contains(&kind), "missing {kind} in {kinds:?}");
    }

    // Tracing stays off stdout.
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.lines().all(|line| line.starts_with("__JSON_LOG__")));
    assert!(temp.path().join("runs/cli/weights/last.pt").is_file());
}

#[test]
fn test_run_skips_benchmark_when_asked() {
    let temp = TempDir::new().unwrap();
    write_workspace(temp.path());

    let output = trainwatch(temp.path())
        .args(["run", "--epochs", "1", "--device", "cpu", "--no-benchmark", "--no-visualization"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let kinds: Vec<_> = events(&output.stdout).iter().map(Event::kind).collect();
    assert!(!kinds.contains(&"performance_benchmark"));
    assert!(!kinds.contains(&"visualization"));
    assert!(kinds.contains(&"training_complete"));
}

#[test]
fn test_run_preflight_failure_exits_2() {
    let temp = TempDir::new().unwrap();
    write_workspace(temp.path());
    std::fs::write(temp.path().join("bad.yaml"), "path: data\nval: images/val\n").unwrap();

    let output = trainwatch(temp.path()).args(["run", "--data", "bad.yaml", "--device", "cpu"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let kinds: Vec<_> = events(&output.stdout).iter().map(Event::kind).collect();
    assert_eq!(kinds, vec!["validation_failed"]);
    assert!(!temp.path().join("runs").exists());
}

#[test]
fn test_run_rejects_bad_image_size() {
    let temp = TempDir::new().unwrap();
    write_workspace(temp.path());

    trainwatch(temp.path())
        .args(["run", "--imgsz", "100", "--device", "cpu"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("validation_failed"));
}

#[test]
fn test_resume_reports_prior_run() {
    let temp = TempDir::new().unwrap();
    write_workspace(temp.path());

    trainwatch(temp.path())
        .args(["resume", "--name", "later"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"available\": false"));

    trainwatch(temp.path())
        .args(["run", "--epochs", "2", "--device", "cpu", "--name", "later", "--no-benchmark"])
        .assert()
        .success();

    let output = trainwatch(temp.path()).args(["resume", "--name", "later"]).output().unwrap();
    assert!(output.status.success());
    let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(info["available"], true);
    assert_eq!(info["last_epoch"], 2);
    let augmentation = &info["saved_config"]["augmentation"];
    assert_eq!(augmentation["degrees"], 180.0);
    assert_eq!(augmentation["flipud"], 0.5);
}

#[test]
fn test_run_records_augmentation_from_settings() {
    let temp = TempDir::new().unwrap();
    write_workspace(temp.path());
    let settings = format!("{FAST_SETTINGS}\n[train.augmentation]\ndegrees = 30.0\n");
    std::fs::write(temp.path().join("custom.toml"), settings).unwrap();

    trainwatch(temp.path())
        .args(["--settings", "custom.toml", "run", "--epochs", "1", "--device", "cpu", "--name", "aug", "--no-benchmark"])
        .assert()
        .success();

    let output = trainwatch(temp.path()).args(["resume", "--name", "aug"]).output().unwrap();
    let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(info["saved_config"]["augmentation"]["degrees"], 30.0);
    assert_eq!(info["saved_config"]["augmentation"]["flipud"], 0.5);
}

#[test]
fn test_check_warns_on_small_splits_by_default() {
    let temp = TempDir::new().unwrap();
    write_workspace(temp.path());
    std::fs::remove_file(temp.path().join("trainwatch.toml")).unwrap();

    let output = trainwatch(temp.path()).args(["check", "--json"]).output().unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["gate"], "pass_with_warnings");
    let warnings = report["warnings"].as_array().unwrap();
    assert!(warnings.iter().any(|w| w.as_str().unwrap().contains("Only 4 images in train split")));
}

#[test]
fn test_unknown_engine_fails() {
    let temp = TempDir::new().unwrap();
    write_workspace(temp.path());

    trainwatch(temp.path())
        .args(["run", "--engine", "nope"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("nope"));
}

#[test]
fn test_invalid_settings_file_fails() {
    let temp = TempDir::new().unwrap();
    write_workspace(temp.path());
    std::fs::write(temp.path().join("broken.toml"), "[telemetry]\ninterval_secs = -1\n").unwrap();

    trainwatch(temp.path())
        .args(["--settings", "broken.toml", "check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("interval_secs"));
}

#[test]
fn test_gpu_sample_always_reports() {
    let temp = TempDir::new().unwrap();
    trainwatch(temp.path())
        .args(["gpu", "--device", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("memory_percent").and(predicate::str::contains("\"available\"")));
}
