//! End-to-end runs of the supervisor against the simulated engine.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use trainwatch_core::{
    parse_event_line, ErrorKind, Event, GpuBackend, GpuReading, JsonLineSink, MemorySink, RunContext, Supervisor,
    SupervisorError, SupervisorSettings,
};
use trainwatch_engine::{
    Device, EngineResult, Predictor, RunResult, SimulatedEngine, TrainConfig, TrainingCallbacks, TrainingEngine,
    ValidationMetrics,
};

struct FakeGpu;

impl GpuBackend for FakeGpu {
    fn device_name(&self) -> String {
        "Fake GPU 24GB".to_string()
    }

    fn sample(&self) -> Option<GpuReading> {
        Some(GpuReading {
            memory_used_mb: Some(12000.0),
            memory_total_mb: Some(24000.0),
            utilization_percent: Some(75.0),
            temperature_c: Some(61.0),
            power_draw_w: None,
            power_limit_w: Some(350.0),
        })
    }
}

fn write_dataset(root: &Path, val_images: usize) -> PathBuf {
    for (split, count) in [("train", 4), ("val", val_images)] {
        let dir = root.join("data/images").join(split);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..count {
            image::RgbImage::from_pixel(48, 32, image::Rgb([90, 90, 90]))
                .save(dir.join(format!("{split}_{i}.png")))
                .unwrap();
        }
    }
    let config = root.join("data.yaml");
    std::fs::write(
        &config,
        "path: data\ntrain: images/train\nval: images/val\ntest: images/val\nnames:\n  0: person\nkpt_shape: [3, 3]\n",
    )
    .unwrap();
    config
}

fn train_config(root: &Path, data: PathBuf, epochs: u32) -> TrainConfig {
    TrainConfig {
        data,
        epochs,
        project: root.join("runs"),
        name: "it".to_string(),
        device: Device::Cuda(0),
        ..TrainConfig::default()
    }
}

fn fast_settings() -> SupervisorSettings {
    let mut settings = SupervisorSettings::default();
    settings.liveness.enabled = false;
    settings.telemetry.interval_secs = 0.01;
    settings.visual.every_n_epochs = 2;
    settings.benchmark.warmup = 1;
    settings.benchmark.num_runs = 5;
    settings.benchmark.batch_sizes = vec![1, 4];
    settings.benchmark.throughput_warmup = 1;
    settings.benchmark.throughput_runs = 2;
    settings
}

fn deterministic_kinds(sink: &MemorySink) -> Vec<&'static str> {
    sink.kinds().into_iter().filter(|k| *k != "gpu_warning").collect()
}

#[tokio::test]
async fn test_successful_run_event_sequence() {
    let temp = TempDir::new().unwrap();
    let data = write_dataset(temp.path(), 5);
    let mut settings = fast_settings();
    settings.export.formats = vec!["onnx".to_string(), "coreml".to_string()];

    let sink = Arc::new(MemorySink::new());
    let ctx = RunContext::new(sink.clone());
    let engine = Arc::new(SimulatedEngine::default().failing_export("coreml"));
    let summary = Supervisor::new(engine, train_config(temp.path(), data, 4), settings, ctx.clone())
        .with_gpu_backend(Some(Arc::new(FakeGpu)))
        .run()
        .await
        .unwrap();

    assert_eq!(
        deterministic_kinds(&sink),
        vec![
            "validation_passed",
            "hardware_check",
            "training_start",
            "epoch_end",
            "epoch_end",
            "visualization",
            "epoch_end",
            "epoch_end",
            "visualization",
            "validation_complete",
            "export_complete",
            "export_failed",
            "performance_benchmark",
            "gpu_summary",
            "training_complete",
        ]
    );

    assert_eq!(summary.run_id, ctx.run_id());
    assert_eq!(summary.result.epochs_completed, 4);
    assert!(!summary.result.stopped_early);
    assert!(summary.validation.is_some());
    assert_eq!(summary.exports.len(), 1);
    assert_eq!(summary.exports[0].format, "onnx");
    assert_eq!(summary.exports[0].sha256.len(), 64);
    assert!(summary.benchmark.is_some());
    assert!(summary.telemetry.available);
    assert!(summary.telemetry.sample_count > 0);

    let events = sink.events();
    let hardware = events.iter().find_map(|e| match e {
        Event::HardwareCheck(report) => Some(report.clone()),
        _ => None,
    });
    let hardware = hardware.unwrap();
    assert!(hardware.gpu_available);
    assert_eq!(hardware.gpu_name.as_deref(), Some("Fake GPU 24GB"));

    match events.last().unwrap() {
        Event::TrainingComplete { run_id, best_weights, epochs_completed, .. } => {
            assert_eq!(run_id, ctx.run_id());
            assert!(best_weights.as_ref().unwrap().ends_with("weights/best.pt"));
            assert_eq!(*epochs_completed, 4);
        }
        other => panic!("unexpected {other:?}"),
    }

    let vis_dir = temp.path().join("runs/it/visualizations");
    assert!(vis_dir.join("epoch_002_high_0.jpg").is_file());
    assert!(vis_dir.join("epoch_004_low_2.jpg").is_file());
}

#[tokio::test]
async fn test_preflight_failure_starts_nothing() {
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("data.yaml");
    std::fs::write(&data, "path: data\nval: images/val\n").unwrap();

    let sink = Arc::new(MemorySink::new());
    let config = train_config(temp.path(), data, 3);
    let err = Supervisor::new(Arc::new(SimulatedEngine::default()), config, fast_settings(), RunContext::new(sink.clone()))
        .with_gpu_backend(None)
        .run()
        .await
        .unwrap_err();

    match err {
        SupervisorError::PreflightFailed { issues } => assert!(issues.iter().any(|i| i.contains("train"))),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(sink.kinds(), vec!["validation_failed"]);
    assert!(!temp.path().join("runs").exists());
}

#[tokio::test]
async fn test_training_failure_is_classified() {
    let temp = TempDir::new().unwrap();
    let data = write_dataset(temp.path(), 2);
    let engine = SimulatedEngine::default()
        .failing_at_epoch(2, "RuntimeError: CUDA out of memory. Tried to allocate 2.00 GiB");

    let sink = Arc::new(MemorySink::new());
    let err = Supervisor::new(Arc::new(engine), train_config(temp.path(), data, 5), fast_settings(), RunContext::new(sink.clone()))
        .with_gpu_backend(None)
        .run()
        .await
        .unwrap_err();

    match err {
        SupervisorError::TrainingFailed { classification } => assert_eq!(classification.kind, ErrorKind::Oom),
        other => panic!("unexpected {other:?}"),
    }
    let kinds = deterministic_kinds(&sink);
    assert_eq!(kinds.last(), Some(&"error"));
    assert!(!kinds.contains(&"training_complete"));
    assert!(!kinds.contains(&"gpu_summary"));
}

/// Engine whose training loop dies with a panic instead of an error value.
struct PanickingEngine(SimulatedEngine);

impl TrainingEngine for PanickingEngine {
    fn id(&self) -> &'static str {
        "panicking"
    }

    fn train(&self, _config: &TrainConfig, _callbacks: &dyn TrainingCallbacks) -> EngineResult<RunResult> {
        panic!("CUDA error: an illegal memory access was encountered");
    }

    fn validate(&self, config: &TrainConfig) -> EngineResult<ValidationMetrics> {
        self.0.validate(config)
    }

    fn export(&self, format: &str) -> EngineResult<PathBuf> {
        self.0.export(format)
    }

    fn predictor(&self) -> Arc<dyn Predictor> {
        self.0.predictor()
    }
}

#[tokio::test]
async fn test_training_panic_is_classified() {
    let temp = TempDir::new().unwrap();
    let data = write_dataset(temp.path(), 2);

    let sink = Arc::new(MemorySink::new());
    let engine = Arc::new(PanickingEngine(SimulatedEngine::default()));
    let err = Supervisor::new(engine, train_config(temp.path(), data, 3), fast_settings(), RunContext::new(sink.clone()))
        .with_gpu_backend(None)
        .run()
        .await
        .unwrap_err();

    match err {
        SupervisorError::TrainingFailed { classification } => {
            assert_eq!(classification.kind, ErrorKind::Hardware);
            assert!(classification.raw_excerpt.contains("illegal memory access"));
        }
        other => panic!("unexpected {other:?}"),
    }
    match sink.events().last().unwrap() {
        Event::Error(classification) => assert_eq!(classification.kind, ErrorKind::Hardware),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_resume_after_interrupted_run() {
    let temp = TempDir::new().unwrap();
    let data = write_dataset(temp.path(), 2);
    let engine = Arc::new(SimulatedEngine::default());
    let mut settings = fast_settings();
    settings.benchmark.enabled = false;

    let interrupted = RunContext::new(Arc::new(MemorySink::new()));
    interrupted.request_stop("interrupt");
    let first = Supervisor::new(engine.clone(), train_config(temp.path(), data.clone(), 4), settings.clone(), interrupted)
        .with_gpu_backend(None)
        .run()
        .await
        .unwrap();
    assert_eq!(first.result.epochs_completed, 1);
    assert!(first.result.stopped_early);

    let sink = Arc::new(MemorySink::new());
    let config = TrainConfig { resume: true, ..train_config(temp.path(), data, 4) };
    let second = Supervisor::new(engine, config, settings, RunContext::new(sink.clone()))
        .with_gpu_backend(None)
        .run()
        .await
        .unwrap();
    assert_eq!(second.result.epochs_completed, 4);

    let events = sink.events();
    let resume = events.iter().find_map(|e| match e {
        Event::ResumeDetected { last_epoch, best_epoch, metrics, .. } => Some((*last_epoch, *best_epoch, metrics.len())),
        _ => None,
    });
    assert_eq!(resume, Some((Some(1), Some(1), 4)));
    let start_epoch = events.iter().find_map(|e| match e {
        Event::TrainingStart { start_epoch, .. } => Some(*start_epoch),
        _ => None,
    });
    assert_eq!(start_epoch, Some(2));
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_event_stream_lines_parse_back() {
    let temp = TempDir::new().unwrap();
    let data = write_dataset(temp.path(), 4);
    let buf = SharedBuf::default();
    let mut settings = fast_settings();
    settings.export.formats = vec!["torchscript".to_string()];

    Supervisor::new(
        Arc::new(SimulatedEngine::default()),
        train_config(temp.path(), data, 2),
        settings,
        RunContext::new(Arc::new(JsonLineSink::new(buf.clone()))),
    )
    .with_gpu_backend(Some(Arc::new(FakeGpu)))
    .run()
    .await
    .unwrap();

    let output = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
    let lines: Vec<&str> = output.lines().collect();
    assert!(lines.len() >= 8);
    let events: Vec<Event> = lines.iter().map(|line| parse_event_line(line).expect(line)).collect();
    assert_eq!(events.first().map(Event::kind), Some("validation_passed"));
    assert_eq!(events.last().map(Event::kind), Some("training_complete"));
    assert!(events.iter().any(|e| e.kind() == "performance_benchmark"));
}
