//! Latency and throughput measurement against the trained model.
//!
//! Every timed call is bracketed by `synchronize()` so queued device work is
//! charged to the run that queued it.

use crate::settings::BenchmarkSettings;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};
use trainwatch_engine::{EngineResult, PredictInput, Predictor, StageTimings};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub mean_ms: f64,
    pub std_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_breakdown: Option<StageTimings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThroughputOutcome {
    Measured { avg_time_ms: f64, fps: f64, fps_per_image: f64 },
    Failed { error: String },
}

/// One batch size of the throughput sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputEntry {
    pub batch_size: u32,
    #[serde(flatten)]
    pub outcome: ThroughputOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub imgsz: u32,
    pub num_runs: u32,
    pub latency: LatencyStats,
    /// In sweep order.
    pub throughput: Vec<ThroughputEntry>,
    pub realtime_fps: f64,
    pub meets_realtime: bool,
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Summary statistics over raw per-run latencies in milliseconds.
#[must_use]
pub fn summarize_latency(mut samples_ms: Vec<f64>) -> LatencyStats {
    if samples_ms.is_empty() {
        return LatencyStats::default();
    }
    samples_ms.sort_by(f64::total_cmp);
    let n = samples_ms.len() as f64;
    let mean = samples_ms.iter().sum::<f64>() / n;
    let variance = samples_ms.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    LatencyStats {
        mean_ms: mean,
        std_ms: variance.sqrt(),
        min_ms: samples_ms[0],
        max_ms: samples_ms[samples_ms.len() - 1],
        p50_ms: percentile(&samples_ms, 0.50),
        p95_ms: percentile(&samples_ms, 0.95),
        p99_ms: percentile(&samples_ms, 0.99),
        stage_breakdown: None,
    }
}

fn mean_stages(stages: &[StageTimings]) -> Option<StageTimings> {
    if stages.is_empty() {
        return None;
    }
    let n = stages.len() as f64;
    let sum = stages.iter().fold(StageTimings::default(), |acc, s| StageTimings {
        preprocess: acc.preprocess + s.preprocess,
        inference: acc.inference + s.inference,
        postprocess: acc.postprocess + s.postprocess,
    });
    Some(StageTimings { preprocess: sum.preprocess / n, inference: sum.inference / n, postprocess: sum.postprocess / n })
}

/// Whether a mean latency sustains `target_fps`.
#[must_use]
pub fn meets_realtime(mean_ms: f64, target_fps: f64) -> bool {
    mean_ms > 0.0 && 1000.0 / mean_ms >= target_fps
}

pub struct Benchmark<'a> {
    predictor: &'a dyn Predictor,
    imgsz: u32,
    settings: &'a BenchmarkSettings,
}

impl<'a> Benchmark<'a> {
    #[must_use]
    pub fn new(predictor: &'a dyn Predictor, imgsz: u32, settings: &'a BenchmarkSettings) -> Self {
        Self { predictor, imgsz, settings }
    }

    fn timed(&self, input: &PredictInput) -> EngineResult<(f64, Option<StageTimings>)> {
        self.predictor.synchronize();
        let started = Instant::now();
        let results = self.predictor.predict(input)?;
        self.predictor.synchronize();
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        Ok((elapsed_ms, results.first().and_then(|r| r.speed)))
    }

    /// Single-image latency. Any failed call fails the measurement.
    pub fn measure_latency(&self) -> EngineResult<LatencyStats> {
        let input = PredictInput::Synthetic { batch: 1, imgsz: self.imgsz };
        for _ in 0..self.settings.warmup {
            self.predictor.predict(&input)?;
        }

        let runs = self.settings.num_runs.max(1) as usize;
        let mut samples = Vec::with_capacity(runs);
        let mut stages = Vec::with_capacity(runs);
        for _ in 0..runs {
            let (ms, speed) = self.timed(&input)?;
            samples.push(ms);
            stages.extend(speed);
        }

        let mut stats = summarize_latency(samples);
        stats.stage_breakdown = mean_stages(&stages);
        Ok(stats)
    }

    fn measure_batch(&self, batch: u32) -> EngineResult<ThroughputOutcome> {
        let input = PredictInput::Synthetic { batch: batch as usize, imgsz: self.imgsz };
        for _ in 0..self.settings.throughput_warmup {
            self.predictor.predict(&input)?;
        }
        let runs = self.settings.throughput_runs.max(1);
        let mut total_ms = 0.0;
        for _ in 0..runs {
            total_ms += self.timed(&input)?.0;
        }
        let avg_time_ms = total_ms / f64::from(runs);
        let fps = if avg_time_ms > 0.0 { f64::from(batch) / (avg_time_ms / 1000.0) } else { 0.0 };
        Ok(ThroughputOutcome::Measured { avg_time_ms, fps, fps_per_image: fps / f64::from(batch) })
    }

    /// Sweeps the configured batch sizes. A failing size is recorded and the
    /// sweep moves on.
    #[must_use]
    pub fn measure_throughput(&self) -> Vec<ThroughputEntry> {
        self.settings
            .batch_sizes
            .iter()
            .map(|&batch| {
                let outcome = self.measure_batch(batch).unwrap_or_else(|e| {
                    warn!(batch, error = %e, "throughput measurement failed");
                    ThroughputOutcome::Failed { error: e.to_string() }
                });
                ThroughputEntry { batch_size: batch, outcome }
            })
            .collect()
    }

    pub fn run(&self) -> EngineResult<BenchmarkResult> {
        let latency = self.measure_latency()?;
        let throughput = self.measure_throughput();
        let meets = meets_realtime(latency.mean_ms, self.settings.realtime_fps);
        info!(
            mean_ms = latency.mean_ms,
            p95_ms = latency.p95_ms,
            meets_realtime = meets,
            "benchmark complete"
        );
        Ok(BenchmarkResult {
            imgsz: self.imgsz,
            num_runs: self.settings.num_runs,
            latency,
            throughput,
            realtime_fps: self.settings.realtime_fps,
            meets_realtime: meets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use trainwatch_engine::{DetectionResult, EngineError, SimulatedEngine, TrainingEngine};

    fn quick_settings() -> BenchmarkSettings {
        BenchmarkSettings {
            warmup: 1,
            num_runs: 5,
            batch_sizes: vec![1, 4],
            throughput_warmup: 1,
            throughput_runs: 2,
            ..BenchmarkSettings::default()
        }
    }

    #[test]
    fn test_percentiles_are_ordered() {
        let samples: Vec<f64> = (0..137).map(|i| f64::from((i * 7919) % 101) + 0.5).collect();
        let stats = summarize_latency(samples);
        assert!(stats.min_ms <= stats.p50_ms);
        assert!(stats.p50_ms <= stats.p95_ms);
        assert!(stats.p95_ms <= stats.p99_ms);
        assert!(stats.p99_ms <= stats.max_ms);
    }

    #[test]
    fn test_population_stddev() {
        let stats = summarize_latency(vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(stats.mean_ms, 5.0);
        assert_eq!(stats.std_ms, 2.0);
        assert_eq!(stats.min_ms, 2.0);
        assert_eq!(stats.max_ms, 9.0);
    }

    #[test]
    fn test_empty_samples_are_zero() {
        assert_eq!(summarize_latency(Vec::new()), LatencyStats::default());
    }

    #[test]
    fn test_realtime_threshold() {
        assert!(meets_realtime(40.0, 25.0));
        assert!(!meets_realtime(41.0, 25.0));
        assert!(meets_realtime(33.0, 30.0));
        assert!(!meets_realtime(0.0, 25.0));
    }

    struct CountingPredictor {
        syncs: AtomicU32,
        delay: Duration,
    }

    impl Predictor for CountingPredictor {
        fn predict(&self, input: &PredictInput) -> EngineResult<Vec<DetectionResult>> {
            std::thread::sleep(self.delay);
            Ok(vec![DetectionResult::default(); input.batch_size()])
        }

        fn synchronize(&self) {
            self.syncs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_synchronizes_around_every_timed_run() {
        let predictor = CountingPredictor { syncs: AtomicU32::new(0), delay: Duration::ZERO };
        let settings = BenchmarkSettings { batch_sizes: Vec::new(), ..quick_settings() };
        Benchmark::new(&predictor, 320, &settings).measure_latency().unwrap();
        assert_eq!(predictor.syncs.load(Ordering::SeqCst), 2 * 5);
    }

    #[test]
    fn test_slow_model_misses_realtime() {
        let predictor = CountingPredictor { syncs: AtomicU32::new(0), delay: Duration::from_millis(50) };
        let settings = BenchmarkSettings {
            warmup: 0,
            num_runs: 3,
            batch_sizes: vec![2],
            throughput_warmup: 0,
            throughput_runs: 1,
            ..BenchmarkSettings::default()
        };
        let result = Benchmark::new(&predictor, 640, &settings).run().unwrap();
        assert!(result.latency.mean_ms >= 50.0);
        assert!(!result.meets_realtime);
        assert_eq!(result.throughput[0].batch_size, 2);
        match &result.throughput[0].outcome {
            ThroughputOutcome::Measured { fps, fps_per_image, .. } => {
                assert!((fps_per_image * 2.0 - fps).abs() < 1e-9);
            }
            ThroughputOutcome::Failed { error } => panic!("unexpected failure: {error}"),
        }
    }

    #[test]
    fn test_failing_batch_size_does_not_abort_sweep() {
        let predictor = SimulatedEngine::default().with_max_batch(4).predictor();
        let settings = BenchmarkSettings { batch_sizes: vec![1, 8, 4], ..quick_settings() };
        let result = Benchmark::new(predictor.as_ref(), 640, &settings).run().unwrap();

        let batches: Vec<u32> = result.throughput.iter().map(|t| t.batch_size).collect();
        assert_eq!(batches, vec![1, 8, 4]);
        assert!(matches!(result.throughput[0].outcome, ThroughputOutcome::Measured { .. }));
        assert!(matches!(result.throughput[2].outcome, ThroughputOutcome::Measured { .. }));
        match &result.throughput[1].outcome {
            ThroughputOutcome::Failed { error } => assert!(error.contains("out of memory")),
            ThroughputOutcome::Measured { .. } => panic!("batch 8 should fail"),
        }
        let stages = result.latency.stage_breakdown.unwrap();
        assert_eq!(stages.inference, 4.0);
    }

    #[test]
    fn test_latency_failure_propagates() {
        struct Broken;
        impl Predictor for Broken {
            fn predict(&self, _input: &PredictInput) -> EngineResult<Vec<DetectionResult>> {
                Err(EngineError::Prediction("model not loaded".to_string()))
            }
        }
        let settings = quick_settings();
        assert!(Benchmark::new(&Broken, 640, &settings).run().is_err());
    }

    #[test]
    fn test_throughput_entries_flatten_outcome() {
        let predictor = SimulatedEngine::default().with_max_batch(1).predictor();
        let settings = quick_settings();
        let result = Benchmark::new(predictor.as_ref(), 640, &settings).run().unwrap();
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["throughput"][0]["batch_size"], 1);
        assert!(value["throughput"][0]["fps"].as_f64().is_some());
        assert_eq!(value["throughput"][1]["batch_size"], 4);
        assert!(value["throughput"][1]["error"].as_str().is_some());

        let back: BenchmarkResult = serde_json::from_value(value).unwrap();
        assert!(matches!(back.throughput[0].outcome, ThroughputOutcome::Measured { .. }));
        assert!(matches!(back.throughput[1].outcome, ThroughputOutcome::Failed { .. }));
    }
}
