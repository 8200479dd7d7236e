//! High CPU: run blocking math batches on the request executor

use std::hint::black_box;
use std::time::Duration;

use super::timestamp;
use crate::chaos::probe::{ProcessProbe, ProcessSnapshot};
use crate::chaos::report::{DiagnosticReport, Metrics};
use crate::chaos::runner::{run_bounded, BoundedPlan, BoundedWorkload, Sample};
use crate::chaos::ScenarioKind;
use crate::config::HighCpuConfig;

const PROGRESS_EVERY: u64 = 1_000_000;

pub async fn run(settings: &HighCpuConfig) -> DiagnosticReport {
    let plan = BoundedPlan {
        duration: Duration::from_secs(settings.duration_secs),
        drive_every: Duration::from_millis(settings.batch_interval_ms),
        sample_every: Duration::from_millis(settings.sample_interval_ms),
        thresholds: None,
    };
    tracing::info!(
        "   Duration: {}s | Iterations per batch: {}",
        settings.duration_secs,
        settings.iterations
    );
    run_bounded(ScenarioKind::HighCpu, plan, Burn::new(settings.iterations)).await
}

/// Floating point busy work; the result only exists to defeat the optimizer
pub fn cpu_intensive_task(iterations: u64) -> f64 {
    let mut result = 0.0f64;
    for i in 0..iterations {
        let x = i as f64;
        result += x.sqrt() * x.sin() * x.cos();
        if i > 0 && i % PROGRESS_EVERY == 0 {
            tracing::trace!("   Progress: {}/{} iterations", i, iterations);
        }
    }
    result
}

struct Burn {
    iterations: u64,
    batches: u64,
    probe: ProcessProbe,
    baseline: ProcessSnapshot,
}

impl Burn {
    fn new(iterations: u64) -> Self {
        let mut probe = ProcessProbe::new();
        let baseline = probe.snapshot();
        Self {
            iterations,
            batches: 0,
            probe,
            baseline,
        }
    }
}

impl BoundedWorkload for Burn {
    fn drive(&mut self) {
        // Blocks this worker thread for the whole batch
        let result = black_box(cpu_intensive_task(black_box(self.iterations)));
        self.batches += 1;
        tracing::error!(
            timestamp = %timestamp(),
            taskNumber = self.batches,
            result = %format!("{:.2}", result),
            warning = "Blocking event loop",
            "[PERFORMANCE ERROR] CPU-intensive task completed"
        );
    }

    fn sample(&mut self, elapsed: Duration) -> Sample {
        let snapshot = self.probe.snapshot();
        let cpu_time = snapshot.cpu_time_ms.saturating_sub(self.baseline.cpu_time_ms);
        let user_cpu = snapshot.user_cpu_ms.saturating_sub(self.baseline.user_cpu_ms);
        let system_cpu = snapshot.system_cpu_ms.saturating_sub(self.baseline.system_cpu_ms);
        tracing::info!(
            "[CPU USAGE] Elapsed: {:.1}s | Tasks completed: {}",
            elapsed.as_secs_f64(),
            self.batches
        );
        tracing::warn!(
            timestamp = %timestamp(),
            elapsedTime = %format!("{:.1}s", elapsed.as_secs_f64()),
            userCPU = %format!("{:.2}s", user_cpu as f64 / 1000.0),
            systemCPU = %format!("{:.2}s", system_cpu as f64 / 1000.0),
            cpuTime = %format!("{:.2}s", cpu_time as f64 / 1000.0),
            cpuUsage = %format!("{:.1}%", snapshot.cpu_usage_percent),
            tasksCompleted = self.batches,
            "[CPU WARNING] High CPU usage detected"
        );
        Sample {
            elapsed_ms: elapsed.as_millis() as u64,
            level: Some(f64::from(snapshot.cpu_usage_percent)),
            fields: Metrics::new()
                .with("cpuTimeMs", cpu_time)
                .with("userCpuMs", user_cpu)
                .with("systemCpuMs", system_cpu)
                .with("cpuUsagePercent", snapshot.cpu_usage_percent)
                .with("tasksCompleted", self.batches),
        }
    }

    fn finish(&mut self, elapsed: Duration, _samples: &[Sample]) -> Metrics {
        let end = self.probe.snapshot();
        let cpu_time = end.cpu_time_ms.saturating_sub(self.baseline.cpu_time_ms);
        let user_cpu = end.user_cpu_ms.saturating_sub(self.baseline.user_cpu_ms);
        let system_cpu = end.system_cpu_ms.saturating_sub(self.baseline.system_cpu_ms);
        tracing::info!("📊 CPU Load Report:");
        tracing::info!("   Duration: {:.1}s", elapsed.as_secs_f64());
        tracing::info!("   Tasks completed: {}", self.batches);
        tracing::info!("   CPU time: {:.2}s", cpu_time as f64 / 1000.0);

        Metrics::new()
            .with("totalTime", format!("{:.1}s", elapsed.as_secs_f64()))
            .with("totalTimeMs", elapsed.as_millis() as u64)
            .with("batchesCompleted", self.batches)
            .with("iterationsPerBatch", self.iterations)
            .with("cpuTimeMs", cpu_time)
            .with("userCpuMs", user_cpu)
            .with("systemCpuMs", system_cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::Outcome;

    #[test]
    fn test_cpu_task_is_deterministic() {
        assert_eq!(cpu_intensive_task(0), 0.0);
        assert_eq!(cpu_intensive_task(1000), cpu_intensive_task(1000));
    }

    #[test]
    fn test_sample_splits_user_and_system_time() {
        let mut burn = Burn::new(200_000);
        burn.drive();
        let sample = burn.sample(Duration::from_secs(2));

        assert_eq!(sample.elapsed_ms, 2000);
        assert_eq!(sample.fields.get_u64("tasksCompleted"), Some(1));
        let user = sample.fields.get_u64("userCpuMs").unwrap();
        let system = sample.fields.get_u64("systemCpuMs").unwrap();
        let total = sample.fields.get_u64("cpuTimeMs").unwrap();
        // Independent counters, so only a loose bound holds between them
        assert!(user + system <= total + 1000, "{} + {} vs {}", user, system, total);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_follow_cadence() {
        let settings = HighCpuConfig {
            duration_secs: 4,
            iterations: 1000,
            batch_interval_ms: 1000,
            sample_interval_ms: 2000,
        };

        let report = run(&settings).await;

        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(report.metrics.get_u64("batchesCompleted"), Some(3));
        assert_eq!(report.metrics.get_u64("samplesTaken"), Some(1));
        assert_eq!(report.metrics.get_u64("iterationsPerBatch"), Some(1000));
        assert!(report.metrics.get("warnings").is_none());
        assert!(report.metrics.get_u64("userCpuMs").is_some());
        assert!(report.metrics.get_u64("systemCpuMs").is_some());
        // Completion is the fault for this scenario
        assert!(report.diagnosis.is_some());
    }
}
