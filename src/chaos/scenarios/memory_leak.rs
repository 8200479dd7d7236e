//! Memory leak: grow a run-owned accumulator and watch resident memory climb

use std::time::Duration;

use super::timestamp;
use crate::chaos::probe::{format_mib, ProcessProbe, ProcessSnapshot};
use crate::chaos::report::{DiagnosticReport, Metrics};
use crate::chaos::runner::{run_bounded, BoundedPlan, BoundedWorkload, Sample, Severity, Thresholds};
use crate::chaos::ScenarioKind;
use crate::config::MemoryLeakConfig;

const MIB: u64 = 1024 * 1024;

pub async fn run(settings: &MemoryLeakConfig) -> DiagnosticReport {
    let plan = BoundedPlan {
        duration: Duration::from_secs(settings.duration_secs),
        drive_every: Duration::from_millis(settings.leak_interval_ms),
        sample_every: Duration::from_millis(settings.sample_interval_ms),
        thresholds: Some(Thresholds {
            warn: settings.warn_percent,
            critical: settings.critical_percent,
        }),
    };
    run_bounded(ScenarioKind::MemoryLeak, plan, Leak::new(settings)).await
}

/// Accumulator owned by a single run
pub struct Leak {
    chunk_bytes: usize,
    limit_bytes: u64,
    warn_percent: f64,
    critical_percent: f64,
    chunks: Vec<Vec<u8>>,
    chunks_total: u64,
    probe: ProcessProbe,
    baseline: ProcessSnapshot,
}

impl Leak {
    pub fn new(settings: &MemoryLeakConfig) -> Self {
        let mut probe = ProcessProbe::new();
        let baseline = probe.snapshot();
        tracing::info!(
            "   Duration: {}s | Chunk: {} | Interval: {}ms | Initial RSS: {}",
            settings.duration_secs,
            format_mib(settings.chunk_bytes as u64),
            settings.leak_interval_ms,
            format_mib(baseline.rss_bytes)
        );
        Self {
            chunk_bytes: settings.chunk_bytes,
            limit_bytes: settings.memory_limit_mb.saturating_mul(MIB),
            warn_percent: settings.warn_percent,
            critical_percent: settings.critical_percent,
            chunks: Vec::new(),
            chunks_total: 0,
            probe,
            baseline,
        }
    }

    /// Bytes currently held by the accumulator
    pub fn leaked_bytes(&self) -> u64 {
        self.chunks.iter().map(|c| c.len() as u64).sum()
    }

    fn usage_percent(&self, rss_bytes: u64) -> f64 {
        if self.limit_bytes == 0 {
            return 0.0;
        }
        rss_bytes as f64 / self.limit_bytes as f64 * 100.0
    }
}

impl BoundedWorkload for Leak {
    fn drive(&mut self) {
        // Touch every byte so the pages are actually resident
        self.chunks.push(vec![b'x'; self.chunk_bytes]);
        self.chunks_total += 1;
        tracing::debug!("Leaked chunks held: {}", self.chunks.len());
    }

    fn sample(&mut self, elapsed: Duration) -> Sample {
        let snapshot = self.probe.snapshot();
        let usage = self.usage_percent(snapshot.rss_bytes);
        tracing::info!(
            timestamp = %timestamp(),
            heapUsed = %format_mib(snapshot.rss_bytes),
            heapTotal = %format_mib(self.limit_bytes),
            leakedBytes = self.leaked_bytes(),
            "[MEMORY USAGE] Heap: {} / {} ({:.2}%)",
            format_mib(snapshot.rss_bytes),
            format_mib(self.limit_bytes),
            usage
        );
        Sample {
            elapsed_ms: elapsed.as_millis() as u64,
            level: Some(usage),
            fields: Metrics::new()
                .with("heapUsed", snapshot.rss_bytes)
                .with("heapTotal", self.limit_bytes)
                .with("usagePercent", (usage * 100.0).round() / 100.0)
                .with("leakedBytes", self.leaked_bytes())
                .with("chunks", self.chunks.len()),
        }
    }

    fn escalate(&mut self, severity: Severity, sample: &Sample) {
        let heap_used = sample.fields.get("heapUsed").and_then(|v| v.as_u64()).unwrap_or(0);
        let usage = format!("{:.2}%", sample.level.unwrap_or(0.0));
        match severity {
            Severity::Critical => tracing::error!(
                timestamp = %timestamp(),
                heapUsed = %format_mib(heap_used),
                heapTotal = %format_mib(self.limit_bytes),
                usagePercent = %usage,
                "[MEMORY CRITICAL] Heap usage exceeds {}% - OOM risk",
                self.critical_percent
            ),
            Severity::Warning => tracing::warn!(
                timestamp = %timestamp(),
                heapUsed = %format_mib(heap_used),
                heapTotal = %format_mib(self.limit_bytes),
                usagePercent = %usage,
                "[MEMORY WARNING] Heap usage exceeds {}%",
                self.warn_percent
            ),
            Severity::Normal => {}
        }
    }

    fn finish(&mut self, elapsed: Duration, samples: &[Sample]) -> Metrics {
        let end = self.probe.snapshot();
        let leaked = self.leaked_bytes();
        let increase = end.rss_bytes as i64 - self.baseline.rss_bytes as i64;

        tracing::info!("📊 Memory Leak Report:");
        tracing::info!("   Duration: {:.1}s", elapsed.as_secs_f64());
        tracing::info!("   Initial RSS: {}", format_mib(self.baseline.rss_bytes));
        tracing::info!("   Final RSS: {}", format_mib(end.rss_bytes));
        tracing::info!("   Increase: {:.2}MB", increase as f64 / MIB as f64);
        tracing::info!("   Leaked chunks: {}", self.chunks_total);

        // Release the accumulator before the report is built
        self.chunks = Vec::new();

        let history: Vec<Metrics> = samples
            .iter()
            .map(|s| {
                Metrics::new()
                    .with("elapsedMs", s.elapsed_ms)
                    .with("leakedBytes", s.fields.get("leakedBytes"))
                    .with("heapUsed", s.fields.get("heapUsed"))
            })
            .collect();

        Metrics::new()
            .with("startHeapUsed", self.baseline.rss_bytes)
            .with("endHeapUsed", end.rss_bytes)
            .with("heapIncreaseBytes", increase)
            .with("heapIncrease", format!("{:.2}MB", increase as f64 / MIB as f64))
            .with("heapTotal", self.limit_bytes)
            .with("chunksLeaked", self.chunks_total)
            .with("leakedBytes", leaked)
            .with("samples", history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::Outcome;

    fn settings() -> MemoryLeakConfig {
        MemoryLeakConfig {
            duration_secs: 3,
            chunk_bytes: 64 * 1024,
            leak_interval_ms: 500,
            sample_interval_ms: 1000,
            memory_limit_mb: 4096,
            warn_percent: 80.0,
            critical_percent: 90.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaked_bytes_grow_monotonically() {
        let report = run(&settings()).await;

        assert_eq!(report.outcome, Outcome::Completed);
        // 500..2500ms; the 3000ms tick loses to the deadline
        assert_eq!(report.metrics.get_u64("chunksLeaked"), Some(5));
        assert_eq!(report.metrics.get_u64("leakedBytes"), Some(5 * 64 * 1024));
        assert!(report.diagnosis.is_some());

        let samples = report.metrics.get("samples").unwrap().as_array().unwrap();
        assert_eq!(samples.len(), 2);
        let leaked: Vec<u64> = samples.iter().map(|s| s["leakedBytes"].as_u64().unwrap()).collect();
        assert!(leaked.windows(2).all(|w| w[0] <= w[1]), "{:?}", leaked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiny_limit_escalates_every_sample() {
        let mut s = settings();
        s.memory_limit_mb = 1;

        let report = run(&s).await;

        // Above both limits: a WARNING and a CRITICAL record per sample
        assert_eq!(report.metrics.get_u64("criticals"), Some(2));
        assert_eq!(report.metrics.get_u64("warnings"), Some(2));
    }

    #[test]
    fn test_finish_releases_accumulator() {
        let mut leak = Leak::new(&settings());
        leak.drive();
        leak.drive();
        assert_eq!(leak.leaked_bytes(), 2 * 64 * 1024);

        let metrics = leak.finish(Duration::from_secs(1), &[]);
        assert_eq!(leak.leaked_bytes(), 0);
        assert_eq!(metrics.get_u64("chunksLeaked"), Some(2));
    }

    #[test]
    fn test_runs_do_not_share_state() {
        let mut first = Leak::new(&settings());
        first.drive();
        let second = Leak::new(&settings());
        assert_eq!(second.leaked_bytes(), 0);
        assert_eq!(first.leaked_bytes(), 64 * 1024);
    }
}
