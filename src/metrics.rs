// Prometheus metrics for the patient service
//
// Exposed on the /metrics endpoint:
// - Chaos runs by scenario and outcome (counter)
// - Chaos run durations (histogram)
// - Background runs acknowledged (counter)
// - Process resident memory and uptime (gauges)

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

use crate::chaos::{DiagnosticReport, ScenarioKind};

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref CHAOS_RUNS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("chaos_runs_total", "Chaos scenario runs by terminal outcome"),
        &["scenario", "outcome"]
    ).expect("Failed to create chaos runs metric");

    pub static ref CHAOS_RUN_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("chaos_run_duration_seconds", "Chaos scenario run duration in seconds")
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0]),
        &["scenario"]
    ).expect("Failed to create chaos run duration metric");

    pub static ref CHAOS_BACKGROUND_RUNS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("chaos_background_runs_total", "Chaos scenarios started in the background"),
        &["scenario"]
    ).expect("Failed to create background runs metric");

    pub static ref PROCESS_RSS_BYTES: IntGauge = IntGauge::new(
        "process_resident_memory_bytes",
        "Resident memory of the service process"
    ).expect("Failed to create resident memory metric");

    pub static ref UPTIME_SECONDS: Gauge = Gauge::new(
        "patient_uptime_seconds",
        "Service uptime in seconds"
    ).expect("Failed to create uptime metric");
}

fn register<C: prometheus::core::Collector + 'static>(collector: C) -> prometheus::Result<()> {
    match REGISTRY.register(Box::new(collector)) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Register all collectors. Safe to call more than once.
pub fn init() -> prometheus::Result<()> {
    register(CHAOS_RUNS_TOTAL.clone())?;
    register(CHAOS_RUN_DURATION_SECONDS.clone())?;
    register(CHAOS_BACKGROUND_RUNS_TOTAL.clone())?;
    register(PROCESS_RSS_BYTES.clone())?;
    register(UPTIME_SECONDS.clone())?;
    Ok(())
}

/// Count a finished run
pub fn record_run(report: &DiagnosticReport) {
    CHAOS_RUNS_TOTAL
        .with_label_values(&[report.scenario.as_str(), report.outcome.as_str()])
        .inc();
    CHAOS_RUN_DURATION_SECONDS
        .with_label_values(&[report.scenario.as_str()])
        .observe(report.elapsed_ms as f64 / 1000.0);
}

pub fn record_background(kind: ScenarioKind) {
    CHAOS_BACKGROUND_RUNS_TOTAL.with_label_values(&[kind.as_str()]).inc();
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::{ActionResult, Metrics};
    use chrono::Utc;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn test_init_is_idempotent() {
        init().unwrap();
        init().unwrap();
    }

    #[test]
    fn test_record_run_counts_outcome() {
        init().unwrap();
        let report = DiagnosticReport::new(
            ScenarioKind::DbFailure,
            Uuid::new_v4(),
            Utc::now(),
            Duration::from_millis(1500),
            ActionResult::Completed(Metrics::new()),
        );
        let counter = CHAOS_RUNS_TOTAL.with_label_values(&["db-fail", "completed"]);
        let before = counter.get();

        record_run(&report);

        assert_eq!(counter.get(), before + 1);
        let text = gather_metrics().unwrap();
        assert!(text.contains("chaos_runs_total"));
        assert!(text.contains("chaos_run_duration_seconds"));
    }

    #[test]
    fn test_record_background() {
        let counter = CHAOS_BACKGROUND_RUNS_TOTAL.with_label_values(&["db-fail"]);
        let before = counter.get();
        record_background(ScenarioKind::DbFailure);
        assert_eq!(counter.get(), before + 1);
    }
}
