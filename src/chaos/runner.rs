//! Scenario runner
//!
//! Two execution shapes cover every scenario:
//!
//! - [`run_with_timeout`] / [`run_action`]: one triggering action, optionally
//!   raced against a deadline. On timeout the action future is dropped, which
//!   closes whatever transport it held.
//! - [`run_bounded`]: a driving action and a sampler ticking on their own
//!   cadences inside one task until a fixed duration elapses. Samples can
//!   escalate to WARNING/CRITICAL records when they cross scenario-supplied
//!   thresholds.
//!
//! All three return a [`DiagnosticReport`] and never an error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::Instrument;
use uuid::Uuid;

use super::report::{ActionResult, DiagnosticReport, Metrics};
use super::ScenarioKind;

/// One in-flight run: identity plus the clock the report is timed against
pub struct RunContext {
    kind: ScenarioKind,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl RunContext {
    pub fn start(kind: ScenarioKind) -> Self {
        tracing::warn!(scenario = kind.as_str(), "[CHAOS] Triggering {}...", kind.title());
        Self {
            kind,
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }

    fn span(&self) -> tracing::Span {
        tracing::info_span!("chaos", scenario = self.kind.as_str(), run_id = %self.run_id)
    }

    /// Seal the run into its report and emit it
    pub fn finish(self, result: ActionResult) -> DiagnosticReport {
        let report = DiagnosticReport::new(
            self.kind,
            self.run_id,
            self.started_at,
            self.clock.elapsed(),
            result,
        );
        let _guard = self.span().entered();
        report.emit();
        report
    }
}

/// Run a single action to completion.
pub async fn run_action<F>(kind: ScenarioKind, action: F) -> DiagnosticReport
where
    F: Future<Output = ActionResult>,
{
    let ctx = RunContext::start(kind);
    let result = action.instrument(ctx.span()).await;
    ctx.finish(result)
}

/// Run a single action, abandoning it if `timeout` elapses first.
///
/// `on_timeout` receives the elapsed time and supplies the scenario's own
/// timeout metrics (and logs its timeout record).
pub async fn run_with_timeout<F, T>(
    kind: ScenarioKind,
    timeout: Duration,
    action: F,
    on_timeout: T,
) -> DiagnosticReport
where
    F: Future<Output = ActionResult>,
    T: FnOnce(Duration) -> Metrics,
{
    let ctx = RunContext::start(kind);
    let result = match time::timeout(timeout, action.instrument(ctx.span())).await {
        Ok(result) => result,
        Err(_) => {
            let elapsed = ctx.elapsed();
            let _guard = ctx.span().entered();
            let mut metrics = on_timeout(elapsed);
            metrics.insert("timeoutMs", timeout.as_millis() as u64);
            ActionResult::TimedOut { elapsed, metrics }
        }
    };
    ctx.finish(result)
}

/// Soft/hard limits for threshold escalation, in the sample's level units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub warn: f64,
    pub critical: f64,
}

impl Thresholds {
    /// Every level `level` is above, soft limit first
    pub fn crossed(&self, level: f64) -> Vec<Severity> {
        let mut crossed = Vec::new();
        if level > self.warn {
            crossed.push(Severity::Warning);
        }
        if level > self.critical {
            crossed.push(Severity::Critical);
        }
        crossed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Normal,
    Warning,
    Critical,
}

/// Timing of a bounded run
#[derive(Debug, Clone)]
pub struct BoundedPlan {
    pub duration: Duration,
    pub drive_every: Duration,
    pub sample_every: Duration,
    pub thresholds: Option<Thresholds>,
}

/// One sampler tick
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub elapsed_ms: u64,
    /// Value compared against the thresholds (e.g. usage percent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<f64>,
    #[serde(flatten)]
    pub fields: Metrics,
}

/// Scenario logic plugged into [`run_bounded`]. Owns all per-run state.
pub trait BoundedWorkload: Send {
    /// One step of the driving action
    fn drive(&mut self);

    /// Read the monitored resource
    fn sample(&mut self, elapsed: Duration) -> Sample;

    /// Log a threshold crossing
    fn escalate(&mut self, severity: Severity, sample: &Sample) {
        match severity {
            Severity::Critical => tracing::error!(level = ?sample.level, "[CRITICAL] Threshold exceeded"),
            Severity::Warning => tracing::warn!(level = ?sample.level, "[WARNING] Threshold exceeded"),
            Severity::Normal => {}
        }
    }

    /// Final metrics once the duration elapsed; release held resources here
    fn finish(&mut self, elapsed: Duration, samples: &[Sample]) -> Metrics;
}

/// Run `workload` for `plan.duration`, driving and sampling on their own
/// cadences. Both tickers stop at the deadline; the report is built after.
pub async fn run_bounded<W>(kind: ScenarioKind, plan: BoundedPlan, mut workload: W) -> DiagnosticReport
where
    W: BoundedWorkload,
{
    let ctx = RunContext::start(kind);
    let span = ctx.span();

    let metrics = async {
        let start = Instant::now();
        let deadline = time::sleep(plan.duration);
        tokio::pin!(deadline);

        let mut sampler = time::interval_at(start + plan.sample_every, plan.sample_every);
        sampler.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut driver = time::interval_at(start + plan.drive_every, plan.drive_every);
        driver.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut samples: Vec<Sample> = Vec::new();
        let mut warnings = 0u64;
        let mut criticals = 0u64;
        let mut drives = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = &mut deadline => break,
                _ = sampler.tick() => {
                    let sample = workload.sample(start.elapsed());
                    if let (Some(thresholds), Some(level)) = (plan.thresholds, sample.level) {
                        for severity in thresholds.crossed(level) {
                            match severity {
                                Severity::Critical => criticals += 1,
                                Severity::Warning => warnings += 1,
                                Severity::Normal => {}
                            }
                            workload.escalate(severity, &sample);
                        }
                    }
                    samples.push(sample);
                }
                _ = driver.tick() => {
                    workload.drive();
                    drives += 1;
                }
            }
        }

        let mut metrics = workload.finish(start.elapsed(), &samples);
        metrics.insert("durationMs", plan.duration.as_millis() as u64);
        metrics.insert("drives", drives);
        metrics.insert("samplesTaken", samples.len());
        if plan.thresholds.is_some() {
            metrics.insert("warnings", warnings);
            metrics.insert("criticals", criticals);
        }
        metrics
    }
    .instrument(span)
    .await;

    ctx.finish(ActionResult::Completed(metrics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::{Outcome, ScenarioError};
    use serde_json::json;

    struct Scripted {
        levels: Vec<f64>,
        drives: usize,
        escalations: Vec<Severity>,
        released: bool,
    }

    impl Scripted {
        fn new(levels: Vec<f64>) -> Self {
            Self {
                levels,
                drives: 0,
                escalations: Vec::new(),
                released: false,
            }
        }
    }

    impl BoundedWorkload for Scripted {
        fn drive(&mut self) {
            self.drives += 1;
        }

        fn sample(&mut self, elapsed: Duration) -> Sample {
            let level = if self.levels.is_empty() { 0.0 } else { self.levels.remove(0) };
            Sample {
                elapsed_ms: elapsed.as_millis() as u64,
                level: Some(level),
                fields: Metrics::new().with("drivesSoFar", self.drives),
            }
        }

        fn escalate(&mut self, severity: Severity, _sample: &Sample) {
            if severity != Severity::Normal {
                self.escalations.push(severity);
            }
        }

        fn finish(&mut self, _elapsed: Duration, samples: &[Sample]) -> Metrics {
            self.released = true;
            let elapsed: Vec<u64> = samples.iter().map(|s| s.elapsed_ms).collect();
            let escalations: Vec<String> = self.escalations.iter().map(|s| format!("{:?}", s)).collect();
            Metrics::new()
                .with("sampleTimes", elapsed)
                .with("escalations", escalations)
                .with("released", self.released)
        }
    }

    #[test]
    fn test_threshold_crossings() {
        let t = Thresholds { warn: 80.0, critical: 90.0 };
        assert!(t.crossed(10.0).is_empty());
        assert!(t.crossed(80.0).is_empty());
        assert_eq!(t.crossed(80.5), vec![Severity::Warning]);
        assert_eq!(t.crossed(90.0), vec![Severity::Warning]);
        assert_eq!(t.crossed(93.0), vec![Severity::Warning, Severity::Critical]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_timeout_abandons_slow_action() {
        let report = run_with_timeout(
            ScenarioKind::ApiTimeout,
            Duration::from_millis(3000),
            async {
                time::sleep(Duration::from_secs(10)).await;
                ActionResult::Completed(Metrics::new())
            },
            |elapsed| Metrics::new().with("elapsed", format!("{}ms", elapsed.as_millis())),
        )
        .await;

        assert_eq!(report.outcome, Outcome::TimedOut);
        assert!(report.elapsed_ms >= 3000 && report.elapsed_ms < 3100, "{}", report.elapsed_ms);
        assert_eq!(report.metrics.get_u64("timeoutMs"), Some(3000));
        assert_eq!(report.metrics.get("elapsed"), Some(&json!("3000ms")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_timeout_completes_fast_action() {
        let report = run_with_timeout(
            ScenarioKind::ApiTimeout,
            Duration::from_millis(3000),
            async {
                time::sleep(Duration::from_millis(200)).await;
                ActionResult::Completed(Metrics::new().with("responseTime", 200))
            },
            |_| Metrics::new(),
        )
        .await;

        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(report.metrics.get_u64("responseTime"), Some(200));
        assert!(report.diagnosis.is_none());
    }

    #[tokio::test]
    async fn test_run_action_captures_error() {
        let report = run_action(ScenarioKind::DbFailure, async {
            ActionResult::errored(ScenarioError::Query("boom".into()))
        })
        .await;
        assert_eq!(report.outcome, Outcome::Errored);
        assert_eq!(report.error.unwrap().message, "Query failed: boom");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_bounded_ticks_and_escalates() {
        let plan = BoundedPlan {
            duration: Duration::from_millis(6500),
            drive_every: Duration::from_millis(500),
            sample_every: Duration::from_millis(2000),
            thresholds: Some(Thresholds { warn: 80.0, critical: 90.0 }),
        };
        let report = run_bounded(ScenarioKind::MemoryLeak, plan, Scripted::new(vec![50.0, 85.0, 95.0])).await;

        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(report.metrics.get_u64("samplesTaken"), Some(3));
        assert_eq!(report.metrics.get_u64("drives"), Some(12));
        // 95 crosses both limits and logs both records
        assert_eq!(report.metrics.get_u64("warnings"), Some(2));
        assert_eq!(report.metrics.get_u64("criticals"), Some(1));
        assert_eq!(
            report.metrics.get("escalations"),
            Some(&json!(["Warning", "Warning", "Critical"]))
        );
        assert_eq!(report.metrics.get("released"), Some(&json!(true)));
        assert!(report.elapsed_ms >= 6500);

        let times: Vec<u64> = serde_json::from_value(report.metrics.get("sampleTimes").unwrap().clone()).unwrap();
        assert_eq!(times, vec![2000, 4000, 6000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_bounded_without_thresholds_skips_escalation() {
        let plan = BoundedPlan {
            duration: Duration::from_millis(4100),
            drive_every: Duration::from_millis(1000),
            sample_every: Duration::from_millis(2000),
            thresholds: None,
        };
        let report = run_bounded(ScenarioKind::HighCpu, plan, Scripted::new(vec![99.0, 99.0])).await;
        assert_eq!(report.metrics.get_u64("drives"), Some(4));
        assert!(report.metrics.get("warnings").is_none());
    }
}
