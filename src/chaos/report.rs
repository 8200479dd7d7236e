//! Diagnostic reports
//!
//! A [`DiagnosticReport`] is built exactly once per run, after the triggering
//! action reached a terminal state. There is no partial or streaming form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use super::error::{FaultClass, ScenarioError};
use super::ScenarioKind;
use crate::metrics;

/// Scenario-specific key/value payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metrics(BTreeMap<String, Value>);

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.0.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Integer metric lookup, mostly for tests and summaries
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn merge(&mut self, other: Metrics) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

/// Terminal state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Completed,
    TimedOut,
    Errored,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::TimedOut => "timed-out",
            Outcome::Errored => "errored",
        }
    }
}

/// What a scenario action produced
#[derive(Debug, Clone)]
pub enum ActionResult {
    Completed(Metrics),
    TimedOut { elapsed: Duration, metrics: Metrics },
    Errored { error: ScenarioError, metrics: Metrics },
}

impl ActionResult {
    pub fn errored(error: ScenarioError) -> Self {
        ActionResult::Errored {
            error,
            metrics: Metrics::new(),
        }
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            ActionResult::Completed(_) => Outcome::Completed,
            ActionResult::TimedOut { .. } => Outcome::TimedOut,
            ActionResult::Errored { .. } => Outcome::Errored,
        }
    }

    pub fn metrics_mut(&mut self) -> &mut Metrics {
        match self {
            ActionResult::Completed(metrics)
            | ActionResult::TimedOut { metrics, .. }
            | ActionResult::Errored { metrics, .. } => metrics,
        }
    }
}

/// Remediation attached to a diagnosis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "lowercase")]
pub enum Fix {
    Code(String),
    Infrastructure(String),
    Action(String),
}

impl Fix {
    pub fn detail(&self) -> &str {
        match self {
            Fix::Code(d) | Fix::Infrastructure(d) | Fix::Action(d) => d,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Fix::Code(_) => "Code Fix",
            Fix::Infrastructure(_) => "Terraform Fix",
            Fix::Action(_) => "Action",
        }
    }
}

/// Root cause narrative for a run that exposed its fault
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    pub root_cause: String,
    pub recommendation: String,
    pub fix: Fix,
}

impl Diagnosis {
    pub fn new(root_cause: &str, recommendation: &str, fix: Fix) -> Self {
        Self {
            root_cause: root_cause.to_string(),
            recommendation: recommendation.to_string(),
            fix,
        }
    }
}

/// Error detail carried by an `errored` report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedError {
    pub kind: String,
    pub class: FaultClass,
    pub message: String,
}

/// Structured outcome record produced by a scenario run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    pub scenario: ScenarioKind,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub outcome: Outcome,
    pub metrics: Metrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReportedError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Diagnosis>,
}

impl DiagnosticReport {
    /// Build the report for a finished run.
    ///
    /// A diagnosis is attached when the run exposed its fault: every
    /// `errored`/`timed-out` run, and `completed` runs of scenarios whose
    /// completion is the defect.
    pub fn new(
        scenario: ScenarioKind,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        result: ActionResult,
    ) -> Self {
        let outcome = result.outcome();
        let (metrics, error) = match result {
            ActionResult::Completed(metrics) => (metrics, None),
            ActionResult::TimedOut { elapsed, mut metrics } => {
                metrics.insert("timedOutAfterMs", elapsed.as_millis() as u64);
                (metrics, None)
            }
            ActionResult::Errored { error, metrics } => (
                metrics,
                Some(ReportedError {
                    kind: error.kind().to_string(),
                    class: error.class(),
                    message: error.to_string(),
                }),
            ),
        };

        let faulted = outcome != Outcome::Completed || scenario.fault_on_completion();
        Self {
            scenario,
            run_id,
            started_at,
            elapsed_ms: elapsed.as_millis() as u64,
            outcome,
            metrics,
            error,
            diagnosis: faulted.then(|| scenario.diagnosis()),
        }
    }

    /// Write the final record (and diagnosis, if any) to the log stream and
    /// count the run in the Prometheus registry.
    pub fn emit(&self) {
        tracing::info!(
            timestamp = %Utc::now().to_rfc3339(),
            runId = %self.run_id,
            scenario = self.scenario.as_str(),
            outcome = self.outcome.as_str(),
            elapsedMs = self.elapsed_ms,
            metrics = %self.metrics.to_json_string(),
            "[CHAOS REPORT] {} finished: {}",
            self.scenario.title(),
            self.outcome.as_str()
        );

        if let Some(diagnosis) = &self.diagnosis {
            tracing::error!(
                timestamp = %Utc::now().to_rfc3339(),
                runId = %self.run_id,
                scenario = self.scenario.as_str(),
                rootCause = %diagnosis.root_cause,
                recommendation = %diagnosis.recommendation,
                fix = %diagnosis.fix.detail(),
                "[DIAGNOSIS] Doctor should diagnose - Root Cause: {} | Recommendation: {} | {}: {}",
                diagnosis.root_cause,
                diagnosis.recommendation,
                diagnosis.fix.label(),
                diagnosis.fix.detail()
            );
        }

        metrics::record_run(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report(kind: ScenarioKind, result: ActionResult) -> DiagnosticReport {
        DiagnosticReport::new(kind, Uuid::new_v4(), Utc::now(), Duration::from_millis(1234), result)
    }

    #[test]
    fn test_completed_report_serializes_camel_case() {
        let r = report(
            ScenarioKind::SlowQuery,
            ActionResult::Completed(Metrics::new().with("totalQueries", 101)),
        );
        let value = serde_json::to_value(&r).unwrap();
        assert_eq!(value["scenario"], "slow-query");
        assert_eq!(value["outcome"], "completed");
        assert_eq!(value["elapsedMs"], 1234);
        assert_eq!(value["metrics"]["totalQueries"], 101);
        assert!(value.get("startedAt").is_some());
        assert!(value.get("error").is_none());
        // N+1 completion is itself the defect
        assert_eq!(value["diagnosis"]["fix"]["kind"], "code");
    }

    #[test]
    fn test_errored_report_carries_error_detail() {
        let r = report(
            ScenarioKind::DbFailure,
            ActionResult::Errored {
                error: ScenarioError::Connection {
                    code: "ECONNREFUSED".into(),
                    errno: Some(111),
                    message: "connection refused".into(),
                },
                metrics: Metrics::new().with("port", 3306),
            },
        );
        assert_eq!(r.outcome, Outcome::Errored);
        let error = r.error.as_ref().unwrap();
        assert_eq!(error.kind, "ConnectionError");
        assert_eq!(error.class, FaultClass::Connectivity);
        assert!(r.diagnosis.is_some());
        assert_eq!(r.metrics.get_u64("port"), Some(3306));
    }

    #[test]
    fn test_timed_out_report_records_bound() {
        let r = report(
            ScenarioKind::ApiTimeout,
            ActionResult::TimedOut {
                elapsed: Duration::from_millis(3001),
                metrics: Metrics::new(),
            },
        );
        assert_eq!(serde_json::to_value(r.outcome).unwrap(), json!("timed-out"));
        assert_eq!(r.metrics.get_u64("timedOutAfterMs"), Some(3001));
        assert!(r.diagnosis.is_some());
    }

    #[test]
    fn test_unexpected_success_has_no_diagnosis() {
        let r = report(ScenarioKind::JwtExpiry, ActionResult::Completed(Metrics::new()));
        assert!(r.diagnosis.is_none());
        let value = serde_json::to_value(&r).unwrap();
        assert!(value.get("diagnosis").is_none());
    }

    #[test]
    fn test_metrics_merge_overwrites() {
        let mut a = Metrics::new().with("x", 1).with("y", "a");
        a.merge(Metrics::new().with("y", "b"));
        assert_eq!(a.get_u64("x"), Some(1));
        assert_eq!(a.get("y"), Some(&json!("b")));
    }
}
