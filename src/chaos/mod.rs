//! Failure-injection harness
//!
//! Each chaos scenario is a short, self-contained routine that provokes one
//! fault (a bad endpoint, an exhausted pool, a growing heap, ...) and turns
//! whatever happened into a [`DiagnosticReport`]. The report is both the HTTP
//! response body of the chaos endpoints and a structured record on the log
//! stream, which is what the downstream log analyzer ingests.
//!
//! Scenario runs never fail: every error is captured at the action boundary
//! and becomes an `errored` report.

pub mod error;
pub mod harness;
pub mod probe;
pub mod report;
pub mod runner;
pub mod scenarios;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use error::{FaultClass, ScenarioError};
pub use harness::ChaosHarness;
pub use report::{ActionResult, DiagnosticReport, Diagnosis, Fix, Metrics, Outcome};
pub use runner::{run_action, run_bounded, run_with_timeout, BoundedPlan, BoundedWorkload, Sample, Severity, Thresholds};

/// The fixed set of chaos scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScenarioKind {
    /// Connect to a deliberately wrong database endpoint
    #[serde(rename = "db-fail")]
    DbFailure,
    /// Flood the connection pool with long-running queries
    #[serde(rename = "pool-exhaustion")]
    PoolExhaustion,
    /// Grow an accumulator that is never released until the run ends
    #[serde(rename = "memory-leak")]
    MemoryLeak,
    /// Load post authors one query at a time (N+1)
    #[serde(rename = "slow-query")]
    SlowQuery,
    /// Call a slow upstream with a shorter client timeout
    #[serde(rename = "api-timeout")]
    ApiTimeout,
    /// Verify a credential after it expired
    #[serde(rename = "jwt-expiry")]
    JwtExpiry,
    /// Burn CPU in batches on the scheduler thread
    #[serde(rename = "high-cpu")]
    HighCpu,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 7] = [
        ScenarioKind::DbFailure,
        ScenarioKind::PoolExhaustion,
        ScenarioKind::MemoryLeak,
        ScenarioKind::SlowQuery,
        ScenarioKind::ApiTimeout,
        ScenarioKind::JwtExpiry,
        ScenarioKind::HighCpu,
    ];

    /// Name used in reports, metrics labels and dispatch paths
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioKind::DbFailure => "db-fail",
            ScenarioKind::PoolExhaustion => "pool-exhaustion",
            ScenarioKind::MemoryLeak => "memory-leak",
            ScenarioKind::SlowQuery => "slow-query",
            ScenarioKind::ApiTimeout => "api-timeout",
            ScenarioKind::JwtExpiry => "jwt-expiry",
            ScenarioKind::HighCpu => "high-cpu",
        }
    }

    /// Human-readable title used in the trigger log line
    pub fn title(&self) -> &'static str {
        match self {
            ScenarioKind::DbFailure => "DB Connection Failure",
            ScenarioKind::PoolExhaustion => "Connection Pool Exhaustion",
            ScenarioKind::MemoryLeak => "Memory Leak",
            ScenarioKind::SlowQuery => "Slow Query (N+1 Problem)",
            ScenarioKind::ApiTimeout => "API Timeout",
            ScenarioKind::JwtExpiry => "JWT Expiry",
            ScenarioKind::HighCpu => "High CPU Usage",
        }
    }

    /// Whether the dispatch surface starts this scenario in the background
    /// and acknowledges immediately instead of waiting for the report.
    pub fn runs_in_background(&self) -> bool {
        matches!(
            self,
            ScenarioKind::MemoryLeak | ScenarioKind::JwtExpiry | ScenarioKind::HighCpu
        )
    }

    /// Whether a `completed` run is itself the defect being demonstrated
    pub fn fault_on_completion(&self) -> bool {
        matches!(
            self,
            ScenarioKind::MemoryLeak | ScenarioKind::SlowQuery | ScenarioKind::HighCpu
        )
    }

    /// Root cause and remediation the log analyzer is expected to reach
    pub fn diagnosis(&self) -> Diagnosis {
        match self {
            ScenarioKind::DbFailure => Diagnosis::new(
                "Invalid RDS endpoint or network issue",
                "Check DB_HOST environment variable",
                Fix::Action("Verify RDS instance is running and security groups allow access".into()),
            ),
            ScenarioKind::PoolExhaustion => Diagnosis::new(
                "Connection pool exhausted under heavy load",
                "Increase ECS task count or DB pool size",
                Fix::Infrastructure("Update pool.max in database config".into()),
            ),
            ScenarioKind::MemoryLeak => Diagnosis::new(
                "Memory leak detected - heap usage continuously increasing",
                "Review code for unreleased references or caching issues",
                Fix::Infrastructure("Increase ECS task memory from 512MB to 1GB".into()),
            ),
            ScenarioKind::SlowQuery => Diagnosis::new(
                "N+1 query problem - fetching related data in loop",
                "Load authors together with posts in a single JOIN query",
                Fix::Code(
                    "SELECT p.*, u.id, u.email, u.name FROM posts p LEFT JOIN users u ON u.id = p.user_id"
                        .into(),
                ),
            ),
            ScenarioKind::ApiTimeout => Diagnosis::new(
                "External API not responding within timeout period",
                "Increase timeout or implement retry logic",
                Fix::Code("Add circuit breaker pattern or fallback mechanism".into()),
            ),
            ScenarioKind::JwtExpiry => Diagnosis::new(
                "JWT token expired - token lifetime too short",
                "Increase token lifetime to 24h or implement refresh tokens",
                Fix::Code("Raise auth.token_ttl_secs from 1 to 86400".into()),
            ),
            ScenarioKind::HighCpu => Diagnosis::new(
                "CPU usage at 100% - inefficient algorithm or blocking operation",
                "Optimize code or move the work to a blocking thread pool",
                Fix::Infrastructure("Increase ECS task CPU allocation".into()),
            ),
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScenarioKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScenarioKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "Unknown chaos scenario: {}. Must be one of: {}",
                    s,
                    ScenarioKind::ALL.map(|k| k.as_str()).join(", ")
                )
            })
    }
}
