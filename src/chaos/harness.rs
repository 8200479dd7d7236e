//! Scenario dispatch
//!
//! [`ChaosHarness`] owns the collaborators scenarios need (the board store, an
//! HTTP client, the token signer) plus their parameters, and maps a
//! [`ScenarioKind`] onto the matching scenario body.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::report::DiagnosticReport;
use super::scenarios::{api_timeout, db_failure, high_cpu, jwt_expiry, memory_leak, pool_exhaustion, slow_query};
use super::ScenarioKind;
use crate::auth::TokenSigner;
use crate::config::ChaosConfig;
use crate::metrics;
use crate::store::BoardStore;

/// Immediate response for a scenario started in the background
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Acknowledgement {
    pub message: String,
    pub scenario: ScenarioKind,
}

#[derive(Clone)]
pub struct ChaosHarness {
    store: Arc<dyn BoardStore>,
    settings: Arc<ChaosConfig>,
    signer: TokenSigner,
    http: reqwest::Client,
}

impl ChaosHarness {
    pub fn new(store: Arc<dyn BoardStore>, settings: ChaosConfig, signer: TokenSigner) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("patient/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            store,
            settings: Arc::new(settings),
            signer,
            http,
        })
    }

    pub fn settings(&self) -> &ChaosConfig {
        &self.settings
    }

    /// Run one scenario to its terminal state
    pub async fn run(&self, kind: ScenarioKind) -> DiagnosticReport {
        let s = &self.settings;
        match kind {
            ScenarioKind::DbFailure => db_failure::run(&s.db_failure).await,
            ScenarioKind::PoolExhaustion => {
                // Sized against the live pool, not a copy of its setting
                let plan = pool_exhaustion::FloodPlan {
                    pool_size: self.store.pool_settings().max_connections,
                    overload_factor: s.pool_exhaustion.overload_factor,
                    hold: Duration::from_secs(s.pool_exhaustion.sleep_secs),
                    stagger: Duration::from_millis(s.pool_exhaustion.stagger_ms),
                };
                pool_exhaustion::run(self.store.clone(), plan).await
            }
            ScenarioKind::MemoryLeak => memory_leak::run(&s.memory_leak).await,
            ScenarioKind::SlowQuery => {
                let plan = slow_query::SlowQueryPlan {
                    seed_posts: s.slow_query.seed_posts,
                    slow_threshold: Duration::from_millis(s.slow_query.slow_threshold_ms),
                };
                slow_query::run(self.store.clone(), plan).await
            }
            ScenarioKind::ApiTimeout => {
                let call = api_timeout::UpstreamCall {
                    url: s.api_timeout.url.clone(),
                    timeout: Duration::from_millis(s.api_timeout.timeout_ms),
                };
                api_timeout::run(&self.http, &call).await
            }
            ScenarioKind::JwtExpiry => {
                let plan = jwt_expiry::ExpiryPlan {
                    validity: Duration::from_secs(s.jwt_expiry.validity_secs),
                    wait: Duration::from_millis(s.jwt_expiry.wait_ms),
                };
                jwt_expiry::run(&self.signer, &plan).await
            }
            ScenarioKind::HighCpu => high_cpu::run(&s.high_cpu).await,
        }
    }

    /// Start a scenario without waiting for it. The report is only visible
    /// on the log stream and in the run counters.
    pub fn spawn(&self, kind: ScenarioKind) -> Acknowledgement {
        let harness = self.clone();
        metrics::record_background(kind);
        tokio::spawn(async move {
            harness.run(kind).await;
        });
        Acknowledgement {
            message: self.acknowledgement(kind),
            scenario: kind,
        }
    }

    fn acknowledgement(&self, kind: ScenarioKind) -> String {
        match kind {
            ScenarioKind::MemoryLeak => format!(
                "Memory leak triggered for {} seconds",
                self.settings.memory_leak.duration_secs
            ),
            ScenarioKind::JwtExpiry => "JWT expiry scenario triggered".to_string(),
            ScenarioKind::HighCpu => format!(
                "High CPU load triggered for {} seconds",
                self.settings.high_cpu.duration_secs
            ),
            other => format!("{} scenario triggered", other.title()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::Outcome;
    use crate::store::{MemoryStore, PoolSettings};

    fn harness(settings: ChaosConfig) -> ChaosHarness {
        let store = Arc::new(MemoryStore::new(PoolSettings {
            max_connections: 2,
            acquire_timeout: Duration::from_millis(50),
        }));
        ChaosHarness::new(store, settings, TokenSigner::new("test-secret")).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_flood_sized_from_live_pool() {
        let mut settings = ChaosConfig::default();
        settings.pool_exhaustion.sleep_secs = 1;
        settings.pool_exhaustion.stagger_ms = 10;

        let report = harness(settings).run(ScenarioKind::PoolExhaustion).await;

        assert_eq!(report.scenario, ScenarioKind::PoolExhaustion);
        assert_eq!(report.metrics.get_u64("poolMax"), Some(2));
        assert_eq!(report.metrics.get_u64("attempts"), Some(6));
        assert_eq!(report.outcome, Outcome::Errored);
    }

    #[tokio::test]
    async fn test_spawn_acknowledges_immediately() {
        let mut settings = ChaosConfig::default();
        settings.jwt_expiry.wait_ms = 50;

        let started = std::time::Instant::now();
        let ack = harness(settings).spawn(ScenarioKind::JwtExpiry);

        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(ack.message, "JWT expiry scenario triggered");
        assert_eq!(ack.scenario, ScenarioKind::JwtExpiry);
    }

    #[test]
    fn test_acknowledgement_reports_configured_duration() {
        let mut settings = ChaosConfig::default();
        settings.high_cpu.duration_secs = 12;
        let harness = harness(settings);
        assert_eq!(
            harness.acknowledgement(ScenarioKind::HighCpu),
            "High CPU load triggered for 12 seconds"
        );
        assert_eq!(
            harness.acknowledgement(ScenarioKind::MemoryLeak),
            "Memory leak triggered for 30 seconds"
        );
    }
}
