//! Pool exhaustion: flood the connection pool with long-running queries

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time;

use super::timestamp;
use crate::chaos::report::{ActionResult, DiagnosticReport, Metrics};
use crate::chaos::runner::run_action;
use crate::chaos::{ScenarioError, ScenarioKind};
use crate::store::{BoardStore, StoreError};

#[derive(Debug, Clone)]
pub struct FloodPlan {
    /// Live pool maximum the flood is sized against
    pub pool_size: u32,
    pub overload_factor: u32,
    /// How long each query holds its connection
    pub hold: Duration,
    /// Delay between submissions
    pub stagger: Duration,
}

impl FloodPlan {
    pub fn attempts(&self) -> u32 {
        self.pool_size.saturating_mul(self.overload_factor)
    }
}

pub async fn run(store: Arc<dyn BoardStore>, plan: FloodPlan) -> DiagnosticReport {
    run_action(ScenarioKind::PoolExhaustion, flood(store, plan)).await
}

async fn flood(store: Arc<dyn BoardStore>, plan: FloodPlan) -> ActionResult {
    let attempts = plan.attempts();
    tracing::info!("   Pool max: {}, creating {} concurrent connections...", plan.pool_size, attempts);

    let mut in_flight = JoinSet::new();
    for number in 1..=attempts {
        tracing::info!("   Creating connection {}/{}...", number, attempts);
        let store = store.clone();
        let hold = plan.hold;
        in_flight.spawn(async move { (number, store.sleep_query(hold).await) });
        time::sleep(plan.stagger).await;
    }

    let mut succeeded = 0usize;
    let mut failed = 0usize;
    let mut acquire_timeouts = 0usize;

    // Every attempt is awaited to its own terminal state
    while let Some(joined) = in_flight.join_next().await {
        match joined {
            Ok((number, Ok(()))) => {
                succeeded += 1;
                tracing::info!("   ✓ Connection {} completed", number);
            }
            Ok((number, Err(err))) => {
                failed += 1;
                if matches!(err, StoreError::AcquireTimeout { .. }) {
                    acquire_timeouts += 1;
                }
                tracing::error!(
                    timestamp = %timestamp(),
                    connectionNumber = number,
                    error = %err,
                    errorName = err.name(),
                    poolMax = plan.pool_size,
                    "[POOL ERROR] Connection {} failed",
                    number
                );
            }
            Err(join_err) => {
                failed += 1;
                tracing::error!(error = %join_err, "[POOL ERROR] Connection task aborted");
            }
        }
    }

    let metrics = Metrics::new()
        .with("attempts", attempts)
        .with("settled", succeeded + failed)
        .with("succeeded", succeeded)
        .with("failed", failed)
        .with("acquireTimeouts", acquire_timeouts)
        .with("poolMax", plan.pool_size)
        .with("holdMs", plan.hold.as_millis() as u64);

    if failed == 0 {
        tracing::info!("   All {} connections completed without exhausting the pool", attempts);
        return ActionResult::Completed(metrics);
    }

    tracing::error!(
        timestamp = %timestamp(),
        totalAttempts = attempts,
        failed,
        poolMax = plan.pool_size,
        "[POOL EXHAUSTION ERROR] Connection pool exhausted"
    );
    ActionResult::Errored {
        error: ScenarioError::PoolExhausted {
            failed,
            attempts: attempts as usize,
        },
        metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::Outcome;
    use crate::store::{MemoryStore, PoolSettings};

    fn store(max: u32, acquire_ms: u64) -> Arc<dyn BoardStore> {
        Arc::new(MemoryStore::new(PoolSettings {
            max_connections: max,
            acquire_timeout: Duration::from_millis(acquire_ms),
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_attempts_time_out() {
        let plan = FloodPlan {
            pool_size: 2,
            overload_factor: 3,
            hold: Duration::from_millis(200),
            stagger: Duration::from_millis(10),
        };

        let report = run(store(2, 50), plan).await;

        assert_eq!(report.outcome, Outcome::Errored);
        assert_eq!(report.metrics.get_u64("attempts"), Some(6));
        assert_eq!(report.metrics.get_u64("settled"), Some(6));
        assert_eq!(report.metrics.get_u64("succeeded"), Some(2));
        assert_eq!(report.metrics.get_u64("failed"), Some(4));
        assert_eq!(report.metrics.get_u64("acquireTimeouts"), Some(4));
        assert_eq!(report.error.unwrap().kind, "ConnectionAcquireTimeoutError");
        assert!(report.diagnosis.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_attempt_settles_with_patient_pool() {
        let plan = FloodPlan {
            pool_size: 10,
            overload_factor: 3,
            hold: Duration::from_secs(5),
            stagger: Duration::from_millis(100),
        };

        let report = run(store(10, 30_000), plan).await;

        assert_eq!(report.metrics.get_u64("attempts"), Some(30));
        assert_eq!(report.metrics.get_u64("settled"), Some(30));
        assert_eq!(report.outcome, Outcome::Completed);
        assert!(report.diagnosis.is_none());
    }

    #[test]
    fn test_attempts_scale_with_pool() {
        let plan = FloodPlan {
            pool_size: 25,
            overload_factor: 3,
            hold: Duration::ZERO,
            stagger: Duration::ZERO,
        };
        assert_eq!(plan.attempts(), 75);
    }
}
