//! Token expiry: issue a short-lived token, outwait it, then verify it

use chrono::Utc;
use std::time::Duration;
use tokio::time;

use super::timestamp;
use crate::auth::{TokenError, TokenSigner};
use crate::chaos::report::{ActionResult, DiagnosticReport, Metrics};
use crate::chaos::runner::run_action;
use crate::chaos::{ScenarioError, ScenarioKind};

const TEST_USER_ID: i64 = 1;
const TEST_EMAIL: &str = "test@example.com";

#[derive(Debug, Clone)]
pub struct ExpiryPlan {
    pub validity: Duration,
    /// How long to hold the token before verifying it
    pub wait: Duration,
}

pub async fn run(signer: &TokenSigner, plan: &ExpiryPlan) -> DiagnosticReport {
    run_action(ScenarioKind::JwtExpiry, expire(signer, plan)).await
}

async fn expire(signer: &TokenSigner, plan: &ExpiryPlan) -> ActionResult {
    let token = match signer.sign(TEST_USER_ID, TEST_EMAIL, plan.validity) {
        Ok(token) => token,
        Err(err) => return ActionResult::errored(ScenarioError::TokenInvalid(err.to_string())),
    };
    tracing::info!("   Token created with {} second expiry", plan.validity.as_secs());
    tracing::debug!("   Token: {}...", token.get(..50).unwrap_or(&token));
    tracing::info!("   Waiting {}ms for token to expire...", plan.wait.as_millis());

    time::sleep(plan.wait).await;

    let metrics = Metrics::new()
        .with("validitySecs", plan.validity.as_secs())
        .with("waitedMs", plan.wait.as_millis() as u64);

    match signer.verify(&token) {
        Ok(claims) => {
            tracing::warn!("   ✓ Token still valid (unexpected), expires {}", claims.expires_at());
            ActionResult::Completed(metrics.with("verified", true).with("expiresAt", claims.expires_at()))
        }
        Err(TokenError::Expired { expired_at }) => {
            let age = (Utc::now() - expired_at).num_milliseconds() as f64 / 1000.0;
            tracing::error!(
                timestamp = %timestamp(),
                error = "jwt expired",
                errorName = "TokenExpiredError",
                expiredAt = %expired_at.to_rfc3339(),
                tokenAge = %format!("Expired {:.1}s ago", age),
                "[JWT ERROR] Token verification failed"
            );
            ActionResult::Errored {
                error: ScenarioError::TokenExpired { expired_at },
                metrics: metrics
                    .with("expiredAt", expired_at)
                    .with("tokenAgeSecs", age),
            }
        }
        Err(err @ TokenError::Invalid(_)) => {
            tracing::error!(
                timestamp = %timestamp(),
                error = %err,
                errorName = err.name(),
                "[JWT ERROR] Token verification failed"
            );
            ActionResult::Errored {
                error: ScenarioError::TokenInvalid(err.to_string()),
                metrics,
            }
        }
    }
}
