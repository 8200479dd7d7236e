//! Connection failure: one connection attempt against a misconfigured endpoint

use sqlx::{ConnectOptions, Connection};
use std::time::Duration;
use tokio::time::{self, Instant};

use super::{millis, timestamp};
use crate::chaos::report::{ActionResult, DiagnosticReport, Metrics};
use crate::chaos::runner::run_action;
use crate::chaos::ScenarioKind;
use crate::config::DbFailureConfig;
use crate::store::mysql::{connect_options, map_sqlx_error};
use crate::store::StoreError;

const FAKE_DATABASE: &str = "fake_db";
const FAKE_USER: &str = "admin";
const FAKE_PASSWORD: &str = "password";

pub async fn run(settings: &DbFailureConfig) -> DiagnosticReport {
    run_action(ScenarioKind::DbFailure, attempt(settings)).await
}

async fn attempt(settings: &DbFailureConfig) -> ActionResult {
    let timeout = Duration::from_millis(settings.acquire_timeout_ms);
    let options = connect_options(&settings.host, settings.port, FAKE_USER, FAKE_PASSWORD, FAKE_DATABASE);
    let started = Instant::now();

    let error = match time::timeout(timeout, options.connect()).await {
        Ok(Ok(conn)) => {
            let _ = conn.close().await;
            tracing::warn!(
                host = %settings.host,
                port = settings.port,
                "Connected to {}:{} - endpoint is not misconfigured",
                settings.host,
                settings.port
            );
            return ActionResult::Completed(
                Metrics::new()
                    .with("host", &settings.host)
                    .with("port", settings.port)
                    .with("connectMs", started.elapsed().as_millis() as u64),
            );
        }
        Ok(Err(err)) => map_sqlx_error(err, timeout),
        Err(_) => StoreError::Connection {
            code: "ETIMEDOUT".to_string(),
            errno: None,
            message: format!("connect timed out after {}", millis(timeout)),
        },
    };

    let code = error.code().unwrap_or("UNKNOWN").to_string();
    let errno = error.errno();

    tracing::error!(
        timestamp = %timestamp(),
        error = %error,
        errorName = error.name(),
        code = %code,
        errno = ?errno,
        sqlState = "N/A",
        host = %settings.host,
        port = settings.port,
        "[DB CONNECTION ERROR] Failed to connect to database"
    );

    ActionResult::Errored {
        metrics: Metrics::new()
            .with("errorCode", &code)
            .with("errno", errno)
            .with("host", &settings.host)
            .with("port", settings.port)
            .with("elapsed", millis(started.elapsed())),
        error: error.into(),
    }
}
