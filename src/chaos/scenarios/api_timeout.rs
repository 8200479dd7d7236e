//! API timeout: call a deliberately slow upstream under a short deadline

use std::time::Duration;
use tokio::time::Instant;

use super::{millis, timestamp};
use crate::chaos::report::{ActionResult, DiagnosticReport, Metrics};
use crate::chaos::runner::run_with_timeout;
use crate::chaos::{ScenarioError, ScenarioKind};
use crate::store::{find_io_error, io_error_code};

#[derive(Debug, Clone)]
pub struct UpstreamCall {
    pub url: String,
    pub timeout: Duration,
}

pub async fn run(client: &reqwest::Client, call: &UpstreamCall) -> DiagnosticReport {
    tracing::info!("   Calling external API with {} timeout...", millis(call.timeout));
    let url = call.url.clone();
    let timeout = call.timeout;

    run_with_timeout(ScenarioKind::ApiTimeout, call.timeout, request(client, &call.url), move |elapsed| {
        tracing::error!(
            timestamp = %timestamp(),
            url = %url,
            timeout = %millis(timeout),
            elapsed = %millis(elapsed),
            errorType = "ETIMEDOUT",
            "[API TIMEOUT ERROR] External API request timed out"
        );
        Metrics::new()
            .with("url", &url)
            .with("elapsed", millis(elapsed))
            .with("errorType", "ETIMEDOUT")
    })
    .await
}

async fn request(client: &reqwest::Client, url: &str) -> ActionResult {
    let started = Instant::now();
    let outcome = async {
        let response = client.get(url).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        Ok::<_, reqwest::Error>((status, body.len()))
    }
    .await;

    match outcome {
        Ok((status, bytes)) => {
            let response_time = started.elapsed();
            tracing::info!("[API] Response received: {} in {}", status, millis(response_time));
            ActionResult::Completed(
                Metrics::new()
                    .with("url", url)
                    .with("status", status.as_u16())
                    .with("responseTimeMs", response_time.as_millis() as u64)
                    .with("bytes", bytes),
            )
        }
        Err(err) => {
            let code = transport_code(&err);
            tracing::error!(
                timestamp = %timestamp(),
                url = %url,
                error = %err,
                code = %code,
                elapsed = %millis(started.elapsed()),
                "[API ERROR] External API request failed"
            );
            ActionResult::Errored {
                metrics: Metrics::new()
                    .with("url", url)
                    .with("errorType", &code)
                    .with("elapsed", millis(started.elapsed())),
                error: ScenarioError::Transport {
                    code,
                    message: err.to_string(),
                },
            }
        }
    }
}

fn transport_code(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        return "ETIMEDOUT".to_string();
    }
    match find_io_error(err) {
        Some(io_err) => io_error_code(io_err).to_string(),
        None if err.is_connect() => "ECONNREFUSED".to_string(),
        None => "UNKNOWN".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::{FaultClass, Outcome};
    use axum::{routing::get, Router};

    async fn stub_upstream() -> String {
        let app = Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
            .route("/fast", get(|| async { "ok" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out_at_bound() {
        let base = stub_upstream().await;
        let call = UpstreamCall {
            url: format!("{}/slow", base),
            timeout: Duration::from_millis(300),
        };

        let report = run(&reqwest::Client::new(), &call).await;

        assert_eq!(report.outcome, Outcome::TimedOut);
        assert!(report.elapsed_ms >= 300 && report.elapsed_ms < 1500, "{}", report.elapsed_ms);
        assert_eq!(report.metrics.get_u64("timeoutMs"), Some(300));
        assert!(report.metrics.get_u64("timedOutAfterMs").unwrap() >= 300);
        assert!(report.diagnosis.is_some());
    }

    #[tokio::test]
    async fn test_fast_upstream_completes() {
        let base = stub_upstream().await;
        let call = UpstreamCall {
            url: format!("{}/fast", base),
            timeout: Duration::from_secs(3),
        };

        let report = run(&reqwest::Client::new(), &call).await;

        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(report.metrics.get_u64("status"), Some(200));
        assert!(report.diagnosis.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_transport_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let call = UpstreamCall {
            url: format!("http://127.0.0.1:{}/", port),
            timeout: Duration::from_secs(3),
        };

        let report = run(&reqwest::Client::new(), &call).await;

        assert_eq!(report.outcome, Outcome::Errored);
        let error = report.error.unwrap();
        assert_eq!(error.kind, "TransportError");
        assert_eq!(error.class, FaultClass::Connectivity);
    }
}
