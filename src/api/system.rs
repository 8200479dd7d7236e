//! Service info, health and metrics endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;
use std::time::Instant;

use super::AppState;
use crate::chaos::probe::{format_mib, ProcessSnapshot};
use crate::metrics;

const SERVICE_NAME: &str = "Cloud Doctor Patient Backend";

impl AppState {
    fn snapshot(&self) -> ProcessSnapshot {
        match self.probe.lock() {
            Ok(mut probe) => probe.snapshot(),
            Err(poisoned) => poisoned.into_inner().snapshot(),
        }
    }
}

pub async fn service_info(State(state): State<AppState>) -> impl IntoResponse {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    Json(json!({
        "service": SERVICE_NAME,
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
        "environment": state.config.server.environment,
        "hostname": host,
    }))
}

/// Store round-trip plus process memory. 503 when the store is unreachable.
pub async fn health(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let ping = state.store.ping().await;
    let response_time = started.elapsed();

    match ping {
        Ok(()) => {
            let snapshot = state.snapshot();
            tracing::debug!("Health check ok in {}ms", response_time.as_millis());
            Json(json!({
                "status": "ok",
                "timestamp": Utc::now().to_rfc3339(),
                "uptime": state.uptime_secs(),
                "database": {
                    "connected": true,
                    "backend": state.store.backend(),
                    "host": state.config.database.host,
                },
                "memory": {
                    "used": format_mib(snapshot.rss_bytes),
                    "total": format!("{}.00MB", state.config.chaos.memory_leak.memory_limit_mb),
                },
                "responseTime": format!("{}ms", response_time.as_millis()),
            }))
            .into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, errorName = err.name(), "[HEALTH CHECK ERROR] {}", err);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "error",
                    "error": err.to_string(),
                    "timestamp": Utc::now().to_rfc3339(),
                })),
            )
                .into_response()
        }
    }
}

pub async fn process_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.snapshot();
    metrics::PROCESS_RSS_BYTES.set(snapshot.rss_bytes as i64);
    Json(json!({
        "timestamp": Utc::now().to_rfc3339(),
        "uptime": state.uptime_secs(),
        "memory": {
            "rss": format_mib(snapshot.rss_bytes),
            "virtual": format_mib(snapshot.virtual_bytes),
            "limit": format!("{}.00MB", state.config.chaos.memory_leak.memory_limit_mb),
        },
        "cpu": {
            "timeMs": snapshot.cpu_time_ms,
            "usagePercent": snapshot.cpu_usage_percent,
        },
        "env": {
            "version": env!("CARGO_PKG_VERSION"),
            "platform": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "environment": state.config.server.environment,
        },
    }))
}

/// Prometheus scrape endpoint
pub async fn prometheus(State(state): State<AppState>) -> Response {
    let snapshot = state.snapshot();
    metrics::PROCESS_RSS_BYTES.set(snapshot.rss_bytes as i64);
    metrics::UPTIME_SECONDS.set(state.uptime_secs());

    match metrics::gather_metrics() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => {
            tracing::error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}
