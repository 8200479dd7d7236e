//! Chaos dispatch: `POST /api/chaos/{scenario}`
//!
//! Background scenarios are acknowledged at once; the rest answer with their
//! finished report.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tokio::task::JoinError;

use super::{ApiError, AppState};
use crate::chaos::ScenarioKind;

/// Scenario names with their titles and dispatch mode
pub async fn catalog() -> Json<Value> {
    let scenarios: Vec<Value> = ScenarioKind::ALL
        .iter()
        .map(|kind| {
            json!({
                "scenario": kind,
                "title": kind.title(),
                "background": kind.runs_in_background(),
            })
        })
        .collect();
    Json(json!({ "scenarios": scenarios }))
}

pub async fn trigger(State(state): State<AppState>, Path(scenario): Path<String>) -> Result<Response, ApiError> {
    let kind: ScenarioKind = scenario.parse().map_err(ApiError::NotFound)?;

    if kind.runs_in_background() {
        return Ok(Json(state.harness.spawn(kind)).into_response());
    }

    // A panic inside the scenario surfaces here as a JoinError
    let harness = state.harness.clone();
    let report = tokio::spawn(async move { harness.run(kind).await })
        .await
        .map_err(|e| task_failed(kind, e))?;

    Ok(Json(report).into_response())
}

fn task_failed(kind: ScenarioKind, err: JoinError) -> ApiError {
    tracing::error!(scenario = kind.as_str(), error = %err, "[CHAOS ERROR] Scenario task failed");
    ApiError::Internal(err.to_string())
}
