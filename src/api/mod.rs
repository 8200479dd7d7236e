//! HTTP surface
//!
//! Board CRUD under `/api/auth` and `/api/posts`, operational endpoints, and
//! the chaos dispatch surface under `/api/chaos`.

pub mod auth;
pub mod chaos;
pub mod error;
pub mod posts;
pub mod system;

use axum::http::{HeaderValue, Method, StatusCode, Uri};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::TokenSigner;
use crate::chaos::probe::ProcessProbe;
use crate::chaos::ChaosHarness;
use crate::config::Config;
use crate::store::BoardStore;

pub use error::ApiError;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BoardStore>,
    pub harness: ChaosHarness,
    pub signer: TokenSigner,
    pub config: Arc<Config>,
    pub started: Instant,
    pub probe: Arc<Mutex<ProcessProbe>>,
}

impl AppState {
    pub fn new(store: Arc<dyn BoardStore>, config: Config) -> anyhow::Result<Self> {
        let signer = TokenSigner::new(&config.auth.jwt_secret);
        let harness = ChaosHarness::new(store.clone(), config.chaos.clone(), signer.clone())?;
        Ok(Self {
            store,
            harness,
            signer,
            config: Arc::new(config),
            started: Instant::now(),
            probe: Arc::new(Mutex::new(ProcessProbe::new())),
        })
    }

    pub fn uptime_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/", get(system::service_info))
        .route("/health", get(system::health))
        .route("/api/metrics", get(system::process_metrics))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/verify", get(auth::verify))
        .route("/api/posts", get(posts::list).post(posts::create))
        .route("/api/posts/{id}", get(posts::show).delete(posts::remove))
        .route("/api/chaos", get(chaos::catalog))
        .route("/api/chaos/{scenario}", post(chaos::trigger));

    if state.config.metrics.enabled {
        app = app.route("/metrics", get(system::prometheus));
    }

    let cors = cors_layer(&state.config.server.cors_origin);
    app.fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origin == "*" {
        return layer.allow_origin(Any);
    }
    match HeaderValue::from_str(origin) {
        Ok(value) => layer.allow_origin(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid CORS origin {:?}, allowing any", origin);
            layer.allow_origin(Any)
        }
    }
}

async fn not_found(method: Method, uri: Uri) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Not Found",
            "path": uri.path(),
            "method": method.as_str(),
        })),
    )
}
