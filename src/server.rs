// HTTP server bootstrap
//
// Builds the store, checks connectivity, prepares the schema and serves the
// router until ctrl-c or SIGTERM.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

use crate::api::{self, AppState};
use crate::config::Config;
use crate::metrics;
use crate::store::{BoardStore, MemoryStore, MySqlStore};

/// Store selected by the `--in-memory` switch
pub fn build_store(config: &Config, in_memory: bool) -> Arc<dyn BoardStore> {
    if in_memory {
        info!("Using in-memory store (pool max={})", config.database.pool.max);
        Arc::new(MemoryStore::new(config.database.pool.settings()))
    } else {
        Arc::new(MySqlStore::connect_lazy(&config.database))
    }
}

/// Ping the store and create the tables when missing
pub async fn prepare_store(store: &dyn BoardStore, config: &Config) -> Result<()> {
    if let Err(err) = store.ping().await {
        error!(
            host = %config.database.host,
            port = config.database.port,
            code = ?err.code(),
            errno = ?err.errno(),
            errorName = err.name(),
            "[DB CONNECTION ERROR] Unable to connect to the database: {}",
            err
        );
        return Err(err).context("Database connection failed");
    }
    info!("Database connection established ({})", store.backend());

    store
        .init_schema()
        .await
        .context("Failed to synchronize schema")?;
    info!("Database synchronized");
    Ok(())
}

/// Run the API server until shutdown
pub async fn serve(config: Config, in_memory: bool) -> Result<()> {
    metrics::init().context("Failed to initialize metrics")?;

    let store = build_store(&config, in_memory);
    prepare_store(store.as_ref(), &config).await?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let chaos_mode = config.chaos.mode;
    let environment = config.server.environment.clone();

    let state = AppState::new(store, config).context("Failed to build application state")?;
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Server running on {}", addr);
    info!("Environment: {}", environment);
    info!("Chaos mode: {}", if chaos_mode { "ENABLED" } else { "disabled" });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_prepares() {
        let config = Config::default();
        let store = build_store(&config, true);
        assert_eq!(store.backend(), "memory");
        prepare_store(store.as_ref(), &config).await.unwrap();
        assert_eq!(store.pool_settings().max_connections, 10);
    }

    #[tokio::test]
    async fn test_unreachable_database_fails_fast() {
        let mut config = Config::default();
        config.database.host = "127.0.0.1".to_string();
        config.database.port = 1;
        config.database.pool.acquire_timeout_ms = 2_000;

        let store = build_store(&config, false);
        let err = prepare_store(store.as_ref(), &config).await.unwrap_err();
        assert!(err.to_string().contains("Database connection failed"));
    }
}
