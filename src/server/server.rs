use std::sync::Arc;

use anyhow::{anyhow, Result};
use axum::Router;
use tracing::info;

use crate::context::BrokerContext;
use crate::observability::routes::MetricsState;
use crate::server::routes;

#[derive(Clone)]
pub struct AppState {
    pub context: Arc<BrokerContext>,
    pub metrics_state: MetricsState,
}

impl AppState {
    pub fn new(context: Arc<BrokerContext>) -> Self {
        let metrics_state = MetricsState::new(context.metrics.registry.clone());
        Self { context, metrics_state }
    }
}

/// Health, API and metrics routes over one shared state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::router(&state))
        .merge(state.metrics_state.router(&state.context.config.settings.metrics))
        .with_state(state)
}

/// Bind the configured address and serve until the process stops.
pub async fn start(context: Arc<BrokerContext>) -> Result<()> {
    let settings = &context.config.settings;
    let bind_addr = format!("{}:{}", settings.server.host, settings.server.port);
    let app = build_router(AppState::new(context.clone()));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow!("cannot bind {}: {}", bind_addr, e))?;
    info!(address = %bind_addr, "http server listening");
    context.metrics.up.set(1);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow!("http server failed: {}", e))?;

    context.metrics.up.set(0);
    info!("http server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("cannot listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
