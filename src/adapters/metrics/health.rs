//! Health Check Server - Liveness and Readiness Probes
//!
//! Exposes /live and /ready via axum 0.7, and serves the Prometheus
//! router on the same listener. Readiness requires a priced board
//! and a writable result log with no results waiting to be persisted.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::ports::price_oracle::PriceOracle;
use crate::usecases::results::ResultBook;

/// Dependencies polled by the readiness probe.
#[derive(Clone)]
pub struct HealthState {
    pub oracle: Arc<dyn PriceOracle>,
    pub results: Arc<ResultBook>,
}

impl HealthState {
    /// Check if the service is ready to serve matches.
    pub async fn is_ready(&self) -> bool {
        self.oracle.is_healthy().await && self.results.is_healthy().await
    }
}

/// Axum-based health and metrics HTTP server.
pub struct HealthServer {
    state: HealthState,
    /// Extra routes served alongside the probes (e.g. /metrics).
    extra: Option<Router>,
}

impl HealthServer {
    pub fn new(state: HealthState) -> Self {
        Self { state, extra: None }
    }

    pub fn with_routes(mut self, routes: Router) -> Self {
        self.extra = Some(routes);
        self
    }

    pub fn router(self) -> Router {
        let probes = Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .with_state(self.state);
        match self.extra {
            Some(extra) => probes.merge(extra),
            None => probes,
        }
    }

    /// Serve until shutdown.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(
        self,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Health server started");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness probe: always returns 200 if the process is running.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    /// Readiness probe: 200 only if the oracle and result log are healthy.
    async fn readiness(State(state): State<HealthState>) -> impl IntoResponse {
        if state.is_ready().await {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }
}
