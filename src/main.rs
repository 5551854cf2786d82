//! Draft Duel — Entry Point
//!
//! Initializes configuration, logging, the price cache and the match
//! registry, then serves the HTTP API, the session socket and the
//! health/metrics endpoints. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Load the session token secret from env (DRAFT_SESSION_SECRET)
//! 4. Create the price source + shared price cache
//! 5. Open the result log and restore the result index
//! 6. Create metrics, settlement engine and match registry
//! 7. Spawn price cache refresh loop
//! 8. Spawn HTTP API, session gateway and health/metrics servers
//! 9. Wait for SIGINT → broadcast shutdown → drain tasks

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use draft_duel::adapters::api::routes::{self, ApiState};
use draft_duel::adapters::api::session_token::SessionTokens;
use draft_duel::adapters::feeds::{BinancePriceSource, PriceCache};
use draft_duel::adapters::gateway::SessionGateway;
use draft_duel::adapters::metrics::{HealthServer, HealthState, MetricsRegistry};
use draft_duel::adapters::persistence::JsonlResultLog;
use draft_duel::config;
use draft_duel::ports::match_observer::{MatchObserver, NoopObserver};
use draft_duel::ports::price_oracle::PriceOracle;
use draft_duel::usecases::draft_session::SessionDeps;
use draft_duel::usecases::identity::IdentityVerifier;
use draft_duel::usecases::match_registry::MatchRegistry;
use draft_duel::usecases::results::ResultBook;
use draft_duel::usecases::settlement::SettlementEngine;

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration from config.toml ──────────────
    let config_path = std::env::var("DRAFT_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = Arc::new(
        config::loader::load_config(&config_path).context("Failed to load configuration")?,
    );

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.service.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        tokens = config.oracle.tokens.len(),
        "Starting Draft Duel"
    );

    // ── 3. Shutdown channel + session token secret ──────────
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
    let tokens = Arc::new(
        SessionTokens::from_env(chrono::Duration::seconds(secs_i64(config.auth.session_ttl_secs)))
            .context("Failed to load session token secret")?,
    );

    // ── 4. Price source + shared cache ──────────────────────
    let source = Arc::new(
        BinancePriceSource::new(&config.oracle).context("Failed to create price source")?,
    );
    let cache = Arc::new(PriceCache::new(
        source,
        Duration::from_secs(config.oracle.staleness_secs),
    ));
    match cache.refresh().await {
        Ok(n) => info!(tokens = n, "Initial price board loaded"),
        Err(e) => warn!(error = %e, "Initial price board unavailable, will retry"),
    }
    let oracle: Arc<dyn PriceOracle> = cache.clone();

    // ── 5. Result log + index ───────────────────────────────
    let result_log = Arc::new(
        JsonlResultLog::new(&config.persistence.data_dir)
            .await
            .context("Failed to open result log")?,
    );
    let results = Arc::new(ResultBook::new(result_log).with_retry(
        config.persistence.record_attempts,
        Duration::from_millis(config.persistence.record_retry_delay_ms),
    ));
    results.restore().await.context("Failed to restore match results")?;

    // ── 6. Metrics, settlement, registry ────────────────────
    let metrics = Arc::new(MetricsRegistry::new().context("Failed to create metrics registry")?);
    let observer: Arc<dyn MatchObserver> = if config.metrics.enabled {
        metrics.clone()
    } else {
        Arc::new(NoopObserver)
    };

    let settlement = Arc::new(SettlementEngine::new(
        Arc::clone(&oracle),
        Arc::clone(&results),
        config.draft.multipliers(),
        config.settlement.max_price_attempts,
        Duration::from_millis(config.settlement.retry_base_delay_ms),
    ));

    let registry = Arc::new(MatchRegistry::new(
        config.clone(),
        SessionDeps {
            oracle: Arc::clone(&oracle),
            settlement,
            results: Arc::clone(&results),
            observer,
        },
    ));

    let verifier = Arc::new(IdentityVerifier::new(
        config.auth.domain.clone(),
        chrono::Duration::seconds(secs_i64(config.auth.challenge_ttl_secs)),
    ));

    // ── 7. Price cache refresh and result retry loops ───────
    let cache_shutdown = shutdown_tx.subscribe();
    let refresh_every = Duration::from_secs(config.oracle.refresh_interval_secs.max(1));
    let cache_handle = tokio::spawn(async move {
        if let Err(e) = cache.run(refresh_every, cache_shutdown).await {
            error!(error = %e, "Price cache task failed");
        }
    });

    let results_shutdown = shutdown_tx.subscribe();
    let pending_every = Duration::from_secs(config.persistence.pending_retry_interval_secs.max(1));
    let results_handle = tokio::spawn(Arc::clone(&results).run(pending_every, results_shutdown));

    // ── 8. HTTP API, session gateway, health/metrics ────────
    let api_state = ApiState {
        verifier,
        tokens: Arc::clone(&tokens),
        registry: Arc::clone(&registry),
    };
    let api_address = config.api.bind_address.clone();
    let api_shutdown = shutdown_tx.subscribe();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = routes::serve(api_state, api_address, api_shutdown).await {
            error!(error = %e, "HTTP API failed");
        }
    });

    let gateway = Arc::new(SessionGateway::new(
        Arc::clone(&registry),
        tokens,
        config.gateway.max_messages_per_second,
    ));
    let gateway_address = config.gateway.bind_address.clone();
    let gateway_shutdown = shutdown_tx.subscribe();
    let gateway_handle = tokio::spawn(async move {
        if let Err(e) = gateway.serve(&gateway_address, gateway_shutdown).await {
            error!(error = %e, "Session gateway failed");
        }
    });

    let mut health = HealthServer::new(HealthState {
        oracle,
        results,
    });
    if config.metrics.enabled {
        health = health.with_routes(metrics.router());
    }
    let health_address = config.metrics.bind_address.clone();
    let health_shutdown = shutdown_tx.subscribe();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health.run(health_address, health_shutdown).await {
            error!(error = %e, "Health server failed");
        }
    });

    info!("All tasks spawned, service is running");

    // ── 9. Wait for SIGINT ──────────────────────────────────
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for SIGINT");
    }
    info!(
        active_matches = registry.active_sessions().await,
        "SIGINT received, initiating graceful shutdown"
    );

    let _ = shutdown_tx.send(());

    let drain = async {
        let _ = api_handle.await;
        let _ = gateway_handle.await;
        let _ = cache_handle.await;
        let _ = health_handle.await;
        let _ = results_handle.await;
    };
    if tokio::time::timeout(Duration::from_secs(10), drain).await.is_err() {
        warn!("Timed out waiting for tasks to stop");
    }

    info!("Shutdown complete");
    Ok(())
}

fn secs_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX / 1_000)
}
