//! Prometheus Metrics Registry - Match Observability
//!
//! Registers the `draft_duel_*` metrics and implements the match
//! observer port so sessions report into them. Exposed on /metrics
//! next to the health probes.

use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use tracing::warn;

use crate::domain::errors::ErrorKind;
use crate::domain::matchup::{MatchType, Phase};
use crate::ports::match_observer::MatchObserver;

/// Centralized Prometheus metrics for the draft engine.
///
/// All metrics follow the naming convention `draft_duel_*`.
pub struct MetricsRegistry {
    registry: Registry,
    /// Matches created, by type.
    pub matches_created: IntCounterVec,
    /// Matches that reached a terminal phase, by type and phase.
    pub matches_finished: IntCounterVec,
    /// Sessions currently running.
    pub active_matches: IntGauge,
    /// Picks applied, split by manual/auto.
    pub picks: IntCounterVec,
    /// Rejected participant actions, by error kind.
    pub rejections: IntCounterVec,
    /// Exit price capture plus scoring time (seconds).
    pub settlement_seconds: Histogram,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let matches_created = IntCounterVec::new(
            Opts::new("draft_duel_matches_created_total", "Matches created"),
            &["match_type"],
        )?;

        let matches_finished = IntCounterVec::new(
            Opts::new(
                "draft_duel_matches_finished_total",
                "Matches that reached a terminal phase",
            ),
            &["match_type", "phase"],
        )?;

        let active_matches = IntGauge::new(
            "draft_duel_active_matches",
            "Match sessions currently running",
        )?;

        let picks = IntCounterVec::new(
            Opts::new("draft_duel_picks_total", "Picks applied to rosters"),
            &["source"],
        )?;

        let rejections = IntCounterVec::new(
            Opts::new(
                "draft_duel_rejected_actions_total",
                "Participant actions rejected",
            ),
            &["kind"],
        )?;

        let settlement_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "draft_duel_settlement_seconds",
                "Time to fetch exit prices and score a match",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;

        registry.register(Box::new(matches_created.clone()))?;
        registry.register(Box::new(matches_finished.clone()))?;
        registry.register(Box::new(active_matches.clone()))?;
        registry.register(Box::new(picks.clone()))?;
        registry.register(Box::new(rejections.clone()))?;
        registry.register(Box::new(settlement_seconds.clone()))?;

        Ok(Self {
            registry,
            matches_created,
            matches_finished,
            active_matches,
            picks,
            rejections,
            settlement_seconds,
        })
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Router serving `/metrics`.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&self);
                async move {
                    match metrics.render() {
                        Ok(body) => (StatusCode::OK, body).into_response(),
                        Err(e) => {
                            warn!(error = %e, "Failed to encode metrics");
                            StatusCode::INTERNAL_SERVER_ERROR.into_response()
                        }
                    }
                }
            }),
        )
    }
}

impl MatchObserver for MetricsRegistry {
    fn match_opened(&self, match_type: MatchType) {
        self.matches_created
            .with_label_values(&[&match_type.to_string()])
            .inc();
        self.active_matches.inc();
    }

    fn match_closed(&self, match_type: MatchType, phase: Phase) {
        self.matches_finished
            .with_label_values(&[&match_type.to_string(), &phase.to_string()])
            .inc();
        self.active_matches.dec();
    }

    fn pick_applied(&self, auto_picked: bool) {
        let source = if auto_picked { "auto" } else { "manual" };
        self.picks.with_label_values(&[source]).inc();
    }

    fn action_rejected(&self, kind: ErrorKind) {
        let label = serde_json::to_value(kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{kind:?}"));
        self.rejections.with_label_values(&[&label]).inc();
    }

    fn settlement_duration(&self, seconds: f64) {
        self.settlement_seconds.observe(seconds);
    }
}
