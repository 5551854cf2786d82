//! Configuration Module - TOML-based Service Configuration
//!
//! Loads and validates configuration from `config.toml`.
//! Draft timing, round multipliers, the token universe and all
//! endpoints are externalized here - nothing is hardcoded in the
//! domain layer. The session secret comes from the environment.

pub mod loader;

use std::time::Duration;

use serde::Deserialize;

use crate::domain::draft::{DraftRules, FirstPicker};
use crate::domain::matchup::MatchType;
use crate::domain::scoring::RoundMultipliers;

/// Top-level service configuration.
///
/// Loaded from `config.toml` at startup. All fields are validated
/// before any listener is bound.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Service identity and logging.
  pub service: ServiceConfig,
  /// Draft timing and forfeiture rules.
  #[serde(default)]
  pub draft: DraftConfig,
  /// Competition window lengths.
  #[serde(default)]
  pub competition: CompetitionConfig,
  /// Wallet challenge and session token settings.
  #[serde(default)]
  pub auth: AuthConfig,
  /// Price source and cache.
  pub oracle: OracleConfig,
  /// Settlement retry policy.
  #[serde(default)]
  pub settlement: SettlementConfig,
  /// HTTP API listener.
  #[serde(default)]
  pub api: ApiConfig,
  /// WebSocket session gateway.
  #[serde(default)]
  pub gateway: GatewayConfig,
  /// Metrics and monitoring.
  #[serde(default)]
  pub metrics: MetricsConfig,
  /// Persistence configuration.
  #[serde(default)]
  pub persistence: PersistenceConfig,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
  /// Human-readable service name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

/// Draft rules shared by every match.
#[derive(Debug, Clone, Deserialize)]
pub struct DraftConfig {
  /// Seconds a participant has to make each pick.
  #[serde(default = "default_pick_timeout")]
  pub per_pick_timeout_secs: u64,
  /// Seconds of disconnection tolerated before missed turns count.
  #[serde(default = "default_grace_period")]
  pub grace_period_secs: u64,
  /// Consecutive missed turns past grace that forfeit the match.
  #[serde(default = "default_forfeit_threshold")]
  pub forfeit_after_missed_turns: u32,
  /// Seconds both participants may be absent before the match is voided.
  #[serde(default = "default_abandon_after")]
  pub abandon_after_secs: u64,
  /// Seconds between draftable-list retries when the oracle is down.
  #[serde(default = "default_draftable_retry")]
  pub draftable_retry_secs: u64,
  /// Who opens round 1.
  #[serde(default)]
  pub first_picker: FirstPicker,
  /// Multiplier per round, round 1 first. Missing rounds use 1.0.
  #[serde(default)]
  pub round_multipliers: Vec<f64>,
}

/// Competition window configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CompetitionConfig {
  /// Window length for `fast` matches (seconds).
  #[serde(default = "default_fast_window")]
  pub fast_window_secs: u64,
  /// Window length for `full` matches (seconds).
  #[serde(default = "default_full_window")]
  pub full_window_secs: u64,
}

/// Wallet authentication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
  /// Domain shown in the sign-in message.
  #[serde(default = "default_auth_domain")]
  pub domain: String,
  /// Challenge nonce lifetime (seconds).
  #[serde(default = "default_challenge_ttl")]
  pub challenge_ttl_secs: u64,
  /// Session token lifetime (seconds).
  #[serde(default = "default_session_ttl")]
  pub session_ttl_secs: u64,
}

/// A draftable token and the quote pair it is priced from.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
  /// Ticker as drafted (e.g., "ETH").
  pub symbol: String,
  /// Price source pair (e.g., "ETHUSDT").
  pub pair: String,
}

/// Price oracle configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
  /// REST base URL of the price source.
  #[serde(default = "default_oracle_url")]
  pub base_url: String,
  /// Token universe.
  pub tokens: Vec<TokenConfig>,
  /// Maximum age of cached prices before a refresh is attempted (seconds).
  #[serde(default = "default_staleness")]
  pub staleness_secs: u64,
  /// Background refresh interval (seconds).
  #[serde(default = "default_refresh_interval")]
  pub refresh_interval_secs: u64,
  /// Request timeout (milliseconds).
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
  /// Maximum retries on transient errors.
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  /// Base delay between retries (milliseconds, doubled per attempt).
  #[serde(default = "default_retry_base_delay")]
  pub retry_base_delay_ms: u64,
}

/// Settlement configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
  /// Attempts to price each exit symbol before defaulting it to zero PnL.
  #[serde(default = "default_price_attempts")]
  pub max_price_attempts: u32,
  /// Base delay between attempts (milliseconds, doubled per attempt).
  #[serde(default = "default_retry_base_delay")]
  pub retry_base_delay_ms: u64,
}

/// HTTP API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Bind address for /challenge, /verify and /matches.
  #[serde(default = "default_api_addr")]
  pub bind_address: String,
}

/// WebSocket gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
  /// Bind address for the draft session socket.
  #[serde(default = "default_gateway_addr")]
  pub bind_address: String,
  /// Inbound messages allowed per connection per second.
  #[serde(default = "default_messages_per_second")]
  pub max_messages_per_second: u32,
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Bind address for /live, /ready and /metrics.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
}

/// Persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
  /// Directory for the JSONL result log.
  #[serde(default = "default_data_dir")]
  pub data_dir: String,
  /// Sink attempts per result before it is queued for background retry.
  #[serde(default = "default_record_attempts")]
  pub record_attempts: u32,
  /// Base backoff between sink attempts (doubled each time).
  #[serde(default = "default_record_retry_delay")]
  pub record_retry_delay_ms: u64,
  /// How often queued results are offered to the sink again.
  #[serde(default = "default_pending_retry_interval")]
  pub pending_retry_interval_secs: u64,
}

impl DraftConfig {
  /// Draft rules for a given match type.
  pub fn rules(&self, match_type: MatchType) -> DraftRules {
    DraftRules {
      match_type,
      per_pick_timeout: secs(self.per_pick_timeout_secs),
      grace_period: secs(self.grace_period_secs),
      forfeit_after_missed_turns: self.forfeit_after_missed_turns,
      first_picker: self.first_picker,
    }
  }

  pub fn multipliers(&self) -> RoundMultipliers {
    RoundMultipliers::new(self.round_multipliers.clone())
  }

  pub const fn abandon_after(&self) -> Duration {
    Duration::from_secs(self.abandon_after_secs)
  }

  pub const fn draftable_retry(&self) -> Duration {
    Duration::from_secs(self.draftable_retry_secs)
  }
}

impl CompetitionConfig {
  pub const fn window(&self, match_type: MatchType) -> Duration {
    match match_type {
      MatchType::Fast => Duration::from_secs(self.fast_window_secs),
      MatchType::Full => Duration::from_secs(self.full_window_secs),
    }
  }
}

fn secs(value: u64) -> chrono::Duration {
  chrono::Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1_000))
}

impl Default for DraftConfig {
  fn default() -> Self {
    Self {
      per_pick_timeout_secs: default_pick_timeout(),
      grace_period_secs: default_grace_period(),
      forfeit_after_missed_turns: default_forfeit_threshold(),
      abandon_after_secs: default_abandon_after(),
      draftable_retry_secs: default_draftable_retry(),
      first_picker: FirstPicker::default(),
      round_multipliers: Vec::new(),
    }
  }
}

impl Default for CompetitionConfig {
  fn default() -> Self {
    Self {
      fast_window_secs: default_fast_window(),
      full_window_secs: default_full_window(),
    }
  }
}

impl Default for AuthConfig {
  fn default() -> Self {
    Self {
      domain: default_auth_domain(),
      challenge_ttl_secs: default_challenge_ttl(),
      session_ttl_secs: default_session_ttl(),
    }
  }
}

impl Default for SettlementConfig {
  fn default() -> Self {
    Self {
      max_price_attempts: default_price_attempts(),
      retry_base_delay_ms: default_retry_base_delay(),
    }
  }
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      bind_address: default_api_addr(),
    }
  }
}

impl Default for GatewayConfig {
  fn default() -> Self {
    Self {
      bind_address: default_gateway_addr(),
      max_messages_per_second: default_messages_per_second(),
    }
  }
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      bind_address: default_metrics_addr(),
    }
  }
}

impl Default for PersistenceConfig {
  fn default() -> Self {
    Self {
      data_dir: default_data_dir(),
      record_attempts: default_record_attempts(),
      record_retry_delay_ms: default_record_retry_delay(),
      pending_retry_interval_secs: default_pending_retry_interval(),
    }
  }
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_pick_timeout() -> u64 {
  30
}

fn default_grace_period() -> u64 {
  20
}

fn default_forfeit_threshold() -> u32 {
  2
}

fn default_abandon_after() -> u64 {
  120
}

fn default_draftable_retry() -> u64 {
  5
}

fn default_fast_window() -> u64 {
  300
}

fn default_full_window() -> u64 {
  86_400
}

fn default_auth_domain() -> String {
  "draft-duel".to_string()
}

fn default_challenge_ttl() -> u64 {
  300
}

fn default_session_ttl() -> u64 {
  86_400
}

fn default_oracle_url() -> String {
  "https://api.binance.com".to_string()
}

fn default_staleness() -> u64 {
  60
}

fn default_refresh_interval() -> u64 {
  30
}

fn default_timeout_ms() -> u64 {
  5_000
}

fn default_max_retries() -> u32 {
  3
}

fn default_retry_base_delay() -> u64 {
  200
}

fn default_price_attempts() -> u32 {
  3
}

fn default_api_addr() -> String {
  "0.0.0.0:8080".to_string()
}

fn default_gateway_addr() -> String {
  "0.0.0.0:8081".to_string()
}

fn default_messages_per_second() -> u32 {
  20
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

fn default_data_dir() -> String {
  "data".to_string()
}

fn default_record_attempts() -> u32 {
  3
}

fn default_record_retry_delay() -> u64 {
  200
}

fn default_pending_retry_interval() -> u64 {
  15
}
