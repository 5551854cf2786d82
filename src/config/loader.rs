//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;
use crate::domain::matchup::MatchType;

/// Load and validate configuration from a TOML file.
///
/// # Arguments
/// * `path` - Path to the config.toml file
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    tokens = config.oracle.tokens.len(),
    pick_timeout_secs = config.draft.per_pick_timeout_secs,
    multipliers = config.draft.round_multipliers.len(),
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig = toml::from_str(content)
    .with_context(|| "Failed to parse config.toml")?;

  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - A token universe large enough for a full draft
/// - Positive timings
/// - Finite, non-negative round multipliers
/// - Non-empty endpoints
fn validate_config(config: &AppConfig) -> Result<()> {
  // Token universe validation
  let needed = MatchType::Full.total_picks() as usize;
  anyhow::ensure!(
    config.oracle.tokens.len() >= needed,
    "At least {} tokens must be configured for a full draft, got {}",
    needed,
    config.oracle.tokens.len()
  );

  let mut seen = HashSet::new();
  for (i, token) in config.oracle.tokens.iter().enumerate() {
    anyhow::ensure!(
      !token.symbol.trim().is_empty(),
      "Token {} has empty symbol",
      i
    );
    anyhow::ensure!(
      !token.pair.trim().is_empty(),
      "Token {} ({}) has empty pair",
      i,
      token.symbol
    );
    anyhow::ensure!(
      seen.insert(token.symbol.trim().to_ascii_uppercase()),
      "Token {} is configured twice",
      token.symbol
    );
  }

  // Draft validation
  anyhow::ensure!(
    config.draft.per_pick_timeout_secs > 0,
    "per_pick_timeout_secs must be positive"
  );
  anyhow::ensure!(
    config.draft.forfeit_after_missed_turns > 0,
    "forfeit_after_missed_turns must be positive"
  );
  anyhow::ensure!(
    config.draft.abandon_after_secs > 0,
    "abandon_after_secs must be positive"
  );
  anyhow::ensure!(
    config.draft.round_multipliers.len() <= MatchType::Full.rounds() as usize,
    "round_multipliers has {} entries, a draft has at most {} rounds",
    config.draft.round_multipliers.len(),
    MatchType::Full.rounds()
  );
  for (i, m) in config.draft.round_multipliers.iter().enumerate() {
    anyhow::ensure!(
      m.is_finite() && *m >= 0.0,
      "round_multipliers[{}] must be finite and non-negative, got {}",
      i,
      m
    );
  }

  // Competition validation
  anyhow::ensure!(
    config.competition.fast_window_secs > 0 && config.competition.full_window_secs > 0,
    "Competition windows must be positive"
  );

  // Auth validation
  anyhow::ensure!(
    config.auth.challenge_ttl_secs > 0,
    "challenge_ttl_secs must be positive"
  );

  // Oracle validation
  anyhow::ensure!(
    !config.oracle.base_url.is_empty(),
    "Oracle base URL must not be empty"
  );
  anyhow::ensure!(
    config.oracle.staleness_secs > 0,
    "staleness_secs must be positive"
  );

  // Settlement validation
  anyhow::ensure!(
    config.settlement.max_price_attempts > 0,
    "max_price_attempts must be at least 1"
  );

  // Persistence validation
  anyhow::ensure!(
    config.persistence.record_attempts > 0,
    "record_attempts must be at least 1"
  );
  anyhow::ensure!(
    config.persistence.pending_retry_interval_secs > 0,
    "pending_retry_interval_secs must be positive"
  );

  // Gateway validation
  anyhow::ensure!(
    config.gateway.max_messages_per_second > 0,
    "max_messages_per_second must be positive"
  );

  Ok(())
}
