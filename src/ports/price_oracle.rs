//! Price Oracle Port - Token Price Snapshots
//!
//! Defines the trait the engine uses to read token prices, both for
//! the draftable list and for entry/exit capture at settlement.
//! The provider's transport and refresh cadence stay outside the core.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use crate::domain::matchup::{DraftableToken, TokenSymbol};

/// Trait for token price providers.
///
/// Implementations may serve slightly stale data; callers must
/// tolerate that and must never wait indefinitely for a refresh.
#[async_trait]
pub trait PriceOracle: Send + Sync + 'static {
  /// List every token currently eligible for drafting, with its price.
  async fn list_draftable(&self) -> anyhow::Result<Vec<DraftableToken>>;

  /// Look up prices for a set of symbols.
  ///
  /// Partial by contract: symbols the provider cannot price are
  /// omitted from the map rather than failing the whole call.
  async fn get_prices(
    &self,
    symbols: &BTreeSet<TokenSymbol>,
  ) -> anyhow::Result<HashMap<TokenSymbol, f64>>;

  /// Check if the provider is serving data.
  async fn is_healthy(&self) -> bool;
}
