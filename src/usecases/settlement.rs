//! Settlement Use Case - Scoring Drafted Rosters
//!
//! Captures entry prices when a draft completes and, once the
//! competition window closes, fetches exit prices and scores both
//! rosters into a `MatchResult`.
//!
//! Settlement flow:
//! 1. Check the result book (a match settles once)
//! 2. Fetch exit prices with bounded retry, re-querying only misses
//! 3. Score starters with round multipliers
//! 4. Publish the result to the book and return the stored copy

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::domain::draft::DraftState;
use crate::domain::matchup::{
  MarketSnapshot, MatchId, MatchResult, MatchType, ParticipantId, PickSlot, TokenSymbol,
};
use crate::domain::scoring::{self, RoundMultipliers};
use crate::ports::price_oracle::PriceOracle;
use crate::usecases::results::ResultBook;

/// Everything settlement needs from a completed draft.
#[derive(Debug, Clone)]
pub struct SettlementRequest {
  pub match_id: MatchId,
  pub match_type: MatchType,
  /// Seat order (creator first).
  pub participants: [ParticipantId; 2],
  pub rosters: [Vec<PickSlot>; 2],
}

impl SettlementRequest {
  /// Build a request from a finished draft.
  pub fn from_draft(match_id: &MatchId, draft: &DraftState) -> Self {
    Self {
      match_id: match_id.clone(),
      match_type: draft.rules().match_type,
      participants: draft.seats().clone(),
      rosters: draft.rosters().clone(),
    }
  }

  /// Every drafted symbol across both rosters.
  pub fn symbols(&self) -> BTreeSet<TokenSymbol> {
    self
      .rosters
      .iter()
      .flatten()
      .map(|slot| slot.token_symbol.clone())
      .collect()
  }
}

/// Price capture and scoring for finished drafts.
pub struct SettlementEngine {
  oracle: Arc<dyn PriceOracle>,
  multipliers: RoundMultipliers,
  /// Attempts per symbol before it is recorded as unpriced.
  max_attempts: u32,
  /// Base backoff between attempts (doubled each time).
  retry_base_delay: Duration,
  /// Published results; doubles as the settled-once record.
  results: Arc<ResultBook>,
}

impl SettlementEngine {
  pub fn new(
    oracle: Arc<dyn PriceOracle>,
    results: Arc<ResultBook>,
    multipliers: RoundMultipliers,
    max_attempts: u32,
    retry_base_delay: Duration,
  ) -> Self {
    Self {
      oracle,
      multipliers,
      max_attempts: max_attempts.max(1),
      retry_base_delay,
      results,
    }
  }

  /// Snapshot entry prices for the drafted symbols.
  ///
  /// Symbols the oracle cannot price get `price_at_entry = None`
  /// and score zero.
  #[instrument(skip(self, symbols), fields(symbols = symbols.len()))]
  pub async fn capture_entry(&self, symbols: &BTreeSet<TokenSymbol>) -> Vec<MarketSnapshot> {
    let prices = self.fetch_with_retry(symbols).await;
    symbols
      .iter()
      .map(|symbol| MarketSnapshot {
        token_symbol: symbol.clone(),
        price_at_entry: prices.get(symbol).copied(),
        price_at_exit: None,
      })
      .collect()
  }

  /// Settle and publish a match. A second call for the same match
  /// returns the stored result unchanged.
  #[instrument(skip(self, request, entry), fields(match_id = %request.match_id))]
  pub async fn settle(&self, request: &SettlementRequest, entry: &[MarketSnapshot]) -> MatchResult {
    if let Some(existing) = self.settled(&request.match_id).await {
      info!("Match already settled, returning stored result");
      return existing;
    }

    let symbols = request.symbols();
    let exits = self.fetch_with_retry(&symbols).await;

    let entry_by_symbol: HashMap<&str, Option<f64>> = entry
      .iter()
      .map(|s| (s.token_symbol.as_str(), s.price_at_entry))
      .collect();

    let snapshots: Vec<MarketSnapshot> = symbols
      .iter()
      .map(|symbol| MarketSnapshot {
        token_symbol: symbol.clone(),
        price_at_entry: entry_by_symbol.get(symbol.as_str()).copied().flatten(),
        price_at_exit: exits.get(symbol).copied(),
      })
      .collect();

    let unpriced = snapshots
      .iter()
      .filter(|s| s.price_at_entry.is_none() || s.price_at_exit.is_none())
      .count();
    if unpriced > 0 {
      warn!(unpriced, "Settling with unpriced tokens scored as zero");
    }

    let result = scoring::score(
      &request.match_id,
      request.match_type,
      &request.participants,
      &request.rosters,
      snapshots,
      &self.multipliers,
      Utc::now(),
    );

    // Another caller may have raced us here; the first published result wins.
    let stored = if self.results.publish(&result).await {
      result
    } else {
      self.settled(&request.match_id).await.unwrap_or(result)
    };

    info!(
      outcome = ?stored.outcome,
      pnl = ?stored.per_participant_pnl.iter().map(|p| p.pnl).collect::<Vec<_>>(),
      "Match settled"
    );
    stored
  }

  /// Stored result for a match, if it has settled.
  pub async fn settled(&self, match_id: &MatchId) -> Option<MatchResult> {
    self.results.get(match_id).await
  }

  /// Fetch prices, retrying only the symbols still missing.
  async fn fetch_with_retry(&self, symbols: &BTreeSet<TokenSymbol>) -> HashMap<TokenSymbol, f64> {
    let mut found: HashMap<TokenSymbol, f64> = HashMap::new();
    let mut missing = symbols.clone();

    for attempt in 0..self.max_attempts {
      if missing.is_empty() {
        break;
      }
      if attempt > 0 {
        let delay = self.retry_base_delay * 2u32.saturating_pow(attempt - 1);
        tokio::time::sleep(delay).await;
      }

      match self.oracle.get_prices(&missing).await {
        Ok(prices) => {
          for (symbol, price) in prices {
            if missing.remove(&symbol) && price.is_finite() && price > 0.0 {
              found.insert(symbol, price);
            }
          }
        }
        Err(e) => {
          warn!(attempt = attempt + 1, error = %e, "Price fetch failed");
        }
      }
    }

    if !missing.is_empty() {
      warn!(missing = ?missing, "Prices unavailable after retries");
    }
    found
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::matchup::{DraftableToken, Outcome, Resolution};
  use crate::ports::result_sink::ResultSink;
  use async_trait::async_trait;
  use std::sync::Mutex;
  use std::sync::atomic::{AtomicU32, Ordering};

  /// Oracle that serves successive price tables, one per call.
  struct ScriptedOracle {
    tables: Mutex<Vec<HashMap<TokenSymbol, f64>>>,
    calls: AtomicU32,
  }

  impl ScriptedOracle {
    fn new(tables: Vec<Vec<(&str, f64)>>) -> Self {
      let tables = tables
        .into_iter()
        .rev()
        .map(|t| t.into_iter().map(|(s, p)| (s.to_string(), p)).collect())
        .collect();
      Self {
        tables: Mutex::new(tables),
        calls: AtomicU32::new(0),
      }
    }
  }

  #[async_trait]
  impl PriceOracle for ScriptedOracle {
    async fn list_draftable(&self) -> anyhow::Result<Vec<DraftableToken>> {
      Ok(Vec::new())
    }

    async fn get_prices(
      &self,
      symbols: &BTreeSet<TokenSymbol>,
    ) -> anyhow::Result<HashMap<TokenSymbol, f64>> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      let table = self.tables.lock().unwrap().pop().unwrap_or_default();
      Ok(
        table
          .into_iter()
          .filter(|(s, _)| symbols.contains(s))
          .collect(),
      )
    }

    async fn is_healthy(&self) -> bool {
      true
    }
  }

  #[derive(Default)]
  struct MemorySink(Mutex<Vec<MatchResult>>);

  #[async_trait]
  impl ResultSink for MemorySink {
    async fn record(&self, result: &MatchResult) -> anyhow::Result<()> {
      self.0.lock().unwrap().push(result.clone());
      Ok(())
    }

    async fn load_all(&self) -> anyhow::Result<Vec<MatchResult>> {
      Ok(self.0.lock().unwrap().clone())
    }

    async fn is_healthy(&self) -> bool {
      true
    }
  }

  fn slot(symbol: &str, slot_index: u32, round: u32) -> PickSlot {
    PickSlot {
      slot_index,
      token_symbol: symbol.to_string(),
      pick_round: round,
      filled_at: Utc::now(),
      auto_picked: false,
    }
  }

  fn fast_request() -> SettlementRequest {
    SettlementRequest {
      match_id: "m-1".into(),
      match_type: MatchType::Fast,
      participants: ["0xaaaa".into(), "0xbbbb".into()],
      rosters: [vec![slot("ETH", 0, 1)], vec![slot("BTC", 0, 1)]],
    }
  }

  fn engine(oracle: Arc<dyn PriceOracle>) -> SettlementEngine {
    engine_with_sink(oracle, Arc::new(MemorySink::default()))
  }

  fn engine_with_sink(oracle: Arc<dyn PriceOracle>, sink: Arc<MemorySink>) -> SettlementEngine {
    SettlementEngine::new(
      oracle,
      Arc::new(ResultBook::new(sink)),
      RoundMultipliers::default(),
      3,
      Duration::from_millis(10),
    )
  }

  #[tokio::test]
  async fn test_fast_match_settles_to_higher_pnl() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
      vec![("ETH", 100.0), ("BTC", 100.0)],
      vec![("ETH", 105.0), ("BTC", 98.0)],
    ]));
    let engine = engine(oracle);
    let request = fast_request();

    let entry = engine.capture_entry(&request.symbols()).await;
    let result = engine.settle(&request, &entry).await;

    assert_eq!(result.resolution, Resolution::Settled);
    assert_eq!(
      result.outcome,
      Outcome::Winner {
        identity: "0xaaaa".into()
      }
    );
    assert!((result.pnl_of("0xaaaa").unwrap() - 0.05).abs() < 1e-12);
    assert!((result.pnl_of("0xbbbb").unwrap() + 0.02).abs() < 1e-12);
  }

  #[tokio::test]
  async fn test_second_settle_returns_stored_result() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
      vec![("ETH", 100.0), ("BTC", 100.0)],
      vec![("ETH", 105.0), ("BTC", 98.0)],
      vec![("ETH", 50.0), ("BTC", 500.0)],
    ]));
    let sink = Arc::new(MemorySink::default());
    let engine = engine_with_sink(oracle.clone(), sink.clone());
    let request = fast_request();

    let entry = engine.capture_entry(&request.symbols()).await;
    let first = engine.settle(&request, &entry).await;
    let second = engine.settle(&request, &entry).await;

    assert_eq!(
      serde_json::to_string(&first).unwrap(),
      serde_json::to_string(&second).unwrap()
    );
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);
    assert_eq!(sink.0.lock().unwrap().len(), 1);
    assert_eq!(engine.settled(&request.match_id).await, Some(first));
  }

  #[tokio::test(start_paused = true)]
  async fn test_missing_exit_price_retried_then_scored_zero() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
      vec![("ETH", 100.0), ("BTC", 100.0)],
      // Exit: BTC missing on every attempt.
      vec![("ETH", 110.0)],
      vec![],
      vec![],
    ]));
    let engine = engine(oracle.clone());
    let request = fast_request();

    let entry = engine.capture_entry(&request.symbols()).await;
    let result = engine.settle(&request, &entry).await;

    assert_eq!(oracle.calls.load(Ordering::SeqCst), 4);
    assert_eq!(result.pnl_of("0xbbbb"), Some(0.0));
    let btc = result
      .snapshots
      .iter()
      .find(|s| s.token_symbol == "BTC")
      .unwrap();
    assert_eq!(btc.price_at_exit, None);
  }

  #[tokio::test]
  async fn test_missing_entry_price_scores_zero() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
      vec![("ETH", 100.0)],
      vec![],
      vec![],
      vec![("ETH", 90.0), ("BTC", 120.0)],
    ]));
    let engine = engine(oracle);
    let request = fast_request();

    let entry = engine.capture_entry(&request.symbols()).await;
    assert_eq!(entry.iter().filter(|s| s.price_at_entry.is_none()).count(), 1);

    let result = engine.settle(&request, &entry).await;
    assert_eq!(result.pnl_of("0xbbbb"), Some(0.0));
    assert_eq!(result.winner(), Some("0xbbbb"));
  }
}
