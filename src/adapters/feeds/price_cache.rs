//! Price Cache - Shared, Refreshable Price Board
//!
//! Wraps a price source with a staleness bound. Matches read through
//! the cache; a background task refreshes it on an interval. When the
//! source fails, the last good board keeps serving so a match never
//! waits on a dead provider.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::domain::matchup::{DraftableToken, TokenSymbol};
use crate::ports::price_oracle::PriceOracle;

#[derive(Debug, Clone)]
struct Board {
    prices: HashMap<TokenSymbol, f64>,
    fetched_at: Instant,
}

/// Cached view over a price source.
pub struct PriceCache {
    source: Arc<dyn PriceOracle>,
    staleness: Duration,
    board: RwLock<Option<Board>>,
    /// Whether the last refresh succeeded.
    healthy: AtomicBool,
}

impl PriceCache {
    pub fn new(source: Arc<dyn PriceOracle>, staleness: Duration) -> Self {
        Self {
            source,
            staleness,
            board: RwLock::new(None),
            healthy: AtomicBool::new(false),
        }
    }

    /// Refresh the board from the source.
    pub async fn refresh(&self) -> Result<usize> {
        match self.source.list_draftable().await {
            Ok(tokens) => {
                let prices: HashMap<TokenSymbol, f64> =
                    tokens.into_iter().map(|t| (t.symbol, t.price)).collect();
                let count = prices.len();
                *self.board.write().await = Some(Board {
                    prices,
                    fetched_at: Instant::now(),
                });
                self.healthy.store(true, Ordering::Relaxed);
                debug!(tokens = count, "Price board refreshed");
                Ok(count)
            }
            Err(e) => {
                self.healthy.store(false, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Refresh on a fixed interval until shutdown.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "Price cache refresh loop started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received in price cache");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        warn!(error = %e, "Price board refresh failed, serving last good board");
                    }
                }
            }
        }
    }

    /// Current board: fresh if possible, otherwise the last good one.
    async fn current(&self) -> Result<Board> {
        let cached = self.board.read().await.clone();
        if let Some(board) = &cached {
            if board.fetched_at.elapsed() <= self.staleness {
                return Ok(board.clone());
            }
        }

        match self.refresh().await {
            Ok(_) => {
                let board = self.board.read().await.clone();
                board.ok_or_else(|| anyhow::anyhow!("Price board empty after refresh"))
            }
            Err(e) => match cached {
                Some(board) => {
                    warn!(
                        error = %e,
                        age_secs = board.fetched_at.elapsed().as_secs(),
                        "Serving stale price board"
                    );
                    Ok(board)
                }
                None => Err(e.context("No price board available")),
            },
        }
    }
}

#[async_trait]
impl PriceOracle for PriceCache {
    async fn list_draftable(&self) -> Result<Vec<DraftableToken>> {
        let board = self.current().await?;
        Ok(board
            .prices
            .into_iter()
            .map(|(symbol, price)| DraftableToken { symbol, price })
            .collect())
    }

    async fn get_prices(&self, symbols: &BTreeSet<TokenSymbol>) -> Result<HashMap<TokenSymbol, f64>> {
        let board = self.current().await.ok();
        let mut found: HashMap<TokenSymbol, f64> = HashMap::new();
        let mut missing: BTreeSet<TokenSymbol> = BTreeSet::new();

        for symbol in symbols {
            match board.as_ref().and_then(|b| b.prices.get(symbol)) {
                Some(price) => {
                    found.insert(symbol.clone(), *price);
                }
                None => {
                    missing.insert(symbol.clone());
                }
            }
        }

        // Symbols the board lacks go straight to the source.
        if !missing.is_empty() {
            match self.source.get_prices(&missing).await {
                Ok(prices) => found.extend(prices),
                Err(e) if found.is_empty() => return Err(e),
                Err(e) => warn!(error = %e, missing = missing.len(), "Partial price lookup"),
            }
        }
        Ok(found)
    }

    async fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}
