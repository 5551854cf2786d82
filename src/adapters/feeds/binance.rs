//! Binance REST Price Source - Draftable Token Prices
//!
//! Polls Binance's `ticker/price` endpoint for the configured token
//! universe. Each drafted symbol maps to one quote pair (e.g. ETH →
//! ETHUSDT). Requests are concurrency-limited and retried with
//! exponential backoff on transient failures.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use crate::config::OracleConfig;
use crate::domain::matchup::{DraftableToken, TokenSymbol, normalize_symbol};
use crate::ports::price_oracle::PriceOracle;

/// Maximum concurrent requests against the price source.
const MAX_CONCURRENT: usize = 4;

/// One entry of the `ticker/price` response.
#[derive(Debug, Deserialize)]
struct TickerPrice {
    /// Pair symbol (e.g., "ETHUSDT").
    symbol: String,
    /// Last price as string.
    price: String,
}

/// REST price source for a fixed token universe.
pub struct BinancePriceSource {
    http: Client,
    base_url: String,
    /// Drafted symbol → quote pair.
    pairs: HashMap<TokenSymbol, String>,
    /// Quote pair → drafted symbol.
    symbols: HashMap<String, TokenSymbol>,
    semaphore: Arc<Semaphore>,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl BinancePriceSource {
    pub fn new(config: &OracleConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .pool_max_idle_per_host(2)
            .build()
            .context("Failed to build HTTP client")?;

        let pairs: HashMap<TokenSymbol, String> = config
            .tokens
            .iter()
            .map(|t| (normalize_symbol(&t.symbol), t.pair.trim().to_ascii_uppercase()))
            .collect();
        let symbols = pairs
            .iter()
            .map(|(symbol, pair)| (pair.clone(), symbol.clone()))
            .collect();

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            pairs,
            symbols,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT)),
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
        })
    }

    /// Fetch prices for the given pairs, keyed by drafted symbol.
    #[instrument(skip(self, pairs), fields(pairs = pairs.len()))]
    async fn fetch(&self, pairs: &[String]) -> Result<HashMap<TokenSymbol, f64>> {
        if pairs.is_empty() {
            return Ok(HashMap::new());
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .context("Semaphore closed")?;

        let url = format!("{}/api/v3/ticker/price", self.base_url);
        let symbols_param = serde_json::to_string(pairs).context("Failed to encode pairs")?;
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.retry_base_delay * 2u32.saturating_pow(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis(), "Retrying price request");
                sleep(delay).await;
            }

            let response = match self
                .http
                .get(&url)
                .query(&[("symbols", symbols_param.as_str())])
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, attempt, "Price request failed");
                    last_error = Some(e.into());
                    continue;
                }
            };

            match response.status() {
                StatusCode::OK => {
                    let tickers: Vec<TickerPrice> = response
                        .json()
                        .await
                        .context("Invalid ticker/price JSON")?;
                    return Ok(self.map_tickers(tickers));
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    warn!("Rate limited by price source, backing off");
                    last_error = Some(anyhow::anyhow!("Rate limited"));
                }
                status if status.is_server_error() => {
                    warn!(status = %status, "Price source server error, retrying");
                    last_error = Some(anyhow::anyhow!("Server error: {status}"));
                }
                status => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(anyhow::anyhow!("Price source error {status}: {body}"));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Max retries exceeded")))
    }

    /// Keep parseable, positive prices for known pairs.
    fn map_tickers(&self, tickers: Vec<TickerPrice>) -> HashMap<TokenSymbol, f64> {
        tickers
            .into_iter()
            .filter_map(|t| {
                let symbol = self.symbols.get(&t.symbol)?;
                let price: f64 = t.price.parse().ok()?;
                (price.is_finite() && price > 0.0).then(|| (symbol.clone(), price))
            })
            .collect()
    }
}

#[async_trait]
impl PriceOracle for BinancePriceSource {
    async fn list_draftable(&self) -> Result<Vec<DraftableToken>> {
        let pairs: Vec<String> = self.pairs.values().cloned().collect();
        let prices = self.fetch(&pairs).await?;
        Ok(prices
            .into_iter()
            .map(|(symbol, price)| DraftableToken { symbol, price })
            .collect())
    }

    async fn get_prices(&self, symbols: &BTreeSet<TokenSymbol>) -> Result<HashMap<TokenSymbol, f64>> {
        let pairs: Vec<String> = symbols
            .iter()
            .filter_map(|s| self.pairs.get(s).cloned())
            .collect();
        self.fetch(&pairs).await
    }

    async fn is_healthy(&self) -> bool {
        let url = format!("{}/api/v3/ping", self.base_url);
        matches!(self.http.get(&url).send().await, Ok(r) if r.status().is_success())
    }
}
