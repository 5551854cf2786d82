//! Result Book - Append-only Match Outcomes
//!
//! Every `MatchResult` a session produces passes through here on its
//! way to the durable sink. The in-memory index answers lookups after
//! the match task has exited.
//!
//! Sink writes are retried with backoff. A result the sink still
//! refuses is queued and offered again by the background `run` loop;
//! while anything is queued the book reports itself unhealthy.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{error, info, warn};

use crate::domain::matchup::{MatchId, MatchResult};
use crate::ports::result_sink::ResultSink;

const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);

pub struct ResultBook {
  sink: Arc<dyn ResultSink>,
  index: RwLock<HashMap<MatchId, MatchResult>>,
  /// Published results the sink has not accepted yet, oldest first.
  pending: Mutex<VecDeque<MatchResult>>,
  attempts: u32,
  retry_base_delay: Duration,
}

impl ResultBook {
  pub fn new(sink: Arc<dyn ResultSink>) -> Self {
    Self {
      sink,
      index: RwLock::new(HashMap::new()),
      pending: Mutex::new(VecDeque::new()),
      attempts: DEFAULT_ATTEMPTS,
      retry_base_delay: DEFAULT_RETRY_DELAY,
    }
  }

  /// Override the per-publish sink retry policy.
  pub fn with_retry(mut self, attempts: u32, retry_base_delay: Duration) -> Self {
    self.attempts = attempts.max(1);
    self.retry_base_delay = retry_base_delay;
    self
  }

  /// Rebuild the index from the sink. Later duplicates are ignored.
  pub async fn restore(&self) -> anyhow::Result<usize> {
    let results = self.sink.load_all().await?;
    let mut index = self.index.write().await;
    for result in results {
      index.entry(result.match_id.clone()).or_insert(result);
    }
    info!(results = index.len(), "Result index restored");
    Ok(index.len())
  }

  /// Record a result. Publishing the same match twice is a no-op.
  ///
  /// The result is queryable immediately. If the sink keeps failing it
  /// is queued for `flush_pending` instead of being dropped.
  pub async fn publish(&self, result: &MatchResult) -> bool {
    {
      let mut index = self.index.write().await;
      if index.contains_key(&result.match_id) {
        warn!(match_id = %result.match_id, "Result already published");
        return false;
      }
      index.insert(result.match_id.clone(), result.clone());
    }

    if !self.record_with_retry(result).await {
      error!(match_id = %result.match_id, "Result not persisted, queued for retry");
      self.pending.lock().await.push_back(result.clone());
    }
    true
  }

  async fn record_with_retry(&self, result: &MatchResult) -> bool {
    for attempt in 0..self.attempts {
      if attempt > 0 {
        let delay = self.retry_base_delay * 2u32.saturating_pow(attempt - 1);
        tokio::time::sleep(delay).await;
      }
      match self.sink.record(result).await {
        Ok(()) => return true,
        Err(e) => {
          warn!(match_id = %result.match_id, attempt = attempt + 1, error = %e, "Failed to persist match result");
        }
      }
    }
    false
  }

  /// Offer every queued result to the sink once, in order.
  ///
  /// Returns how many are still queued.
  pub async fn flush_pending(&self) -> usize {
    let mut pending = self.pending.lock().await;
    let mut still_pending = VecDeque::with_capacity(pending.len());
    while let Some(result) = pending.pop_front() {
      match self.sink.record(&result).await {
        Ok(()) => info!(match_id = %result.match_id, "Queued result persisted"),
        Err(e) => {
          warn!(match_id = %result.match_id, error = %e, "Queued result still not persisted");
          still_pending.push_back(result);
        }
      }
    }
    *pending = still_pending;
    pending.len()
  }

  /// Retry queued results on an interval until shutdown, with a final
  /// flush on the way out.
  pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        _ = shutdown_rx.recv() => {
          let left = self.flush_pending().await;
          if left > 0 {
            error!(pending = left, "Shutting down with unpersisted results");
          }
          return;
        }
        _ = ticker.tick() => {
          if !self.pending.lock().await.is_empty() {
            self.flush_pending().await;
          }
        }
      }
    }
  }

  pub async fn get(&self, match_id: &str) -> Option<MatchResult> {
    self.index.read().await.get(match_id).cloned()
  }

  pub async fn len(&self) -> usize {
    self.index.read().await.len()
  }

  /// Results published but not yet accepted by the sink.
  pub async fn pending(&self) -> usize {
    self.pending.lock().await.len()
  }

  /// Sink reachable and nothing waiting to be persisted.
  pub async fn is_healthy(&self) -> bool {
    self.pending().await == 0 && self.sink.is_healthy().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::matchup::{Outcome, Resolution};
  use async_trait::async_trait;
  use chrono::Utc;
  use std::sync::atomic::{AtomicU32, Ordering};

  /// Sink that rejects the first `failures` writes.
  struct FlakySink {
    failures: AtomicU32,
    calls: AtomicU32,
    stored: std::sync::Mutex<Vec<MatchResult>>,
  }

  impl FlakySink {
    fn failing(failures: u32) -> Arc<Self> {
      Arc::new(Self {
        failures: AtomicU32::new(failures),
        calls: AtomicU32::new(0),
        stored: std::sync::Mutex::new(Vec::new()),
      })
    }
  }

  #[async_trait]
  impl ResultSink for FlakySink {
    async fn record(&self, result: &MatchResult) -> anyhow::Result<()> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      let left = self.failures.load(Ordering::SeqCst);
      if left > 0 {
        self.failures.store(left - 1, Ordering::SeqCst);
        anyhow::bail!("disk full");
      }
      self.stored.lock().unwrap().push(result.clone());
      Ok(())
    }

    async fn load_all(&self) -> anyhow::Result<Vec<MatchResult>> {
      Ok(self.stored.lock().unwrap().clone())
    }

    async fn is_healthy(&self) -> bool {
      true
    }
  }

  fn result(match_id: &str) -> MatchResult {
    MatchResult {
      match_id: match_id.into(),
      per_participant_pnl: Vec::new(),
      outcome: Outcome::Tie,
      resolution: Resolution::Settled,
      snapshots: Vec::new(),
      settled_at: Utc::now(),
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_publish_retries_a_failed_write() {
    let sink = FlakySink::failing(1);
    let book = ResultBook::new(sink.clone());

    assert!(book.publish(&result("m-1")).await);

    assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
    assert_eq!(sink.stored.lock().unwrap().len(), 1);
    assert_eq!(book.pending().await, 0);

    let restarted = ResultBook::new(sink.clone());
    assert_eq!(restarted.restore().await.unwrap(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_unpersisted_result_is_queued_until_sink_recovers() {
    let sink = FlakySink::failing(4);
    let book = ResultBook::new(sink.clone()).with_retry(3, Duration::from_millis(10));

    assert!(book.publish(&result("m-1")).await);
    assert_eq!(book.pending().await, 1);
    assert!(!book.is_healthy().await);
    assert!(book.get("m-1").await.is_some());
    assert!(!book.publish(&result("m-1")).await);

    // Fourth write fails, fifth succeeds.
    assert_eq!(book.flush_pending().await, 1);
    assert_eq!(book.flush_pending().await, 0);
    assert!(book.is_healthy().await);
    assert_eq!(sink.stored.lock().unwrap().len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_run_flushes_queue_on_interval() {
    let sink = FlakySink::failing(1);
    let book = Arc::new(ResultBook::new(sink.clone()).with_retry(1, Duration::from_millis(10)));
    book.publish(&result("m-1")).await;
    assert_eq!(book.pending().await, 1);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let task = tokio::spawn(Arc::clone(&book).run(Duration::from_secs(5), shutdown_rx));
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(book.pending().await, 0);
    assert_eq!(sink.stored.lock().unwrap().len(), 1);
    let _ = shutdown_tx.send(());
    task.await.unwrap();
  }
}
