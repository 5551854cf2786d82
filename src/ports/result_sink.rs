//! Result Sink Port - Append-only Match Results
//!
//! The escrow/payout collaborator consumes match results as opaque,
//! append-only facts. The engine only ever appends; it never edits
//! or deletes a recorded result.

use async_trait::async_trait;

use crate::domain::matchup::MatchResult;

/// Trait for durable match result storage.
#[async_trait]
pub trait ResultSink: Send + Sync + 'static {
  /// Append one result record.
  async fn record(&self, result: &MatchResult) -> anyhow::Result<()>;

  /// Load every recorded result in append order (recovery/audit).
  async fn load_all(&self) -> anyhow::Result<Vec<MatchResult>>;

  /// Check if the sink is writable.
  async fn is_healthy(&self) -> bool;
}
