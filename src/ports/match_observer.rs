//! Match Observer Port - Session Lifecycle Signals
//!
//! Narrow hook the session coordinator reports lifecycle events
//! through. The metrics adapter implements it; tests use the no-op.

use crate::domain::errors::ErrorKind;
use crate::domain::matchup::{MatchType, Phase};

/// Receiver of match lifecycle signals. Calls must not block.
pub trait MatchObserver: Send + Sync + 'static {
  /// A match session started.
  fn match_opened(&self, match_type: MatchType);

  /// A match session reached a terminal phase.
  fn match_closed(&self, match_type: MatchType, phase: Phase);

  /// A pick landed in a roster.
  fn pick_applied(&self, auto_picked: bool);

  /// A participant's action was rejected.
  fn action_rejected(&self, kind: ErrorKind);

  /// Seconds spent fetching exit prices and scoring.
  fn settlement_duration(&self, seconds: f64);
}

/// Observer that discards every signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl MatchObserver for NoopObserver {
  fn match_opened(&self, _match_type: MatchType) {}

  fn match_closed(&self, _match_type: MatchType, _phase: Phase) {}

  fn pick_applied(&self, _auto_picked: bool) {}

  fn action_rejected(&self, _kind: ErrorKind) {}

  fn settlement_duration(&self, _seconds: f64) {}
}
